//! Renderer configuration (audren.toml)
//!
//! Every field has a default, so an empty file or a missing section is a
//! valid configuration. The config is handed to each renderer and ADSP
//! instance by value; there is no process-wide settings object.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ConfigError;

/// ADSP per-cycle processing ceiling in nanoseconds
pub const DEFAULT_MAX_PROCESS_TIME_NS: u64 = 2_304_000;

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AudioConfig {
    /// Command generation and ADSP settings
    #[serde(default)]
    pub renderer: RendererConfig,
    /// Output stream settings
    #[serde(default)]
    pub sink: SinkConfig,
}

/// Command generation and ADSP settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RendererConfig {
    /// Dump every frame's DSP trace (default: false)
    #[serde(default)]
    pub dump_commands: bool,
    /// Stop processing a command list once its time budget is spent (default: false)
    #[serde(default)]
    pub enforce_time_budget: bool,
    /// ADSP per-cycle ceiling in nanoseconds (default: 2304000)
    #[serde(default = "default_max_process_time_ns")]
    pub max_process_time_ns: u64,
}

/// Output stream settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Frames of audio the sink ring holds (default: 4)
    #[serde(default = "default_ring_buffers")]
    pub ring_buffers: usize,
    /// Channels the output device plays (default: 2)
    #[serde(default = "default_device_channels")]
    pub device_channels: u32,
    /// Stream volume (default: 1.0)
    #[serde(default = "default_volume")]
    pub volume: f32,
}

fn default_max_process_time_ns() -> u64 {
    DEFAULT_MAX_PROCESS_TIME_NS
}
fn default_ring_buffers() -> usize {
    4
}
fn default_device_channels() -> u32 {
    2
}
fn default_volume() -> f32 {
    1.0
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            dump_commands: false,
            enforce_time_budget: false,
            max_process_time_ns: default_max_process_time_ns(),
        }
    }
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            ring_buffers: default_ring_buffers(),
            device_channels: default_device_channels(),
            volume: default_volume(),
        }
    }
}

impl AudioConfig {
    /// Parse a config from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Load a config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Load a config file, falling back to defaults if it is missing or invalid
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(ConfigError::Io { source, .. })
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                Self::default()
            }
            Err(e) => {
                warn!("{}, using defaults", e);
                Self::default()
            }
        }
    }
}
