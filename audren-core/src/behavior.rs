//! Revision negotiation
//!
//! The guest announces the renderer revision it was built against as a
//! four byte magic, `REV` followed by an ASCII digit. Features are enabled
//! by comparing that revision against a fixed threshold table.

use tracing::debug;

use crate::error::{RendererError, Result};

/// Highest revision this renderer implements
pub const MAX_REVISION: u32 = 8;

const REV_PREFIX: [u8; 3] = *b"REV";

/// Build the magic for `revision`
pub const fn revision_magic(revision: u32) -> u32 {
    u32::from_le_bytes([b'R', b'E', b'V', b'0' + revision as u8])
}

/// Parse a `REV<digit>` magic into its revision number
pub fn parse_revision_magic(magic: u32) -> Result<u32> {
    let bytes = magic.to_le_bytes();
    if bytes[..3] != REV_PREFIX || !bytes[3].is_ascii_digit() {
        return Err(RendererError::InvalidRevision(magic));
    }
    Ok((bytes[3] - b'0') as u32)
}

/// Negotiated feature set of one renderer session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BehaviorInfo {
    user_revision: u32,
}

impl Default for BehaviorInfo {
    fn default() -> Self {
        Self {
            user_revision: MAX_REVISION,
        }
    }
}

impl BehaviorInfo {
    /// Negotiate from a guest revision magic
    pub fn from_magic(magic: u32) -> Result<Self> {
        let revision = parse_revision_magic(magic)?;
        if revision > MAX_REVISION {
            return Err(RendererError::UnsupportedRevision {
                revision,
                max: MAX_REVISION,
            });
        }
        debug!("Negotiated audio renderer revision {}", revision);
        Ok(Self {
            user_revision: revision,
        })
    }

    pub fn user_revision(&self) -> u32 {
        self.user_revision
    }

    fn at_least(&self, revision: u32) -> bool {
        self.user_revision >= revision
    }

    pub fn is_splitter_supported(&self) -> bool {
        self.at_least(2)
    }

    pub fn is_adpcm_loop_context_bug_fixed(&self) -> bool {
        self.at_least(2)
    }

    pub fn is_long_size_pre_delay_supported(&self) -> bool {
        self.at_least(3)
    }

    pub fn is_processing_time_limit_75_percent_supported(&self) -> bool {
        self.at_least(4)
    }

    pub fn is_processing_time_limit_80_percent_supported(&self) -> bool {
        self.at_least(5)
    }

    pub fn is_elapsed_frame_count_supported(&self) -> bool {
        self.at_least(5)
    }

    pub fn is_flush_voice_wave_buffers_supported(&self) -> bool {
        self.at_least(5)
    }

    pub fn is_voice_played_sample_count_reset_at_loop_point_supported(&self) -> bool {
        self.at_least(5)
    }

    pub fn is_voice_pitch_and_src_skipped_supported(&self) -> bool {
        self.at_least(5)
    }

    pub fn is_mix_in_parameter_dirty_only_update_supported(&self) -> bool {
        self.at_least(7)
    }

    pub fn is_wave_buffer_version2_supported(&self) -> bool {
        self.at_least(8)
    }

    /// Share of the ADSP ceiling a session may use, in percent
    pub fn processing_time_limit_percent(&self) -> u32 {
        if self.is_processing_time_limit_80_percent_supported() {
            80
        } else if self.is_processing_time_limit_75_percent_supported() {
            75
        } else {
            70
        }
    }
}
