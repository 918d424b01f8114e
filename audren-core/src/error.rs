//! Error types
//!
//! Guest-visible failures are `RendererError`s and carry a Switch result code.
//! Everything that goes wrong while a frame is being processed is logged and
//! recovered from in place, so none of these reach the audio path.

use std::path::PathBuf;

/// Error module id of the audio service
const AUDIO_MODULE: u32 = 153;

const fn make_result(description: u32) -> u32 {
    AUDIO_MODULE | (description << 9)
}

/// Result codes surfaced through the service layer
pub mod result {
    use super::make_result;

    pub const OPERATION_FAILED: u32 = make_result(2);
    pub const INVALID_SAMPLE_RATE: u32 = make_result(3);
    pub const INVALID_UPDATE_INFO: u32 = make_result(41);
    pub const INVALID_ADDRESS_INFO: u32 = make_result(42);
    pub const INVALID_REVISION: u32 = make_result(1537);
}

/// Configuration and update failures reported to the guest
#[derive(Debug, thiserror::Error)]
pub enum RendererError {
    /// Revision magic is not `REV` followed by a digit
    #[error("invalid revision magic {0:#010x}")]
    InvalidRevision(u32),

    /// Revision is newer than this renderer understands
    #[error("unsupported revision {revision} (max {max})")]
    UnsupportedRevision { revision: u32, max: u32 },

    /// Renderer sample rate must be 32 kHz or 48 kHz
    #[error("invalid sample rate {0}")]
    InvalidSampleRate(u32),

    /// Sample count must be non-zero and fit one decode pass
    #[error("invalid sample count {0}")]
    InvalidSampleCount(u32),

    /// Update data references something inconsistent
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// An index or count exceeds its table
    #[error("{what} {index} out of range (max {max})")]
    OutOfRange {
        what: &'static str,
        index: usize,
        max: usize,
    },

    /// Operation is not valid in the current renderer state
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// A guest address could not be accessed
    #[error(transparent)]
    Memory(#[from] MemoryError),

    /// The ADSP render thread could not be started
    #[error("failed to spawn ADSP render thread: {0}")]
    ThreadSpawn(#[source] std::io::Error),

    /// A command list could not be encoded
    #[error(transparent)]
    Wire(#[from] WireError),
}

impl RendererError {
    /// Switch-style result code for this error
    pub fn result_code(&self) -> u32 {
        match self {
            Self::InvalidRevision(_) | Self::UnsupportedRevision { .. } => result::INVALID_REVISION,
            Self::InvalidSampleRate(_) => result::INVALID_SAMPLE_RATE,
            Self::InvalidSampleCount(_) | Self::InvalidParameter(_) | Self::OutOfRange { .. } => {
                result::INVALID_UPDATE_INFO
            }
            Self::Memory(_) => result::INVALID_ADDRESS_INFO,
            Self::InvalidState(_) | Self::ThreadSpawn(_) | Self::Wire(_) => {
                result::OPERATION_FAILED
            }
        }
    }
}

/// Guest memory access failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MemoryError {
    /// Address 0 was dereferenced
    #[error("null guest address")]
    NullAddress,

    /// Range is not backed by guest memory
    #[error("unmapped guest range {address:#x}+{len:#x}")]
    Unmapped { address: u64, len: usize },
}

/// Command list encoding and decoding failures
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// List is shorter than its header
    #[error("command list of {0} bytes has no header")]
    TruncatedList(usize),

    /// Record does not start with the command magic
    #[error("bad command magic {magic:#010x} at offset {offset:#x}")]
    BadMagic { offset: usize, magic: u32 },

    /// Record size runs past the end of the list
    #[error("command at offset {offset:#x} with size {size:#x} overruns the {len:#x} byte list")]
    OutOfBounds { offset: usize, size: usize, len: usize },

    /// Header asks for more buffer space than a list may use
    #[error("command list header with {buffer_count} buffers of {sample_count} samples")]
    InvalidListHeader { sample_count: u32, buffer_count: u32 },

    #[error("unknown command id {0}")]
    UnknownCommand(u8),

    #[error("invalid performance state {0}")]
    InvalidPerformanceState(u8),

    /// Payload shorter than its command needs, or a failed write
    #[error("command payload: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration file failures
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

pub type Result<T, E = RendererError> = std::result::Result<T, E>;
