//! audren-adpcm: 4-bit DSP-ADPCM codec
//!
//! The voice decode stage of the audio renderer reads guest wave buffers
//! in this format. **This is a pure codec** - it knows nothing about wave
//! buffers, guest memory or voices. The caller hands it the raw bytes of a
//! wave buffer, the per-voice coefficient table and a decoder context.
//!
//! # Frame Format
//!
//! ```text
//! Frame (8 bytes, repeats):
//!   0x00: header (u8)  predictor index [7:4], scale [3:0]
//!   0x01: 7 bytes of nibbles, high nibble first (14 samples)
//! ```
//!
//! Sample `n` lives in frame `n / 14`; its nibble address is
//! `(n / 14) * 16 + n % 14 + 2` (the two header nibbles are skipped).
//!
//! # Prediction
//!
//! Each nibble is sign-extended, shifted by the frame scale, and run through
//! a second order filter in 11-bit fixed point:
//!
//! ```text
//! y[n] = clamp16(((x << scale << 11) + 0x400 + c1 * y[n-1] + c2 * y[n-2]) >> 11)
//! ```
//!
//! # Usage
//!
//! ```
//! use audren_adpcm::{AdpcmContext, decode_adpcm};
//!
//! // One frame, predictor 0, scale 0, nibbles 1..=7 then -8..-2
//! let frame = [0x00, 0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC, 0xDE];
//! let coeffs = [0i16; 16];
//! let mut context = AdpcmContext::default();
//! let mut output = [0i16; 14];
//!
//! let decoded = decode_adpcm(&frame, 0, &coeffs, &mut context, &mut output).unwrap();
//! assert_eq!(decoded, 14);
//! assert_eq!(output[0], 1);
//! assert_eq!(output[7], -8);
//! ```

mod decode;

pub use decode::{decode_adpcm, decode_sample};

// =============================================================================
// Constants
// =============================================================================

/// Bytes per frame (1 header byte + 7 data bytes)
pub const FRAME_LEN: usize = 8;

/// Samples encoded in one frame
pub const SAMPLES_PER_FRAME: usize = 14;

/// Nibbles per frame, header included
pub const NIBBLES_PER_FRAME: usize = 16;

/// Number of coefficient pairs in a table
pub const COEFFICIENT_PAIRS: usize = 8;

/// Sign-extension table for 4-bit residuals
pub const SIGNED_NIBBLES: [i32; 16] = [0, 1, 2, 3, 4, 5, 6, 7, -8, -7, -6, -5, -4, -3, -2, -1];

/// Per-voice predictor table: 8 (c1, c2) pairs in 11-bit fixed point
pub type AdpcmCoefficients = [i16; 16];

// =============================================================================
// Decoder Context
// =============================================================================

/// Decoder state carried across calls and across wave buffers.
///
/// Guest loop contexts use the same 6-byte little-endian layout
/// (`header: u16, yn1: i16, yn2: i16`), see [`AdpcmContext::from_le_bytes`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdpcmContext {
    /// Last frame header seen (predictor index and scale)
    pub header: u16,
    /// y[n-1]
    pub yn1: i16,
    /// y[n-2]
    pub yn2: i16,
}

impl AdpcmContext {
    /// Size of a serialized context in guest memory
    pub const SIZE: usize = 6;

    /// Parse a guest loop context
    pub fn from_le_bytes(bytes: [u8; Self::SIZE]) -> Self {
        Self {
            header: u16::from_le_bytes([bytes[0], bytes[1]]),
            yn1: i16::from_le_bytes([bytes[2], bytes[3]]),
            yn2: i16::from_le_bytes([bytes[4], bytes[5]]),
        }
    }

    /// Predictor index encoded in the current header
    #[inline]
    pub fn predictor(&self) -> usize {
        ((self.header >> 4) & 0xF) as usize
    }

    /// Scale shift encoded in the current header
    #[inline]
    pub fn scale(&self) -> u32 {
        (self.header & 0xF) as u32
    }
}

// =============================================================================
// Error Type
// =============================================================================

/// Errors that can occur during ADPCM decoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdpcmError {
    /// Wave data ends before the requested samples
    TruncatedData,
    /// Frame header selects a predictor outside the coefficient table
    InvalidPredictor(u8),
}

impl core::fmt::Display for AdpcmError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            AdpcmError::TruncatedData => write!(f, "truncated ADPCM data"),
            AdpcmError::InvalidPredictor(index) => {
                write!(f, "invalid ADPCM predictor index {} (must be 0-7)", index)
            }
        }
    }
}

impl std::error::Error for AdpcmError {}

// =============================================================================
// Helper Functions
// =============================================================================

/// Nibble address of sample `sample` within a wave buffer
#[inline]
pub fn sample_to_nibble(sample: usize) -> usize {
    (sample / SAMPLES_PER_FRAME) * NIBBLES_PER_FRAME + sample % SAMPLES_PER_FRAME + 2
}

/// Number of bytes a wave buffer needs to hold samples `[0, sample_count)`
pub fn bytes_for_samples(sample_count: usize) -> usize {
    let frames = sample_count.div_ceil(SAMPLES_PER_FRAME);
    frames * FRAME_LEN
}

/// Clamp value to 16-bit signed range
#[inline]
pub(crate) fn clamp_i16(v: i32) -> i32 {
    v.clamp(-32768, 32767)
}

// =============================================================================
// Tests
// =============================================================================
