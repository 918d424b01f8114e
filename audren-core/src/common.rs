//! Renderer-wide constants and small shared enums

use serde::{Deserialize, Serialize};

/// Wave buffers queued per voice
pub const MAX_WAVE_BUFFERS: usize = 4;
/// Channels per voice and per device
pub const MAX_CHANNEL_COUNT: usize = 6;
/// Mix buffers a single mix may own
pub const MAX_MIX_BUFFERS: usize = 24;
/// Biquad filters per voice
pub const MAX_BIQUAD_FILTERS: usize = 2;
/// Resampler history carried between frames
pub const MAX_SAMPLE_HISTORY: usize = 4;
/// Concurrent renderer sessions sharing one ADSP
pub const MAX_RENDERER_SESSIONS: usize = 2;

/// Voice or mix has no destination mix
pub const NO_MIX: i32 = 0x7fff_ffff;
/// Voice or mix has no destination splitter
pub const NO_SPLITTER: i32 = -1;
/// Terminates a mix's effect order list
pub const NO_EFFECT_ORDER: i32 = -1;
/// Id of the final mix
pub const FINAL_MIX: i32 = 0;

/// Samples of scratch space for one voice channel's decode pass
pub const MIX_BUFFER_SIZE: usize = 0x3f00;
/// `MIX_BUFFER_SIZE` in Q15 resampler units
pub const SCALED_MIX_BUFFER_SIZE: i64 = (MIX_BUFFER_SIZE as i64) << 15;

/// Unity gain in Q15
pub const Q15_ONE: i32 = 0x8000;

/// Output device channel layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum Channel {
    FrontLeft = 0,
    FrontRight = 1,
    Center = 2,
    Lfe = 3,
    BackLeft = 4,
    BackRight = 5,
}

/// Wave buffer encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum SampleFormat {
    Invalid = 0,
    #[default]
    Pcm16 = 2,
    Adpcm = 6,
}

impl SampleFormat {
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            2 => Self::Pcm16,
            6 => Self::Adpcm,
            _ => Self::Invalid,
        }
    }
}

/// Guest-requested play state of a voice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PlayState {
    Started,
    #[default]
    Stopped,
    Paused,
}

/// Convert a float volume to Q15, truncating toward zero
#[inline]
pub fn volume_to_q15(volume: f32) -> i32 {
    (volume * 32768.0) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_format_from_raw() {
        assert_eq!(SampleFormat::from_raw(2), SampleFormat::Pcm16);
        assert_eq!(SampleFormat::from_raw(6), SampleFormat::Adpcm);
        assert_eq!(SampleFormat::from_raw(1), SampleFormat::Invalid);
    }

    #[test]
    fn test_volume_to_q15() {
        assert_eq!(volume_to_q15(1.0), Q15_ONE);
        assert_eq!(volume_to_q15(0.5), 0x4000);
        assert_eq!(volume_to_q15(0.0), 0);
    }
}
