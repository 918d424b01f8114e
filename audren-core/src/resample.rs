//! Polyphase resampling
//!
//! Two resamplers share the same 4-tap Q15 coefficient tables:
//!
//! - [`resample`] converts one decoded voice channel to the mix rate. Its
//!   position is a Q15 fraction carried in the voice state.
//! - [`interpolate`] converts interleaved stereo PCM16 by a floating-point
//!   ratio, carrying its history in an [`InterpolationState`].
//!
//! Each table holds 128 phases of 4 taps. Taps weight the samples at
//! offsets -1, 0, +1 and +2 around the interpolation point, and every phase
//! sums to exactly `0x8000`, so DC passes through unchanged.

use std::sync::LazyLock;

use tracing::error;

/// Filter phases per table
pub const LUT_PHASES: usize = 128;
/// Taps per phase
pub const TAPS: usize = 4;

type Lut = [i32; LUT_PHASES * TAPS];

/// Smooth cubic B-spline, used when decimating
static LUT_DECIMATE: LazyLock<Lut> = LazyLock::new(|| build_lut(1.0, 0.0));
/// Catmull-Rom, used at or below unity pitch
static LUT_UPSAMPLE: LazyLock<Lut> = LazyLock::new(|| build_lut(0.0, 0.5));
/// Mitchell-Netravali, used for mild decimation
static LUT_MILD: LazyLock<Lut> = LazyLock::new(|| build_lut(1.0 / 3.0, 1.0 / 3.0));

/// Mitchell-Netravali family cubic kernel evaluated at distance `x`
fn bc_cubic(b: f64, c: f64, x: f64) -> f64 {
    let x = x.abs();
    if x < 1.0 {
        ((12.0 - 9.0 * b - 6.0 * c) * x * x * x + (-18.0 + 12.0 * b + 6.0 * c) * x * x
            + (6.0 - 2.0 * b))
            / 6.0
    } else if x < 2.0 {
        ((-b - 6.0 * c) * x * x * x
            + (6.0 * b + 30.0 * c) * x * x
            + (-12.0 * b - 48.0 * c) * x
            + (8.0 * b + 24.0 * c))
            / 6.0
    } else {
        0.0
    }
}

fn build_lut(b: f64, c: f64) -> Lut {
    let mut lut = [0i32; LUT_PHASES * TAPS];
    for phase in 0..LUT_PHASES {
        let t = phase as f64 / LUT_PHASES as f64;
        let row = &mut lut[phase * TAPS..(phase + 1) * TAPS];
        for (k, tap) in row.iter_mut().enumerate() {
            let distance = k as f64 - 1.0 - t;
            *tap = (bc_cubic(b, c, distance) * 32768.0).round() as i32;
        }

        // Fold rounding error into the dominant tap
        let error = 0x8000 - row.iter().sum::<i32>();
        let dominant = if t < 0.5 { 1 } else { 2 };
        row[dominant] += error;
    }
    lut
}

/// Coefficient table for a Q15 pitch
fn lut_for_pitch(pitch: i32) -> &'static Lut {
    if pitch > 0xaaaa {
        &LUT_DECIMATE
    } else if pitch <= 0x8000 {
        &LUT_UPSAMPLE
    } else {
        &LUT_MILD
    }
}

/// Resample `input` into `output[..sample_count]` at a Q15 `pitch`.
///
/// `input` starts with the 4 history samples. `fraction` is the Q15
/// sub-sample position and is left in `[0, 0x8000)`. Stops early rather
/// than reading past the end of `input`.
pub fn resample(output: &mut [i32], input: &[i32], pitch: i32, fraction: &mut i32, sample_count: usize) {
    let lut = lut_for_pitch(pitch);
    let mut index = 0usize;

    for out in output.iter_mut().take(sample_count) {
        let Some(window) = input.get(index..index + TAPS) else {
            break;
        };
        let lut_index = (*fraction >> 8) as usize * TAPS;
        let taps = &lut[lut_index..lut_index + TAPS];

        let sum: i64 = window
            .iter()
            .zip(taps)
            .map(|(&s, &l)| s as i64 * l as i64)
            .sum();
        *out = (sum >> 15) as i32;

        *fraction += pitch;
        index += (*fraction >> 15) as usize;
        *fraction &= 0x7fff;
    }
}

/// History carried by [`interpolate`] between calls
#[derive(Debug, Clone, Default)]
pub struct InterpolationState {
    /// Newest stereo frame first
    history: [[i16; 2]; TAPS],
    /// Output position relative to the newest input frame
    position: f64,
}

/// Resample interleaved stereo PCM16 by `ratio` (input rate / output rate).
///
/// A non-positive ratio is logged and treated as 1.0. Fewer than one
/// stereo frame of input produces no output.
pub fn interpolate(state: &mut InterpolationState, input: Vec<i16>, mut ratio: f64) -> Vec<i16> {
    if input.len() < 2 {
        return Vec::new();
    }
    if ratio <= 0.0 || ratio.is_nan() {
        error!("Nonsensical interpolation ratio {}", ratio);
        ratio = 1.0;
    }

    let step = (ratio * 32768.0) as i32;
    let lut = lut_for_pitch(step);
    let frames = input.len() / 2;
    let mut output = Vec::with_capacity((frames as f64 / ratio) as usize * 2 + TAPS * 2);

    for frame in input.chunks_exact(2) {
        state.history.rotate_right(1);
        state.history[0] = [frame[0], frame[1]];

        while state.position < 1.0 {
            let phase = ((state.position * LUT_PHASES as f64) as usize).min(LUT_PHASES - 1);
            let taps = &lut[phase * TAPS..(phase + 1) * TAPS];
            for channel in 0..2 {
                let sum: i32 = (0..TAPS)
                    .map(|k| state.history[TAPS - 1 - k][channel] as i32 * taps[k])
                    .sum();
                output.push((sum >> 15).clamp(i16::MIN as i32, i16::MAX as i32) as i16);
            }
            state.position += ratio;
        }
        state.position -= 1.0;
    }

    output
}

/// Resample between two sample rates, see [`interpolate`]
pub fn interpolate_rates(
    state: &mut InterpolationState,
    input: Vec<i16>,
    input_rate: u32,
    output_rate: u32,
) -> Vec<i16> {
    let ratio = if output_rate == 0 {
        0.0
    } else {
        input_rate as f64 / output_rate as f64
    };
    interpolate(state, input, ratio)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_luts_sum_to_unity() {
        for lut in [&*LUT_DECIMATE, &*LUT_UPSAMPLE, &*LUT_MILD] {
            for row in lut.chunks_exact(TAPS) {
                assert_eq!(row.iter().sum::<i32>(), 0x8000);
            }
        }
    }

    #[test]
    fn test_catmull_rom_hits_samples_at_phase_zero() {
        assert_eq!(&LUT_UPSAMPLE[..TAPS], &[0, 0x8000, 0, 0]);
    }

    #[test]
    fn test_lut_selection() {
        assert!(std::ptr::eq(lut_for_pitch(0x8000), &*LUT_UPSAMPLE));
        assert!(std::ptr::eq(lut_for_pitch(0x4000), &*LUT_UPSAMPLE));
        assert!(std::ptr::eq(lut_for_pitch(0x9000), &*LUT_MILD));
        assert!(std::ptr::eq(lut_for_pitch(0xaaaa), &*LUT_MILD));
        assert!(std::ptr::eq(lut_for_pitch(0xaaab), &*LUT_DECIMATE));
    }

    #[test]
    fn test_resample_dc_passes_through() {
        let input = vec![1000; 64];
        let mut output = vec![0; 40];
        let mut fraction = 0;
        resample(&mut output, &input, 0x6000, &mut fraction, 40);
        assert!(output.iter().all(|&s| s == 1000));
    }

    #[test]
    fn test_resample_unity_pitch_copies() {
        let input: Vec<i32> = (0..12).map(|i| i * 100).collect();
        let mut output = vec![0; 8];
        let mut fraction = 0;
        resample(&mut output, &input, 0x8000, &mut fraction, 8);
        let expected: Vec<i32> = (1..9).map(|i| i * 100).collect();
        assert_eq!(output, expected);
        assert_eq!(fraction, 0);
    }

    #[test]
    fn test_resample_fraction_carries() {
        let input = vec![0; 16];
        let mut output = vec![0; 3];
        let mut fraction = 0;
        resample(&mut output, &input, 0x4000, &mut fraction, 3);
        assert_eq!(fraction, 0x4000);
    }

    #[test]
    fn test_resample_stops_at_input_end() {
        let input = vec![7; 5];
        let mut output = vec![-1; 4];
        let mut fraction = 0;
        resample(&mut output, &input, 0x8000, &mut fraction, 4);
        assert_eq!(output, [7, 7, -1, -1]);
    }

    #[test]
    fn test_interpolate_clamps_bad_ratio() {
        let input: Vec<i16> = (0..32).collect();
        for ratio in [0.0, -2.0, f64::NAN] {
            let mut state = InterpolationState::default();
            let output = interpolate(&mut state, input.clone(), ratio);
            assert_eq!(output.len(), input.len());
        }
    }

    #[test]
    fn test_interpolate_ratio_changes_length() {
        let input = vec![500i16; 200];
        let mut state = InterpolationState::default();
        let half = interpolate(&mut state, input.clone(), 2.0);
        assert_eq!(half.len(), 100);

        let mut state = InterpolationState::default();
        let double = interpolate(&mut state, input, 0.5);
        assert_eq!(double.len(), 400);
    }

    #[test]
    fn test_interpolate_empty_input() {
        let mut state = InterpolationState::default();
        assert!(interpolate(&mut state, vec![1], 1.0).is_empty());
        assert!(interpolate_rates(&mut state, Vec::new(), 32000, 48000).is_empty());
    }

    #[test]
    fn test_interpolate_steady_state_dc() {
        let mut state = InterpolationState::default();
        let output = interpolate_rates(&mut state, vec![1200i16; 256], 32000, 48000);
        assert!(output[16..].iter().all(|&s| s == 1200));
    }
}
