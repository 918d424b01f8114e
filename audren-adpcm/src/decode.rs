//! ADPCM decoder implementation
//!
//! Decodes a run of samples out of a wave buffer's raw bytes. Decoding may
//! start mid-frame; in that case the frame header is taken from the context
//! rather than re-read, which is what the renderer relies on when a voice
//! resumes inside a frame on the next audio frame.

use crate::{
    AdpcmCoefficients, AdpcmContext, AdpcmError, COEFFICIENT_PAIRS, FRAME_LEN, SAMPLES_PER_FRAME,
    SIGNED_NIBBLES, clamp_i16,
};

/// Decode one residual through the predictor, advancing the history.
///
/// Intermediate math is done in 64 bits so extreme scale/coefficient
/// combinations saturate instead of wrapping.
#[inline]
pub fn decode_sample(nibble: i32, scale: u32, coef1: i32, coef2: i32, ctx: &mut AdpcmContext) -> i16 {
    let xn = (nibble as i64) << scale;
    let val =
        ((xn << 11) + 0x400 + coef1 as i64 * ctx.yn1 as i64 + coef2 as i64 * ctx.yn2 as i64) >> 11;
    let val = clamp_i16(val.clamp(i32::MIN as i64, i32::MAX as i64) as i32) as i16;
    ctx.yn2 = ctx.yn1;
    ctx.yn1 = val;
    val
}

fn coefficients(coeffs: &AdpcmCoefficients, header: u16) -> Result<(i32, i32), AdpcmError> {
    let index = ((header >> 4) & 0xF) as usize;
    if index >= COEFFICIENT_PAIRS {
        return Err(AdpcmError::InvalidPredictor(index as u8));
    }
    Ok((coeffs[index * 2] as i32, coeffs[index * 2 + 1] as i32))
}

/// Decode `output.len()` samples starting at sample `start_sample`.
///
/// # Arguments
/// * `data` - Raw wave buffer bytes, frame 0 at offset 0
/// * `start_sample` - First sample to decode, relative to `data`
/// * `coeffs` - Voice coefficient table
/// * `ctx` - Decoder context, updated with the final header and history
/// * `output` - Destination for decoded samples
///
/// # Returns
/// Number of samples decoded (always `output.len()` on success)
///
/// # Errors
/// `TruncatedData` if `data` is too short, `InvalidPredictor` if a frame
/// header selects a coefficient pair that does not exist. The context is
/// left at the last fully decoded sample on error.
pub fn decode_adpcm(
    data: &[u8],
    start_sample: usize,
    coeffs: &AdpcmCoefficients,
    ctx: &mut AdpcmContext,
    output: &mut [i16],
) -> Result<usize, AdpcmError> {
    if output.is_empty() {
        return Ok(0);
    }

    let (mut coef1, mut coef2) = coefficients(coeffs, ctx.header).unwrap_or((0, 0));

    for (i, out) in output.iter_mut().enumerate() {
        let sample = start_sample + i;
        let frame = sample / SAMPLES_PER_FRAME;
        let in_frame = sample % SAMPLES_PER_FRAME;
        let frame_base = frame * FRAME_LEN;

        if in_frame == 0 {
            let header = *data.get(frame_base).ok_or(AdpcmError::TruncatedData)?;
            ctx.header = header as u16;
            (coef1, coef2) = coefficients(coeffs, ctx.header)?;
        }

        let byte = *data
            .get(frame_base + 1 + in_frame / 2)
            .ok_or(AdpcmError::TruncatedData)?;
        let nibble = if in_frame & 1 == 0 { byte >> 4 } else { byte & 0xF };

        *out = decode_sample(
            SIGNED_NIBBLES[nibble as usize],
            ctx.scale(),
            coef1,
            coef2,
            ctx,
        );
    }

    Ok(output.len())
}
