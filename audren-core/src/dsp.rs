//! Fixed-point mixing kernels
//!
//! Samples are i32 in the mix domain, gains are Q15 (`0x8000` is unity).
//! Every kernel operates on the first `sample_count` samples of its slices.
//! Mix kernels accumulate into the output; gain kernels overwrite it.
//! Accumulation wraps on overflow like the hardware does.

use crate::common::Q15_ONE;

/// Depop decay factor for a mix running at `sample_rate`
pub fn depop_decay(sample_rate: u32) -> i32 {
    if sample_rate == 48_000 { 0x7B29 } else { 0x78CB }
}

#[inline(always)]
fn scale_q15(sample: i32, gain: i32) -> i32 {
    ((sample as i64 * gain as i64 + 0x4000) >> 15) as i32
}

/// `output[i] += (input[i] * gain + 0x4000) >> 15`, unrolled by `N`
pub fn apply_mix<const N: usize>(output: &mut [i32], input: &[i32], gain: i32, sample_count: usize) {
    let output = &mut output[..sample_count];
    let input = &input[..sample_count];

    let mut out_chunks = output.chunks_exact_mut(N);
    let mut in_chunks = input.chunks_exact(N);
    for (out, inp) in (&mut out_chunks).zip(&mut in_chunks) {
        for j in 0..N {
            out[j] = out[j].wrapping_add(scale_q15(inp[j], gain));
        }
    }
    for (out, &inp) in out_chunks
        .into_remainder()
        .iter_mut()
        .zip(in_chunks.remainder())
    {
        *out = out.wrapping_add(scale_q15(inp, gain));
    }
}

/// Static-gain mix with the unroll factor picked from `sample_count`
pub fn mix_unrolled(output: &mut [i32], input: &[i32], gain: i32, sample_count: usize) {
    if sample_count % 4 == 0 {
        apply_mix::<4>(output, input, gain, sample_count);
    } else if sample_count % 2 == 0 {
        apply_mix::<2>(output, input, gain, sample_count);
    } else {
        apply_mix::<1>(output, input, gain, sample_count);
    }
}

/// Accumulate `input` scaled by a linearly ramping float gain.
///
/// Returns the last scaled sample, which the caller keeps for depop.
pub fn apply_mix_ramp(
    output: &mut [i32],
    input: &[i32],
    mut gain: f32,
    delta: f32,
    sample_count: usize,
) -> i32 {
    let mut x = 0;
    for (out, &inp) in output[..sample_count].iter_mut().zip(&input[..sample_count]) {
        x = (inp as f32 * gain) as i32;
        *out = out.wrapping_add(x);
        gain += delta;
    }
    x
}

/// Per-sample Q15 gain step from `start` to `end` over `sample_count` samples.
///
/// Computed in float so extreme guest volumes saturate instead of overflowing.
pub fn ramp_delta(start: i32, end: i32, sample_count: usize) -> i32 {
    ((end as f32 - start as f32) / sample_count.max(1) as f32) as i32
}

/// `output[i] = (input[i] * gain + 0x4000) >> 15` with `gain += delta` per sample
pub fn apply_gain(output: &mut [i32], input: &[i32], mut gain: i32, delta: i32, sample_count: usize) {
    for (out, &inp) in output[..sample_count].iter_mut().zip(&input[..sample_count]) {
        *out = scale_q15(inp, gain);
        gain = gain.wrapping_add(delta);
    }
}

/// `output[i] = (input[i] * gain + 0x4000) >> 15`
pub fn apply_gain_without_delta(output: &mut [i32], input: &[i32], gain: i32, sample_count: usize) {
    for (out, &inp) in output[..sample_count].iter_mut().zip(&input[..sample_count]) {
        *out = scale_q15(inp, gain);
    }
}

/// Decay a depop residue into `output`.
///
/// The magnitude of `first_sample` is multiplied by `delta` (Q15) once per
/// sample and accumulated with the residue's sign. Returns the signed
/// residue left after the frame.
pub fn apply_mix_depop(output: &mut [i32], first_sample: i32, delta: i32, sample_count: usize) -> i32 {
    let positive = first_sample > 0;
    let mut magnitude = (first_sample as i64).abs().min(i32::MAX as i64);
    // A decay above unity would grow the residue without bound
    let delta = delta.clamp(0, Q15_ONE) as i64;
    for out in &mut output[..sample_count] {
        magnitude = (magnitude * delta) >> 15;
        let value = magnitude as i32;
        *out = if positive {
            out.wrapping_add(value)
        } else {
            out.wrapping_sub(value)
        };
    }
    if positive {
        magnitude as i32
    } else {
        -(magnitude as i32)
    }
}

/// Direct-form biquad in 64-bit fixed point.
///
/// The output is clamped to i32 before it is fed back into the state.
pub fn apply_biquad_filter(
    output: &mut [i32],
    input: &[i32],
    numerator: [i16; 3],
    denominator: [i16; 2],
    state: &mut [i64; 2],
    sample_count: usize,
) {
    let [n0, n1, n2] = numerator.map(i64::from);
    let [d0, d1] = denominator.map(i64::from);
    let [mut s0, mut s1] = *state;

    for (out, &inp) in output[..sample_count].iter_mut().zip(&input[..sample_count]) {
        let x = inp as i64;
        let f = (x * n0 + s0 + 0x4000) >> 15;
        let y = f.clamp(i32::MIN as i64, i32::MAX as i64);
        s0 = x * n1 + y * d0 + s1;
        s1 = x * n2 + y * d1;
        *out = y as i32;
    }

    *state = [s0, s1];
}

/// Contiguous mix buffers of `sample_count` samples each.
///
/// Indices come from guest data, so every accessor is bounds-checked and
/// reports a bad index instead of panicking.
#[derive(Debug, Default)]
pub struct MixBufferStore {
    samples: Vec<i32>,
    scratch: Vec<i32>,
    buffer_count: usize,
    sample_count: usize,
}

impl MixBufferStore {
    pub fn new(buffer_count: usize, sample_count: usize) -> Self {
        Self {
            samples: vec![0; buffer_count * sample_count],
            scratch: vec![0; sample_count],
            buffer_count,
            sample_count,
        }
    }

    /// Reshape, reusing the allocation when possible. Contents are zeroed.
    pub fn resize(&mut self, buffer_count: usize, sample_count: usize) {
        self.samples.clear();
        self.samples.resize(buffer_count * sample_count, 0);
        self.scratch.resize(sample_count, 0);
        self.buffer_count = buffer_count;
        self.sample_count = sample_count;
    }

    pub fn buffer_count(&self) -> usize {
        self.buffer_count
    }

    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    /// Zero every buffer
    pub fn clear(&mut self) {
        self.samples.fill(0);
    }

    pub fn get(&self, index: usize) -> Option<&[i32]> {
        if index >= self.buffer_count {
            return None;
        }
        let start = index * self.sample_count;
        Some(&self.samples[start..start + self.sample_count])
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut [i32]> {
        if index >= self.buffer_count {
            return None;
        }
        let start = index * self.sample_count;
        Some(&mut self.samples[start..start + self.sample_count])
    }

    /// Run `f(input, output)` over two buffers.
    ///
    /// When `input == output` the kernel reads a snapshot of the buffer, so
    /// in-place gain and filter kernels see the unmodified samples. Returns
    /// false if either index is out of range.
    pub fn with_pair<F>(&mut self, input: usize, output: usize, f: F) -> bool
    where
        F: FnOnce(&[i32], &mut [i32]),
    {
        if input >= self.buffer_count || output >= self.buffer_count {
            return false;
        }
        let n = self.sample_count;

        if input == output {
            let start = input * n;
            self.scratch.copy_from_slice(&self.samples[start..start + n]);
            f(&self.scratch, &mut self.samples[start..start + n]);
        } else if input < output {
            let (head, tail) = self.samples.split_at_mut(output * n);
            f(&head[input * n..(input + 1) * n], &mut tail[..n]);
        } else {
            let (head, tail) = self.samples.split_at_mut(input * n);
            f(&tail[..n], &mut head[output * n..(output + 1) * n]);
        }
        true
    }
}
