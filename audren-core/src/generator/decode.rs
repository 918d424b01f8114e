//! Data source stage: wave buffers to one mix-rate channel buffer

use audren_adpcm::{AdpcmCoefficients, AdpcmContext, bytes_for_samples, decode_adpcm};
use tracing::warn;

use super::CommandGenerator;
use crate::common::{MAX_SAMPLE_HISTORY, SCALED_MIX_BUFFER_SIZE, SampleFormat, volume_to_q15};
use crate::memory::GuestMemoryExt;
use crate::resample::resample;
use crate::voice::{BehaviorFlags, ServerVoiceInfo, ServerWaveBuffer, VoiceParameter, VoiceState};

impl CommandGenerator {
    /// Decode and resample one voice channel into its scratch buffer.
    ///
    /// The buffer is left silent past the point where the voice runs out
    /// of wave buffers.
    pub(super) fn decode_from_wave_buffers(
        &mut self,
        info: &ServerVoiceInfo,
        state: &mut VoiceState,
        channel: usize,
    ) {
        let n = self.sample_count;
        let output_index = self.mix_buffer_count + channel;
        match self.buffers.get_mut(output_index) {
            Some(output) => output.fill(0),
            None => return,
        }

        let params = &info.params;
        let skip_src = params
            .behavior_flags
            .contains(BehaviorFlags::PITCH_AND_SRC_SKIPPED);
        let rate = (params.sample_rate as f32 / self.sample_rate as f32
            * volume_to_q15(params.pitch) as f32) as i32;
        let rate = rate.max(0);

        if state.fraction as i64 + n as i64 * rate as i64 > SCALED_MIX_BUFFER_SIZE - 4 {
            self.dropped_voice_frames += 1;
            warn!(
                "Voice {} pitch {} overflows the decode buffer, frame dropped",
                params.id, params.pitch
            );
            return;
        }

        let per_pass = match (SCALED_MIX_BUFFER_SIZE - state.fraction as i64) / rate.max(1) as i64 {
            max if max <= 0 || max >= n as i64 => n,
            max => max as usize,
        };

        let history_len = if skip_src { 0 } else { MAX_SAMPLE_HISTORY };
        let mut written = 0;
        while written < n {
            let to_output = (n - written).min(per_pass);
            let to_read = if skip_src {
                to_output
            } else {
                ((to_output as i64 * rate as i64 + state.fraction as i64) >> 15) as usize
            };
            if history_len + to_read + MAX_SAMPLE_HISTORY > self.sample_buffer.len() {
                self.dropped_voice_frames += 1;
                warn!("Voice {} decode pass of {} samples too large", params.id, to_read);
                return;
            }
            self.sample_buffer[..history_len].copy_from_slice(&state.sample_history[..history_len]);

            let (read, completed) = self.read_wave_buffers(info, state, channel, history_len, to_read);

            let Some(output) = self.buffers.get_mut(output_index) else {
                return;
            };
            let dst = &mut output[written..written + to_output];
            if skip_src {
                for (out, &sample) in dst.iter_mut().zip(&self.sample_buffer[..read]) {
                    *out = sample;
                }
            } else {
                self.sample_buffer[history_len + read..history_len + to_read].fill(0);
                resample(
                    dst,
                    &self.sample_buffer[..history_len + to_read],
                    rate,
                    &mut state.fraction,
                    to_output,
                );
                state
                    .sample_history
                    .copy_from_slice(&self.sample_buffer[to_read..to_read + MAX_SAMPLE_HISTORY]);
            }

            written += to_output;
            if completed {
                break;
            }
        }
    }

    /// Fill `sample_buffer[history_len..]` with up to `to_read` samples,
    /// walking the queued wave buffers.
    ///
    /// Returns the samples read and whether the voice ran dry.
    fn read_wave_buffers(
        &mut self,
        info: &ServerVoiceInfo,
        state: &mut VoiceState,
        channel: usize,
        history_len: usize,
        to_read: usize,
    ) -> (usize, bool) {
        let params = &info.params;
        let mut read = 0;

        while read < to_read {
            let slot = state.wave_buffer_index;
            if !state.wave_buffer_valid[slot] {
                return (read, true);
            }
            let wave_buffer = &info.wave_buffers[slot];
            let wanted = to_read - read;
            let dst_start = history_len + read;

            let decoded = match params.sample_format {
                SampleFormat::Pcm16 => self.decode_pcm16(
                    wave_buffer,
                    state,
                    channel,
                    info.channel_count(),
                    wanted,
                    dst_start,
                ),
                SampleFormat::Adpcm => {
                    self.decode_adpcm(params, wave_buffer, state, slot, wanted, dst_start)
                }
                SampleFormat::Invalid => 0,
            };

            read += decoded;
            state.offset += decoded as i32;
            state.played_sample_count += decoded as u64;

            if state.offset < wave_buffer.sample_length() && decoded != 0 {
                continue;
            }

            state.rewind();
            if wave_buffer.is_looping {
                if decoded == 0 {
                    return (read, true);
                }
                if params
                    .behavior_flags
                    .contains(BehaviorFlags::PLAYED_SAMPLE_COUNT_RESET_AT_LOOP_POINT)
                {
                    state.played_sample_count = 0;
                }
            } else {
                state.consume_wave_buffer(slot);
                if wave_buffer.end_of_stream {
                    state.played_sample_count = 0;
                }
                if decoded == 0 {
                    return (read, true);
                }
            }
        }

        (read, false)
    }

    /// De-interleave PCM16 samples of `channel`
    fn decode_pcm16(
        &mut self,
        wave_buffer: &ServerWaveBuffer,
        state: &VoiceState,
        channel: usize,
        channel_count: usize,
        wanted: usize,
        dst_start: usize,
    ) -> usize {
        if wave_buffer.buffer_address == 0
            || wave_buffer.buffer_size == 0
            || wave_buffer.end_sample_offset < wave_buffer.start_sample_offset
        {
            return 0;
        }
        let available = (wave_buffer.sample_length() - state.offset).max(0) as usize;
        let count = wanted.min(available);
        if count == 0 || channel >= channel_count {
            return 0;
        }

        let first = (wave_buffer.start_sample_offset + state.offset) as u64;
        let address = wave_buffer.buffer_address + first * channel_count as u64 * 2;
        self.pcm_scratch.resize(count * channel_count, 0);
        if let Err(e) = self.memory.read_i16s(address, &mut self.pcm_scratch) {
            warn!("Failed to read PCM16 wave buffer at {:#x}: {}", address, e);
            return 0;
        }

        let Some(dst) = self.sample_buffer.get_mut(dst_start..dst_start + count) else {
            return 0;
        };
        for (out, frame) in dst.iter_mut().zip(self.pcm_scratch.chunks_exact(channel_count)) {
            *out = frame[channel] as i32;
        }
        count
    }

    /// Copy ADPCM samples out of the voice's decoded wave buffer cache
    fn decode_adpcm(
        &mut self,
        params: &VoiceParameter,
        wave_buffer: &ServerWaveBuffer,
        state: &mut VoiceState,
        slot: usize,
        wanted: usize,
        dst_start: usize,
    ) -> usize {
        if wave_buffer.buffer_address == 0
            || wave_buffer.buffer_size == 0
            || wave_buffer.start_sample_offset < 0
            || wave_buffer.end_sample_offset <= wave_buffer.start_sample_offset
        {
            return 0;
        }
        if state.adpcm_cache_slot != Some(slot) {
            self.fill_adpcm_cache(params, wave_buffer, state);
            state.adpcm_cache_slot = Some(slot);
        }

        let cached = state
            .adpcm_cache
            .get(state.offset.max(0) as usize..)
            .unwrap_or(&[]);
        let count = wanted.min(cached.len());
        let Some(dst) = self.sample_buffer.get_mut(dst_start..dst_start + count) else {
            return 0;
        };
        for (out, &sample) in dst.iter_mut().zip(cached) {
            *out = sample as i32;
        }
        count
    }

    /// Decode a whole ADPCM wave buffer into the voice's cache.
    ///
    /// The cache stays empty when anything about the buffer is unreadable.
    fn fill_adpcm_cache(
        &self,
        params: &VoiceParameter,
        wave_buffer: &ServerWaveBuffer,
        state: &mut VoiceState,
    ) {
        state.adpcm_cache.clear();

        if params.additional_params_address == 0 {
            warn!("ADPCM voice {} has no coefficient table", params.id);
            return;
        }
        let mut coeffs: AdpcmCoefficients = [0; 16];
        if let Err(e) = self
            .memory
            .read_i16s(params.additional_params_address, &mut coeffs)
        {
            warn!("Failed to read ADPCM coefficients of voice {}: {}", params.id, e);
            return;
        }

        let mut context = state.context;
        if wave_buffer.context_address != 0 && wave_buffer.context_size >= AdpcmContext::SIZE as u64 {
            let mut bytes = [0u8; AdpcmContext::SIZE];
            match self.memory.read_block(wave_buffer.context_address, &mut bytes) {
                Ok(()) => context = AdpcmContext::from_le_bytes(bytes),
                Err(e) => warn!("Failed to read ADPCM loop context: {}", e),
            }
        }

        let start = wave_buffer.start_sample_offset as usize;
        let end = wave_buffer.end_sample_offset as usize;
        let len = bytes_for_samples(end).min(wave_buffer.buffer_size as usize);
        let mut data = vec![0u8; len];
        if let Err(e) = self.memory.read_block(wave_buffer.buffer_address, &mut data) {
            warn!(
                "Failed to read ADPCM wave buffer at {:#x}: {}",
                wave_buffer.buffer_address, e
            );
            return;
        }

        state.adpcm_cache.resize(end - start, 0);
        match decode_adpcm(&data, start, &coeffs, &mut context, &mut state.adpcm_cache) {
            Ok(decoded) => state.adpcm_cache.truncate(decoded),
            Err(e) => {
                warn!("ADPCM voice {}: {}", params.id, e);
                state.adpcm_cache.clear();
            }
        }
        state.context = context;
    }
}
