//! Voices: per-source playback state
//!
//! The guest describes each voice with a [`VoiceParameter`] every update.
//! The server keeps a [`ServerVoiceInfo`] per voice, and the decode state
//! that must persist between frames lives in a [`VoiceState`] per channel
//! resource, so a stereo voice owns two of them.
//!
//! Play-state handling follows the guest request with one extra transient
//! state: stopping a playing voice passes through `RequestStop`, which
//! drops every queued wave buffer and resets the decode cursor.

use audren_adpcm::{AdpcmContext, bytes_for_samples};
use bitflags::bitflags;
use tracing::{debug, error};

use crate::behavior::BehaviorInfo;
use crate::common::{
    MAX_BIQUAD_FILTERS, MAX_CHANNEL_COUNT, MAX_MIX_BUFFERS, MAX_SAMPLE_HISTORY, MAX_WAVE_BUFFERS,
    NO_MIX, NO_SPLITTER, PlayState, SampleFormat,
};
use crate::error::{RendererError, Result};

#[cfg(test)]
mod tests;

/// One queued chunk of sample data, as sent by the guest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaveBuffer {
    pub buffer_address: u64,
    pub buffer_size: u64,
    pub start_sample_offset: i32,
    pub end_sample_offset: i32,
    pub is_looping: bool,
    pub end_of_stream: bool,
    /// Set by the guest once the server has seen this buffer
    pub sent_to_server: bool,
    /// ADPCM loop context
    pub context_address: u64,
    pub context_size: u64,
}

impl Default for WaveBuffer {
    /// An empty slot the server has nothing to pick up from
    fn default() -> Self {
        Self {
            buffer_address: 0,
            buffer_size: 0,
            start_sample_offset: 0,
            end_sample_offset: 0,
            is_looping: false,
            end_of_stream: false,
            sent_to_server: true,
            context_address: 0,
            context_size: 0,
        }
    }
}

/// Server copy of a wave buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerWaveBuffer {
    pub buffer_address: u64,
    pub buffer_size: u64,
    pub start_sample_offset: i32,
    pub end_sample_offset: i32,
    pub is_looping: bool,
    pub end_of_stream: bool,
    /// Already handed to the voice's decode state
    pub sent_to_dsp: bool,
    pub context_address: u64,
    pub context_size: u64,
}

impl Default for ServerWaveBuffer {
    fn default() -> Self {
        Self {
            buffer_address: 0,
            buffer_size: 0,
            start_sample_offset: 0,
            end_sample_offset: 0,
            is_looping: false,
            end_of_stream: false,
            sent_to_dsp: true,
            context_address: 0,
            context_size: 0,
        }
    }
}

impl ServerWaveBuffer {
    /// Samples between the start and end offsets
    pub fn sample_length(&self) -> i32 {
        self.end_sample_offset - self.start_sample_offset
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BiquadFilterParameter {
    pub enabled: bool,
    pub numerator: [i16; 3],
    pub denominator: [i16; 2],
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct BehaviorFlags: u8 {
        /// Looping resets the played sample count
        const PLAYED_SAMPLE_COUNT_RESET_AT_LOOP_POINT = 1 << 0;
        /// Copy decoded samples straight to the mix buffer
        const PITCH_AND_SRC_SKIPPED = 1 << 1;
    }
}

/// Guest update for one voice
#[derive(Debug, Clone)]
pub struct VoiceParameter {
    pub id: u32,
    pub node_id: i32,
    pub is_new: bool,
    pub in_use: bool,
    pub play_state: PlayState,
    pub sample_format: SampleFormat,
    pub sample_rate: u32,
    pub priority: i32,
    pub sorting_order: i32,
    pub channel_count: u32,
    pub pitch: f32,
    pub volume: f32,
    pub biquad_filters: [BiquadFilterParameter; MAX_BIQUAD_FILTERS],
    pub wave_buffer_count: u32,
    pub wave_buffer_head: u16,
    /// ADPCM coefficient table
    pub additional_params_address: u64,
    pub additional_params_size: u64,
    pub mix_id: i32,
    pub splitter_info_id: i32,
    pub wave_buffers: [WaveBuffer; MAX_WAVE_BUFFERS],
    pub voice_channel_resource_ids: [u32; MAX_CHANNEL_COUNT],
    pub flush_wave_buffer_count: u8,
    pub behavior_flags: BehaviorFlags,
}

impl Default for VoiceParameter {
    fn default() -> Self {
        Self {
            id: 0,
            node_id: 0,
            is_new: false,
            in_use: false,
            play_state: PlayState::Stopped,
            sample_format: SampleFormat::Pcm16,
            sample_rate: 48_000,
            priority: 0,
            sorting_order: 0,
            channel_count: 1,
            pitch: 1.0,
            volume: 1.0,
            biquad_filters: Default::default(),
            wave_buffer_count: 0,
            wave_buffer_head: 0,
            additional_params_address: 0,
            additional_params_size: 0,
            mix_id: NO_MIX,
            splitter_info_id: NO_SPLITTER,
            wave_buffers: Default::default(),
            voice_channel_resource_ids: [0; MAX_CHANNEL_COUNT],
            flush_wave_buffer_count: 0,
            behavior_flags: BehaviorFlags::empty(),
        }
    }
}

/// Guest update for one channel resource
#[derive(Debug, Clone)]
pub struct VoiceChannelResourceParameter {
    pub id: u32,
    pub mix_volume: [f32; MAX_MIX_BUFFERS],
    pub in_use: bool,
}

/// Per-channel mix volumes of a voice routed straight to a mix
#[derive(Debug, Clone)]
pub struct VoiceChannelResource {
    id: u32,
    in_use: bool,
    mix_volume: [f32; MAX_MIX_BUFFERS],
    last_mix_volume: [f32; MAX_MIX_BUFFERS],
}

impl VoiceChannelResource {
    fn new(id: u32) -> Self {
        Self {
            id,
            in_use: false,
            mix_volume: [0.0; MAX_MIX_BUFFERS],
            last_mix_volume: [0.0; MAX_MIX_BUFFERS],
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn in_use(&self) -> bool {
        self.in_use
    }

    pub fn mix_volume(&self) -> &[f32; MAX_MIX_BUFFERS] {
        &self.mix_volume
    }

    pub fn last_mix_volume(&self) -> &[f32; MAX_MIX_BUFFERS] {
        &self.last_mix_volume
    }

    pub fn update(&mut self, param: &VoiceChannelResourceParameter) {
        self.in_use = param.in_use;
        if param.in_use {
            self.mix_volume = param.mix_volume;
        }
    }

    pub fn update_last_mix_volumes(&mut self) {
        self.last_mix_volume = self.mix_volume;
    }
}

/// Decode state of one voice channel, persistent across frames
#[derive(Debug, Clone, Default)]
pub struct VoiceState {
    pub played_sample_count: u64,
    /// Samples consumed from the current wave buffer
    pub offset: i32,
    pub wave_buffer_index: usize,
    pub wave_buffer_valid: [bool; MAX_WAVE_BUFFERS],
    pub wave_buffer_consumed: u32,
    /// Last input samples of the previous resample pass, oldest first
    pub sample_history: [i32; MAX_SAMPLE_HISTORY],
    /// Q15 resampler position
    pub fraction: i32,
    pub context: AdpcmContext,
    pub biquad_filter_state: [[i64; 2]; MAX_BIQUAD_FILTERS],
    /// Last scaled sample per destination buffer, fed to depop
    pub previous_samples: [i32; MAX_MIX_BUFFERS],
    /// Decoded ADPCM for the wave buffer in `adpcm_cache_slot`
    pub(crate) adpcm_cache: Vec<i16>,
    pub(crate) adpcm_cache_slot: Option<usize>,
}

impl VoiceState {
    pub fn has_valid_wave_buffer(&self) -> bool {
        self.wave_buffer_valid.iter().any(|&v| v)
    }

    /// Rewind to the start of a wave buffer
    pub(crate) fn rewind(&mut self) {
        self.offset = 0;
        self.adpcm_cache_slot = None;
    }

    /// Retire the current wave buffer and move to the next slot
    pub(crate) fn consume_wave_buffer(&mut self, slot: usize) {
        self.wave_buffer_valid[slot] = false;
        self.wave_buffer_consumed += 1;
        self.wave_buffer_index = (self.wave_buffer_index + 1) % MAX_WAVE_BUFFERS;
    }
}

/// Server-side play state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServerPlayState {
    Play,
    #[default]
    Stop,
    RequestStop,
    Paused,
}

/// Status returned to the guest after each update
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VoiceOutStatus {
    pub played_sample_count: u64,
    pub wave_buffer_consumed: u32,
    pub voice_dropped: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ServerVoiceInfo {
    pub params: VoiceParameter,
    pub wave_buffers: [ServerWaveBuffer; MAX_WAVE_BUFFERS],
    pub current_play_state: ServerPlayState,
    pub last_play_state: ServerPlayState,
    pub last_volume: f32,
    pub should_depop: bool,
    pub was_biquad_filter_enabled: [bool; MAX_BIQUAD_FILTERS],
    pub voice_dropped: bool,
    is_new: bool,
    flush_wave_buffer_count: u8,
}

impl ServerVoiceInfo {
    pub fn in_use(&self) -> bool {
        self.params.in_use
    }

    pub fn should_skip(&self) -> bool {
        !self.params.in_use
    }

    pub fn has_mix_route(&self) -> bool {
        self.params.mix_id != NO_MIX
    }

    pub fn has_splitter_route(&self) -> bool {
        self.params.splitter_info_id != NO_SPLITTER
    }

    pub fn channel_count(&self) -> usize {
        (self.params.channel_count as usize).min(MAX_CHANNEL_COUNT)
    }

    /// Channel resource ids in channel order
    pub fn channel_resource_ids(&self) -> &[u32] {
        &self.params.voice_channel_resource_ids[..self.channel_count()]
    }

    /// Take a guest update, filtering features the negotiated revision lacks
    pub fn update_parameters(&mut self, param: &VoiceParameter, behavior: &BehaviorInfo) {
        self.last_play_state = self.current_play_state;
        match param.play_state {
            PlayState::Paused => self.current_play_state = ServerPlayState::Paused,
            PlayState::Stopped => {
                if self.current_play_state != ServerPlayState::Stop {
                    self.current_play_state = ServerPlayState::RequestStop;
                }
            }
            PlayState::Started => self.current_play_state = ServerPlayState::Play,
        }

        let flush = param.flush_wave_buffer_count;
        self.params = param.clone();

        if behavior.is_flush_voice_wave_buffers_supported() {
            self.flush_wave_buffer_count = self.flush_wave_buffer_count.saturating_add(flush);
        }
        if !behavior.is_splitter_supported() {
            self.params.splitter_info_id = NO_SPLITTER;
        }
        if !behavior.is_voice_played_sample_count_reset_at_loop_point_supported() {
            self.params
                .behavior_flags
                .remove(BehaviorFlags::PLAYED_SAMPLE_COUNT_RESET_AT_LOOP_POINT);
        }
        if !behavior.is_voice_pitch_and_src_skipped_supported() {
            self.params
                .behavior_flags
                .remove(BehaviorFlags::PITCH_AND_SRC_SKIPPED);
        }
        if param.is_new {
            self.is_new = true;
        }
    }

    /// Pick up newly queued wave buffers
    pub fn update_wave_buffers(&mut self, param: &VoiceParameter, states: &mut [VoiceState]) {
        if param.is_new {
            self.wave_buffers = Default::default();
            for &id in self.channel_resource_ids() {
                if let Some(state) = states.get_mut(id as usize) {
                    state.wave_buffer_valid = [false; MAX_WAVE_BUFFERS];
                }
            }
        }

        let valid = self
            .channel_resource_ids()
            .first()
            .and_then(|&id| states.get(id as usize))
            .map(|state| state.wave_buffer_valid)
            .unwrap_or_default();

        for (slot, (wave_buffer, is_valid)) in param.wave_buffers.iter().zip(valid).enumerate() {
            self.update_wave_buffer(slot, wave_buffer, is_valid);
        }
    }

    fn update_wave_buffer(&mut self, slot: usize, in_buffer: &WaveBuffer, is_valid: bool) {
        let format = self.params.sample_format;
        let out = &mut self.wave_buffers[slot];

        if !is_valid && out.sent_to_dsp {
            out.buffer_address = 0;
            out.buffer_size = 0;
        }
        if in_buffer.sent_to_server {
            return;
        }

        let start = in_buffer.start_sample_offset;
        let end = in_buffer.end_sample_offset;
        let byte_range = match format {
            SampleFormat::Pcm16 => {
                let channels = self.params.channel_count.max(1) as i64;
                Some((start as i64 * 2 * channels, end as i64 * 2 * channels))
            }
            SampleFormat::Adpcm if start >= 0 && end >= 0 => Some((
                bytes_for_samples(start as usize) as i64,
                bytes_for_samples(end as usize) as i64,
            )),
            _ => None,
        };
        let size = in_buffer.buffer_size as i64;
        match byte_range {
            Some((s, e)) if s >= 0 && e >= 0 && s <= size && e <= size => {}
            _ => {
                error!(
                    "Wave buffer {} of voice {} has invalid offsets {}..{} for size {:#x}",
                    slot, self.params.id, start, end, in_buffer.buffer_size
                );
                return;
            }
        }

        *out = ServerWaveBuffer {
            buffer_address: in_buffer.buffer_address,
            buffer_size: in_buffer.buffer_size,
            start_sample_offset: start,
            end_sample_offset: end,
            is_looping: in_buffer.is_looping,
            end_of_stream: in_buffer.end_of_stream,
            sent_to_dsp: false,
            context_address: in_buffer.context_address,
            context_size: in_buffer.context_size,
        };
    }

    /// Bring the voice up to date before its commands are generated.
    ///
    /// Returns whether the voice produces anything this frame.
    pub fn update_for_command_generation(
        &mut self,
        states: &mut [VoiceState],
        resources: &mut [VoiceChannelResource],
    ) -> bool {
        if self.is_new {
            self.reset_resources(states, resources);
            self.last_volume = self.params.volume;
            self.is_new = false;
        }
        self.update_parameters_for_command_generation(states)
    }

    fn reset_resources(&self, states: &mut [VoiceState], resources: &mut [VoiceChannelResource]) {
        for &id in self.channel_resource_ids() {
            if let Some(state) = states.get_mut(id as usize) {
                *state = VoiceState::default();
            }
            if let Some(resource) = resources.get_mut(id as usize) {
                resource.update_last_mix_volumes();
            }
        }
    }

    fn for_each_state(&self, states: &mut [VoiceState], mut f: impl FnMut(&mut VoiceState)) {
        for &id in self.channel_resource_ids() {
            if let Some(state) = states.get_mut(id as usize) {
                f(state);
            }
        }
    }

    fn update_parameters_for_command_generation(&mut self, states: &mut [VoiceState]) -> bool {
        if self.flush_wave_buffer_count > 0 {
            self.flush_wave_buffers(self.flush_wave_buffer_count, states);
            self.flush_wave_buffer_count = 0;
        }

        match self.current_play_state {
            ServerPlayState::Play => {
                for slot in 0..MAX_WAVE_BUFFERS {
                    if !self.wave_buffers[slot].sent_to_dsp {
                        self.for_each_state(states, |state| state.wave_buffer_valid[slot] = true);
                        self.wave_buffers[slot].sent_to_dsp = true;
                    }
                }
                self.should_depop = false;
                self.channel_resource_ids()
                    .first()
                    .and_then(|&id| states.get(id as usize))
                    .is_some_and(VoiceState::has_valid_wave_buffer)
            }
            ServerPlayState::Paused | ServerPlayState::Stop => {
                self.should_depop = self.last_play_state == ServerPlayState::Play;
                self.should_depop
            }
            ServerPlayState::RequestStop => {
                for slot in 0..MAX_WAVE_BUFFERS {
                    self.wave_buffers[slot].sent_to_dsp = true;
                    self.for_each_state(states, |state| {
                        if state.wave_buffer_valid[slot] {
                            state.consume_wave_buffer(slot);
                        }
                    });
                }
                self.for_each_state(states, |state| {
                    state.rewind();
                    state.played_sample_count = 0;
                    state.fraction = 0;
                    state.sample_history = [0; MAX_SAMPLE_HISTORY];
                    state.context = AdpcmContext::default();
                });
                debug!("Voice {} stopped", self.params.id);
                self.current_play_state = ServerPlayState::Stop;
                self.should_depop = self.last_play_state == ServerPlayState::Play;
                self.should_depop
            }
        }
    }

    /// Drop `count` wave buffers starting at the guest's head slot
    fn flush_wave_buffers(&mut self, count: u8, states: &mut [VoiceState]) {
        let mut head = self.params.wave_buffer_head as usize % MAX_WAVE_BUFFERS;
        for _ in 0..count {
            self.wave_buffers[head].sent_to_dsp = true;
            self.for_each_state(states, |state| {
                if state.wave_buffer_index == head {
                    state.rewind();
                }
                state.consume_wave_buffer(head);
            });
            head = (head + 1) % MAX_WAVE_BUFFERS;
        }
    }

    pub fn out_status(&self, states: &[VoiceState]) -> VoiceOutStatus {
        let state = self
            .channel_resource_ids()
            .first()
            .and_then(|&id| states.get(id as usize));
        match state {
            Some(state) if self.in_use() => VoiceOutStatus {
                played_sample_count: state.played_sample_count,
                wave_buffer_consumed: state.wave_buffer_consumed,
                voice_dropped: self.voice_dropped,
            },
            _ => VoiceOutStatus::default(),
        }
    }
}

/// All voices of one renderer
#[derive(Debug, Default)]
pub struct VoiceContext {
    pub(crate) infos: Vec<ServerVoiceInfo>,
    pub(crate) resources: Vec<VoiceChannelResource>,
    pub(crate) states: Vec<VoiceState>,
    sorted: Vec<usize>,
}

impl VoiceContext {
    pub fn new(count: usize) -> Self {
        Self {
            infos: vec![ServerVoiceInfo::default(); count],
            resources: (0..count as u32).map(VoiceChannelResource::new).collect(),
            states: vec![VoiceState::default(); count],
            sorted: (0..count).collect(),
        }
    }

    pub fn count(&self) -> usize {
        self.infos.len()
    }

    pub fn info(&self, index: usize) -> Option<&ServerVoiceInfo> {
        self.infos.get(index)
    }

    pub fn info_mut(&mut self, index: usize) -> Option<&mut ServerVoiceInfo> {
        self.infos.get_mut(index)
    }

    pub fn state(&self, resource_id: usize) -> Option<&VoiceState> {
        self.states.get(resource_id)
    }

    pub fn state_mut(&mut self, resource_id: usize) -> Option<&mut VoiceState> {
        self.states.get_mut(resource_id)
    }

    pub fn channel_resource(&self, resource_id: usize) -> Option<&VoiceChannelResource> {
        self.resources.get(resource_id)
    }

    /// Voice index at position `index` of the processing order
    pub fn sorted_index(&self, index: usize) -> Option<usize> {
        self.sorted.get(index).copied()
    }

    pub fn update_channel_resource(&mut self, param: &VoiceChannelResourceParameter) -> Result<()> {
        let max = self.resources.len();
        let resource = self
            .resources
            .get_mut(param.id as usize)
            .ok_or(RendererError::OutOfRange {
                what: "voice channel resource",
                index: param.id as usize,
                max,
            })?;
        resource.update(param);
        Ok(())
    }

    pub fn update_voice(
        &mut self,
        index: usize,
        param: &VoiceParameter,
        behavior: &BehaviorInfo,
    ) -> Result<()> {
        let max = self.infos.len();
        if index >= max {
            return Err(RendererError::OutOfRange {
                what: "voice",
                index,
                max,
            });
        }
        if param.in_use {
            let channels = param.channel_count as usize;
            if channels == 0 || channels > MAX_CHANNEL_COUNT {
                return Err(RendererError::OutOfRange {
                    what: "voice channel count",
                    index: channels,
                    max: MAX_CHANNEL_COUNT,
                });
            }
            let resources = self.resources.len();
            if let Some(&id) = param.voice_channel_resource_ids[..channels]
                .iter()
                .find(|&&id| id as usize >= resources)
            {
                return Err(RendererError::OutOfRange {
                    what: "voice channel resource",
                    index: id as usize,
                    max: resources,
                });
            }
        }

        let info = &mut self.infos[index];
        info.update_parameters(param, behavior);
        info.update_wave_buffers(param, &mut self.states);
        Ok(())
    }

    /// Order voices by priority, then sorting order, then id
    pub fn sort_info(&mut self) {
        let infos = &self.infos;
        self.sorted = (0..infos.len()).collect();
        self.sorted.sort_by_key(|&i| {
            let params = &infos[i].params;
            (params.priority, params.sorting_order, params.id)
        });
    }

    pub fn out_status(&self, index: usize) -> VoiceOutStatus {
        self.infos
            .get(index)
            .map(|info| info.out_status(&self.states))
            .unwrap_or_default()
    }
}
