//! Command generation: turns the render graph into one frame of audio
//!
//! Each frame walks voices, then sub-mixes farthest from the final mix
//! first, then the final mix. Every step runs its kernel immediately
//! against the generator's own mix buffers and appends a
//! [`GeneratedCommand`] to the frame trace, so the finished frame can be
//! inspected (and dumped) command by command.
//!
//! Buffer layout: indices `0..mix_buffer_count` are mix buffers, handed
//! out to mixes by [`MixContext::sort`]. The `MAX_CHANNEL_COUNT` buffers
//! after them are scratch for the voice channel being generated.

mod decode;

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::common::{
    FINAL_MIX, MAX_BIQUAD_FILTERS, MAX_CHANNEL_COUNT, MAX_MIX_BUFFERS, MAX_SAMPLE_HISTORY,
    MIX_BUFFER_SIZE, NO_EFFECT_ORDER, NO_MIX, NO_SPLITTER, Q15_ONE, SampleFormat, volume_to_q15,
};
use crate::dsp::{
    MixBufferStore, apply_biquad_filter, apply_gain, apply_gain_without_delta, apply_mix,
    apply_mix_depop, apply_mix_ramp, depop_decay, mix_unrolled, ramp_delta,
};
use crate::effect::{
    AuxParameter, BiquadFilterEffectParameter, ChannelRouting, EffectContext, EffectInfo,
    EffectKind, read_aux_buffer, reset_aux_info, write_aux_buffer,
};
use crate::memory::GuestMemory;
use crate::mix::{MixContext, ServerMixInfo};
use crate::splitter::SplitterContext;
use crate::voice::{ServerVoiceInfo, VoiceChannelResource, VoiceContext, VoiceState};

/// Log target for per-frame command dumps
pub const DSP_TRACE_TARGET: &str = "audren::dsp_trace";

/// Everything command generation walks
#[derive(Debug, Default)]
pub struct RenderGraph {
    pub voices: VoiceContext,
    pub mixes: MixContext,
    pub splitters: SplitterContext,
    pub effects: EffectContext,
}

/// One step of a generated frame
#[derive(Debug, Clone, PartialEq)]
pub enum GeneratedCommand {
    ClearMixBuffers,
    DataSource {
        node_id: i32,
        format: SampleFormat,
        channel: usize,
        output: usize,
    },
    DepopPrepare {
        node_id: i32,
        buffer_offset: usize,
        buffer_count: usize,
    },
    DepopForMixBuffers {
        node_id: i32,
        buffer_offset: usize,
        buffer_count: usize,
        decay: i32,
    },
    BiquadFilter {
        node_id: i32,
        buffer: usize,
        needs_init: bool,
    },
    VolumeRamp {
        node_id: i32,
        buffer: usize,
        last_volume: f32,
        volume: f32,
    },
    VoiceMix {
        node_id: i32,
        input: usize,
        buffer_offset: usize,
        buffer_count: usize,
    },
    Mix {
        node_id: i32,
        input: usize,
        output: usize,
        volume: f32,
    },
    Aux {
        node_id: i32,
        input: usize,
        output: usize,
        enabled: bool,
    },
    EffectBiquadFilter {
        node_id: i32,
        input: usize,
        output: usize,
    },
    I3dl2Reverb {
        node_id: i32,
        input: usize,
        output: usize,
    },
    FinalMixGain {
        node_id: i32,
        buffer: usize,
        volume: f32,
    },
}

impl GeneratedCommand {
    /// Node the command was generated for, if any
    pub fn node_id(&self) -> Option<i32> {
        match *self {
            Self::ClearMixBuffers => None,
            Self::DataSource { node_id, .. }
            | Self::DepopPrepare { node_id, .. }
            | Self::DepopForMixBuffers { node_id, .. }
            | Self::BiquadFilter { node_id, .. }
            | Self::VolumeRamp { node_id, .. }
            | Self::VoiceMix { node_id, .. }
            | Self::Mix { node_id, .. }
            | Self::Aux { node_id, .. }
            | Self::EffectBiquadFilter { node_id, .. }
            | Self::I3dl2Reverb { node_id, .. }
            | Self::FinalMixGain { node_id, .. } => Some(node_id),
        }
    }
}

impl fmt::Display for GeneratedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClearMixBuffers => write!(f, "ClearMixBuffers"),
            Self::DataSource {
                node_id,
                format,
                channel,
                output,
            } => write!(
                f,
                "DataSource node {:#x} {:?} channel {} -> b[{}]",
                node_id, format, channel, output
            ),
            Self::DepopPrepare {
                node_id,
                buffer_offset,
                buffer_count,
            } => write!(
                f,
                "DepopPrepare node {:#x} b[{}..{}]",
                node_id,
                buffer_offset,
                buffer_offset + buffer_count
            ),
            Self::DepopForMixBuffers {
                node_id,
                buffer_offset,
                buffer_count,
                decay,
            } => write!(
                f,
                "DepopForMixBuffers node {:#x} b[{}..{}] decay {:#x}",
                node_id,
                buffer_offset,
                buffer_offset + buffer_count,
                decay
            ),
            Self::BiquadFilter {
                node_id,
                buffer,
                needs_init,
            } => write!(
                f,
                "BiquadFilter node {:#x} b[{}] init {}",
                node_id, buffer, needs_init
            ),
            Self::VolumeRamp {
                node_id,
                buffer,
                last_volume,
                volume,
            } => write!(
                f,
                "VolumeRamp node {:#x} b[{}] {} -> {}",
                node_id, buffer, last_volume, volume
            ),
            Self::VoiceMix {
                node_id,
                input,
                buffer_offset,
                buffer_count,
            } => write!(
                f,
                "VoiceMix node {:#x} b[{}] -> b[{}..{}]",
                node_id,
                input,
                buffer_offset,
                buffer_offset + buffer_count
            ),
            Self::Mix {
                node_id,
                input,
                output,
                volume,
            } => write!(
                f,
                "Mix node {:#x} b[{}] -> b[{}] volume {}",
                node_id, input, output, volume
            ),
            Self::Aux {
                node_id,
                input,
                output,
                enabled,
            } => write!(
                f,
                "Aux node {:#x} b[{}] -> b[{}] enabled {}",
                node_id, input, output, enabled
            ),
            Self::EffectBiquadFilter {
                node_id,
                input,
                output,
            } => write!(
                f,
                "EffectBiquadFilter node {:#x} b[{}] -> b[{}]",
                node_id, input, output
            ),
            Self::I3dl2Reverb {
                node_id,
                input,
                output,
            } => write!(
                f,
                "I3dl2Reverb node {:#x} b[{}] -> b[{}]",
                node_id, input, output
            ),
            Self::FinalMixGain {
                node_id,
                buffer,
                volume,
            } => write!(
                f,
                "FinalMixGain node {:#x} b[{}] volume {}",
                node_id, buffer, volume
            ),
        }
    }
}

/// Per-renderer command generator
pub struct CommandGenerator {
    memory: Arc<dyn GuestMemory>,
    sample_rate: u32,
    sample_count: usize,
    mix_buffer_count: usize,
    buffers: MixBufferStore,
    depop_buffer: Vec<i32>,
    /// Decoded input for one resample pass, history first
    sample_buffer: Vec<i32>,
    pcm_scratch: Vec<i16>,
    trace: Vec<GeneratedCommand>,
    dump_lines: Vec<String>,
    dump_every_frame: bool,
    dumping_frame: bool,
    dropped_voice_frames: u64,
}

impl CommandGenerator {
    pub fn new(
        memory: Arc<dyn GuestMemory>,
        sample_rate: u32,
        sample_count: usize,
        mix_buffer_count: usize,
    ) -> Self {
        Self {
            memory,
            sample_rate,
            sample_count,
            mix_buffer_count,
            buffers: MixBufferStore::new(mix_buffer_count + MAX_CHANNEL_COUNT, sample_count),
            depop_buffer: vec![0; mix_buffer_count],
            sample_buffer: vec![0; MIX_BUFFER_SIZE + MAX_SAMPLE_HISTORY * 2],
            pcm_scratch: Vec::new(),
            trace: Vec::new(),
            dump_lines: Vec::new(),
            dump_every_frame: false,
            dumping_frame: false,
            dropped_voice_frames: 0,
        }
    }

    /// Dump every frame, not just the next one
    pub fn set_dump_every_frame(&mut self, enabled: bool) {
        self.dump_every_frame = enabled;
    }

    /// Dump the next generated frame
    pub fn request_dump(&mut self) {
        self.dumping_frame = true;
    }

    /// Lines dumped since the last call
    pub fn take_dump(&mut self) -> Vec<String> {
        std::mem::take(&mut self.dump_lines)
    }

    /// Commands of the last generated frame
    pub fn trace(&self) -> &[GeneratedCommand] {
        &self.trace
    }

    /// Voice frames skipped because their pitch overflowed the decode buffer
    pub fn dropped_voice_frames(&self) -> u64 {
        self.dropped_voice_frames
    }

    pub fn mix_buffers(&self) -> &MixBufferStore {
        &self.buffers
    }

    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    /// Generate one frame
    pub fn generate(&mut self, graph: &mut RenderGraph) {
        self.trace.clear();
        if self.dump_every_frame {
            self.dumping_frame = true;
        }

        self.pre_command(graph);
        self.buffers.clear();
        self.record(GeneratedCommand::ClearMixBuffers);
        self.generate_voice_commands(graph);
        self.generate_sub_mix_commands(graph);
        self.generate_final_mix_commands(graph);
        self.post_command();
    }

    fn record(&mut self, command: GeneratedCommand) {
        if self.dumping_frame {
            let line = command.to_string();
            debug!(target: DSP_TRACE_TARGET, "{}", line);
            self.dump_lines.push(line);
        }
        self.trace.push(command);
    }

    /// Dump splitter routing ahead of the frame
    fn pre_command(&mut self, graph: &RenderGraph) {
        if !self.dumping_frame {
            return;
        }
        let splitters = &graph.splitters;
        for id in 0..splitters.info_count() as i32 {
            let Some(info) = splitters.info(id) else {
                continue;
            };
            if !info.in_use() {
                continue;
            }
            let routes: Vec<String> = splitters
                .destination_mix_ids(id)
                .map(|mix_id| format!("m{}", mix_id))
                .collect();
            let line = format!("Splitter {} -> [{}]", id, routes.join(", "));
            debug!(target: DSP_TRACE_TARGET, "{}", line);
            self.dump_lines.push(line);
        }
    }

    fn post_command(&mut self) {
        if !self.dump_every_frame {
            self.dumping_frame = false;
        }
    }

    // =========================================================================
    // Voices
    // =========================================================================

    fn generate_voice_commands(&mut self, graph: &mut RenderGraph) {
        let RenderGraph {
            voices,
            mixes,
            splitters,
            ..
        } = graph;

        for position in 0..voices.count() {
            let Some(index) = voices.sorted_index(position) else {
                break;
            };
            let info = &mut voices.infos[index];
            if info.should_skip() {
                continue;
            }
            if !info.update_for_command_generation(&mut voices.states, &mut voices.resources) {
                continue;
            }
            self.generate_voice_command(
                info,
                &mut voices.states,
                &mut voices.resources,
                mixes,
                splitters,
            );
        }

        splitters.update_internal_state();
    }

    fn generate_voice_command(
        &mut self,
        info: &mut ServerVoiceInfo,
        states: &mut [VoiceState],
        resources: &mut [VoiceChannelResource],
        mixes: &MixContext,
        splitters: &mut SplitterContext,
    ) {
        let node_id = info.params.node_id;
        let channel_count = info.channel_count();
        let start_volume = info.last_volume;
        let routed = info.has_mix_route() || info.has_splitter_route();

        for channel in 0..channel_count {
            let resource_id = info.params.voice_channel_resource_ids[channel] as usize;
            let (Some(state), Some(resource)) =
                (states.get_mut(resource_id), resources.get_mut(resource_id))
            else {
                warn!(
                    "Voice {} channel {} has invalid resource {}",
                    info.params.id, channel, resource_id
                );
                continue;
            };

            self.generate_data_source_command(info, state, channel, mixes, splitters);

            if info.should_depop || !routed {
                continue;
            }

            self.generate_biquad_filter_for_voice(info, state, channel);
            self.generate_volume_ramp(start_volume, info.params.volume, channel, node_id);

            if info.has_mix_route() {
                if let Some(mix) = mixes.info(info.params.mix_id) {
                    self.generate_voice_mix(
                        resource.mix_volume(),
                        resource.last_mix_volume(),
                        state,
                        mix.buffer_offset(),
                        mix.buffer_count(),
                        channel,
                        node_id,
                    );
                }
                resource.update_last_mix_volumes();
            } else {
                let splitter_id = info.params.splitter_info_id;
                let mut base = channel;
                while let Some(destination) = splitters.destination_mut(splitter_id, base) {
                    base += channel_count;
                    if !destination.is_configured() {
                        continue;
                    }
                    let Some(mix) = mixes.info(destination.mix_id()) else {
                        continue;
                    };
                    self.generate_voice_mix(
                        destination.mix_volumes(),
                        destination.last_mix_volumes(),
                        state,
                        mix.buffer_offset(),
                        mix.buffer_count(),
                        channel,
                        node_id,
                    );
                    destination.mark_dirty();
                }
            }
        }

        if info.should_depop {
            info.last_volume = 0.0;
        } else if routed {
            info.last_volume = info.params.volume;
            for (was, filter) in info
                .was_biquad_filter_enabled
                .iter_mut()
                .zip(&info.params.biquad_filters)
            {
                *was = filter.enabled;
            }
        }
    }

    fn generate_data_source_command(
        &mut self,
        info: &ServerVoiceInfo,
        state: &mut VoiceState,
        channel: usize,
        mixes: &MixContext,
        splitters: &SplitterContext,
    ) {
        let node_id = info.params.node_id;

        if info.should_depop {
            if info.has_mix_route() {
                if let Some(mix) = mixes.info(info.params.mix_id).filter(|m| m.in_use()) {
                    self.generate_depop_prepare(
                        state,
                        mix.buffer_offset(),
                        mix.buffer_count(),
                        node_id,
                    );
                }
            } else if info.has_splitter_route() {
                let mut index = 0;
                while let Some(destination) = splitters.destination(info.params.splitter_info_id, index)
                {
                    index += 1;
                    if !destination.is_configured() {
                        continue;
                    }
                    if let Some(mix) = mixes.info(destination.mix_id()) {
                        self.generate_depop_prepare(
                            state,
                            mix.buffer_offset(),
                            mix.buffer_count(),
                            node_id,
                        );
                    }
                }
            }
            return;
        }

        let format = info.params.sample_format;
        match format {
            SampleFormat::Pcm16 => self.decode_from_wave_buffers(info, state, channel),
            SampleFormat::Adpcm if channel == 0 && info.channel_count() == 1 => {
                self.decode_from_wave_buffers(info, state, channel)
            }
            SampleFormat::Adpcm => {
                warn!(
                    "ADPCM voice {} has {} channels, only mono is supported",
                    info.params.id,
                    info.channel_count()
                );
                self.silence_channel(channel);
                return;
            }
            SampleFormat::Invalid => {
                warn!("Voice {} has an invalid sample format", info.params.id);
                self.silence_channel(channel);
                return;
            }
        }

        self.record(GeneratedCommand::DataSource {
            node_id,
            format,
            channel,
            output: self.mix_buffer_count + channel,
        });
    }

    fn silence_channel(&mut self, channel: usize) {
        if let Some(buffer) = self.buffers.get_mut(self.mix_buffer_count + channel) {
            buffer.fill(0);
        }
    }

    /// Move a silenced voice's last samples into the depop buffer
    fn generate_depop_prepare(
        &mut self,
        state: &mut VoiceState,
        buffer_offset: usize,
        buffer_count: usize,
        node_id: i32,
    ) {
        for i in 0..buffer_count.min(MAX_MIX_BUFFERS) {
            let sample = state.previous_samples[i];
            if sample == 0 {
                continue;
            }
            if let Some(depop) = self.depop_buffer.get_mut(buffer_offset + i) {
                *depop = depop.wrapping_add(sample);
            }
            state.previous_samples[i] = 0;
        }
        self.record(GeneratedCommand::DepopPrepare {
            node_id,
            buffer_offset,
            buffer_count,
        });
    }

    fn generate_biquad_filter_for_voice(
        &mut self,
        info: &ServerVoiceInfo,
        state: &mut VoiceState,
        channel: usize,
    ) {
        let buffer = self.mix_buffer_count + channel;
        let n = self.sample_count;

        for i in 0..MAX_BIQUAD_FILTERS {
            let filter = info.params.biquad_filters[i];
            if !filter.enabled {
                continue;
            }
            let needs_init = !info.was_biquad_filter_enabled[i];
            let filter_state = &mut state.biquad_filter_state[i];
            if needs_init {
                *filter_state = [0; 2];
            }
            self.buffers.with_pair(buffer, buffer, |input, output| {
                apply_biquad_filter(
                    output,
                    input,
                    filter.numerator,
                    filter.denominator,
                    filter_state,
                    n,
                )
            });
            self.record(GeneratedCommand::BiquadFilter {
                node_id: info.params.node_id,
                buffer,
                needs_init,
            });
        }
    }

    fn generate_volume_ramp(&mut self, last_volume: f32, volume: f32, channel: usize, node_id: i32) {
        let buffer = self.mix_buffer_count + channel;
        let n = self.sample_count;
        let last = volume_to_q15(last_volume);
        let current = volume_to_q15(volume);
        let delta = ramp_delta(last, current, n);

        self.buffers.with_pair(buffer, buffer, |input, output| {
            apply_gain(output, input, last, delta, n)
        });
        self.record(GeneratedCommand::VolumeRamp {
            node_id,
            buffer,
            last_volume,
            volume,
        });
    }

    #[allow(clippy::too_many_arguments)]
    fn generate_voice_mix(
        &mut self,
        mix_volumes: &[f32; MAX_MIX_BUFFERS],
        last_mix_volumes: &[f32; MAX_MIX_BUFFERS],
        state: &mut VoiceState,
        buffer_offset: usize,
        buffer_count: usize,
        channel: usize,
        node_id: i32,
    ) {
        let input = self.mix_buffer_count + channel;
        let n = self.sample_count;

        for i in 0..buffer_count.min(MAX_MIX_BUFFERS) {
            let last = last_mix_volumes[i];
            let current = mix_volumes[i];
            if last == 0.0 && current == 0.0 {
                state.previous_samples[i] = 0;
                continue;
            }
            let delta = (current - last) / n as f32;
            let mut last_sample = 0;
            self.buffers.with_pair(input, buffer_offset + i, |inp, out| {
                last_sample = apply_mix_ramp(out, inp, last, delta, n);
            });
            state.previous_samples[i] = last_sample;
        }

        self.record(GeneratedCommand::VoiceMix {
            node_id,
            input,
            buffer_offset,
            buffer_count,
        });
    }

    // =========================================================================
    // Mixes
    // =========================================================================

    fn generate_sub_mix_commands(&mut self, graph: &mut RenderGraph) {
        let RenderGraph {
            mixes,
            splitters,
            effects,
            ..
        } = graph;

        for position in 0..mixes.count() {
            let Some(mix) = mixes.sorted_info(position) else {
                break;
            };
            if !mix.in_use() || mix.mix_id() == FINAL_MIX {
                continue;
            }
            self.generate_depop_for_mix_buffers(
                mix.buffer_offset(),
                mix.buffer_count(),
                mix.sample_rate(),
                mix.node_id(),
            );
            self.generate_effect_commands(mix, effects);
            self.generate_mix_commands(mix, mixes, splitters);
        }
    }

    fn generate_final_mix_commands(&mut self, graph: &mut RenderGraph) {
        let RenderGraph { mixes, effects, .. } = graph;
        let Some(mix) = mixes.final_mix() else {
            return;
        };
        let offset = mix.buffer_offset();
        let count = mix.buffer_count();
        let node_id = mix.node_id();

        self.generate_depop_for_mix_buffers(offset, count, mix.sample_rate(), node_id);
        self.generate_effect_commands(mix, effects);

        let gain = volume_to_q15(mix.volume());
        let n = self.sample_count;
        for buffer in offset..offset + count {
            self.buffers.with_pair(buffer, buffer, |input, output| {
                apply_gain_without_delta(output, input, gain, n)
            });
            self.record(GeneratedCommand::FinalMixGain {
                node_id,
                buffer,
                volume: mix.volume(),
            });
        }
    }

    /// Decay pending depop residue into a mix's buffers
    fn generate_depop_for_mix_buffers(
        &mut self,
        buffer_offset: usize,
        buffer_count: usize,
        sample_rate: u32,
        node_id: i32,
    ) {
        let decay = depop_decay(sample_rate);
        let n = self.sample_count;
        let end = (buffer_offset + buffer_count).min(self.mix_buffer_count);

        for index in buffer_offset..end {
            let sample = self.depop_buffer[index];
            if sample == 0 {
                continue;
            }
            if let Some(buffer) = self.buffers.get_mut(index) {
                self.depop_buffer[index] = apply_mix_depop(buffer, sample, decay, n);
            }
        }

        self.record(GeneratedCommand::DepopForMixBuffers {
            node_id,
            buffer_offset,
            buffer_count,
            decay,
        });
    }

    fn generate_effect_commands(&mut self, mix: &ServerMixInfo, effects: &mut EffectContext) {
        for &order in mix.effect_order() {
            if order == NO_EFFECT_ORDER {
                break;
            }
            let Some(effect) = usize::try_from(order)
                .ok()
                .and_then(|index| effects.info_mut(index))
            else {
                continue;
            };

            let kind = *effect.kind();
            match kind {
                EffectKind::Aux(aux) => self.generate_aux_command(mix, effect, &aux),
                EffectKind::BiquadFilter(param) => {
                    self.generate_biquad_filter_effect(mix, effect, &param)
                }
                EffectKind::I3dl2Reverb(routing) => {
                    self.generate_i3dl2_reverb(mix, effect, &routing)
                }
                EffectKind::Delay(_) | EffectKind::Reverb(_) | EffectKind::Stubbed => {}
            }
            effect.update_for_command_generation();
        }
    }

    fn generate_aux_command(&mut self, mix: &ServerMixInfo, effect: &EffectInfo, aux: &AuxParameter) {
        let memory = Arc::clone(&self.memory);
        let offset = mix.buffer_offset();
        let channels = (aux.mix_buffer_count as usize).min(MAX_MIX_BUFFERS);
        let n = self.sample_count;
        let rings = *effect.rings();

        for channel in 0..channels {
            let input = offset + aux.input[channel] as usize;
            let output = offset + aux.output[channel] as usize;

            if effect.is_enabled() {
                // Channels occupy consecutive blocks; the cursors move once
                // every channel has been written.
                let block_offset = (channel * n) as u32;
                let update_count = if channel + 1 == channels {
                    block_offset + n as u32
                } else {
                    0
                };

                if let Some(samples) = self.buffers.get(input) {
                    write_aux_buffer(
                        &*memory,
                        rings.send_info,
                        rings.send_buffer,
                        aux.sample_count,
                        samples,
                        n as u32,
                        block_offset,
                        update_count,
                    );
                }
                if let Some(out) = self.buffers.get_mut(output) {
                    let read = read_aux_buffer(
                        &*memory,
                        rings.return_info,
                        rings.return_buffer,
                        aux.sample_count,
                        out,
                        n as u32,
                        block_offset,
                        update_count,
                    ) as usize;
                    if read < n {
                        out[read..].fill(0);
                    }
                }
            } else {
                reset_aux_info(&*memory, rings.send_info);
                reset_aux_info(&*memory, rings.return_info);
                if input != output {
                    self.buffers
                        .with_pair(input, output, |i, o| o.copy_from_slice(i));
                }
            }

            self.record(GeneratedCommand::Aux {
                node_id: mix.node_id(),
                input,
                output,
                enabled: effect.is_enabled(),
            });
        }
    }

    fn generate_biquad_filter_effect(
        &mut self,
        mix: &ServerMixInfo,
        effect: &mut EffectInfo,
        param: &BiquadFilterEffectParameter,
    ) {
        let offset = mix.buffer_offset();
        let n = self.sample_count;
        let enabled = effect.is_enabled();
        let needs_init = effect.just_enabled();

        for (channel, (input, output)) in param.routing.pairs().enumerate() {
            let (input, output) = (offset + input, offset + output);
            if enabled {
                let Some(state) = effect.biquad_state_mut(channel) else {
                    continue;
                };
                if needs_init {
                    *state = [0; 2];
                }
                self.buffers.with_pair(input, output, |i, o| {
                    apply_biquad_filter(o, i, param.numerator, param.denominator, state, n)
                });
            } else if input != output {
                self.buffers
                    .with_pair(input, output, |i, o| o.copy_from_slice(i));
            }
            self.record(GeneratedCommand::EffectBiquadFilter {
                node_id: mix.node_id(),
                input,
                output,
            });
        }
    }

    /// Reverb is not modeled; an enabled I3DL2 effect mixes its input
    /// through at unity gain.
    fn generate_i3dl2_reverb(&mut self, mix: &ServerMixInfo, effect: &EffectInfo, routing: &ChannelRouting) {
        if !effect.is_enabled() {
            return;
        }
        let offset = mix.buffer_offset();
        let n = self.sample_count;
        for (input, output) in routing.pairs() {
            let (input, output) = (offset + input, offset + output);
            if input == output {
                continue;
            }
            self.buffers
                .with_pair(input, output, |i, o| apply_mix::<1>(o, i, Q15_ONE, n));
            self.record(GeneratedCommand::I3dl2Reverb {
                node_id: mix.node_id(),
                input,
                output,
            });
        }
    }

    fn generate_mix_commands(
        &mut self,
        mix: &ServerMixInfo,
        mixes: &MixContext,
        splitters: &SplitterContext,
    ) {
        if !mix.has_any_connection() {
            return;
        }
        let offset = mix.buffer_offset();
        let count = mix.buffer_count();
        let node_id = mix.node_id();

        if mix.dest_mix_id() != NO_MIX {
            let Some(dest) = mixes.info(mix.dest_mix_id()) else {
                warn!(
                    "Mix {} routes to missing mix {}",
                    mix.mix_id(),
                    mix.dest_mix_id()
                );
                return;
            };
            for i in 0..count {
                for j in 0..dest.buffer_count() {
                    let volume = mix.volume() * mix.mix_volume(i, j);
                    if volume != 0.0 {
                        self.generate_mix(offset + i, dest.buffer_offset() + j, volume, node_id);
                    }
                }
            }
        } else if mix.splitter_id() != NO_SPLITTER {
            if count == 0 {
                return;
            }
            let mut base = 0;
            while let Some(destination) = splitters.destination(mix.splitter_id(), base) {
                base += 1;
                if !destination.is_configured() {
                    continue;
                }
                let Some(dest) = mixes.info(destination.mix_id()) else {
                    continue;
                };
                let input = (base - 1) % count + offset;
                for i in 0..dest.buffer_count() {
                    let volume = mix.volume() * destination.mix_volume(i);
                    if volume != 0.0 {
                        self.generate_mix(input, dest.buffer_offset() + i, volume, node_id);
                    }
                }
            }
        }
    }

    fn generate_mix(&mut self, input: usize, output: usize, volume: f32, node_id: i32) {
        let gain = volume_to_q15(volume);
        let n = self.sample_count;
        if !self
            .buffers
            .with_pair(input, output, |i, o| mix_unrolled(o, i, gain, n))
        {
            warn!("Mix b[{}] -> b[{}] is out of range", input, output);
            return;
        }
        self.record(GeneratedCommand::Mix {
            node_id,
            input,
            output,
            volume,
        });
    }
}
