//! Renderer session
//!
//! One [`AudioRenderer`] per guest `OpenAudioRenderer` call. Each update
//! applies the guest's pool, voice, effect, splitter and mix parameters,
//! renders one frame on the host, and hands the frame's final mix to the
//! ADSP as a command list. Statuses go back to the guest in the
//! [`UpdateOutput`].


use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::adsp::{Adsp, CommandBuffer};
use crate::behavior::BehaviorInfo;
use crate::command::{Command, CommandListWriter, PerformanceState};
use crate::common::{MAX_CHANNEL_COUNT, MAX_RENDERER_SESSIONS, MIX_BUFFER_SIZE};
use crate::config::{AudioConfig, RendererConfig};
use crate::effect::{EffectContext, EffectOutStatus, EffectParameter};
use crate::error::{RendererError, Result};
use crate::generator::{CommandGenerator, RenderGraph};
use crate::memory::GuestMemory;
use crate::mix::{MixContext, MixParameter};
use crate::sink::StreamState;
use crate::splitter::{SplitterContext, SplitterDestinationParameter, SplitterParameter};
use crate::voice::{VoiceChannelResourceParameter, VoiceContext, VoiceOutStatus, VoiceParameter};

/// Node id the session's own commands carry
const RENDERER_NODE_ID: i32 = 0;

/// Byte offsets inside a guest performance entry
const PERFORMANCE_START_TIME_OFFSET: u32 = 4;
const PERFORMANCE_PROCESSED_TIME_OFFSET: u32 = 8;

/// Guest-requested renderer shape, fixed for the session's lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioRendererParameter {
    pub sample_rate: u32,
    pub sample_count: u32,
    pub mix_buffer_count: u32,
    pub sub_mix_count: u32,
    pub voice_count: u32,
    pub effect_count: u32,
    pub splitter_count: u32,
    pub splitter_destination_count: u32,
    /// `REV<n>` magic
    pub revision: u32,
    /// Mailbox slot this session renders into
    pub session_id: u32,
    pub applet_resource_user_id: u64,
}

impl AudioRendererParameter {
    /// Memory pools the guest may describe: four per voice plus one per effect
    pub fn memory_pool_count(&self) -> usize {
        self.effect_count as usize + self.voice_count as usize * 4
    }

    /// Validate and negotiate the revision
    pub fn validate(&self) -> Result<BehaviorInfo> {
        let behavior = BehaviorInfo::from_magic(self.revision)?;
        if !matches!(self.sample_rate, 32_000 | 48_000) {
            return Err(RendererError::InvalidSampleRate(self.sample_rate));
        }
        if self.sample_count == 0 || self.sample_count as usize > MIX_BUFFER_SIZE {
            return Err(RendererError::InvalidSampleCount(self.sample_count));
        }
        if self.session_id as usize >= MAX_RENDERER_SESSIONS {
            return Err(RendererError::OutOfRange {
                what: "renderer session",
                index: self.session_id as usize,
                max: MAX_RENDERER_SESSIONS,
            });
        }
        Ok(behavior)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MemoryPoolState {
    #[default]
    Invalid,
    Unknown,
    RequestDetach,
    Detached,
    RequestAttach,
    Attached,
    Released,
}

/// Guest-described region that wave buffers may point into
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryPoolInfo {
    pub address: u64,
    pub size: u64,
    pub state: MemoryPoolState,
}

impl MemoryPoolInfo {
    /// Server-side transition for a guest request
    fn apply(&mut self, request: &MemoryPoolInfo) {
        match request.state {
            MemoryPoolState::RequestAttach => {
                self.address = request.address;
                self.size = request.size;
                self.state = MemoryPoolState::Attached;
            }
            MemoryPoolState::RequestDetach => self.state = MemoryPoolState::Detached,
            _ => {}
        }
    }
}

/// One guest update, already decoded from the IPC buffer
#[derive(Debug, Clone, Default)]
pub struct UpdateParameters {
    pub memory_pools: Vec<MemoryPoolInfo>,
    pub voice_channel_resources: Vec<VoiceChannelResourceParameter>,
    pub voices: Vec<VoiceParameter>,
    pub effects: Vec<EffectParameter>,
    pub splitters: Vec<SplitterParameter>,
    pub splitter_destinations: Vec<SplitterDestinationParameter>,
    pub mixes: Vec<MixParameter>,
    /// Performance entry stamped by the ADSP, 0 for none
    pub performance_entry_address: u64,
}

/// Statuses returned to the guest
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateOutput {
    pub memory_pools: Vec<MemoryPoolState>,
    pub voices: Vec<VoiceOutStatus>,
    pub effects: Vec<EffectOutStatus>,
    /// Only reported from revision 5
    pub elapsed_frame_count: Option<u64>,
}

pub struct AudioRenderer {
    params: AudioRendererParameter,
    behavior: BehaviorInfo,
    config: RendererConfig,
    graph: RenderGraph,
    generator: CommandGenerator,
    memory_pools: Vec<MemoryPoolInfo>,
    adsp: Arc<Adsp>,
    state: StreamState,
    /// Clear stale sink audio with the next frame
    reset_pending: bool,
    elapsed_frame_count: u64,
    /// Percent of the ADSP ceiling the guest allows this session
    rendering_time_limit: u32,
}

impl AudioRenderer {
    pub fn new(
        params: AudioRendererParameter,
        memory: Arc<dyn GuestMemory>,
        adsp: Arc<Adsp>,
        config: &AudioConfig,
    ) -> Result<Self> {
        let behavior = params.validate()?;

        let (splitter_count, destination_count) = if behavior.is_splitter_supported() {
            (
                params.splitter_count as usize,
                params.splitter_destination_count as usize,
            )
        } else {
            (0, 0)
        };
        let graph = RenderGraph {
            voices: VoiceContext::new(params.voice_count as usize),
            mixes: MixContext::new(
                params.sub_mix_count as usize + 1,
                params.effect_count as usize,
            ),
            splitters: SplitterContext::new(splitter_count, destination_count),
            effects: EffectContext::new(params.effect_count as usize),
        };

        let mut generator = CommandGenerator::new(
            memory,
            params.sample_rate,
            params.sample_count as usize,
            params.mix_buffer_count as usize,
        );
        generator.set_dump_every_frame(config.renderer.dump_commands);

        info!(
            "Audio renderer session {}: {} Hz, {} samples, {} mix buffers, {} voices, revision {}",
            params.session_id,
            params.sample_rate,
            params.sample_count,
            params.mix_buffer_count,
            params.voice_count,
            behavior.user_revision()
        );

        Ok(Self {
            memory_pools: vec![MemoryPoolInfo::default(); params.memory_pool_count()],
            params,
            behavior,
            config: config.renderer.clone(),
            graph,
            generator,
            adsp,
            state: StreamState::Stopped,
            reset_pending: true,
            elapsed_frame_count: 0,
            rendering_time_limit: 100,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.params.sample_rate
    }

    pub fn sample_count(&self) -> u32 {
        self.params.sample_count
    }

    pub fn mix_buffer_count(&self) -> u32 {
        self.params.mix_buffer_count
    }

    pub fn session_id(&self) -> usize {
        self.params.session_id as usize
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn behavior(&self) -> &BehaviorInfo {
        &self.behavior
    }

    pub fn elapsed_frame_count(&self) -> u64 {
        self.elapsed_frame_count
    }

    pub fn graph(&self) -> &RenderGraph {
        &self.graph
    }

    pub fn generator(&self) -> &CommandGenerator {
        &self.generator
    }

    pub fn generator_mut(&mut self) -> &mut CommandGenerator {
        &mut self.generator
    }

    pub fn adsp(&self) -> &Arc<Adsp> {
        &self.adsp
    }

    pub fn rendering_time_limit(&self) -> u32 {
        self.rendering_time_limit
    }

    /// Share of the ADSP ceiling, in percent, clamped to 100
    pub fn set_rendering_time_limit(&mut self, percent: u32) {
        self.rendering_time_limit = percent.min(100);
    }

    pub fn start(&mut self) {
        if self.state == StreamState::Started {
            return;
        }
        self.state = StreamState::Started;
        self.reset_pending = true;
        if let Some(stream) = self.adsp.sink_stream(self.session_id()) {
            stream.start();
        }
        debug!("Audio renderer session {} started", self.params.session_id);
    }

    pub fn stop(&mut self) {
        if self.state == StreamState::Stopped {
            return;
        }
        self.state = StreamState::Stopped;
        if let Some(stream) = self.adsp.sink_stream(self.session_id()) {
            stream.stop();
        }
        self.adsp.clear_remain_count(self.session_id());
        debug!("Audio renderer session {} stopped", self.params.session_id);
    }

    /// ADSP budget for one of this session's lists, in nanoseconds
    pub fn time_limit(&self) -> u64 {
        let percent = self
            .behavior
            .processing_time_limit_percent()
            .min(self.rendering_time_limit);
        self.config.max_process_time_ns * percent as u64 / 100
    }

    /// Apply a guest update and, while started, render one frame
    pub fn request_update(&mut self, update: &UpdateParameters) -> Result<UpdateOutput> {
        self.update_memory_pools(&update.memory_pools)?;

        let graph = &mut self.graph;
        for param in &update.voice_channel_resources {
            graph.voices.update_channel_resource(param)?;
        }
        for (index, param) in update.voices.iter().enumerate() {
            graph.voices.update_voice(index, param, &self.behavior)?;
        }
        for (index, param) in update.effects.iter().enumerate() {
            graph.effects.update(index, param)?;
        }

        if self.behavior.is_splitter_supported() {
            for param in &update.splitters {
                graph.splitters.update_info(param)?;
            }
            for param in &update.splitter_destinations {
                graph.splitters.update_destination(param)?;
            }
        } else if !update.splitters.is_empty() || !update.splitter_destinations.is_empty() {
            warn!(
                "Revision {} has no splitters, ignoring splitter update",
                self.behavior.user_revision()
            );
        }

        for param in &update.mixes {
            graph.mixes.update(param)?;
        }
        graph.mixes.update_effect_order(&graph.effects);
        graph
            .mixes
            .sort(&graph.splitters, self.params.mix_buffer_count as usize)?;
        graph.voices.sort_info();

        if self.state == StreamState::Started {
            self.render_frame(update.performance_entry_address)?;
        }

        let graph = &self.graph;
        Ok(UpdateOutput {
            memory_pools: self.memory_pools.iter().map(|pool| pool.state).collect(),
            voices: (0..graph.voices.count())
                .map(|index| graph.voices.out_status(index))
                .collect(),
            effects: graph.effects.iter().map(|effect| effect.out_status()).collect(),
            elapsed_frame_count: self
                .behavior
                .is_elapsed_frame_count_supported()
                .then_some(self.elapsed_frame_count),
        })
    }

    fn update_memory_pools(&mut self, requests: &[MemoryPoolInfo]) -> Result<()> {
        let max = self.memory_pools.len();
        if requests.len() > max {
            return Err(RendererError::OutOfRange {
                what: "memory pool",
                index: requests.len() - 1,
                max,
            });
        }
        for (pool, request) in self.memory_pools.iter_mut().zip(requests) {
            pool.apply(request);
        }
        Ok(())
    }

    /// Generate a frame and queue its list for the ADSP
    fn render_frame(&mut self, performance_entry_address: u64) -> Result<()> {
        self.generator.generate(&mut self.graph);
        let list = self.encode_frame(performance_entry_address)?;

        self.adsp.send_command_buffer(
            self.session_id(),
            CommandBuffer {
                buffer: Some(list.into()),
                reset_buffers: std::mem::take(&mut self.reset_pending),
                time_limit: self.time_limit(),
                applet_resource_user_id: self.params.applet_resource_user_id,
                ..Default::default()
            },
        )?;
        self.elapsed_frame_count += 1;
        Ok(())
    }

    /// Encode the frame's final mix as a self-contained ADSP list
    fn encode_frame(&self, performance_entry_address: u64) -> Result<Vec<u8>> {
        let mix_buffer_count = self.params.mix_buffer_count;
        let mut writer = CommandListWriter::new(
            self.params.sample_count,
            self.params.sample_rate,
            mix_buffer_count,
            mix_buffer_count + MAX_CHANNEL_COUNT as u32,
        );
        let performance = |state| Command::Performance {
            state,
            start_time_offset: PERFORMANCE_START_TIME_OFFSET,
            processed_time_offset: PERFORMANCE_PROCESSED_TIME_OFFSET,
            entry_address: performance_entry_address,
        };

        writer.push(true, RENDERER_NODE_ID, &performance(PerformanceState::Start))?;
        writer.push(true, RENDERER_NODE_ID, &Command::ClearMixBuffer)?;

        if let Some(final_mix) = self.graph.mixes.final_mix().filter(|mix| mix.in_use()) {
            let node_id = final_mix.node_id();
            let offset = final_mix.buffer_offset();
            let count = final_mix.buffer_count().min(MAX_CHANNEL_COUNT);
            let buffers = self.generator.mix_buffers();

            let mut inputs = [0u16; MAX_CHANNEL_COUNT];
            for (channel, input) in inputs.iter_mut().enumerate().take(count) {
                let index = offset + channel;
                let samples = buffers.get(index).map(<[i32]>::to_vec).unwrap_or_default();
                writer.push(
                    true,
                    node_id,
                    &Command::Upload {
                        output: index as u16,
                        samples,
                    },
                )?;
                *input = index as u16;
            }
            if count > 0 {
                writer.push(
                    true,
                    node_id,
                    &Command::DeviceSink {
                        input_count: count as u16,
                        inputs,
                    },
                )?;
            }
        }

        writer.push(true, RENDERER_NODE_ID, &performance(PerformanceState::Stop))?;
        Ok(writer.finish())
    }
}
