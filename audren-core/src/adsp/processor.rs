//! Command list interpreter
//!
//! One processor per renderer session. A list is walked record by record;
//! when a time budget cuts processing short, the byte offset of the next
//! record is kept and the following cycle resumes there.

use std::sync::Arc;

use tracing::{debug, error, trace, warn};

use crate::command::{AuxCommand, Command, CommandListHeader, CommandReader, PerformanceState};
use crate::common::{MAX_MIX_BUFFERS, MIX_BUFFER_SIZE, volume_to_q15};
use crate::dsp::{
    MixBufferStore, apply_biquad_filter, apply_gain, apply_gain_without_delta, apply_mix_depop,
    apply_mix_ramp, mix_unrolled, ramp_delta,
};
use crate::effect::{read_aux_buffer, reset_aux_info, write_aux_buffer};
use crate::error::WireError;
use crate::memory::{GuestMemory, GuestMemoryExt};
use crate::sink::SinkStream;
use crate::timing::{Clock, ticks_to_ns, ticks_to_us};

/// Largest buffer count a list header may ask for
const MAX_LIST_BUFFERS: u32 = (MAX_MIX_BUFFERS * 8) as u32;

pub struct CommandListProcessor {
    memory: Arc<dyn GuestMemory>,
    clock: Arc<dyn Clock>,
    stream: Option<SinkStream>,
    list: Option<Arc<[u8]>>,
    header: CommandListHeader,
    /// Byte offset of the next record
    offset: usize,
    remaining_command_count: u32,
    processed_command_count: u32,
    buffers: MixBufferStore,
    /// Tick of the current `process` call, for performance start stamps
    process_start: u64,
    performance_start: u64,
    sink_scratch: Vec<i16>,
}

impl CommandListProcessor {
    pub fn new(memory: Arc<dyn GuestMemory>, clock: Arc<dyn Clock>, stream: Option<SinkStream>) -> Self {
        Self {
            memory,
            clock,
            stream,
            list: None,
            header: CommandListHeader::default(),
            offset: 0,
            remaining_command_count: 0,
            processed_command_count: 0,
            buffers: MixBufferStore::default(),
            process_start: 0,
            performance_start: 0,
            sink_scratch: Vec::new(),
        }
    }

    /// Take a fresh list. Mix buffers are reshaped to the list header.
    pub fn initialize(&mut self, list: Arc<[u8]>) -> Result<(), WireError> {
        self.list = None;
        self.remaining_command_count = 0;
        self.processed_command_count = 0;

        let reader = CommandReader::new(&list)?;
        let header = *reader.header();
        if header.sample_count as usize > MIX_BUFFER_SIZE || header.buffer_count > MAX_LIST_BUFFERS {
            return Err(WireError::InvalidListHeader {
                sample_count: header.sample_count,
                buffer_count: header.buffer_count,
            });
        }

        self.buffers
            .resize(header.buffer_count as usize, header.sample_count as usize);
        self.offset = reader.offset();
        self.header = header;
        self.remaining_command_count = header.command_count;
        self.list = Some(list);
        trace!(
            "Command list: {} commands, {} buffers of {} samples",
            header.command_count, header.buffer_count, header.sample_count
        );
        Ok(())
    }

    /// Commands not yet processed in the current list
    pub fn remaining_command_count(&self) -> u32 {
        self.remaining_command_count
    }

    /// Commands walked since the list was initialized, enabled or not
    pub fn processed_command_count(&self) -> u32 {
        self.processed_command_count
    }

    pub fn header(&self) -> &CommandListHeader {
        &self.header
    }

    pub fn mix_buffers(&self) -> &MixBufferStore {
        &self.buffers
    }

    pub fn mix_buffers_mut(&mut self) -> &mut MixBufferStore {
        &mut self.buffers
    }

    pub fn stream(&self) -> Option<&SinkStream> {
        self.stream.as_ref()
    }

    /// Run the list until it ends or `time_limit_ns` is exceeded.
    ///
    /// Returns the time spent in nanoseconds.
    pub fn process(&mut self, time_limit_ns: Option<u64>) -> u64 {
        let start = self.clock.clock_ticks();
        self.process_start = start;
        let Some(list) = self.list.clone() else {
            return 0;
        };

        let mut reader = match CommandReader::new(&list) {
            Ok(reader) => reader,
            Err(e) => {
                error!("Command list unreadable: {}", e);
                self.remaining_command_count = 0;
                return 0;
            }
        };
        reader.seek(self.offset);
        let buffer_count = self.header.buffer_count as usize;

        while self.remaining_command_count > 0 {
            if let Some(limit) = time_limit_ns {
                let elapsed = ticks_to_ns(self.clock.clock_ticks().saturating_sub(start));
                if elapsed > limit {
                    debug!(
                        "Command list over budget ({} ns > {} ns), {} commands deferred",
                        elapsed, limit, self.remaining_command_count
                    );
                    break;
                }
            }

            let record = match reader.next_record() {
                Ok(record) => record,
                Err(e) => {
                    error!("Command list aborted: {}", e);
                    self.remaining_command_count = 0;
                    break;
                }
            };
            self.offset = reader.offset();
            self.remaining_command_count -= 1;
            self.processed_command_count += 1;

            if !record.enabled() {
                trace!("Command at {:#x} disabled", record.offset);
                continue;
            }
            match record.command() {
                Ok(command) if command.verify(buffer_count) => {
                    trace!("Node {:#x}: {:?}", record.node_id(), command.id());
                    self.execute(&command);
                }
                Ok(command) => error!(
                    "{:?} at {:#x} failed verification, skipped",
                    command.id(),
                    record.offset
                ),
                Err(e) => error!("Skipping command at {:#x}: {}", record.offset, e),
            }
        }

        ticks_to_ns(self.clock.clock_ticks().saturating_sub(start))
    }

    fn execute(&mut self, command: &Command) {
        let n = self.buffers.sample_count();
        match command {
            Command::ClearMixBuffer => self.buffers.clear(),
            Command::Mix {
                input,
                output,
                volume,
            } => {
                let gain = volume_to_q15(*volume);
                self.buffers.with_pair(*input as usize, *output as usize, |i, o| {
                    mix_unrolled(o, i, gain, n)
                });
            }
            Command::MixRamp {
                input,
                output,
                prev_volume,
                volume,
                previous_sample_address,
            } => {
                let delta = (volume - prev_volume) / n.max(1) as f32;
                let mut last = 0;
                self.buffers.with_pair(*input as usize, *output as usize, |i, o| {
                    last = apply_mix_ramp(o, i, *prev_volume, delta, n);
                });
                if *previous_sample_address != 0 {
                    if let Err(e) = self.memory.write_i32s(*previous_sample_address, &[last]) {
                        warn!("Failed to store ramp sample: {}", e);
                    }
                }
            }
            Command::Volume {
                input,
                output,
                volume,
            } => {
                let gain = volume_to_q15(*volume);
                self.buffers.with_pair(*input as usize, *output as usize, |i, o| {
                    apply_gain_without_delta(o, i, gain, n)
                });
            }
            Command::VolumeRamp {
                input,
                output,
                prev_volume,
                volume,
            } => {
                let start = volume_to_q15(*prev_volume);
                let delta = ramp_delta(start, volume_to_q15(*volume), n);
                self.buffers.with_pair(*input as usize, *output as usize, |i, o| {
                    apply_gain(o, i, start, delta, n)
                });
            }
            Command::BiquadFilter {
                input,
                output,
                numerator,
                denominator,
                needs_init,
                state_address,
            } => self.biquad_filter(
                *input as usize,
                *output as usize,
                *numerator,
                *denominator,
                *needs_init,
                *state_address,
            ),
            Command::DepopForMixBuffers {
                input,
                count,
                decay,
                depop_buffer_address,
            } => self.depop_for_mix_buffers(
                *input as usize,
                *count as usize,
                *decay,
                *depop_buffer_address,
            ),
            Command::Copy { input, output } => {
                self.buffers.with_pair(*input as usize, *output as usize, |i, o| {
                    o[..n].copy_from_slice(&i[..n])
                });
            }
            Command::Upload { output, samples } => {
                if let Some(buffer) = self.buffers.get_mut(*output as usize) {
                    let count = samples.len().min(n);
                    buffer[..count].copy_from_slice(&samples[..count]);
                    buffer[count..].fill(0);
                }
            }
            Command::Aux(aux) => self.aux(aux),
            Command::Performance {
                state,
                start_time_offset,
                processed_time_offset,
                entry_address,
            } => self.performance(*state, *start_time_offset, *processed_time_offset, *entry_address),
            Command::DeviceSink {
                input_count,
                inputs,
            } => self.device_sink(&inputs[..*input_count as usize]),
        }
    }

    fn biquad_filter(
        &mut self,
        input: usize,
        output: usize,
        numerator: [i16; 3],
        denominator: [i16; 2],
        needs_init: bool,
        state_address: u64,
    ) {
        let n = self.buffers.sample_count();
        let mut state = [0i64; 2];
        if state_address != 0 && !needs_init {
            match self.memory.read_pod::<[i64; 2]>(state_address) {
                Ok(stored) => state = stored,
                Err(e) => warn!("Failed to read biquad state: {}", e),
            }
        }
        self.buffers.with_pair(input, output, |i, o| {
            apply_biquad_filter(o, i, numerator, denominator, &mut state, n)
        });
        if state_address != 0 {
            if let Err(e) = self.memory.write_pod(state_address, &state) {
                warn!("Failed to store biquad state: {}", e);
            }
        }
    }

    fn depop_for_mix_buffers(&mut self, input: usize, count: usize, decay: i32, address: u64) {
        if address == 0 || count == 0 {
            return;
        }
        let n = self.buffers.sample_count();
        let entries = address + input as u64 * 4;
        let mut depop = vec![0i32; count];
        if let Err(e) = self.memory.read_i32s(entries, &mut depop) {
            warn!("Failed to read depop buffer: {}", e);
            return;
        }
        for (i, residue) in depop.iter_mut().enumerate() {
            if *residue == 0 {
                continue;
            }
            if let Some(buffer) = self.buffers.get_mut(input + i) {
                *residue = apply_mix_depop(buffer, *residue, decay, n);
            }
        }
        if let Err(e) = self.memory.write_i32s(entries, &depop) {
            warn!("Failed to store depop buffer: {}", e);
        }
    }

    fn aux(&mut self, aux: &AuxCommand) {
        let n = self.buffers.sample_count();
        let memory = &*self.memory;
        if !aux.effect_enabled {
            reset_aux_info(memory, aux.send_info);
            reset_aux_info(memory, aux.return_info);
            if aux.input != aux.output {
                self.buffers
                    .with_pair(aux.input as usize, aux.output as usize, |i, o| {
                        o[..n].copy_from_slice(&i[..n])
                    });
            }
            return;
        }

        self.buffers
            .with_pair(aux.input as usize, aux.output as usize, |i, o| {
                write_aux_buffer(
                    memory,
                    aux.send_info,
                    aux.send_buffer,
                    aux.count_max,
                    i,
                    n as u32,
                    aux.write_offset,
                    aux.update_count,
                );
                let read = read_aux_buffer(
                    memory,
                    aux.return_info,
                    aux.return_buffer,
                    aux.count_max,
                    o,
                    n as u32,
                    aux.write_offset,
                    aux.update_count,
                ) as usize;
                o[read.min(n)..n].fill(0);
            });
    }

    fn performance(
        &mut self,
        state: PerformanceState,
        start_time_offset: u32,
        processed_time_offset: u32,
        entry_address: u64,
    ) {
        if entry_address == 0 {
            return;
        }
        let now = self.clock.clock_ticks();
        let (address, value) = match state {
            PerformanceState::Start => {
                self.performance_start = now;
                let since = ticks_to_us(now.saturating_sub(self.process_start));
                (entry_address + start_time_offset as u64, since)
            }
            PerformanceState::Stop => {
                let taken = ticks_to_us(now.saturating_sub(self.performance_start));
                (entry_address + processed_time_offset as u64, taken)
            }
        };
        if let Err(e) = self.memory.write_u32(address, value as u32) {
            warn!("Failed to write performance entry: {}", e);
        }
    }

    fn device_sink(&mut self, inputs: &[u16]) {
        let Some(stream) = self.stream.as_mut() else {
            return;
        };
        let n = self.buffers.sample_count();
        let channels: Vec<&[i32]> = inputs
            .iter()
            .filter_map(|&i| self.buffers.get(i as usize))
            .collect();
        if channels.len() != inputs.len() {
            return;
        }

        self.sink_scratch.clear();
        self.sink_scratch.reserve(n * channels.len());
        for s in 0..n {
            for channel in &channels {
                self.sink_scratch
                    .push(channel[s].clamp(i16::MIN as i32, i16::MAX as i32) as i16);
            }
        }
        stream.append(&self.sink_scratch, channels.len());
    }
}
