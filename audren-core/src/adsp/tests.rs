use std::sync::Arc;
use std::time::Duration;

use super::*;
use crate::command::{AuxCommand, Command, CommandListWriter, PerformanceState};
use crate::config::AudioConfig;
use crate::error::WireError;
use crate::memory::{GuestMemoryExt, SharedMemory};
use crate::test_utils::guest_memory;
use crate::timing::ManualClock;

const BASE: u64 = 0x1_0000;
const ENTRY: u64 = BASE + 0x100;
const RAMP_SAMPLE: u64 = BASE + 0x200;
const BIQUAD_STATE: u64 = BASE + 0x300;
const DEPOP: u64 = BASE + 0x400;
const SAMPLES: u32 = 4;
const SIGNAL: [i32; 4] = [100, -100, 32767, -32768];

fn memory() -> Arc<SharedMemory> {
    guest_memory(BASE, 0x1000)
}

fn processor(memory: &Arc<SharedMemory>, clock: &ManualClock) -> CommandListProcessor {
    CommandListProcessor::new(memory.clone(), Arc::new(clock.clone()), None)
}

fn encode(buffer_count: u32, commands: &[(bool, Command)]) -> Vec<u8> {
    let mut writer = CommandListWriter::new(SAMPLES, 48_000, 2, buffer_count);
    for (enabled, command) in commands {
        writer.push(*enabled, 0, command).unwrap();
    }
    writer.finish()
}

fn list(buffer_count: u32, commands: &[(bool, Command)]) -> Arc<[u8]> {
    encode(buffer_count, commands).into()
}

fn mix(input: u16, output: u16) -> Command {
    Command::Mix {
        input,
        output,
        volume: 1.0,
    }
}

fn clears(count: usize) -> Arc<[u8]> {
    let commands: Vec<_> = (0..count).map(|_| (true, Command::ClearMixBuffer)).collect();
    list(2, &commands)
}

fn fill(processor: &mut CommandListProcessor, index: usize, samples: &[i32]) {
    processor
        .mix_buffers_mut()
        .get_mut(index)
        .unwrap()
        .copy_from_slice(samples);
}

fn buffer(processor: &CommandListProcessor, index: usize) -> Vec<i32> {
    processor.mix_buffers().get(index).unwrap().to_vec()
}

// Mailbox

#[test]
fn test_scripted_handshake() {
    let mailbox = Mailbox::new();
    mailbox.adsp_send(RenderMessage::InitializeOK);
    assert_eq!(mailbox.host_wait(), RenderMessage::InitializeOK);
    mailbox.host_send(RenderMessage::InitializeOK);
    assert_eq!(mailbox.adsp_wait(), RenderMessage::InitializeOK);

    assert_eq!(mailbox.adsp_sent_count(), 1);
    assert_eq!(mailbox.host_sent_count(), 1);
    assert!(mailbox.is_idle());
}

#[test]
fn test_messages_keep_order() {
    let mailbox = Mailbox::new();
    mailbox.host_send(RenderMessage::Render);
    mailbox.host_send(RenderMessage::Shutdown);
    assert_eq!(mailbox.adsp_wait(), RenderMessage::Render);
    assert_eq!(mailbox.adsp_wait(), RenderMessage::Shutdown);
}

#[test]
fn test_wait_timeout_is_invalid() {
    let mailbox = Mailbox::new();
    assert_eq!(
        mailbox.host_wait_timeout(Duration::from_millis(5)),
        RenderMessage::Invalid
    );
    assert_eq!(
        mailbox.adsp_wait_timeout(Duration::from_millis(5)),
        RenderMessage::Invalid
    );
}

#[test]
fn test_clear_command_buffers_keeps_counters() {
    let mailbox = Mailbox::new();
    mailbox.update_command_buffer(1, |slot| slot.remaining_command_count = 3);
    mailbox.set_command_buffer(
        1,
        CommandBuffer {
            buffer: Some(clears(1)),
            reset_buffers: true,
            ..Default::default()
        },
    );
    assert_eq!(mailbox.command_buffer(1).remaining_command_count, 3);
    mailbox.clear_command_buffers();
    let slot = mailbox.command_buffer(1);
    assert!(slot.buffer.is_none());
    assert!(!slot.reset_buffers);
    assert_eq!(slot.remaining_command_count, 3);

    mailbox.clear_remain_count(1);
    assert_eq!(mailbox.command_buffer(1).remaining_command_count, 0);
    // Out of range sessions read as empty
    assert!(mailbox.command_buffer(5).buffer.is_none());
}

// Command list processor

#[test]
fn test_mix_copies_at_unity() {
    let memory = memory();
    let mut processor = processor(&memory, &ManualClock::new());
    processor.initialize(list(2, &[(true, mix(0, 1))])).unwrap();
    fill(&mut processor, 0, &SIGNAL);

    processor.process(None);
    assert_eq!(buffer(&processor, 1), SIGNAL);
    assert_eq!(processor.remaining_command_count(), 0);
    assert_eq!(processor.processed_command_count(), 1);
}

#[test]
fn test_disabled_command_leaves_buffers() {
    let memory = memory();
    let mut processor = processor(&memory, &ManualClock::new());
    processor.initialize(list(2, &[(false, mix(0, 1))])).unwrap();
    fill(&mut processor, 0, &SIGNAL);

    processor.process(None);
    assert_eq!(buffer(&processor, 1), [0; 4]);
    assert_eq!(processor.processed_command_count(), 1);
    assert_eq!(processor.remaining_command_count(), 0);
}

#[test]
fn test_bad_magic_stops_list() {
    let memory = memory();
    let mut processor = processor(&memory, &ManualClock::new());
    let mut bytes = encode(2, &[(true, mix(0, 1)), (true, mix(0, 1)), (true, mix(0, 1))]);
    // Second record starts after the 20 byte list header and one 24 byte Mix
    bytes[44..48].copy_from_slice(&0u32.to_le_bytes());
    processor.initialize(bytes.into()).unwrap();
    fill(&mut processor, 0, &SIGNAL);

    processor.process(None);
    assert_eq!(processor.processed_command_count(), 1);
    assert_eq!(processor.remaining_command_count(), 0);
    assert_eq!(buffer(&processor, 1), SIGNAL);
}

#[test]
fn test_failed_verify_is_skipped() {
    let memory = memory();
    let mut processor = processor(&memory, &ManualClock::new());
    processor
        .initialize(list(2, &[(true, mix(0, 9)), (true, mix(0, 1))]))
        .unwrap();
    fill(&mut processor, 0, &SIGNAL);

    processor.process(None);
    assert_eq!(processor.processed_command_count(), 2);
    assert_eq!(buffer(&processor, 1), SIGNAL);
}

#[test]
fn test_invalid_lists_rejected() {
    let memory = memory();
    let mut processor = processor(&memory, &ManualClock::new());
    assert!(matches!(
        processor.initialize(vec![0u8; 10].into()),
        Err(WireError::TruncatedList(10))
    ));

    let writer = CommandListWriter::new(0x10000, 48_000, 1, 1);
    assert!(matches!(
        processor.initialize(writer.finish().into()),
        Err(WireError::InvalidListHeader { .. })
    ));
    assert_eq!(processor.remaining_command_count(), 0);
    assert_eq!(processor.process(None), 0);
}

#[test]
fn test_upload_and_copy() {
    let memory = memory();
    let mut processor = processor(&memory, &ManualClock::new());
    processor
        .initialize(list(
            3,
            &[
                (
                    true,
                    Command::Upload {
                        output: 0,
                        samples: vec![1, 2],
                    },
                ),
                (true, Command::Copy { input: 0, output: 2 }),
            ],
        ))
        .unwrap();
    fill(&mut processor, 0, &[9; 4]);

    processor.process(None);
    assert_eq!(buffer(&processor, 0), [1, 2, 0, 0]);
    assert_eq!(buffer(&processor, 2), [1, 2, 0, 0]);
}

#[test]
fn test_volume_ramp_in_place() {
    let memory = memory();
    let mut processor = processor(&memory, &ManualClock::new());
    processor
        .initialize(list(
            1,
            &[(
                true,
                Command::VolumeRamp {
                    input: 0,
                    output: 0,
                    prev_volume: 1.0,
                    volume: 0.0,
                },
            )],
        ))
        .unwrap();
    fill(&mut processor, 0, &[1000; 4]);

    processor.process(None);
    assert_eq!(buffer(&processor, 0), [1000, 750, 500, 250]);
}

#[test]
fn test_volume_ramp_extreme_volumes() {
    let memory = memory();
    let mut processor = processor(&memory, &ManualClock::new());
    processor
        .initialize(list(
            1,
            &[(
                true,
                Command::VolumeRamp {
                    input: 0,
                    output: 0,
                    prev_volume: -65536.0,
                    volume: 65536.0,
                },
            )],
        ))
        .unwrap();
    fill(&mut processor, 0, &[1000; 4]);

    processor.process(None);
    assert_eq!(processor.processed_command_count(), 1);
    assert_eq!(buffer(&processor, 0)[0], -65_536_000);
}

#[test]
fn test_mix_ramp_stores_last_sample() {
    let memory = memory();
    let mut processor = processor(&memory, &ManualClock::new());
    processor
        .initialize(list(
            2,
            &[(
                true,
                Command::MixRamp {
                    input: 0,
                    output: 1,
                    prev_volume: 0.0,
                    volume: 1.0,
                    previous_sample_address: RAMP_SAMPLE,
                },
            )],
        ))
        .unwrap();
    fill(&mut processor, 0, &[1000; 4]);

    processor.process(None);
    assert_eq!(buffer(&processor, 1), [0, 250, 500, 750]);
    let mut stored = [0i32; 1];
    memory.read_i32s(RAMP_SAMPLE, &mut stored).unwrap();
    assert_eq!(stored, [750]);
}

#[test]
fn test_biquad_state_lives_in_guest_memory() {
    let memory = memory();
    let mut processor = processor(&memory, &ManualClock::new());
    let biquad = |needs_init| Command::BiquadFilter {
        input: 0,
        output: 1,
        numerator: [0x4000, 0x4000, 0],
        denominator: [0, 0],
        needs_init,
        state_address: BIQUAD_STATE,
    };
    memory.write_pod(BIQUAD_STATE, &[77i64, 77]).unwrap();

    processor.initialize(list(2, &[(true, biquad(true))])).unwrap();
    fill(&mut processor, 0, &[2; 4]);
    processor.process(None);
    assert_eq!(buffer(&processor, 1), [1, 2, 2, 2]);
    assert_eq!(memory.read_pod::<[i64; 2]>(BIQUAD_STATE).unwrap(), [32768, 0]);

    processor.initialize(list(2, &[(true, biquad(false))])).unwrap();
    fill(&mut processor, 0, &[2; 4]);
    processor.process(None);
    assert_eq!(buffer(&processor, 1), [2; 4]);
}

#[test]
fn test_depop_decays_nonzero_buckets() {
    let memory = memory();
    let mut processor = processor(&memory, &ManualClock::new());
    memory.write_i32s(DEPOP, &[0, 1000]).unwrap();
    processor
        .initialize(list(
            2,
            &[(
                true,
                Command::DepopForMixBuffers {
                    input: 0,
                    count: 2,
                    decay: 0x7B29,
                    depop_buffer_address: DEPOP,
                },
            )],
        ))
        .unwrap();

    processor.process(None);
    assert_eq!(buffer(&processor, 0), [0; 4]);
    assert_eq!(buffer(&processor, 1), [962, 925, 890, 856]);
    let mut residue = [0i32; 2];
    memory.read_i32s(DEPOP, &mut residue).unwrap();
    assert_eq!(residue, [0, 856]);
}

#[test]
fn test_disabled_aux_passes_through() {
    let memory = memory();
    let mut processor = processor(&memory, &ManualClock::new());
    processor
        .initialize(list(
            2,
            &[(
                true,
                Command::Aux(AuxCommand {
                    input: 0,
                    output: 1,
                    ..Default::default()
                }),
            )],
        ))
        .unwrap();
    fill(&mut processor, 0, &SIGNAL);

    processor.process(None);
    assert_eq!(buffer(&processor, 1), SIGNAL);
}

#[test]
fn test_performance_entry_stamps() {
    let memory = memory();
    let clock = ManualClock::new();
    clock.set_auto_advance_ns(10_000);
    let mut processor = processor(&memory, &clock);
    let performance = |state, entry_address| Command::Performance {
        state,
        start_time_offset: 4,
        processed_time_offset: 8,
        entry_address,
    };
    processor
        .initialize(list(
            1,
            &[
                (true, performance(PerformanceState::Start, ENTRY)),
                (true, Command::ClearMixBuffer),
                (true, performance(PerformanceState::Stop, ENTRY)),
                (true, performance(PerformanceState::Stop, 0)),
            ],
        ))
        .unwrap();

    processor.process(None);
    assert_eq!(memory.read_u32(ENTRY).unwrap(), 0);
    assert_eq!(memory.read_u32(ENTRY + 4).unwrap(), 10);
    assert_eq!(memory.read_u32(ENTRY + 8).unwrap(), 10);
    assert_eq!(processor.remaining_command_count(), 0);
}

#[test]
fn test_device_sink_interleaves_and_clamps() {
    let memory = memory();
    let stream = SinkStream::new(&AudioConfig::default().sink);
    stream.start();
    let mut processor = CommandListProcessor::new(
        memory.clone(),
        Arc::new(ManualClock::new()),
        Some(stream.clone()),
    );
    processor
        .initialize(list(
            2,
            &[(
                true,
                Command::DeviceSink {
                    input_count: 2,
                    inputs: [0, 1, 0, 0, 0, 0],
                },
            )],
        ))
        .unwrap();
    fill(&mut processor, 0, &[1, 2, 3, 4]);
    fill(&mut processor, 1, &[40_000, -40_000, 5, 6]);

    processor.process(None);
    let mut out = [0i16; 8];
    assert_eq!(stream.reader().read(&mut out), 8);
    assert_eq!(out, [1, 32767, 2, -32768, 3, 5, 4, 6]);
}

#[test]
fn test_time_budget_resumes_list() {
    let memory = memory();
    let clock = ManualClock::new();
    clock.set_auto_advance_ns(100_000);
    let mut processor = processor(&memory, &clock);
    let commands: Vec<_> = (0..5).map(|_| (true, mix(0, 1))).collect();
    processor.initialize(list(2, &commands)).unwrap();
    fill(&mut processor, 0, &[1; 4]);

    // Each clock read costs 100us, so a 250us budget fits two commands
    processor.process(Some(250_000));
    assert_eq!(processor.remaining_command_count(), 3);
    assert_eq!(buffer(&processor, 1), [2; 4]);

    processor.process(Some(250_000));
    assert_eq!(processor.remaining_command_count(), 1);

    processor.process(Some(250_000));
    assert_eq!(processor.remaining_command_count(), 0);
    assert_eq!(processor.processed_command_count(), 5);
    assert_eq!(buffer(&processor, 1), [5; 4]);
}

// Render thread

#[test]
fn test_handshake_and_shutdown_echo() {
    let adsp = Adsp::new(memory(), Arc::new(ManualClock::new()), &AudioConfig::default());
    adsp.start().unwrap();
    assert!(adsp.is_running());
    assert_eq!(adsp.mailbox().adsp_sent_count(), 1);
    assert_eq!(adsp.mailbox().host_sent_count(), 1);

    adsp.start().unwrap();
    assert_eq!(adsp.mailbox().host_sent_count(), 1);

    adsp.stop();
    assert!(!adsp.is_running());
    assert_eq!(adsp.mailbox().adsp_sent_count(), 2);
    assert_eq!(adsp.mailbox().host_sent_count(), 2);
    assert!(adsp.mailbox().is_idle());

    adsp.stop();
    assert_eq!(adsp.mailbox().host_sent_count(), 2);
}

#[test]
fn test_render_reaches_sink() {
    let adsp = Adsp::new(memory(), Arc::new(ManualClock::new()), &AudioConfig::default());
    adsp.start().unwrap();
    let stream = adsp.sink_stream(0).unwrap().clone();
    stream.start();

    let commands = [
        (true, Command::ClearMixBuffer),
        (
            true,
            Command::Upload {
                output: 0,
                samples: SIGNAL.to_vec(),
            },
        ),
        (
            true,
            Command::Upload {
                output: 1,
                samples: vec![1, 2, 3, 4],
            },
        ),
        (
            true,
            Command::DeviceSink {
                input_count: 2,
                inputs: [0, 1, 0, 0, 0, 0],
            },
        ),
    ];
    adsp.send_command_buffer(
        0,
        CommandBuffer {
            buffer: Some(list(2, &commands)),
            time_limit: 2_304_000,
            ..Default::default()
        },
    )
    .unwrap();
    adsp.render();

    assert_eq!(adsp.remaining_command_count(0), 0);
    assert!(adsp.mailbox().command_buffer(0).buffer.is_none());
    let mut out = [0i16; 8];
    stream.reader().read(&mut out);
    assert_eq!(out, [100, 1, -100, 2, 32767, 3, -32768, 4]);

    assert!(adsp.send_command_buffer(2, CommandBuffer::default()).is_err());
}

#[test]
fn test_unexpected_message_is_ignored() {
    let adsp = Adsp::new(memory(), Arc::new(ManualClock::new()), &AudioConfig::default());
    adsp.start().unwrap();
    adsp.mailbox().host_send(RenderMessage::RenderResponse);
    adsp.render();
    assert_eq!(adsp.mailbox().adsp_sent_count(), 2);
}

fn budget_config() -> AudioConfig {
    let mut config = AudioConfig::default();
    config.renderer.enforce_time_budget = true;
    config
}

fn session(list: Arc<[u8]>, applet: u64) -> CommandBuffer {
    CommandBuffer {
        buffer: Some(list),
        time_limit: 1_000_000,
        applet_resource_user_id: applet,
        ..Default::default()
    }
}

#[test]
fn test_second_session_pays_for_first() {
    let clock = ManualClock::new();
    let adsp = Adsp::new(memory(), Arc::new(clock.clone()), &budget_config());
    adsp.start().unwrap();
    clock.set_auto_advance_ns(100_000);

    // Session 0: start read, three budget checks, end read = 400us
    adsp.send_command_buffer(0, session(clears(3), 7)).unwrap();
    adsp.send_command_buffer(1, session(clears(10), 7)).unwrap();
    adsp.render();

    assert_eq!(adsp.remaining_command_count(0), 0);
    assert_eq!(adsp.render_time_taken(0), 400_000);
    // 600us left for session 1 fits six commands
    assert_eq!(adsp.remaining_command_count(1), 4);

    // The deferred list resumes; the new list is ignored
    adsp.send_command_buffer(1, session(clears(1), 7)).unwrap();
    adsp.render();
    assert_eq!(adsp.remaining_command_count(1), 0);
}

#[test]
fn test_clear_remain_count_takes_next_list_fresh() {
    let clock = ManualClock::new();
    let adsp = Adsp::new(memory(), Arc::new(clock.clone()), &budget_config());
    adsp.start().unwrap();
    clock.set_auto_advance_ns(100_000);

    // 1ms at 100us per check runs ten of thirty
    adsp.send_command_buffer(0, session(clears(30), 7)).unwrap();
    adsp.render();
    assert_eq!(adsp.remaining_command_count(0), 20);

    adsp.clear_remain_count(0);
    adsp.send_command_buffer(0, session(clears(1), 7)).unwrap();
    adsp.render();
    assert_eq!(adsp.remaining_command_count(0), 0);
}

#[test]
fn test_other_applet_keeps_full_budget() {
    let clock = ManualClock::new();
    let adsp = Adsp::new(memory(), Arc::new(clock.clone()), &budget_config());
    adsp.start().unwrap();
    clock.set_auto_advance_ns(100_000);

    adsp.send_command_buffer(0, session(clears(3), 7)).unwrap();
    adsp.send_command_buffer(1, session(clears(10), 8)).unwrap();
    adsp.render();
    assert_eq!(adsp.remaining_command_count(1), 0);
}

#[test]
fn test_first_session_over_budget_floors_second() {
    let clock = ManualClock::new();
    let adsp = Adsp::new(memory(), Arc::new(clock.clone()), &budget_config());
    adsp.start().unwrap();
    clock.set_auto_advance_ns(400_000);

    // Session 0 takes 1.2ms for two commands, more than its 1ms
    adsp.send_command_buffer(0, session(clears(2), 7)).unwrap();
    adsp.send_command_buffer(1, session(clears(2), 7)).unwrap();
    adsp.render();
    assert_eq!(adsp.render_time_taken(0), 1_200_000);
    assert_eq!(adsp.remaining_command_count(1), 2);
}
