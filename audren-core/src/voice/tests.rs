use super::*;
use crate::behavior::revision_magic;

fn pcm_buffer(address: u64, samples: i32) -> WaveBuffer {
    WaveBuffer {
        buffer_address: address,
        buffer_size: samples as u64 * 2,
        start_sample_offset: 0,
        end_sample_offset: samples,
        sent_to_server: false,
        ..Default::default()
    }
}

fn playing_voice() -> VoiceParameter {
    let mut param = VoiceParameter {
        id: 0,
        is_new: true,
        in_use: true,
        play_state: PlayState::Started,
        volume: 0.5,
        mix_id: 0,
        ..Default::default()
    };
    param.wave_buffers[0] = pcm_buffer(0x1000, 480);
    param
}

/// Same voice on the next update: nothing new queued
fn followup(mut param: VoiceParameter) -> VoiceParameter {
    param.is_new = false;
    for wb in &mut param.wave_buffers {
        wb.sent_to_server = true;
    }
    param
}

fn generate(ctx: &mut VoiceContext, index: usize) -> bool {
    let VoiceContext {
        infos,
        resources,
        states,
        ..
    } = ctx;
    infos[index].update_for_command_generation(states, resources)
}

#[test]
fn test_new_voice_plays() {
    let mut ctx = VoiceContext::new(2);
    let behavior = BehaviorInfo::default();
    ctx.update_voice(0, &playing_voice(), &behavior).unwrap();

    assert!(generate(&mut ctx, 0));
    let info = ctx.info(0).unwrap();
    assert_eq!(info.current_play_state, ServerPlayState::Play);
    assert_eq!(info.last_volume, 0.5);
    assert!(!info.should_depop);
    assert!(info.wave_buffers[0].sent_to_dsp);

    let state = ctx.state(0).unwrap();
    assert_eq!(state.wave_buffer_valid, [true, false, false, false]);
}

#[test]
fn test_stop_passes_through_request_stop() {
    let mut ctx = VoiceContext::new(1);
    let behavior = BehaviorInfo::default();
    let param = playing_voice();
    ctx.update_voice(0, &param, &behavior).unwrap();
    generate(&mut ctx, 0);
    ctx.state_mut(0).unwrap().offset = 100;

    let mut stop = followup(param);
    stop.play_state = PlayState::Stopped;
    ctx.update_voice(0, &stop, &behavior).unwrap();
    assert_eq!(ctx.info(0).unwrap().current_play_state, ServerPlayState::RequestStop);

    // Stopping a playing voice needs one depop frame
    assert!(generate(&mut ctx, 0));
    let info = ctx.info(0).unwrap();
    assert_eq!(info.current_play_state, ServerPlayState::Stop);
    assert!(info.should_depop);

    let state = ctx.state(0).unwrap();
    assert!(!state.has_valid_wave_buffer());
    assert_eq!(state.wave_buffer_consumed, 1);
    assert_eq!(state.wave_buffer_index, 1);
    assert_eq!(state.offset, 0);

    // Already stopped: nothing further
    ctx.update_voice(0, &stop, &behavior).unwrap();
    assert!(!generate(&mut ctx, 0));
    assert!(!ctx.info(0).unwrap().should_depop);
}

#[test]
fn test_pause_depops_once() {
    let mut ctx = VoiceContext::new(1);
    let behavior = BehaviorInfo::default();
    let param = playing_voice();
    ctx.update_voice(0, &param, &behavior).unwrap();
    generate(&mut ctx, 0);

    let mut pause = followup(param);
    pause.play_state = PlayState::Paused;
    ctx.update_voice(0, &pause, &behavior).unwrap();
    assert!(generate(&mut ctx, 0));
    assert!(ctx.info(0).unwrap().should_depop);

    ctx.update_voice(0, &pause, &behavior).unwrap();
    assert!(!generate(&mut ctx, 0));
    // Paused keeps the queue
    assert!(ctx.state(0).unwrap().has_valid_wave_buffer());
}

#[test]
fn test_sort_by_priority_then_id() {
    let mut ctx = VoiceContext::new(3);
    let behavior = BehaviorInfo::default();
    for (index, (id, priority)) in [(5, 1), (2, 0), (1, 1)].into_iter().enumerate() {
        let param = VoiceParameter {
            id,
            priority,
            ..playing_voice()
        };
        ctx.update_voice(index, &param, &behavior).unwrap();
    }
    ctx.sort_info();
    let order: Vec<usize> = (0..3).map(|i| ctx.sorted_index(i).unwrap()).collect();
    assert_eq!(order, [1, 2, 0]);
}

#[test]
fn test_equal_priority_sorts_by_sorting_order() {
    let mut ctx = VoiceContext::new(3);
    let behavior = BehaviorInfo::default();
    for (index, (id, sorting_order)) in [(1, 2), (2, 0), (3, 2)].into_iter().enumerate() {
        let param = VoiceParameter {
            id,
            priority: 1,
            sorting_order,
            ..playing_voice()
        };
        ctx.update_voice(index, &param, &behavior).unwrap();
    }
    ctx.sort_info();
    let order: Vec<usize> = (0..3).map(|i| ctx.sorted_index(i).unwrap()).collect();
    assert_eq!(order, [1, 0, 2]);
}

#[test]
fn test_flush_drops_from_head() {
    let mut ctx = VoiceContext::new(1);
    let behavior = BehaviorInfo::default();
    let mut param = playing_voice();
    param.wave_buffers[1] = pcm_buffer(0x2000, 480);
    ctx.update_voice(0, &param, &behavior).unwrap();
    generate(&mut ctx, 0);

    let mut flush = followup(param);
    flush.flush_wave_buffer_count = 1;
    ctx.update_voice(0, &flush, &behavior).unwrap();
    generate(&mut ctx, 0);

    let state = ctx.state(0).unwrap();
    assert_eq!(state.wave_buffer_valid, [false, true, false, false]);
    assert_eq!(state.wave_buffer_consumed, 1);
    assert_eq!(state.wave_buffer_index, 1);
}

#[test]
fn test_flush_ignored_on_old_revision() {
    let mut ctx = VoiceContext::new(1);
    let behavior = BehaviorInfo::from_magic(revision_magic(4)).unwrap();
    let mut param = playing_voice();
    param.flush_wave_buffer_count = 1;
    ctx.update_voice(0, &param, &behavior).unwrap();
    generate(&mut ctx, 0);
    assert_eq!(ctx.state(0).unwrap().wave_buffer_consumed, 0);
}

#[test]
fn test_revision_gates_routing_and_flags() {
    let mut ctx = VoiceContext::new(1);
    let behavior = BehaviorInfo::from_magic(revision_magic(1)).unwrap();
    let param = VoiceParameter {
        splitter_info_id: 0,
        behavior_flags: BehaviorFlags::all(),
        ..playing_voice()
    };
    ctx.update_voice(0, &param, &behavior).unwrap();
    let info = ctx.info(0).unwrap();
    assert!(!info.has_splitter_route());
    assert!(info.params.behavior_flags.is_empty());
}

#[test]
fn test_invalid_pcm_offsets_rejected() {
    let mut ctx = VoiceContext::new(1);
    let behavior = BehaviorInfo::default();
    let mut param = playing_voice();
    param.wave_buffers[0].end_sample_offset = 481;
    ctx.update_voice(0, &param, &behavior).unwrap();
    assert!(!generate(&mut ctx, 0));
    assert!(!ctx.state(0).unwrap().has_valid_wave_buffer());
}

#[test]
fn test_bad_channel_resource_rejected() {
    let mut ctx = VoiceContext::new(2);
    let behavior = BehaviorInfo::default();
    let mut param = playing_voice();
    param.channel_count = 2;
    param.voice_channel_resource_ids[1] = 7;
    assert!(matches!(
        ctx.update_voice(0, &param, &behavior),
        Err(RendererError::OutOfRange { index: 7, .. })
    ));
    assert!(ctx.update_voice(3, &playing_voice(), &behavior).is_err());
}

#[test]
fn test_new_voice_resets_state() {
    let mut ctx = VoiceContext::new(1);
    let behavior = BehaviorInfo::default();
    ctx.state_mut(0).unwrap().played_sample_count = 99;
    ctx.state_mut(0).unwrap().fraction = 0x1234;
    ctx.update_voice(0, &playing_voice(), &behavior).unwrap();
    generate(&mut ctx, 0);
    let state = ctx.state(0).unwrap();
    assert_eq!(state.played_sample_count, 0);
    assert_eq!(state.fraction, 0);
    assert!(state.has_valid_wave_buffer());
}

#[test]
fn test_out_status_reports_first_channel() {
    let mut ctx = VoiceContext::new(1);
    let behavior = BehaviorInfo::default();
    ctx.update_voice(0, &playing_voice(), &behavior).unwrap();
    generate(&mut ctx, 0);
    ctx.state_mut(0).unwrap().played_sample_count = 240;
    assert_eq!(
        ctx.out_status(0),
        VoiceOutStatus {
            played_sample_count: 240,
            wave_buffer_consumed: 0,
            voice_dropped: false,
        }
    );
    assert_eq!(ctx.out_status(5), VoiceOutStatus::default());
}

#[test]
fn test_channel_resource_update() {
    let mut ctx = VoiceContext::new(1);
    let mut mix_volume = [0.0; MAX_MIX_BUFFERS];
    mix_volume[1] = 0.75;
    ctx.update_channel_resource(&VoiceChannelResourceParameter {
        id: 0,
        mix_volume,
        in_use: true,
    })
    .unwrap();
    let resource = ctx.channel_resource(0).unwrap();
    assert_eq!(resource.mix_volume()[1], 0.75);
    assert_eq!(resource.last_mix_volume()[1], 0.0);
    assert!(
        ctx.update_channel_resource(&VoiceChannelResourceParameter {
            id: 4,
            mix_volume,
            in_use: true,
        })
        .is_err()
    );
}
