// SPDX-License-Identifier: MIT OR Apache-2.0

use gpu_playback::*;
use std::sync::Arc;

const FPS: f32 = 30.0;
const DT: f32 = 1.0 / FPS;

fn sample(
    frame_type: FrameType,
    poc: i32,
    gop: u32,
    display: usize,
    reference_priority: u8,
) -> VideoSample {
    VideoSample {
        data: vec![0x42; 64],
        timestamp_seconds: display as f32 / FPS,
        duration_seconds: DT,
        frame_type,
        reference_priority,
        poc,
        gop,
        display_order: display,
    }
}

/// Closed GOPs with decode order I P B B and display order I B B P.
fn ipbb_video(gops: usize, num_dpb_slots: usize) -> Arc<Video> {
    let mut builder = VideoBuilder::new(64, 48).num_dpb_slots(num_dpb_slots);
    for g in 0..gops {
        let base = g * 4;
        builder = builder
            .sample(sample(FrameType::Intra, 0, g as u32, base, 1))
            .sample(sample(FrameType::Predicted, 3, g as u32, base + 3, 1))
            .sample(sample(FrameType::Bidirectional, 1, g as u32, base + 1, 0))
            .sample(sample(FrameType::Bidirectional, 2, g as u32, base + 2, 0));
    }
    Arc::new(builder.build().unwrap())
}

fn all_intra_video(frames: usize, num_dpb_slots: usize) -> Arc<Video> {
    let mut builder = VideoBuilder::new(64, 48).num_dpb_slots(num_dpb_slots);
    for i in 0..frames {
        builder = builder.sample(sample(FrameType::Intra, 0, i as u32, i, 1));
    }
    Arc::new(builder.build().unwrap())
}

fn run_to_completion(
    instance: &mut VideoInstance,
    device: &mut DecodeDevice,
    max_updates: usize,
) -> Vec<usize> {
    let mut displayed = Vec::new();
    for _ in 0..max_updates {
        if !instance.is_playing() {
            break;
        }
        instance.update_video(device, DT, CommandList::default());
        instance.resolve_video_to_rgb(device, CommandList::default());
        if let Some(output) = instance.render_result() {
            let order = output.display_order().unwrap();
            if displayed.last() != Some(&order) {
                displayed.push(order);
            }
        }
    }
    displayed
}

// B frames decode after the later-displaying P they depend on, yet display
// order never regresses, even with simulated decode latency.
#[test]
fn b_frame_reordering_with_async_decode() {
    let video = ipbb_video(2, 4);
    let mock = MockDevice::new(2);
    let state = mock.state();
    let mut device = DecodeDevice::new(mock);
    let mut instance = VideoInstance::new(video, InstanceConfig::default());
    instance.play();

    let displayed = run_to_completion(&mut instance, &mut device, 100);
    assert_eq!(displayed, vec![0, 1, 2, 3, 4, 5, 6, 7]);

    let state = state.lock();
    // Decode submissions stay in decode order: each B is submitted only
    // after both of its reference anchors.
    assert_eq!(state.submissions, vec![0, 1, 2, 3, 4, 5, 6, 7]);
    assert_eq!(state.session_resets, 1);
}

#[test]
fn displayed_sequence_is_complete_without_latency() {
    let video = ipbb_video(3, 4);
    let mut device = DecodeDevice::null();
    let mut instance = VideoInstance::new(video, InstanceConfig::default());
    instance.play();
    let displayed = run_to_completion(&mut instance, &mut device, 50);
    assert_eq!(displayed, (0..12).collect::<Vec<_>>());
}

// A stream needing more live references than the DPB has slots triggers a
// decoder reset and playback resumes at the next intra frame, without any
// error escaping update_video.
#[test]
fn slot_exhaustion_resynchronizes_at_next_intra() {
    let video = Arc::new(
        VideoBuilder::new(64, 48)
            .num_dpb_slots(1)
            .sample(sample(FrameType::Intra, 0, 0, 0, 1))
            .sample(sample(FrameType::Predicted, 1, 0, 1, 1))
            .sample(sample(FrameType::Predicted, 2, 0, 2, 1))
            .sample(sample(FrameType::Intra, 0, 1, 3, 1))
            .sample(sample(FrameType::Intra, 1, 1, 4, 1))
            .build()
            .unwrap(),
    );
    let mock = MockDevice::new(0);
    let state = mock.state();
    let mut device = DecodeDevice::new(mock);
    let mut instance = VideoInstance::new(video, InstanceConfig::default());
    instance.play();

    let displayed = run_to_completion(&mut instance, &mut device, 50);
    // Frames 1 and 2 are skipped; decode resumes at the intra with display 3.
    assert_eq!(displayed, vec![0, 3, 4]);
    assert!(!instance.is_playing());

    let state = state.lock();
    assert_eq!(state.submissions, vec![0, 3, 4]);
    // Start of stream plus the error resync.
    assert!(state.session_resets >= 2);
}

// Looped playback wraps cleanly: display orders repeat 0..N-1 without
// skipping or duplicating frame 0.
#[test]
fn looped_playback_wraps_cleanly() {
    let video = all_intra_video(5, 2);
    let mut device = DecodeDevice::null();
    let mut instance = VideoInstance::new(video, InstanceConfig::default());
    instance.set_looped(true);
    instance.play();

    let mut displayed = Vec::new();
    for _ in 0..15 {
        instance.update_video(&mut device, DT, CommandList::default());
        displayed.push(instance.render_result().unwrap().display_order().unwrap());
    }
    assert_eq!(displayed, vec![0, 1, 2, 3, 4, 0, 1, 2, 3, 4, 0, 1, 2, 3, 4]);
    assert!(instance.is_playing());
}

#[test]
fn decode_cursor_monotonic_across_loop_wrap() {
    let video = ipbb_video(2, 4);
    let mut device = DecodeDevice::null();
    let mut instance = VideoInstance::new(video, InstanceConfig::default());
    instance.set_looped(true);
    instance.play();

    let mut last_frame = 0;
    let mut wraps = 0;
    for _ in 0..40 {
        instance.update_video(&mut device, DT, CommandList::default());
        let frame = instance.current_frame();
        if frame < last_frame {
            // Only a loop rewind may move the cursor backwards, and it
            // always lands on the intra frame at index 0.
            wraps += 1;
            assert_eq!(instance.video().catalog().get(frame).unwrap().frame_type, FrameType::Intra);
        }
        last_frame = frame;
    }
    assert!(wraps >= 1);
}

// Two instances share one immutable video and one device without
// interfering with each other's cursors.
#[test]
fn independent_instances_share_one_video() {
    let video = all_intra_video(6, 2);
    let device = parking_lot::Mutex::new(DecodeDevice::null());
    let mut a = VideoInstance::new(video.clone(), InstanceConfig::default());
    let mut b = VideoInstance::new(video, InstanceConfig::default());
    a.play();
    b.play();

    // B starts three ticks late.
    for tick in 0..12 {
        {
            let mut dev = device.lock();
            a.update_video(&mut dev, DT, CommandList::default());
        }
        if tick >= 3 {
            let mut dev = device.lock();
            b.update_video(&mut dev, DT, CommandList::default());
        }
    }
    assert!(!a.is_playing());
    assert_eq!(a.target_display_order(), 5);
    assert_eq!(b.target_display_order(), 5);
}

#[test]
fn decoding_required_tracks_playback_state() {
    let video = all_intra_video(4, 1);
    let mut device = DecodeDevice::null();
    let mut instance = VideoInstance::new(video, InstanceConfig::default());
    assert!(!instance.is_decoding_required(DT));
    instance.play();
    assert!(instance.is_decoding_required(DT));
    assert!(any_decoding_required(std::slice::from_ref(&instance), DT));
    run_to_completion(&mut instance, &mut device, 20);
    assert!(!instance.is_decoding_required(DT));
}
