// SPDX-License-Identifier: MIT OR Apache-2.0

use gpu_playback::*;
use std::io::Write;
use std::sync::Arc;

/// Builds a synthetic 30 fps stream of `gops` closed GOPs with the decode
/// order I P B B and display order I B B P per GOP.
fn synthetic_video(gops: usize) -> Video {
    let fps = 30.0f32;
    let mut builder = VideoBuilder::new(640, 360).name("synthetic").num_dpb_slots(4);
    let sample = |frame_type, poc, gop: usize, display: usize| VideoSample {
        data: vec![0x42; 200],
        timestamp_seconds: display as f32 / fps,
        duration_seconds: 1.0 / fps,
        frame_type,
        reference_priority: if frame_type == FrameType::Bidirectional { 0 } else { 1 },
        poc,
        gop: gop as u32,
        display_order: display,
    };
    for g in 0..gops {
        let base = g * 4;
        builder = builder
            .sample(sample(FrameType::Intra, 0, g, base))
            .sample(sample(FrameType::Predicted, 3, g, base + 3))
            .sample(sample(FrameType::Bidirectional, 1, g, base + 1))
            .sample(sample(FrameType::Bidirectional, 2, g, base + 2));
    }
    builder.build().unwrap()
}

fn main() {
    let _time = std::time::Instant::now();

    let _ = simple_log::new(simple_log::LogConfig::default());

    let video = Arc::new(synthetic_video(15));
    println!(
        "video: {}x{} {} frames {:.2} fps crc32 {:08x}",
        video.width,
        video.height,
        video.catalog().len(),
        video.average_frames_per_second,
        video.bitstream_crc32
    );

    // Simulated hardware queue with one tick of decode latency.
    let mock = MockDevice::new(1);
    let state = mock.state();
    let mut device = DecodeDevice::new(mock);

    let mut instance = VideoInstance::new(video.clone(), InstanceConfig::default());
    instance.play();

    let dt = 1.0 / 30.0;
    let cmd = CommandList::default();
    let mut displayed = Vec::new();
    while instance.is_playing() {
        instance.update_video(&mut device, dt, cmd);
        instance.resolve_video_to_rgb(&mut device, cmd);
        if let Some(output) = instance.render_result() {
            if displayed.last() != output.display_order().as_ref() {
                displayed.push(output.display_order().unwrap());
            }
        }
    }

    let state = state.lock();
    println!("displayed {} frames: {:?}", displayed.len(), &displayed);
    println!(
        "submissions: {} session resets: {} textures: {} resolves: {}",
        state.submissions.len(),
        state.session_resets,
        state.textures_created,
        state.resolves
    );

    println!("Done in {:.3}s ", _time.elapsed().as_millis() as f64 / 1000.0);
    std::io::stdout().flush().unwrap();
}
