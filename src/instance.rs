// SPDX-License-Identifier: MIT OR Apache-2.0

use std::sync::Arc;

use crate::catalog::ReferenceSet;
use crate::device::{CommandList, DecodeDevice, DecodeOperation, TextureHandle};
use crate::dpb::{Dpb, SlotId};
use crate::output_pool::{OutputFramePool, OutputTexture};
use crate::types::VideoError;
use crate::video::Video;

/// Playback state bits, named instead of packed.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaybackFlags {
    pub playing: bool,
    pub looped: bool,
    pub mipmapped: bool,
    /// The current output still holds a decoder-native surface and needs a
    /// color-space pass before compositing.
    pub needs_resolve: bool,
    pub first_frame_decoded: bool,
    /// The next decode submission must tell the hardware session to discard
    /// in-flight state.
    pub decoder_reset: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct InstanceConfig {
    /// Eviction lookahead window in frames; defaults to the stream's DPB
    /// slot count.
    pub lookahead: Option<usize>,
    /// Output texture cap; defaults to the stream's reorder depth plus two
    /// (one queued frame per reorder step, plus the promoted output).
    pub output_pool_cap: Option<usize>,
    pub playback_speed: f32,
    pub mipmapped: bool,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self { lookahead: None, output_pool_cap: None, playback_speed: 1.0, mipmapped: false }
    }
}

#[derive(Debug, Clone, Copy)]
struct PendingDecode {
    slot: SlotId,
    decode_index: usize,
    display_order: usize,
    refs: ReferenceSet,
}

/// Per-playback mutable state over one shared, immutable [`Video`].
///
/// Decode order and display order advance at different speeds: the decode
/// cursor runs ahead so that bidirectional frames are decoded before the
/// earlier-displaying frames that depend on them, while the playback clock
/// promotes one picture at a time in presentation order. Recoverable decode
/// anomalies never escape [`update_video`](Self::update_video); they reset
/// the decoder and resume at the next intra frame.
pub struct VideoInstance {
    video: Arc<Video>,
    dpb: Dpb,
    pool: OutputFramePool<TextureHandle>,
    output: Option<OutputTexture<TextureHandle>>,
    pending: Vec<PendingDecode>,
    pub flags: PlaybackFlags,
    target_display_order: usize,
    current_frame: usize,
    time_until_next_frame: f32,
    lookahead: usize,
    speed: f32,
}

impl VideoInstance {
    pub fn new(video: Arc<Video>, config: InstanceConfig) -> Self {
        let lookahead = config.lookahead.unwrap_or(video.num_dpb_slots);
        let pool_cap = config
            .output_pool_cap
            .unwrap_or(video.catalog().max_reorder_depth() + 2);
        Self {
            dpb: Dpb::new(video.num_dpb_slots),
            pool: OutputFramePool::new(pool_cap),
            output: None,
            pending: Vec::new(),
            flags: PlaybackFlags { mipmapped: config.mipmapped, decoder_reset: true, ..PlaybackFlags::default() },
            target_display_order: 0,
            current_frame: 0,
            time_until_next_frame: 0.0,
            lookahead,
            speed: if config.playback_speed > 0.0 { config.playback_speed } else { 1.0 },
            video,
        }
    }

    pub fn video(&self) -> &Arc<Video> {
        &self.video
    }

    pub fn play(&mut self) {
        self.flags.playing = true;
    }

    pub fn pause(&mut self) {
        self.flags.playing = false;
    }

    /// Stops playback and rewinds all decode and display state.
    pub fn stop(&mut self) {
        self.flags.playing = false;
        self.rewind();
    }

    pub fn set_looped(&mut self, looped: bool) {
        self.flags.looped = looped;
    }

    pub fn is_playing(&self) -> bool {
        self.flags.playing
    }

    pub fn target_display_order(&self) -> usize {
        self.target_display_order
    }

    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    pub fn time_until_next_frame(&self) -> f32 {
        self.time_until_next_frame
    }

    /// The currently displayable picture. Valid for the current composed
    /// frame only; it is re-published every tick until the playback clock
    /// advances.
    pub fn render_result(&self) -> Option<&OutputTexture<TextureHandle>> {
        self.output.as_ref()
    }

    /// Jumps to the nearest intra frame at or before `seconds`, since decode
    /// can only resume cleanly at an intra frame. Clears all slot and
    /// reorder state and tells the hardware session to reset.
    pub fn seek(&mut self, seconds: f32) {
        let catalog = self.video.catalog();
        let decode_index = catalog.intra_at_or_before(seconds);
        let display = catalog
            .get(decode_index)
            .map(|f| f.display_order)
            .unwrap_or(0);
        log::debug!("Seek to {seconds:.3}s: intra frame {decode_index} (display {display})");
        self.dpb.reset();
        self.pending.clear();
        self.pool.recycle_all_used();
        self.current_frame = decode_index;
        self.target_display_order = display;
        self.time_until_next_frame = 0.0;
        self.flags.decoder_reset = true;
        self.flags.first_frame_decoded = false;
    }

    /// Whether the owner should spend a decode call on this instance this
    /// tick: the playback clock is about to expire, the first frame is not
    /// up yet, or there is decode-ahead work and room to buffer it.
    pub fn is_decoding_required(&self, dt: f32) -> bool {
        if !self.flags.playing {
            return false;
        }
        if !self.flags.first_frame_decoded {
            return true;
        }
        if self.time_until_next_frame - dt <= 0.0 {
            return true;
        }
        self.pool.spare_capacity() > 0 && self.has_decode_work()
    }

    /// Runs one scheduler transition: drains finished decodes into the
    /// output pool, submits the decodes the target display frame needs, and
    /// promotes the next presentation-order picture once the clock expires.
    pub fn update_video(&mut self, device: &mut DecodeDevice, dt: f32, cmd: CommandList) {
        if !self.flags.playing {
            return;
        }
        self.time_until_next_frame -= dt;

        self.drain_completions(device, cmd);
        self.submit_decodes(device, cmd);
        self.drain_completions(device, cmd);

        if self.time_until_next_frame <= 0.0 {
            self.try_promote();
        }
    }

    /// Color-converts the current output if it still needs it. A separate
    /// pass because it records onto the graphics queue, not the decode
    /// queue.
    pub fn resolve_video_to_rgb(&mut self, device: &mut DecodeDevice, cmd: CommandList) {
        if !self.flags.needs_resolve {
            return;
        }
        let Some(output) = self.output.as_mut() else {
            self.flags.needs_resolve = false;
            return;
        };
        match device.resolve_to_rgb(output, cmd) {
            Ok(()) => self.flags.needs_resolve = false,
            Err(e) => log::error!("RGB resolve failed: {e}"),
        }
    }

    fn has_decode_work(&self) -> bool {
        if !self.pending.is_empty() {
            return true;
        }
        match self.needed_decode_index() {
            Some(needed) => self.current_frame <= needed,
            None => false,
        }
    }

    /// Highest decode index that must be submitted before the target display
    /// frame can be shown. Decode order is strictly forward, so everything
    /// up to the mapped index is needed.
    fn needed_decode_index(&self) -> Option<usize> {
        self.video
            .catalog()
            .decode_index_for_display(self.target_display_order)
            .ok()
    }

    fn submit_decodes(&mut self, device: &mut DecodeDevice, cmd: CommandList) {
        let mut resynced = false;
        loop {
            let Some(needed) = self.needed_decode_index() else { break };
            if self.current_frame > needed || self.current_frame >= self.video.catalog().len() {
                break;
            }
            let frame = match self.video.catalog().get(self.current_frame) {
                Ok(f) => *f,
                Err(e) => {
                    log::error!("Frame lookup failed: {e}");
                    break;
                }
            };
            match self.dpb.acquire_slot_for_decode(
                self.video.catalog(),
                self.current_frame,
                self.lookahead,
            ) {
                Ok((slot, refs)) => {
                    let op = DecodeOperation {
                        slot,
                        stream: self.video.bitstream(),
                        stream_offset: frame.offset,
                        stream_size: frame.size,
                        frame_index: self.current_frame,
                        poc: frame.poc,
                        session_reset: self.flags.decoder_reset,
                    };
                    if let Err(e) = device.submit_decode(&op, cmd) {
                        log::error!("Decode submission failed: {e}");
                        break;
                    }
                    self.flags.decoder_reset = false;
                    self.pending.push(PendingDecode {
                        slot,
                        decode_index: self.current_frame,
                        display_order: frame.display_order,
                        refs,
                    });
                    self.current_frame += 1;
                }
                Err(
                    e @ (VideoError::MissingReference { .. } | VideoError::SlotExhaustion { .. }),
                ) => {
                    // Malformed or under-provisioned stream. Drop all slot
                    // state and resume at the next intra frame; one resync
                    // attempt per tick keeps this loop bounded.
                    log::warn!("{e}; resetting decoder");
                    if resynced {
                        break;
                    }
                    resynced = true;
                    self.reset_decoder_state();
                    if !self.flags.playing {
                        break;
                    }
                }
                Err(e) => {
                    log::error!("Slot acquisition failed: {e}");
                    break;
                }
            }
        }
    }

    fn drain_completions(&mut self, device: &mut DecodeDevice, cmd: CommandList) {
        let mut i = 0;
        while i < self.pending.len() {
            let p = self.pending[i];
            if !device.is_slot_ready(p.slot) {
                i += 1;
                continue;
            }
            let Some(mut texture) = self.acquire_output_texture(device) else {
                // Pool at cap: leave the picture in its slot and retry next
                // tick once the renderer hands a texture back.
                i += 1;
                continue;
            };
            self.dpb.complete_decode(p.slot, &p.refs);
            if let Err(e) = device.copy_slot_to_output(p.slot, &mut texture, cmd) {
                log::error!("Output copy failed for frame {}: {e}", p.decode_index);
                self.pool.recycle(texture);
            } else if self.pool.publish(texture, p.display_order).is_ok() {
                self.flags.first_frame_decoded = true;
            }
            self.pending.swap_remove(i);
        }
    }

    fn acquire_output_texture(
        &mut self,
        device: &mut DecodeDevice,
    ) -> Option<OutputTexture<TextureHandle>> {
        if let Some(texture) = self.pool.pop_free() {
            return Some(texture);
        }
        if !self.pool.can_allocate() {
            return None;
        }
        match device.create_output_texture(
            self.video.padded_width,
            self.video.padded_height,
            self.flags.mipmapped,
        ) {
            Ok(texture) => {
                self.pool.note_allocated();
                Some(texture)
            }
            Err(e) => {
                log::error!("Output texture creation failed: {e}");
                None
            }
        }
    }

    fn try_promote(&mut self) {
        let catalog = self.video.catalog();
        let Some(texture) = self.pool.take_display(self.target_display_order) else {
            return;
        };
        if let Some(previous) = self.output.take() {
            self.pool.recycle(previous);
        }
        let duration = self
            .needed_decode_index()
            .and_then(|i| catalog.get(i).ok())
            .map(|f| f.duration_seconds)
            .unwrap_or(0.0);
        self.output = Some(texture);
        self.flags.needs_resolve = true;
        self.time_until_next_frame = duration / self.speed;

        if self.target_display_order + 1 < catalog.len() {
            self.target_display_order += 1;
        } else if self.flags.looped {
            log::debug!("Loop wrap, restarting decode at frame 0");
            self.rewind();
        } else {
            // Stream ends: hold the last picture as output.
            self.flags.playing = false;
        }
    }

    fn rewind(&mut self) {
        self.dpb.reset();
        self.pending.clear();
        self.pool.recycle_all_used();
        self.current_frame = 0;
        self.target_display_order = 0;
        self.flags.decoder_reset = true;
    }

    /// Error recovery: drop slot state and resynchronize at the next intra
    /// frame, or stop if none remains.
    fn reset_decoder_state(&mut self) {
        self.dpb.reset();
        self.pending.clear();
        let catalog = self.video.catalog();
        match catalog.next_intra_at_or_after(self.current_frame) {
            Some(intra) => {
                let display = catalog.get(intra).map(|f| f.display_order).unwrap_or(0);
                log::debug!("Resynchronizing at intra frame {intra} (display {display})");
                self.current_frame = intra;
                self.target_display_order = display;
                self.pool.recycle_used_before(display);
                self.flags.decoder_reset = true;
            }
            None => {
                log::debug!("No intra frame left to resynchronize at; stopping");
                self.flags.playing = false;
            }
        }
    }
}

/// True when any instance wants a decode call this tick. Convenience for
/// owners driving several videos from one loop.
pub fn any_decoding_required(instances: &[VideoInstance], dt: f32) -> bool {
    instances.iter().any(|i| i.is_decoding_required(dt))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FrameType;
    use crate::video::{VideoBuilder, VideoSample};

    fn intra_video(frames: usize, fps: f32, num_dpb_slots: usize) -> Arc<Video> {
        let mut builder = VideoBuilder::new(64, 48).num_dpb_slots(num_dpb_slots);
        for i in 0..frames {
            builder = builder.sample(VideoSample {
                data: vec![1; 32],
                timestamp_seconds: i as f32 / fps,
                duration_seconds: 1.0 / fps,
                frame_type: FrameType::Intra,
                reference_priority: 1,
                poc: i as i32,
                gop: i as u32,
                display_order: i,
            });
        }
        Arc::new(builder.build().unwrap())
    }

    // Scenario: 10 all-intra frames at 30 fps through a single decode slot.
    #[test]
    fn all_intra_single_slot_advances_every_tick() {
        let video = intra_video(10, 30.0, 1);
        let mut instance = VideoInstance::new(video, InstanceConfig::default());
        let mut device = DecodeDevice::null();
        instance.play();

        let dt = 1.0 / 30.0;
        let mut observed = Vec::new();
        for _ in 0..10 {
            instance.update_video(&mut device, dt, CommandList::default());
            observed.push(instance.target_display_order());
        }
        assert_eq!(observed, vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 9]);
        assert!(!instance.is_playing());
        // Last frame stays up after the stream ends.
        assert_eq!(instance.render_result().unwrap().display_order(), Some(9));
    }

    #[test]
    fn decode_cursor_is_monotonic() {
        let video = intra_video(10, 30.0, 2);
        let mut instance = VideoInstance::new(video, InstanceConfig::default());
        let mut device = DecodeDevice::null();
        instance.play();

        let mut last = 0;
        for _ in 0..20 {
            instance.update_video(&mut device, 1.0 / 30.0, CommandList::default());
            assert!(instance.current_frame() >= last);
            last = instance.current_frame();
        }
    }

    #[test]
    fn pause_freezes_all_cursors() {
        let video = intra_video(10, 30.0, 2);
        let mut instance = VideoInstance::new(video, InstanceConfig::default());
        let mut device = DecodeDevice::null();
        instance.play();
        instance.update_video(&mut device, 1.0 / 30.0, CommandList::default());
        instance.pause();
        let frame = instance.current_frame();
        let target = instance.target_display_order();
        for _ in 0..5 {
            assert!(!instance.is_decoding_required(1.0 / 30.0));
            instance.update_video(&mut device, 1.0 / 30.0, CommandList::default());
        }
        assert_eq!(instance.current_frame(), frame);
        assert_eq!(instance.target_display_order(), target);
    }

    #[test]
    fn stop_rewinds() {
        let video = intra_video(10, 30.0, 2);
        let mut instance = VideoInstance::new(video, InstanceConfig::default());
        let mut device = DecodeDevice::null();
        instance.play();
        for _ in 0..3 {
            instance.update_video(&mut device, 1.0 / 30.0, CommandList::default());
        }
        instance.stop();
        assert_eq!(instance.current_frame(), 0);
        assert_eq!(instance.target_display_order(), 0);
        assert!(!instance.is_playing());
    }

    // Scenario: seek mid-playback lands on the nearest preceding intra.
    #[test]
    fn seek_lands_on_intra_and_clears_state() {
        let fps = 1.0;
        let video = intra_video(10, fps, 2);
        let mut instance = VideoInstance::new(video, InstanceConfig::default());
        let mut device = DecodeDevice::null();
        instance.play();
        for _ in 0..3 {
            instance.update_video(&mut device, 1.0 / fps, CommandList::default());
        }
        instance.seek(5.5);
        assert_eq!(instance.current_frame(), 5);
        assert_eq!(instance.target_display_order(), 5);
        assert!(instance.flags.decoder_reset);
        // Playback resumes from the seek point.
        instance.update_video(&mut device, 1.0 / fps, CommandList::default());
        assert_eq!(instance.target_display_order(), 6);
    }

    #[test]
    fn resolve_runs_once_per_promoted_frame() {
        let video = intra_video(4, 30.0, 1);
        let mut instance = VideoInstance::new(video, InstanceConfig::default());
        let mut device = DecodeDevice::null();
        instance.play();
        instance.update_video(&mut device, 1.0 / 30.0, CommandList::default());
        assert!(instance.flags.needs_resolve);
        instance.resolve_video_to_rgb(&mut device, CommandList::default());
        assert!(!instance.flags.needs_resolve);
        instance.resolve_video_to_rgb(&mut device, CommandList::default());
        assert!(!instance.flags.needs_resolve);
    }
}
