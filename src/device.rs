// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::dpb::SlotId;
use crate::output_pool::OutputTexture;
use crate::types::VideoError;

/// Opaque command-recording handle passed through to decode submissions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandList(pub u32);

/// Opaque device texture handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureHandle(pub u64);

/// One decode submission: which slot to decode into and where the frame's
/// payload lives inside the packed bitstream.
#[derive(Debug)]
pub struct DecodeOperation<'a> {
    pub slot: SlotId,
    pub stream: &'a [u8],
    pub stream_offset: u64,
    pub stream_size: u64,
    pub frame_index: usize,
    pub poc: i32,
    /// Tells the hardware session to discard in-flight state before this
    /// frame (start of stream, seek, loop wrap, error resync).
    pub session_reset: bool,
}

/// The seam to the GPU video decode backend. Decode executes asynchronously
/// on a hardware queue; completion is observed by polling `is_slot_ready`.
#[enum_dispatch::enum_dispatch(DeviceBackend)]
pub trait DeviceInterface {
    fn create_output_texture(
        &mut self,
        width: u32,
        height: u32,
        srgb: bool,
    ) -> Result<OutputTexture<TextureHandle>, VideoError>;
    fn submit_decode(&mut self, op: &DecodeOperation, cmd: CommandList) -> Result<(), VideoError>;
    fn is_slot_ready(&mut self, slot: SlotId) -> bool;
    fn copy_slot_to_output(
        &mut self,
        slot: SlotId,
        output: &mut OutputTexture<TextureHandle>,
        cmd: CommandList,
    ) -> Result<(), VideoError>;
    /// Color-converts the decoder-native (e.g. NV12) picture in `output`
    /// into an RGB-sampling-ready view.
    fn resolve_to_rgb(
        &mut self,
        output: &mut OutputTexture<TextureHandle>,
        cmd: CommandList,
    ) -> Result<(), VideoError>;
}

pub struct DecodeDevice {
    inner: DeviceBackend,
}

impl DecodeDevice {
    pub fn new<B: Into<DeviceBackend>>(backend: B) -> Self {
        Self { inner: backend.into() }
    }

    pub fn null() -> Self {
        Self::new(NullDevice::default())
    }

    pub fn create_output_texture(
        &mut self,
        width: u32,
        height: u32,
        srgb: bool,
    ) -> Result<OutputTexture<TextureHandle>, VideoError> {
        self.inner.create_output_texture(width, height, srgb)
    }
    pub fn submit_decode(&mut self, op: &DecodeOperation, cmd: CommandList) -> Result<(), VideoError> {
        self.inner.submit_decode(op, cmd)
    }
    pub fn is_slot_ready(&mut self, slot: SlotId) -> bool {
        self.inner.is_slot_ready(slot)
    }
    pub fn copy_slot_to_output(
        &mut self,
        slot: SlotId,
        output: &mut OutputTexture<TextureHandle>,
        cmd: CommandList,
    ) -> Result<(), VideoError> {
        self.inner.copy_slot_to_output(slot, output, cmd)
    }
    pub fn resolve_to_rgb(
        &mut self,
        output: &mut OutputTexture<TextureHandle>,
        cmd: CommandList,
    ) -> Result<(), VideoError> {
        self.inner.resolve_to_rgb(output, cmd)
    }
}

#[enum_dispatch::enum_dispatch]
pub enum DeviceBackend {
    NullDevice(NullDevice),
    MockDevice(MockDevice),
}

/// Backend that completes everything immediately and allocates nothing.
#[derive(Default)]
pub struct NullDevice {
    next_handle: u64,
}

impl DeviceInterface for NullDevice {
    fn create_output_texture(
        &mut self,
        _width: u32,
        _height: u32,
        srgb: bool,
    ) -> Result<OutputTexture<TextureHandle>, VideoError> {
        let handle = TextureHandle(self.next_handle);
        self.next_handle += 1;
        Ok(OutputTexture::new(handle, if srgb { 0 } else { -1 }))
    }
    fn submit_decode(&mut self, _op: &DecodeOperation, _cmd: CommandList) -> Result<(), VideoError> {
        Ok(())
    }
    fn is_slot_ready(&mut self, _slot: SlotId) -> bool {
        true
    }
    fn copy_slot_to_output(
        &mut self,
        _slot: SlotId,
        _output: &mut OutputTexture<TextureHandle>,
        _cmd: CommandList,
    ) -> Result<(), VideoError> {
        Ok(())
    }
    fn resolve_to_rgb(
        &mut self,
        _output: &mut OutputTexture<TextureHandle>,
        _cmd: CommandList,
    ) -> Result<(), VideoError> {
        Ok(())
    }
}

/// Observable state of a [`MockDevice`], shared with whoever drives or
/// inspects the simulated hardware queue.
#[derive(Debug, Default)]
pub struct MockState {
    /// Number of polls a submission stays pending before completing.
    pub latency_ticks: u32,
    /// slot index -> polls remaining.
    pub pending: HashMap<usize, u32>,
    /// slot index -> (decode-order frame index, poc) currently decoded there.
    pub slot_frames: HashMap<usize, (usize, i32)>,
    /// Frame indices in submission order.
    pub submissions: Vec<usize>,
    pub session_resets: u32,
    pub textures_created: u64,
    pub resolves: u64,
}

/// Deterministic simulation of an asynchronous hardware decode queue:
/// submissions become ready after a configurable number of completion polls,
/// and all bookkeeping is observable through the shared [`MockState`].
pub struct MockDevice {
    state: Arc<Mutex<MockState>>,
}

impl MockDevice {
    pub fn new(latency_ticks: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState { latency_ticks, ..MockState::default() })),
        }
    }

    pub fn state(&self) -> Arc<Mutex<MockState>> {
        self.state.clone()
    }
}

impl DeviceInterface for MockDevice {
    fn create_output_texture(
        &mut self,
        _width: u32,
        _height: u32,
        srgb: bool,
    ) -> Result<OutputTexture<TextureHandle>, VideoError> {
        let mut state = self.state.lock();
        let handle = TextureHandle(state.textures_created);
        state.textures_created += 1;
        Ok(OutputTexture::new(handle, if srgb { 0 } else { -1 }))
    }

    fn submit_decode(&mut self, op: &DecodeOperation, _cmd: CommandList) -> Result<(), VideoError> {
        let end = op.stream_offset + op.stream_size;
        if end > op.stream.len() as u64 {
            return Err(VideoError::Device(format!(
                "bitstream range {}..{end} out of bounds",
                op.stream_offset
            )));
        }
        let mut state = self.state.lock();
        if op.session_reset {
            state.session_resets += 1;
        }
        let latency = state.latency_ticks;
        state.pending.insert(op.slot.index(), latency);
        state.slot_frames.insert(op.slot.index(), (op.frame_index, op.poc));
        state.submissions.push(op.frame_index);
        Ok(())
    }

    fn is_slot_ready(&mut self, slot: SlotId) -> bool {
        let mut state = self.state.lock();
        match state.pending.get_mut(&slot.index()) {
            Some(0) | None => {
                state.pending.remove(&slot.index());
                true
            }
            Some(ticks) => {
                *ticks -= 1;
                false
            }
        }
    }

    fn copy_slot_to_output(
        &mut self,
        slot: SlotId,
        _output: &mut OutputTexture<TextureHandle>,
        _cmd: CommandList,
    ) -> Result<(), VideoError> {
        let state = self.state.lock();
        if state.pending.contains_key(&slot.index()) {
            return Err(VideoError::Device(format!(
                "copy from slot {} while decode still in flight",
                slot.index()
            )));
        }
        Ok(())
    }

    fn resolve_to_rgb(
        &mut self,
        _output: &mut OutputTexture<TextureHandle>,
        _cmd: CommandList,
    ) -> Result<(), VideoError> {
        self.state.lock().resolves += 1;
        Ok(())
    }
}
