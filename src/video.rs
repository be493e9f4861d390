// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::catalog::{FrameCatalog, FrameInfo};
use crate::dpb::MAX_DPB_SLOTS;
use crate::types::{FrameType, VideoError, VideoProfile};

/// Immutable video asset: frame catalog plus the packed bitstream every
/// playback instance reads from. Created once by whatever demuxes the
/// container, never mutated afterwards, shareable across instances.
#[derive(Debug)]
pub struct Video {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub padded_width: u32,
    pub padded_height: u32,
    pub profile: VideoProfile,
    pub sps_datas: Vec<Vec<u8>>,
    pub pps_datas: Vec<Vec<u8>>,
    pub slice_header_datas: Vec<Vec<u8>>,
    pub average_frames_per_second: f32,
    pub duration_seconds: f32,
    /// Hardware-reported number of concurrently referenceable pictures.
    pub num_dpb_slots: usize,
    /// CRC of the packed bitstream, computed at build time.
    pub bitstream_crc32: u32,
    bitstream: Vec<u8>,
    catalog: FrameCatalog,
}

impl Video {
    pub fn catalog(&self) -> &FrameCatalog {
        &self.catalog
    }

    pub fn bitstream(&self) -> &[u8] {
        &self.bitstream
    }

    /// Payload bytes of one frame, located through its aligned offset.
    pub fn frame_payload(&self, decode_index: usize) -> Result<&[u8], VideoError> {
        let info = self.catalog.get(decode_index)?;
        Ok(&self.bitstream[info.offset as usize..(info.offset + info.size) as usize])
    }
}

/// One demuxed frame handed to [`VideoBuilder`], in decode order.
#[derive(Debug, Clone)]
pub struct VideoSample {
    pub data: Vec<u8>,
    pub timestamp_seconds: f32,
    pub duration_seconds: f32,
    pub frame_type: FrameType,
    pub reference_priority: u8,
    pub poc: i32,
    pub gop: u32,
    pub display_order: usize,
}

/// Assembles a [`Video`] from demuxed samples: packs payloads at
/// device-aligned offsets into one contiguous bitstream buffer, validates the
/// display-order permutation and derives timing metadata.
pub struct VideoBuilder {
    name: String,
    width: u32,
    height: u32,
    profile: VideoProfile,
    alignment: u64,
    num_dpb_slots: usize,
    sps_datas: Vec<Vec<u8>>,
    pps_datas: Vec<Vec<u8>>,
    slice_header_datas: Vec<Vec<u8>>,
    samples: Vec<VideoSample>,
}

impl VideoBuilder {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            name: String::new(),
            width,
            height,
            profile: VideoProfile::H264,
            alignment: 256,
            num_dpb_slots: 8,
            sps_datas: Vec::new(),
            pps_datas: Vec::new(),
            slice_header_datas: Vec::new(),
            samples: Vec::new(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn profile(mut self, profile: VideoProfile) -> Self {
        self.profile = profile;
        self
    }

    /// Bitstream offset alignment required by the decode device.
    pub fn alignment(mut self, alignment: u64) -> Self {
        self.alignment = alignment.max(1);
        self
    }

    pub fn num_dpb_slots(mut self, slots: usize) -> Self {
        self.num_dpb_slots = slots.clamp(1, MAX_DPB_SLOTS);
        self
    }

    pub fn sps(mut self, data: Vec<u8>) -> Self {
        self.sps_datas.push(data);
        self
    }

    pub fn pps(mut self, data: Vec<u8>) -> Self {
        self.pps_datas.push(data);
        self
    }

    pub fn slice_header(mut self, data: Vec<u8>) -> Self {
        self.slice_header_datas.push(data);
        self
    }

    pub fn sample(mut self, sample: VideoSample) -> Self {
        self.samples.push(sample);
        self
    }

    pub fn build(self) -> Result<Video, VideoError> {
        let mut frames = Vec::with_capacity(self.samples.len());
        let mut packed_size = 0u64;
        let mut duration = 0.0f32;
        for sample in &self.samples {
            let size = align_to(sample.data.len() as u64, self.alignment);
            frames.push(FrameInfo {
                offset: packed_size,
                size,
                timestamp_seconds: sample.timestamp_seconds,
                duration_seconds: sample.duration_seconds,
                frame_type: sample.frame_type,
                reference_priority: sample.reference_priority,
                poc: sample.poc,
                gop: sample.gop,
                display_order: sample.display_order,
            });
            packed_size += size;
            duration += sample.duration_seconds;
        }

        let catalog = FrameCatalog::new(frames)?;

        let mut bitstream = vec![0u8; packed_size as usize];
        for (sample, info) in self.samples.iter().zip(catalog.frames()) {
            let offset = info.offset as usize;
            bitstream[offset..offset + sample.data.len()].copy_from_slice(&sample.data);
        }
        let bitstream_crc32 = crc32fast::hash(&bitstream);

        let fps = if duration > 0.0 { catalog.len() as f32 / duration } else { 0.0 };
        log::debug!(
            "Built video {:?}: {} frames, {:.2} fps, {:.2}s, crc32 {:08x}",
            self.name, catalog.len(), fps, duration, bitstream_crc32
        );

        Ok(Video {
            name: self.name,
            width: self.width,
            height: self.height,
            padded_width: align_to(self.width as u64, 16) as u32,
            padded_height: align_to(self.height as u64, 16) as u32,
            profile: self.profile,
            sps_datas: self.sps_datas,
            pps_datas: self.pps_datas,
            slice_header_datas: self.slice_header_datas,
            average_frames_per_second: fps,
            duration_seconds: duration,
            num_dpb_slots: self.num_dpb_slots,
            bitstream_crc32,
            bitstream,
            catalog,
        })
    }
}

pub(crate) fn align_to(value: u64, alignment: u64) -> u64 {
    value.div_ceil(alignment) * alignment
}
