// SPDX-License-Identifier: MIT OR Apache-2.0

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoProfile {
    H264,
    H265,
}

/// Picture type of a single frame in the bitstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    /// No dependencies, always a valid resynchronization point.
    Intra,
    /// Depends on one earlier reference picture.
    Predicted,
    /// Depends on references in both temporal directions.
    Bidirectional,
}

impl FrameType {
    pub fn uses_references(&self) -> bool {
        !matches!(self, Self::Intra)
    }
}

/// GPU resource transition state of one decode slot, tracked for correct
/// barrier sequencing around asynchronous decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResourceState {
    #[default]
    Undefined,
    /// A decode command targeting this slot has been submitted and may still
    /// be in flight on the hardware queue.
    VideoDecodeDst,
    /// The decoded picture is complete and readable.
    ShaderResource,
}

#[derive(Error, Debug)]
pub enum VideoError {
    #[error("Frame index {index} out of range (stream has {len} frames)")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("Display order {0} does not map to any frame")]
    DisplayOrderNotFound(usize),
    #[error("Display orders do not form a permutation of the frame table")]
    NotAPermutation,
    #[error("Stream contains no frames")]
    EmptyStream,
    #[error("Stream does not start with an intra frame")]
    FirstFrameNotIntra,
    #[error("Missing reference picture for frame {frame}")]
    MissingReference { frame: usize },
    #[error("No evictable decode slot available ({capacity} slots all hold live references)")]
    SlotExhaustion { capacity: usize },
    #[error("Output pool already holds a frame for display order {display_order}")]
    DuplicateFrame { display_order: usize },
    #[error("Device error: {0}")]
    Device(String),
}
