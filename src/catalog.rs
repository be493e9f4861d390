// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::types::{FrameType, VideoError};

/// Per-frame metadata, one entry per frame in decode order.
#[derive(Debug, Clone, Copy)]
pub struct FrameInfo {
    /// Byte offset of the frame payload inside the packed bitstream.
    pub offset: u64,
    /// Aligned payload size in bytes.
    pub size: u64,
    pub timestamp_seconds: f32,
    pub duration_seconds: f32,
    pub frame_type: FrameType,
    /// Zero means this picture is never used as a reference by other frames.
    pub reference_priority: u8,
    pub poc: i32,
    /// Group-of-pictures id; references never cross a GOP boundary.
    pub gop: u32,
    /// Presentation index of this frame.
    pub display_order: usize,
}

/// Reference pictures a frame predicts from, identified by POC within the
/// frame's own GOP. `forward` is the temporally earlier anchor, `backward`
/// the later one (B frames only).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReferenceSet {
    pub forward: Option<i32>,
    pub backward: Option<i32>,
}

impl ReferenceSet {
    pub fn is_empty(&self) -> bool {
        self.forward.is_none() && self.backward.is_none()
    }
    pub fn iter(&self) -> impl Iterator<Item = i32> + '_ {
        self.forward.into_iter().chain(self.backward)
    }
}

/// Immutable per-video frame table: random access by decode index plus the
/// decode-order to display-order mapping and its inverse. Shared read-only by
/// every playback instance of the same video.
#[derive(Debug, Clone)]
pub struct FrameCatalog {
    frames: Vec<FrameInfo>,
    display_to_decode: Vec<usize>,
}

impl FrameCatalog {
    /// Validates that the display orders of `frames` form a permutation of
    /// `[0, len)` and that decoding can start at frame zero.
    pub fn new(frames: Vec<FrameInfo>) -> Result<Self, VideoError> {
        if frames.is_empty() {
            return Err(VideoError::EmptyStream);
        }
        if frames[0].frame_type != FrameType::Intra {
            return Err(VideoError::FirstFrameNotIntra);
        }
        let mut display_to_decode = vec![usize::MAX; frames.len()];
        for (decode_index, frame) in frames.iter().enumerate() {
            let slot = display_to_decode
                .get_mut(frame.display_order)
                .ok_or(VideoError::NotAPermutation)?;
            if *slot != usize::MAX {
                return Err(VideoError::NotAPermutation);
            }
            *slot = decode_index;
        }
        Ok(Self { frames, display_to_decode })
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frames(&self) -> &[FrameInfo] {
        &self.frames
    }

    pub fn get(&self, decode_index: usize) -> Result<&FrameInfo, VideoError> {
        self.frames.get(decode_index).ok_or(VideoError::IndexOutOfRange {
            index: decode_index,
            len: self.frames.len(),
        })
    }

    pub fn display_index_of(&self, decode_index: usize) -> Result<usize, VideoError> {
        Ok(self.get(decode_index)?.display_order)
    }

    pub fn decode_index_for_display(&self, display_order: usize) -> Result<usize, VideoError> {
        self.display_to_decode
            .get(display_order)
            .copied()
            .ok_or(VideoError::DisplayOrderNotFound(display_order))
    }

    /// Derives the reference pictures of a frame from the stream structure:
    /// the nearest earlier-decoded anchors (reference_priority > 0) of the
    /// same GOP, on both display sides for B frames.
    pub fn references(&self, decode_index: usize) -> Result<ReferenceSet, VideoError> {
        let frame = *self.get(decode_index)?;
        let mut refs = ReferenceSet::default();
        if !frame.frame_type.uses_references() {
            return Ok(refs);
        }
        for candidate in self.frames[..decode_index].iter().rev() {
            if candidate.gop != frame.gop {
                break;
            }
            if candidate.reference_priority == 0 {
                continue;
            }
            match frame.frame_type {
                FrameType::Predicted => {
                    refs.forward = Some(candidate.poc);
                    break;
                }
                FrameType::Bidirectional => {
                    if candidate.display_order > frame.display_order {
                        refs.backward.get_or_insert(candidate.poc);
                    } else {
                        refs.forward.get_or_insert(candidate.poc);
                    }
                    if refs.forward.is_some() && refs.backward.is_some() {
                        break;
                    }
                }
                FrameType::Intra => unreachable!(),
            }
        }
        Ok(refs)
    }

    /// Nearest intra frame whose display timestamp is at or before `seconds`.
    /// Falls back to frame zero, which is guaranteed intra.
    pub fn intra_at_or_before(&self, seconds: f32) -> usize {
        let mut best = 0;
        let mut best_ts = f32::MIN;
        for (i, frame) in self.frames.iter().enumerate() {
            if frame.frame_type == FrameType::Intra
                && frame.timestamp_seconds <= seconds
                && frame.timestamp_seconds > best_ts
            {
                best = i;
                best_ts = frame.timestamp_seconds;
            }
        }
        best
    }

    /// First intra frame at or after the given decode index, used to
    /// resynchronize after a decoder reset.
    pub fn next_intra_at_or_after(&self, decode_index: usize) -> Option<usize> {
        self.frames[decode_index.min(self.frames.len())..]
            .iter()
            .position(|f| f.frame_type == FrameType::Intra)
            .map(|p| p + decode_index)
    }

    /// How far decode order can run ahead of display order. Zero for streams
    /// without bidirectional frames.
    pub fn max_reorder_depth(&self) -> usize {
        self.display_to_decode
            .iter()
            .enumerate()
            .map(|(display, &decode)| decode.saturating_sub(display))
            .max()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(ty: FrameType, poc: i32, display: usize, refp: u8) -> FrameInfo {
        FrameInfo {
            offset: 0,
            size: 0,
            timestamp_seconds: display as f32 / 30.0,
            duration_seconds: 1.0 / 30.0,
            frame_type: ty,
            reference_priority: refp,
            poc,
            gop: 0,
            display_order: display,
        }
    }

    // Decode order I P B B, display order I B B P.
    fn ipbb() -> FrameCatalog {
        FrameCatalog::new(vec![
            frame(FrameType::Intra, 0, 0, 1),
            frame(FrameType::Predicted, 3, 3, 1),
            frame(FrameType::Bidirectional, 1, 1, 0),
            frame(FrameType::Bidirectional, 2, 2, 0),
        ])
        .unwrap()
    }

    #[test]
    fn display_mapping_roundtrips() {
        let catalog = ipbb();
        for decode in 0..catalog.len() {
            let display = catalog.display_index_of(decode).unwrap();
            assert_eq!(catalog.decode_index_for_display(display).unwrap(), decode);
        }
    }

    #[test]
    fn rejects_duplicate_display_orders() {
        let frames = vec![
            frame(FrameType::Intra, 0, 0, 1),
            frame(FrameType::Predicted, 1, 0, 1),
        ];
        assert!(matches!(FrameCatalog::new(frames), Err(VideoError::NotAPermutation)));
    }

    #[test]
    fn rejects_non_intra_start() {
        let frames = vec![frame(FrameType::Predicted, 0, 0, 1)];
        assert!(matches!(FrameCatalog::new(frames), Err(VideoError::FirstFrameNotIntra)));
    }

    #[test]
    fn rejects_empty() {
        assert!(matches!(FrameCatalog::new(Vec::new()), Err(VideoError::EmptyStream)));
    }

    #[test]
    fn b_frame_references_both_anchors() {
        let catalog = ipbb();
        let refs = catalog.references(2).unwrap();
        assert_eq!(refs.forward, Some(0));
        assert_eq!(refs.backward, Some(3));
        let refs = catalog.references(1).unwrap();
        assert_eq!(refs.forward, Some(0));
        assert_eq!(refs.backward, None);
    }

    #[test]
    fn intra_has_no_references() {
        let catalog = ipbb();
        assert!(catalog.references(0).unwrap().is_empty());
    }

    #[test]
    fn references_stay_within_gop() {
        let mut frames = vec![
            frame(FrameType::Intra, 0, 0, 1),
            frame(FrameType::Predicted, 1, 1, 1),
        ];
        let mut second = vec![
            frame(FrameType::Intra, 0, 2, 1),
            frame(FrameType::Predicted, 1, 3, 1),
        ];
        for f in &mut second {
            f.gop = 1;
        }
        frames.append(&mut second);
        let catalog = FrameCatalog::new(frames).unwrap();
        // The P of GOP 1 references its own intra, not the GOP 0 anchors.
        let refs = catalog.references(3).unwrap();
        assert_eq!(refs.forward, Some(0));
    }

    #[test]
    fn intra_seek_lands_at_or_before() {
        let mut frames: Vec<FrameInfo> = (0..10)
            .map(|i| {
                let ty = if i % 5 == 0 { FrameType::Intra } else { FrameType::Predicted };
                let mut f = frame(ty, i as i32, i, 1);
                f.timestamp_seconds = i as f32;
                f
            })
            .collect();
        frames[5].gop = 1;
        for f in &mut frames[6..] {
            f.gop = 1;
        }
        let catalog = FrameCatalog::new(frames).unwrap();
        assert_eq!(catalog.intra_at_or_before(4.9), 0);
        assert_eq!(catalog.intra_at_or_before(5.0), 5);
        assert_eq!(catalog.intra_at_or_before(100.0), 5);
        assert_eq!(catalog.next_intra_at_or_after(1), Some(5));
        assert_eq!(catalog.next_intra_at_or_after(6), None);
    }

    #[test]
    fn reorder_depth() {
        assert_eq!(ipbb().max_reorder_depth(), 1);
        let all_intra: Vec<FrameInfo> =
            (0..4).map(|i| frame(FrameType::Intra, i as i32, i, 1)).collect();
        assert_eq!(FrameCatalog::new(all_intra).unwrap().max_reorder_depth(), 0);
    }
}
