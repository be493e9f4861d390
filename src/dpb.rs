// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::catalog::{FrameCatalog, ReferenceSet};
use crate::types::{ResourceState, VideoError};

/// Hardware ceiling on concurrently referenceable decoded pictures.
pub const MAX_DPB_SLOTS: usize = 17;

/// Index of one physical decode slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotId(usize);

impl SlotId {
    pub(crate) fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Default)]
struct Slot {
    poc: Option<i32>,
    gop: u32,
    /// Decode-order index of the picture held here.
    frame_num: Option<usize>,
    display_order: Option<usize>,
    resource_state: ResourceState,
    /// Number of in-flight decodes reading this slot as a reference.
    reference_usage: u32,
}

impl Slot {
    fn clear(&mut self) {
        *self = Slot::default();
    }
}

/// Decoded-picture-buffer slot table for one playback instance.
///
/// Assigns physical slots to pictures about to be decoded and decides which
/// held pictures may be evicted. A slot is protected while its decode is in
/// flight, while an in-flight decode reads it as a reference, or while any
/// frame inside the bounded lookahead window still depends on its POC.
#[derive(Debug)]
pub struct Dpb {
    slots: Vec<Slot>,
    next_slot: usize,
    current_slot: Option<SlotId>,
}

impl Dpb {
    pub fn new(num_slots: usize) -> Self {
        Self {
            slots: vec![Slot::default(); num_slots.clamp(1, MAX_DPB_SLOTS)],
            next_slot: 0,
            current_slot: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|s| s.poc.is_some()).count()
    }

    /// Slot just decoded into, if any.
    pub fn current_slot(&self) -> Option<SlotId> {
        self.current_slot
    }

    pub fn slot_poc(&self, slot: SlotId) -> Option<i32> {
        self.slots[slot.0].poc
    }

    pub fn slot_frame_num(&self, slot: SlotId) -> Option<usize> {
        self.slots[slot.0].frame_num
    }

    pub fn resident_slot(&self, poc: i32, gop: u32) -> Option<SlotId> {
        self.slots
            .iter()
            .position(|s| s.poc == Some(poc) && s.gop == gop)
            .map(SlotId)
    }

    /// Picks the slot the frame at `decode_index` will be decoded into and
    /// locks its reference pictures for the duration of the decode.
    ///
    /// Fails with [`VideoError::MissingReference`] when a required reference
    /// is not resident, and with [`VideoError::SlotExhaustion`] when every
    /// slot holds a live reference. Both indicate a malformed or
    /// under-provisioned stream; the caller recovers by resetting and
    /// resuming at the next intra frame.
    pub fn acquire_slot_for_decode(
        &mut self,
        catalog: &FrameCatalog,
        decode_index: usize,
        lookahead: usize,
    ) -> Result<(SlotId, ReferenceSet), VideoError> {
        let frame = *catalog.get(decode_index)?;
        let refs = catalog.references(decode_index)?;

        if frame.frame_type.uses_references() && refs.forward.is_none() {
            return Err(VideoError::MissingReference { frame: decode_index });
        }
        let mut ref_slots = [None, None];
        for (i, poc) in refs.iter().enumerate() {
            match self.resident_slot(poc, frame.gop) {
                Some(slot) => ref_slots[i] = Some(slot),
                None => return Err(VideoError::MissingReference { frame: decode_index }),
            }
        }

        let capacity = self.slots.len();
        let is_ref = |idx: usize| ref_slots.iter().flatten().any(|s| s.0 == idx);

        // Free slots first, then evictable ones, both round robin. A
        // dependent frame never decodes in place over its own references.
        let mut chosen = None;
        for k in 0..capacity {
            let idx = (self.next_slot + k) % capacity;
            if !is_ref(idx) && self.slots[idx].poc.is_none() {
                chosen = Some(idx);
                break;
            }
        }
        if chosen.is_none() {
            for k in 0..capacity {
                let idx = (self.next_slot + k) % capacity;
                if is_ref(idx) {
                    continue;
                }
                let slot = &self.slots[idx];
                let Some(poc) = slot.poc else { continue };
                if slot.reference_usage == 0
                    && slot.resource_state != ResourceState::VideoDecodeDst
                    && !Self::referenced_in_window(catalog, poc, slot.gop, decode_index + 1, lookahead)
                {
                    log::debug!("Evicting DPB slot {idx} (poc {poc}) for frame {decode_index}");
                    chosen = Some(idx);
                    break;
                }
            }
        }
        let idx = chosen.ok_or(VideoError::SlotExhaustion { capacity })?;

        for slot in ref_slots.iter().flatten() {
            self.slots[slot.0].reference_usage += 1;
        }
        self.slots[idx] = Slot {
            poc: Some(frame.poc),
            gop: frame.gop,
            frame_num: Some(decode_index),
            display_order: Some(frame.display_order),
            resource_state: ResourceState::VideoDecodeDst,
            reference_usage: 0,
        };
        self.next_slot = (idx + 1) % capacity;
        self.current_slot = Some(SlotId(idx));
        Ok((SlotId(idx), refs))
    }

    /// Marks a submitted decode as finished and unlocks its references.
    pub fn complete_decode(&mut self, slot: SlotId, refs: &ReferenceSet) {
        self.slots[slot.0].resource_state = ResourceState::ShaderResource;
        let gop = self.slots[slot.0].gop;
        for poc in refs.iter() {
            if let Some(r) = self.resident_slot(poc, gop) {
                let usage = &mut self.slots[r.0].reference_usage;
                *usage = usage.saturating_sub(1);
            }
        }
    }

    pub fn release_slot(&mut self, poc: i32, gop: u32) {
        if let Some(slot) = self.resident_slot(poc, gop) {
            self.slots[slot.0].clear();
        }
    }

    /// Drops all slot state, e.g. on seek or decoder reset.
    pub fn reset(&mut self) {
        for slot in &mut self.slots {
            slot.clear();
        }
        self.next_slot = 0;
        self.current_slot = None;
    }

    fn referenced_in_window(
        catalog: &FrameCatalog,
        poc: i32,
        gop: u32,
        window_start: usize,
        lookahead: usize,
    ) -> bool {
        let end = window_start.saturating_add(lookahead).min(catalog.len());
        for j in window_start..end {
            let Ok(frame) = catalog.get(j) else { break };
            if frame.gop != gop {
                break;
            }
            if let Ok(refs) = catalog.references(j) {
                if refs.iter().any(|p| p == poc) {
                    return true;
                }
            }
        }
        false
    }
}
