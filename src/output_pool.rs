// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::types::VideoError;

/// One display-ready decoded picture. `T` is whatever the backing device
/// hands out for a renderable texture.
#[derive(Debug)]
pub struct OutputTexture<T> {
    pub texture: T,
    /// Index of the sRGB view when one was created, else -1.
    pub subresource_srgb: i32,
    display_order: Option<usize>,
}

impl<T> OutputTexture<T> {
    pub fn new(texture: T, subresource_srgb: i32) -> Self {
        Self { texture, subresource_srgb, display_order: None }
    }

    /// Presentation index this texture currently represents, if assigned.
    pub fn display_order(&self) -> Option<usize> {
        self.display_order
    }
}

/// Free/used lists of renderable textures, decoupling decode rate from
/// display rate. The pool grows lazily up to a fixed cap; beyond the cap,
/// acquisition fails and the caller stalls decode instead of allocating
/// unbounded GPU memory.
#[derive(Debug)]
pub struct OutputFramePool<T> {
    free: Vec<OutputTexture<T>>,
    used: Vec<OutputTexture<T>>,
    cap: usize,
    allocated: usize,
}

impl<T> OutputFramePool<T> {
    pub fn new(cap: usize) -> Self {
        Self { free: Vec::new(), used: Vec::new(), cap: cap.max(2), allocated: 0 }
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn allocated(&self) -> usize {
        self.allocated
    }

    pub fn in_use(&self) -> usize {
        self.used.len()
    }

    /// Free textures plus headroom left before the cap.
    pub fn spare_capacity(&self) -> usize {
        self.free.len() + (self.cap - self.allocated)
    }

    pub fn pop_free(&mut self) -> Option<OutputTexture<T>> {
        self.free.pop()
    }

    pub fn can_allocate(&self) -> bool {
        self.allocated < self.cap
    }

    /// Records a texture freshly created by the device.
    pub fn note_allocated(&mut self) {
        debug_assert!(self.allocated < self.cap);
        self.allocated += 1;
    }

    /// Queues a decoded picture for display. Two entries must never share a
    /// display order; the newer duplicate is dropped back into the free list
    /// and the anomaly logged.
    pub fn publish(&mut self, mut texture: OutputTexture<T>, display_order: usize) -> Result<(), VideoError> {
        if self.used.iter().any(|t| t.display_order == Some(display_order)) {
            log::warn!("{}", VideoError::DuplicateFrame { display_order });
            texture.display_order = None;
            self.free.push(texture);
            return Err(VideoError::DuplicateFrame { display_order });
        }
        texture.display_order = Some(display_order);
        self.used.push(texture);
        Ok(())
    }

    /// Removes and returns the queued texture for `display_order`, if any.
    pub fn take_display(&mut self, display_order: usize) -> Option<OutputTexture<T>> {
        let pos = self.used.iter().position(|t| t.display_order == Some(display_order))?;
        Some(self.used.swap_remove(pos))
    }

    pub fn has_display(&self, display_order: usize) -> bool {
        self.used.iter().any(|t| t.display_order == Some(display_order))
    }

    pub fn recycle(&mut self, mut texture: OutputTexture<T>) {
        texture.display_order = None;
        self.free.push(texture);
    }

    /// Drops queued pictures that will never be displayed after a resync.
    pub fn recycle_used_before(&mut self, display_order: usize) {
        let mut i = 0;
        while i < self.used.len() {
            if self.used[i].display_order < Some(display_order) {
                let tex = self.used.swap_remove(i);
                self.recycle(tex);
            } else {
                i += 1;
            }
        }
    }

    pub fn recycle_all_used(&mut self) {
        while let Some(tex) = self.used.pop() {
            self.recycle(tex);
        }
    }
}
