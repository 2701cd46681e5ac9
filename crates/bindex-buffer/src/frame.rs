//! Buffer frame management.

use bindex_common::page::PageNo;

/// Unique identifier for a frame in the page pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameId(pub u32);

impl FrameId {
    /// Returns the frame's index in the pool's frame array.
    #[inline]
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for FrameId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "frame:{}", self.0)
    }
}

/// A frame in the page pool holding a single page.
pub struct BufferFrame {
    /// Frame identifier.
    frame_id: FrameId,
    /// The page currently stored in this frame.
    pageno: Option<PageNo>,
    /// Page data buffer (`pagesize` bytes).
    data: Box<[u8]>,
    /// Whether the page has been modified since it was last written.
    is_dirty: bool,
}

impl BufferFrame {
    /// Creates a new empty buffer frame.
    pub fn new(frame_id: FrameId, page_size: usize) -> Self {
        Self {
            frame_id,
            pageno: None,
            data: vec![0u8; page_size].into_boxed_slice(),
            is_dirty: false,
        }
    }

    /// Returns the frame ID.
    #[inline]
    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    /// Returns the page currently stored in this frame.
    #[inline]
    pub fn pageno(&self) -> Option<PageNo> {
        self.pageno
    }

    /// Sets the page stored in this frame.
    #[inline]
    pub fn set_pageno(&mut self, pageno: Option<PageNo>) {
        self.pageno = pageno;
    }

    /// Returns true if this frame is dirty.
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.is_dirty
    }

    /// Marks this frame as dirty or clean.
    #[inline]
    pub fn set_dirty(&mut self, dirty: bool) {
        self.is_dirty = dirty;
    }

    /// Returns true if this frame is empty (no page loaded).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pageno.is_none()
    }

    /// Returns the page data.
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Returns the page data for writing. The caller marks the frame dirty.
    #[inline]
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Copies data into the frame.
    #[inline]
    pub fn copy_from(&mut self, src: &[u8]) {
        let len = src.len().min(self.data.len());
        self.data[..len].copy_from_slice(&src[..len]);
    }

    /// Resets the frame to empty state.
    pub fn reset(&mut self) {
        self.pageno = None;
        self.is_dirty = false;
        self.data.fill(0);
    }
}

impl std::fmt::Debug for BufferFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferFrame")
            .field("frame_id", &self.frame_id)
            .field("pageno", &self.pageno)
            .field("is_dirty", &self.is_dirty)
            .field("len", &self.data.len())
            .finish()
    }
}
