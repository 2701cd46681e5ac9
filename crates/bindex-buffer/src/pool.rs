//! Page pool manager.

use crate::frame::{BufferFrame, FrameId};
use crate::replacer::{LruReplacer, Replacer};
use bindex_common::page::{DEFAULT_PAGE_SIZE, PageNo};
use bindex_common::{BindexError, Result};
use std::collections::HashMap;

/// A dirty page that was evicted from the pool.
/// Caller must write this to disk to prevent data loss.
#[derive(Debug)]
pub struct EvictedPage {
    pub pageno: PageNo,
    pub data: Box<[u8]>,
}

/// Configuration for the page pool.
#[derive(Debug, Clone)]
pub struct PagePoolConfig {
    /// Number of frames in the pool.
    pub num_frames: usize,
    /// Size of each frame in bytes.
    pub page_size: usize,
}

impl Default for PagePoolConfig {
    fn default() -> Self {
        Self {
            num_frames: 100,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// Access counters for the pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Lookups that found the page resident.
    pub hits: u64,
    /// Lookups that did not.
    pub misses: u64,
    /// Pages pushed out to make room.
    pub evictions: u64,
    /// Evicted pages that were dirty.
    pub dirty_evictions: u64,
}

/// Page pool.
///
/// Manages a fixed-size pool of page frames with:
/// - Page number to frame mapping
/// - Free frame list for new pages
/// - Strict LRU replacement for eviction
///
/// Pages are never pinned: callers copy what they need out of a frame before
/// the next pool call, so every resident page is evictable.
pub struct PagePool {
    /// Configuration.
    config: PagePoolConfig,
    /// Array of buffer frames.
    frames: Vec<BufferFrame>,
    /// Page number to frame mapping.
    page_table: HashMap<PageNo, FrameId>,
    /// List of free frame IDs.
    free_list: Vec<FrameId>,
    /// Page replacement policy.
    replacer: LruReplacer,
    /// Access counters.
    stats: PoolStats,
}

impl PagePool {
    /// Creates a new page pool.
    pub fn new(config: PagePoolConfig) -> Self {
        let num_frames = config.num_frames;

        let frames: Vec<_> = (0..num_frames)
            .map(|i| BufferFrame::new(FrameId(i as u32), config.page_size))
            .collect();

        // Pop order hands out frame 0 first
        let free_list: Vec<_> = (0..num_frames).rev().map(|i| FrameId(i as u32)).collect();

        Self {
            config,
            frames,
            page_table: HashMap::with_capacity(num_frames),
            free_list,
            replacer: LruReplacer::new(num_frames),
            stats: PoolStats::default(),
        }
    }

    /// Returns the number of frames in the pool.
    pub fn num_frames(&self) -> usize {
        self.config.num_frames
    }

    /// Returns the frame size in bytes.
    pub fn page_size(&self) -> usize {
        self.config.page_size
    }

    /// Returns the number of free frames.
    pub fn free_count(&self) -> usize {
        self.free_list.len()
    }

    /// Returns the number of pages currently in the pool.
    pub fn page_count(&self) -> usize {
        self.page_table.len()
    }

    /// Returns the access counters.
    pub fn stats(&self) -> PoolStats {
        self.stats
    }

    /// Checks if a page is in the pool.
    pub fn contains(&self, pageno: PageNo) -> bool {
        self.page_table.contains_key(&pageno)
    }

    /// Returns true if the resident page is dirty.
    pub fn is_dirty(&self, pageno: PageNo) -> bool {
        self.page_table
            .get(&pageno)
            .map(|fid| self.frames[fid.index()].is_dirty())
            .unwrap_or(false)
    }

    /// Returns resident pages from least to most recently used.
    pub fn lru_pages(&self) -> Vec<PageNo> {
        self.replacer
            .lru_order()
            .into_iter()
            .filter_map(|fid| self.frames[fid.index()].pageno())
            .collect()
    }

    /// Fetches a resident page, making it most recently used.
    ///
    /// Returns None (and counts a miss) if the page is not resident.
    pub fn fetch_page(&mut self, pageno: PageNo) -> Option<&BufferFrame> {
        let frame_id = self.touch(pageno)?;
        Some(&self.frames[frame_id.index()])
    }

    /// Fetches a resident page for writing and marks it dirty.
    pub fn fetch_page_mut(&mut self, pageno: PageNo) -> Option<&mut BufferFrame> {
        let frame_id = self.touch(pageno)?;
        let frame = &mut self.frames[frame_id.index()];
        frame.set_dirty(true);
        Some(frame)
    }

    /// Returns a resident page without updating recency or counters.
    pub fn peek(&self, pageno: PageNo) -> Option<&BufferFrame> {
        self.page_table
            .get(&pageno)
            .map(|fid| &self.frames[fid.index()])
    }

    fn touch(&mut self, pageno: PageNo) -> Option<FrameId> {
        match self.page_table.get(&pageno) {
            Some(&frame_id) => {
                self.stats.hits += 1;
                self.replacer.record_access(frame_id);
                Some(frame_id)
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// Allocates a frame for a new page.
    ///
    /// Tries to get a free frame first, then evicts the LRU page.
    /// Returns the frame ID and any evicted dirty page that must be flushed.
    fn allocate_frame(&mut self) -> Result<(FrameId, Option<EvictedPage>)> {
        if let Some(frame_id) = self.free_list.pop() {
            return Ok((frame_id, None));
        }

        let victim_id = self
            .replacer
            .evict()
            .ok_or_else(|| BindexError::Internal("page pool has no frames".to_string()))?;

        let frame = &mut self.frames[victim_id.index()];
        self.stats.evictions += 1;

        let evicted = match frame.pageno() {
            Some(pageno) => {
                self.page_table.remove(&pageno);
                tracing::trace!(%pageno, dirty = frame.is_dirty(), "evicting page");
                if frame.is_dirty() {
                    self.stats.dirty_evictions += 1;
                    Some(EvictedPage {
                        pageno,
                        data: frame.data().to_vec().into_boxed_slice(),
                    })
                } else {
                    None
                }
            }
            None => None,
        };

        Ok((victim_id, evicted))
    }

    /// Inserts a new zero-filled page into the pool.
    ///
    /// If the page already exists, returns the existing frame.
    ///
    /// Returns (frame, evicted) where evicted contains any dirty page that was
    /// evicted to make room. Caller must write evicted pages to disk.
    pub fn new_page(
        &mut self,
        pageno: PageNo,
    ) -> Result<(&mut BufferFrame, Option<EvictedPage>)> {
        if let Some(&frame_id) = self.page_table.get(&pageno) {
            self.replacer.record_access(frame_id);
            return Ok((&mut self.frames[frame_id.index()], None));
        }

        let (frame_id, evicted) = self.allocate_frame()?;

        let frame = &mut self.frames[frame_id.index()];
        frame.reset();
        frame.set_pageno(Some(pageno));
        self.replacer.record_access(frame_id);
        self.page_table.insert(pageno, frame_id);

        Ok((&mut self.frames[frame_id.index()], evicted))
    }

    /// Loads page data read from disk into the pool as a clean page.
    /// Returns the frame and any evicted dirty page that must be flushed.
    pub fn load_page(
        &mut self,
        pageno: PageNo,
        data: &[u8],
    ) -> Result<(&BufferFrame, Option<EvictedPage>)> {
        let (frame, evicted) = self.new_page(pageno)?;
        frame.copy_from(data);
        frame.set_dirty(false);
        Ok((&*frame, evicted))
    }

    /// Marks a resident page dirty.
    ///
    /// Returns false if the page is not resident.
    pub fn mark_dirty(&mut self, pageno: PageNo) -> bool {
        match self.page_table.get(&pageno) {
            Some(&frame_id) => {
                self.frames[frame_id.index()].set_dirty(true);
                true
            }
            None => false,
        }
    }

    /// Flushes a page to the provided callback.
    ///
    /// The callback receives the page data if the page is dirty.
    /// Returns true if the page was flushed.
    pub fn flush_page<F>(&mut self, pageno: PageNo, mut flush_fn: F) -> Result<bool>
    where
        F: FnMut(PageNo, &[u8]) -> Result<()>,
    {
        if let Some(&frame_id) = self.page_table.get(&pageno) {
            let frame = &mut self.frames[frame_id.index()];
            if frame.is_dirty() {
                flush_fn(pageno, frame.data())?;
                frame.set_dirty(false);
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Flushes all dirty pages in ascending page order.
    ///
    /// Returns the number of pages flushed.
    pub fn flush_all<F>(&mut self, mut flush_fn: F) -> Result<usize>
    where
        F: FnMut(PageNo, &[u8]) -> Result<()>,
    {
        let mut dirty_pages: Vec<(PageNo, FrameId)> = self
            .page_table
            .iter()
            .filter(|(_, fid)| self.frames[fid.index()].is_dirty())
            .map(|(&pageno, &fid)| (pageno, fid))
            .collect();
        dirty_pages.sort_unstable();

        let mut flushed = 0;
        for (pageno, frame_id) in dirty_pages {
            let frame = &mut self.frames[frame_id.index()];
            flush_fn(pageno, frame.data())?;
            frame.set_dirty(false);
            flushed += 1;
        }
        Ok(flushed)
    }

    /// Drops a page from the pool without writing it.
    ///
    /// Returns true if the page was resident.
    pub fn delete_page(&mut self, pageno: PageNo) -> bool {
        if let Some(frame_id) = self.page_table.remove(&pageno) {
            self.replacer.remove(frame_id);
            self.frames[frame_id.index()].reset();
            self.free_list.push(frame_id);
            return true;
        }
        false
    }

    /// Drops every page without writing.
    pub fn clear(&mut self) {
        let resident: Vec<PageNo> = self.page_table.keys().copied().collect();
        for pageno in resident {
            self.delete_page(pageno);
        }
    }
}
