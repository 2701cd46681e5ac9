//! Page cache: a fixed-capacity page pool in front of a page store.

use crate::disk::PageStore;
use bindex_buffer::{EvictedPage, PagePool, PagePoolConfig};
use bindex_common::page::PageNo;
use bindex_common::{BindexError, Result};

/// Counters reported by [`PageCache::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Page requests served from memory.
    pub hits: u64,
    /// Page requests that read the file.
    pub misses: u64,
    /// Pages evicted to make room.
    pub evictions: u64,
    /// Dirty pages written back to the file.
    pub flushes: u64,
}

/// Write-back page cache over one index file.
///
/// Pages are handed out as borrowed slices that live until the next cache
/// call. Callers decode what they need into owned values.
pub struct PageCache {
    store: PageStore,
    pool: PagePool,
    pagesize: usize,
    /// File size including allocated but unflushed pages.
    totsize: u64,
    flushes: u64,
    /// Bumped by every change to page contents.
    generation: u64,
}

impl PageCache {
    /// Creates a cache of `cachesize` pages over `store`.
    pub fn new(mut store: PageStore, pagesize: usize, cachesize: usize) -> Result<Self> {
        let totsize = store.file_size()?;
        if totsize % pagesize as u64 != 0 {
            return Err(BindexError::PageCorrupted {
                pageno: totsize,
                reason: format!("file size is not a multiple of page size {pagesize}"),
            });
        }

        let pool = PagePool::new(PagePoolConfig {
            num_frames: cachesize,
            page_size: pagesize,
        });

        Ok(Self {
            store,
            pool,
            pagesize,
            totsize,
            flushes: 0,
            generation: 0,
        })
    }

    /// Returns the page size.
    pub fn pagesize(&self) -> usize {
        self.pagesize
    }

    /// Returns the file size in bytes, counting allocated pages.
    pub fn totsize(&self) -> u64 {
        self.totsize
    }

    /// Returns the number of pages in the file.
    pub fn page_count(&self) -> u64 {
        self.totsize / self.pagesize as u64
    }

    /// Returns the number of resident pages.
    pub fn resident(&self) -> usize {
        self.pool.page_count()
    }

    /// Returns true if pages may not be written.
    pub fn is_read_only(&self) -> bool {
        self.store.is_read_only()
    }

    /// Returns a counter that changes whenever page contents may have changed.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns the cache counters.
    pub fn stats(&self) -> CacheStats {
        let pool = self.pool.stats();
        CacheStats {
            hits: pool.hits,
            misses: pool.misses,
            evictions: pool.evictions,
            flushes: self.flushes,
        }
    }

    /// Returns the page, reading it from the file if it is not resident.
    pub fn fetch(&mut self, pageno: PageNo) -> Result<&[u8]> {
        self.make_resident(pageno)?;
        self.pool
            .peek(pageno)
            .map(|frame| frame.data())
            .ok_or_else(|| BindexError::Internal(format!("page {pageno} vanished from cache")))
    }

    /// Returns the page for in-place modification and marks it dirty.
    pub fn fetch_mut(&mut self, pageno: PageNo) -> Result<&mut [u8]> {
        self.check_writable()?;
        self.make_resident(pageno)?;
        self.generation += 1;
        self.pool
            .fetch_page_mut(pageno)
            .map(|frame| frame.data_mut())
            .ok_or_else(|| BindexError::Internal(format!("page {pageno} vanished from cache")))
    }

    /// Replaces the whole page with `data` and marks it dirty.
    ///
    /// The page is not read from the file first.
    pub fn write_page(&mut self, pageno: PageNo, data: &[u8]) -> Result<()> {
        self.check_writable()?;
        self.check_bounds(pageno)?;
        if data.len() != self.pagesize {
            return Err(BindexError::Internal(format!(
                "write of {} bytes to {}-byte page {pageno}",
                data.len(),
                self.pagesize
            )));
        }

        self.generation += 1;
        let (frame, evicted) = self.pool.new_page(pageno)?;
        frame.copy_from(data);
        frame.set_dirty(true);
        self.write_evicted(evicted)
    }

    /// Allocates a zero-filled page at the end of the file.
    pub fn allocate(&mut self) -> Result<PageNo> {
        self.check_writable()?;
        let pageno = PageNo(self.totsize);
        self.totsize += self.pagesize as u64;
        self.store.extend_file(self.totsize)?;
        self.generation += 1;

        let (frame, evicted) = self.pool.new_page(pageno)?;
        frame.set_dirty(true);
        self.write_evicted(evicted)?;

        tracing::trace!(%pageno, "allocated page");
        Ok(pageno)
    }

    /// Writes one page now if it is dirty. Returns true if it was written.
    pub fn flush_page(&mut self, pageno: PageNo) -> Result<bool> {
        let store = &mut self.store;
        let written = self
            .pool
            .flush_page(pageno, |p, data| store.write_block(p.get(), data))?;
        if written {
            self.flushes += 1;
            tracing::trace!(%pageno, "flushed page");
        }
        Ok(written)
    }

    /// Writes every dirty page in file order, then syncs the file.
    pub fn sync_all(&mut self) -> Result<()> {
        if self.is_read_only() {
            return Ok(());
        }
        let store = &mut self.store;
        let written = self
            .pool
            .flush_all(|p, data| store.write_block(p.get(), data))?;
        self.flushes += written as u64;
        self.store.sync()?;
        tracing::trace!(written, "synced page cache");
        Ok(())
    }

    /// Drops every resident page without writing it.
    pub fn discard(&mut self) {
        self.generation += 1;
        self.pool.clear();
    }

    fn make_resident(&mut self, pageno: PageNo) -> Result<()> {
        if self.pool.fetch_page(pageno).is_some() {
            return Ok(());
        }
        self.check_bounds(pageno)?;

        let mut buf = vec![0u8; self.pagesize];
        self.store.read_block(pageno.get(), &mut buf)?;
        tracing::trace!(%pageno, "page fault");

        let (_, evicted) = self.pool.load_page(pageno, &buf)?;
        self.write_evicted(evicted)
    }

    fn write_evicted(&mut self, evicted: Option<EvictedPage>) -> Result<()> {
        if let Some(page) = evicted {
            self.store.write_block(page.pageno.get(), &page.data)?;
            self.flushes += 1;
        }
        Ok(())
    }

    fn check_bounds(&self, pageno: PageNo) -> Result<()> {
        if pageno.get() % self.pagesize as u64 != 0 || pageno.get() >= self.totsize {
            return Err(BindexError::PageCorrupted {
                pageno: pageno.get(),
                reason: format!("not a page of a {}-byte file", self.totsize),
            });
        }
        Ok(())
    }

    fn check_writable(&self) -> Result<()> {
        if self.is_read_only() {
            return Err(BindexError::ReadOnly);
        }
        Ok(())
    }
}

impl std::fmt::Debug for PageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageCache")
            .field("store", &self.store)
            .field("pagesize", &self.pagesize)
            .field("totsize", &self.totsize)
            .field("resident", &self.pool.page_count())
            .field("capacity", &self.pool.num_frames())
            .finish()
    }
}
