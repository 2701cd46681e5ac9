//! Page pool management for Bindex.
//!
//! This crate provides in-memory page caching with:
//! - Fixed-size pool with a configurable frame count
//! - Strict LRU eviction with O(1) move-to-front
//! - Dirty page tracking for write-back
//!
//! The pool performs no I/O. Dirty pages pushed out by eviction are handed
//! back to the caller, which owns the backing file.

mod frame;
mod pool;
mod replacer;

pub use frame::{BufferFrame, FrameId};
pub use pool::{EvictedPage, PagePool, PagePoolConfig, PoolStats};
pub use replacer::{LruReplacer, Replacer};
