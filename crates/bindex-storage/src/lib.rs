//! Storage engine for Bindex.
//!
//! This crate provides:
//! - Page store for block-level file I/O with bounded retries
//! - Page cache over the shared page pool
//! - Node and bucket page codecs
//! - Disk-paged B+Tree with bucket chains, secondary and duplicate trees
//! - Index cache exposing ID and keyword operations over one index file

pub mod btree;
mod cache;
mod disk;
mod index;

pub use btree::{BTree, LeafCursor, TreeCheck, Upsert, glob_match, has_wildcard, literal_prefix};
pub use cache::{CacheStats, PageCache};
pub use disk::{BlockDevice, PageStore};
pub use index::{
    BtHybrid, BtId, BtNumId, BtPri, BtSecId, IdWildCursor, IndexCache, IndexLock, InsertOutcome,
    KeyWildCursor, SharedIndex, read_params, write_params,
};
