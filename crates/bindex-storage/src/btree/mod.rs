//! Disk-paged B+Tree with bucket overflow chains.
//!
//! ## Layout
//!
//! One index file holds any number of trees at disjoint page offsets:
//!
//! ```text
//! page 0            primary root (ID or keyword tree)
//! page n            buckets, overflow pages, internal and leaf nodes
//! page m            secondary roots (one per keyword)
//! page k            numeric duplicate roots (one per duplicated ID)
//! ```
//!
//! Trees are generic over the record stored in their buckets:
//!
//! | record      | key    | head tag    | used by                 |
//! |-------------|--------|-------------|-------------------------|
//! | `IdEntry`   | string | `Bucket`    | primary ID trees        |
//! | `PriEntry`  | string | `PriBucket` | primary keyword trees   |
//! | `SecEntry`  | string | `SecBucket` | secondary keyword trees |
//! | `NumEntry`  | u64    | `NumBucket` | numeric duplicate trees |
//!
//! Node and bucket pages are decoded into owned values on every access;
//! nothing borrows the page cache across calls.

pub mod bucket;
pub mod cursor;
pub mod node;
pub mod tree;
pub mod wild;

pub use bucket::{BucketRecord, IdEntry, NumEntry, PriEntry, SecEntry, read_bucket, write_bucket};
pub use cursor::LeafCursor;
pub use node::{Node, NodeHeader, NodeKey, NodeKind};
pub use tree::{BTree, TreeCheck, Upsert};
pub use wild::{glob_match, has_wildcard, literal_prefix};
