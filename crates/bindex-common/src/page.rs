//! Page numbering and on-disk layout constants for Bindex index files.

use serde::{Deserialize, Serialize};

/// Default page size in bytes (glibc `BUFSIZ`).
pub const DEFAULT_PAGE_SIZE: usize = 8192;

/// Smallest page size accepted by configuration validation.
pub const MIN_PAGE_SIZE: usize = 128;

/// Attempts made for a single block read or write before giving up.
pub const BT_MAXRETRIES: u32 = 100;

/// Size of one entry in a key-length table.
pub const KEYLEN_ENTRY: usize = 4;

/// Size of one child, bucket or sibling pointer.
pub const PTR_LEN: usize = 8;

/// Size of a numeric key.
pub const NUM_KEY_LEN: usize = 8;

/// Node preamble:
/// NodeType(i32) BlockNumber(i64) Nkeys(i32) TotLen(i32)
/// Left(i64) Right(i64) Overflow(i64) PrevNode(i64)
pub const NODE_PREAMBLE: usize = 4 + 8 + 4 + 4 + 8 + 8 + 8 + 8;

/// Bucket preamble: NodeType(i32) Nentries(i32) Overflow(i64)
pub const BUCKET_PREAMBLE: usize = 4 + 4 + 8;

/// Byte offset of a page within an index file.
///
/// Page numbers are offsets, not indices: `pageno = index * pagesize`.
/// Offset 0 holds the primary root, so 0 doubles as "no page" in sibling,
/// overflow and bucket pointer fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PageNo(pub u64);

impl PageNo {
    /// The primary root page, also the null pointer value.
    pub const ROOT: PageNo = PageNo(0);

    /// Returns the raw byte offset.
    #[inline]
    pub fn get(&self) -> u64 {
        self.0
    }

    /// Converts a stored pointer field into an optional page.
    #[inline]
    pub fn from_pointer(raw: u64) -> Option<Self> {
        if raw == 0 { None } else { Some(Self(raw)) }
    }

    /// Converts an optional page into a stored pointer field.
    #[inline]
    pub fn to_pointer(page: Option<Self>) -> u64 {
        page.map(|p| p.0).unwrap_or(0)
    }
}

impl std::fmt::Display for PageNo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// Tag stored in the first four bytes of every page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i32)]
pub enum NodeType {
    /// Never written; zero-filled page.
    Free = 0,
    /// Root of a primary, secondary or numeric tree.
    Root = 1,
    /// Internal (non-root) node.
    Internal = 2,
    /// Leaf (non-root) node.
    Leaf = 3,
    /// Head page of an ID bucket.
    Bucket = 4,
    /// Continuation page of any bucket chain.
    Overflow = 5,
    /// Head page of a primary keyword bucket.
    PriBucket = 6,
    /// Head page of a secondary keyword bucket.
    SecBucket = 7,
    /// Head page of a numeric bucket.
    NumBucket = 8,
}

impl NodeType {
    /// Decodes a stored tag.
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(NodeType::Free),
            1 => Some(NodeType::Root),
            2 => Some(NodeType::Internal),
            3 => Some(NodeType::Leaf),
            4 => Some(NodeType::Bucket),
            5 => Some(NodeType::Overflow),
            6 => Some(NodeType::PriBucket),
            7 => Some(NodeType::SecBucket),
            8 => Some(NodeType::NumBucket),
            _ => None,
        }
    }

    /// Returns true for tree node tags (root, internal, leaf).
    pub fn is_node(&self) -> bool {
        matches!(self, NodeType::Root | NodeType::Internal | NodeType::Leaf)
    }

    /// Returns true for bucket head and continuation tags.
    pub fn is_bucket(&self) -> bool {
        matches!(
            self,
            NodeType::Bucket
                | NodeType::Overflow
                | NodeType::PriBucket
                | NodeType::SecBucket
                | NodeType::NumBucket
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preamble_sizes() {
        assert_eq!(NODE_PREAMBLE, 52);
        assert_eq!(BUCKET_PREAMBLE, 16);
    }

    #[test]
    fn test_page_no_pointer_encoding() {
        assert_eq!(PageNo::from_pointer(0), None);
        assert_eq!(PageNo::from_pointer(1024), Some(PageNo(1024)));
        assert_eq!(PageNo::to_pointer(None), 0);
        assert_eq!(PageNo::to_pointer(Some(PageNo(2048))), 2048);
    }

    #[test]
    fn test_page_no_display() {
        assert_eq!(PageNo(8192).to_string(), "@8192");
    }

    #[test]
    fn test_node_type_repr() {
        assert_eq!(NodeType::Free as i32, 0);
        assert_eq!(NodeType::Root as i32, 1);
        assert_eq!(NodeType::Internal as i32, 2);
        assert_eq!(NodeType::Leaf as i32, 3);
        assert_eq!(NodeType::Bucket as i32, 4);
        assert_eq!(NodeType::Overflow as i32, 5);
        assert_eq!(NodeType::PriBucket as i32, 6);
        assert_eq!(NodeType::SecBucket as i32, 7);
        assert_eq!(NodeType::NumBucket as i32, 8);
    }

    #[test]
    fn test_node_type_from_i32() {
        for tag in 0..=8 {
            let node_type = NodeType::from_i32(tag).unwrap();
            assert_eq!(node_type as i32, tag);
        }
        assert!(NodeType::from_i32(9).is_none());
        assert!(NodeType::from_i32(-1).is_none());
    }

    #[test]
    fn test_node_type_axes() {
        assert!(NodeType::Root.is_node());
        assert!(NodeType::Leaf.is_node());
        assert!(!NodeType::Bucket.is_node());
        assert!(NodeType::Overflow.is_bucket());
        assert!(NodeType::NumBucket.is_bucket());
        assert!(!NodeType::Internal.is_bucket());
        assert!(!NodeType::Free.is_node());
        assert!(!NodeType::Free.is_bucket());
    }
}
