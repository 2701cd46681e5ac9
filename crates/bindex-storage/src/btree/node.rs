//! Node codec for B+Tree root, internal and leaf pages.
//!
//! Every node page starts with a 52-byte little-endian preamble:
//!
//! ```text
//! +---------------------+ 0
//! | NodeType: i32       |
//! | BlockNumber: i64    |  own page offset
//! | Nkeys: i32          |
//! | TotLen: i32         |  packed key bytes
//! | Left: i64           |  leaf chain
//! | Right: i64          |  leaf chain
//! | Overflow: i64       |
//! | PrevNode: i64       |  parent, or level on a root
//! +---------------------+ 52 (NODE_PREAMBLE)
//! ```
//!
//! String keys follow as an `i32` length table and the packed key bytes.
//! Numeric keys follow as `Nkeys` `i64` values. Both end with `Nkeys + 1`
//! `i64` pointers: children for internal nodes, bucket heads for leaves.

use bindex_common::page::{KEYLEN_ENTRY, NODE_PREAMBLE, NUM_KEY_LEN, NodeType, PTR_LEN, PageNo};
use bindex_common::{BindexError, Result};
use bytes::{Buf, BufMut, BytesMut};
use std::fmt::Debug;

/// Fails with `PageCorrupted` unless `buf` holds at least `n` more bytes.
pub(crate) fn need(buf: &[u8], n: usize, pageno: PageNo, what: &str) -> Result<()> {
    if buf.remaining() < n {
        return Err(BindexError::PageCorrupted {
            pageno: pageno.get(),
            reason: format!("truncated {what}: need {n} bytes, have {}", buf.remaining()),
        });
    }
    Ok(())
}

/// Reads a non-negative `i32` length or count field.
pub(crate) fn get_len(buf: &mut &[u8], pageno: PageNo, what: &str) -> Result<usize> {
    need(buf, 4, pageno, what)?;
    let value = buf.get_i32_le();
    usize::try_from(value).map_err(|_| BindexError::PageCorrupted {
        pageno: pageno.get(),
        reason: format!("negative {what}: {value}"),
    })
}

/// A key type storable in tree nodes.
pub trait NodeKey: Clone + Ord + Debug {
    /// Bytes this key adds to a node page, including any length entry.
    fn node_len(&self) -> usize;

    /// Bytes this key adds to the `TotLen` field.
    fn packed_len(&self) -> usize;

    /// Appends the key section for `keys`.
    fn encode_keys(keys: &[Self], buf: &mut BytesMut);

    /// Reads the key section for `nkeys` keys.
    fn decode_keys(buf: &mut &[u8], nkeys: usize, pageno: PageNo) -> Result<Vec<Self>>;
}

impl NodeKey for String {
    fn node_len(&self) -> usize {
        KEYLEN_ENTRY + self.len()
    }

    fn packed_len(&self) -> usize {
        self.len()
    }

    fn encode_keys(keys: &[Self], buf: &mut BytesMut) {
        for key in keys {
            buf.put_i32_le(key.len() as i32);
        }
        for key in keys {
            buf.put_slice(key.as_bytes());
        }
    }

    fn decode_keys(buf: &mut &[u8], nkeys: usize, pageno: PageNo) -> Result<Vec<Self>> {
        need(buf, nkeys * KEYLEN_ENTRY, pageno, "key length table")?;
        let lens = (0..nkeys)
            .map(|_| get_len(buf, pageno, "key length"))
            .collect::<Result<Vec<_>>>()?;

        let mut keys = Vec::with_capacity(nkeys);
        for len in lens {
            need(buf, len, pageno, "key bytes")?;
            let bytes = buf[..len].to_vec();
            buf.advance(len);
            let key = String::from_utf8(bytes).map_err(|_| BindexError::PageCorrupted {
                pageno: pageno.get(),
                reason: "key is not valid UTF-8".to_string(),
            })?;
            keys.push(key);
        }
        Ok(keys)
    }
}

impl NodeKey for u64 {
    fn node_len(&self) -> usize {
        NUM_KEY_LEN
    }

    fn packed_len(&self) -> usize {
        NUM_KEY_LEN
    }

    fn encode_keys(keys: &[Self], buf: &mut BytesMut) {
        for &key in keys {
            buf.put_i64_le(key as i64);
        }
    }

    fn decode_keys(buf: &mut &[u8], nkeys: usize, pageno: PageNo) -> Result<Vec<Self>> {
        need(buf, nkeys * NUM_KEY_LEN, pageno, "numeric keys")?;
        Ok((0..nkeys).map(|_| buf.get_i64_le() as u64).collect())
    }
}

/// The fixed preamble of a node page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeHeader {
    pub nodetype: NodeType,
    pub pageno: PageNo,
    pub nkeys: usize,
    pub totlen: usize,
    pub left: u64,
    pub right: u64,
    pub overflow: u64,
    pub prevnode: u64,
}

impl NodeHeader {
    /// Appends the 52-byte preamble.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_i32_le(self.nodetype as i32);
        buf.put_i64_le(self.pageno.get() as i64);
        buf.put_i32_le(self.nkeys as i32);
        buf.put_i32_le(self.totlen as i32);
        buf.put_i64_le(self.left as i64);
        buf.put_i64_le(self.right as i64);
        buf.put_i64_le(self.overflow as i64);
        buf.put_i64_le(self.prevnode as i64);
    }

    /// Reads the preamble of the node stored at `pageno`.
    ///
    /// Rejects pages that are not tree nodes or whose BlockNumber is not
    /// their own offset.
    pub fn decode(buf: &mut &[u8], pageno: PageNo) -> Result<Self> {
        need(buf, NODE_PREAMBLE, pageno, "node preamble")?;

        let raw_type = buf.get_i32_le();
        let nodetype = NodeType::from_i32(raw_type)
            .filter(NodeType::is_node)
            .ok_or(BindexError::UnexpectedNodeType {
                pageno: pageno.get(),
                expected: "tree node",
                found: raw_type,
            })?;

        let block = buf.get_i64_le() as u64;
        if block != pageno.get() {
            return Err(BindexError::PageCorrupted {
                pageno: pageno.get(),
                reason: format!("block number {block} does not match page offset"),
            });
        }

        let nkeys = get_len(buf, pageno, "key count")?;
        let totlen = get_len(buf, pageno, "total key length")?;

        Ok(Self {
            nodetype,
            pageno,
            nkeys,
            totlen,
            left: buf.get_i64_le() as u64,
            right: buf.get_i64_le() as u64,
            overflow: buf.get_i64_le() as u64,
            prevnode: buf.get_i64_le() as u64,
        })
    }
}

/// Position of a node in its tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Pointers lead to child nodes.
    Internal,
    /// Pointers lead to buckets.
    Leaf,
}

/// A decoded tree node.
///
/// Leaf keys are bucket separators: bucket `i` holds records with keys in
/// `[keys[i-1], keys[i])`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node<K> {
    pub pageno: PageNo,
    pub kind: NodeKind,
    pub is_root: bool,
    pub keys: Vec<K>,
    pub pointers: Vec<PageNo>,
    pub left: Option<PageNo>,
    pub right: Option<PageNo>,
    /// Parent page for non-roots, tree level for roots.
    pub prevnode: u64,
}

impl<K: NodeKey> Node<K> {
    /// Creates an empty root leaf with no bucket.
    pub fn empty_root(pageno: PageNo) -> Self {
        Self {
            pageno,
            kind: NodeKind::Leaf,
            is_root: true,
            keys: Vec::new(),
            pointers: vec![PageNo(0)],
            left: None,
            right: None,
            prevnode: 0,
        }
    }

    /// Returns true for a leaf.
    pub fn is_leaf(&self) -> bool {
        self.kind == NodeKind::Leaf
    }

    /// Returns the tree level stored in a root (0 = root is a leaf).
    pub fn level(&self) -> u32 {
        if self.is_root { self.prevnode as u32 } else { 0 }
    }

    /// Returns the parent of a non-root node.
    pub fn parent(&self) -> Option<PageNo> {
        if self.is_root { None } else { Some(PageNo(self.prevnode)) }
    }

    /// Returns the on-disk node type.
    pub fn nodetype(&self) -> NodeType {
        match (self.is_root, self.kind) {
            (true, _) => NodeType::Root,
            (false, NodeKind::Internal) => NodeType::Internal,
            (false, NodeKind::Leaf) => NodeType::Leaf,
        }
    }

    /// Returns the index of the pointer to follow for `key`: the number of
    /// keys less than or equal to it, so equal keys go right.
    pub fn child_index(&self, key: &K) -> usize {
        self.keys.partition_point(|k| k <= key)
    }

    /// Returns the bytes the encoded node occupies.
    pub fn encoded_len(&self) -> usize {
        NODE_PREAMBLE
            + self.keys.iter().map(NodeKey::node_len).sum::<usize>()
            + self.pointers.len() * PTR_LEN
    }

    /// Returns true if the encoded node fits one page.
    pub fn fits(&self, pagesize: usize) -> bool {
        self.encoded_len() <= pagesize
    }

    /// Returns the preamble this node encodes to.
    pub fn header(&self) -> NodeHeader {
        NodeHeader {
            nodetype: self.nodetype(),
            pageno: self.pageno,
            nkeys: self.keys.len(),
            totlen: self.keys.iter().map(NodeKey::packed_len).sum(),
            left: PageNo::to_pointer(self.left),
            right: PageNo::to_pointer(self.right),
            overflow: 0,
            prevnode: self.prevnode,
        }
    }

    /// Encodes the node into a zero-padded page.
    pub fn encode(&self, pagesize: usize) -> Result<Vec<u8>> {
        if self.pointers.len() != self.keys.len() + 1 {
            return Err(BindexError::BTreeCorrupted(format!(
                "node {} has {} keys and {} pointers",
                self.pageno,
                self.keys.len(),
                self.pointers.len()
            )));
        }
        if !self.fits(pagesize) {
            return Err(BindexError::NodeFull);
        }

        let mut buf = BytesMut::with_capacity(pagesize);
        self.header().encode(&mut buf);
        K::encode_keys(&self.keys, &mut buf);
        for pointer in &self.pointers {
            buf.put_i64_le(pointer.get() as i64);
        }
        buf.resize(pagesize, 0);
        Ok(buf.to_vec())
    }

    /// Decodes the node stored at `pageno`.
    pub fn decode(page: &[u8], pageno: PageNo) -> Result<Self> {
        let mut buf = page;
        let header = NodeHeader::decode(&mut buf, pageno)?;
        let max_keys = page.len() / (NUM_KEY_LEN.min(KEYLEN_ENTRY) + PTR_LEN);
        if header.nkeys > max_keys {
            return Err(BindexError::PageCorrupted {
                pageno: pageno.get(),
                reason: format!("impossible key count {}", header.nkeys),
            });
        }

        let keys = K::decode_keys(&mut buf, header.nkeys, pageno)?;
        let packed: usize = keys.iter().map(NodeKey::packed_len).sum();
        if packed != header.totlen {
            return Err(BindexError::PageCorrupted {
                pageno: pageno.get(),
                reason: format!("TotLen {} but keys hold {packed} bytes", header.totlen),
            });
        }

        need(buf, (header.nkeys + 1) * PTR_LEN, pageno, "pointers")?;
        let pointers = (0..=header.nkeys)
            .map(|_| PageNo(buf.get_i64_le() as u64))
            .collect();

        let is_root = header.nodetype == NodeType::Root;
        let kind = match header.nodetype {
            NodeType::Root if header.prevnode == 0 => NodeKind::Leaf,
            NodeType::Root | NodeType::Internal => NodeKind::Internal,
            _ => NodeKind::Leaf,
        };

        Ok(Self {
            pageno,
            kind,
            is_root,
            keys,
            pointers,
            left: PageNo::from_pointer(header.left),
            right: PageNo::from_pointer(header.right),
            prevnode: header.prevnode,
        })
    }
}
