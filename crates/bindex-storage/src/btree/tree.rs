//! Paged B+Tree over bucket records.
//!
//! Leaves hold bucket separators, not records. A leaf pointer names the head
//! page of a bucket whose records fall between the surrounding separators.
//! Buckets split at the median when they outgrow `nperbucket`; nodes split at
//! the median key when they exceed `order - 1` keys. The root never moves:
//! when it splits, both halves go to new pages and the root page is rewritten
//! one level higher. Nothing is ever merged.

use super::bucket::{BucketRecord, read_bucket, write_bucket};
use super::cursor::LeafCursor;
use super::node::{Node, NodeKind, NodeKey};
use crate::cache::PageCache;
use bindex_common::page::PageNo;
use bindex_common::{BindexError, Result};
use std::marker::PhantomData;

/// Outcome of [`BTree::upsert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    /// A new record was stored.
    Inserted,
    /// An existing record was changed by the duplicate rule.
    Updated,
    /// An existing record was left as it was.
    Unchanged,
}

/// Shape summary returned by [`BTree::check`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeCheck {
    /// Levels above the leaves.
    pub level: u32,
    /// Internal nodes, including an internal root.
    pub internal_nodes: usize,
    /// Leaf nodes, including a leaf root.
    pub leaves: usize,
    /// Bucket chains.
    pub buckets: usize,
    /// Records across all buckets.
    pub entries: usize,
}

/// A B+Tree rooted at a fixed page, borrowed over a page cache.
pub struct BTree<'c, R: BucketRecord> {
    cache: &'c mut PageCache,
    root: PageNo,
    order: usize,
    nperbucket: usize,
    _record: PhantomData<R>,
}

impl<'c, R: BucketRecord> BTree<'c, R> {
    /// Opens the tree rooted at `root`.
    pub fn new(cache: &'c mut PageCache, root: PageNo, order: usize, nperbucket: usize) -> Self {
        Self {
            cache,
            root,
            order,
            nperbucket,
            _record: PhantomData,
        }
    }

    /// Writes an empty root leaf and returns its page.
    ///
    /// With `at == None` a fresh page is allocated.
    pub fn create_root(cache: &mut PageCache, at: Option<PageNo>) -> Result<PageNo> {
        let pageno = match at {
            Some(pageno) => pageno,
            None => cache.allocate()?,
        };
        let root = Node::<R::Key>::empty_root(pageno);
        cache.write_page(pageno, &root.encode(cache.pagesize())?)?;
        tracing::debug!(root = %pageno, bucket = R::NAME, "created tree root");
        Ok(pageno)
    }

    /// Returns the root page.
    pub fn root(&self) -> PageNo {
        self.root
    }

    /// Returns the number of levels above the leaves.
    pub fn level(&mut self) -> Result<u32> {
        Ok(self.read_root()?.level())
    }

    /// Returns the write generation of the underlying cache.
    pub(crate) fn generation(&self) -> u64 {
        self.cache.generation()
    }

    pub(crate) fn read_node(&mut self, pageno: PageNo) -> Result<Node<R::Key>> {
        let page = self.cache.fetch(pageno)?;
        Node::decode(page, pageno)
    }

    fn read_root(&mut self) -> Result<Node<R::Key>> {
        let root = self.read_node(self.root)?;
        if !root.is_root {
            return Err(BindexError::UnexpectedNodeType {
                pageno: self.root.get(),
                expected: "root",
                found: root.nodetype() as i32,
            });
        }
        // Every level needs at least one page of its own
        if u64::from(root.level()) >= self.cache.page_count() {
            return Err(BindexError::BTreeCorrupted(format!(
                "root {} claims {} levels in a {}-page file",
                self.root,
                root.level(),
                self.cache.page_count()
            )));
        }
        Ok(root)
    }

    fn write_node(&mut self, node: &Node<R::Key>) -> Result<()> {
        let page = node.encode(self.cache.pagesize())?;
        self.cache.write_page(node.pageno, &page)
    }

    pub(crate) fn read_bucket(&mut self, head: PageNo) -> Result<Vec<R>> {
        read_bucket(self.cache, head)
    }

    /// Descends to the leaf responsible for `key`.
    ///
    /// Returns the leaf and the internal nodes above it, root first.
    pub fn find_leaf(&mut self, key: &R::Key) -> Result<(Node<R::Key>, Vec<Node<R::Key>>)> {
        self.descend(|node| node.child_index(key))
    }

    /// Descends to the leftmost leaf.
    pub fn first_leaf(&mut self) -> Result<Node<R::Key>> {
        Ok(self.descend(|_| 0)?.0)
    }

    fn descend<F>(&mut self, mut pick: F) -> Result<(Node<R::Key>, Vec<Node<R::Key>>)>
    where
        F: FnMut(&Node<R::Key>) -> usize,
    {
        let mut node = self.read_root()?;
        let level = node.level();
        let mut path = Vec::with_capacity(level as usize);

        for depth in 0..level {
            if node.is_leaf() {
                return Err(BindexError::BTreeCorrupted(format!(
                    "leaf {} at depth {depth} of a {level}-level tree",
                    node.pageno
                )));
            }
            let child = node.pointers[pick(&node)];
            let next = self.read_node(child)?;
            if next.is_root {
                return Err(BindexError::UnexpectedNodeType {
                    pageno: child.get(),
                    expected: "child node",
                    found: next.nodetype() as i32,
                });
            }
            path.push(std::mem::replace(&mut node, next));
        }

        if !node.is_leaf() {
            return Err(BindexError::BTreeCorrupted(format!(
                "internal node {} below level {level}",
                node.pageno
            )));
        }
        Ok((node, path))
    }

    /// Returns the record stored under `key`.
    pub fn find(&mut self, key: &R::Key) -> Result<Option<R>> {
        let (leaf, _) = self.find_leaf(key)?;
        let head = leaf.pointers[leaf.child_index(key)];
        if head.get() == 0 {
            return Ok(None);
        }
        let entries = self.read_bucket(head)?;
        Ok(entries
            .binary_search_by(|e| e.key().cmp(key))
            .ok()
            .map(|pos| entries[pos].clone()))
    }

    /// Stores `record` unless its key exists.
    ///
    /// Returns false (and changes nothing) for an existing key.
    pub fn insert(&mut self, record: R) -> Result<bool> {
        Ok(self.upsert(record, |_| false)? == Upsert::Inserted)
    }

    /// Stores `record`, or applies `on_duplicate` to the record already
    /// stored under its key. The rule returns true if it changed the record.
    pub fn upsert<F>(&mut self, record: R, on_duplicate: F) -> Result<Upsert>
    where
        F: FnOnce(&mut R) -> bool,
    {
        let key = record.key().clone();
        let (mut leaf, path) = self.find_leaf(&key)?;

        if leaf.keys.is_empty() && leaf.pointers[0].get() == 0 {
            let head = self.cache.allocate()?;
            write_bucket(self.cache, head, &[record], false)?;
            leaf.pointers[0] = head;
            self.write_node(&leaf)?;
            return Ok(Upsert::Inserted);
        }

        let index = leaf.child_index(&key);
        let head = leaf.pointers[index];
        if head.get() == 0 {
            return Err(BindexError::BTreeCorrupted(format!(
                "leaf {} has no bucket at slot {index}",
                leaf.pageno
            )));
        }

        let mut entries = self.read_bucket(head)?;
        match entries.binary_search_by(|e| e.key().cmp(&key)) {
            Ok(pos) => {
                if !on_duplicate(&mut entries[pos]) {
                    return Ok(Upsert::Unchanged);
                }
                write_bucket(self.cache, head, &entries, true)?;
                Ok(Upsert::Updated)
            }
            Err(pos) => {
                entries.insert(pos, record);
                if entries.len() <= self.nperbucket {
                    write_bucket(self.cache, head, &entries, true)?;
                    return Ok(Upsert::Inserted);
                }

                let upper = entries.split_off(entries.len() / 2);
                let separator = upper[0].key().clone();
                let new_head = self.cache.allocate()?;
                write_bucket(self.cache, head, &entries, true)?;
                write_bucket(self.cache, new_head, &upper, false)?;
                tracing::debug!(
                    leaf = %leaf.pageno,
                    bucket = %head,
                    new_bucket = %new_head,
                    separator = ?separator,
                    "split bucket"
                );

                leaf.keys.insert(index, separator);
                leaf.pointers.insert(index + 1, new_head);
                self.store_node(leaf, path)?;
                Ok(Upsert::Inserted)
            }
        }
    }

    /// Replaces the record stored under `record`'s key.
    ///
    /// Returns false if the key is absent.
    pub fn update(&mut self, record: R) -> Result<bool> {
        let key = record.key().clone();
        self.modify(&key, |entry| {
            *entry = record;
            true
        })
    }

    /// Removes the record stored under `key` and returns it.
    ///
    /// The bucket is compacted; empty buckets and separators stay.
    pub fn remove(&mut self, key: &R::Key) -> Result<Option<R>> {
        let (leaf, _) = self.find_leaf(key)?;
        let head = leaf.pointers[leaf.child_index(key)];
        if head.get() == 0 {
            return Ok(None);
        }
        let mut entries = self.read_bucket(head)?;
        match entries.binary_search_by(|e| e.key().cmp(key)) {
            Ok(pos) => {
                let removed = entries.remove(pos);
                write_bucket(self.cache, head, &entries, true)?;
                Ok(Some(removed))
            }
            Err(_) => Ok(None),
        }
    }

    /// Applies `change` to the record stored under `key`, writing the bucket
    /// back if it returns true. Returns false if the key is absent.
    pub fn modify<F>(&mut self, key: &R::Key, change: F) -> Result<bool>
    where
        F: FnOnce(&mut R) -> bool,
    {
        let (leaf, _) = self.find_leaf(key)?;
        let head = leaf.pointers[leaf.child_index(key)];
        if head.get() == 0 {
            return Ok(false);
        }
        let mut entries = self.read_bucket(head)?;
        match entries.binary_search_by(|e| e.key().cmp(key)) {
            Ok(pos) => {
                if change(&mut entries[pos]) {
                    write_bucket(self.cache, head, &entries, true)?;
                }
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    /// Returns the smallest record.
    pub fn first(&mut self) -> Result<Option<R>> {
        LeafCursor::new(None).next(self)
    }

    /// Returns true if no records are stored.
    pub fn is_empty(&mut self) -> Result<bool> {
        Ok(self.first()?.is_none())
    }

    /// Returns every record in key order by walking the leaf chain.
    pub fn entries(&mut self) -> Result<Vec<R>> {
        let mut cursor = LeafCursor::new(None);
        let mut entries = Vec::new();
        while let Some(entry) = cursor.next(self)? {
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Writes `node`, splitting it (and its ancestors) as needed.
    fn store_node(&mut self, mut node: Node<R::Key>, mut path: Vec<Node<R::Key>>) -> Result<()> {
        let pagesize = self.cache.pagesize();
        loop {
            if node.keys.len() < self.order && node.fits(pagesize) {
                return self.write_node(&node);
            }
            if node.keys.len() < 3 {
                return Err(BindexError::NodeFull);
            }
            if node.is_root {
                return self.split_root(node);
            }

            let mut parent = path.pop().ok_or_else(|| {
                BindexError::BTreeCorrupted(format!("non-root node {} has no parent", node.pageno))
            })?;

            let right_page = self.cache.allocate()?;
            let (promoted, mut right) = split_node(&mut node, right_page)?;
            right.prevnode = node.prevnode;

            if node.is_leaf() {
                right.left = Some(node.pageno);
                right.right = node.right;
                if let Some(next) = node.right {
                    let mut sibling = self.read_node(next)?;
                    sibling.left = Some(right_page);
                    self.write_node(&sibling)?;
                }
                node.right = Some(right_page);
            } else {
                self.reparent(&right.pointers, right_page)?;
            }

            self.write_node(&node)?;
            self.write_node(&right)?;
            tracing::debug!(
                node = %node.pageno,
                new_node = %right_page,
                leaf = node.is_leaf(),
                promoted = ?promoted,
                "split node"
            );

            let slot = parent
                .pointers
                .iter()
                .position(|&p| p == node.pageno)
                .ok_or_else(|| {
                    BindexError::BTreeCorrupted(format!(
                        "node {} is not a child of {}",
                        node.pageno, parent.pageno
                    ))
                })?;
            parent.keys.insert(slot, promoted);
            parent.pointers.insert(slot + 1, right_page);
            node = parent;
        }
    }

    /// Moves both halves of a full root to new pages and rewrites the root
    /// as an internal node one level higher.
    fn split_root(&mut self, mut root: Node<R::Key>) -> Result<()> {
        let level = root.level();
        let left_page = self.cache.allocate()?;
        let right_page = self.cache.allocate()?;

        let (promoted, mut right) = split_node(&mut root, right_page)?;
        let mut left = Node {
            pageno: left_page,
            kind: root.kind,
            is_root: false,
            keys: std::mem::take(&mut root.keys),
            pointers: std::mem::take(&mut root.pointers),
            left: None,
            right: None,
            prevnode: root.pageno.get(),
        };
        right.prevnode = root.pageno.get();

        if left.is_leaf() {
            left.right = Some(right_page);
            right.left = Some(left_page);
        } else {
            self.reparent(&left.pointers, left_page)?;
            self.reparent(&right.pointers, right_page)?;
        }

        let new_root = Node {
            pageno: root.pageno,
            kind: NodeKind::Internal,
            is_root: true,
            keys: vec![promoted],
            pointers: vec![left_page, right_page],
            left: None,
            right: None,
            prevnode: u64::from(level + 1),
        };

        self.write_node(&left)?;
        self.write_node(&right)?;
        self.write_node(&new_root)?;
        tracing::debug!(
            root = %new_root.pageno,
            left = %left_page,
            right = %right_page,
            level = level + 1,
            "split root"
        );
        Ok(())
    }

    fn reparent(&mut self, children: &[PageNo], parent: PageNo) -> Result<()> {
        for &child in children {
            let mut node = self.read_node(child)?;
            if node.prevnode != parent.get() {
                node.prevnode = parent.get();
                self.write_node(&node)?;
            }
        }
        Ok(())
    }

    /// Walks the whole tree and verifies its structure.
    pub fn check(&mut self) -> Result<TreeCheck> {
        let root = self.read_root()?;
        let mut report = TreeCheck {
            level: root.level(),
            ..Default::default()
        };

        let mut leaves = Vec::new();
        self.check_node(root, 0, None, None, &mut report, &mut leaves)?;

        // Forward and backward leaf chains must agree with tree order
        for (i, leaf) in leaves.iter().enumerate() {
            let node = self.read_node(*leaf)?;
            let expected_left = if i == 0 { None } else { Some(leaves[i - 1]) };
            let expected_right = leaves.get(i + 1).copied();
            if report.level > 0 && (node.left != expected_left || node.right != expected_right) {
                return Err(BindexError::BTreeCorrupted(format!(
                    "leaf {} chain links {:?}/{:?}, expected {:?}/{:?}",
                    node.pageno, node.left, node.right, expected_left, expected_right
                )));
            }
        }
        Ok(report)
    }

    fn check_node(
        &mut self,
        node: Node<R::Key>,
        depth: u32,
        lower: Option<&R::Key>,
        upper: Option<&R::Key>,
        report: &mut TreeCheck,
        leaves: &mut Vec<PageNo>,
    ) -> Result<()> {
        let corrupt = |msg: String| Err(BindexError::BTreeCorrupted(msg));

        if !node.is_root && (node.keys.is_empty() || node.keys.len() >= self.order) {
            return corrupt(format!("node {} holds {} keys", node.pageno, node.keys.len()));
        }
        if node.pointers.len() != node.keys.len() + 1 {
            return corrupt(format!("node {} pointer count", node.pageno));
        }
        if !node.keys.windows(2).all(|w| w[0] < w[1]) {
            return corrupt(format!("node {} keys out of order", node.pageno));
        }
        if let (Some(lo), Some(first)) = (lower, node.keys.first()) {
            if first < lo {
                return corrupt(format!("node {} key below its range", node.pageno));
            }
        }
        if let (Some(hi), Some(last)) = (upper, node.keys.last()) {
            if last >= hi {
                return corrupt(format!("node {} key above its range", node.pageno));
            }
        }
        if node.is_leaf() != (depth == report.level) {
            return corrupt(format!("node {} at depth {depth} has wrong kind", node.pageno));
        }

        let count = node.pointers.len();
        if node.is_leaf() {
            report.leaves += 1;
            leaves.push(node.pageno);
            for (i, &head) in node.pointers.iter().enumerate() {
                if head.get() == 0 {
                    if count == 1 && node.is_root {
                        continue;
                    }
                    return corrupt(format!("leaf {} slot {i} has no bucket", node.pageno));
                }
                let entries = self.read_bucket(head)?;
                let lo = if i == 0 { lower } else { Some(&node.keys[i - 1]) };
                let hi = if i + 1 == count { upper } else { Some(&node.keys[i]) };
                for entry in &entries {
                    let key = entry.key();
                    if lo.is_some_and(|lo| key < lo) || hi.is_some_and(|hi| key >= hi) {
                        return corrupt(format!(
                            "record {key:?} in bucket {head} outside its separators"
                        ));
                    }
                }
                report.buckets += 1;
                report.entries += entries.len();
            }
            return Ok(());
        }

        report.internal_nodes += 1;
        for i in 0..count {
            let child_page = node.pointers[i];
            let child = self.read_node(child_page)?;
            if child.parent() != Some(node.pageno) {
                return corrupt(format!(
                    "child {child_page} of {} has parent {:?}",
                    node.pageno,
                    child.parent()
                ));
            }
            let lo = if i == 0 { lower } else { Some(&node.keys[i - 1]) };
            let hi = if i + 1 == count { upper } else { Some(&node.keys[i]) };
            self.check_node(child, depth + 1, lo, hi, report, leaves)?;
        }
        Ok(())
    }
}

/// Splits `node` at its median key.
///
/// `node` keeps the lower half. Returns the promoted median and the upper
/// half as a new node at `right_page`, with links left for the caller.
fn split_node<K: NodeKey>(node: &mut Node<K>, right_page: PageNo) -> Result<(K, Node<K>)> {
    let mid = node.keys.len() / 2;
    let right_keys = node.keys.split_off(mid + 1);
    let right_pointers = node.pointers.split_off(mid + 1);
    let promoted = node.keys.pop().ok_or_else(|| {
        BindexError::BTreeCorrupted(format!("split of empty node {}", node.pageno))
    })?;

    let right = Node {
        pageno: right_page,
        kind: node.kind,
        is_root: false,
        keys: right_keys,
        pointers: right_pointers,
        left: None,
        right: None,
        prevnode: 0,
    };
    Ok((promoted, right))
}
