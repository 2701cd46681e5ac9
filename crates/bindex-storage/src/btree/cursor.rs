//! Leaf-chain cursor.

use super::bucket::BucketRecord;
use super::tree::BTree;
use bindex_common::page::PageNo;
use bindex_common::Result;
use std::collections::VecDeque;

/// Walks records in key order, bucket by bucket along the leaf chain.
///
/// The cursor holds no borrow of the tree between calls, so the caller can
/// interleave it with other operations on the same cache. When the cache has
/// been written since the cursor last positioned itself, it drops what it had
/// buffered and descends again from the last key it returned. Keys come back
/// strictly ascending with no record returned twice. Records inserted
/// meanwhile are returned when they sort after the last key returned.
#[derive(Debug, Clone)]
pub struct LeafCursor<R: BucketRecord> {
    /// Lower bound for returned keys; `None` starts at the smallest.
    start: Option<R::Key>,
    /// Key of the last record returned.
    last: Option<R::Key>,
    /// Leaf being scanned.
    leaf: Option<PageNo>,
    /// Next bucket slot of `leaf` to read.
    bucket: usize,
    /// Records read but not yet returned, valid for `generation`.
    pending: VecDeque<R>,
    /// Cache generation `leaf` and `bucket` were read at; `None` until the
    /// first call positions the cursor.
    generation: Option<u64>,
    /// True once the chain is exhausted.
    done: bool,
}

impl<R: BucketRecord> LeafCursor<R> {
    /// Creates a cursor returning keys `>= start`.
    pub fn new(start: Option<R::Key>) -> Self {
        Self {
            start,
            last: None,
            leaf: None,
            bucket: 0,
            pending: VecDeque::new(),
            generation: None,
            done: false,
        }
    }

    /// Returns true once the cursor has run off the end of the chain.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Stops the cursor; later calls return `None`.
    pub fn finish(&mut self) {
        self.done = true;
        self.pending.clear();
    }

    /// Returns the next record, or `None` at the end of the chain.
    pub fn next(&mut self, tree: &mut BTree<'_, R>) -> Result<Option<R>> {
        loop {
            if self.done {
                return Ok(None);
            }
            if self.generation != Some(tree.generation()) {
                self.pending.clear();
                self.seek(tree)?;
            }
            if let Some(record) = self.pending.pop_front() {
                self.last = Some(record.key().clone());
                return Ok(Some(record));
            }

            let Some(pageno) = self.leaf else {
                self.done = true;
                continue;
            };

            let leaf = tree.read_node(pageno)?;
            if self.bucket >= leaf.pointers.len() {
                self.leaf = leaf.right;
                self.bucket = 0;
                continue;
            }

            let head = leaf.pointers[self.bucket];
            self.bucket += 1;
            if head.get() == 0 {
                continue;
            }
            let start = self.start.as_ref();
            let last = self.last.as_ref();
            self.pending.extend(tree.read_bucket(head)?.into_iter().filter(|r| {
                start.is_none_or(|s| r.key() >= s) && last.is_none_or(|l| r.key() > l)
            }));
        }
    }

    /// Positions the cursor on the bucket holding the last key returned, or
    /// the start key when nothing has been returned yet.
    fn seek(&mut self, tree: &mut BTree<'_, R>) -> Result<()> {
        let (leaf, bucket) = match self.last.as_ref().or(self.start.as_ref()) {
            Some(key) => {
                let (leaf, _) = tree.find_leaf(key)?;
                let slot = leaf.child_index(key);
                (leaf, slot)
            }
            None => (tree.first_leaf()?, 0),
        };
        self.leaf = Some(leaf.pageno);
        self.bucket = bucket;
        self.generation = Some(tree.generation());
        Ok(())
    }
}
