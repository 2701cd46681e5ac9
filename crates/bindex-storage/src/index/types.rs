//! Value types exchanged with callers of the index.

use crate::btree::{IdEntry, NumEntry, PriEntry, SecEntry};
use bindex_common::page::PageNo;
use serde::{Deserialize, Serialize};

/// Result of an insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InsertOutcome {
    /// A new primary key was stored.
    Inserted,
    /// A new member was stored under an existing keyword.
    Added,
    /// The key existed and its duplicate count went up: a new posting for an
    /// identifier, or a repeated keyword member.
    Duplicate,
    /// The exact posting was already stored. Nothing changed.
    AlreadyPresent,
}

/// An identifier and one of its postings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BtId {
    pub id: String,
    /// Database file number of the entry.
    pub dbno: u32,
    /// Postings beyond the first.
    pub dups: u32,
    /// Entry offset in the data file.
    pub offset: u64,
    /// Entry offset in the reference file.
    pub refoffset: u64,
}

impl BtId {
    pub fn new(id: impl Into<String>, dbno: u32, offset: u64, refoffset: u64) -> Self {
        Self {
            id: id.into(),
            dbno,
            dups: 0,
            offset,
            refoffset,
        }
    }

    pub(crate) fn from_posting(id: &str, dups: u32, posting: &NumEntry) -> Self {
        Self {
            id: id.to_string(),
            dbno: posting.dbno,
            dups,
            offset: posting.offset,
            refoffset: posting.refoffset,
        }
    }
}

impl From<&IdEntry> for BtId {
    fn from(entry: &IdEntry) -> Self {
        Self {
            id: entry.id.clone(),
            dbno: entry.dbno,
            dups: entry.dups,
            offset: entry.offset,
            refoffset: entry.refoffset,
        }
    }
}

/// A keyword and the root of its secondary tree.
///
/// `id` names the member being inserted or deleted; lookups leave it empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BtPri {
    pub keyword: String,
    pub treeblock: PageNo,
    pub id: String,
}

impl BtPri {
    pub fn new(keyword: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            treeblock: PageNo(0),
            id: id.into(),
        }
    }
}

impl From<&PriEntry> for BtPri {
    fn from(entry: &PriEntry) -> Self {
        Self {
            keyword: entry.keyword.clone(),
            treeblock: entry.treeblock,
            id: String::new(),
        }
    }
}

/// A raw ID entry as stored in the primary tree.
///
/// With `dups > 0` the postings live in a numeric tree rooted at `treeblock`
/// and `offset` holds the same page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BtHybrid {
    pub key: String,
    pub dbno: u32,
    pub dups: u32,
    pub offset: u64,
    pub refoffset: u64,
    pub treeblock: PageNo,
}

impl BtHybrid {
    pub fn new(key: impl Into<String>, dbno: u32, offset: u64, refoffset: u64) -> Self {
        Self {
            key: key.into(),
            dbno,
            dups: 0,
            offset,
            refoffset,
            treeblock: PageNo(0),
        }
    }
}

impl From<&IdEntry> for BtHybrid {
    fn from(entry: &IdEntry) -> Self {
        Self {
            key: entry.id.clone(),
            dbno: entry.dbno,
            dups: entry.dups,
            offset: entry.offset,
            refoffset: entry.refoffset,
            treeblock: if entry.dups > 0 {
                PageNo(entry.offset)
            } else {
                PageNo(0)
            },
        }
    }
}

/// One posting in a numeric duplicate tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BtNumId {
    pub offset: u64,
    pub refoffset: u64,
    pub dbno: u32,
}

impl From<&NumEntry> for BtNumId {
    fn from(entry: &NumEntry) -> Self {
        Self {
            offset: entry.offset,
            refoffset: entry.refoffset,
            dbno: entry.dbno,
        }
    }
}

/// A keyword member and its duplicate-insert count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BtSecId {
    pub id: String,
    pub dups: u32,
}

impl From<SecEntry> for BtSecId {
    fn from(entry: SecEntry) -> Self {
        Self {
            id: entry.id,
            dups: entry.dups,
        }
    }
}
