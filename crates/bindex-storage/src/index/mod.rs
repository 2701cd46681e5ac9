//! Index cache: the public face of one index file.
//!
//! An [`IndexCache`] owns the page cache of `<name>.<ext>`, the parameters
//! persisted in `<name>.p<ext>` and, when opened for writing, the lock file
//! `<name>.<ext>.lock`. ID indexes (`IndexField::Id`) map identifiers to postings;
//! every other field is a keyword index mapping keywords to member IDs
//! through one secondary tree per keyword.
//!
//! The first fatal error poisons the cache: every later call fails with
//! `Poisoned` and dropping it writes nothing back.

mod cursor;
mod lock;
mod params;
mod shared;
mod types;

pub use cursor::{IdWildCursor, KeyWildCursor};
pub use lock::IndexLock;
pub use params::{read_params, write_params};
pub use shared::SharedIndex;
pub use types::{BtHybrid, BtId, BtNumId, BtPri, BtSecId, InsertOutcome};

use crate::btree::{
    BTree, BucketRecord, IdEntry, Node, NumEntry, PriEntry, SecEntry, TreeCheck, Upsert,
    has_wildcard,
};
use crate::cache::{CacheStats, PageCache};
use crate::disk::PageStore;
use bindex_common::page::PageNo;
use bindex_common::{BindexError, IndexConfig, IndexParams, OpenMode, Result};
use std::path::PathBuf;

/// An open index file.
pub struct IndexCache {
    config: IndexConfig,
    params: IndexParams,
    cache: PageCache,
    /// Reason of the fatal error that poisoned this cache.
    poisoned: Option<String>,
    /// Set once `close` has run.
    closed: bool,
    /// Held while writable; released after the final flush.
    _lock: Option<IndexLock>,
}

impl IndexCache {
    /// Creates a new, empty index, truncating any existing files.
    pub fn create(config: IndexConfig) -> Result<Self> {
        config.validate()?;
        let lock = IndexLock::acquire(&config)?;
        let params = config.initial_params();

        let store = PageStore::create(config.index_path())?;
        write_params(&config.params_path(), &params)?;
        let cache = PageCache::new(store, params.pagesize, params.cachesize)?;

        tracing::info!(
            path = %config.index_path().display(),
            pagesize = params.pagesize,
            order = params.order,
            fill = params.fill,
            cachesize = params.cachesize,
            "created index"
        );

        Ok(Self {
            config: IndexConfig {
                mode: OpenMode::Create,
                ..config
            },
            params,
            cache,
            poisoned: None,
            closed: false,
            _lock: Some(lock),
        })
    }

    /// Opens an index according to `config.mode`.
    ///
    /// `Read` and `Update` take the geometry from the parameter file; only
    /// the cache size comes from `config`. `Create` behaves as [`create`].
    ///
    /// [`create`]: IndexCache::create
    pub fn open(config: IndexConfig) -> Result<Self> {
        if config.mode == OpenMode::Create {
            return Self::create(config);
        }
        if config.name.is_empty() {
            return Err(BindexError::ConfigError("index name is empty".to_string()));
        }

        let mut params = read_params(&config.params_path())?;
        let requested = config.initial_params();
        if (params.order, params.fill, params.pagesize, params.sorder, params.sfill, params.kwlimit)
            != (
                requested.order,
                requested.fill,
                requested.pagesize,
                requested.sorder,
                requested.sfill,
                requested.kwlimit,
            )
        {
            tracing::warn!(
                path = %config.params_path().display(),
                order = params.order,
                pagesize = params.pagesize,
                "parameter file overrides requested geometry"
            );
        }
        params.cachesize = config.cachesize;
        params.validate()?;

        let writable = config.mode.is_writable();
        let lock = if writable {
            Some(IndexLock::acquire(&config)?)
        } else {
            None
        };
        let store = PageStore::open(config.index_path(), !writable)?;
        let mut cache = PageCache::new(store, params.pagesize, params.cachesize)?;

        if cache.totsize() > 0 {
            let level = Node::<String>::decode(cache.fetch(PageNo::ROOT)?, PageNo::ROOT)?.level();
            if level != params.level {
                tracing::warn!(file = params.level, root = level, "stale level in parameter file");
                params.level = level;
            }
        }

        tracing::info!(
            path = %config.index_path().display(),
            mode = ?config.mode,
            pagesize = params.pagesize,
            order = params.order,
            count = params.count,
            "opened index"
        );

        Ok(Self {
            config,
            params,
            cache,
            poisoned: None,
            closed: false,
            _lock: lock,
        })
    }

    /// Flushes every dirty page, writes the parameter file and releases the
    /// lock.
    pub fn close(mut self) -> Result<()> {
        let result = self.run(|index| index.flush());
        self.closed = true;
        if result.is_ok() {
            tracing::info!(path = %self.path().display(), count = self.params.count, "closed index");
        }
        result
    }

    /// Writes dirty pages and the parameter file without closing.
    pub fn sync(&mut self) -> Result<()> {
        self.run(|index| index.flush())
    }

    fn flush(&mut self) -> Result<()> {
        if !self.config.mode.is_writable() {
            return Ok(());
        }
        self.cache.sync_all()?;
        write_params(&self.config.params_path(), &self.params)
    }

    /// Runs `op`, poisoning the cache if it fails fatally.
    fn run<T>(&mut self, op: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if let Some(reason) = &self.poisoned {
            return Err(BindexError::Poisoned(reason.clone()));
        }
        let result = op(self);
        if let Err(e) = &result {
            if e.is_fatal() {
                tracing::error!(path = %self.path().display(), error = %e, "index cache poisoned");
                self.poisoned = Some(e.to_string());
            }
        }
        result
    }

    /// Returns the index file path.
    pub fn path(&self) -> PathBuf {
        self.config.index_path()
    }

    /// Returns the configuration the index was opened with.
    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// Returns the current parameters, as they will be persisted.
    pub fn params(&self) -> IndexParams {
        self.params
    }

    /// Returns the page cache counters.
    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Returns true once a fatal error has poisoned the cache.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.is_some()
    }

    fn primary<R: BucketRecord>(&mut self) -> BTree<'_, R> {
        BTree::new(&mut self.cache, PageNo::ROOT, self.params.order, self.params.fill)
    }

    fn secondary<R: BucketRecord>(&mut self, root: PageNo) -> BTree<'_, R> {
        BTree::new(&mut self.cache, root, self.params.sorder, self.params.sfill)
    }

    fn has_primary_root(&self) -> bool {
        self.cache.totsize() > 0
    }

    fn ensure_primary_root<R: BucketRecord>(&mut self) -> Result<()> {
        if self.has_primary_root() {
            return Ok(());
        }
        let root = BTree::<R>::create_root(&mut self.cache, None)?;
        if root != PageNo::ROOT {
            return Err(BindexError::Internal(format!("primary root created at {root}")));
        }
        Ok(())
    }

    fn refresh_level<R: BucketRecord>(&mut self) -> Result<()> {
        self.params.level = self.primary::<R>().level()?;
        Ok(())
    }

    fn expect_kind(&self, keyword: bool) -> Result<()> {
        if self.config.field.is_keyword() != keyword {
            let (have, want) = if keyword { ("an ID", "keyword") } else { ("a keyword", "ID") };
            return Err(BindexError::ConfigError(format!(
                "{} is {have} index; {want} operations do not apply",
                self.path().display()
            )));
        }
        Ok(())
    }

    fn check_writable(&self) -> Result<()> {
        if !self.config.mode.is_writable() {
            return Err(BindexError::ReadOnly);
        }
        Ok(())
    }

    fn check_key(&self, key: &str) -> Result<()> {
        if key.is_empty() {
            return Err(BindexError::InvalidParameter {
                name: "key".to_string(),
                value: String::new(),
            });
        }
        if key.len() > self.params.kwlimit {
            return Err(BindexError::KeyTooLarge {
                size: key.len(),
                max: self.params.kwlimit,
            });
        }
        Ok(())
    }

    // ID indexes

    /// Stores a posting for `id`.
    ///
    /// A second posting at a different offset moves the identifier's
    /// postings into a numeric duplicate tree.
    pub fn insert_id(&mut self, id: &BtId) -> Result<InsertOutcome> {
        self.run(|index| {
            index.expect_kind(false)?;
            index.check_writable()?;
            index.check_key(&id.id)?;
            index.ensure_primary_root::<IdEntry>()?;

            let posting = NumEntry {
                offset: id.offset,
                refoffset: id.refoffset,
                dbno: id.dbno,
            };
            let existing = index.primary::<IdEntry>().find(&id.id)?;
            let outcome = match existing {
                None => {
                    index.primary().insert(IdEntry {
                        id: id.id.clone(),
                        dbno: id.dbno,
                        dups: 0,
                        offset: id.offset,
                        refoffset: id.refoffset,
                    })?;
                    index.params.count += 1;
                    InsertOutcome::Inserted
                }
                Some(entry) if entry.dups == 0 && entry.offset == id.offset => {
                    InsertOutcome::AlreadyPresent
                }
                Some(mut entry) if entry.dups == 0 => {
                    let root = BTree::<NumEntry>::create_root(&mut index.cache, None)?;
                    tracing::debug!(id = %entry.id, root = %root, "created duplicate tree");
                    let mut dups = index.secondary::<NumEntry>(root);
                    dups.insert(NumEntry {
                        offset: entry.offset,
                        refoffset: entry.refoffset,
                        dbno: entry.dbno,
                    })?;
                    dups.insert(posting)?;

                    entry.offset = root.get();
                    entry.refoffset = 0;
                    entry.dups = 1;
                    index.primary().update(entry)?;
                    InsertOutcome::Duplicate
                }
                Some(mut entry) => {
                    if !index.secondary(PageNo(entry.offset)).insert(posting)? {
                        return Ok(InsertOutcome::AlreadyPresent);
                    }
                    entry.dups += 1;
                    index.primary().update(entry)?;
                    InsertOutcome::Duplicate
                }
            };
            index.refresh_level::<IdEntry>()?;
            Ok(outcome)
        })
    }

    fn find_id(&mut self, key: &str) -> Result<Option<IdEntry>> {
        self.expect_kind(false)?;
        if !self.has_primary_root() {
            return Ok(None);
        }
        self.primary::<IdEntry>().find(&key.to_string())
    }

    fn postings(&mut self, entry: &IdEntry) -> Result<Vec<NumEntry>> {
        if entry.dups == 0 {
            return Ok(vec![NumEntry {
                offset: entry.offset,
                refoffset: entry.refoffset,
                dbno: entry.dbno,
            }]);
        }
        let postings = self.secondary::<NumEntry>(PageNo(entry.offset)).entries()?;
        if postings.len() != entry.dups as usize + 1 {
            return Err(BindexError::BTreeCorrupted(format!(
                "{} claims {} duplicates, tree at {} holds {} postings",
                entry.id,
                entry.dups,
                entry.offset,
                postings.len()
            )));
        }
        Ok(postings)
    }

    /// Resolves a stored entry to its first posting.
    fn resolve_id(&mut self, entry: &IdEntry) -> Result<BtId> {
        if entry.dups == 0 {
            return Ok(BtId::from(entry));
        }
        let first = self
            .secondary::<NumEntry>(PageNo(entry.offset))
            .first()?
            .ok_or_else(|| {
                BindexError::BTreeCorrupted(format!("duplicate tree of {} is empty", entry.id))
            })?;
        Ok(BtId::from_posting(&entry.id, entry.dups, &first))
    }

    /// Looks up an identifier. For duplicated identifiers the posting with
    /// the lowest offset is returned and `dups` counts the others.
    pub fn id_from_key(&mut self, key: &str) -> Result<Option<BtId>> {
        self.run(|index| match index.find_id(key)? {
            Some(entry) => index.resolve_id(&entry).map(Some),
            None => Ok(None),
        })
    }

    /// Returns the entry stored for an identifier without resolving
    /// duplicates.
    pub fn hyb_from_key(&mut self, key: &str) -> Result<Option<BtHybrid>> {
        self.run(|index| Ok(index.find_id(key)?.as_ref().map(BtHybrid::from)))
    }

    /// Returns every posting of an identifier in offset order.
    pub fn dup_from_key(&mut self, key: &str) -> Result<Vec<BtId>> {
        self.run(|index| {
            let Some(entry) = index.find_id(key)? else {
                return Ok(Vec::new());
            };
            Ok(index
                .postings(&entry)?
                .iter()
                .map(|posting| BtId::from_posting(&entry.id, entry.dups, posting))
                .collect())
        })
    }

    /// Returns every posting of an identifier as numeric entries.
    pub fn num_ids(&mut self, key: &str) -> Result<Vec<BtNumId>> {
        self.run(|index| {
            let Some(entry) = index.find_id(key)? else {
                return Ok(Vec::new());
            };
            Ok(index.postings(&entry)?.iter().map(BtNumId::from).collect())
        })
    }

    /// Deletes the posting of `hyb.key` at `hyb.offset`.
    ///
    /// Removing the last posting removes the identifier. When one posting
    /// remains it moves back inline. Returns false if nothing matched.
    pub fn delete_hyb_id(&mut self, hyb: &BtHybrid) -> Result<bool> {
        self.run(|index| {
            index.check_writable()?;
            let Some(mut entry) = index.find_id(&hyb.key)? else {
                return Ok(false);
            };

            if entry.dups == 0 {
                if entry.offset != hyb.offset {
                    return Ok(false);
                }
                index.primary::<IdEntry>().remove(&entry.id)?;
                index.params.count = index.params.count.saturating_sub(1);
                return Ok(true);
            }

            let root = PageNo(entry.offset);
            let mut dups = index.secondary::<NumEntry>(root);
            if dups.remove(&hyb.offset)?.is_none() {
                return Ok(false);
            }
            entry.dups -= 1;
            if entry.dups == 0 {
                let last = dups.first()?.ok_or_else(|| {
                    BindexError::BTreeCorrupted(format!("duplicate tree of {} emptied", entry.id))
                })?;
                entry.offset = last.offset;
                entry.refoffset = last.refoffset;
                entry.dbno = last.dbno;
                tracing::debug!(id = %entry.id, root = %root, "collapsed duplicate tree");
            }
            index.primary().update(entry)?;
            Ok(true)
        })
    }

    /// Starts a wildcard search over identifiers.
    pub fn id_wild(&self, pattern: &str) -> IdWildCursor {
        IdWildCursor::new(pattern)
    }

    // Keyword indexes

    /// Records `pri.id` as a member of `pri.keyword`.
    ///
    /// The first member of a keyword creates its secondary tree and returns
    /// `Inserted`. Later members return `Added`; repeating a member
    /// increments its duplicate count and returns `Duplicate`.
    pub fn insert_keyword(&mut self, pri: &BtPri) -> Result<InsertOutcome> {
        self.run(|index| {
            index.expect_kind(true)?;
            index.check_writable()?;
            index.check_key(&pri.keyword)?;
            index.check_key(&pri.id)?;
            index.ensure_primary_root::<PriEntry>()?;

            let member = SecEntry {
                id: pri.id.clone(),
                dups: 0,
            };
            let existing = index.primary::<PriEntry>().find(&pri.keyword)?;
            let outcome = match existing {
                None => {
                    let root = BTree::<SecEntry>::create_root(&mut index.cache, None)?;
                    index.secondary(root).insert(member)?;
                    index.primary().insert(PriEntry {
                        keyword: pri.keyword.clone(),
                        treeblock: root,
                    })?;
                    tracing::debug!(keyword = %pri.keyword, root = %root, "created secondary tree");
                    index.params.count += 1;
                    InsertOutcome::Inserted
                }
                Some(entry) => {
                    let bump = |existing: &mut SecEntry| {
                        existing.dups += 1;
                        true
                    };
                    match index.secondary(entry.treeblock).upsert(member, bump)? {
                        Upsert::Inserted => InsertOutcome::Added,
                        Upsert::Updated | Upsert::Unchanged => InsertOutcome::Duplicate,
                    }
                }
            };
            index.refresh_level::<PriEntry>()?;
            Ok(outcome)
        })
    }

    fn find_keyword(&mut self, keyword: &str) -> Result<Option<PriEntry>> {
        self.expect_kind(true)?;
        if !self.has_primary_root() {
            return Ok(None);
        }
        self.primary::<PriEntry>().find(&keyword.to_string())
    }

    /// Looks up a keyword and the root of its secondary tree.
    pub fn pri_from_keyword(&mut self, keyword: &str) -> Result<Option<BtPri>> {
        self.run(|index| Ok(index.find_keyword(keyword)?.as_ref().map(BtPri::from)))
    }

    /// Lists the members of the secondary tree rooted at `treeblock`.
    pub fn sec_leaf_list(&mut self, treeblock: PageNo) -> Result<Vec<BtSecId>> {
        self.run(|index| {
            index.expect_kind(true)?;
            let members = index.secondary::<SecEntry>(treeblock).entries()?;
            Ok(members.into_iter().map(BtSecId::from).collect())
        })
    }

    /// Lists the members of a keyword.
    pub fn keyword_members(&mut self, keyword: &str) -> Result<Option<Vec<BtSecId>>> {
        self.run(|index| {
            let Some(entry) = index.find_keyword(keyword)? else {
                return Ok(None);
            };
            let members = index.secondary::<SecEntry>(entry.treeblock).entries()?;
            Ok(Some(members.into_iter().map(BtSecId::from).collect()))
        })
    }

    /// Returns true if `id` is a member of the secondary tree at `treeblock`.
    pub fn verify_id(&mut self, treeblock: PageNo, id: &str) -> Result<bool> {
        self.run(|index| {
            index.expect_kind(true)?;
            Ok(index
                .secondary::<SecEntry>(treeblock)
                .find(&id.to_string())?
                .is_some())
        })
    }

    /// Removes `pri.id` from `pri.keyword`. The keyword goes once its last
    /// member does. Returns false if nothing matched.
    pub fn delete_pri_id(&mut self, pri: &BtPri) -> Result<bool> {
        self.run(|index| {
            index.check_writable()?;
            let Some(entry) = index.find_keyword(&pri.keyword)? else {
                return Ok(false);
            };
            let mut members = index.secondary::<SecEntry>(entry.treeblock);
            if members.remove(&pri.id)?.is_none() {
                return Ok(false);
            }
            if members.is_empty()? {
                index.primary::<PriEntry>().remove(&entry.keyword)?;
                index.params.count = index.params.count.saturating_sub(1);
                tracing::debug!(keyword = %entry.keyword, "removed keyword with no members");
            }
            Ok(true)
        })
    }

    /// Starts a wildcard search over keywords.
    pub fn keyword_wild(&self, pattern: &str) -> KeyWildCursor {
        KeyWildCursor::new(pattern)
    }

    /// Returns the members of every keyword matching `pattern`, sorted and
    /// without repeats.
    pub fn list_from_key_wild(&mut self, pattern: &str) -> Result<Vec<String>> {
        if !has_wildcard(pattern) {
            let members = self.keyword_members(pattern)?.unwrap_or_default();
            return Ok(members.into_iter().map(|m| m.id).collect());
        }
        let keywords = self.keyword_wild(pattern).collect_all(self)?;
        let mut ids = Vec::new();
        for keyword in keywords {
            ids.extend(self.sec_leaf_list(keyword.treeblock)?.into_iter().map(|m| m.id));
        }
        ids.sort_unstable();
        ids.dedup();
        Ok(ids)
    }

    // Integrity

    /// Verifies the primary tree and every tree hanging off it.
    ///
    /// Returns the shape of the primary tree.
    pub fn check(&mut self) -> Result<TreeCheck> {
        self.run(|index| {
            if !index.has_primary_root() {
                return Ok(TreeCheck::default());
            }
            if index.config.field.is_keyword() {
                let report = index.primary::<PriEntry>().check()?;
                let keywords = index.primary::<PriEntry>().entries()?;
                for entry in keywords {
                    index.secondary::<SecEntry>(entry.treeblock).check()?;
                }
                Ok(report)
            } else {
                let report = index.primary::<IdEntry>().check()?;
                let ids = index.primary::<IdEntry>().entries()?;
                for entry in ids {
                    if entry.dups > 0 {
                        index.postings(&entry)?;
                        index.secondary::<NumEntry>(PageNo(entry.offset)).check()?;
                    }
                }
                Ok(report)
            }
        })
    }
}

impl Drop for IndexCache {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if self.poisoned.is_some() {
            tracing::warn!(path = %self.path().display(), "dropping poisoned index without flushing");
            return;
        }
        if let Err(e) = self.flush() {
            tracing::error!(path = %self.path().display(), error = %e, "failed to flush index on drop");
        }
    }
}

impl std::fmt::Debug for IndexCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexCache")
            .field("path", &self.path())
            .field("mode", &self.config.mode)
            .field("params", &self.params)
            .field("poisoned", &self.poisoned)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bindex_common::IndexField;
    use tempfile::tempdir;

    fn small_config(dir: &std::path::Path, field: IndexField) -> IndexConfig {
        IndexConfig {
            pagesize: 512,
            order: 4,
            fill: 2,
            sorder: 4,
            sfill: 2,
            cachesize: 8,
            kwlimit: 15,
            mode: OpenMode::Create,
            ..IndexConfig::new(dir, "test", field)
        }
    }

    #[test]
    fn test_create_writes_files() {
        let dir = tempdir().unwrap();
        let config = small_config(dir.path(), IndexField::Id);
        let index = IndexCache::create(config.clone()).unwrap();
        assert!(config.index_path().exists());
        assert!(config.params_path().exists());
        assert!(IndexLock::test(&config));
        assert_eq!(index.params().count, 0);

        index.close().unwrap();
        assert!(!IndexLock::test(&config));
    }

    #[test]
    fn test_create_rejects_bad_geometry() {
        let dir = tempdir().unwrap();
        let config = IndexConfig {
            order: 2,
            ..small_config(dir.path(), IndexField::Id)
        };
        let err = IndexCache::create(config.clone()).unwrap_err();
        assert!(!err.is_fatal());
        assert!(!IndexLock::test(&config));
    }

    #[test]
    fn test_insert_and_lookup_id() {
        let dir = tempdir().unwrap();
        let mut index = IndexCache::create(small_config(dir.path(), IndexField::Id)).unwrap();

        assert_eq!(
            index.insert_id(&BtId::new("HBA_HUMAN", 0, 100, 0)).unwrap(),
            InsertOutcome::Inserted
        );
        let found = index.id_from_key("HBA_HUMAN").unwrap().unwrap();
        assert_eq!(found.offset, 100);
        assert_eq!(found.dups, 0);
        assert_eq!(index.id_from_key("HBB_HUMAN").unwrap(), None);
        assert_eq!(index.params().count, 1);
    }

    #[test]
    fn test_lookup_on_empty_index() {
        let dir = tempdir().unwrap();
        let mut index = IndexCache::create(small_config(dir.path(), IndexField::Id)).unwrap();
        assert_eq!(index.id_from_key("X").unwrap(), None);
        assert!(index.dup_from_key("X").unwrap().is_empty());
        assert!(index.id_wild("*").collect_all(&mut index).unwrap().is_empty());
        assert_eq!(index.check().unwrap(), TreeCheck::default());
    }

    #[test]
    fn test_duplicate_ids_move_to_numeric_tree() {
        let dir = tempdir().unwrap();
        let mut index = IndexCache::create(small_config(dir.path(), IndexField::Id)).unwrap();

        index.insert_id(&BtId::new("P1", 0, 500, 5)).unwrap();
        assert_eq!(
            index.insert_id(&BtId::new("P1", 0, 500, 5)).unwrap(),
            InsertOutcome::AlreadyPresent
        );
        assert_eq!(
            index.insert_id(&BtId::new("P1", 1, 300, 3)).unwrap(),
            InsertOutcome::Duplicate
        );
        assert_eq!(
            index.insert_id(&BtId::new("P1", 2, 900, 9)).unwrap(),
            InsertOutcome::Duplicate
        );
        assert_eq!(
            index.insert_id(&BtId::new("P1", 2, 900, 9)).unwrap(),
            InsertOutcome::AlreadyPresent
        );

        let hyb = index.hyb_from_key("P1").unwrap().unwrap();
        assert_eq!(hyb.dups, 2);
        assert_ne!(hyb.treeblock, PageNo(0));

        let first = index.id_from_key("P1").unwrap().unwrap();
        assert_eq!(first.offset, 300);
        assert_eq!(first.dbno, 1);
        assert_eq!(first.dups, 2);

        let offsets: Vec<_> = index
            .dup_from_key("P1")
            .unwrap()
            .iter()
            .map(|d| d.offset)
            .collect();
        assert_eq!(offsets, vec![300, 500, 900]);
        assert_eq!(index.num_ids("P1").unwrap().len(), 3);
        assert_eq!(index.params().count, 1);
        index.check().unwrap();
    }

    #[test]
    fn test_delete_hyb_collapses_duplicates() {
        let dir = tempdir().unwrap();
        let mut index = IndexCache::create(small_config(dir.path(), IndexField::Id)).unwrap();
        index.insert_id(&BtId::new("P1", 0, 500, 5)).unwrap();
        index.insert_id(&BtId::new("P1", 0, 300, 3)).unwrap();

        assert!(!index.delete_hyb_id(&BtHybrid::new("P1", 0, 999, 0)).unwrap());
        assert!(index.delete_hyb_id(&BtHybrid::new("P1", 0, 300, 0)).unwrap());

        let hyb = index.hyb_from_key("P1").unwrap().unwrap();
        assert_eq!(hyb.dups, 0);
        assert_eq!(hyb.offset, 500);
        assert_eq!(hyb.refoffset, 5);
        assert_eq!(hyb.treeblock, PageNo(0));

        assert!(index.delete_hyb_id(&BtHybrid::new("P1", 0, 500, 0)).unwrap());
        assert_eq!(index.id_from_key("P1").unwrap(), None);
        assert_eq!(index.params().count, 0);
        assert!(!index.delete_hyb_id(&BtHybrid::new("P1", 0, 500, 0)).unwrap());
    }

    #[test]
    fn test_key_limits() {
        let dir = tempdir().unwrap();
        let mut index = IndexCache::create(small_config(dir.path(), IndexField::Id)).unwrap();

        let err = index.insert_id(&BtId::new("X".repeat(16), 0, 1, 0)).unwrap_err();
        assert!(matches!(err, BindexError::KeyTooLarge { size: 16, max: 15 }));
        let err = index.insert_id(&BtId::new("", 0, 1, 0)).unwrap_err();
        assert!(matches!(err, BindexError::InvalidParameter { .. }));

        // Caller errors leave the cache usable
        assert!(!index.is_poisoned());
        index.insert_id(&BtId::new("X".repeat(15), 0, 1, 0)).unwrap();
    }

    #[test]
    fn test_kind_mismatch_is_caller_error() {
        let dir = tempdir().unwrap();
        let mut index = IndexCache::create(small_config(dir.path(), IndexField::Id)).unwrap();
        let err = index.insert_keyword(&BtPri::new("KINASE", "P1")).unwrap_err();
        assert!(matches!(err, BindexError::ConfigError(_)));
        assert!(!index.is_poisoned());
    }

    #[test]
    fn test_keyword_members() {
        let dir = tempdir().unwrap();
        let mut index = IndexCache::create(small_config(dir.path(), IndexField::Keyword)).unwrap();

        assert_eq!(
            index.insert_keyword(&BtPri::new("KINASE", "a")).unwrap(),
            InsertOutcome::Inserted
        );
        assert_eq!(
            index.insert_keyword(&BtPri::new("KINASE", "b")).unwrap(),
            InsertOutcome::Added
        );
        assert_eq!(
            index.insert_keyword(&BtPri::new("KINASE", "a")).unwrap(),
            InsertOutcome::Duplicate
        );
        index.insert_keyword(&BtPri::new("KINASE", "c")).unwrap();

        let pri = index.pri_from_keyword("KINASE").unwrap().unwrap();
        assert_ne!(pri.treeblock, PageNo(0));
        let members = index.sec_leaf_list(pri.treeblock).unwrap();
        let summary: Vec<_> = members.iter().map(|m| (m.id.as_str(), m.dups)).collect();
        assert_eq!(summary, vec![("a", 1), ("b", 0), ("c", 0)]);

        assert!(index.verify_id(pri.treeblock, "b").unwrap());
        assert!(!index.verify_id(pri.treeblock, "z").unwrap());
        assert_eq!(index.keyword_members("NOPE").unwrap(), None);
        assert_eq!(index.params().count, 1);
    }

    #[test]
    fn test_delete_pri_removes_empty_keyword() {
        let dir = tempdir().unwrap();
        let mut index = IndexCache::create(small_config(dir.path(), IndexField::Keyword)).unwrap();
        index.insert_keyword(&BtPri::new("KINASE", "a")).unwrap();
        index.insert_keyword(&BtPri::new("KINASE", "b")).unwrap();

        assert!(!index.delete_pri_id(&BtPri::new("KINASE", "z")).unwrap());
        assert!(index.delete_pri_id(&BtPri::new("KINASE", "a")).unwrap());
        assert!(index.pri_from_keyword("KINASE").unwrap().is_some());
        assert!(index.delete_pri_id(&BtPri::new("KINASE", "b")).unwrap());
        assert!(index.pri_from_keyword("KINASE").unwrap().is_none());
        assert_eq!(index.params().count, 0);
    }

    #[test]
    fn test_read_only_rejects_inserts() {
        let dir = tempdir().unwrap();
        let config = small_config(dir.path(), IndexField::Id);
        let mut index = IndexCache::create(config.clone()).unwrap();
        index.insert_id(&BtId::new("A", 0, 1, 0)).unwrap();
        index.close().unwrap();

        let mut index = IndexCache::open(IndexConfig {
            mode: OpenMode::Read,
            ..config
        })
        .unwrap();
        let err = index.insert_id(&BtId::new("B", 0, 2, 0)).unwrap_err();
        assert!(matches!(err, BindexError::ReadOnly));
        assert!(!index.is_poisoned());
        assert!(index.id_from_key("A").unwrap().is_some());
    }

    #[test]
    fn test_fatal_error_poisons() {
        let dir = tempdir().unwrap();
        let mut index = IndexCache::create(small_config(dir.path(), IndexField::Id)).unwrap();
        index.insert_id(&BtId::new("A", 0, 1, 0)).unwrap();

        // Scribble over the root page
        index.cache.write_page(PageNo::ROOT, &[0xFF; 512]).unwrap();
        let err = index.id_from_key("A").unwrap_err();
        assert!(err.is_fatal());
        assert!(index.is_poisoned());

        assert!(matches!(index.id_from_key("A"), Err(BindexError::Poisoned(_))));
        assert!(matches!(
            index.insert_id(&BtId::new("B", 0, 2, 0)),
            Err(BindexError::Poisoned(_))
        ));
        assert!(matches!(index.sync(), Err(BindexError::Poisoned(_))));
        assert!(matches!(index.close(), Err(BindexError::Poisoned(_))));
    }
}
