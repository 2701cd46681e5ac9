//! Wildcard cursors over the primary tree.
//!
//! A cursor seeks to the literal prefix of its pattern and walks the leaf
//! chain until a key no longer starts with that prefix, returning the keys
//! that match the whole pattern. Cursors borrow nothing between calls; pass
//! the index to every `next`.

use super::{BtId, BtPri, IndexCache};
use crate::btree::{IdEntry, LeafCursor, PriEntry, glob_match, literal_prefix};
use bindex_common::Result;

fn start_key(prefix: &str) -> Option<String> {
    (!prefix.is_empty()).then(|| prefix.to_string())
}

/// Wildcard search over an ID index.
#[derive(Debug, Clone)]
pub struct IdWildCursor {
    pattern: String,
    prefix: String,
    inner: LeafCursor<IdEntry>,
}

impl IdWildCursor {
    pub(crate) fn new(pattern: &str) -> Self {
        let prefix = literal_prefix(pattern).to_string();
        Self {
            pattern: pattern.to_string(),
            inner: LeafCursor::new(start_key(&prefix)),
            prefix,
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Returns the next matching identifier, resolved as by
    /// [`IndexCache::id_from_key`].
    pub fn next(&mut self, index: &mut IndexCache) -> Result<Option<BtId>> {
        index.run(|index| {
            index.expect_kind(false)?;
            if !index.has_primary_root() {
                self.inner.finish();
                return Ok(None);
            }
            loop {
                let Some(entry) = self.inner.next(&mut index.primary())? else {
                    return Ok(None);
                };
                if !entry.id.starts_with(&self.prefix) {
                    self.inner.finish();
                    return Ok(None);
                }
                if glob_match(&self.pattern, &entry.id) {
                    return index.resolve_id(&entry).map(Some);
                }
            }
        })
    }

    /// Drains the cursor.
    pub fn collect_all(mut self, index: &mut IndexCache) -> Result<Vec<BtId>> {
        let mut ids = Vec::new();
        while let Some(id) = self.next(index)? {
            ids.push(id);
        }
        Ok(ids)
    }
}

/// Wildcard search over a keyword index.
#[derive(Debug, Clone)]
pub struct KeyWildCursor {
    pattern: String,
    prefix: String,
    inner: LeafCursor<PriEntry>,
}

impl KeyWildCursor {
    pub(crate) fn new(pattern: &str) -> Self {
        let prefix = literal_prefix(pattern).to_string();
        Self {
            pattern: pattern.to_string(),
            inner: LeafCursor::new(start_key(&prefix)),
            prefix,
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Returns the next matching keyword with its secondary tree root.
    pub fn next(&mut self, index: &mut IndexCache) -> Result<Option<BtPri>> {
        index.run(|index| {
            index.expect_kind(true)?;
            if !index.has_primary_root() {
                self.inner.finish();
                return Ok(None);
            }
            loop {
                let Some(entry) = self.inner.next(&mut index.primary())? else {
                    return Ok(None);
                };
                if !entry.keyword.starts_with(&self.prefix) {
                    self.inner.finish();
                    return Ok(None);
                }
                if glob_match(&self.pattern, &entry.keyword) {
                    return Ok(Some(BtPri::from(&entry)));
                }
            }
        })
    }

    /// Drains the cursor.
    pub fn collect_all(mut self, index: &mut IndexCache) -> Result<Vec<BtPri>> {
        let mut keywords = Vec::new();
        while let Some(keyword) = self.next(index)? {
            keywords.push(keyword);
        }
        Ok(keywords)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bindex_common::{BindexError, IndexConfig, IndexField, OpenMode};
    use tempfile::tempdir;

    fn config(dir: &std::path::Path, field: IndexField) -> IndexConfig {
        IndexConfig {
            pagesize: 512,
            order: 4,
            fill: 2,
            sorder: 4,
            sfill: 2,
            cachesize: 8,
            mode: OpenMode::Create,
            ..IndexConfig::new(dir, "wild", field)
        }
    }

    #[test]
    fn test_id_wild_prefix() {
        let dir = tempdir().unwrap();
        let mut index = IndexCache::create(config(dir.path(), IndexField::Id)).unwrap();
        for (n, name) in ["HBA_HUMAN", "HBB_HUMAN", "HBA_MOUSE", "MYG_HUMAN", "H", "HB"]
            .iter()
            .enumerate()
        {
            index.insert_id(&BtId::new(*name, 0, n as u64, 0)).unwrap();
        }

        let names = |ids: Vec<BtId>| ids.into_iter().map(|i| i.id).collect::<Vec<_>>();
        assert_eq!(
            names(index.id_wild("HBA*").collect_all(&mut index).unwrap()),
            vec!["HBA_HUMAN", "HBA_MOUSE"]
        );
        assert_eq!(
            names(index.id_wild("HB?_HUMAN").collect_all(&mut index).unwrap()),
            vec!["HBA_HUMAN", "HBB_HUMAN"]
        );
        assert_eq!(
            names(index.id_wild("*_HUMAN").collect_all(&mut index).unwrap()),
            vec!["HBA_HUMAN", "HBB_HUMAN", "MYG_HUMAN"]
        );
        assert_eq!(names(index.id_wild("HB").collect_all(&mut index).unwrap()), vec!["HB"]);
        assert!(index.id_wild("Z*").collect_all(&mut index).unwrap().is_empty());
    }

    #[test]
    fn test_id_wild_resolves_duplicates() {
        let dir = tempdir().unwrap();
        let mut index = IndexCache::create(config(dir.path(), IndexField::Id)).unwrap();
        index.insert_id(&BtId::new("P1", 0, 700, 0)).unwrap();
        index.insert_id(&BtId::new("P1", 0, 200, 0)).unwrap();

        let ids = index.id_wild("P*").collect_all(&mut index).unwrap();
        assert_eq!(ids.len(), 1);
        assert_eq!(ids[0].offset, 200);
        assert_eq!(ids[0].dups, 1);
    }

    #[test]
    fn test_keyword_wild_and_member_list() {
        let dir = tempdir().unwrap();
        let mut index = IndexCache::create(config(dir.path(), IndexField::Keyword)).unwrap();
        for (keyword, id) in [
            ("KINASE", "P3"),
            ("KINASE", "P1"),
            ("KINESIN", "P1"),
            ("KINESIN", "P2"),
            ("LIGASE", "P9"),
        ] {
            index.insert_keyword(&BtPri::new(keyword, id)).unwrap();
        }

        let mut cursor = index.keyword_wild("KIN*");
        assert_eq!(cursor.pattern(), "KIN*");
        assert_eq!(cursor.next(&mut index).unwrap().unwrap().keyword, "KINASE");
        assert_eq!(cursor.next(&mut index).unwrap().unwrap().keyword, "KINESIN");
        assert_eq!(cursor.next(&mut index).unwrap(), None);
        assert_eq!(cursor.next(&mut index).unwrap(), None);

        assert_eq!(index.list_from_key_wild("KIN*").unwrap(), vec!["P1", "P2", "P3"]);
        assert_eq!(index.list_from_key_wild("*ASE").unwrap(), vec!["P1", "P3", "P9"]);
        assert!(index.list_from_key_wild("X*").unwrap().is_empty());

        // Plain keywords are looked up directly
        assert_eq!(index.list_from_key_wild("KINESIN").unwrap(), vec!["P1", "P2"]);
        assert!(index.list_from_key_wild("KIN").unwrap().is_empty());
    }

    #[test]
    fn test_cursor_kind_mismatch() {
        let dir = tempdir().unwrap();
        let mut index = IndexCache::create(config(dir.path(), IndexField::Keyword)).unwrap();
        let err = index.id_wild("*").next(&mut index).unwrap_err();
        assert!(matches!(err, BindexError::ConfigError(_)));
    }
}
