//! Configuration structures for Bindex index files.

use crate::error::{BindexError, Result};
use crate::page::{
    BUCKET_PREAMBLE, DEFAULT_PAGE_SIZE, KEYLEN_ENTRY, MIN_PAGE_SIZE, NODE_PREAMBLE, NUM_KEY_LEN,
    PTR_LEN,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Indexed field of a sequence database; one B+Tree file per field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexField {
    /// Entry identifiers.
    Id,
    /// Accession numbers.
    Accession,
    /// Sequence versions.
    SeqVersion,
    /// Description words.
    Description,
    /// Keywords.
    Keyword,
    /// Taxonomy names.
    Taxonomy,
}

impl IndexField {
    /// Returns the file extension of the index file.
    pub fn extension(&self) -> &'static str {
        match self {
            IndexField::Id => "xid",
            IndexField::Accession => "xac",
            IndexField::SeqVersion => "xsv",
            IndexField::Description => "xde",
            IndexField::Keyword => "xkw",
            IndexField::Taxonomy => "xtx",
        }
    }

    /// Returns true if the field maps keywords to member IDs through
    /// secondary trees; only `Id` indexes store postings directly.
    pub fn is_keyword(&self) -> bool {
        !matches!(self, IndexField::Id)
    }
}

/// How an index file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OpenMode {
    /// Existing files, lookups only.
    #[default]
    Read,
    /// Existing files, lookups and inserts.
    Update,
    /// New (truncated) files.
    Create,
}

impl OpenMode {
    /// Returns true if pages may be written.
    pub fn is_writable(&self) -> bool {
        !matches!(self, OpenMode::Read)
    }
}

/// Configuration for opening or creating an index cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Directory holding the index, parameter and lock files.
    pub dir: PathBuf,
    /// Database name; the stem of every file name.
    pub name: String,
    /// Indexed field, which selects the file extension.
    pub field: IndexField,
    /// Open mode.
    pub mode: OpenMode,
    /// Page size in bytes.
    pub pagesize: usize,
    /// Maximum children per primary tree node.
    pub order: usize,
    /// Primary bucket fill target (entries per bucket before a split).
    pub fill: usize,
    /// Maximum number of resident pages.
    pub cachesize: usize,
    /// Maximum children per secondary tree node.
    pub sorder: usize,
    /// Secondary bucket fill target.
    pub sfill: usize,
    /// Maximum key length in bytes.
    pub kwlimit: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
            name: "index".to_string(),
            field: IndexField::Id,
            mode: OpenMode::Read,
            pagesize: DEFAULT_PAGE_SIZE,
            order: 71,
            fill: 25,
            cachesize: 100,
            sorder: 71,
            sfill: 25,
            kwlimit: 15,
        }
    }
}

impl IndexConfig {
    /// Creates a configuration with default geometry.
    pub fn new(dir: impl Into<PathBuf>, name: impl Into<String>, field: IndexField) -> Self {
        Self {
            dir: dir.into(),
            name: name.into(),
            field,
            ..Default::default()
        }
    }

    /// Returns the path of the B+Tree file, `<dir>/<name>.<ext>`.
    pub fn index_path(&self) -> PathBuf {
        self.dir
            .join(format!("{}.{}", self.name, self.field.extension()))
    }

    /// Returns the path of the parameter file, `<dir>/<name>.p<ext>`.
    pub fn params_path(&self) -> PathBuf {
        self.dir
            .join(format!("{}.p{}", self.name, self.field.extension()))
    }

    /// Returns the path of the advisory lock file, `<dir>/<name>.<ext>.lock`.
    ///
    /// Each field of a database locks its own index file.
    pub fn lock_path(&self) -> PathBuf {
        self.dir
            .join(format!("{}.{}.lock", self.name, self.field.extension()))
    }

    /// Returns the initial persisted parameters for a new index.
    pub fn initial_params(&self) -> IndexParams {
        IndexParams {
            order: self.order,
            fill: self.fill,
            pagesize: self.pagesize,
            level: 0,
            cachesize: self.cachesize,
            sorder: self.sorder,
            sfill: self.sfill,
            count: 0,
            kwlimit: self.kwlimit,
        }
    }

    /// Validates the geometry of this configuration.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(BindexError::ConfigError("index name is empty".to_string()));
        }
        self.initial_params().validate()
    }
}

/// Parameters persisted alongside an index file.
///
/// The page layout of the index cannot be interpreted without these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexParams {
    /// Maximum children per primary tree node.
    pub order: usize,
    /// Primary bucket fill target.
    pub fill: usize,
    /// Page size in bytes.
    pub pagesize: usize,
    /// Height of the primary tree above its leaves (0 = root is a leaf).
    pub level: u32,
    /// Maximum number of resident pages.
    pub cachesize: usize,
    /// Maximum children per secondary tree node.
    pub sorder: usize,
    /// Secondary bucket fill target.
    pub sfill: usize,
    /// Number of distinct primary keys stored.
    pub count: u64,
    /// Maximum key length in bytes.
    pub kwlimit: usize,
}

impl IndexParams {
    /// Bytes used by a string-keyed node with `nkeys` keys of `keylen` bytes.
    pub fn string_node_size(nkeys: usize, keylen: usize) -> usize {
        NODE_PREAMBLE + nkeys * (KEYLEN_ENTRY + keylen) + (nkeys + 1) * PTR_LEN
    }

    /// Bytes used by a numeric-keyed node with `nkeys` keys.
    pub fn numeric_node_size(nkeys: usize) -> usize {
        NODE_PREAMBLE + nkeys * NUM_KEY_LEN + (nkeys + 1) * PTR_LEN
    }

    /// Bytes used by the largest single ID bucket record.
    pub fn max_id_record_size(keylen: usize) -> usize {
        // keylen entry + id + dbno + dups + offset + refoffset
        KEYLEN_ENTRY + keylen + 4 + 4 + 8 + 8
    }

    /// Validates the geometry: limits, and that full nodes and single
    /// records of maximum key length fit one page.
    pub fn validate(&self) -> Result<()> {
        fn invalid(name: &str, value: usize) -> BindexError {
            BindexError::InvalidParameter {
                name: name.to_string(),
                value: value.to_string(),
            }
        }

        if self.pagesize < MIN_PAGE_SIZE {
            return Err(invalid("pagesize", self.pagesize));
        }
        if self.order < 3 {
            return Err(invalid("order", self.order));
        }
        if self.sorder < 3 {
            return Err(invalid("sorder", self.sorder));
        }
        if self.fill < 2 {
            return Err(invalid("fill", self.fill));
        }
        if self.sfill < 2 {
            return Err(invalid("sfill", self.sfill));
        }
        if self.cachesize < 1 {
            return Err(invalid("cachesize", self.cachesize));
        }
        if self.kwlimit < 1 {
            return Err(invalid("kwlimit", self.kwlimit));
        }

        let primary = Self::string_node_size(self.order - 1, self.kwlimit);
        if primary > self.pagesize {
            return Err(BindexError::ConfigError(format!(
                "order {} with {}-byte keys needs {} bytes per node, page is {}",
                self.order, self.kwlimit, primary, self.pagesize
            )));
        }
        let secondary = Self::string_node_size(self.sorder - 1, self.kwlimit)
            .max(Self::numeric_node_size(self.sorder - 1));
        if secondary > self.pagesize {
            return Err(BindexError::ConfigError(format!(
                "sorder {} with {}-byte keys needs {} bytes per node, page is {}",
                self.sorder, self.kwlimit, secondary, self.pagesize
            )));
        }
        if BUCKET_PREAMBLE + Self::max_id_record_size(self.kwlimit) > self.pagesize {
            return Err(BindexError::ConfigError(format!(
                "{}-byte keys do not fit a {}-byte bucket page",
                self.kwlimit, self.pagesize
            )));
        }
        Ok(())
    }
}
