//! Error types for Bindex.

use thiserror::Error;

/// Result type alias using BindexError.
pub type Result<T> = std::result::Result<T, BindexError>;

/// Errors that can occur in Bindex operations.
///
/// Expected outcomes such as a search miss or an exhausted cursor are never
/// reported through this type.
#[derive(Debug, Error)]
pub enum BindexError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("I/O {op} at offset {offset} failed after {attempts} attempts")]
    RetriesExhausted {
        op: &'static str,
        offset: u64,
        attempts: u32,
    },

    // Page errors
    #[error("Page corrupted: {pageno}, reason: {reason}")]
    PageCorrupted { pageno: u64, reason: String },

    #[error("Unexpected node type at page {pageno}: expected {expected}, found {found}")]
    UnexpectedNodeType {
        pageno: u64,
        expected: &'static str,
        found: i32,
    },

    // B+ tree errors
    #[error("B+ tree node does not fit in one page")]
    NodeFull,

    #[error("Key too large: {size} bytes (max {max})")]
    KeyTooLarge { size: usize, max: usize },

    #[error("B+ tree corrupted: {0}")]
    BTreeCorrupted(String),

    // Index file errors
    #[error("Index locked: {0}")]
    IndexLocked(String),

    #[error("Index not found: {0}")]
    IndexNotFound(String),

    #[error("Malformed parameter file {path}: {reason}")]
    ParamsMalformed { path: String, reason: String },

    #[error("Index opened read-only")]
    ReadOnly,

    #[error("Index cache poisoned by earlier fatal error: {0}")]
    Poisoned(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter { name: String, value: String },

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Recovery class of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The index cache must not be used after this error.
    Fatal,
    /// Bad input from the caller; the cache (if any) is unaffected.
    CallerInput,
}

impl BindexError {
    /// Returns the recovery class of this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            BindexError::IndexNotFound(_)
            | BindexError::ParamsMalformed { .. }
            | BindexError::ReadOnly
            | BindexError::ConfigError(_)
            | BindexError::InvalidParameter { .. }
            | BindexError::KeyTooLarge { .. } => ErrorClass::CallerInput,
            BindexError::Io(_)
            | BindexError::RetriesExhausted { .. }
            | BindexError::PageCorrupted { .. }
            | BindexError::UnexpectedNodeType { .. }
            | BindexError::NodeFull
            | BindexError::BTreeCorrupted(_)
            | BindexError::IndexLocked(_)
            | BindexError::Poisoned(_)
            | BindexError::Internal(_) => ErrorClass::Fatal,
        }
    }

    /// Returns true if the error must poison the cache that produced it.
    pub fn is_fatal(&self) -> bool {
        self.class() == ErrorClass::Fatal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoError, ErrorKind};

    #[test]
    fn test_io_error_conversion() {
        let io_err = IoError::new(ErrorKind::UnexpectedEof, "short read");
        let err: BindexError = io_err.into();
        assert!(matches!(err, BindexError::Io(_)));
        assert!(err.to_string().contains("I/O error"));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_retries_exhausted_display() {
        let err = BindexError::RetriesExhausted {
            op: "read",
            offset: 4096,
            attempts: 100,
        };
        assert_eq!(
            err.to_string(),
            "I/O read at offset 4096 failed after 100 attempts"
        );
        assert_eq!(err.class(), ErrorClass::Fatal);
    }

    #[test]
    fn test_page_errors_display() {
        let err = BindexError::PageCorrupted {
            pageno: 512,
            reason: "block offset mismatch".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Page corrupted: 512, reason: block offset mismatch"
        );

        let err = BindexError::UnexpectedNodeType {
            pageno: 1024,
            expected: "node",
            found: 4,
        };
        assert_eq!(
            err.to_string(),
            "Unexpected node type at page 1024: expected node, found 4"
        );
    }

    #[test]
    fn test_caller_input_errors() {
        let err = BindexError::KeyTooLarge { size: 40, max: 15 };
        assert_eq!(err.to_string(), "Key too large: 40 bytes (max 15)");
        assert_eq!(err.class(), ErrorClass::CallerInput);

        let err = BindexError::IndexNotFound("/tmp/embl.xid".to_string());
        assert_eq!(err.to_string(), "Index not found: /tmp/embl.xid");
        assert!(!err.is_fatal());

        let err = BindexError::ParamsMalformed {
            path: "embl.pxid".to_string(),
            reason: "missing Order".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Malformed parameter file embl.pxid: missing Order"
        );
        assert!(!err.is_fatal());

        assert!(!BindexError::ReadOnly.is_fatal());
    }

    #[test]
    fn test_fatal_errors() {
        assert!(BindexError::IndexLocked("embl.lock".to_string()).is_fatal());
        assert!(BindexError::BTreeCorrupted("cycle".to_string()).is_fatal());
        assert!(BindexError::Poisoned("x".to_string()).is_fatal());
        assert!(BindexError::NodeFull.is_fatal());
    }

    #[test]
    fn test_config_errors_display() {
        let err = BindexError::ConfigError("order too small".to_string());
        assert_eq!(err.to_string(), "Configuration error: order too small");

        let err = BindexError::InvalidParameter {
            name: "cachesize".to_string(),
            value: "0".to_string(),
        };
        assert_eq!(err.to_string(), "Invalid parameter: cachesize = 0");
        assert_eq!(err.class(), ErrorClass::CallerInput);
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<BindexError>();
    }
}
