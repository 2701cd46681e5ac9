//! Bindex common types, errors, and configuration.
//!
//! This crate provides shared definitions used across all Bindex components.

pub mod config;
pub mod error;
pub mod page;

pub use config::{IndexConfig, IndexField, IndexParams, OpenMode};
pub use error::{BindexError, ErrorClass, Result};
pub use page::{DEFAULT_PAGE_SIZE, NodeType, PageNo};
