//! Thread-safe handle to an index cache.

use super::IndexCache;
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;

/// An index cache shared between threads.
///
/// Every operation, cursor steps included, runs under one mutex. A cursor
/// may be advanced across separate lock acquisitions; it does not see a
/// consistent snapshot when other threads insert in between.
#[derive(Clone)]
pub struct SharedIndex {
    inner: Arc<Mutex<IndexCache>>,
}

impl SharedIndex {
    pub fn new(index: IndexCache) -> Self {
        Self {
            inner: Arc::new(Mutex::new(index)),
        }
    }

    /// Locks the index for a sequence of operations.
    pub fn lock(&self) -> MutexGuard<'_, IndexCache> {
        self.inner.lock()
    }

    /// Runs `f` with the index locked.
    pub fn with<T>(&self, f: impl FnOnce(&mut IndexCache) -> T) -> T {
        f(&mut self.inner.lock())
    }

    /// Returns the index if this is the last handle.
    pub fn try_into_inner(self) -> Result<IndexCache, Self> {
        Arc::try_unwrap(self.inner)
            .map(Mutex::into_inner)
            .map_err(|inner| Self { inner })
    }
}

impl std::fmt::Debug for SharedIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedIndex")
            .field("handles", &Arc::strong_count(&self.inner))
            .finish()
    }
}
