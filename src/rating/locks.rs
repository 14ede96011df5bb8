//! Per-article exclusive access
//!
//! Each article id maps to its own async mutex. Pair acquisition always locks
//! the lower id first, so two rounds that pick each other as opponents cannot
//! deadlock.

use crate::types::ArticleId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Debug, Default)]
pub struct ArticleLocks {
    locks: Mutex<HashMap<ArticleId, Arc<AsyncMutex<()>>>>,
}

/// Both article locks of one comparison, held until dropped
#[derive(Debug)]
pub struct PairGuard {
    _first: OwnedMutexGuard<()>,
    _second: OwnedMutexGuard<()>,
}

impl ArticleLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, id: ArticleId) -> Arc<AsyncMutex<()>> {
        let mut locks = match self.locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        // Drop entries nobody is holding or waiting on
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks.entry(id).or_default().clone()
    }

    /// Exclusive access to one article
    pub async fn lock(&self, id: ArticleId) -> OwnedMutexGuard<()> {
        self.handle(id).lock_owned().await
    }

    /// Exclusive access to two distinct articles, lower id first.
    ///
    /// # Panics
    ///
    /// If `a == b`; an article is never compared with itself.
    pub async fn lock_pair(&self, a: ArticleId, b: ArticleId) -> PairGuard {
        assert_ne!(a, b, "cannot lock an article against itself");
        let (low, high) = if a < b { (a, b) } else { (b, a) };
        let first = self.lock(low).await;
        let second = self.lock(high).await;
        PairGuard {
            _first: first,
            _second: second,
        }
    }

    /// Number of ids currently tracked
    pub fn tracked(&self) -> usize {
        match self.locks.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}
