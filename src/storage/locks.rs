//! Per-item write locks.
//!
//! Writers to the same work item (record-store puts and deletes, sync
//! reconciliation touching both the row and the file) are serialized through
//! one async mutex per id. Different ids never contend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OwnedMutexGuard;

/// Map entries are pruned once the table grows past this many idle ids.
const PRUNE_THRESHOLD: usize = 1024;

/// Lock table keyed by item id.
#[derive(Debug, Default)]
pub struct ItemLocks {
    table: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

/// Proof that the holder owns the write lock for one item.
///
/// Released on drop.
#[derive(Debug)]
pub struct ItemGuard {
    id: String,
    _guard: OwnedMutexGuard<()>,
}

impl ItemGuard {
    /// The id this guard protects.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl ItemLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for and take the write lock of `id`.
    pub async fn acquire(&self, id: &str) -> ItemGuard {
        let mutex = {
            let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
            if table.len() > PRUNE_THRESHOLD {
                table.retain(|_, m| Arc::strong_count(m) > 1);
            }
            Arc::clone(table.entry(id.to_string()).or_default())
        };

        ItemGuard {
            id: id.to_string(),
            _guard: mutex.lock_owned().await,
        }
    }

    /// Take the lock of `id` only if it is free.
    #[must_use]
    pub fn try_acquire(&self, id: &str) -> Option<ItemGuard> {
        let mutex = {
            let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(table.entry(id.to_string()).or_default())
        };

        mutex.try_lock_owned().ok().map(|guard| ItemGuard {
            id: id.to_string(),
            _guard: guard,
        })
    }
}
