//! Persistent sync state (`sync/sync-state.json`).
//!
//! Updates land in memory and mark the map dirty. [`SyncStateFile::flush`]
//! writes the whole map atomically on a blocking thread; the engine flushes
//! after every rank of a pass, so an interrupted pass resumes from the last
//! completed rank.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::sync::file::atomic_write;
use crate::sync::types::SyncState;

const STATE_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct StateDocument {
    version: u32,
    #[serde(default)]
    items: BTreeMap<String, SyncState>,
}

/// In-memory sync state backed by one JSON file.
#[derive(Debug)]
pub struct SyncStateFile {
    path: PathBuf,
    states: Mutex<BTreeMap<String, SyncState>>,
    dirty: AtomicBool,
    /// Serializes flushes so an older snapshot never lands after a newer one.
    writer: tokio::sync::Mutex<()>,
}

impl SyncStateFile {
    /// Load the state file, or start empty if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let states = read_states(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            states: Mutex::new(states),
            dirty: AtomicBool::new(false),
            writer: tokio::sync::Mutex::new(()),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<SyncState> {
        self.lock().get(id).cloned()
    }

    /// Ids with a recorded state.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Record one item's state. Not on disk until the next [`flush`](Self::flush).
    pub fn set(&self, state: SyncState) {
        self.lock().insert(state.id.clone(), state);
        self.dirty.store(true, Ordering::Release);
    }

    /// Forget one item. Returns whether it had a state.
    pub fn remove(&self, id: &str) -> bool {
        let removed = self.lock().remove(id).is_some();
        if removed {
            self.dirty.store(true, Ordering::Release);
        }
        removed
    }

    /// Whether there are updates not yet written to disk.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Write pending updates to disk. A no-op when nothing changed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written; the updates stay
    /// pending for the next flush.
    pub async fn flush(&self) -> Result<()> {
        let _writer = self.writer.lock().await;
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        let written = self.write().await;
        if written.is_err() {
            self.dirty.store(true, Ordering::Release);
        }
        written
    }

    /// Re-read the file from disk, discarding the in-memory copy.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be parsed.
    pub fn reload(&self) -> Result<()> {
        let fresh = read_states(&self.path)?;
        *self.lock() = fresh;
        self.dirty.store(false, Ordering::Release);
        Ok(())
    }

    async fn write(&self) -> Result<()> {
        let document = StateDocument {
            version: STATE_VERSION,
            items: self.lock().clone(),
        };
        let text = serde_json::to_string_pretty(&document)?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || atomic_write(&path, &text))
            .await
            .map_err(|e| Error::Other(format!("sync state write task failed: {e}")))?
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, SyncState>> {
        self.states.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn read_states(path: &Path) -> Result<BTreeMap<String, SyncState>> {
    if !path.is_file() {
        return Ok(BTreeMap::new());
    }
    let text = fs::read_to_string(path)?;
    let document: StateDocument = serde_json::from_str(&text)?;
    Ok(document.items)
}
