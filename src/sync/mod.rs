//! File ↔ database synchronization.
//!
//! Each namespace keeps its work items in two places: the record store and a
//! tree of human-editable JSON files. This module reconciles them:
//!
//! - **Files**: one document per item under a directory per rank, atomic writes
//! - **State**: last reconciled checksums and merge baseline per item
//! - **Merge**: field-wise three-way merge for both-sides-changed items
//! - **Engine**: rank-ordered passes, conflicts, backups and restore
//! - **Hashing**: SHA256 content hashing for change detection
//!
//! # Directory layout
//!
//! ```text
//! <namespace>/
//!   initiatives/ epics/ features/ stories/ tasks/   <id>.json per item
//!   relationships.json  metadata.json  workitems.db
//!   sync/sync-state.json  sync/conflicts/  sync/backups/
//! ```
//!
//! # Example
//!
//! ```ignore
//! use workgraph::sync::{CancellationFlag, SyncDirection, SyncOptions};
//!
//! let options = SyncOptions::new(SyncDirection::Bidirectional);
//! let report = workspace.sync.sync(&options, &CancellationFlag::new()).await?;
//! for conflict in &report.conflicts_pending {
//!     println!("{} needs a manual resolution", conflict.id);
//! }
//! ```

mod engine;
mod file;
mod hash;
mod merge;
mod state;
mod types;

pub use engine::SyncEngine;
pub use file::{FILE_VERSION, FileItem, FileStore, ScanError, ScanResult, atomic_write};
pub use hash::{content_hash, has_changed};
pub use merge::{MergeOutcome, auto_merge};
pub use state::SyncStateFile;
pub use types::{
    BackupInfo, CancellationFlag, Conflict, ConflictKind, ItemSyncStatus, MergeStrategy,
    Resolution, StatusReport, SyncDirection, SyncItemError, SyncOptions, SyncReport, SyncScope,
    SyncState, SyncStatus,
};
