//! SQLite storage layer.
//!
//! One record store per namespace, providing:
//! - WAL mode for concurrent reads
//! - Transaction discipline for atomic writes
//! - An FTS5 keyword index maintained in the same transaction as each row
//! - Audit events for history
//!
//! # Submodules
//!
//! - [`events`] - Audit event storage
//! - [`filter`] - Scan filters and sort orders
//! - [`locks`] - Per-item write locks
//! - [`schema`] - Database schema definitions
//! - [`sqlite`] - The record store

pub mod events;
pub mod filter;
pub mod locks;
pub mod schema;
pub mod sqlite;

pub use events::{Event, EventType};
pub use filter::{ItemFilter, Sort, SortField, SortOrder};
pub use locks::{ItemGuard, ItemLocks};
pub use sqlite::{cosine_similarity, MutationContext, RecordStore, WORK_ITEM_ENTITY};
