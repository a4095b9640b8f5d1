//! Data models for the work-item engine.
//!
//! This module contains the domain models:
//! - WorkItem (and its rank, status and priority enums)
//! - ExecutionLog

pub mod execution_log;
pub mod work_item;

pub use execution_log::{ExecutionLog, ExecutionStatus};
pub use work_item::{ItemField, ItemType, Priority, Status, WorkItem};
