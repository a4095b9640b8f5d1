//! Execution log model.
//!
//! Execution logs record attempts to carry out a work item's content. The
//! execution layer itself lives outside this crate; it appends entries
//! through the record store.

use serde::{Deserialize, Serialize};

/// Outcome of an execution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    #[default]
    Running,
    Succeeded,
    Failed,
}

impl ExecutionStatus {
    /// Get the string representation for storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    /// Parse from string.
    #[must_use]
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "succeeded" => Self::Succeeded,
            "failed" => Self::Failed,
            _ => Self::Running,
        }
    }
}

/// A single execution attempt for a work item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLog {
    /// Unique identifier
    pub id: String,

    /// Work item this entry belongs to
    pub item_id: String,

    pub status: ExecutionStatus,

    /// Free-form output or error text
    pub message: Option<String>,

    /// Start timestamp (Unix milliseconds)
    pub started_at: i64,

    /// Completion timestamp (Unix milliseconds)
    pub finished_at: Option<i64>,
}

impl ExecutionLog {
    /// Start a new running entry for an item.
    pub fn start(item_id: &str) -> Self {
        Self {
            id: format!("exec_{}", &uuid::Uuid::new_v4().simple().to_string()[..12]),
            item_id: item_id.to_string(),
            status: ExecutionStatus::Running,
            message: None,
            started_at: chrono::Utc::now().timestamp_millis(),
            finished_at: None,
        }
    }

    /// Mark the entry finished with an outcome.
    #[must_use]
    pub fn finish(mut self, status: ExecutionStatus, message: Option<&str>) -> Self {
        self.status = status;
        self.message = message.map(str::to_string);
        self.finished_at = Some(chrono::Utc::now().timestamp_millis());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_and_finish() {
        let log = ExecutionLog::start("wi_1");
        assert!(log.id.starts_with("exec_"));
        assert_eq!(log.status, ExecutionStatus::Running);

        let done = log.finish(ExecutionStatus::Failed, Some("timeout"));
        assert_eq!(done.status, ExecutionStatus::Failed);
        assert!(done.finished_at.is_some());
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!(ExecutionStatus::from_str("SUCCEEDED"), ExecutionStatus::Succeeded);
        assert_eq!(ExecutionStatus::from_str("unknown"), ExecutionStatus::Running);
    }
}
