//! Error types for the work-item engine.
//!
//! Provides structured error handling with:
//! - Machine-readable error codes (`ErrorCode`)
//! - Category-based exit codes (2=storage, 3=not_found, 4=validation, etc.)
//! - Retryability flags (transient storage I/O only)
//! - Context-aware recovery hints
//! - Structured JSON output for the tool layer

use std::path::PathBuf;
use thiserror::Error;

use crate::hierarchy::Violation;
use crate::model::WorkItem;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

// ── Error Code ────────────────────────────────────────────────

/// Machine-readable error codes grouped by category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Storage (exit 2)
    StorageError,

    // Not Found (exit 3)
    NotFound,
    NamespaceNotFound,

    // Validation (exit 4)
    ValidationError,

    // Graph (exit 5)
    GraphViolation,
    HasDependents,

    // Sync (exit 6)
    FormatError,
    ConflictUnresolved,

    // Config (exit 7)
    ConfigError,

    // I/O (exit 8)
    IoError,
    JsonError,

    // Embedding (exit 9)
    EmbeddingError,

    // Internal (exit 1)
    Cancelled,
    InternalError,
}

impl ErrorCode {
    /// Machine-readable SCREAMING_SNAKE code string.
    #[must_use]
    pub const fn as_str(&self) -> &str {
        match self {
            Self::StorageError => "STORAGE_ERROR",
            Self::NotFound => "NOT_FOUND",
            Self::NamespaceNotFound => "NAMESPACE_NOT_FOUND",
            Self::ValidationError => "VALIDATION_ERROR",
            Self::GraphViolation => "GRAPH_VIOLATION",
            Self::HasDependents => "HAS_DEPENDENTS",
            Self::FormatError => "FORMAT_ERROR",
            Self::ConflictUnresolved => "CONFLICT_UNRESOLVED",
            Self::ConfigError => "CONFIG_ERROR",
            Self::IoError => "IO_ERROR",
            Self::JsonError => "JSON_ERROR",
            Self::EmbeddingError => "EMBEDDING_ERROR",
            Self::Cancelled => "CANCELLED",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Category-based exit code (1-9).
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Cancelled | Self::InternalError => 1,
            Self::StorageError => 2,
            Self::NotFound | Self::NamespaceNotFound => 3,
            Self::ValidationError => 4,
            Self::GraphViolation | Self::HasDependents => 5,
            Self::FormatError | Self::ConflictUnresolved => 6,
            Self::ConfigError => 7,
            Self::IoError | Self::JsonError => 8,
            Self::EmbeddingError => 9,
        }
    }

    /// Whether the operation may succeed if simply retried.
    ///
    /// Only storage and I/O failures qualify. Validation and graph errors
    /// are deterministic and never retried.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::StorageError | Self::IoError)
    }
}

// ── Format Error ──────────────────────────────────────────────

/// A work-item file that does not parse against the file schema.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct FormatError {
    /// Offending file.
    pub path: PathBuf,
    /// Offending field, if the failure is attributable to one.
    pub field: Option<String>,
    /// Human-readable reason.
    pub message: String,
}

impl std::fmt::Display for FormatError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.field {
            Some(field) => write!(
                f,
                "{} (field `{field}`): {}",
                self.path.display(),
                self.message
            ),
            None => write!(f, "{}: {}", self.path.display(), self.message),
        }
    }
}

// ── Error Enum ────────────────────────────────────────────────

/// Errors that can occur in engine operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Graph violation: {}", describe_violations(.0))]
    GraphViolation(Vec<Violation>),

    #[error("Work item not found: {id}")]
    NotFound { id: String },

    #[error("Work item not found: {id} (did you mean: {}?)", similar.join(", "))]
    NotFoundSimilar { id: String, similar: Vec<String> },

    #[error("Namespace not found: {name}")]
    NamespaceNotFound { name: String },

    #[error(
        "Cannot delete {id}: {} child item(s) and {} dependent item(s) still reference it",
        children.len(),
        dependents.len()
    )]
    HasDependents {
        id: String,
        children: Vec<String>,
        dependents: Vec<String>,
    },

    #[error("Malformed work-item file {0}")]
    Format(FormatError),

    #[error("Unresolved sync conflict for {id}")]
    ConflictUnresolved {
        id: String,
        file: Option<Box<WorkItem>>,
        database: Option<Box<WorkItem>>,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("{0}")]
    Other(String),
}

fn describe_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Shorthand for a validation error on a named field.
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.to_string(),
            message: message.into(),
        }
    }

    /// Map this error to its structured `ErrorCode`.
    #[must_use]
    pub const fn error_code(&self) -> ErrorCode {
        match self {
            Self::Validation { .. } => ErrorCode::ValidationError,
            Self::GraphViolation(_) => ErrorCode::GraphViolation,
            Self::NotFound { .. } | Self::NotFoundSimilar { .. } => ErrorCode::NotFound,
            Self::NamespaceNotFound { .. } => ErrorCode::NamespaceNotFound,
            Self::HasDependents { .. } => ErrorCode::HasDependents,
            Self::Format(_) => ErrorCode::FormatError,
            Self::ConflictUnresolved { .. } => ErrorCode::ConflictUnresolved,
            Self::Storage(_) => ErrorCode::StorageError,
            Self::Io(_) => ErrorCode::IoError,
            Self::Json(_) => ErrorCode::JsonError,
            Self::Config(_) => ErrorCode::ConfigError,
            Self::Embedding(_) => ErrorCode::EmbeddingError,
            Self::Cancelled(_) => ErrorCode::Cancelled,
            Self::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Category-based exit code, delegating to the `ErrorCode`.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        self.error_code().exit_code()
    }

    /// Whether this specific failure is transient and worth retrying.
    ///
    /// Narrower than `ErrorCode::is_retryable`: only busy/locked database
    /// states and interrupted or timed-out I/O count.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Storage(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            Self::Io(err) => matches!(
                err.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }

    /// Context-aware recovery hint.
    ///
    /// Returns `None` if no actionable suggestion exists.
    #[must_use]
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::Validation { field, .. } => match field.as_str() {
                "status" => Some(
                    "Valid statuses: not_started, in_progress, completed, blocked, cancelled. \
                     Synonyms: done→completed, wip→in_progress, todo→not_started"
                        .to_string(),
                ),
                "type" | "item_type" => Some(
                    "Valid types: initiative, epic, feature, story, task".to_string(),
                ),
                "priority" => Some(
                    "Valid priorities: low, medium, high, critical (or P0-P3)".to_string(),
                ),
                "parent_id" => Some(
                    "A parent must be exactly one rank above its child \
                     (initiative > epic > feature > story > task)"
                        .to_string(),
                ),
                _ => None,
            },

            Self::NotFound { id } => Some(format!(
                "No work item with ID '{id}' in this namespace. Use get_work_item to list items."
            )),

            Self::NotFoundSimilar { similar, .. } => Some(format!(
                "Did you mean: {}?",
                similar.join(", ")
            )),

            Self::HasDependents { children, .. } => Some(if children.is_empty() {
                "Remove the dependency edges pointing at this item first".to_string()
            } else {
                "Reparent or delete the child items first".to_string()
            }),

            Self::ConflictUnresolved { id, .. } => Some(format!(
                "Resolve with resolve_conflict('{id}', ...) or re-run sync with file_wins/database_wins"
            )),

            Self::GraphViolation(_)
            | Self::NamespaceNotFound { .. }
            | Self::Format(_)
            | Self::Storage(_)
            | Self::Io(_)
            | Self::Json(_)
            | Self::Config(_)
            | Self::Embedding(_)
            | Self::Cancelled(_)
            | Self::Other(_) => None,
        }
    }

    /// Structured JSON representation for machine consumption.
    ///
    /// Includes error code, message, retryability, exit code, optional
    /// recovery hint and, where available, the structured details
    /// (violations, offending path/field, conflicting versions).
    #[must_use]
    pub fn to_structured_json(&self) -> serde_json::Value {
        let code = self.error_code();
        let mut obj = serde_json::json!({
            "error": {
                "code": code.as_str(),
                "message": self.to_string(),
                "retryable": self.is_transient(),
                "exit_code": code.exit_code(),
            }
        });

        if let Some(hint) = self.hint() {
            obj["error"]["hint"] = serde_json::Value::String(hint);
        }

        match self {
            Self::Validation { field, .. } => {
                obj["error"]["field"] = serde_json::Value::String(field.clone());
            }
            Self::GraphViolation(violations) => {
                obj["error"]["violations"] =
                    serde_json::to_value(violations).unwrap_or(serde_json::Value::Null);
            }
            Self::NotFound { id } => {
                obj["error"]["id"] = serde_json::Value::String(id.clone());
            }
            Self::NotFoundSimilar { id, similar } => {
                obj["error"]["id"] = serde_json::Value::String(id.clone());
                obj["error"]["similar"] = serde_json::json!(similar);
            }
            Self::HasDependents {
                id,
                children,
                dependents,
            } => {
                obj["error"]["id"] = serde_json::Value::String(id.clone());
                obj["error"]["children"] = serde_json::json!(children);
                obj["error"]["dependents"] = serde_json::json!(dependents);
            }
            Self::Format(format) => {
                obj["error"]["path"] = serde_json::json!(format.path);
                obj["error"]["field"] = serde_json::json!(format.field);
            }
            Self::ConflictUnresolved { id, file, database } => {
                obj["error"]["id"] = serde_json::Value::String(id.clone());
                obj["error"]["file"] = serde_json::to_value(file).unwrap_or_default();
                obj["error"]["database"] = serde_json::to_value(database).unwrap_or_default();
            }
            _ => {}
        }

        obj
    }
}
