//! Work item model.
//!
//! A work item is a node in the five-rank hierarchy
//! (initiative > epic > feature > story > task). Items reference each other
//! only by id; all traversal goes through the record store.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::sync::content_hash;

/// Hierarchy rank of a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    Initiative,
    Epic,
    Feature,
    Story,
    Task,
}

impl ItemType {
    /// All ranks, highest first.
    pub const ALL: [Self; 5] = [
        Self::Initiative,
        Self::Epic,
        Self::Feature,
        Self::Story,
        Self::Task,
    ];

    /// Get the string representation for storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Initiative => "initiative",
            Self::Epic => "epic",
            Self::Feature => "feature",
            Self::Story => "story",
            Self::Task => "task",
        }
    }

    /// Rank index: 0 for initiatives, 4 for tasks.
    #[must_use]
    pub const fn rank(&self) -> u8 {
        match self {
            Self::Initiative => 0,
            Self::Epic => 1,
            Self::Feature => 2,
            Self::Story => 3,
            Self::Task => 4,
        }
    }

    /// The only legal parent type, or `None` for initiatives.
    #[must_use]
    pub const fn parent_type(&self) -> Option<Self> {
        match self {
            Self::Initiative => None,
            Self::Epic => Some(Self::Initiative),
            Self::Feature => Some(Self::Epic),
            Self::Story => Some(Self::Feature),
            Self::Task => Some(Self::Story),
        }
    }

    /// Directory holding files of this rank.
    #[must_use]
    pub const fn dir_name(&self) -> &'static str {
        match self {
            Self::Initiative => "initiatives",
            Self::Epic => "epics",
            Self::Feature => "features",
            Self::Story => "stories",
            Self::Task => "tasks",
        }
    }

    /// Strict parse of the canonical storage string.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }
}

impl std::fmt::Display for ItemType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Work item status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    NotStarted,
    InProgress,
    Completed,
    Blocked,
    Cancelled,
}

impl Status {
    pub const ALL: [Self; 5] = [
        Self::NotStarted,
        Self::InProgress,
        Self::Completed,
        Self::Blocked,
        Self::Cancelled,
    ];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Blocked => "blocked",
            Self::Cancelled => "cancelled",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|v| v.as_str() == s)
    }

    /// Whether a dependency in this status still blocks its dependents.
    #[must_use]
    pub const fn is_blocking(&self) -> bool {
        !matches!(self, Self::Completed)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Work item priority, ordered low to critical.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Priority {
    pub const ALL: [Self; 4] = [Self::Low, Self::Medium, Self::High, Self::Critical];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// Numeric weight used for SQL ordering.
    #[must_use]
    pub const fn weight(&self) -> i64 {
        match self {
            Self::Low => 0,
            Self::Medium => 1,
            Self::High => 2,
            Self::Critical => 3,
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|v| v.as_str() == s)
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A work item.
///
/// `checksum` covers the semantic fields only; see [`WorkItem::compute_checksum`].
/// `embedding` is populated by point lookups and vector queries, and left
/// empty by scans.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: String,
    pub item_type: ItemType,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: Status,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub dependency_ids: BTreeSet<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    #[serde(default)]
    pub effort_estimate: Option<f64>,
    #[serde(default)]
    pub created_by: Option<String>,
    /// Creation timestamp (Unix milliseconds)
    pub created_at: i64,
    /// Last update timestamp (Unix milliseconds)
    pub updated_at: i64,
    #[serde(default)]
    pub checksum: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

/// The fields that participate in the checksum, in a fixed order.
#[derive(Serialize)]
struct SemanticView<'a> {
    id: &'a str,
    item_type: ItemType,
    title: &'a str,
    description: &'a str,
    status: Status,
    priority: Priority,
    parent_id: Option<&'a str>,
    dependency_ids: &'a BTreeSet<String>,
    tags: &'a BTreeSet<String>,
    acceptance_criteria: &'a [String],
    effort_estimate: Option<f64>,
}

impl WorkItem {
    /// Create a new work item with default values.
    pub fn new(item_type: ItemType, title: impl Into<String>) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        let id = format!("wi_{}", &uuid::Uuid::new_v4().simple().to_string()[..12]);

        let mut item = Self {
            id,
            item_type,
            title: title.into(),
            description: String::new(),
            status: Status::NotStarted,
            priority: Priority::Medium,
            parent_id: None,
            dependency_ids: BTreeSet::new(),
            tags: BTreeSet::new(),
            acceptance_criteria: Vec::new(),
            effort_estimate: None,
            created_by: None,
            created_at: now,
            updated_at: now,
            checksum: String::new(),
            embedding: None,
        };
        item.refresh_checksum();
        item
    }

    /// Override the generated id.
    #[must_use]
    pub fn with_id(mut self, id: &str) -> Self {
        self.id = id.to_string();
        self.refresh_checksum();
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self.refresh_checksum();
        self
    }

    #[must_use]
    pub fn with_parent(mut self, parent_id: &str) -> Self {
        self.parent_id = Some(parent_id.to_string());
        self.refresh_checksum();
        self
    }

    #[must_use]
    pub fn with_dependency(mut self, dependency_id: &str) -> Self {
        self.dependency_ids.insert(dependency_id.to_string());
        self.refresh_checksum();
        self
    }

    #[must_use]
    pub fn with_status(mut self, status: Status) -> Self {
        self.status = status;
        self.refresh_checksum();
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self.refresh_checksum();
        self
    }

    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self.refresh_checksum();
        self
    }

    /// Content hash over the semantic fields.
    ///
    /// Timestamps, `created_by`, the embedding and the stored checksum
    /// itself are excluded, so touching `updated_at` never changes it.
    #[must_use]
    pub fn compute_checksum(&self) -> String {
        content_hash(&SemanticView {
            id: &self.id,
            item_type: self.item_type,
            title: &self.title,
            description: &self.description,
            status: self.status,
            priority: self.priority,
            parent_id: self.parent_id.as_deref(),
            dependency_ids: &self.dependency_ids,
            tags: &self.tags,
            acceptance_criteria: &self.acceptance_criteria,
            effort_estimate: self.effort_estimate,
        })
    }

    /// Recompute and store the checksum.
    pub fn refresh_checksum(&mut self) {
        self.checksum = self.compute_checksum();
    }

    /// Bump `updated_at` and recompute the checksum after a mutation.
    pub fn touch(&mut self) {
        self.updated_at = chrono::Utc::now().timestamp_millis();
        self.refresh_checksum();
    }

    /// Whether both items carry the same semantic content.
    #[must_use]
    pub fn same_content(&self, other: &Self) -> bool {
        self.compute_checksum() == other.compute_checksum()
    }

    /// Text fed to the embedding provider and the keyword index.
    #[must_use]
    pub fn embedding_text(&self) -> String {
        crate::embeddings::prepare_item_text(self)
    }
}

/// A semantic field of a work item, used for field-wise merging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemField {
    ItemType,
    Title,
    Description,
    Status,
    Priority,
    ParentId,
    Dependencies,
    Tags,
    AcceptanceCriteria,
    EffortEstimate,
}

impl ItemField {
    pub const ALL: [Self; 10] = [
        Self::ItemType,
        Self::Title,
        Self::Description,
        Self::Status,
        Self::Priority,
        Self::ParentId,
        Self::Dependencies,
        Self::Tags,
        Self::AcceptanceCriteria,
        Self::EffortEstimate,
    ];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ItemType => "type",
            Self::Title => "title",
            Self::Description => "description",
            Self::Status => "status",
            Self::Priority => "priority",
            Self::ParentId => "parent_id",
            Self::Dependencies => "dependencies",
            Self::Tags => "tags",
            Self::AcceptanceCriteria => "acceptance_criteria",
            Self::EffortEstimate => "effort_estimate",
        }
    }

    /// Whether the field has the same value on both items.
    #[must_use]
    pub fn equal(&self, a: &WorkItem, b: &WorkItem) -> bool {
        match self {
            Self::ItemType => a.item_type == b.item_type,
            Self::Title => a.title == b.title,
            Self::Description => a.description == b.description,
            Self::Status => a.status == b.status,
            Self::Priority => a.priority == b.priority,
            Self::ParentId => a.parent_id == b.parent_id,
            Self::Dependencies => a.dependency_ids == b.dependency_ids,
            Self::Tags => a.tags == b.tags,
            Self::AcceptanceCriteria => a.acceptance_criteria == b.acceptance_criteria,
            Self::EffortEstimate => a.effort_estimate == b.effort_estimate,
        }
    }

    /// Copy this field's value from `source` into `target`.
    pub fn copy(&self, source: &WorkItem, target: &mut WorkItem) {
        match self {
            Self::ItemType => target.item_type = source.item_type,
            Self::Title => target.title.clone_from(&source.title),
            Self::Description => target.description.clone_from(&source.description),
            Self::Status => target.status = source.status,
            Self::Priority => target.priority = source.priority,
            Self::ParentId => target.parent_id.clone_from(&source.parent_id),
            Self::Dependencies => target.dependency_ids.clone_from(&source.dependency_ids),
            Self::Tags => target.tags.clone_from(&source.tags),
            Self::AcceptanceCriteria => {
                target.acceptance_criteria.clone_from(&source.acceptance_criteria);
            }
            Self::EffortEstimate => target.effort_estimate = source.effort_estimate,
        }
    }

    /// Whether a change to this field alters the embedded text.
    #[must_use]
    pub const fn affects_embedding(&self) -> bool {
        matches!(self, Self::ItemType | Self::Title | Self::Description)
    }
}
