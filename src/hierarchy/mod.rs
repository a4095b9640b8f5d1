//! Hierarchy and dependency graph.
//!
//! Work items form two graphs within a namespace:
//!
//! - the parent/child forest, where a child sits exactly one rank below its
//!   parent (initiative > epic > feature > story > task)
//! - the dependency DAG, whose edges mean "must be completed before"
//!
//! [`Graph`] is an arena of items keyed by id; every traversal goes through
//! id lookups. [`HierarchyEngine`] loads that arena from a namespace's record
//! store and guards writes that change edges.

mod engine;
mod graph;

pub use engine::HierarchyEngine;
pub use graph::{CriticalPath, Graph, HierarchyNode};

use std::fmt;

use serde::Serialize;

use crate::model::ItemType;

/// Which edge a reference belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    Parent,
    Dependency,
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Parent => "parent",
            Self::Dependency => "dependency",
        })
    }
}

/// A structural problem in a namespace's graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Violation {
    /// Closed walk along dependency edges; first and last ids are equal.
    CircularDependency { path: Vec<String> },
    /// Closed walk along parent edges; first and last ids are equal.
    CircularParent { path: Vec<String> },
    MissingReference {
        from: String,
        to: String,
        relation: Relation,
    },
    /// `from` names `to` as parent, but `to` is not exactly one rank higher.
    RankSkip {
        from: String,
        to: String,
        from_type: ItemType,
        to_type: ItemType,
    },
    MultipleParents { child: String, parents: Vec<String> },
    SelfDependency { id: String },
}

impl Violation {
    /// Machine-readable kind, matching the serialized `kind` tag.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::CircularDependency { .. } => "circular_dependency",
            Self::CircularParent { .. } => "circular_parent",
            Self::MissingReference { .. } => "missing_reference",
            Self::RankSkip { .. } => "rank_skip",
            Self::MultipleParents { .. } => "multiple_parents",
            Self::SelfDependency { .. } => "self_dependency",
        }
    }

    /// Whether the violation names `id`.
    #[must_use]
    pub fn involves(&self, id: &str) -> bool {
        match self {
            Self::CircularDependency { path } | Self::CircularParent { path } => {
                path.iter().any(|p| p == id)
            }
            Self::MissingReference { from, to, .. } | Self::RankSkip { from, to, .. } => {
                from == id || to == id
            }
            Self::MultipleParents { child, parents } => {
                child == id || parents.iter().any(|p| p == id)
            }
            Self::SelfDependency { id: item } => item == id,
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CircularDependency { path } => {
                write!(f, "circular dependency {}", path.join(" -> "))
            }
            Self::CircularParent { path } => write!(f, "circular parent chain {}", path.join(" -> ")),
            Self::MissingReference { from, to, relation } => {
                write!(f, "{from} references missing {relation} {to}")
            }
            Self::RankSkip {
                from,
                to,
                from_type,
                to_type,
            } => write!(f, "{from_type} {from} cannot have {to_type} {to} as parent"),
            Self::MultipleParents { child, parents } => {
                write!(f, "{child} claimed by multiple parents: {}", parents.join(", "))
            }
            Self::SelfDependency { id } => write!(f, "{id} depends on itself"),
        }
    }
}

/// Result of a validation pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    pub violations: Vec<Violation>,
    /// Items examined before the pass finished or the deadline hit.
    pub checked: usize,
    /// The deadline expired; `violations` is partial.
    pub cancelled: bool,
}

impl ValidationReport {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty() && !self.cancelled
    }

    /// Number of violations of one kind.
    #[must_use]
    pub fn count_kind(&self, kind: &str) -> usize {
        self.violations.iter().filter(|v| v.kind() == kind).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_violation_serializes_with_kind_tag() {
        let v = Violation::CircularDependency {
            path: vec!["a".into(), "b".into(), "a".into()],
        };
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json["kind"], "circular_dependency");
        assert_eq!(json["path"][2], "a");
        assert_eq!(v.kind(), "circular_dependency");
        assert_eq!(v.to_string(), "circular dependency a -> b -> a");
    }

    #[test]
    fn test_rank_skip_display() {
        let v = Violation::RankSkip {
            from: "S1".into(),
            to: "E1".into(),
            from_type: ItemType::Story,
            to_type: ItemType::Epic,
        };
        assert_eq!(v.to_string(), "story S1 cannot have epic E1 as parent");
        assert!(v.involves("E1"));
        assert!(!v.involves("F1"));
    }
}
