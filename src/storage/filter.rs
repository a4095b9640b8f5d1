//! Scan filters and sort orders.
//!
//! Filters compile to a SQL `WHERE` fragment with positional parameters so
//! they are applied inside the query, before any ranking or `LIMIT`.

use rusqlite::types::Value;
use serde::{Deserialize, Serialize};

use crate::model::{ItemType, Priority, Status, WorkItem};

/// Conjunctive item filter. Empty vectors and `None` fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ItemFilter {
    pub item_types: Vec<ItemType>,
    pub statuses: Vec<Status>,
    pub priorities: Vec<Priority>,
    /// Every listed tag must be present.
    pub tags: Vec<String>,
    pub parent_id: Option<String>,
    pub ids: Option<Vec<String>>,
    pub created_after: Option<i64>,
    pub created_before: Option<i64>,
    pub updated_after: Option<i64>,
    pub updated_before: Option<i64>,
}

impl ItemFilter {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    #[must_use]
    pub fn with_type(mut self, item_type: ItemType) -> Self {
        self.item_types.push(item_type);
        self
    }

    #[must_use]
    pub fn with_status(mut self, status: Status) -> Self {
        self.statuses.push(status);
        self
    }

    #[must_use]
    pub fn with_tag(mut self, tag: &str) -> Self {
        self.tags.push(tag.to_string());
        self
    }

    /// Build the `WHERE` fragment (without the keyword) for a table alias.
    ///
    /// Returns `"1"` when nothing is filtered. Parameters are appended to
    /// `params` in placeholder order; placeholders are anonymous `?`.
    pub(crate) fn to_sql(&self, alias: &str, params: &mut Vec<Value>) -> String {
        let mut clauses: Vec<String> = Vec::new();

        push_in(
            &mut clauses,
            params,
            alias,
            "item_type",
            self.item_types.iter().map(|t| t.as_str().to_string()).collect(),
        );
        push_in(
            &mut clauses,
            params,
            alias,
            "status",
            self.statuses.iter().map(|s| s.as_str().to_string()).collect(),
        );
        push_in(
            &mut clauses,
            params,
            alias,
            "priority",
            self.priorities.iter().map(|p| p.as_str().to_string()).collect(),
        );
        if let Some(ids) = &self.ids {
            if ids.is_empty() {
                clauses.push("0".to_string());
            } else {
                push_in(&mut clauses, params, alias, "id", ids.clone());
            }
        }

        for tag in &self.tags {
            clauses.push(format!(
                "EXISTS (SELECT 1 FROM json_each({alias}.tags) WHERE json_each.value = ?)"
            ));
            params.push(Value::Text(tag.clone()));
        }

        if let Some(parent) = &self.parent_id {
            clauses.push(format!("{alias}.parent_id = ?"));
            params.push(Value::Text(parent.clone()));
        }

        let ranges = [
            ("created_at", ">=", self.created_after),
            ("created_at", "<=", self.created_before),
            ("updated_at", ">=", self.updated_after),
            ("updated_at", "<=", self.updated_before),
        ];
        for (column, op, bound) in ranges {
            if let Some(ts) = bound {
                clauses.push(format!("{alias}.{column} {op} ?"));
                params.push(Value::Integer(ts));
            }
        }

        if clauses.is_empty() {
            "1".to_string()
        } else {
            clauses.join(" AND ")
        }
    }

    /// In-memory equivalent of [`ItemFilter::to_sql`].
    #[must_use]
    pub fn matches(&self, item: &WorkItem) -> bool {
        (self.item_types.is_empty() || self.item_types.contains(&item.item_type))
            && (self.statuses.is_empty() || self.statuses.contains(&item.status))
            && (self.priorities.is_empty() || self.priorities.contains(&item.priority))
            && self.tags.iter().all(|t| item.tags.contains(t))
            && self
                .parent_id
                .as_ref()
                .is_none_or(|p| item.parent_id.as_ref() == Some(p))
            && self.ids.as_ref().is_none_or(|ids| ids.contains(&item.id))
            && self.created_after.is_none_or(|t| item.created_at >= t)
            && self.created_before.is_none_or(|t| item.created_at <= t)
            && self.updated_after.is_none_or(|t| item.updated_at >= t)
            && self.updated_before.is_none_or(|t| item.updated_at <= t)
    }
}

/// Sortable columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    CreatedAt,
    #[default]
    UpdatedAt,
    Priority,
    Title,
    /// Hierarchy rank, initiatives first.
    Rank,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Sort specification; ties always fall back to `id` ascending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Sort {
    pub field: SortField,
    pub order: SortOrder,
}

impl Sort {
    #[must_use]
    pub const fn new(field: SortField, order: SortOrder) -> Self {
        Self { field, order }
    }

    pub(crate) fn to_sql(self, alias: &str) -> String {
        let dir = match self.order {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };
        let key = match self.field {
            SortField::CreatedAt => format!("{alias}.created_at"),
            SortField::UpdatedAt => format!("{alias}.updated_at"),
            SortField::Title => format!("{alias}.title COLLATE NOCASE"),
            SortField::Priority => case_expr(
                &format!("{alias}.priority"),
                Priority::ALL.iter().map(|p| (p.as_str(), p.weight())),
            ),
            SortField::Rank => case_expr(
                &format!("{alias}.item_type"),
                ItemType::ALL.iter().map(|t| (t.as_str(), i64::from(t.rank()))),
            ),
        };
        format!("{key} {dir}, {alias}.id ASC")
    }
}

fn push_in(
    clauses: &mut Vec<String>,
    params: &mut Vec<Value>,
    alias: &str,
    column: &str,
    values: Vec<String>,
) {
    if values.is_empty() {
        return;
    }
    let marks = vec!["?"; values.len()].join(", ");
    clauses.push(format!("{alias}.{column} IN ({marks})"));
    params.extend(values.into_iter().map(Value::Text));
}

fn case_expr<'a>(column: &str, arms: impl Iterator<Item = (&'a str, i64)>) -> String {
    let arms: String = arms
        .map(|(name, weight)| format!(" WHEN '{name}' THEN {weight}"))
        .collect();
    format!("CASE {column}{arms} ELSE 0 END")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_filter_matches_all() {
        let mut params = Vec::new();
        let filter = ItemFilter::default();
        assert!(filter.is_empty());
        assert_eq!(filter.to_sql("w", &mut params), "1");
        assert!(params.is_empty());
    }

    #[test]
    fn test_filter_sql_params_in_order() {
        let filter = ItemFilter {
            item_types: vec![ItemType::Story, ItemType::Task],
            tags: vec!["auth".into()],
            updated_after: Some(10),
            ..ItemFilter::default()
        };
        let mut params = Vec::new();
        let sql = filter.to_sql("w", &mut params);
        assert!(sql.starts_with("w.item_type IN (?, ?)"));
        assert!(sql.contains("json_each(w.tags)"));
        assert_eq!(params.len(), 4);
        assert_eq!(params[3], Value::Integer(10));
    }

    #[test]
    fn test_in_memory_match() {
        let item = WorkItem::new(ItemType::Story, "Login").with_tags(["auth"]);
        assert!(ItemFilter::default().with_type(ItemType::Story).with_tag("auth").matches(&item));
        assert!(!ItemFilter::default().with_status(Status::Completed).matches(&item));
        assert!(!ItemFilter {
            ids: Some(vec![]),
            ..ItemFilter::default()
        }
        .matches(&item));
    }

    #[test]
    fn test_sort_sql() {
        let sql = Sort::new(SortField::Priority, SortOrder::Desc).to_sql("w");
        assert!(sql.contains("WHEN 'critical' THEN 3"));
        assert!(sql.ends_with("DESC, w.id ASC"));
    }
}
