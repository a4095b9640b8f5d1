//! Field-wise three-way merge.

use crate::model::{ItemField, WorkItem};

/// Result of merging two edited copies against their common baseline.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    Merged(WorkItem),
    /// Fields both sides changed to different values.
    Conflict(Vec<ItemField>),
}

/// Merge `file` and `db` against `baseline`, field by field.
///
/// A field changed on one side only takes that side's value. A field both
/// sides changed to the same value is taken as is. A field both sides
/// changed to different values is a conflict.
///
/// The merged item keeps the database copy's bookkeeping (`created_by`,
/// `embedding`) and the earliest `created_at`.
#[must_use]
pub fn auto_merge(baseline: &WorkItem, file: &WorkItem, db: &WorkItem) -> MergeOutcome {
    let mut merged = db.clone();
    let mut conflicts = Vec::new();

    for field in ItemField::ALL {
        let file_changed = !field.equal(baseline, file);
        let db_changed = !field.equal(baseline, db);
        match (file_changed, db_changed) {
            (true, false) => field.copy(file, &mut merged),
            (true, true) if !field.equal(file, db) => conflicts.push(field),
            _ => {}
        }
    }

    if !conflicts.is_empty() {
        return MergeOutcome::Conflict(conflicts);
    }

    merged.created_at = file.created_at.min(db.created_at);
    if merged.created_by.is_none() {
        merged.created_by.clone_from(&file.created_by);
    }
    if ItemField::ALL
        .iter()
        .any(|f| f.affects_embedding() && !f.equal(&merged, db))
    {
        merged.embedding = None;
    }
    merged.touch();
    MergeOutcome::Merged(merged)
}
