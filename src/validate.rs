//! Input normalization for tool-layer callers.
//!
//! Provides O(1) validation sets and synonym maps so callers can use
//! natural language for statuses, types, and priorities. Three-tier
//! resolution: exact match → synonym lookup → error with suggestion.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use crate::model::{ItemType, Priority, Status};

// ── Valid value sets (O(1) lookups) ──────────────────────────

pub static VALID_STATUSES: LazyLock<HashSet<&str>> = LazyLock::new(|| {
    ["not_started", "in_progress", "completed", "blocked", "cancelled"]
        .into_iter()
        .collect()
});

pub static VALID_TYPES: LazyLock<HashSet<&str>> = LazyLock::new(|| {
    ["initiative", "epic", "feature", "story", "task"]
        .into_iter()
        .collect()
});

pub static VALID_PRIORITIES: LazyLock<HashSet<&str>> = LazyLock::new(|| {
    ["low", "medium", "high", "critical"].into_iter().collect()
});

// ── Synonym maps ─────────────────────────────────────────────

pub static STATUS_SYNONYMS: LazyLock<HashMap<&str, &str>> = LazyLock::new(|| {
    [
        ("done", "completed"),
        ("complete", "completed"),
        ("closed", "completed"),
        ("finished", "completed"),
        ("resolved", "completed"),
        ("wip", "in_progress"),
        ("working", "in_progress"),
        ("active", "in_progress"),
        ("started", "in_progress"),
        ("in-progress", "in_progress"),
        ("new", "not_started"),
        ("todo", "not_started"),
        ("open", "not_started"),
        ("pending", "not_started"),
        ("backlog", "not_started"),
        ("not-started", "not_started"),
        ("waiting", "blocked"),
        ("stuck", "blocked"),
        ("canceled", "cancelled"),
        ("dropped", "cancelled"),
        ("wontfix", "cancelled"),
    ]
    .into_iter()
    .collect()
});

pub static TYPE_SYNONYMS: LazyLock<HashMap<&str, &str>> = LazyLock::new(|| {
    [
        ("initiatives", "initiative"),
        ("theme", "initiative"),
        ("program", "initiative"),
        ("epics", "epic"),
        ("features", "feature"),
        ("capability", "feature"),
        ("stories", "story"),
        ("user_story", "story"),
        ("userstory", "story"),
        ("tasks", "task"),
        ("subtask", "task"),
        ("ticket", "task"),
        ("chore", "task"),
        ("bug", "task"),
    ]
    .into_iter()
    .collect()
});

pub static PRIORITY_SYNONYMS: LazyLock<HashMap<&str, &str>> = LazyLock::new(|| {
    [
        ("p0", "critical"),
        ("crit", "critical"),
        ("urgent", "critical"),
        ("highest", "critical"),
        ("blocker", "critical"),
        ("p1", "high"),
        ("important", "high"),
        ("p2", "medium"),
        ("normal", "medium"),
        ("default", "medium"),
        ("med", "medium"),
        ("p3", "low"),
        ("minor", "low"),
        ("lowest", "low"),
        ("trivial", "low"),
    ]
    .into_iter()
    .collect()
});

/// Normalize a status string via exact match or synonym lookup.
///
/// Returns the canonical status, or an error with the original input
/// and an optional suggestion.
pub fn normalize_status(input: &str) -> Result<Status, (String, Option<String>)> {
    resolve(input, &VALID_STATUSES, &STATUS_SYNONYMS).map(|s| match s {
        "in_progress" => Status::InProgress,
        "completed" => Status::Completed,
        "blocked" => Status::Blocked,
        "cancelled" => Status::Cancelled,
        _ => Status::NotStarted,
    })
}

/// Normalize an item type string via exact match or synonym lookup.
pub fn normalize_type(input: &str) -> Result<ItemType, (String, Option<String>)> {
    resolve(input, &VALID_TYPES, &TYPE_SYNONYMS).map(|s| match s {
        "initiative" => ItemType::Initiative,
        "epic" => ItemType::Epic,
        "feature" => ItemType::Feature,
        "story" => ItemType::Story,
        _ => ItemType::Task,
    })
}

/// Normalize a priority string via exact match, P-notation or synonym.
pub fn normalize_priority(input: &str) -> Result<Priority, (String, Option<String>)> {
    resolve(input, &VALID_PRIORITIES, &PRIORITY_SYNONYMS).map(|s| match s {
        "critical" => Priority::Critical,
        "high" => Priority::High,
        "low" => Priority::Low,
        _ => Priority::Medium,
    })
}

fn resolve(
    input: &str,
    valid: &'static HashSet<&'static str>,
    synonyms: &'static HashMap<&'static str, &'static str>,
) -> Result<&'static str, (String, Option<String>)> {
    let lower = input.trim().to_lowercase().replace(' ', "_");

    // Tier 1: exact match
    if let Some(&canonical) = valid.get(lower.as_str()) {
        return Ok(canonical);
    }

    // Tier 2: synonym lookup
    if let Some(&canonical) = synonyms.get(lower.as_str()) {
        return Ok(canonical);
    }

    // Tier 3: closest suggestion
    let suggestion = find_closest_match(&lower, valid, synonyms);
    Err((input.to_string(), suggestion))
}

/// Find the closest matching value across valid set and synonyms.
fn find_closest_match(
    input: &str,
    valid: &HashSet<&str>,
    synonyms: &HashMap<&str, &str>,
) -> Option<String> {
    let mut best: Option<(&str, usize)> = None;

    for &v in valid.iter().chain(synonyms.keys()) {
        let dist = levenshtein_distance(input, v);
        if dist <= 3 && best.is_none_or(|(_, d)| dist < d) {
            // For synonyms, show what it maps to
            let canonical = synonyms.get(v).copied().unwrap_or(v);
            best = Some((canonical, dist));
        }
    }

    best.map(|(v, _)| v.to_string())
}

/// Message for a value that failed normalization, with the suggestion if any.
#[must_use]
pub fn describe_invalid(field: &str, input: &str, suggestion: Option<&str>) -> String {
    match suggestion {
        Some(s) => format!("unknown {field} '{input}', did you mean '{s}'?"),
        None => format!("unknown {field} '{input}'"),
    }
}

/// Whether an item id can name a file inside its rank directory.
#[must_use]
pub fn is_valid_item_id(id: &str) -> bool {
    !(id.is_empty() || id.starts_with('.') || id.contains(['/', '\\']) || id.contains(".."))
}

/// Check a namespace token: 1-64 chars of `[A-Za-z0-9_-]`.
#[must_use]
pub fn is_valid_namespace(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

// ── Levenshtein distance ─────────────────────────────────────

/// Compute the Levenshtein edit distance between two strings.
pub fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for i in 1..=a.len() {
        curr[0] = i;
        for j in 1..=b.len() {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            curr[j] = (prev[j] + 1)
                .min(curr[j - 1] + 1)
                .min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// Find existing IDs similar to the searched ID.
///
/// Returns up to `max` suggestions with edit distance ≤ 3,
/// sorted by distance then alphabetically.
pub fn find_similar_ids(searched: &str, existing: &[String], max: usize) -> Vec<String> {
    let mut candidates: Vec<(usize, &str)> = existing
        .iter()
        .map(|id| (levenshtein_distance(searched, id), id.as_str()))
        .filter(|(dist, _)| *dist <= 3)
        .collect();

    candidates.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)));

    candidates
        .into_iter()
        .take(max)
        .map(|(_, id)| id.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_status() {
        assert_eq!(normalize_status("completed"), Ok(Status::Completed));
        assert_eq!(normalize_status("done"), Ok(Status::Completed));
        assert_eq!(normalize_status("WIP"), Ok(Status::InProgress));
        assert_eq!(normalize_status("in progress"), Ok(Status::InProgress));
        assert_eq!(normalize_status("todo"), Ok(Status::NotStarted));
        assert!(normalize_status("nonsense").is_err());
    }

    #[test]
    fn test_normalize_status_suggests() {
        let err = normalize_status("complted").unwrap_err();
        assert_eq!(err.1.as_deref(), Some("completed"));
    }

    #[test]
    fn test_normalize_type() {
        assert_eq!(normalize_type("Story"), Ok(ItemType::Story));
        assert_eq!(normalize_type("stories"), Ok(ItemType::Story));
        assert_eq!(normalize_type("subtask"), Ok(ItemType::Task));
        assert!(normalize_type("spaceship").is_err());
    }

    #[test]
    fn test_normalize_priority() {
        assert_eq!(normalize_priority("P0"), Ok(Priority::Critical));
        assert_eq!(normalize_priority("high"), Ok(Priority::High));
        assert_eq!(normalize_priority("normal"), Ok(Priority::Medium));
        assert!(normalize_priority("whenever").is_err());
    }

    #[test]
    fn test_namespace_tokens() {
        assert!(is_valid_namespace("team-alpha_2"));
        assert!(!is_valid_namespace(""));
        assert!(!is_valid_namespace("../etc"));
        assert!(!is_valid_namespace(&"x".repeat(65)));
    }

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein_distance("", ""), 0);
        assert_eq!(levenshtein_distance("abc", "abd"), 1);
        assert_eq!(levenshtein_distance("kitten", "sitting"), 3);
    }

    #[test]
    fn test_find_similar_ids() {
        let ids = vec!["wi_a1b2".to_string(), "wi_a1b3".to_string(), "wi_zzzz".to_string()];
        let result = find_similar_ids("wi_a1b1", &ids, 3);
        assert!(result.contains(&"wi_a1b2".to_string()));
        assert!(!result.contains(&"wi_zzzz".to_string()));
    }
}
