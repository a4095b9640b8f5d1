use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use serde::Serialize;

use super::{Relation, ValidationReport, Violation};
use crate::deadline::Deadline;
use crate::model::{ItemType, Priority, Status, WorkItem};

/// Arena of work items with derived reverse edges.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    items: BTreeMap<String, WorkItem>,
    children: BTreeMap<String, Vec<String>>,
    dependents: BTreeMap<String, Vec<String>>,
}

/// Longest chain of unresolved dependencies from a starting item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CriticalPath {
    /// Starting item first, then each blocking dependency in turn.
    pub path: Vec<String>,
    /// Sum of `effort_estimate` along the path; missing estimates count as 0.
    pub total_effort: f64,
}

/// One node of a nested hierarchy view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HierarchyNode {
    pub id: String,
    pub item_type: ItemType,
    pub title: String,
    pub status: Status,
    pub priority: Priority,
    pub children: Vec<HierarchyNode>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    OnStack,
    Done,
}

impl Graph {
    /// Build the arena. Later items with a duplicate id replace earlier ones.
    #[must_use]
    pub fn from_items(items: impl IntoIterator<Item = WorkItem>) -> Self {
        let mut graph = Self::default();
        for item in items {
            graph.items.insert(item.id.clone(), item);
        }
        graph.rebuild_edges();
        graph
    }

    fn rebuild_edges(&mut self) {
        self.children.clear();
        self.dependents.clear();

        let mut ordered: Vec<&WorkItem> = self.items.values().collect();
        ordered.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        for item in ordered {
            if let Some(parent) = &item.parent_id {
                self.children
                    .entry(parent.clone())
                    .or_default()
                    .push(item.id.clone());
            }
            for dep in &item.dependency_ids {
                self.dependents
                    .entry(dep.clone())
                    .or_default()
                    .push(item.id.clone());
            }
        }
    }

    /// Insert or replace one item (a hypothetical write when checking).
    pub fn upsert(&mut self, item: WorkItem) {
        self.items.insert(item.id.clone(), item);
        self.rebuild_edges();
    }

    pub fn remove(&mut self, id: &str) -> Option<WorkItem> {
        let removed = self.items.remove(id);
        if removed.is_some() {
            self.rebuild_edges();
        }
        removed
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&WorkItem> {
        self.items.get(id)
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.items.contains_key(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> impl Iterator<Item = &WorkItem> {
        self.items.values()
    }

    /// Direct children ids, oldest first.
    #[must_use]
    pub fn children(&self, id: &str) -> &[String] {
        self.children.get(id).map_or(&[], Vec::as_slice)
    }

    /// Ids of items that list `id` as a dependency, oldest first.
    #[must_use]
    pub fn dependents(&self, id: &str) -> &[String] {
        self.dependents.get(id).map_or(&[], Vec::as_slice)
    }

    /// Descendants in breadth-first order with their depth (children are 1).
    #[must_use]
    pub fn descendants(&self, id: &str, max_depth: Option<usize>) -> Vec<(&WorkItem, usize)> {
        let mut out = Vec::new();
        let mut seen: HashSet<&str> = HashSet::from([id]);
        let mut queue: VecDeque<(&str, usize)> = VecDeque::from([(id, 0)]);

        while let Some((current, depth)) = queue.pop_front() {
            if max_depth.is_some_and(|max| depth >= max) {
                continue;
            }
            for child in self.children(current) {
                if !seen.insert(child.as_str()) {
                    continue;
                }
                if let Some(item) = self.items.get(child) {
                    out.push((item, depth + 1));
                    queue.push_back((child.as_str(), depth + 1));
                }
            }
        }
        out
    }

    /// Parent chain, nearest first. Stops at a missing parent or a loop.
    #[must_use]
    pub fn ancestors(&self, id: &str) -> Vec<&WorkItem> {
        let mut out = Vec::new();
        let mut seen: HashSet<&str> = HashSet::from([id]);
        let mut current = self.items.get(id).and_then(|i| i.parent_id.as_deref());

        while let Some(parent_id) = current {
            if !seen.insert(parent_id) {
                break;
            }
            let Some(parent) = self.items.get(parent_id) else {
                break;
            };
            out.push(parent);
            current = parent.parent_id.as_deref();
        }
        out
    }

    /// Dependencies of `id`, direct or transitively closed, nearest first.
    /// Missing references are skipped.
    #[must_use]
    pub fn dependencies(&self, id: &str, transitive: bool) -> Vec<&WorkItem> {
        self.walk(id, transitive, |item| {
            item.dependency_ids.iter().map(String::as_str).collect()
        })
    }

    /// Items depending on `id`, direct or transitively closed.
    #[must_use]
    pub fn dependents_of(&self, id: &str, transitive: bool) -> Vec<&WorkItem> {
        self.walk(id, transitive, |item| {
            self.dependents(&item.id).iter().map(String::as_str).collect()
        })
    }

    fn walk<'a, F>(&'a self, id: &str, transitive: bool, next: F) -> Vec<&'a WorkItem>
    where
        F: Fn(&'a WorkItem) -> Vec<&'a str>,
    {
        let Some(start) = self.items.get(id) else {
            return Vec::new();
        };

        let mut out = Vec::new();
        let mut seen: HashSet<&str> = HashSet::from([id]);
        let mut queue: VecDeque<&WorkItem> = VecDeque::from([start]);

        while let Some(current) = queue.pop_front() {
            for neighbor in next(current) {
                if !seen.insert(neighbor) {
                    continue;
                }
                if let Some(item) = self.items.get(neighbor) {
                    out.push(item);
                    if transitive {
                        queue.push_back(item);
                    }
                }
            }
        }
        out
    }

    /// Path `to ... from` along dependency edges, if `to` already depends on
    /// `from` (directly or transitively). Adding `from -> to` would then
    /// close a cycle.
    #[must_use]
    pub fn dependency_path(&self, to: &str, from: &str) -> Option<Vec<String>> {
        let mut parents: HashMap<&str, &str> = HashMap::new();
        let mut seen: HashSet<&str> = HashSet::from([to]);
        let mut queue: VecDeque<&str> = VecDeque::from([to]);

        while let Some(current) = queue.pop_front() {
            if current == from {
                let mut path = vec![current.to_string()];
                let mut node = current;
                while let Some(prev) = parents.get(node) {
                    path.push((*prev).to_string());
                    node = prev;
                }
                path.reverse();
                return Some(path);
            }
            let Some(item) = self.items.get(current) else {
                continue;
            };
            for dep in &item.dependency_ids {
                if seen.insert(dep.as_str()) {
                    parents.insert(dep.as_str(), current);
                    queue.push_back(dep.as_str());
                }
            }
        }
        None
    }

    /// The cycle `from -> to -> ... -> from` that adding the edge would close.
    #[must_use]
    pub fn cycle_if_added(&self, from: &str, to: &str) -> Option<Vec<String>> {
        if from == to {
            return Some(vec![from.to_string(), to.to_string()]);
        }
        self.dependency_path(to, from).map(|tail| {
            let mut path = Vec::with_capacity(tail.len() + 1);
            path.push(from.to_string());
            path.extend(tail);
            path
        })
    }

    /// Check reference resolution, ranks and both cycle families.
    ///
    /// With `scope`, only items in the scope are checked, and only cycles
    /// reachable from them are reported. The deadline is checked between
    /// items; on expiry the report carries what was found so far.
    #[must_use]
    pub fn validate(&self, scope: Option<&HashSet<String>>, deadline: Deadline) -> ValidationReport {
        let mut report = ValidationReport::default();
        let in_scope: Vec<&WorkItem> = self
            .items
            .values()
            .filter(|item| scope.is_none_or(|s| s.contains(&item.id)))
            .collect();

        for item in &in_scope {
            if deadline.is_expired() {
                report.cancelled = true;
                return report;
            }
            self.check_references(item, &mut report.violations);
            report.checked += 1;
        }

        let starts: Vec<&str> = in_scope.iter().map(|i| i.id.as_str()).collect();

        let (cycles, cancelled) = self.find_cycles(&starts, deadline, |item| {
            item.dependency_ids
                .iter()
                .map(String::as_str)
                .filter(|d| *d != item.id)
                .collect()
        });
        report
            .violations
            .extend(cycles.into_iter().map(|path| Violation::CircularDependency { path }));
        if cancelled {
            report.cancelled = true;
            return report;
        }

        let (cycles, cancelled) = self.find_cycles(&starts, deadline, |item| {
            item.parent_id.as_deref().into_iter().collect()
        });
        report
            .violations
            .extend(cycles.into_iter().map(|path| Violation::CircularParent { path }));
        report.cancelled = cancelled;

        report
    }

    /// Self, reference and rank checks for one item.
    pub(crate) fn check_references(&self, item: &WorkItem, out: &mut Vec<Violation>) {
        if let Some(parent_id) = &item.parent_id {
            match self.items.get(parent_id) {
                None => out.push(Violation::MissingReference {
                    from: item.id.clone(),
                    to: parent_id.clone(),
                    relation: Relation::Parent,
                }),
                Some(parent) if item.item_type.parent_type() != Some(parent.item_type) => {
                    out.push(Violation::RankSkip {
                        from: item.id.clone(),
                        to: parent_id.clone(),
                        from_type: item.item_type,
                        to_type: parent.item_type,
                    });
                }
                Some(_) => {}
            }
        }

        for dep in &item.dependency_ids {
            if *dep == item.id {
                out.push(Violation::SelfDependency { id: item.id.clone() });
            } else if !self.items.contains_key(dep) {
                out.push(Violation::MissingReference {
                    from: item.id.clone(),
                    to: dep.clone(),
                    relation: Relation::Dependency,
                });
            }
        }
    }

    /// Depth-first search with recursion-stack marking. A back-edge to a
    /// node on the current stack closes a cycle. Returns the distinct cycles
    /// found and whether the deadline cut the search short.
    fn find_cycles<'a, F>(&'a self, starts: &[&'a str], deadline: Deadline, next: F) -> (Vec<Vec<String>>, bool)
    where
        F: Fn(&'a WorkItem) -> Vec<&'a str>,
    {
        let mut marks: HashMap<&str, Mark> = HashMap::new();
        let mut seen_cycles: HashSet<Vec<String>> = HashSet::new();
        let mut cycles = Vec::new();

        let neighbors = |id: &'a str| -> Vec<&'a str> {
            let mut out = self.items.get(id).map(&next).unwrap_or_default();
            // Popped from the back, so reverse to visit in ascending order.
            out.sort_unstable_by(|a, b| b.cmp(a));
            out
        };

        for &start in starts {
            if marks.contains_key(start) {
                continue;
            }
            if deadline.is_expired() {
                return (cycles, true);
            }

            marks.insert(start, Mark::OnStack);
            let mut stack: Vec<(&str, Vec<&str>)> = vec![(start, neighbors(start))];

            loop {
                let Some(frame) = stack.last_mut() else {
                    break;
                };
                let Some(next_id) = frame.1.pop() else {
                    if let Some((done, _)) = stack.pop() {
                        marks.insert(done, Mark::Done);
                    }
                    continue;
                };
                if !self.items.contains_key(next_id) {
                    continue;
                }

                match marks.get(next_id) {
                    Some(Mark::OnStack) => {
                        let pos = stack.iter().position(|(id, _)| *id == next_id).unwrap_or(0);
                        let mut path: Vec<String> =
                            stack[pos..].iter().map(|(id, _)| (*id).to_string()).collect();
                        path.push(next_id.to_string());
                        if seen_cycles.insert(canonical_cycle(&path)) {
                            cycles.push(path);
                        }
                    }
                    Some(Mark::Done) => {}
                    None => {
                        marks.insert(next_id, Mark::OnStack);
                        stack.push((next_id, neighbors(next_id)));
                    }
                }
            }
        }

        (cycles, false)
    }

    /// Longest chain of dependencies not yet completed, starting at `id`.
    ///
    /// Chains are compared by length, then by total effort.
    #[must_use]
    pub fn critical_path(&self, id: &str) -> Option<CriticalPath> {
        if !self.items.contains_key(id) {
            return None;
        }
        let mut memo: HashMap<String, (Vec<String>, f64)> = HashMap::new();
        let mut on_path: HashSet<String> = HashSet::new();
        let (path, total_effort) = self.longest_chain(id, &mut memo, &mut on_path);
        Some(CriticalPath { path, total_effort })
    }

    fn longest_chain(
        &self,
        id: &str,
        memo: &mut HashMap<String, (Vec<String>, f64)>,
        on_path: &mut HashSet<String>,
    ) -> (Vec<String>, f64) {
        if let Some(done) = memo.get(id) {
            return done.clone();
        }
        let Some(item) = self.items.get(id) else {
            return (Vec::new(), 0.0);
        };

        on_path.insert(id.to_string());
        let mut best: (Vec<String>, f64) = (Vec::new(), 0.0);
        for dep in &item.dependency_ids {
            if on_path.contains(dep) {
                continue;
            }
            let Some(dep_item) = self.items.get(dep) else {
                continue;
            };
            if !dep_item.status.is_blocking() {
                continue;
            }
            let candidate = self.longest_chain(dep, memo, on_path);
            let longer = candidate.0.len() > best.0.len()
                || (candidate.0.len() == best.0.len() && candidate.1 > best.1);
            if longer {
                best = candidate;
            }
        }
        on_path.remove(id);

        let mut path = Vec::with_capacity(best.0.len() + 1);
        path.push(id.to_string());
        path.extend(best.0);
        let result = (path, item.effort_estimate.unwrap_or(0.0) + best.1);
        memo.insert(id.to_string(), result.clone());
        result
    }

    /// Nested tree view. Without `root`, every item whose parent is absent
    /// (or missing) is a root, highest rank first.
    #[must_use]
    pub fn tree(&self, root: Option<&str>, max_depth: Option<usize>) -> Vec<HierarchyNode> {
        let roots: Vec<&WorkItem> = match root {
            Some(id) => self.items.get(id).into_iter().collect(),
            None => {
                let mut roots: Vec<&WorkItem> = self
                    .items
                    .values()
                    .filter(|i| i.parent_id.as_ref().is_none_or(|p| !self.items.contains_key(p)))
                    .collect();
                roots.sort_by(|a, b| {
                    a.item_type
                        .rank()
                        .cmp(&b.item_type.rank())
                        .then(a.created_at.cmp(&b.created_at))
                        .then(a.id.cmp(&b.id))
                });
                roots
            }
        };

        let mut seen = HashSet::new();
        roots
            .into_iter()
            .map(|item| self.subtree(item, 0, max_depth, &mut seen))
            .collect()
    }

    fn subtree<'a>(
        &'a self,
        item: &'a WorkItem,
        depth: usize,
        max_depth: Option<usize>,
        seen: &mut HashSet<&'a str>,
    ) -> HierarchyNode {
        seen.insert(item.id.as_str());
        let mut children = Vec::new();
        if max_depth.is_none_or(|max| depth < max) {
            for child_id in self.children(&item.id) {
                if seen.contains(child_id.as_str()) {
                    continue;
                }
                if let Some(child) = self.items.get(child_id) {
                    children.push(self.subtree(child, depth + 1, max_depth, seen));
                }
            }
        }

        HierarchyNode {
            id: item.id.clone(),
            item_type: item.item_type,
            title: item.title.clone(),
            status: item.status,
            priority: item.priority,
            children,
        }
    }
}

/// Rotation of a closed path starting at its smallest id, for de-duplication.
fn canonical_cycle(path: &[String]) -> Vec<String> {
    let open = &path[..path.len().saturating_sub(1)];
    let Some(min_pos) = open
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.cmp(b.1))
        .map(|(i, _)| i)
    else {
        return Vec::new();
    };
    open[min_pos..].iter().chain(&open[..min_pos]).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, item_type: ItemType) -> WorkItem {
        WorkItem::new(item_type, id).with_id(id)
    }

    fn sample() -> Graph {
        Graph::from_items([
            item("E1", ItemType::Epic),
            item("F1", ItemType::Feature).with_parent("E1"),
            item("S1", ItemType::Story).with_parent("F1"),
            item("S2", ItemType::Story).with_parent("F1").with_dependency("S1"),
            item("T1", ItemType::Task).with_parent("S1"),
        ])
    }

    #[test]
    fn test_valid_graph_has_no_violations() {
        let report = sample().validate(None, Deadline::none());
        assert!(report.is_valid(), "{:?}", report.violations);
        assert_eq!(report.checked, 5);
    }

    #[test]
    fn test_descendants_depth_bounded() {
        let graph = sample();
        let all: Vec<&str> = graph.descendants("E1", None).iter().map(|(i, _)| i.id.as_str()).collect();
        assert_eq!(all, ["F1", "S1", "S2", "T1"]);

        let shallow = graph.descendants("E1", Some(2));
        assert_eq!(shallow.len(), 3);
        assert!(shallow.iter().all(|(_, depth)| *depth <= 2));
    }

    #[test]
    fn test_ancestors_nearest_first() {
        let graph = sample();
        let chain: Vec<&str> = graph.ancestors("T1").iter().map(|i| i.id.as_str()).collect();
        assert_eq!(chain, ["S1", "F1", "E1"]);
    }

    #[test]
    fn test_cycle_if_added() {
        let graph = sample();
        assert_eq!(
            graph.cycle_if_added("S1", "S2"),
            Some(vec!["S1".to_string(), "S2".to_string(), "S1".to_string()])
        );
        assert_eq!(graph.cycle_if_added("S2", "T1"), None);
        assert_eq!(graph.cycle_if_added("S1", "S1").map(|p| p.len()), Some(2));
    }

    #[test]
    fn test_detects_dependency_cycle_once() {
        let graph = Graph::from_items([
            item("A", ItemType::Task).with_dependency("B"),
            item("B", ItemType::Task).with_dependency("C"),
            item("C", ItemType::Task).with_dependency("A"),
        ]);
        let report = graph.validate(None, Deadline::none());
        assert_eq!(report.count_kind("circular_dependency"), 1);
        match &report.violations[0] {
            Violation::CircularDependency { path } => {
                assert_eq!(path.first(), path.last());
                assert_eq!(path.len(), 4);
            }
            other => panic!("unexpected violation {other:?}"),
        }
    }

    #[test]
    fn test_detects_missing_rank_and_self_references() {
        let graph = Graph::from_items([
            item("E1", ItemType::Epic),
            item("S1", ItemType::Story).with_parent("E1"),
            item("T1", ItemType::Task).with_parent("S9").with_dependency("T1"),
            item("T2", ItemType::Task).with_dependency("ghost"),
        ]);
        let report = graph.validate(None, Deadline::none());
        assert_eq!(report.count_kind("rank_skip"), 1);
        assert_eq!(report.count_kind("missing_reference"), 2);
        assert_eq!(report.count_kind("self_dependency"), 1);
        assert_eq!(report.count_kind("circular_dependency"), 0);
    }

    #[test]
    fn test_detects_parent_cycle() {
        let graph = Graph::from_items([
            item("A", ItemType::Story).with_parent("B"),
            item("B", ItemType::Story).with_parent("A"),
        ]);
        let report = graph.validate(None, Deadline::none());
        assert_eq!(report.count_kind("circular_parent"), 1);
    }

    #[test]
    fn test_scope_limits_checks() {
        let graph = Graph::from_items([
            item("T1", ItemType::Task).with_dependency("ghost"),
            item("T2", ItemType::Task),
        ]);
        let scope = HashSet::from(["T2".to_string()]);
        let report = graph.validate(Some(&scope), Deadline::none());
        assert!(report.is_valid());
        assert_eq!(report.checked, 1);
    }

    #[test]
    fn test_expired_deadline_cancels() {
        let report = sample().validate(None, Deadline::from_millis(Some(0)));
        assert!(report.cancelled);
        assert!(!report.is_valid());
    }

    #[test]
    fn test_critical_path_skips_completed() {
        let mut a = item("A", ItemType::Task).with_dependency("B").with_dependency("D");
        a.effort_estimate = Some(1.0);
        let mut b = item("B", ItemType::Task).with_dependency("C");
        b.effort_estimate = Some(2.0);
        let mut c = item("C", ItemType::Task);
        c.effort_estimate = Some(3.0);
        let d = item("D", ItemType::Task).with_status(Status::Completed);

        let graph = Graph::from_items([a, b, c, d]);
        let path = graph.critical_path("A").unwrap();
        assert_eq!(path.path, ["A", "B", "C"]);
        assert!((path.total_effort - 6.0).abs() < f64::EPSILON);

        let done = Graph::from_items([
            item("A", ItemType::Task).with_dependency("B"),
            item("B", ItemType::Task).with_status(Status::Completed),
        ]);
        assert_eq!(done.critical_path("A").unwrap().path, ["A"]);
        assert!(done.critical_path("nope").is_none());
    }

    #[test]
    fn test_tree_view() {
        let tree = sample().tree(None, None);
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].id, "E1");
        assert_eq!(tree[0].children[0].children.len(), 2);

        let shallow = sample().tree(Some("E1"), Some(1));
        assert_eq!(shallow[0].children.len(), 1);
        assert!(shallow[0].children[0].children.is_empty());
    }

    #[test]
    fn test_dependents_transitive() {
        let graph = Graph::from_items([
            item("A", ItemType::Task),
            item("B", ItemType::Task).with_dependency("A"),
            item("C", ItemType::Task).with_dependency("B"),
        ]);
        assert_eq!(graph.dependents_of("A", false).len(), 1);
        let all: Vec<&str> = graph.dependents_of("A", true).iter().map(|i| i.id.as_str()).collect();
        assert_eq!(all, ["B", "C"]);
        let deps: Vec<&str> = graph.dependencies("C", true).iter().map(|i| i.id.as_str()).collect();
        assert_eq!(deps, ["B", "A"]);
    }
}
