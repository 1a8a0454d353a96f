//! In-memory graph cache derived from branch metadata.
//!
//! Holds the parent/child maps, scope map, branch list, remote-SHA cache and
//! current branch. The cache stores only names; "branch values" are resolved
//! at the API boundary, so no pointer cycles can form. All locking lives in
//! the engine façade; this type is a plain data structure.
//!
//! Invariants maintained by every mutator:
//! - `parent_map[b] = p` iff `b ∈ children_map[p]`
//! - each children list is sorted by name with no duplicates
//! - trunk never appears as a key of `parent_map`

use std::collections::HashMap;

use crate::git::Oid;
use crate::metadata::BranchMetadata;

/// Derived branch graph. Rebuilt atomically or patched per-branch.
#[derive(Debug, Clone, Default)]
pub struct GraphCache {
    /// All local branch names, as enumerated by the VCS.
    branches: Vec<String>,
    /// Tracked branch -> parent name.
    parent_map: HashMap<String, String>,
    /// Parent name -> sorted child names.
    children_map: HashMap<String, Vec<String>>,
    /// Branch -> raw stored scope string.
    scope_map: HashMap<String, String>,
    /// Branch -> last fetched remote tip.
    remote_shas: HashMap<String, Oid>,
    /// Currently checked-out branch, if any.
    current_branch: Option<String>,
    /// Trunk branch name.
    trunk: String,
}

impl GraphCache {
    pub fn new(trunk: impl Into<String>) -> Self {
        Self {
            trunk: trunk.into(),
            ..Default::default()
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn trunk(&self) -> &str {
        &self.trunk
    }

    pub fn branches(&self) -> &[String] {
        &self.branches
    }

    pub fn current_branch(&self) -> Option<&str> {
        self.current_branch.as_deref()
    }

    pub fn parent_of(&self, branch: &str) -> Option<&str> {
        self.parent_map.get(branch).map(String::as_str)
    }

    /// Children of a branch, sorted by name. Empty slice for leaves.
    pub fn children_of(&self, branch: &str) -> &[String] {
        self.children_map.get(branch).map(Vec::as_slice).unwrap_or(&[])
    }

    /// A branch is tracked iff it has a recorded parent.
    pub fn is_tracked(&self, branch: &str) -> bool {
        self.parent_map.contains_key(branch)
    }

    pub fn branch_exists(&self, branch: &str) -> bool {
        branch == self.trunk || self.branches.iter().any(|b| b == branch)
    }

    /// Raw stored scope string for a branch, if any.
    pub fn scope_of(&self, branch: &str) -> Option<&str> {
        self.scope_map.get(branch).map(String::as_str)
    }

    pub fn remote_sha_of(&self, branch: &str) -> Option<&Oid> {
        self.remote_shas.get(branch)
    }

    /// A point-in-time clone of the children map, for lazy traversal cursors
    /// that must not hold the engine lock while iterating.
    pub fn children_snapshot(&self) -> HashMap<String, Vec<String>> {
        self.children_map.clone()
    }

    /// All tracked branch names, sorted.
    pub fn tracked_branches(&self) -> Vec<String> {
        let mut tracked: Vec<String> = self.parent_map.keys().cloned().collect();
        tracked.sort();
        tracked
    }

    /// Depth of a branch: trunk is 0, otherwise `1 + depth(parent)`.
    /// Branches with no recorded parent sit at depth 1 (directly off trunk).
    pub fn depth_of(&self, branch: &str) -> usize {
        let mut depth = 0;
        let mut current = branch;
        while current != self.trunk {
            depth += 1;
            match self.parent_of(current) {
                Some(parent) if parent != current && depth < self.parent_map.len() + 2 => {
                    current = parent;
                }
                _ => break,
            }
        }
        depth
    }

    /// Whether making `parent` the parent of `branch` would create a cycle:
    /// true when `parent` is `branch` itself or any transitive descendant.
    pub fn would_create_cycle(&self, branch: &str, parent: &str) -> bool {
        if branch == parent {
            return true;
        }
        let mut stack: Vec<&str> = self.children_of(branch).iter().map(String::as_str).collect();
        let mut guard = 0usize;
        while let Some(candidate) = stack.pop() {
            if candidate == parent {
                return true;
            }
            guard += 1;
            if guard > self.parent_map.len() + 1 {
                break;
            }
            stack.extend(self.children_of(candidate).iter().map(String::as_str));
        }
        false
    }

    // =========================================================================
    // Mutators
    // =========================================================================

    pub fn set_current_branch(&mut self, branch: Option<String>) {
        self.current_branch = branch;
    }

    pub fn set_remote_shas(&mut self, shas: HashMap<String, Oid>) {
        self.remote_shas = shas;
    }

    pub fn clear_remote_shas(&mut self) {
        self.remote_shas.clear();
    }

    /// Bulk rebuild from the enumerated branch list and a batch of metadata
    /// records. Resets the parent/children/scope maps; the remote-SHA cache
    /// and current branch are preserved unless refreshed by the caller.
    pub fn rebuild(&mut self, branches: Vec<String>, records: &HashMap<String, BranchMetadata>) {
        self.branches = branches;
        self.parent_map.clear();
        self.children_map.clear();
        self.scope_map.clear();

        for (branch, record) in records {
            self.apply_record(branch, record);
        }
        for children in self.children_map.values_mut() {
            children.sort();
            children.dedup();
        }
    }

    /// Patch the cache for a single branch after its metadata changed.
    /// `record` of `None` (or an untracked record) removes the branch's edge.
    pub fn patch_branch(&mut self, branch: &str, record: Option<&BranchMetadata>) {
        self.remove_edge(branch);
        self.scope_map.remove(branch);
        if let Some(record) = record {
            self.apply_record(branch, record);
            if let Some(parent) = record.parent_branch_name.as_deref() {
                if let Some(children) = self.children_map.get_mut(parent) {
                    children.sort();
                    children.dedup();
                }
            }
        }
    }

    /// Drop a branch from the cache entirely (it was deleted in the VCS).
    /// Children must already have been reparented by the caller.
    pub fn remove_branch(&mut self, branch: &str) {
        self.branches.retain(|b| b != branch);
        self.remove_edge(branch);
        self.children_map.remove(branch);
        self.scope_map.remove(branch);
        self.remote_shas.remove(branch);
        if self.current_branch.as_deref() == Some(branch) {
            self.current_branch = None;
        }
    }

    fn apply_record(&mut self, branch: &str, record: &BranchMetadata) {
        if let Some(parent) = record.parent_branch_name.as_deref() {
            // The trunk never gets a parent edge.
            if branch != self.trunk {
                self.parent_map.insert(branch.to_string(), parent.to_string());
                self.children_map
                    .entry(parent.to_string())
                    .or_default()
                    .push(branch.to_string());
            }
        }
        if let Some(scope) = record.scope.as_deref() {
            self.scope_map.insert(branch.to_string(), scope.to_string());
        }
    }

    fn remove_edge(&mut self, branch: &str) {
        if let Some(old_parent) = self.parent_map.remove(branch) {
            if let Some(children) = self.children_map.get_mut(&old_parent) {
                children.retain(|c| c != branch);
                if children.is_empty() {
                    self.children_map.remove(&old_parent);
                }
            }
        }
    }

    /// Debug check of the structural invariants. Used by tests.
    #[cfg(test)]
    pub(crate) fn check_invariants(&self) {
        for (branch, parent) in &self.parent_map {
            assert!(
                self.children_of(parent).contains(branch),
                "{branch} has parent {parent} but is missing from its child list"
            );
            assert_ne!(branch, &self.trunk, "trunk must not have a parent");
        }
        for (parent, children) in &self.children_map {
            let mut sorted = children.clone();
            sorted.sort();
            sorted.dedup();
            assert_eq!(&sorted, children, "children of {parent} not sorted/deduped");
            for child in children {
                assert_eq!(
                    self.parent_of(child),
                    Some(parent.as_str()),
                    "child {child} of {parent} lacks the reverse edge"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracked(parent: &str) -> BranchMetadata {
        BranchMetadata {
            parent_branch_name: Some(parent.to_string()),
            ..Default::default()
        }
    }

    fn build_linear() -> GraphCache {
        // main -> a -> b, main -> c
        let mut cache = GraphCache::new("main");
        let mut records = HashMap::new();
        records.insert("a".to_string(), tracked("main"));
        records.insert("b".to_string(), tracked("a"));
        records.insert("c".to_string(), tracked("main"));
        cache.rebuild(
            vec!["a".to_string(), "b".to_string(), "c".to_string(), "main".to_string()],
            &records,
        );
        cache
    }

    #[test]
    fn test_rebuild_builds_sorted_edges() {
        let cache = build_linear();
        cache.check_invariants();
        assert_eq!(cache.parent_of("a"), Some("main"));
        assert_eq!(cache.parent_of("b"), Some("a"));
        assert_eq!(cache.children_of("main"), ["a", "c"]);
        assert_eq!(cache.children_of("a"), ["b"]);
        assert!(cache.is_tracked("a"));
        assert!(!cache.is_tracked("main"));
    }

    #[test]
    fn test_trunk_never_gets_parent() {
        let mut cache = GraphCache::new("main");
        let mut records = HashMap::new();
        records.insert("main".to_string(), tracked("something"));
        cache.rebuild(vec!["main".to_string()], &records);
        cache.check_invariants();
        assert_eq!(cache.parent_of("main"), None);
    }

    #[test]
    fn test_patch_moves_branch_between_parents() {
        let mut cache = build_linear();
        cache.patch_branch("b", Some(&tracked("main")));
        cache.check_invariants();
        assert_eq!(cache.parent_of("b"), Some("main"));
        assert_eq!(cache.children_of("main"), ["a", "b", "c"]);
        assert!(cache.children_of("a").is_empty());
    }

    #[test]
    fn test_patch_with_none_untracks() {
        let mut cache = build_linear();
        cache.patch_branch("c", None);
        cache.check_invariants();
        assert!(!cache.is_tracked("c"));
        assert_eq!(cache.children_of("main"), ["a"]);
    }

    #[test]
    fn test_depth() {
        let cache = build_linear();
        assert_eq!(cache.depth_of("main"), 0);
        assert_eq!(cache.depth_of("a"), 1);
        assert_eq!(cache.depth_of("b"), 2);
        assert_eq!(cache.depth_of("c"), 1);
    }

    #[test]
    fn test_cycle_detection() {
        let cache = build_linear();
        assert!(cache.would_create_cycle("a", "a"));
        assert!(cache.would_create_cycle("a", "b"), "b is a descendant of a");
        assert!(!cache.would_create_cycle("b", "c"));
        assert!(!cache.would_create_cycle("a", "main"));
    }

    #[test]
    fn test_remove_branch() {
        let mut cache = build_linear();
        // Reparent b first, as the writer would.
        cache.patch_branch("b", Some(&tracked("main")));
        cache.remove_branch("a");
        cache.check_invariants();
        assert!(!cache.branch_exists("a"));
        assert_eq!(cache.children_of("main"), ["b", "c"]);
    }

    #[test]
    fn test_scope_map_follows_records() {
        let mut cache = GraphCache::new("main");
        let mut records = HashMap::new();
        let mut record = tracked("main");
        record.scope = Some("api".to_string());
        records.insert("a".to_string(), record.clone());
        cache.rebuild(vec!["a".to_string(), "main".to_string()], &records);
        assert_eq!(cache.scope_of("a"), Some("api"));

        record.scope = None;
        cache.patch_branch("a", Some(&record));
        assert_eq!(cache.scope_of("a"), None);
    }
}
