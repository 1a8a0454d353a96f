//! Read-only queries over the branch graph.
//!
//! Every public method acquires shared access to the cache. The `_internal`
//! variants take the cache directly and are reused by writer/restack code
//! that already holds the exclusive lock.

use std::collections::{HashMap, HashSet};

use crate::cache::GraphCache;
use crate::error::{Error, Result};
use crate::git::{CommitFormat, DiffStats, Oid};
use crate::metadata::PrState;
use crate::scope::Scope;

use super::Engine;

/// Which part of a branch's stack `relative_stack` returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StackRange {
    /// Include all ancestors (trunk excluded).
    pub recursive_parents: bool,
    /// Include the branch itself.
    pub include_current: bool,
    /// Include all descendants.
    pub recursive_children: bool,
}

impl StackRange {
    /// Ancestors + branch + descendants.
    pub fn full() -> Self {
        Self {
            recursive_parents: true,
            include_current: true,
            recursive_children: true,
        }
    }

    /// Branch + descendants.
    pub fn upstack() -> Self {
        Self {
            include_current: true,
            recursive_children: true,
            ..Default::default()
        }
    }

    /// Ancestors + branch.
    pub fn downstack() -> Self {
        Self {
            recursive_parents: true,
            include_current: true,
            ..Default::default()
        }
    }
}

/// Whether a branch can be deleted without losing work, with a reason for UX.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionStatus {
    pub safe: bool,
    pub reason: String,
}

/// Lazy depth-first cursor over a branch's descendants.
///
/// Yields `(branch, depth)` pairs in preorder with siblings in name order,
/// starting at the start branch itself at depth 0. Iterates over a
/// point-in-time snapshot of the graph so it never holds the engine lock.
pub struct DepthFirst {
    children: HashMap<String, Vec<String>>,
    stack: Vec<(String, usize)>,
    visited: HashSet<String>,
}

impl Iterator for DepthFirst {
    type Item = (String, usize);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (branch, depth) = self.stack.pop()?;
            if !self.visited.insert(branch.clone()) {
                continue; // cycle guard
            }
            if let Some(children) = self.children.get(&branch) {
                // Reverse push so pops come out in name order.
                for child in children.iter().rev() {
                    self.stack.push((child.clone(), depth + 1));
                }
            }
            return Some((branch, depth));
        }
    }
}

impl Engine {
    // =========================================================================
    // Graph shape
    // =========================================================================

    /// Currently checked-out branch, per the cache.
    pub fn current_branch(&self) -> Option<String> {
        self.read_cache().current_branch().map(str::to_string)
    }

    /// All local branches, as last enumerated.
    pub fn branches(&self) -> Vec<String> {
        self.read_cache().branches().to_vec()
    }

    /// All tracked branches, sorted.
    pub fn tracked_branches(&self) -> Vec<String> {
        self.read_cache().tracked_branches()
    }

    pub fn is_tracked(&self, branch: &str) -> bool {
        self.read_cache().is_tracked(branch)
    }

    pub fn parent_of(&self, branch: &str) -> Option<String> {
        self.read_cache().parent_of(branch).map(str::to_string)
    }

    /// Children of a branch, sorted by name.
    pub fn children_of(&self, branch: &str) -> Vec<String> {
        self.read_cache().children_of(branch).to_vec()
    }

    /// The branch's stack relative to it: ancestors oldest→nearest (trunk
    /// excluded), then the branch, then descendants in DFS preorder.
    pub fn relative_stack(&self, branch: &str, range: StackRange) -> Result<Vec<String>> {
        let cache = self.read_cache();
        let mut result = Vec::new();
        if range.recursive_parents {
            result.extend(Self::ancestors_internal(&cache, branch)?);
        }
        if range.include_current {
            result.push(branch.to_string());
        }
        if range.recursive_children {
            result.extend(Self::descendants_internal(&cache, branch));
        }
        Ok(result)
    }

    /// The whole stack containing a branch.
    pub fn full_stack(&self, branch: &str) -> Result<Vec<String>> {
        self.relative_stack(branch, StackRange::full())
    }

    /// Ancestors of `branch`, oldest (nearest trunk) first, trunk and the
    /// branch itself excluded. Errors on a metadata cycle.
    pub(crate) fn ancestors_internal(cache: &GraphCache, branch: &str) -> Result<Vec<String>> {
        let trunk = cache.trunk();
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        seen.insert(branch.to_string());

        let mut current = branch;
        while let Some(parent) = cache.parent_of(current) {
            if parent == trunk {
                break;
            }
            if !seen.insert(parent.to_string()) {
                return Err(Error::CycleDetected {
                    branch: branch.to_string(),
                    parent: parent.to_string(),
                });
            }
            chain.push(parent.to_string());
            current = parent;
        }
        chain.reverse();
        Ok(chain)
    }

    /// Descendants of `branch` in DFS preorder, the branch itself excluded,
    /// siblings in name order, cycle-guarded.
    pub(crate) fn descendants_internal(cache: &GraphCache, branch: &str) -> Vec<String> {
        let mut result = Vec::new();
        let mut visited = HashSet::new();
        visited.insert(branch.to_string());
        let mut stack: Vec<String> = cache.children_of(branch).iter().rev().cloned().collect();
        while let Some(current) = stack.pop() {
            if !visited.insert(current.clone()) {
                continue;
            }
            for child in cache.children_of(&current).iter().rev() {
                stack.push(child.clone());
            }
            result.push(current);
        }
        result
    }

    /// Stable-sort branches by stack depth (trunk depth 0), so parents always
    /// precede their children. The restack order.
    pub fn sort_topologically(&self, branches: &[String]) -> Vec<String> {
        let cache = self.read_cache();
        let mut sorted: Vec<String> = branches.to_vec();
        sorted.sort_by_key(|b| cache.depth_of(b));
        sorted
    }

    /// Lazy depth-first cursor starting at `start` (depth 0).
    pub fn depth_first(&self, start: &str) -> DepthFirst {
        let cache = self.read_cache();
        DepthFirst {
            children: cache.children_snapshot(),
            stack: vec![(start.to_string(), 0)],
            visited: HashSet::new(),
        }
    }

    // =========================================================================
    // Sync state
    // =========================================================================

    /// True iff the stored divergence revision equals the current revision of
    /// the branch's parent. Trunk is always up to date; a missing stored
    /// revision or unresolvable parent means not up to date.
    pub fn is_up_to_date(&self, branch: &str) -> Result<bool> {
        let cache = self.read_cache();
        self.is_up_to_date_internal(&cache, branch)
    }

    pub(crate) fn is_up_to_date_internal(&self, cache: &GraphCache, branch: &str) -> Result<bool> {
        if branch == cache.trunk() {
            return Ok(true);
        }
        let record = self.metadata_store().read(branch)?;
        let Some(stored) = record.parent_branch_revision else {
            return Ok(false);
        };
        let Some(parent) = record
            .parent_branch_name
            .as_deref()
            .or_else(|| cache.parent_of(branch))
        else {
            return Ok(false);
        };
        match self.git().get_ref(&format!("refs/heads/{parent}"))? {
            Some(parent_tip) => Ok(stored == parent_tip.as_str()),
            None => Ok(false),
        }
    }

    /// Compare the local branch tip to the cached remote tip, falling back to
    /// the local remote-tracking ref. False when no remote record exists.
    pub fn branch_matches_remote(&self, branch: &str) -> Result<bool> {
        let cache = self.read_cache();
        self.branch_matches_remote_internal(&cache, branch)
    }

    pub(crate) fn branch_matches_remote_internal(
        &self,
        cache: &GraphCache,
        branch: &str,
    ) -> Result<bool> {
        let Some(local) = self.git().get_ref(&format!("refs/heads/{branch}"))? else {
            return Ok(false);
        };
        let remote = match cache.remote_sha_of(branch) {
            Some(sha) => Some(sha.clone()),
            None => self.git().remote_revision_of(branch)?,
        };
        match remote {
            Some(remote) => Ok(remote == local),
            None => Ok(false),
        }
    }

    // =========================================================================
    // Deletion safety
    // =========================================================================

    /// Whether a branch can be deleted without losing work.
    ///
    /// Safe when its PR is closed or merged, when the VCS says it is merged
    /// into trunk, or when it has a PR record and an empty diff against its
    /// parent.
    pub fn deletion_status(&self, branch: &str) -> Result<DeletionStatus> {
        let cache = self.read_cache();
        let trunk = cache.trunk().to_string();
        if branch == trunk {
            return Err(Error::TrunkOperation(trunk));
        }
        if !self.git().branch_exists(branch)? {
            return Err(Error::BranchNotFound(branch.to_string()));
        }

        let record = self.metadata_store().read(branch)?;
        let pr = record.pr_info.as_ref();

        if let Some(pr) = pr {
            let number = pr.number.map(|n| format!("#{n}")).unwrap_or_else(|| "?".to_string());
            match pr.state {
                Some(PrState::Closed) => {
                    return Ok(DeletionStatus {
                        safe: true,
                        reason: format!("PR {number} is closed"),
                    });
                }
                Some(PrState::Merged) => {
                    return Ok(DeletionStatus {
                        safe: true,
                        reason: format!("PR {number} is merged"),
                    });
                }
                _ => {}
            }
        }

        if self.git().is_ancestor(branch, &trunk)? {
            return Ok(DeletionStatus {
                safe: true,
                reason: format!("merged into '{trunk}'"),
            });
        }

        if pr.is_some() {
            let parent = record
                .parent_branch_name
                .clone()
                .or_else(|| cache.parent_of(branch).map(str::to_string))
                .unwrap_or_else(|| trunk.clone());
            if self.git().branch_exists(&parent)? && self.git().diff_is_empty(&parent, branch)? {
                return Ok(DeletionStatus {
                    safe: true,
                    reason: format!("no changes vs parent '{parent}'"),
                });
            }
        }

        Ok(DeletionStatus {
            safe: false,
            reason: format!("has changes not merged into '{trunk}'"),
        })
    }

    // =========================================================================
    // History
    // =========================================================================

    /// Walk the branch's commit history newest→oldest and return the tracked
    /// branches (trunk included) whose tip is the first matching commit.
    /// Used to auto-discover a parent for an untracked branch.
    pub fn find_most_recent_tracked_ancestors(&self, branch: &str) -> Result<Vec<String>> {
        let cache = self.read_cache();
        self.find_most_recent_tracked_ancestors_internal(&cache, branch)
    }

    pub(crate) fn find_most_recent_tracked_ancestors_internal(
        &self,
        cache: &GraphCache,
        branch: &str,
    ) -> Result<Vec<String>> {
        let mut candidates = cache.tracked_branches();
        let trunk = cache.trunk().to_string();
        if !candidates.contains(&trunk) {
            candidates.push(trunk);
        }
        candidates.retain(|c| c != branch);
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let revs = self.git().batch_rev_parse(&candidates)?;
        let mut tips: HashMap<&str, Vec<&str>> = HashMap::new();
        for (name, oid) in &revs {
            tips.entry(oid.as_str()).or_default().push(name.as_str());
        }

        for commit in self.git().rev_list(branch, None)? {
            if let Some(matches) = tips.get(commit.as_str()) {
                let mut names: Vec<String> = matches.iter().map(|s| s.to_string()).collect();
                names.sort();
                return Ok(names);
            }
        }
        Ok(Vec::new())
    }

    /// Commits unique to the branch: stored divergence revision (parent tip
    /// when absent) up to the branch tip, newest first.
    pub fn all_commits(&self, branch: &str, format: CommitFormat) -> Result<Vec<String>> {
        let (lower, _) = self.divergence_bound(branch)?;
        self.git().commit_range(&lower, branch, format)
    }

    /// Added/deleted line counts vs the stored divergence revision.
    pub fn diff_stats(&self, branch: &str) -> Result<DiffStats> {
        let (lower, _) = self.divergence_bound(branch)?;
        self.git().diff_stats(&lower, branch)
    }

    /// Lower bound of a branch's unique history: the stored divergence
    /// revision, or the parent's tip when no revision is stored.
    fn divergence_bound(&self, branch: &str) -> Result<(String, String)> {
        let cache = self.read_cache();
        if branch == cache.trunk() {
            return Err(Error::TrunkOperation(branch.to_string()));
        }
        let record = self.metadata_store().read(branch)?;
        let parent = record
            .parent_branch_name
            .clone()
            .or_else(|| cache.parent_of(branch).map(str::to_string))
            .ok_or_else(|| Error::NotTracked(branch.to_string()))?;
        let lower = match record.parent_branch_revision {
            Some(rev) => rev,
            None => self.git().rev_parse(&parent)?.as_str().to_string(),
        };
        Ok((lower, parent))
    }

    // =========================================================================
    // Scope
    // =========================================================================

    /// Effective scope of a branch: its explicit scope if set; otherwise
    /// inherited by walking parents up to trunk. The `none` sentinel stops
    /// inheritance and yields an empty scope.
    pub fn get_scope(&self, branch: &str) -> Scope {
        let cache = self.read_cache();
        Self::get_scope_internal(&cache, branch)
    }

    pub(crate) fn get_scope_internal(cache: &GraphCache, branch: &str) -> Scope {
        let mut seen = HashSet::new();
        let mut current = branch;
        loop {
            if !seen.insert(current.to_string()) {
                return Scope::Inherit;
            }
            match Scope::parse_opt(cache.scope_of(current)) {
                Scope::Tags(tags) => return Scope::Tags(tags),
                Scope::None => return Scope::None,
                Scope::Inherit => {}
            }
            if current == cache.trunk() {
                return Scope::Inherit;
            }
            match cache.parent_of(current) {
                Some(parent) => current = parent,
                None => return Scope::Inherit,
            }
        }
    }

    /// Remote tip of a branch per the last `ls-remote`, if cached.
    pub fn cached_remote_sha(&self, branch: &str) -> Option<Oid> {
        self.read_cache().remote_sha_of(branch).cloned()
    }

    /// The stored metadata record for a branch (empty when untracked).
    pub fn branch_metadata(&self, branch: &str) -> Result<crate::metadata::BranchMetadata> {
        let _cache = self.read_cache();
        self.metadata_store().read(branch)
    }
}
