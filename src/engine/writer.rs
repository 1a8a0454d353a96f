//! Mutating operations: track/untrack, reparent, rename, delete, working
//! tree.
//!
//! Every public method acquires the exclusive side of the engine lock and
//! leaves the cache patched (or rebuilt) before releasing it, so readers
//! never observe a half-applied mutation. The `_locked` variants are reused
//! by delete/restack under an already-held lock.

use slog::info;

use crate::cache::GraphCache;
use crate::error::{Error, Result};
use crate::git::{CheckoutMode, CommitOpts};
use crate::metadata::{validate_branch_name, BranchMetadata, PrState};
use crate::scope::Scope;

use super::Engine;

impl Engine {
    // =========================================================================
    // Tracking
    // =========================================================================

    /// Start tracking a branch under a parent. The initial divergence
    /// revision is the merge base of branch and parent. An existing record's
    /// scope and PR info are preserved.
    pub fn track(&self, branch: &str, parent: &str) -> Result<()> {
        let mut cache = self.write_cache();
        self.track_locked(&mut cache, branch, parent)
    }

    pub(crate) fn track_locked(
        &self,
        cache: &mut GraphCache,
        branch: &str,
        parent: &str,
    ) -> Result<()> {
        validate_branch_name(branch)?;
        validate_branch_name(parent)?;
        if branch == cache.trunk() {
            return Err(Error::TrunkOperation(branch.to_string()));
        }
        if !self.git().branch_exists(branch)? {
            return Err(Error::BranchNotFound(branch.to_string()));
        }
        if parent != cache.trunk() && !self.git().branch_exists(parent)? {
            return Err(Error::BranchNotFound(parent.to_string()));
        }
        if let Some(pattern) = self.config().branch_name_regex()? {
            if !pattern.is_match(branch) {
                return Err(Error::InvalidBranchName {
                    name: branch.to_string(),
                    reason: format!("does not match configured pattern '{}'", pattern.as_str()),
                });
            }
        }
        if cache.would_create_cycle(branch, parent) {
            return Err(Error::CycleDetected {
                branch: branch.to_string(),
                parent: parent.to_string(),
            });
        }

        let merge_base = self.git().merge_base(branch, parent)?;
        let mut record = self.metadata_store().read(branch)?;
        record.parent_branch_name = Some(parent.to_string());
        record.parent_branch_revision = Some(merge_base.as_str().to_string());
        self.metadata_store().write(branch, &record)?;
        cache.patch_branch(branch, Some(&record));

        info!(self.logger(), "tracked branch"; "branch" => branch, "parent" => parent);
        Ok(())
    }

    /// Stop tracking a branch. The VCS branch itself is untouched.
    pub fn untrack(&self, branch: &str) -> Result<()> {
        let mut cache = self.write_cache();
        self.metadata_store().delete(branch)?;
        cache.patch_branch(branch, None);
        Ok(())
    }

    // =========================================================================
    // Reparenting
    // =========================================================================

    /// Change a branch's recorded parent, recomputing its divergence
    /// revision.
    ///
    /// Divergence preservation: when the old parent has been merged into the
    /// new parent and the stored divergence is still an ancestor of the
    /// branch, the stored revision is kept so a later restack does not
    /// re-apply already-merged changes. Otherwise the divergence becomes the
    /// new merge base.
    pub fn set_parent(&self, branch: &str, new_parent: &str) -> Result<()> {
        let mut cache = self.write_cache();
        self.set_parent_locked(&mut cache, branch, new_parent)?;
        Ok(())
    }

    pub(crate) fn set_parent_locked(
        &self,
        cache: &mut GraphCache,
        branch: &str,
        new_parent: &str,
    ) -> Result<BranchMetadata> {
        validate_branch_name(branch)?;
        validate_branch_name(new_parent)?;
        if branch == cache.trunk() {
            return Err(Error::TrunkOperation(branch.to_string()));
        }
        if !self.git().branch_exists(branch)? {
            return Err(Error::BranchNotFound(branch.to_string()));
        }
        if new_parent != cache.trunk() && !self.git().branch_exists(new_parent)? {
            return Err(Error::BranchNotFound(new_parent.to_string()));
        }
        if cache.would_create_cycle(branch, new_parent) {
            return Err(Error::CycleDetected {
                branch: branch.to_string(),
                parent: new_parent.to_string(),
            });
        }

        let mut record = self.metadata_store().read(branch)?;
        let old_parent = record.parent_branch_name.clone();

        // A garbage stored revision (pruned object) reads as "not an
        // ancestor" rather than failing the reparent.
        let preserve = match (&old_parent, &record.parent_branch_revision) {
            (Some(old), Some(stored)) if old != new_parent => {
                self.git().is_ancestor(stored, branch).unwrap_or(false)
                    && self.old_parent_merged_into(old, new_parent)?
            }
            _ => false,
        };

        if !preserve {
            let merge_base = self.git().merge_base(branch, new_parent)?;
            record.parent_branch_revision = Some(merge_base.as_str().to_string());
        }
        record.parent_branch_name = Some(new_parent.to_string());
        self.metadata_store().write(branch, &record)?;
        cache.patch_branch(branch, Some(&record));

        info!(self.logger(), "reparented branch";
              "branch" => branch,
              "old_parent" => old_parent.as_deref().unwrap_or("<none>"),
              "new_parent" => new_parent,
              "divergence_preserved" => preserve);
        Ok(record)
    }

    /// Whether `old` has been merged into `new_parent`: per the VCS graph
    /// when `old` still exists locally, else per its stored PR state. The PR
    /// state path covers squash merges and deleted branches.
    fn old_parent_merged_into(&self, old: &str, new_parent: &str) -> Result<bool> {
        if self.git().branch_exists(old)? {
            if self.git().is_ancestor(old, new_parent)? {
                return Ok(true);
            }
        }
        let record = self.metadata_store().read(old)?;
        Ok(record.pr_info.and_then(|pr| pr.state) == Some(PrState::Merged))
    }

    // =========================================================================
    // Scope
    // =========================================================================

    /// Set a branch's explicit scope. Inheritance stays a read-time concern.
    pub fn set_scope(&self, branch: &str, scope: &Scope) -> Result<()> {
        let mut cache = self.write_cache();
        let mut record = self.metadata_store().read(branch)?;
        record.scope = scope.to_stored();
        self.metadata_store().write(branch, &record)?;
        cache.patch_branch(branch, Some(&record));
        Ok(())
    }

    /// Record (or clear) a branch's PR info, as submit workflows do after
    /// talking to the host.
    pub fn set_pr_info(&self, branch: &str, pr: crate::metadata::PrInfo) -> Result<()> {
        let mut cache = self.write_cache();
        let mut record = self.metadata_store().read(branch)?;
        record.pr_info = Some(pr);
        self.metadata_store().write(branch, &record)?;
        cache.patch_branch(branch, Some(&record));
        Ok(())
    }

    // =========================================================================
    // Branch lifecycle
    // =========================================================================

    /// Delete a branch. Its children are reparented to its parent (trunk if
    /// none) with the divergence-preservation rule re-evaluated per child.
    /// Refuses trunk; switches to trunk first when deleting the current
    /// branch.
    pub fn delete(&self, branch: &str) -> Result<()> {
        let mut cache = self.write_cache();
        let trunk = cache.trunk().to_string();
        if branch == trunk {
            return Err(Error::TrunkOperation(trunk));
        }
        if !self.git().branch_exists(branch)? {
            return Err(Error::BranchNotFound(branch.to_string()));
        }

        if self.git().current_branch()?.as_deref() == Some(branch) {
            self.git().checkout(&trunk, CheckoutMode::Normal)?;
            cache.set_current_branch(Some(trunk.clone()));
        }

        let fallback_parent = cache
            .parent_of(branch)
            .map(str::to_string)
            .unwrap_or_else(|| trunk.clone());
        let children = cache.children_of(branch).to_vec();
        for child in &children {
            self.set_parent_locked(&mut cache, child, &fallback_parent)?;
        }

        self.git().delete_branch(branch)?;
        self.metadata_store().delete(branch)?;
        cache.remove_branch(branch);

        info!(self.logger(), "deleted branch";
              "branch" => branch, "reparented_children" => children.len());
        Ok(())
    }

    /// Rename a branch: the VCS branch, its metadata ref, and every child's
    /// parent pointer. The cache is rebuilt afterwards.
    pub fn rename(&self, old: &str, new: &str) -> Result<()> {
        let mut cache = self.write_cache();
        if old == cache.trunk() {
            return Err(Error::TrunkOperation(old.to_string()));
        }
        if !self.git().branch_exists(old)? {
            return Err(Error::BranchNotFound(old.to_string()));
        }
        validate_branch_name(new)?;
        if let Some(pattern) = self.config().branch_name_regex()? {
            if !pattern.is_match(new) {
                return Err(Error::InvalidBranchName {
                    name: new.to_string(),
                    reason: format!("does not match configured pattern '{}'", pattern.as_str()),
                });
            }
        }

        let children = cache.children_of(old).to_vec();

        self.git().rename_branch(old, new)?;
        self.metadata_store().rename(old, new)?;
        for child in &children {
            let mut record = self.metadata_store().read(child)?;
            record.parent_branch_name = Some(new.to_string());
            self.metadata_store().write(child, &record)?;
        }

        self.rebuild_locked(&mut cache, true)?;
        info!(self.logger(), "renamed branch"; "old" => old, "new" => new);
        Ok(())
    }

    // =========================================================================
    // Working tree
    // =========================================================================

    /// Check out a branch and record it as current.
    pub fn checkout(&self, branch: &str, mode: CheckoutMode) -> Result<()> {
        let mut cache = self.write_cache();
        self.git().checkout(branch, mode)?;
        cache.set_current_branch(self.git().current_branch()?);
        Ok(())
    }

    /// Create a commit on the current branch.
    pub fn commit(&self, opts: &CommitOpts) -> Result<()> {
        let _cache = self.write_cache();
        if self.git().current_branch()?.is_none() {
            return Err(Error::NotOnBranch);
        }
        self.git().commit(opts)
    }

    /// Stash uncommitted changes. Returns false when nothing was stashed.
    pub fn stash_push(&self, message: &str) -> Result<bool> {
        let _cache = self.write_cache();
        self.git().stash_push(message)
    }

    /// Pop the most recent stash.
    pub fn stash_pop(&self) -> Result<()> {
        let _cache = self.write_cache();
        self.git().stash_pop()
    }

    /// Add a linked worktree for a branch.
    pub fn worktree_add(&self, path: &std::path::Path, branch: &str) -> Result<()> {
        let _cache = self.write_cache();
        if !self.git().branch_exists(branch)? {
            return Err(Error::BranchNotFound(branch.to_string()));
        }
        self.git().worktree_add(path, branch)
    }

    /// Remove a linked worktree.
    pub fn worktree_remove(&self, path: &std::path::Path, force: bool) -> Result<()> {
        let _cache = self.write_cache();
        self.git().worktree_remove(path, force)
    }

    /// List linked worktrees.
    pub fn worktrees(&self) -> Result<Vec<crate::git::WorktreeInfo>> {
        self.git().worktree_list()
    }
}
