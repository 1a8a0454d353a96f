//! Restack engine: single- and batch-branch rebase orchestration.
//!
//! Per branch the restack runs a small state machine: resolve the parent
//! (auto-tracking untracked branches when their history reaches a tracked
//! tip), reparent away from merged or deleted parents, validate the stored
//! divergence revision against the real graph, then hand the rebase to the
//! VCS. A conflict stops the batch and surfaces the revision to resume from;
//! `continue_rebase` finishes the interrupted branch after resolution.

use std::collections::HashMap;

use slog::info;

use crate::cache::GraphCache;
use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::git::{CheckoutMode, Oid, RebaseOutcome};
use crate::metadata::{BranchMetadata, PrState};

use super::Engine;

/// Why a reparent happened during restack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reparent {
    pub old_parent: String,
    pub new_parent: String,
}

/// Outcome of restacking one branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestackOutcome {
    /// Nothing to do (already up to date, or the branch is not tracked and no
    /// parent could be discovered).
    Unneeded { reason: String },
    /// Rebase completed and metadata was updated.
    Done,
    /// Rebase paused on conflicts. `rebased_branch_base` is the parent
    /// revision the branch was being moved onto; pass it to
    /// `continue_rebase` after resolving.
    Conflict { rebased_branch_base: String },
}

/// Result of restacking one branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestackResult {
    pub branch: String,
    pub outcome: RestackOutcome,
    pub reparented: Option<Reparent>,
}

impl RestackResult {
    pub fn is_conflict(&self) -> bool {
        matches!(self.outcome, RestackOutcome::Conflict { .. })
    }
}

/// The branch a batch stopped on, with the revision to resume from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchConflict {
    pub branch: String,
    pub rebased_branch_base: String,
}

/// Result of a batch restack.
///
/// Conflicts are not errors: the batch stops at the first one and reports the
/// branches it never attempted. Hard driver failures propagate as `Err`.
#[derive(Debug, Default)]
pub struct BatchRestackResult {
    /// Per-branch results, in attempt order (includes the conflicting one).
    pub results: Vec<RestackResult>,
    /// Set when the batch stopped on a conflict.
    pub conflict: Option<BatchConflict>,
    /// Branches not yet attempted when the batch stopped.
    pub remaining: Vec<String>,
}

impl BatchRestackResult {
    pub fn succeeded(&self) -> bool {
        self.conflict.is_none()
    }
}

/// Outcome of a successful `continue_rebase`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContinueResult {
    /// The branch the VCS just finalized; its metadata was updated.
    pub branch: String,
}

impl Engine {
    /// Restack one branch onto the current revision of its parent.
    ///
    /// On success the working tree is returned to the branch that was checked
    /// out before the call; on conflict the VCS is left mid-rebase.
    pub fn restack(&self, branch: &str, cancel: &CancelToken) -> Result<RestackResult> {
        let mut cache = self.write_cache();
        let original = cache.current_branch().map(str::to_string);

        let result = self.restack_locked(&mut cache, branch, &mut None, &mut None, true, cancel)?;

        if !result.is_conflict() {
            self.restore_checkout(&mut cache, original.as_deref())?;
        }
        Ok(result)
    }

    /// Restack a batch of branches, in the given (topologically sorted)
    /// order. Metadata and revisions for the transitive parent closure are
    /// prefetched; the cache is rebuilt once after full success.
    pub fn restack_branches(
        &self,
        branches: &[String],
        cancel: &CancelToken,
    ) -> Result<BatchRestackResult> {
        if branches.is_empty() {
            return Ok(BatchRestackResult::default());
        }

        let mut cache = self.write_cache();
        let original = cache.current_branch().map(str::to_string);

        // Prefetch the closure: every input plus all ancestors plus trunk.
        let closure = self.restack_closure(&cache, branches)?;
        let (records, _errors) = self.block_on(self.metadata_store().batch_read(&closure));
        let revisions = self.git().batch_rev_parse(&closure)?;
        let mut records = Some(records);
        let mut revisions = Some(revisions);

        let mut batch = BatchRestackResult::default();
        for (index, branch) in branches.iter().enumerate() {
            cancel.check()?;
            let result =
                self.restack_locked(&mut cache, branch, &mut records, &mut revisions, false, cancel)?;

            if let RestackOutcome::Conflict { rebased_branch_base } = &result.outcome {
                batch.conflict = Some(BatchConflict {
                    branch: branch.clone(),
                    rebased_branch_base: rebased_branch_base.clone(),
                });
                batch.remaining = branches[index + 1..].to_vec();
                batch.results.push(result);
                return Ok(batch);
            }

            // Descendants must see this branch's new tip as their parent
            // revision.
            if matches!(result.outcome, RestackOutcome::Done) {
                if let Some(revisions) = revisions.as_mut() {
                    revisions.insert(branch.clone(), self.git().rev_parse(branch)?);
                }
            }
            batch.results.push(result);
        }

        self.rebuild_locked(&mut cache, false)?;
        self.restore_checkout(&mut cache, original.as_deref())?;
        info!(self.logger(), "batch restack finished"; "branches" => branches.len());
        Ok(batch)
    }

    /// Finish a conflicted rebase after the user resolved it.
    ///
    /// `rebased_branch_base` is the value surfaced by the conflicting
    /// restack; it becomes the branch's new divergence revision. A rebase
    /// that is still conflicted bubbles up as [`Error::RebaseConflict`].
    pub fn continue_rebase(
        &self,
        rebased_branch_base: &str,
        cancel: &CancelToken,
    ) -> Result<ContinueResult> {
        let mut cache = self.write_cache();
        if !self.git().rebase_in_progress()? {
            return Err(Error::RebaseNotInProgress);
        }

        match self.git().rebase_continue(cancel)? {
            RebaseOutcome::Conflict => Err(Error::RebaseConflict {
                branch: self.git().rebasing_branch()?.unwrap_or_default(),
                rebased_branch_base: rebased_branch_base.to_string(),
            }),
            RebaseOutcome::Done => {
                // The VCS just finalized the branch it was rebasing and left
                // HEAD on it.
                let branch = self.git().current_branch()?.ok_or(Error::NotOnBranch)?;
                let mut record = self.metadata_store().read(&branch)?;
                record.parent_branch_revision = Some(rebased_branch_base.to_string());
                self.metadata_store().write(&branch, &record)?;
                self.rebuild_locked(&mut cache, true)?;
                info!(self.logger(), "rebase continued to completion"; "branch" => branch.as_str());
                Ok(ContinueResult { branch })
            }
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// The single-branch restack procedure. `records`/`revisions` are batch
    /// prefetch maps (`None` falls back to per-branch reads). `patch_cache`
    /// patches in place; the batch caller defers to one rebuild instead.
    fn restack_locked(
        &self,
        cache: &mut GraphCache,
        branch: &str,
        records: &mut Option<HashMap<String, BranchMetadata>>,
        revisions: &mut Option<HashMap<String, Oid>>,
        patch_cache: bool,
        cancel: &CancelToken,
    ) -> Result<RestackResult> {
        let trunk = cache.trunk().to_string();
        if branch == trunk {
            return Ok(RestackResult {
                branch: branch.to_string(),
                outcome: RestackOutcome::Unneeded {
                    reason: "trunk is always up to date".to_string(),
                },
                reparented: None,
            });
        }

        // 1. Resolve the parent, auto-tracking when history reaches a tracked
        // tip.
        let mut parent = match cache.parent_of(branch) {
            Some(parent) => parent.to_string(),
            None => {
                let found = self.find_most_recent_tracked_ancestors_internal(cache, branch)?;
                let discovered = found
                    .iter()
                    .find(|name| *name == &trunk)
                    .or_else(|| found.first())
                    .cloned();
                match discovered {
                    Some(parent) => {
                        self.track_locked(cache, branch, &parent)?;
                        self.invalidate_record(records, branch);
                        parent
                    }
                    None => {
                        return Ok(RestackResult {
                            branch: branch.to_string(),
                            outcome: RestackOutcome::Unneeded {
                                reason: "not tracked".to_string(),
                            },
                            reparented: None,
                        });
                    }
                }
            }
        };

        // 2. Reparent away from merged or deleted parents.
        let mut reparented = None;
        if self.parent_needs_replacement(cache, &parent, &trunk, records)? {
            let new_parent = self.next_valid_ancestor(cache, &parent, &trunk, records)?;
            self.set_parent_locked(cache, branch, &new_parent)?;
            self.invalidate_record(records, branch);
            reparented = Some(Reparent {
                old_parent: parent.clone(),
                new_parent: new_parent.clone(),
            });
            parent = new_parent;
        }

        // 3. Current parent revision.
        let parent_rev = match revisions.as_ref().and_then(|m| m.get(&parent)) {
            Some(oid) => oid.clone(),
            None => self.git().rev_parse(&parent)?,
        };

        // 4. Short-circuit when already based on the parent tip.
        let mut record = self.record_of(records, branch)?;
        if record.parent_branch_revision.as_deref() == Some(parent_rev.as_str()) {
            return Ok(RestackResult {
                branch: branch.to_string(),
                outcome: RestackOutcome::Unneeded {
                    reason: "already up to date".to_string(),
                },
                reparented,
            });
        }

        // 5. Validate the stored divergence; out-of-band rewrites of the
        // parent can leave it outside the branch's history, in which case the
        // real merge base takes over.
        // A garbage revision (pruned object) reads as "not an ancestor".
        let old_parent_rev = match record.parent_branch_revision.clone() {
            Some(stored) if self.git().is_ancestor(&stored, branch).unwrap_or(false) => stored,
            _ => self.git().merge_base(branch, &parent)?.as_str().to_string(),
        };
        if old_parent_rev == parent_rev.as_str() {
            record.parent_branch_name = Some(parent.clone());
            record.parent_branch_revision = Some(parent_rev.as_str().to_string());
            self.metadata_store().write(branch, &record)?;
            self.store_record(records, branch, record.clone());
            if patch_cache {
                cache.patch_branch(branch, Some(&record));
            }
            return Ok(RestackResult {
                branch: branch.to_string(),
                outcome: RestackOutcome::Unneeded {
                    reason: "already based on parent tip".to_string(),
                },
                reparented,
            });
        }

        // 6. Rebase.
        let outcome = self
            .git()
            .rebase(branch, &parent, &old_parent_rev, cancel)?;
        if outcome.is_conflict() {
            return Ok(RestackResult {
                branch: branch.to_string(),
                outcome: RestackOutcome::Conflict {
                    rebased_branch_base: parent_rev.as_str().to_string(),
                },
                reparented,
            });
        }

        // 7. Record the new divergence.
        record.parent_branch_name = Some(parent.clone());
        record.parent_branch_revision = Some(parent_rev.as_str().to_string());
        self.metadata_store().write(branch, &record)?;
        self.store_record(records, branch, record.clone());
        if patch_cache {
            cache.patch_branch(branch, Some(&record));
        }

        info!(self.logger(), "restacked branch";
              "branch" => branch, "parent" => parent.as_str(), "onto" => parent_rev.short());
        Ok(RestackResult {
            branch: branch.to_string(),
            outcome: RestackOutcome::Done,
            reparented,
        })
    }

    /// A parent must be replaced when it no longer exists locally, is merged
    /// into trunk per the VCS graph, or its stored PR state is MERGED. The PR
    /// state is read from the engine's record, not the host, so restack works
    /// offline; it may lag reality until a submit pass refreshes it.
    fn parent_needs_replacement(
        &self,
        _cache: &GraphCache,
        parent: &str,
        trunk: &str,
        records: &mut Option<HashMap<String, BranchMetadata>>,
    ) -> Result<bool> {
        if parent == trunk {
            return Ok(false);
        }
        if !self.git().branch_exists(parent)? {
            return Ok(true);
        }
        if self.git().is_ancestor(parent, trunk)? {
            return Ok(true);
        }
        let record = self.record_of(records, parent)?;
        Ok(record.pr_info.and_then(|pr| pr.state) == Some(PrState::Merged))
    }

    /// Walk the parent chain upward to the nearest ancestor that does not
    /// itself need replacement, falling back to trunk.
    fn next_valid_ancestor(
        &self,
        cache: &mut GraphCache,
        start: &str,
        trunk: &str,
        records: &mut Option<HashMap<String, BranchMetadata>>,
    ) -> Result<String> {
        let mut current = start.to_string();
        let mut guard = 0usize;
        loop {
            let next = match cache.parent_of(&current) {
                Some(parent) => parent.to_string(),
                None => self
                    .record_of(records, &current)?
                    .parent_branch_name
                    .unwrap_or_else(|| trunk.to_string()),
            };
            if next == trunk || !self.parent_needs_replacement(cache, &next, trunk, records)? {
                return Ok(next);
            }
            guard += 1;
            if guard > 1000 {
                return Ok(trunk.to_string());
            }
            current = next;
        }
    }

    /// Every input branch plus all its ancestors plus trunk, deduplicated.
    fn restack_closure(&self, cache: &GraphCache, branches: &[String]) -> Result<Vec<String>> {
        let mut closure: Vec<String> = Vec::new();
        let mut push = |name: &str, closure: &mut Vec<String>| {
            if !closure.iter().any(|n| n == name) {
                closure.push(name.to_string());
            }
        };
        for branch in branches {
            push(branch, &mut closure);
            for ancestor in Self::ancestors_internal(cache, branch)? {
                push(&ancestor, &mut closure);
            }
        }
        push(cache.trunk(), &mut closure);
        Ok(closure)
    }

    fn record_of(
        &self,
        records: &mut Option<HashMap<String, BranchMetadata>>,
        branch: &str,
    ) -> Result<BranchMetadata> {
        if let Some(map) = records {
            if let Some(record) = map.get(branch) {
                return Ok(record.clone());
            }
        }
        let record = self.metadata_store().read(branch)?;
        self.store_record(records, branch, record.clone());
        Ok(record)
    }

    fn store_record(
        &self,
        records: &mut Option<HashMap<String, BranchMetadata>>,
        branch: &str,
        record: BranchMetadata,
    ) {
        if let Some(map) = records {
            map.insert(branch.to_string(), record);
        }
    }

    fn invalidate_record(&self, records: &mut Option<HashMap<String, BranchMetadata>>, branch: &str) {
        if let Some(map) = records {
            map.remove(branch);
        }
    }

    /// Rebase leaves HEAD on the rebased branch; put the user back where they
    /// were when that branch still exists.
    fn restore_checkout(&self, cache: &mut GraphCache, original: Option<&str>) -> Result<()> {
        let Some(original) = original else {
            return Ok(());
        };
        if self.git().current_branch()?.as_deref() == Some(original) {
            cache.set_current_branch(Some(original.to_string()));
            return Ok(());
        }
        if self.git().branch_exists(original)? {
            self.git().checkout(original, CheckoutMode::Normal)?;
            cache.set_current_branch(Some(original.to_string()));
        }
        Ok(())
    }
}
