//! VCS driver abstraction.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Engine                               │
//! │  (graph cache, restack, snapshots, PR status)               │
//! │                                                             │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │              Arc<dyn GitDriver>                     │    │
//! │  │  (branches, refs, blobs, rebase, remote, worktree)  │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//!                    ┌────────────────────┐
//!                    │   SubprocessGit    │
//!                    │   (git CLI)        │
//!                    └────────────────────┘
//! ```
//!
//! `GitDriver` is a capability surface: the real implementation shells out to
//! the `git` CLI, and demo/test-fake variants plug in behind the same trait.
//! Failures carry the failing subcommand, its arguments and captured output.
//! Long-running operations take a [`CancelToken`](crate::cancel::CancelToken)
//! so a caller-level cancel aborts in-flight subprocesses.

mod subprocess;

pub use subprocess::SubprocessGit;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::cancel::CancelToken;
use crate::error::{Error, Result};

/// Git object ID (40-character hex string).
///
/// The canonical revision identifier used throughout the engine. Validated
/// construction is available for external input; output parsed from git is
/// taken as-is.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Oid(String);

impl Oid {
    /// Create an Oid from a hex string, validating the format.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.len() != 40 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::InvalidRevision(s.to_string()));
        }
        Ok(Self(s.to_lowercase()))
    }

    /// Create an Oid without validation. Use only for strings produced by git.
    pub(crate) fn from_git_output(s: &str) -> Self {
        Self(s.trim().to_string())
    }

    /// The full hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 7 chars).
    pub fn short(&self) -> &str {
        &self.0[..7.min(self.0.len())]
    }
}

impl std::fmt::Display for Oid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome of a rebase invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebaseOutcome {
    /// Rebase completed.
    Done,
    /// Rebase paused on conflicts requiring resolution.
    Conflict,
}

impl RebaseOutcome {
    pub fn is_conflict(&self) -> bool {
        matches!(self, RebaseOutcome::Conflict)
    }
}

/// How to check out a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CheckoutMode {
    /// Plain `git checkout`.
    #[default]
    Normal,
    /// Detached HEAD checkout.
    Detached,
    /// Force checkout, discarding local changes.
    Force,
}

/// How to reset the working tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetMode {
    Hard,
    Soft,
}

/// How to push a branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PushMode {
    /// `--force-with-lease`: refuses to clobber unseen remote commits.
    #[default]
    ForceWithLease,
    /// Unconditional `--force`.
    Force,
}

/// Options for creating a commit.
#[derive(Debug, Clone, Default)]
pub struct CommitOpts {
    /// Commit message. Required unless amending with `no_edit`.
    pub message: Option<String>,
    /// Amend the previous commit instead of creating a new one.
    pub amend: bool,
    /// With `amend`, keep the existing message.
    pub no_edit: bool,
    /// Stage all changes (`git add -A`) before committing.
    pub stage_all: bool,
}

/// Rendering of a commit range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommitFormat {
    /// Full SHA only.
    #[default]
    Sha,
    /// `<short-sha> <subject>`.
    Oneline,
    /// Full commit message body.
    Message,
    /// Subject line only.
    Subject,
}

/// Added/deleted line counts for a diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DiffStats {
    pub added: usize,
    pub deleted: usize,
}

impl DiffStats {
    pub fn is_empty(&self) -> bool {
        self.added == 0 && self.deleted == 0
    }
}

/// One linked worktree as reported by the VCS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeInfo {
    pub path: PathBuf,
    /// Branch checked out in the worktree, if any (detached otherwise).
    pub branch: Option<String>,
    /// Whether this entry is the worktree the driver was opened in.
    pub is_current: bool,
}

/// Contract over the underlying VCS.
///
/// Implementations must be safe to share across threads; the engine holds one
/// behind `Arc<dyn GitDriver>` and serializes mutations itself.
pub trait GitDriver: Send + Sync {
    /// Path to the `.git` directory.
    fn git_dir(&self) -> &Path;

    /// Path to the working tree root.
    fn workdir(&self) -> &Path;

    // =========================================================================
    // Repository & refs
    // =========================================================================

    /// List all local branch names.
    fn list_branches(&self) -> Result<Vec<String>>;

    /// Whether a local branch exists.
    fn branch_exists(&self, name: &str) -> Result<bool>;

    /// Resolve a ref by full name, `None` if absent.
    fn get_ref(&self, name: &str) -> Result<Option<Oid>>;

    /// Create or update a ref, with a reflog-style annotation.
    fn update_ref(&self, name: &str, target: &Oid, log_message: &str) -> Result<()>;

    /// Delete a ref. Idempotent.
    fn delete_ref(&self, name: &str) -> Result<()>;

    /// List `(name, target)` for all refs under a prefix.
    fn list_refs(&self, prefix: &str) -> Result<Vec<(String, Oid)>>;

    /// Write a content-addressed blob, returning its id.
    fn create_blob(&self, content: &[u8]) -> Result<Oid>;

    /// Read a blob's content.
    fn read_blob(&self, oid: &Oid) -> Result<Vec<u8>>;

    /// Whether `ancestor` is an ancestor of `descendant`.
    fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool>;

    /// Merge base of two revisions.
    fn merge_base(&self, a: &str, b: &str) -> Result<Oid>;

    /// Resolve a single revision expression.
    fn rev_parse(&self, rev: &str) -> Result<Oid>;

    /// Resolve many revisions in one subprocess. Unresolvable inputs are
    /// omitted from the result.
    fn batch_rev_parse(&self, revs: &[String]) -> Result<HashMap<String, Oid>>;

    /// Commit SHAs reachable from `rev`, newest first, optionally bounded.
    fn rev_list(&self, rev: &str, limit: Option<usize>) -> Result<Vec<Oid>>;

    // =========================================================================
    // Working tree
    // =========================================================================

    /// Current branch name, `None` when HEAD is detached.
    fn current_branch(&self) -> Result<Option<String>>;

    /// Check out a branch or revision.
    fn checkout(&self, target: &str, mode: CheckoutMode) -> Result<()>;

    /// Create a branch at `at` (HEAD if `None`) and check it out.
    fn create_and_checkout(&self, name: &str, at: Option<&str>) -> Result<()>;

    /// Delete a local branch.
    fn delete_branch(&self, name: &str) -> Result<()>;

    /// Rename a local branch.
    fn rename_branch(&self, old: &str, new: &str) -> Result<()>;

    /// Reset the working tree to a target.
    fn reset(&self, target: &str, mode: ResetMode) -> Result<()>;

    /// Create a commit.
    fn commit(&self, opts: &CommitOpts) -> Result<()>;

    /// Stage all changes.
    fn stage_all(&self) -> Result<()>;

    /// Stash uncommitted changes (including untracked). Returns false when
    /// there was nothing to stash.
    fn stash_push(&self, message: &str) -> Result<bool>;

    /// Pop the most recent stash.
    fn stash_pop(&self) -> Result<()>;

    /// Whether the working tree has uncommitted changes.
    fn has_uncommitted_changes(&self) -> Result<bool>;

    /// Add a linked worktree for a branch.
    fn worktree_add(&self, path: &Path, branch: &str) -> Result<()>;

    /// Remove a linked worktree.
    fn worktree_remove(&self, path: &Path, force: bool) -> Result<()>;

    /// List linked worktrees.
    fn worktree_list(&self) -> Result<Vec<WorktreeInfo>>;

    // =========================================================================
    // Remote
    // =========================================================================

    /// The configured remote name (e.g. "origin").
    fn remote_name(&self) -> &str;

    /// Fetch branch tips from the remote via a single `ls-remote`.
    /// Returns branch name → revision.
    fn fetch_remote_shas(&self, cancel: &CancelToken) -> Result<HashMap<String, Oid>>;

    /// Push a branch to the remote.
    fn push(&self, branch: &str, mode: PushMode, cancel: &CancelToken) -> Result<()>;

    /// Pull a branch from the remote.
    fn pull(&self, branch: &str, cancel: &CancelToken) -> Result<()>;

    /// The locally-known remote revision of a branch (its remote-tracking
    /// ref), `None` when no remote record exists.
    fn remote_revision_of(&self, branch: &str) -> Result<Option<Oid>>;

    // =========================================================================
    // Stack-supporting
    // =========================================================================

    /// `git rebase --onto <new_upstream> <old_upstream> <branch>`.
    fn rebase(
        &self,
        branch: &str,
        new_upstream: &str,
        old_upstream: &str,
        cancel: &CancelToken,
    ) -> Result<RebaseOutcome>;

    /// Continue a conflicted rebase after resolution.
    fn rebase_continue(&self, cancel: &CancelToken) -> Result<RebaseOutcome>;

    /// Whether the VCS has a rebase in progress.
    fn rebase_in_progress(&self) -> Result<bool>;

    /// The branch the in-progress rebase is operating on, if any.
    fn rebasing_branch(&self) -> Result<Option<String>>;

    /// Commits in `old..new`, newest first. The last element is the oldest
    /// commit of the range (the soft-reset target for squash).
    fn commit_range(&self, old: &str, new: &str, format: CommitFormat) -> Result<Vec<String>>;

    /// Added/deleted line counts between two revisions.
    fn diff_stats(&self, base: &str, branch: &str) -> Result<DiffStats>;

    /// Whether the diff between two revisions is empty.
    fn diff_is_empty(&self, base: &str, branch: &str) -> Result<bool>;
}
