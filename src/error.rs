//! Error types for the stack engine.
//!
//! All fallible engine operations return [`Result`]. Errors are typed values
//! carrying enough context to render actionable messages; the engine itself
//! never prints. `GitCommand` wraps a failed subprocess invocation with the
//! command line and captured output so callers can surface the real failure.

use std::path::PathBuf;

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Error taxonomy for engine operations.
#[derive(Debug, Error)]
pub enum Error {
    /// HEAD is detached while a branch-dependent operation was requested.
    #[error("not currently on a branch (detached HEAD)")]
    NotOnBranch,

    /// A named branch does not exist locally.
    #[error("branch '{0}' not found")]
    BranchNotFound(String),

    /// The operation is not allowed on the trunk branch.
    #[error("operation not allowed on trunk branch '{0}'")]
    TrunkOperation(String),

    /// A branch has no metadata record (it was never tracked).
    #[error("branch '{0}' is not tracked")]
    NotTracked(String),

    /// A rebase stopped on conflicts. `rebased_branch_base` is the revision
    /// the branch was being rebased onto; pass it to `continue_rebase` after
    /// resolving the conflicts.
    #[error("rebase of '{branch}' stopped on conflicts")]
    RebaseConflict {
        branch: String,
        rebased_branch_base: String,
    },

    /// `continue_rebase` was called but the VCS has no rebase in progress.
    #[error("no rebase in progress")]
    RebaseNotInProgress,

    /// An underlying git invocation failed.
    #[error("git {command} failed: {}", stderr.trim())]
    GitCommand {
        command: String,
        args: Vec<String>,
        stdout: String,
        stderr: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A metadata blob contained invalid JSON. Reads treat this as an empty
    /// record; the error surfaces only on write paths.
    #[error("invalid metadata for branch '{branch}'")]
    MetadataParse {
        branch: String,
        #[source]
        source: serde_json::Error,
    },

    /// Listing remote refs failed. The remote-SHA cache is left empty.
    #[error("failed to list remote refs: {0}")]
    RemoteFetch(String),

    /// Snapshot file read/write failed.
    #[error("snapshot i/o failed at {path}")]
    SnapshotIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A snapshot with the given id does not exist.
    #[error("snapshot '{0}' not found")]
    SnapshotNotFound(String),

    /// Setting this parent would create a cycle in the branch graph.
    #[error("setting parent of '{branch}' to '{parent}' would create a cycle")]
    CycleDetected { branch: String, parent: String },

    /// A branch name failed validation (corrupt metadata or configured pattern).
    #[error("invalid branch name '{name}': {reason}")]
    InvalidBranchName { name: String, reason: String },

    /// A revision string is not a valid object id.
    #[error("invalid revision '{0}'")]
    InvalidRevision(String),

    /// Repository configuration could not be read or written.
    #[error("config i/o failed at {path}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Another stackit process holds the operation lock.
    #[error("another stackit operation is in progress (lock at {path})")]
    LockBusy { path: PathBuf },

    /// The engine's internal worker runtime could not be started.
    #[error("failed to start worker runtime")]
    Runtime {
        #[source]
        source: std::io::Error,
    },

    /// The caller's cancellation token fired between VCS subcommands.
    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    /// Construct a `GitCommand` error from captured subprocess output.
    pub(crate) fn git_command(command: &str, args: &[String], stdout: &[u8], stderr: &[u8]) -> Self {
        Error::GitCommand {
            command: command.to_string(),
            args: args.to_vec(),
            stdout: String::from_utf8_lossy(stdout).into_owned(),
            stderr: String::from_utf8_lossy(stderr).into_owned(),
            source: None,
        }
    }

    /// Construct a `GitCommand` error for a spawn failure (no output captured).
    pub(crate) fn git_spawn(command: &str, args: &[String], source: std::io::Error) -> Self {
        Error::GitCommand {
            command: command.to_string(),
            args: args.to_vec(),
            stdout: String::new(),
            stderr: String::new(),
            source: Some(Box::new(source)),
        }
    }

    /// True for errors that indicate a rebase paused on conflicts.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::RebaseConflict { .. })
    }
}
