//! Stack engine for stacked-diff development on top of git.
//!
//! `stackit` keeps a chain of dependent branches consistent as branches are
//! edited, trunk advances, and reviews proceed. The core is the [`Engine`]:
//! an in-process model of the branch graph, persisted through metadata refs
//! (`refs/stackit/metadata/<branch>` → JSON blob), with an orchestrator that
//! mutates the VCS (rebase, reset, branch create/delete, ref update) while
//! preserving the graph invariants.
//!
//! # Components
//!
//! - [`git`]: the VCS driver contract and its subprocess implementation.
//! - [`metadata`]: blob-backed per-branch metadata records.
//! - [`cache`]: the derived parent/child graph.
//! - [`engine`]: the façade: reader queries, writer mutations, the restack
//!   engine, PR submission status, snapshot restore.
//! - [`undo`]: filesystem-backed snapshots for undo.
//! - [`scope`]: inheritable branch scope tags.
//! - [`host`]: the code-review host interface (trait + test mock).
//!
//! # Example
//!
//! ```ignore
//! use stackit::{CancelToken, Engine, StackRange};
//!
//! let engine = Engine::open(std::path::Path::new("."))?;
//! engine.track("feature-1", "main")?;
//! let stack = engine.relative_stack("feature-1", StackRange::full())?;
//! engine.restack_branches(&engine.sort_topologically(&stack), &CancelToken::new())?;
//! ```
//!
//! # Concurrency
//!
//! One engine instance serializes all writes behind a reader-writer lock;
//! parallel threads may issue read queries freely. Long-running operations
//! take a [`CancelToken`] that aborts in-flight subprocesses.

pub mod cache;
pub mod cancel;
pub mod config;
pub mod engine;
pub mod error;
pub mod git;
pub mod host;
pub mod metadata;
pub mod scope;
pub mod undo;

pub use cancel::CancelToken;
pub use config::RepoConfig;
pub use engine::{
    BatchRestackResult, ContinueResult, DeletionStatus, Engine, RestackOutcome, RestackResult,
    StackRange, SubmissionStatus, SubmitAction,
};
pub use error::{Error, Result};
pub use git::{CheckoutMode, CommitFormat, CommitOpts, DiffStats, GitDriver, Oid, SubprocessGit};
pub use host::{HostClient, MockHost};
pub use metadata::{BranchMetadata, MetadataStore, PrInfo, PrState};
pub use scope::Scope;
pub use undo::{Snapshot, SnapshotStore};
