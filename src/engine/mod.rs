//! Engine façade: lifecycle, locking, and wiring of the stack components.
//!
//! One [`Engine`] instance owns the graph cache behind a reader-writer lock.
//! Every reader method acquires shared access; every writer/restack method
//! acquires exclusive access, so reads never observe a partially-applied
//! mutation. Methods suffixed `_internal` are lock-free and require the
//! caller to already hold the lock; they exist so writer methods can reuse
//! reader logic without re-entrant locking.
//!
//! The engine never prints; diagnostics go to the attached `slog` logger
//! (discarded by default) and errors are typed values.

mod reader;
mod restack;
mod submit;
mod writer;

pub use reader::{DeletionStatus, DepthFirst, StackRange};
pub use restack::{BatchConflict, BatchRestackResult, ContinueResult, Reparent, RestackOutcome, RestackResult};
pub use submit::{SubmissionStatus, SubmitAction};

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use slog::{info, o, warn, Logger};

use crate::cache::GraphCache;
use crate::cancel::CancelToken;
use crate::config::RepoConfig;
use crate::error::{Error, Result};
use crate::git::{CheckoutMode, GitDriver, ResetMode, SubprocessGit};
use crate::host::HostClient;
use crate::metadata::{MetadataStore, METADATA_REF_PREFIX};
use crate::undo::{OperationLock, Snapshot, SnapshotEntry, SnapshotStore};

/// Environment variable requesting the external demo engine.
pub const DEMO_ENV_VAR: &str = "STACKIT_DEMO";

/// The stack engine: a persistent in-process model of the branch graph,
/// layered over the VCS via metadata refs.
pub struct Engine {
    git: Arc<dyn GitDriver>,
    metadata: MetadataStore,
    snapshots: SnapshotStore,
    config: RepoConfig,
    host: Option<Arc<dyn HostClient>>,
    cache: RwLock<GraphCache>,
    runtime: tokio::runtime::Runtime,
    logger: Logger,
}

impl Engine {
    /// Open the engine for the repository containing `repo_root`.
    ///
    /// Builds the graph cache eagerly. Callers that want the demo engine
    /// should consult [`Engine::demo_requested`] before calling this; the
    /// factory itself always opens the real repository.
    pub fn open(repo_root: &Path) -> Result<Self> {
        Self::open_with_logger(repo_root, Logger::root(slog::Discard, o!()))
    }

    /// Open with an attached logger.
    pub fn open_with_logger(repo_root: &Path, logger: Logger) -> Result<Self> {
        let git: Arc<dyn GitDriver> =
            Arc::new(SubprocessGit::open(repo_root)?.with_logger(logger.new(o!("component" => "git"))));
        Self::from_driver(git, logger)
    }

    /// Wire the engine over an existing driver (demo or test-fake variants).
    pub fn from_driver(git: Arc<dyn GitDriver>, logger: Logger) -> Result<Self> {
        let config = RepoConfig::load(git.git_dir())?;
        let snapshots = SnapshotStore::new(git.git_dir(), config.undo_depth());
        let metadata =
            MetadataStore::new(Arc::clone(&git)).with_logger(logger.new(o!("component" => "metadata")));
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .build()
            .map_err(|source| Error::Runtime { source })?;

        let engine = Self {
            cache: RwLock::new(GraphCache::new(config.trunk_name())),
            git,
            metadata,
            snapshots,
            config,
            host: None,
            runtime,
            logger,
        };
        engine.rebuild()?;
        Ok(engine)
    }

    /// Whether the process was asked to run against the demo engine
    /// (`STACKIT_DEMO` non-empty). The demo engine itself lives outside this
    /// crate; this is the factory's only hook.
    pub fn demo_requested() -> bool {
        std::env::var(DEMO_ENV_VAR).map(|v| !v.is_empty()).unwrap_or(false)
    }

    /// Attach a host client. Only the PR status computer and high-level
    /// submit workflows consult it.
    pub fn set_host(&mut self, host: Arc<dyn HostClient>) {
        self.host = Some(host);
    }

    pub fn host(&self) -> Option<&Arc<dyn HostClient>> {
        self.host.as_ref()
    }

    /// The trunk branch name for this repository.
    pub fn trunk(&self) -> String {
        self.read_cache().trunk().to_string()
    }

    pub fn config(&self) -> &RepoConfig {
        &self.config
    }

    pub fn git(&self) -> &Arc<dyn GitDriver> {
        &self.git
    }

    pub(crate) fn metadata_store(&self) -> &MetadataStore {
        &self.metadata
    }

    pub(crate) fn logger(&self) -> &Logger {
        &self.logger
    }

    // =========================================================================
    // Cache lifecycle
    // =========================================================================

    pub(crate) fn read_cache(&self) -> RwLockReadGuard<'_, GraphCache> {
        self.cache.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn write_cache(&self) -> RwLockWriteGuard<'_, GraphCache> {
        self.cache.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Rebuild the whole cache from the VCS and metadata refs.
    pub fn rebuild(&self) -> Result<()> {
        let mut cache = self.write_cache();
        self.rebuild_locked(&mut cache, true)
    }

    /// Bulk rebuild under an already-held write lock.
    pub(crate) fn rebuild_locked(&self, cache: &mut GraphCache, refresh_current: bool) -> Result<()> {
        let branches = self.git.list_branches()?;
        let (records, errors) = self.runtime.block_on(self.metadata.batch_read(&branches));
        for (branch, err) in &errors {
            warn!(self.logger, "metadata read failed during rebuild";
                  "branch" => branch.as_str(), "error" => %err);
        }
        cache.rebuild(branches, &records);
        if refresh_current {
            cache.set_current_branch(self.git.current_branch()?);
        }
        Ok(())
    }

    /// Refresh the remote-SHA cache with one `ls-remote`. A remote listing
    /// failure leaves the cache empty and is not an error; cancellation and
    /// driver failures propagate.
    pub fn refresh_remote_shas(&self, cancel: &CancelToken) -> Result<()> {
        match self.git.fetch_remote_shas(cancel) {
            Ok(shas) => {
                self.write_cache().set_remote_shas(shas);
                Ok(())
            }
            Err(Error::RemoteFetch(message)) => {
                warn!(self.logger, "remote listing failed; remote-sha cache cleared";
                      "error" => message);
                self.write_cache().clear_remote_shas();
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    // =========================================================================
    // Snapshots (undo)
    // =========================================================================

    /// Record a restorable image of all branch tips, metadata-ref tips and
    /// the current branch. Called by command dispatch before any mutation.
    /// Returns the snapshot id.
    pub fn take_snapshot(&self, command: &str, args: &[String]) -> Result<String> {
        let _cache = self.read_cache(); // hold off writers for a consistent image

        let mut snapshot = Snapshot::new(command, args.to_vec());
        snapshot.current_branch = self.git.current_branch()?.unwrap_or_default();

        let branches = self.git.list_branches()?;
        let shas = self.git.batch_rev_parse(&branches)?;
        snapshot.branch_shas = shas
            .into_iter()
            .map(|(branch, oid)| (branch, oid.as_str().to_string()))
            .collect::<BTreeMap<_, _>>();

        snapshot.metadata_shas = self
            .git
            .list_refs(METADATA_REF_PREFIX)?
            .into_iter()
            .filter_map(|(name, oid)| {
                name.strip_prefix(METADATA_REF_PREFIX)
                    .map(|branch| (branch.to_string(), oid.as_str().to_string()))
            })
            .collect::<BTreeMap<_, _>>();

        let id = self.snapshots.save(&snapshot)?;
        info!(self.logger, "snapshot taken"; "id" => id.as_str(), "command" => command);
        Ok(id)
    }

    /// All snapshots, newest first.
    pub fn list_snapshots(&self) -> Result<Vec<SnapshotEntry>> {
        self.snapshots.list()
    }

    /// Load one snapshot by id.
    pub fn load_snapshot(&self, id: &str) -> Result<Snapshot> {
        self.snapshots.load(id)
    }

    /// Restore the repository to a snapshot: branch tips, metadata refs and
    /// the checked-out branch. Branches created after the snapshot are
    /// deleted; metadata refs not in the snapshot are removed.
    pub fn restore_snapshot(&self, id: &str) -> Result<()> {
        let _lock = OperationLock::acquire(self.git.git_dir())?;
        let mut cache = self.write_cache();
        let snapshot = self.snapshots.load(id)?;
        let trunk = cache.trunk().to_string();

        // 1. Delete branches that did not exist at snapshot time.
        let mut current = self.git.current_branch()?;
        for branch in self.git.list_branches()? {
            if snapshot.branch_shas.contains_key(&branch) || branch == trunk {
                continue;
            }
            if current.as_deref() == Some(branch.as_str()) {
                self.git.checkout(&trunk, CheckoutMode::Force)?;
                current = Some(trunk.clone());
            }
            self.git.delete_branch(&branch)?;
        }

        // 2. Restore branch tips, creating refs that went missing.
        let annotation = format!("stackit: restore snapshot {id}");
        for (branch, sha) in &snapshot.branch_shas {
            let oid = crate::git::Oid::parse(sha)?;
            self.git.update_ref(&format!("refs/heads/{branch}"), &oid, &annotation)?;
        }

        // 3. Restore metadata refs.
        for (branch, sha) in &snapshot.metadata_shas {
            let oid = crate::git::Oid::parse(sha)?;
            self.git
                .update_ref(&MetadataStore::metadata_ref(branch), &oid, &annotation)?;
        }

        // 4. Drop metadata refs that did not exist at snapshot time.
        for (name, _) in self.git.list_refs(METADATA_REF_PREFIX)? {
            if let Some(branch) = name.strip_prefix(METADATA_REF_PREFIX) {
                if !snapshot.metadata_shas.contains_key(branch) {
                    self.git.delete_ref(&name)?;
                }
            }
        }

        // 5. Rebuild the cache from restored state.
        self.rebuild_locked(&mut cache, false)?;

        // 6. Return to the snapshot's branch (trunk when it is gone), forcing
        // the working tree back in sync with the restored tip.
        let target = if !snapshot.current_branch.is_empty()
            && self.git.branch_exists(&snapshot.current_branch)?
        {
            snapshot.current_branch.clone()
        } else {
            trunk
        };
        if self.git.current_branch()?.as_deref() == Some(target.as_str()) {
            self.git.reset("HEAD", ResetMode::Hard)?;
        } else {
            self.git.checkout(&target, CheckoutMode::Force)?;
        }
        cache.set_current_branch(Some(target));

        info!(self.logger, "snapshot restored"; "id" => id);
        Ok(())
    }

    /// Run a future on the engine's worker runtime.
    pub(crate) fn block_on<F: std::future::Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("workdir", &self.git.workdir())
            .field("trunk", &self.read_cache().trunk())
            .finish()
    }
}
