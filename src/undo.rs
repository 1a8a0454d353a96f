//! Snapshot storage backing undo.
//!
//! Every mutating command records a restorable image of the repository's
//! stack state: all branch tips, all metadata-ref tips, and the current
//! branch. Snapshots are JSON files under `.git/stackit/undo/` named
//! `<YYYYMMDDHHMMSS.mmm>_<command>.json`, so lexical filename order matches
//! timestamp order and pruning the oldest is a string sort. JSON is chosen
//! for human-debuggability.
//!
//! This module owns the files; capturing and restoring repository state is
//! the engine's job (it needs the VCS driver and the cache lock).

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Directory under the git dir holding engine state.
const STACKIT_DIR: &str = "stackit";

/// Subdirectory holding snapshot files.
const UNDO_DIR: &str = "undo";

/// Lock file guarding compound operations (snapshot restore).
const LOCK_FILE: &str = "operation.lock";

/// A restorable image of the stack state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    /// When the snapshot was taken (RFC3339).
    pub timestamp: DateTime<Utc>,
    /// The command that was about to mutate state.
    pub command: String,
    /// Its arguments, for display.
    pub args: Vec<String>,
    /// Branch checked out when the snapshot was taken. Empty when detached.
    pub current_branch: String,
    /// Branch name -> tip revision.
    pub branch_shas: BTreeMap<String, String>,
    /// Branch name -> metadata-ref revision.
    pub metadata_shas: BTreeMap<String, String>,
}

impl Snapshot {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            command: command.into(),
            args,
            current_branch: String::new(),
            branch_shas: BTreeMap::new(),
            metadata_shas: BTreeMap::new(),
        }
    }

    /// File stem for this snapshot: `<YYYYMMDDHHMMSS.mmm>_<command>`.
    fn file_stem(&self) -> String {
        format!(
            "{}_{}",
            self.timestamp.format("%Y%m%d%H%M%S%.3f"),
            sanitize_command(&self.command)
        )
    }
}

/// A listed snapshot with its id (the file stem).
#[derive(Debug, Clone)]
pub struct SnapshotEntry {
    pub id: String,
    pub snapshot: Snapshot,
}

/// Keep file names flat and shell-friendly.
fn sanitize_command(command: &str) -> String {
    command
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect()
}

/// Filesystem-backed ring buffer of snapshots.
pub struct SnapshotStore {
    dir: PathBuf,
    depth: usize,
}

impl SnapshotStore {
    /// Open the store for a repository. `depth` bounds how many snapshots are
    /// retained (`undo.stackDepth`).
    pub fn new(git_dir: &Path, depth: usize) -> Self {
        Self {
            dir: git_dir.join(STACKIT_DIR).join(UNDO_DIR),
            depth,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist a snapshot and prune the oldest files beyond the configured
    /// depth. Returns the snapshot id.
    pub fn save(&self, snapshot: &Snapshot) -> Result<String> {
        fs::create_dir_all(&self.dir).map_err(|source| Error::SnapshotIo {
            path: self.dir.clone(),
            source,
        })?;

        // Two snapshots of the same command within one millisecond would
        // share a file name; bump until free.
        let mut snapshot = snapshot.clone();
        let mut stem = snapshot.file_stem();
        while self.dir.join(format!("{stem}.json")).exists() {
            snapshot.timestamp += chrono::Duration::milliseconds(1);
            stem = snapshot.file_stem();
        }
        let snapshot = &snapshot;
        let path = self.dir.join(format!("{stem}.json"));
        let content = serde_json::to_string_pretty(snapshot).map_err(|source| Error::SnapshotIo {
            path: path.clone(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, source),
        })?;
        fs::write(&path, content).map_err(|source| Error::SnapshotIo {
            path: path.clone(),
            source,
        })?;

        self.prune()?;
        Ok(stem)
    }

    /// Delete the lexicographically smallest files until within the depth.
    /// Lexical order matches timestamp order by filename construction.
    fn prune(&self) -> Result<()> {
        let mut names = self.file_names()?;
        if names.len() <= self.depth {
            return Ok(());
        }
        names.sort();
        let excess = names.len() - self.depth;
        for name in names.into_iter().take(excess) {
            let path = self.dir.join(name);
            fs::remove_file(&path).map_err(|source| Error::SnapshotIo { path, source })?;
        }
        Ok(())
    }

    /// All snapshots, newest first (timestamp desc, filename desc tie-break).
    pub fn list(&self) -> Result<Vec<SnapshotEntry>> {
        let mut entries = Vec::new();
        for name in self.file_names()? {
            let id = name.trim_end_matches(".json").to_string();
            match self.load(&id) {
                Ok(snapshot) => entries.push(SnapshotEntry { id, snapshot }),
                // Skip unreadable files rather than wedging the listing.
                Err(_) => continue,
            }
        }
        entries.sort_by(|a, b| {
            b.snapshot
                .timestamp
                .cmp(&a.snapshot.timestamp)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(entries)
    }

    /// Load one snapshot by id (file stem, `.json` suffix optional).
    pub fn load(&self, id: &str) -> Result<Snapshot> {
        let stem = id.trim_end_matches(".json");
        let path = self.dir.join(format!("{stem}.json"));
        if !path.exists() {
            return Err(Error::SnapshotNotFound(stem.to_string()));
        }
        let file = File::open(&path).map_err(|source| Error::SnapshotIo {
            path: path.clone(),
            source,
        })?;
        serde_json::from_reader(std::io::BufReader::new(file)).map_err(|source| Error::SnapshotIo {
            path,
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, source),
        })
    }

    /// The most recent snapshot, if any.
    pub fn latest(&self) -> Result<Option<SnapshotEntry>> {
        Ok(self.list()?.into_iter().next())
    }

    fn file_names(&self) -> Result<Vec<String>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let read_dir = fs::read_dir(&self.dir).map_err(|source| Error::SnapshotIo {
            path: self.dir.clone(),
            source,
        })?;
        let mut names = Vec::new();
        for entry in read_dir {
            let entry = entry.map_err(|source| Error::SnapshotIo {
                path: self.dir.clone(),
                source,
            })?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(".json") {
                names.push(name);
            }
        }
        Ok(names)
    }
}

/// Exclusive cross-process lock for compound operations (snapshot restore,
/// multi-ref rewrites). Released on drop.
pub struct OperationLock {
    file: File,
    path: PathBuf,
}

impl OperationLock {
    /// Acquire the lock, failing fast with `LockBusy` if another process
    /// holds it.
    pub fn acquire(git_dir: &Path) -> Result<Self> {
        let dir = git_dir.join(STACKIT_DIR);
        fs::create_dir_all(&dir).map_err(|source| Error::SnapshotIo {
            path: dir.clone(),
            source,
        })?;
        let path = dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|source| Error::SnapshotIo {
                path: path.clone(),
                source,
            })?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Self { file, path }),
            Err(_) => Err(Error::LockBusy { path }),
        }
    }
}

impl Drop for OperationLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
        let _ = fs::remove_file(&self.path);
    }
}
