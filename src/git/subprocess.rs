//! Subprocess-based implementation of [`GitDriver`].
//!
//! Every operation shells out to the `git` CLI, which works on any repository
//! format and properly uses credential helpers for remote operations. Output
//! is captured and attached to errors. Remote and rebase operations poll the
//! cancellation token and kill the child process on cancel.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::time::Duration;

use slog::{debug, o, Logger};

use super::{
    CheckoutMode, CommitFormat, CommitOpts, DiffStats, GitDriver, Oid, PushMode, RebaseOutcome,
    ResetMode, WorktreeInfo,
};
use crate::cancel::CancelToken;
use crate::error::{Error, Result};

/// Default remote name when none is configured.
const DEFAULT_REMOTE: &str = "origin";

/// Poll interval while waiting on a cancellable subprocess.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Real driver: all operations are `git` subprocess calls.
pub struct SubprocessGit {
    git_dir: PathBuf,
    workdir: PathBuf,
    remote: String,
    logger: Logger,
}

impl SubprocessGit {
    /// Open the repository containing `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let git_dir = rev_parse_path(path, "--git-dir")?;
        let workdir = rev_parse_path(path, "--show-toplevel")?;
        Ok(Self {
            git_dir,
            workdir,
            remote: DEFAULT_REMOTE.to_string(),
            logger: Logger::root(slog::Discard, o!()),
        })
    }

    /// Use a different remote name.
    pub fn with_remote(mut self, remote: impl Into<String>) -> Self {
        self.remote = remote.into();
        self
    }

    /// Attach a logger; git subcommands are logged at debug level.
    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    /// Run a git command, capturing output. Does not inspect the exit status.
    fn run(&self, args: &[&str]) -> Result<Output> {
        debug!(self.logger, "git"; "args" => args.join(" "));
        let owned: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .map_err(|e| Error::git_spawn(args.first().copied().unwrap_or("git"), &owned, e))
    }

    /// Run a git command, requiring success.
    fn run_ok(&self, args: &[&str]) -> Result<()> {
        let output = self.run(args)?;
        if !output.status.success() {
            return Err(self.command_error(args, &output));
        }
        Ok(())
    }

    /// Run a git command, requiring success, returning trimmed stdout.
    fn run_stdout(&self, args: &[&str]) -> Result<String> {
        let output = self.run(args)?;
        if !output.status.success() {
            return Err(self.command_error(args, &output));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Run a long-lived git command, killing the child if the token fires.
    ///
    /// Cancellation before spawn is a clean `Cancelled` exit. Cancellation
    /// mid-command kills the child and returns `Cancelled`; for rebase this
    /// leaves the VCS in its paused state, which the caller recovers from.
    fn run_cancellable(&self, args: &[&str], cancel: &CancelToken) -> Result<Output> {
        cancel.check()?;
        debug!(self.logger, "git"; "args" => args.join(" "));
        let owned: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        let command = args.first().copied().unwrap_or("git");

        let mut child = Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .env("GIT_EDITOR", "true")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::git_spawn(command, &owned, e))?;

        // Drain both pipes on worker threads so a chatty subcommand cannot
        // fill the pipe buffer and deadlock the poll loop.
        let stdout_thread = child.stdout.take().map(|mut pipe| {
            std::thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = std::io::Read::read_to_end(&mut pipe, &mut buf);
                buf
            })
        });
        let stderr_thread = child.stderr.take().map(|mut pipe| {
            std::thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = std::io::Read::read_to_end(&mut pipe, &mut buf);
                buf
            })
        });

        let status = loop {
            if cancel.is_cancelled() {
                let _ = child.kill();
                let _ = child.wait();
                return Err(Error::Cancelled);
            }
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => std::thread::sleep(CANCEL_POLL_INTERVAL),
                Err(e) => return Err(Error::git_spawn(command, &owned, e)),
            }
        };

        let stdout = stdout_thread
            .map(|t| t.join().unwrap_or_default())
            .unwrap_or_default();
        let stderr = stderr_thread
            .map(|t| t.join().unwrap_or_default())
            .unwrap_or_default();
        Ok(Output { status, stdout, stderr })
    }

    fn command_error(&self, args: &[&str], output: &Output) -> Error {
        let owned: Vec<String> = args.iter().skip(1).map(|s| s.to_string()).collect();
        Error::git_command(
            args.first().copied().unwrap_or("git"),
            &owned,
            &output.stdout,
            &output.stderr,
        )
    }
}

/// Resolve a repository path via `git rev-parse`.
fn rev_parse_path(path: &Path, flag: &str) -> Result<PathBuf> {
    let output = Command::new("git")
        .args(["rev-parse", flag])
        .current_dir(path)
        .output()
        .map_err(|e| Error::git_spawn("rev-parse", &[flag.to_string()], e))?;

    if !output.status.success() {
        return Err(Error::git_command(
            "rev-parse",
            &[flag.to_string()],
            &output.stdout,
            &output.stderr,
        ));
    }

    let raw = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let resolved = if Path::new(&raw).is_absolute() {
        PathBuf::from(raw)
    } else {
        path.join(raw)
    };
    Ok(resolved)
}

impl GitDriver for SubprocessGit {
    fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    fn workdir(&self) -> &Path {
        &self.workdir
    }

    // =========================================================================
    // Repository & refs
    // =========================================================================

    fn list_branches(&self) -> Result<Vec<String>> {
        let out = self.run_stdout(&["for-each-ref", "--format=%(refname:short)", "refs/heads/"])?;
        Ok(out.lines().filter(|l| !l.is_empty()).map(str::to_string).collect())
    }

    fn branch_exists(&self, name: &str) -> Result<bool> {
        let refname = format!("refs/heads/{name}");
        let output = self.run(&["show-ref", "--verify", "--quiet", &refname])?;
        Ok(output.status.success())
    }

    fn get_ref(&self, name: &str) -> Result<Option<Oid>> {
        let output = self.run(&["rev-parse", "--verify", "--quiet", name])?;
        if !output.status.success() {
            return Ok(None);
        }
        let sha = String::from_utf8_lossy(&output.stdout);
        let sha = sha.trim();
        if sha.is_empty() {
            Ok(None)
        } else {
            Ok(Some(Oid::from_git_output(sha)))
        }
    }

    fn update_ref(&self, name: &str, target: &Oid, log_message: &str) -> Result<()> {
        self.run_ok(&["update-ref", "-m", log_message, name, target.as_str()])
    }

    fn delete_ref(&self, name: &str) -> Result<()> {
        let output = self.run(&["update-ref", "-d", name])?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            // Deleting an absent ref is a no-op.
            if !stderr.contains("not exist") && !stderr.contains("not found") && !stderr.contains("No such ref") {
                return Err(self.command_error(&["update-ref", "-d", name], &output));
            }
        }
        Ok(())
    }

    fn list_refs(&self, prefix: &str) -> Result<Vec<(String, Oid)>> {
        let output = self.run(&["for-each-ref", "--format=%(objectname) %(refname)", prefix])?;
        if !output.status.success() {
            return Ok(Vec::new());
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut refs = Vec::new();
        for line in stdout.lines() {
            if let Some((sha, name)) = line.split_once(' ') {
                refs.push((name.to_string(), Oid::from_git_output(sha)));
            }
        }
        Ok(refs)
    }

    fn create_blob(&self, content: &[u8]) -> Result<Oid> {
        let args = ["hash-object", "-w", "--stdin"];
        let owned: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        debug!(self.logger, "git"; "args" => args.join(" "));

        let mut child = Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::git_spawn("hash-object", &owned, e))?;

        if let Some(stdin) = child.stdin.as_mut() {
            stdin
                .write_all(content)
                .map_err(|e| Error::git_spawn("hash-object", &owned, e))?;
        }

        let output = child
            .wait_with_output()
            .map_err(|e| Error::git_spawn("hash-object", &owned, e))?;

        if !output.status.success() {
            return Err(Error::git_command("hash-object", &owned, &output.stdout, &output.stderr));
        }

        Ok(Oid::from_git_output(&String::from_utf8_lossy(&output.stdout)))
    }

    fn read_blob(&self, oid: &Oid) -> Result<Vec<u8>> {
        let output = self.run(&["cat-file", "blob", oid.as_str()])?;
        if !output.status.success() {
            return Err(self.command_error(&["cat-file", "blob", oid.as_str()], &output));
        }
        Ok(output.stdout)
    }

    fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool> {
        let output = self.run(&["merge-base", "--is-ancestor", ancestor, descendant])?;
        match output.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(self.command_error(&["merge-base", "--is-ancestor", ancestor, descendant], &output)),
        }
    }

    fn merge_base(&self, a: &str, b: &str) -> Result<Oid> {
        let sha = self.run_stdout(&["merge-base", a, b])?;
        Ok(Oid::from_git_output(&sha))
    }

    fn rev_parse(&self, rev: &str) -> Result<Oid> {
        let sha = self.run_stdout(&["rev-parse", "--verify", rev])?;
        Ok(Oid::from_git_output(&sha))
    }

    fn batch_rev_parse(&self, revs: &[String]) -> Result<HashMap<String, Oid>> {
        if revs.is_empty() {
            return Ok(HashMap::new());
        }

        // Fast path: one subprocess resolving everything. Output lines map
        // one-to-one to the inputs.
        let mut args = vec!["rev-parse"];
        args.extend(revs.iter().map(String::as_str));
        let output = self.run(&args)?;
        if output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let map = revs
                .iter()
                .zip(stdout.lines())
                .map(|(rev, sha)| (rev.clone(), Oid::from_git_output(sha)))
                .collect();
            return Ok(map);
        }

        // Slow path: at least one rev is unresolvable; resolve individually
        // and omit failures.
        let mut map = HashMap::new();
        for rev in revs {
            if let Some(oid) = self.get_ref(rev)? {
                map.insert(rev.clone(), oid);
            }
        }
        Ok(map)
    }

    fn rev_list(&self, rev: &str, limit: Option<usize>) -> Result<Vec<Oid>> {
        let count;
        let mut args = vec!["rev-list"];
        if let Some(n) = limit {
            count = format!("--max-count={n}");
            args.push(&count);
        }
        args.push(rev);
        let out = self.run_stdout(&args)?;
        Ok(out.lines().filter(|l| !l.is_empty()).map(Oid::from_git_output).collect())
    }

    // =========================================================================
    // Working tree
    // =========================================================================

    fn current_branch(&self) -> Result<Option<String>> {
        let output = self.run(&["symbolic-ref", "--short", "-q", "HEAD"])?;
        if !output.status.success() {
            // Exit 1 with no output means detached HEAD.
            return Ok(None);
        }
        let name = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if name.is_empty() {
            Ok(None)
        } else {
            Ok(Some(name))
        }
    }

    fn checkout(&self, target: &str, mode: CheckoutMode) -> Result<()> {
        match mode {
            CheckoutMode::Normal => self.run_ok(&["checkout", target]),
            CheckoutMode::Detached => self.run_ok(&["checkout", "--detach", target]),
            CheckoutMode::Force => self.run_ok(&["checkout", "-f", target]),
        }
    }

    fn create_and_checkout(&self, name: &str, at: Option<&str>) -> Result<()> {
        match at {
            Some(rev) => self.run_ok(&["checkout", "-b", name, rev]),
            None => self.run_ok(&["checkout", "-b", name]),
        }
    }

    fn delete_branch(&self, name: &str) -> Result<()> {
        self.run_ok(&["branch", "-D", name])
    }

    fn rename_branch(&self, old: &str, new: &str) -> Result<()> {
        self.run_ok(&["branch", "-m", old, new])
    }

    fn reset(&self, target: &str, mode: ResetMode) -> Result<()> {
        match mode {
            ResetMode::Hard => self.run_ok(&["reset", "--hard", target]),
            ResetMode::Soft => self.run_ok(&["reset", "--soft", target]),
        }
    }

    fn commit(&self, opts: &CommitOpts) -> Result<()> {
        if opts.stage_all {
            self.stage_all()?;
        }
        let mut args = vec!["commit"];
        if opts.amend {
            args.push("--amend");
        }
        if opts.no_edit {
            args.push("--no-edit");
        }
        if let Some(message) = opts.message.as_deref() {
            args.push("-m");
            args.push(message);
        }
        self.run_ok(&args)
    }

    fn stage_all(&self) -> Result<()> {
        self.run_ok(&["add", "-A"])
    }

    fn stash_push(&self, message: &str) -> Result<bool> {
        if !self.has_uncommitted_changes()? {
            return Ok(false);
        }
        self.run_ok(&["stash", "push", "--include-untracked", "-m", message])?;
        Ok(true)
    }

    fn stash_pop(&self) -> Result<()> {
        self.run_ok(&["stash", "pop"])
    }

    fn has_uncommitted_changes(&self) -> Result<bool> {
        let out = self.run_stdout(&["status", "--porcelain"])?;
        Ok(!out.is_empty())
    }

    fn worktree_add(&self, path: &Path, branch: &str) -> Result<()> {
        let path_str = path.to_string_lossy();
        self.run_ok(&["worktree", "add", &path_str, branch])
    }

    fn worktree_remove(&self, path: &Path, force: bool) -> Result<()> {
        let path_str = path.to_string_lossy();
        if force {
            self.run_ok(&["worktree", "remove", "--force", &path_str])
        } else {
            self.run_ok(&["worktree", "remove", &path_str])
        }
    }

    fn worktree_list(&self) -> Result<Vec<WorktreeInfo>> {
        let out = self.run_stdout(&["worktree", "list", "--porcelain"])?;
        let mut worktrees = Vec::new();
        let mut path: Option<PathBuf> = None;
        let mut branch: Option<String> = None;

        for line in out.lines().chain(std::iter::once("")) {
            if line.is_empty() {
                if let Some(p) = path.take() {
                    let is_current = p == self.workdir;
                    worktrees.push(WorktreeInfo {
                        path: p,
                        branch: branch.take(),
                        is_current,
                    });
                }
                continue;
            }
            if let Some(p) = line.strip_prefix("worktree ") {
                path = Some(PathBuf::from(p));
            } else if let Some(b) = line.strip_prefix("branch ") {
                branch = Some(b.strip_prefix("refs/heads/").unwrap_or(b).to_string());
            }
        }

        Ok(worktrees)
    }

    // =========================================================================
    // Remote
    // =========================================================================

    fn remote_name(&self) -> &str {
        &self.remote
    }

    fn fetch_remote_shas(&self, cancel: &CancelToken) -> Result<HashMap<String, Oid>> {
        let output = self.run_cancellable(&["ls-remote", "--heads", &self.remote], cancel)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::RemoteFetch(stderr.trim().to_string()));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut shas = HashMap::new();
        for line in stdout.lines() {
            // Format: "<sha>\trefs/heads/<branch>"
            if let Some((sha, refname)) = line.split_once('\t') {
                if let Some(branch) = refname.strip_prefix("refs/heads/") {
                    shas.insert(branch.to_string(), Oid::from_git_output(sha));
                }
            }
        }
        Ok(shas)
    }

    fn push(&self, branch: &str, mode: PushMode, cancel: &CancelToken) -> Result<()> {
        let force_arg = match mode {
            PushMode::Force => "--force",
            PushMode::ForceWithLease => "--force-with-lease",
        };
        let args = ["push", "--quiet", self.remote.as_str(), branch, force_arg];
        let output = self.run_cancellable(&args, cancel)?;
        if !output.status.success() {
            return Err(self.command_error(&args, &output));
        }
        Ok(())
    }

    fn pull(&self, branch: &str, cancel: &CancelToken) -> Result<()> {
        let args = ["pull", "--ff-only", self.remote.as_str(), branch];
        let output = self.run_cancellable(&args, cancel)?;
        if !output.status.success() {
            return Err(self.command_error(&args, &output));
        }
        Ok(())
    }

    fn remote_revision_of(&self, branch: &str) -> Result<Option<Oid>> {
        self.get_ref(&format!("refs/remotes/{}/{}", self.remote, branch))
    }

    // =========================================================================
    // Stack-supporting
    // =========================================================================

    fn rebase(
        &self,
        branch: &str,
        new_upstream: &str,
        old_upstream: &str,
        cancel: &CancelToken,
    ) -> Result<RebaseOutcome> {
        let args = ["rebase", "--onto", new_upstream, old_upstream, branch];
        let output = self.run_cancellable(&args, cancel)?;

        if output.status.success() {
            return Ok(RebaseOutcome::Done);
        }
        if self.rebase_in_progress()? {
            return Ok(RebaseOutcome::Conflict);
        }
        Err(self.command_error(&args, &output))
    }

    fn rebase_continue(&self, cancel: &CancelToken) -> Result<RebaseOutcome> {
        let args = ["rebase", "--continue"];
        let output = self.run_cancellable(&args, cancel)?;

        if output.status.success() {
            return Ok(RebaseOutcome::Done);
        }
        if self.rebase_in_progress()? {
            return Ok(RebaseOutcome::Conflict);
        }
        Err(self.command_error(&args, &output))
    }

    fn rebase_in_progress(&self) -> Result<bool> {
        Ok(self.git_dir.join("rebase-merge").exists() || self.git_dir.join("rebase-apply").exists())
    }

    fn rebasing_branch(&self) -> Result<Option<String>> {
        for state_dir in ["rebase-merge", "rebase-apply"] {
            let path = self.git_dir.join(state_dir).join("head-name");
            if let Ok(content) = std::fs::read_to_string(&path) {
                let name = content.trim();
                let name = name.strip_prefix("refs/heads/").unwrap_or(name);
                if !name.is_empty() {
                    return Ok(Some(name.to_string()));
                }
            }
        }
        Ok(None)
    }

    fn commit_range(&self, old: &str, new: &str, format: CommitFormat) -> Result<Vec<String>> {
        let range = format!("{old}..{new}");
        match format {
            CommitFormat::Sha => {
                let out = self.run_stdout(&["log", "--format=%H", &range])?;
                Ok(out.lines().filter(|l| !l.is_empty()).map(str::to_string).collect())
            }
            CommitFormat::Oneline => {
                let out = self.run_stdout(&["log", "--format=%h %s", &range])?;
                Ok(out.lines().filter(|l| !l.is_empty()).map(str::to_string).collect())
            }
            CommitFormat::Subject => {
                let out = self.run_stdout(&["log", "--format=%s", &range])?;
                Ok(out.lines().filter(|l| !l.is_empty()).map(str::to_string).collect())
            }
            CommitFormat::Message => {
                // NUL separators: full messages span lines.
                let args = ["log", "-z", "--format=%B", range.as_str()];
                let output = self.run(&args)?;
                if !output.status.success() {
                    return Err(self.command_error(&args, &output));
                }
                let stdout = String::from_utf8_lossy(&output.stdout);
                Ok(stdout
                    .split('\0')
                    .map(str::trim)
                    .filter(|m| !m.is_empty())
                    .map(str::to_string)
                    .collect())
            }
        }
    }

    fn diff_stats(&self, base: &str, branch: &str) -> Result<DiffStats> {
        let range = format!("{base}..{branch}");
        let out = self.run_stdout(&["diff", "--numstat", &range])?;
        let mut stats = DiffStats::default();
        for line in out.lines() {
            let mut cols = line.split_whitespace();
            // Binary files report "-" in both columns; count them as zero.
            if let (Some(added), Some(deleted)) = (cols.next(), cols.next()) {
                stats.added += added.parse::<usize>().unwrap_or(0);
                stats.deleted += deleted.parse::<usize>().unwrap_or(0);
            }
        }
        Ok(stats)
    }

    fn diff_is_empty(&self, base: &str, branch: &str) -> Result<bool> {
        let args = ["diff", "--quiet", base, branch];
        let output = self.run(&args)?;
        match output.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(self.command_error(&args, &output)),
        }
    }
}
