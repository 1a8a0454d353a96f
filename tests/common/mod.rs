use anyhow::Result;
use std::fs;
use std::path::Path;
use std::process::{Command, Stdio};

use stackit::Engine;

/// Run a git command in a directory, asserting success.
#[allow(dead_code)]
pub fn git(dir: &Path, args: &[&str]) {
    let status = Command::new("git")
        .args(args)
        .current_dir(dir)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .expect("failed to spawn git");
    assert!(status.success(), "git {args:?} failed in {dir:?}");
}

/// Run a git command and return trimmed stdout.
#[allow(dead_code)]
pub fn git_stdout(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("failed to spawn git");
    assert!(output.status.success(), "git {args:?} failed in {dir:?}");
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Initialize a test repository with one commit on `main`.
#[allow(dead_code)]
pub fn init_test_repo(dir: &Path) -> Result<()> {
    git(dir, &["init", "-b", "main"]);
    git(dir, &["config", "user.name", "Test User"]);
    git(dir, &["config", "user.email", "test@example.com"]);
    // Prevent editors from blocking tests (rebase --continue, commit --amend).
    git(dir, &["config", "core.editor", "true"]);
    git(dir, &["config", "sequence.editor", "true"]);

    fs::write(dir.join("README.md"), "# Test Repo\n")?;
    git(dir, &["add", "."]);
    git(dir, &["commit", "-m", "Initial commit"]);
    Ok(())
}

/// Create a file and commit it.
#[allow(dead_code)]
pub fn commit_file(dir: &Path, filename: &str, content: &str, message: &str) -> Result<()> {
    fs::write(dir.join(filename), content)?;
    git(dir, &["add", filename]);
    git(dir, &["commit", "-m", message]);
    Ok(())
}

/// Create a branch off a base, add one commit, and return to the base.
#[allow(dead_code)]
pub fn branch_with_commit(dir: &Path, branch: &str, base: &str, filename: &str) -> Result<()> {
    git(dir, &["checkout", "-b", branch, base]);
    commit_file(dir, filename, &format!("content of {filename}\n"), &format!("add {filename}"))?;
    git(dir, &["checkout", base]);
    Ok(())
}

/// Current tip of a revision.
#[allow(dead_code)]
pub fn rev(dir: &Path, rev: &str) -> String {
    git_stdout(dir, &["rev-parse", rev])
}

/// Open an engine over a test repo, with a terminal logger so failing tests
/// show what the engine did.
#[allow(dead_code)]
pub fn open_engine(dir: &Path) -> Result<Engine> {
    Ok(Engine::open_with_logger(dir, test_logger())?)
}

/// A logger that writes to the test's captured stderr.
#[allow(dead_code)]
pub fn test_logger() -> slog::Logger {
    use slog::Drain;
    let decorator = slog_term::PlainSyncDecorator::new(slog_term::TestStdoutWriter);
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    slog::Logger::root(drain, slog::o!())
}
