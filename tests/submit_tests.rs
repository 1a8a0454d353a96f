//! Integration tests for the PR status computer and host-record syncing.

mod common;

use anyhow::Result;
use std::sync::Arc;
use tempfile::tempdir;

use common::{branch_with_commit, git, init_test_repo, open_engine};
use serial_test::serial;
use stackit::engine::SubmitAction;
use stackit::host::{CreatePrRequest, MockHost};
use stackit::metadata::{PrInfo, PrState};
use stackit::scope::Scope;
use stackit::{CancelToken, Engine, HostClient};

#[test]
fn test_no_pr_record_means_create() -> Result<()> {
    let dir = tempdir()?;
    init_test_repo(dir.path())?;
    branch_with_commit(dir.path(), "feature", "main", "f.txt")?;
    let engine = open_engine(dir.path())?;
    engine.track("feature", "main")?;

    let status = engine.submission_status("feature")?;
    assert_eq!(status.action, SubmitAction::Create);
    assert!(status.needs_update);
    assert!(status.pr_number.is_none());
    Ok(())
}

#[test]
fn test_base_change_forces_update() -> Result<()> {
    let dir = tempdir()?;
    init_test_repo(dir.path())?;
    branch_with_commit(dir.path(), "a", "main", "a.txt")?;
    branch_with_commit(dir.path(), "feature", "a", "f.txt")?;
    let engine = open_engine(dir.path())?;
    engine.track("a", "main")?;
    engine.track("feature", "a")?;

    // Stored PR still says the base is main, but the parent is a.
    engine.set_pr_info(
        "feature",
        PrInfo {
            number: Some(9),
            title: Some("Add feature".to_string()),
            base: Some("main".to_string()),
            state: Some(PrState::Open),
            ..Default::default()
        },
    )?;

    let status = engine.submission_status("feature")?;
    assert_eq!(status.action, SubmitAction::Update);
    assert!(status.needs_update);
    assert!(status.reason.contains("base"), "reason: {}", status.reason);
    assert_eq!(status.pr_number, Some(9));
    Ok(())
}

#[test]
fn test_scope_prefix_drives_title_update() -> Result<()> {
    let dir = tempdir()?;
    init_test_repo(dir.path())?;
    branch_with_commit(dir.path(), "feature", "main", "f.txt")?;
    let engine = open_engine(dir.path())?;
    engine.track("feature", "main")?;
    engine.set_scope("feature", &Scope::parse("api"))?;

    // Matching prefix (case-insensitive) and matching base: only the remote
    // comparison can force an update, and there is no remote here, so the
    // branch reads as out of sync.
    engine.set_pr_info(
        "feature",
        PrInfo {
            number: Some(3),
            title: Some("[API] Add feature".to_string()),
            base: Some("main".to_string()),
            state: Some(PrState::Open),
            ..Default::default()
        },
    )?;
    let status = engine.submission_status("feature")?;
    assert!(
        !status.reason.contains("prefix"),
        "matching prefix must not be flagged: {}",
        status.reason
    );

    // A different prefix must be flagged.
    engine.set_pr_info(
        "feature",
        PrInfo {
            number: Some(3),
            title: Some("[db] Add feature".to_string()),
            base: Some("main".to_string()),
            state: Some(PrState::Open),
            ..Default::default()
        },
    )?;
    let status = engine.submission_status("feature")?;
    assert!(status.needs_update);
    assert!(status.reason.contains("prefix"), "reason: {}", status.reason);
    Ok(())
}

#[test]
fn test_merged_pr_is_skipped() -> Result<()> {
    let dir = tempdir()?;
    init_test_repo(dir.path())?;
    branch_with_commit(dir.path(), "feature", "main", "f.txt")?;
    let engine = open_engine(dir.path())?;
    engine.track("feature", "main")?;
    engine.set_pr_info(
        "feature",
        PrInfo {
            number: Some(5),
            state: Some(PrState::Merged),
            ..Default::default()
        },
    )?;

    let status = engine.submission_status("feature")?;
    assert_eq!(status.action, SubmitAction::Skip);
    assert!(!status.needs_update);
    Ok(())
}

#[test]
fn test_sync_pr_record_pulls_from_host() -> Result<()> {
    let dir = tempdir()?;
    init_test_repo(dir.path())?;
    branch_with_commit(dir.path(), "feature", "main", "f.txt")?;
    let mut engine = open_engine(dir.path())?;
    engine.track("feature", "main")?;

    let host = Arc::new(MockHost::new());
    host.create_pr(&CreatePrRequest {
        branch: "feature".to_string(),
        base: "main".to_string(),
        title: "Add feature".to_string(),
        body: String::new(),
        draft: true,
    })?;
    engine.set_host(host);

    let fetched = engine.sync_pr_record("feature", &CancelToken::new())?;
    let pr = fetched.expect("host has a PR for feature");
    assert_eq!(pr.number, Some(1));
    assert_eq!(pr.is_draft, Some(true));

    let record = engine.branch_metadata("feature")?;
    assert_eq!(record.pr_info.unwrap().number, Some(1));
    Ok(())
}

#[test]
fn test_branch_matches_remote_without_remote_is_false() -> Result<()> {
    let dir = tempdir()?;
    init_test_repo(dir.path())?;
    branch_with_commit(dir.path(), "feature", "main", "f.txt")?;
    let engine = open_engine(dir.path())?;
    assert!(!engine.branch_matches_remote("feature")?);
    Ok(())
}

#[test]
fn test_branch_matches_remote_via_tracking_ref() -> Result<()> {
    // Simulate a pushed branch by writing the remote-tracking ref directly.
    let dir = tempdir()?;
    init_test_repo(dir.path())?;
    branch_with_commit(dir.path(), "feature", "main", "f.txt")?;
    let tip = common::rev(dir.path(), "feature");
    git(
        dir.path(),
        &["update-ref", "refs/remotes/origin/feature", &tip],
    );

    let engine = open_engine(dir.path())?;
    assert!(engine.branch_matches_remote("feature")?);

    // Remote falls behind after a local amend.
    git(dir.path(), &["checkout", "feature"]);
    common::commit_file(dir.path(), "more.txt", "m", "more work")?;
    git(dir.path(), &["checkout", "main"]);
    assert!(!engine.branch_matches_remote("feature")?);
    Ok(())
}

#[test]
fn test_refresh_remote_shas_populates_cache() -> Result<()> {
    let dir = tempdir()?;
    let remote_dir = tempdir()?;
    init_test_repo(dir.path())?;
    git(remote_dir.path(), &["init", "--bare", "-b", "main"]);
    git(
        dir.path(),
        &["remote", "add", "origin", remote_dir.path().to_str().unwrap()],
    );
    branch_with_commit(dir.path(), "feature", "main", "f.txt")?;
    git(dir.path(), &["push", "origin", "main", "feature"]);

    let engine = open_engine(dir.path())?;
    assert!(engine.cached_remote_sha("feature").is_none());

    engine.refresh_remote_shas(&CancelToken::new())?;
    let cached = engine.cached_remote_sha("feature").expect("remote sha cached");
    assert_eq!(cached.as_str(), common::rev(dir.path(), "feature"));
    assert!(engine.branch_matches_remote("feature")?);
    Ok(())
}

#[test]
fn test_refresh_remote_shas_without_remote_is_silent() -> Result<()> {
    let dir = tempdir()?;
    init_test_repo(dir.path())?;
    branch_with_commit(dir.path(), "feature", "main", "f.txt")?;
    let engine = open_engine(dir.path())?;

    // No remote configured: the listing fails, the cache stays empty, and the
    // call itself succeeds.
    engine.refresh_remote_shas(&CancelToken::new())?;
    assert!(engine.cached_remote_sha("feature").is_none());
    assert!(!engine.branch_matches_remote("feature")?);
    Ok(())
}

#[test]
#[serial]
fn test_demo_mode_env_detection() {
    std::env::remove_var("STACKIT_DEMO");
    assert!(!Engine::demo_requested());

    std::env::set_var("STACKIT_DEMO", "1");
    assert!(Engine::demo_requested());

    std::env::set_var("STACKIT_DEMO", "");
    assert!(!Engine::demo_requested());

    std::env::remove_var("STACKIT_DEMO");
}
