//! Integration tests for snapshot/undo: capture, restore, pruning.

mod common;

use anyhow::Result;
use tempfile::tempdir;

use common::{branch_with_commit, commit_file, git, init_test_repo, open_engine, rev};
use stackit::CancelToken;

#[test]
fn test_snapshot_round_trip_restores_everything() -> Result<()> {
    // Take a snapshot, mutate branch tips and metadata, restore, and expect
    // tips, metadata refs, and the current branch back exactly.
    let dir = tempdir()?;
    init_test_repo(dir.path())?;
    branch_with_commit(dir.path(), "a", "main", "a.txt")?;
    git(dir.path(), &["checkout", "-b", "b", "a"]);
    commit_file(dir.path(), "b.txt", "b", "add b")?;
    git(dir.path(), &["checkout", "main"]);

    let engine = open_engine(dir.path())?;
    engine.track("a", "main")?;
    engine.track("b", "a")?;

    let a_tip = rev(dir.path(), "a");
    let b_tip = rev(dir.path(), "b");
    let meta_a = rev(dir.path(), "refs/stackit/metadata/a");

    let id = engine.take_snapshot("restack", &["--all".to_string()])?;

    // Mutate: advance trunk, restack the stack, reparent b.
    commit_file(dir.path(), "x.txt", "x", "trunk advances")?;
    let stack = vec!["a".to_string(), "b".to_string()];
    let batch = engine.restack_branches(&stack, &CancelToken::new())?;
    assert!(batch.succeeded());
    engine.set_parent("b", "main")?;
    assert_ne!(rev(dir.path(), "a"), a_tip);

    engine.restore_snapshot(&id)?;

    assert_eq!(rev(dir.path(), "a"), a_tip, "a's tip must be restored");
    assert_eq!(rev(dir.path(), "b"), b_tip, "b's tip must be restored");
    assert_eq!(
        rev(dir.path(), "refs/stackit/metadata/a"),
        meta_a,
        "metadata ref must be restored"
    );
    assert_eq!(engine.parent_of("b").as_deref(), Some("a"));
    assert_eq!(engine.current_branch().as_deref(), Some("main"));
    Ok(())
}

#[test]
fn test_restore_deletes_branch_created_after_snapshot() -> Result<()> {
    let dir = tempdir()?;
    init_test_repo(dir.path())?;
    let engine = open_engine(dir.path())?;
    let main_tip = rev(dir.path(), "main");

    let id = engine.take_snapshot("create", &[])?;

    // Create branch c off main with a commit and stay on it.
    git(dir.path(), &["checkout", "-b", "c", "main"]);
    commit_file(dir.path(), "c.txt", "c", "add c")?;
    let engine = open_engine(dir.path())?;
    engine.track("c", "main")?;

    engine.restore_snapshot(&id)?;

    assert!(!engine.branches().contains(&"c".to_string()), "c must be deleted");
    assert_eq!(rev(dir.path(), "main"), main_tip);
    assert_eq!(engine.current_branch().as_deref(), Some("main"));
    // c's metadata ref is gone too.
    let refs = common::git_stdout(
        dir.path(),
        &["for-each-ref", "--format=%(refname)", "refs/stackit/metadata/"],
    );
    assert!(refs.is_empty(), "metadata refs: {refs}");
    Ok(())
}

#[test]
fn test_restore_recreates_deleted_branch() -> Result<()> {
    let dir = tempdir()?;
    init_test_repo(dir.path())?;
    branch_with_commit(dir.path(), "victim", "main", "v.txt")?;
    let engine = open_engine(dir.path())?;
    engine.track("victim", "main")?;
    let victim_tip = rev(dir.path(), "victim");

    let id = engine.take_snapshot("delete", &["victim".to_string()])?;
    engine.delete("victim")?;
    assert!(!engine.branches().contains(&"victim".to_string()));

    engine.restore_snapshot(&id)?;
    assert!(engine.branches().contains(&"victim".to_string()));
    assert_eq!(rev(dir.path(), "victim"), victim_tip);
    assert!(engine.is_tracked("victim"));
    Ok(())
}

#[test]
fn test_snapshot_listing_and_pruning() -> Result<()> {
    let dir = tempdir()?;
    init_test_repo(dir.path())?;
    std::fs::write(
        dir.path().join(".git/.stackit_config"),
        r#"{"undo.stackDepth": 3}"#,
    )?;
    let engine = open_engine(dir.path())?;

    for i in 0..5 {
        engine.take_snapshot("track", &[format!("branch-{i}")])?;
    }

    let snapshots = engine.list_snapshots()?;
    assert_eq!(snapshots.len(), 3, "depth must cap retained snapshots");
    // Newest first: the last-taken snapshot leads.
    assert_eq!(snapshots[0].snapshot.args, vec!["branch-4"]);
    assert_eq!(snapshots[2].snapshot.args, vec!["branch-2"]);
    Ok(())
}

#[test]
fn test_zero_snapshots_is_a_clean_empty_listing() -> Result<()> {
    let dir = tempdir()?;
    init_test_repo(dir.path())?;
    let engine = open_engine(dir.path())?;
    assert!(engine.list_snapshots()?.is_empty());
    assert!(engine.restore_snapshot("20990101000000.000_nope").is_err());
    Ok(())
}

#[test]
fn test_restore_from_detached_snapshot_falls_back_to_trunk() -> Result<()> {
    let dir = tempdir()?;
    init_test_repo(dir.path())?;
    git(dir.path(), &["checkout", "--detach", "main"]);
    let engine = open_engine(dir.path())?;

    let id = engine.take_snapshot("noop", &[])?;
    let snapshot = engine.load_snapshot(&id)?;
    assert!(snapshot.current_branch.is_empty(), "detached HEAD records no branch");

    engine.restore_snapshot(&id)?;
    assert_eq!(engine.current_branch().as_deref(), Some("main"));
    Ok(())
}
