//! Integration tests for the metadata store against real repositories,
//! including corruption handling. Fixtures are built with git2 for speed.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tempfile::tempdir;

use stackit::metadata::{BranchMetadata, MetadataStore, PrInfo, PrState};
use stackit::{GitDriver, SubprocessGit};

fn init_git2_repo(path: &Path) -> Result<git2::Repository> {
    let repo = git2::Repository::init_opts(
        path,
        git2::RepositoryInitOptions::new().initial_head("main"),
    )?;
    let sig = git2::Signature::now("Test User", "test@example.com")?;
    let tree_id = repo.index()?.write_tree()?;
    {
        let tree = repo.find_tree(tree_id)?;
        repo.commit(Some("HEAD"), &sig, &sig, "Initial commit", &tree, &[])?;
    }
    Ok(repo)
}

fn store_for(path: &Path) -> Result<(Arc<dyn GitDriver>, MetadataStore)> {
    let driver: Arc<dyn GitDriver> = Arc::new(SubprocessGit::open(path)?);
    let store = MetadataStore::new(Arc::clone(&driver));
    Ok((driver, store))
}

fn tracked(parent: &str, revision: &str) -> BranchMetadata {
    BranchMetadata {
        parent_branch_name: Some(parent.to_string()),
        parent_branch_revision: Some(revision.to_string()),
        ..Default::default()
    }
}

#[test]
fn test_write_read_round_trip() -> Result<()> {
    let dir = tempdir()?;
    let repo = init_git2_repo(dir.path())?;
    let head = repo.head()?.peel_to_commit()?;
    repo.branch("feature", &head, false)?;
    let (_driver, store) = store_for(dir.path())?;

    let record = BranchMetadata {
        parent_branch_name: Some("main".to_string()),
        parent_branch_revision: Some(head.id().to_string()),
        scope: Some("api".to_string()),
        pr_info: Some(PrInfo {
            number: Some(77),
            state: Some(PrState::Open),
            ..Default::default()
        }),
    };
    store.write("feature", &record)?;

    let read = store.read("feature")?;
    assert_eq!(read, record);
    Ok(())
}

#[test]
fn test_read_absent_is_empty_record() -> Result<()> {
    let dir = tempdir()?;
    init_git2_repo(dir.path())?;
    let (_driver, store) = store_for(dir.path())?;

    let record = store.read("never-tracked")?;
    assert_eq!(record, BranchMetadata::default());
    assert!(!record.is_tracked());
    Ok(())
}

#[test]
fn test_unparseable_blob_reads_as_empty() -> Result<()> {
    let dir = tempdir()?;
    let repo = init_git2_repo(dir.path())?;
    let head = repo.head()?.peel_to_commit()?;
    repo.branch("feature", &head, false)?;

    // Corrupt the metadata ref with a non-JSON blob.
    let blob = repo.blob(b"{ this is not json")?;
    repo.reference("refs/stackit/metadata/feature", blob, true, "corrupt")?;

    let (_driver, store) = store_for(dir.path())?;
    let record = store.read("feature")?;
    assert_eq!(record, BranchMetadata::default(), "reads must fail open");
    Ok(())
}

#[test]
fn test_write_rejects_corrupt_parent_names() -> Result<()> {
    let dir = tempdir()?;
    init_git2_repo(dir.path())?;
    let (_driver, store) = store_for(dir.path())?;

    let mut record = BranchMetadata::default();
    record.parent_branch_name = Some("bad\0name".to_string());
    assert!(store.write("feature", &record).is_err());

    record.parent_branch_name = Some("a..b".to_string());
    assert!(store.write("feature", &record).is_err());
    Ok(())
}

#[test]
fn test_delete_and_rename() -> Result<()> {
    let dir = tempdir()?;
    let repo = init_git2_repo(dir.path())?;
    let head = repo.head()?.peel_to_commit()?;
    repo.branch("old-name", &head, false)?;
    let (_driver, store) = store_for(dir.path())?;

    store.write("old-name", &tracked("main", &head.id().to_string()))?;
    store.rename("old-name", "new-name")?;

    assert!(store.read("new-name")?.is_tracked());
    assert_eq!(store.read("old-name")?, BranchMetadata::default());
    assert_eq!(store.list()?, vec!["new-name"]);

    store.delete("new-name")?;
    assert!(store.list()?.is_empty());
    // Idempotent.
    store.delete("new-name")?;
    Ok(())
}

#[test]
fn test_list_is_sorted() -> Result<()> {
    let dir = tempdir()?;
    let repo = init_git2_repo(dir.path())?;
    let head_id = repo.head()?.peel_to_commit()?.id().to_string();
    let (_driver, store) = store_for(dir.path())?;

    for name in ["zeta", "alpha", "mid"] {
        store.write(name, &tracked("main", &head_id))?;
    }
    assert_eq!(store.list()?, vec!["alpha", "mid", "zeta"]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_batch_read_returns_all_records() -> Result<()> {
    let dir = tempdir()?;
    let repo = init_git2_repo(dir.path())?;
    let head_id = repo.head()?.peel_to_commit()?.id().to_string();
    let (_driver, store) = store_for(dir.path())?;

    let names: Vec<String> = (0..20).map(|i| format!("branch-{i:02}")).collect();
    for name in &names {
        store.write(name, &tracked("main", &head_id))?;
    }

    let mut request = names.clone();
    request.push("missing".to_string());
    let (records, errors) = store.batch_read(&request).await;

    assert!(errors.is_empty(), "errors: {errors:?}");
    assert_eq!(records.len(), request.len());
    // Absent branches read as empty records, not errors.
    assert_eq!(records["missing"], BranchMetadata::default());
    for name in &names {
        assert_eq!(records[name].parent_branch_name.as_deref(), Some("main"));
    }
    Ok(())
}
