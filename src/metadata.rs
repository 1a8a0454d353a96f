//! Branch metadata persistence using git-native blob-backed refs.
//!
//! Each tracked branch carries one metadata record stored as:
//!   `refs/stackit/metadata/<branch>` -> blob containing a JSON record
//!
//! Refs travel with fetch/push, so metadata survives clones and enables
//! collaboration. A branch is *tracked* iff its record has a parent name.
//! Reads are fail-open: a missing ref or an unparseable blob yields an empty
//! record, so one corrupt blob never takes down graph rebuilds.

use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use slog::{o, warn, Logger};

use crate::error::{Error, Result};
use crate::git::GitDriver;

/// Prefix for metadata refs.
pub const METADATA_REF_PREFIX: &str = "refs/stackit/metadata/";

/// Bound on concurrent blob reads in `batch_read`.
const BATCH_READ_WIDTH: usize = 8;

/// State of a pull request on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrState {
    #[serde(rename = "OPEN")]
    Open,
    #[serde(rename = "MERGED")]
    Merged,
    #[serde(rename = "CLOSED")]
    Closed,
}

impl std::fmt::Display for PrState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PrState::Open => write!(f, "open"),
            PrState::Merged => write!(f, "merged"),
            PrState::Closed => write!(f, "closed"),
        }
    }
}

/// Stored pull-request record for a branch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<PrState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_draft: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Per-branch metadata record, the unit of persistence.
///
/// Absence of `parent_branch_name` means the branch is untracked. Unknown
/// keys are ignored on read; absent keys are omitted on write.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_branch_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_branch_revision: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pr_info: Option<PrInfo>,
}

impl BranchMetadata {
    /// A branch is tracked iff it records a parent.
    pub fn is_tracked(&self) -> bool {
        self.parent_branch_name.is_some()
    }

    /// Whether the record carries nothing worth persisting.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Validate a branch name read from or written to metadata.
///
/// Detects corruption from empty blobs, control characters, path traversal,
/// and over-long names (git's 255-char ref component limit). Slashes are
/// allowed; git branch names commonly contain them.
pub(crate) fn validate_branch_name(name: &str) -> Result<()> {
    let invalid = |reason: &str| Error::InvalidBranchName {
        name: name.to_string(),
        reason: reason.to_string(),
    };
    if name.trim().is_empty() {
        return Err(invalid("empty name"));
    }
    if name.contains("..") {
        return Err(invalid("contains '..'"));
    }
    if name.chars().any(|c| c.is_control()) {
        return Err(invalid("contains control characters"));
    }
    if name.len() > 255 {
        return Err(invalid("exceeds 255 characters"));
    }
    Ok(())
}

/// Serialization/deserialization of metadata records into content-addressed
/// blobs referenced by namespaced refs.
#[derive(Clone)]
pub struct MetadataStore {
    git: Arc<dyn GitDriver>,
    logger: Logger,
}

impl MetadataStore {
    pub fn new(git: Arc<dyn GitDriver>) -> Self {
        Self {
            git,
            logger: Logger::root(slog::Discard, o!()),
        }
    }

    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = logger;
        self
    }

    /// Ref name holding a branch's metadata.
    pub fn metadata_ref(branch: &str) -> String {
        format!("{METADATA_REF_PREFIX}{branch}")
    }

    /// Read a branch's metadata. Never fails on absence; a missing ref or an
    /// unparseable blob yields an empty record.
    pub fn read(&self, branch: &str) -> Result<BranchMetadata> {
        read_record(&self.git, &self.logger, branch)
    }

    /// Serialize and persist a branch's metadata. The ref update is atomic at
    /// the VCS level; a crash between blob creation and ref update leaves only
    /// a harmless orphan blob.
    pub fn write(&self, branch: &str, metadata: &BranchMetadata) -> Result<()> {
        validate_branch_name(branch)?;
        if let Some(parent) = metadata.parent_branch_name.as_deref() {
            validate_branch_name(parent)?;
        }

        let json = serde_json::to_string(metadata).map_err(|source| Error::MetadataParse {
            branch: branch.to_string(),
            source,
        })?;
        let blob = self.git.create_blob(json.as_bytes())?;
        self.git.update_ref(
            &Self::metadata_ref(branch),
            &blob,
            &format!("stackit: update metadata for {branch}"),
        )
    }

    /// Remove a branch's metadata ref. Idempotent.
    pub fn delete(&self, branch: &str) -> Result<()> {
        self.git.delete_ref(&Self::metadata_ref(branch))
    }

    /// Move a branch's metadata to a new name.
    pub fn rename(&self, old: &str, new: &str) -> Result<()> {
        let record = self.read(old)?;
        self.write(new, &record)?;
        self.delete(old)
    }

    /// All branch names carrying a metadata ref, sorted.
    pub fn list(&self) -> Result<Vec<String>> {
        let mut branches: Vec<String> = self
            .git
            .list_refs(METADATA_REF_PREFIX)?
            .into_iter()
            .filter_map(|(name, _)| name.strip_prefix(METADATA_REF_PREFIX).map(str::to_string))
            .collect();
        branches.sort();
        Ok(branches)
    }

    /// Read many records with bounded parallelism. Returns the records that
    /// were read plus a per-name error map; ordering within the maps is not
    /// meaningful.
    pub async fn batch_read(
        &self,
        names: &[String],
    ) -> (HashMap<String, BranchMetadata>, HashMap<String, Error>) {
        let results: Vec<(String, Result<BranchMetadata>)> = stream::iter(names.to_vec())
            .map(|name| {
                let git = Arc::clone(&self.git);
                let logger = self.logger.clone();
                async move {
                    let read_name = name.clone();
                    let result = tokio::task::spawn_blocking(move || {
                        read_record(&git, &logger, &read_name)
                    })
                    .await
                    .unwrap_or_else(|join_err| {
                        Err(Error::GitCommand {
                            command: "batch-read".to_string(),
                            args: vec![name.clone()],
                            stdout: String::new(),
                            stderr: String::new(),
                            source: Some(Box::new(join_err)),
                        })
                    });
                    (name, result)
                }
            })
            .buffer_unordered(BATCH_READ_WIDTH)
            .collect()
            .await;

        let mut records = HashMap::new();
        let mut errors = HashMap::new();
        for (name, result) in results {
            match result {
                Ok(record) => {
                    records.insert(name, record);
                }
                Err(err) => {
                    errors.insert(name, err);
                }
            }
        }
        (records, errors)
    }
}

fn read_record(git: &Arc<dyn GitDriver>, logger: &Logger, branch: &str) -> Result<BranchMetadata> {
    let oid = match git.get_ref(&MetadataStore::metadata_ref(branch))? {
        Some(oid) => oid,
        None => return Ok(BranchMetadata::default()),
    };
    let content = git.read_blob(&oid)?;
    match serde_json::from_slice(&content) {
        Ok(record) => Ok(record),
        Err(err) => {
            // Fail-open: corrupt metadata reads as empty rather than wedging
            // every graph rebuild.
            warn!(logger, "unparseable metadata blob, treating as empty";
                  "branch" => branch, "error" => %err);
            Ok(BranchMetadata::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracked_iff_parent_present() {
        let mut record = BranchMetadata::default();
        assert!(!record.is_tracked());
        record.parent_branch_name = Some("main".to_string());
        assert!(record.is_tracked());
    }

    #[test]
    fn test_serialization_uses_wire_keys_and_omits_absent() {
        let record = BranchMetadata {
            parent_branch_name: Some("main".to_string()),
            parent_branch_revision: Some("abc123".to_string()),
            scope: None,
            pr_info: Some(PrInfo {
                number: Some(42),
                title: Some("Add feature".to_string()),
                state: Some(PrState::Open),
                is_draft: Some(false),
                ..Default::default()
            }),
        };

        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"parentBranchName\":\"main\""), "json: {json}");
        assert!(json.contains("\"parentBranchRevision\":\"abc123\""), "json: {json}");
        assert!(json.contains("\"prInfo\""), "json: {json}");
        assert!(json.contains("\"isDraft\":false"), "json: {json}");
        assert!(json.contains("\"state\":\"OPEN\""), "json: {json}");
        assert!(!json.contains("scope"), "absent keys must be omitted: {json}");
        assert!(!json.contains("body"), "absent keys must be omitted: {json}");
    }

    #[test]
    fn test_round_trip_is_identity() {
        let record = BranchMetadata {
            parent_branch_name: Some("main".to_string()),
            parent_branch_revision: Some("abc123".to_string()),
            scope: Some("api,db".to_string()),
            pr_info: Some(PrInfo {
                number: Some(7),
                title: Some("title".to_string()),
                body: Some("body".to_string()),
                base: Some("main".to_string()),
                state: Some(PrState::Merged),
                is_draft: Some(true),
                url: Some("https://example.com/pr/7".to_string()),
            }),
        };
        let json = serde_json::to_string(&record).unwrap();
        let back: BranchMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_unknown_keys_ignored_on_read() {
        let json = r#"{"parentBranchName":"main","futureField":123,"prInfo":{"number":1,"extra":"x"}}"#;
        let record: BranchMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(record.parent_branch_name.as_deref(), Some("main"));
        assert_eq!(record.pr_info.unwrap().number, Some(1));
    }

    #[test]
    fn test_validate_branch_name() {
        assert!(validate_branch_name("feature/login").is_ok());
        assert!(validate_branch_name("").is_err());
        assert!(validate_branch_name("  ").is_err());
        assert!(validate_branch_name("a..b").is_err());
        assert!(validate_branch_name("bad\0name").is_err());
        assert!(validate_branch_name(&"x".repeat(300)).is_err());
    }

    #[test]
    fn test_metadata_ref_path() {
        assert_eq!(
            MetadataStore::metadata_ref("feature/login"),
            "refs/stackit/metadata/feature/login"
        );
    }
}
