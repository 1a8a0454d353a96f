//! Host (code-review provider) abstraction.
//!
//! The engine never talks to the host directly; it holds a client behind this
//! trait. The real GitHub-backed client lives in the CLI layer, a mock lives
//! here for tests, and the PR status computer only ever consumes the *stored*
//! PR record, so all submit planning works offline.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::metadata::{PrInfo, PrState};

/// Aggregate CI/check status for a PR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChecksStatus {
    /// No checks configured or reported.
    #[default]
    None,
    /// Checks still running.
    Pending,
    /// All checks passed.
    Passing,
    /// At least one check failed.
    Failing,
}

/// Request to create a pull request.
#[derive(Debug, Clone, Default)]
pub struct CreatePrRequest {
    pub branch: String,
    pub base: String,
    pub title: String,
    pub body: String,
    pub draft: bool,
}

/// Partial update to an existing pull request. `None` fields are untouched.
#[derive(Debug, Clone, Default)]
pub struct UpdatePrRequest {
    pub title: Option<String>,
    pub body: Option<String>,
    pub base: Option<String>,
}

/// Typed interface to the code-review host.
pub trait HostClient: Send + Sync {
    /// Create a PR, returning the stored record for it.
    fn create_pr(&self, request: &CreatePrRequest) -> Result<PrInfo>;

    /// Update an existing PR by number.
    fn update_pr(&self, number: u64, update: &UpdatePrRequest) -> Result<PrInfo>;

    /// Look up the PR whose head is the given branch, if any.
    fn get_pr_by_branch(&self, branch: &str) -> Result<Option<PrInfo>>;

    /// Merge a PR by number.
    fn merge_pr(&self, number: u64) -> Result<()>;

    /// Aggregate check status for a PR.
    fn get_checks_status(&self, number: u64) -> Result<ChecksStatus>;
}

/// Batch extensions over [`HostClient`]. Default implementations run the sync
/// methods concurrently; a real client can override with one API round trip.
#[async_trait]
pub trait AsyncHostClient: HostClient {
    /// Fetch PR records for many branches. Branches without a PR map to `None`;
    /// lookup failures are skipped.
    async fn get_prs_by_branches(&self, branches: &[String]) -> Vec<(String, Option<PrInfo>)> {
        let futures: Vec<_> = branches
            .iter()
            .map(|branch| {
                let result = HostClient::get_pr_by_branch(self, branch);
                let branch = branch.clone();
                async move { (branch, result.ok().flatten()) }
            })
            .collect();
        futures::future::join_all(futures).await
    }
}

impl<T: HostClient + ?Sized> AsyncHostClient for T {}

/// In-memory host for tests: PRs keyed by head branch, numbers assigned
/// sequentially.
#[derive(Default)]
pub struct MockHost {
    state: Mutex<MockState>,
}

#[derive(Default)]
struct MockState {
    next_number: u64,
    prs: HashMap<String, PrInfo>,
}

impl MockHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a PR record directly, as if it already existed on the host.
    pub fn seed_pr(&self, branch: &str, pr: PrInfo) {
        let mut state = self.state.lock().expect("mock host lock");
        state.prs.insert(branch.to_string(), pr);
    }

    /// Number of PRs currently on the mock host.
    pub fn pr_count(&self) -> usize {
        self.state.lock().expect("mock host lock").prs.len()
    }
}

impl HostClient for MockHost {
    fn create_pr(&self, request: &CreatePrRequest) -> Result<PrInfo> {
        let mut state = self.state.lock().expect("mock host lock");
        state.next_number += 1;
        let number = state.next_number;
        let pr = PrInfo {
            number: Some(number),
            title: Some(request.title.clone()),
            body: Some(request.body.clone()),
            base: Some(request.base.clone()),
            state: Some(PrState::Open),
            is_draft: Some(request.draft),
            url: Some(format!("https://example.invalid/pr/{number}")),
        };
        state.prs.insert(request.branch.clone(), pr.clone());
        Ok(pr)
    }

    fn update_pr(&self, number: u64, update: &UpdatePrRequest) -> Result<PrInfo> {
        let mut state = self.state.lock().expect("mock host lock");
        let pr = state
            .prs
            .values_mut()
            .find(|pr| pr.number == Some(number))
            .ok_or_else(|| Error::BranchNotFound(format!("pr #{number}")))?;
        if let Some(title) = &update.title {
            pr.title = Some(title.clone());
        }
        if let Some(body) = &update.body {
            pr.body = Some(body.clone());
        }
        if let Some(base) = &update.base {
            pr.base = Some(base.clone());
        }
        Ok(pr.clone())
    }

    fn get_pr_by_branch(&self, branch: &str) -> Result<Option<PrInfo>> {
        let state = self.state.lock().expect("mock host lock");
        Ok(state.prs.get(branch).cloned())
    }

    fn merge_pr(&self, number: u64) -> Result<()> {
        let mut state = self.state.lock().expect("mock host lock");
        let pr = state
            .prs
            .values_mut()
            .find(|pr| pr.number == Some(number))
            .ok_or_else(|| Error::BranchNotFound(format!("pr #{number}")))?;
        pr.state = Some(PrState::Merged);
        Ok(())
    }

    fn get_checks_status(&self, _number: u64) -> Result<ChecksStatus> {
        Ok(ChecksStatus::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_create_and_lookup() {
        let host = MockHost::new();
        let pr = host
            .create_pr(&CreatePrRequest {
                branch: "feature".to_string(),
                base: "main".to_string(),
                title: "Add feature".to_string(),
                body: String::new(),
                draft: false,
            })
            .unwrap();
        assert_eq!(pr.number, Some(1));
        assert_eq!(pr.state, Some(PrState::Open));

        let found = host.get_pr_by_branch("feature").unwrap().unwrap();
        assert_eq!(found.number, Some(1));
        assert!(host.get_pr_by_branch("other").unwrap().is_none());
    }

    #[test]
    fn test_mock_update_and_merge() {
        let host = MockHost::new();
        let pr = host
            .create_pr(&CreatePrRequest {
                branch: "feature".to_string(),
                base: "main".to_string(),
                title: "Old title".to_string(),
                body: String::new(),
                draft: false,
            })
            .unwrap();
        let number = pr.number.unwrap();

        host.update_pr(
            number,
            &UpdatePrRequest {
                title: Some("New title".to_string()),
                base: Some("develop".to_string()),
                ..Default::default()
            },
        )
        .unwrap();

        host.merge_pr(number).unwrap();
        let pr = host.get_pr_by_branch("feature").unwrap().unwrap();
        assert_eq!(pr.title.as_deref(), Some("New title"));
        assert_eq!(pr.base.as_deref(), Some("develop"));
        assert_eq!(pr.state, Some(PrState::Merged));
    }

    #[tokio::test]
    async fn test_batch_lookup_defaults() {
        let host = MockHost::new();
        host.create_pr(&CreatePrRequest {
            branch: "a".to_string(),
            base: "main".to_string(),
            title: "a".to_string(),
            body: String::new(),
            draft: false,
        })
        .unwrap();

        let results = host
            .get_prs_by_branches(&["a".to_string(), "b".to_string()])
            .await;
        assert_eq!(results.len(), 2);
        let map: HashMap<_, _> = results.into_iter().collect();
        assert!(map["a"].is_some());
        assert!(map["b"].is_none());
    }
}
