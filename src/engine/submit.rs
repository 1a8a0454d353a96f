//! Submission planning: decide whether a branch's PR must be created,
//! updated, or left untouched.
//!
//! Works entirely from the *stored* PR record (plus the remote-SHA cache), so
//! planning is offline; `sync_pr_record` refreshes the stored record from the
//! host when a client is attached.

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::metadata::{PrInfo, PrState};
use crate::scope::{title_prefix_matches, Scope};

use super::Engine;

/// What the submit workflow should do for a branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitAction {
    /// No PR recorded; one must be created.
    Create,
    /// A PR exists and needs an update.
    Update,
    /// A PR exists and nothing is out of date (or it is closed/merged).
    Skip,
}

/// Submission intent for one branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionStatus {
    pub action: SubmitAction,
    pub needs_update: bool,
    /// Human-readable explanation of the decision.
    pub reason: String,
    pub pr_number: Option<u64>,
    pub pr_info: Option<PrInfo>,
}

impl Engine {
    /// Compute the submission intent for a branch.
    ///
    /// `needs_update` is true when the stored base differs from the current
    /// parent, the branch is out of sync with the remote, or the effective
    /// scope's `[SCOPE] ` title prefix differs from the stored title
    /// (case-insensitive).
    pub fn submission_status(&self, branch: &str) -> Result<SubmissionStatus> {
        let cache = self.read_cache();
        let trunk = cache.trunk().to_string();
        if branch == trunk {
            return Err(Error::TrunkOperation(trunk));
        }

        let record = self.metadata_store().read(branch)?;
        let Some(pr) = record.pr_info else {
            return Ok(SubmissionStatus {
                action: SubmitAction::Create,
                needs_update: true,
                reason: "no pull request recorded".to_string(),
                pr_number: None,
                pr_info: None,
            });
        };

        if let Some(state @ (PrState::Merged | PrState::Closed)) = pr.state {
            return Ok(SubmissionStatus {
                action: SubmitAction::Skip,
                needs_update: false,
                reason: format!("pull request is {state}"),
                pr_number: pr.number,
                pr_info: Some(pr),
            });
        }

        let desired_base = record
            .parent_branch_name
            .clone()
            .or_else(|| cache.parent_of(branch).map(str::to_string))
            .unwrap_or_else(|| trunk.clone());
        let base_changed = pr.base.as_deref() != Some(desired_base.as_str());

        let out_of_sync = !self.branch_matches_remote_internal(&cache, branch)?;

        let scope = Self::get_scope_internal(&cache, branch);
        let title_needs_prefix = match (&pr.title, &scope) {
            (Some(title), _) => !title_prefix_matches(title, &scope),
            (None, Scope::Tags(_)) => true,
            (None, _) => false,
        };

        let mut reasons = Vec::new();
        if base_changed {
            reasons.push(format!(
                "base '{}' should be '{desired_base}'",
                pr.base.as_deref().unwrap_or("<unset>")
            ));
        }
        if out_of_sync {
            reasons.push("branch differs from remote".to_string());
        }
        if title_needs_prefix {
            reasons.push("title scope prefix is stale".to_string());
        }

        let needs_update = base_changed || out_of_sync || title_needs_prefix;
        Ok(SubmissionStatus {
            action: if needs_update { SubmitAction::Update } else { SubmitAction::Skip },
            needs_update,
            reason: if reasons.is_empty() {
                "up to date".to_string()
            } else {
                reasons.join("; ")
            },
            pr_number: pr.number,
            pr_info: Some(pr),
        })
    }

    /// Refresh a branch's stored PR record from the attached host client.
    /// Returns the new record, or `None` when the host has no PR for the
    /// branch (the stale stored record, if any, is dropped).
    pub fn sync_pr_record(&self, branch: &str, cancel: &CancelToken) -> Result<Option<PrInfo>> {
        cancel.check()?;
        let Some(host) = self.host().cloned() else {
            return Ok(None);
        };

        let fetched = host.get_pr_by_branch(branch)?;
        let mut cache = self.write_cache();
        let mut record = self.metadata_store().read(branch)?;
        record.pr_info = fetched.clone();
        self.metadata_store().write(branch, &record)?;
        cache.patch_branch(branch, Some(&record));
        Ok(fetched)
    }
}
