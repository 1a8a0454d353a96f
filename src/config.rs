//! Repository configuration.
//!
//! Stored as JSON at `.git/.stackit_config`. All fields are optional; the
//! accessors apply defaults (`trunk = "main"`, `submit.footer = true`,
//! `undo.stackDepth = 10`). Unknown keys are tolerated on read so older and
//! newer versions can share a repository.

use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// File name of the per-repository config, relative to the git dir.
pub const CONFIG_FILE_NAME: &str = ".stackit_config";

/// Default trunk branch name.
pub const DEFAULT_TRUNK: &str = "main";

/// Default number of undo snapshots retained.
pub const DEFAULT_UNDO_DEPTH: usize = 10;

/// Per-repository configuration record.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RepoConfig {
    /// Primary trunk branch name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trunk: Option<String>,

    /// Additional long-lived branches treated as trunks. The first entry is
    /// used when `trunk` is unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trunks: Option<Vec<String>>,

    /// Whether host (GitHub) integration is enabled for this repo.
    #[serde(
        rename = "isGithubIntegrationEnabled",
        skip_serializing_if = "Option::is_none"
    )]
    pub is_github_integration_enabled: Option<bool>,

    /// Regex that new branch names must match.
    #[serde(rename = "branchNamePattern", skip_serializing_if = "Option::is_none")]
    pub branch_name_pattern: Option<String>,

    /// Whether submitted PR bodies carry the stack footer.
    #[serde(rename = "submit.footer", skip_serializing_if = "Option::is_none")]
    pub submit_footer: Option<bool>,

    /// Number of undo snapshots to retain.
    #[serde(rename = "undo.stackDepth", skip_serializing_if = "Option::is_none")]
    pub undo_stack_depth: Option<usize>,
}

impl RepoConfig {
    /// Load configuration from a git dir. A missing file yields the default
    /// (all-unset) config; invalid JSON is an error so misconfiguration does
    /// not silently fall back to defaults.
    pub fn load(git_dir: &Path) -> Result<Self> {
        let path = Self::path(git_dir);
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&path).map_err(|source| Error::ConfigIo {
            path: path.clone(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| Error::ConfigIo {
            path,
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, source),
        })
    }

    /// Write configuration back to the git dir.
    pub fn save(&self, git_dir: &Path) -> Result<()> {
        let path = Self::path(git_dir);
        let content = serde_json::to_string_pretty(self).map_err(|source| Error::ConfigIo {
            path: path.clone(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, source),
        })?;
        fs::write(&path, content).map_err(|source| Error::ConfigIo { path, source })
    }

    /// Path of the config file inside a git dir.
    pub fn path(git_dir: &Path) -> PathBuf {
        git_dir.join(CONFIG_FILE_NAME)
    }

    /// The effective trunk branch name.
    pub fn trunk_name(&self) -> &str {
        if let Some(trunk) = self.trunk.as_deref() {
            return trunk;
        }
        if let Some(first) = self.trunks.as_ref().and_then(|t| t.first()) {
            return first;
        }
        DEFAULT_TRUNK
    }

    /// All configured trunks, always including the effective trunk.
    pub fn all_trunks(&self) -> Vec<String> {
        let mut trunks = vec![self.trunk_name().to_string()];
        if let Some(extra) = &self.trunks {
            for name in extra {
                if !trunks.iter().any(|t| t == name) {
                    trunks.push(name.clone());
                }
            }
        }
        trunks
    }

    /// Whether PR bodies should carry the stack footer.
    pub fn submit_footer(&self) -> bool {
        self.submit_footer.unwrap_or(true)
    }

    /// How many undo snapshots to retain.
    pub fn undo_depth(&self) -> usize {
        self.undo_stack_depth.unwrap_or(DEFAULT_UNDO_DEPTH)
    }

    /// Whether host integration is enabled. Defaults to true.
    pub fn github_integration_enabled(&self) -> bool {
        self.is_github_integration_enabled.unwrap_or(true)
    }

    /// Compile the configured branch-name pattern, if any. An invalid pattern
    /// surfaces as `InvalidBranchName` naming the pattern itself.
    pub fn branch_name_regex(&self) -> Result<Option<Regex>> {
        match self.branch_name_pattern.as_deref() {
            None => Ok(None),
            Some(pattern) => Regex::new(pattern).map(Some).map_err(|e| Error::InvalidBranchName {
                name: pattern.to_string(),
                reason: format!("branchNamePattern is not a valid regex: {e}"),
            }),
        }
    }
}
