//! Remote release source abstraction
//!
//! The tracker only talks to GitHub through [`ReleaseSource`], which keeps the
//! reconciliation logic testable against an in-memory source.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

use crate::error::{TrackerError, TrackerResult};
use crate::model::ReleaseMetadata;

/// Owner/name pair identifying a repository on the hosting service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryRef {
    pub owner: String,
    pub name: String,
}

impl RepositoryRef {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

impl fmt::Display for RepositoryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Repository metadata as reported by the remote source
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRepository {
    pub external_id: i64,
    pub owner: String,
    pub name: String,
    pub full_name: String,
    pub description: Option<String>,
    pub archived: bool,
}

/// One entry of a repository's remote release list
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteRelease {
    pub external_id: i64,
    pub version: String,
    pub name: String,
    pub description: Option<String>,
    pub release_time: DateTime<Utc>,
    pub metadata: ReleaseMetadata,
}

/// Read-only access to repository metadata and release lists
#[async_trait]
pub trait ReleaseSource: Send + Sync {
    /// Fetch repository metadata by owner/name
    async fn fetch_repository(&self, repo: &RepositoryRef) -> TrackerResult<RemoteRepository>;

    /// Fetch the complete release list; an empty list is valid
    async fn fetch_releases(&self, repo: &RepositoryRef) -> TrackerResult<Vec<RemoteRelease>>;

    /// Source name for display/logging
    fn source_name(&self) -> &'static str;
}

fn url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"github\.com[/:]([^/]*)/([^/?#\s]*)").expect("valid repository url pattern")
    })
}

fn shorthand_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^([A-Za-z0-9_.-]+)/([A-Za-z0-9_.-]+)$").expect("valid shorthand pattern")
    })
}

/// Resolve a repository reference into an owner/name pair
///
/// Accepts hosting URLs (`https://github.com/owner/name`, with or without a
/// trailing `.git` or further path segments, and `git@github.com:owner/name.git`)
/// as well as the `owner/name` shorthand.
pub fn resolve_reference(reference: &str) -> TrackerResult<RepositoryRef> {
    let reference = reference.trim();
    let invalid = || TrackerError::InvalidReference(reference.to_string());

    let captures = if reference.contains("github.com") {
        url_pattern().captures(reference)
    } else {
        shorthand_pattern().captures(reference)
    }
    .ok_or_else(invalid)?;

    let owner = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
    let name = captures.get(2).map(|m| m.as_str()).unwrap_or_default();
    let name = name.strip_suffix(".git").unwrap_or(name);

    if owner.is_empty() || name.is_empty() {
        return Err(invalid());
    }

    Ok(RepositoryRef::new(owner, name))
}
