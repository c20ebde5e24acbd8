//! Tracked repositories and their releases
//!
//! Plain data records as they are persisted by [`crate::store::Store`]. The
//! tracker hands these out by value; nothing here is lazily loaded.

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! local_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s.trim()).map(Self)
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.0.to_string()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                let text = value.as_str()?;
                Uuid::parse_str(text)
                    .map(Self)
                    .map_err(|e| FromSqlError::Other(Box::new(e)))
            }
        }
    };
}

local_id!(
    /// Local identifier of a tracked repository
    RepositoryId
);

local_id!(
    /// Local identifier of a stored release
    ReleaseId
);

/// A repository the user chose to watch
#[derive(Debug, Clone, PartialEq)]
pub struct Repository {
    pub id: RepositoryId,
    /// GitHub repository id; survives renames and transfers
    pub external_id: i64,
    pub owner: String,
    pub name: String,
    pub full_name: String,
    pub description: Option<String>,
    pub archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Links and flags GitHub reports for a release
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseMetadata {
    pub html_url: String,
    #[serde(default)]
    pub tarball_url: Option<String>,
    #[serde(default)]
    pub zipball_url: Option<String>,
    #[serde(default)]
    pub draft: bool,
    #[serde(default)]
    pub prerelease: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Release {
    pub id: ReleaseId,
    /// GitHub release id, the merge key during reconciliation
    pub external_id: i64,
    pub repository_id: RepositoryId,
    pub version: String,
    pub name: String,
    pub description: Option<String>,
    pub release_time: DateTime<Utc>,
    /// Local user state, never taken from GitHub
    pub seen: bool,
    pub metadata: ReleaseMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Release {
    /// Ordering used for "latest": release time, then the larger external id
    fn recency(&self, other: &Release) -> Ordering {
        self.release_time
            .cmp(&other.release_time)
            .then(self.external_id.cmp(&other.external_id))
    }
}

/// Pick the most recent release out of a set
pub fn latest_release<'a, I>(releases: I) -> Option<&'a Release>
where
    I: IntoIterator<Item = &'a Release>,
{
    releases.into_iter().max_by(|a, b| a.recency(b))
}

/// A repository together with its current release set
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedRepository {
    pub repository: Repository,
    pub releases: Vec<Release>,
}

impl TrackedRepository {
    pub fn latest_release(&self) -> Option<&Release> {
        latest_release(&self.releases)
    }

    pub fn unseen_count(&self) -> usize {
        self.releases.iter().filter(|r| !r.seen).count()
    }

    /// True when the newest release has not been looked at yet
    pub fn has_new_release(&self) -> bool {
        self.latest_release().map(|r| !r.seen).unwrap_or(false)
    }
}

/// Filter on the seen state of each repository's latest release
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReleaseFilter {
    #[default]
    All,
    Seen,
    Unseen,
}

impl FromStr for ReleaseFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(ReleaseFilter::All),
            "seen" => Ok(ReleaseFilter::Seen),
            "unseen" => Ok(ReleaseFilter::Unseen),
            other => Err(format!("unknown filter '{}' (expected all, seen or unseen)", other)),
        }
    }
}

/// Ordering for listed repositories. Each key has a natural direction which
/// [`ListQuery::reverse`] flips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    /// Most recently updated first
    #[default]
    Updated,
    /// Alphabetical by full name
    Name,
    /// Newest latest release first; repositories without releases last
    Latest,
    /// Repositories with an unseen latest release first
    Status,
}

impl FromStr for SortKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "updated" => Ok(SortKey::Updated),
            "name" => Ok(SortKey::Name),
            "latest" => Ok(SortKey::Latest),
            "status" => Ok(SortKey::Status),
            other => Err(format!(
                "unknown sort key '{}' (expected updated, name, latest or status)",
                other
            )),
        }
    }
}

/// Options for listing tracked repositories
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    pub filter: ReleaseFilter,
    /// Case-insensitive match on full name or description
    pub search: Option<String>,
    pub sort: SortKey,
    pub reverse: bool,
}

impl ListQuery {
    pub fn matches(&self, tracked: &TrackedRepository) -> bool {
        let status_ok = match self.filter {
            ReleaseFilter::All => true,
            ReleaseFilter::Seen => tracked.latest_release().map(|r| r.seen).unwrap_or(false),
            ReleaseFilter::Unseen => tracked.has_new_release(),
        };
        if !status_ok {
            return false;
        }

        match self.search.as_deref().map(str::trim) {
            None | Some("") => true,
            Some(needle) => {
                let needle = needle.to_lowercase();
                let repo = &tracked.repository;
                repo.full_name.to_lowercase().contains(&needle)
                    || repo
                        .description
                        .as_deref()
                        .map(|d| d.to_lowercase().contains(&needle))
                        .unwrap_or(false)
            }
        }
    }

    pub fn apply(&self, repositories: Vec<TrackedRepository>) -> Vec<TrackedRepository> {
        let mut selected: Vec<_> = repositories.into_iter().filter(|r| self.matches(r)).collect();

        match self.sort {
            SortKey::Updated => selected.sort_by(|a, b| {
                b.repository.updated_at.cmp(&a.repository.updated_at)
            }),
            SortKey::Name => selected.sort_by(|a, b| {
                a.repository
                    .full_name
                    .to_lowercase()
                    .cmp(&b.repository.full_name.to_lowercase())
            }),
            SortKey::Latest => selected.sort_by(|a, b| match (a.latest_release(), b.latest_release()) {
                (Some(x), Some(y)) => y.recency(x),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            }),
            SortKey::Status => selected.sort_by_key(|r| !r.has_new_release()),
        }

        if self.reverse {
            selected.reverse();
        }
        selected
    }
}
