//! Error taxonomy for tracker operations
//!
//! Every core operation returns [`TrackerError`] so callers can match on the
//! failure kind instead of parsing messages. The binary and configuration
//! layers keep using `anyhow` on top of this.

use crate::model::{ReleaseId, RepositoryId};

pub type TrackerResult<T> = Result<T, TrackerError>;

#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    /// The input could not be resolved to an owner/name pair
    #[error("Invalid repository reference: {0}")]
    InvalidReference(String),

    /// A repository with the same external id is already tracked
    #[error("Repository {full_name} is already in your watch list")]
    AlreadyTracked { full_name: String },

    /// GitHub answered, but the repository does not exist there
    #[error("Repository {0} was not found on GitHub")]
    RemoteNotFound(String),

    /// GitHub could not be reached or returned an unexpected response
    #[error("Failed to fetch {target} from GitHub: {message}")]
    RemoteFetch { target: String, message: String },

    #[error("Repository not found: {0}")]
    RepositoryNotFound(RepositoryId),

    #[error("Release not found: {0}")]
    ReleaseNotFound(ReleaseId),

    #[error("Database error: {0}")]
    Persistence(#[from] rusqlite::Error),

    /// A stored row could not be decoded
    #[error("Corrupt record: {0}")]
    CorruptRecord(String),
}

impl TrackerError {
    pub fn remote_fetch(target: impl Into<String>, message: impl std::fmt::Display) -> Self {
        TrackerError::RemoteFetch {
            target: target.into(),
            message: message.to_string(),
        }
    }

    /// Whether a fresh invocation of the same operation might succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TrackerError::RemoteFetch { .. } | TrackerError::Persistence(_)
        )
    }
}
