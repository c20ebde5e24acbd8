//! releasewatch - track GitHub releases of the repositories you care about
//!
//! releasewatch keeps a local SQLite copy of the releases published by a set
//! of watched GitHub repositories and remembers which of them you have
//! already looked at.
//!
//! ## Core Features
//!
//! - **Registration**: Add a repository by URL or `owner/name`; its full
//!   release history is imported in one step
//! - **Reconciliation**: Refreshing mirrors the remote release list exactly
//!   (new releases created, edited ones updated, deleted ones removed) while
//!   keeping your seen/unseen marks
//! - **Queries**: Filter, search and sort watched repositories by their
//!   latest release
//! - **Configuration Management**: YAML-based configuration with XDG compliance
//! - **Authentication**: GitHub CLI, token-based or anonymous access
//!
//! ## Modules
//!
//! - [`config`]: Configuration management and parsing
//! - [`github`]: GitHub API integration and authentication
//! - [`store`]: SQLite persistence
//! - [`reconcile`]: Release set diffing
//! - [`tracker`]: Registration, refresh, seen state and removal

pub mod config;
pub mod error;
pub mod github;
pub mod health;
pub mod model;
pub mod reconcile;
pub mod source;
pub mod store;
pub mod tracker;

pub use config::Config;
pub use error::{TrackerError, TrackerResult};
pub use github::GitHubClient;
pub use health::HealthCheck;
pub use model::{ListQuery, Release, ReleaseFilter, ReleaseId, Repository, RepositoryId, SortKey, TrackedRepository};
pub use reconcile::ReconcileCounts;
pub use source::{resolve_reference, ReleaseSource, RemoteRelease, RemoteRepository, RepositoryRef};
pub use store::Store;
pub use tracker::{ReconcileOutcome, RefreshSummary, Tracker};
