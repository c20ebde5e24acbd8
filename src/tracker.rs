//! Tracker - registration and reconciliation of watched repositories
//!
//! This module coordinates the release source and the store. Every public
//! mutation is one store transaction; remote reads always complete before
//! the transaction opens, so a failed fetch never leaves partial state.
//! Operations on the same repository are serialized through a per-repository
//! async lock, while different repositories proceed independently.

use anyhow::Context;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{OwnedMutexGuard, Semaphore};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{TrackerError, TrackerResult};
use crate::github::GitHubClient;
use crate::model::{ListQuery, Release, ReleaseId, RepositoryId, TrackedRepository};
use crate::reconcile::{ReconcileCounts, ReconcilePlan};
use crate::source::{resolve_reference, ReleaseSource, RepositoryRef};
use crate::store::Store;

/// Result of reconciling one repository
#[derive(Debug, Clone)]
pub struct ReconcileOutcome {
    pub repository: TrackedRepository,
    pub counts: ReconcileCounts,
}

#[derive(Debug)]
pub struct RefreshFailure {
    pub repository_id: RepositoryId,
    pub full_name: String,
    pub error: TrackerError,
}

/// Results from refreshing every tracked repository
#[derive(Debug)]
pub struct RefreshSummary {
    pub total_repositories: usize,
    pub refreshed: Vec<ReconcileOutcome>,
    pub failed: Vec<RefreshFailure>,
    pub counts: ReconcileCounts,
    pub duration: Duration,
}

/// One async mutex per repository id. Entries live only while a guard or a
/// waiter holds them.
#[derive(Default)]
struct RepositoryLocks {
    locks: Mutex<HashMap<RepositoryId, Arc<tokio::sync::Mutex<()>>>>,
}

/// Held for the duration of one operation on a repository
struct RepositoryGuard<'a> {
    locks: &'a RepositoryLocks,
    id: RepositoryId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl RepositoryLocks {
    async fn acquire(&self, id: RepositoryId) -> RepositoryGuard<'_> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
            locks.entry(id).or_default().clone()
        };
        RepositoryGuard {
            locks: self,
            id,
            guard: Some(lock.lock_owned().await),
        }
    }

    /// Drop the entry unless someone else still holds or waits on it
    fn prune(&self, id: RepositoryId) {
        let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        if locks.get(&id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(&id);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

impl Drop for RepositoryGuard<'_> {
    fn drop(&mut self) {
        // release the mutex first so its Arc no longer counts
        self.guard.take();
        self.locks.prune(self.id);
    }
}

/// Entry point for every repository and release operation
pub struct Tracker {
    source: Arc<dyn ReleaseSource>,
    store: Arc<Store>,
    locks: RepositoryLocks,
    max_parallel: usize,
}

impl Tracker {
    pub fn new(source: Arc<dyn ReleaseSource>, store: Arc<Store>) -> Self {
        Self {
            source,
            store,
            locks: RepositoryLocks::default(),
            max_parallel: 4,
        }
    }

    /// Limit concurrent reconciliations in [`Tracker::refresh_all`]
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }

    /// Build a tracker backed by GitHub and the configured database
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let github = GitHubClient::new(config)?;
        let store = Store::open(&config.database_path()).context("Failed to open release database")?;

        Ok(Self::new(Arc::new(github), Arc::new(store)).with_max_parallel(config.sync.max_parallel))
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    /// Start tracking the repository behind `reference` and import its releases
    pub async fn add_repository(&self, reference: &str) -> TrackerResult<TrackedRepository> {
        let reference = resolve_reference(reference)?;
        info!("Registering repository {}", reference);

        let remote = self.source.fetch_repository(&reference).await?;

        if let Some(existing) = self
            .store
            .read(|tx| tx.find_repository_by_external_id(remote.external_id))?
        {
            return Err(TrackerError::AlreadyTracked {
                full_name: existing.full_name,
            });
        }

        // Follow the canonical name in case the reference was an old alias
        let canonical = RepositoryRef::new(&remote.owner, &remote.name);
        let releases = self.source.fetch_releases(&canonical).await?;
        let plan = ReconcilePlan::build(&[], releases);

        let id = self.store.write(|tx| {
            if let Some(existing) = tx.find_repository_by_external_id(remote.external_id)? {
                return Err(TrackerError::AlreadyTracked {
                    full_name: existing.full_name,
                });
            }
            let repository = tx.insert_repository(&remote)?;
            plan.apply(tx, repository.id)?;
            Ok(repository.id)
        })?;

        let tracked = self.require_tracked(id)?;
        info!(
            "Tracking {} with {} releases",
            tracked.repository.full_name,
            tracked.releases.len()
        );
        Ok(tracked)
    }

    /// Bring a repository's releases in line with the remote release list
    pub async fn refresh_repository(&self, id: RepositoryId) -> TrackerResult<ReconcileOutcome> {
        let _guard = self.locks.acquire(id).await;

        let repository = self
            .store
            .read(|tx| tx.find_repository(id))?
            .ok_or(TrackerError::RepositoryNotFound(id))?;
        let reference = RepositoryRef::new(&repository.owner, &repository.name);

        debug!("Refreshing {} from {}", reference, self.source.source_name());

        let (remote, remote_releases, local) = tokio::try_join!(
            self.source.fetch_repository(&reference),
            self.source.fetch_releases(&reference),
            async { self.store.read(|tx| tx.releases_for(id)) },
        )?;

        if remote.external_id != repository.external_id {
            return Err(TrackerError::remote_fetch(
                format!("repository {}", reference),
                format!(
                    "name now resolves to a different repository (id {} instead of {})",
                    remote.external_id, repository.external_id
                ),
            ));
        }

        let plan = ReconcilePlan::build(&local, remote_releases);
        let counts = plan.counts();
        if plan.is_empty() {
            debug!("Releases of {} already up to date", reference);
        }

        self.store.write(|tx| {
            tx.update_repository_metadata(id, remote.description.as_deref(), remote.archived)?;
            plan.apply(tx, id)
        })?;

        let tracked = self.require_tracked(id)?;
        info!(
            "Refreshed {}: {} new, {} updated, {} removed",
            tracked.repository.full_name, counts.created, counts.updated, counts.deleted
        );

        Ok(ReconcileOutcome {
            repository: tracked,
            counts,
        })
    }

    /// Set the seen flag of a single release
    pub async fn mark_release_seen(&self, id: ReleaseId, seen: bool) -> TrackerResult<Release> {
        let release = self.store.write(|tx| {
            if !tx.set_seen(id, seen)? {
                return Err(TrackerError::ReleaseNotFound(id));
            }
            tx.find_release(id)?.ok_or(TrackerError::ReleaseNotFound(id))
        })?;

        debug!("Marked release {} ({}) seen={}", release.version, id, seen);
        Ok(release)
    }

    /// Set the seen flag on every release of a repository; returns how many changed
    pub async fn mark_all_seen(&self, id: RepositoryId, seen: bool) -> TrackerResult<usize> {
        let _guard = self.locks.acquire(id).await;

        let changed = self.store.write(|tx| {
            if tx.find_repository(id)?.is_none() {
                return Err(TrackerError::RepositoryNotFound(id));
            }
            tx.set_all_seen(id, seen)
        })?;

        debug!("Marked {} releases of {} seen={}", changed, id, seen);
        Ok(changed)
    }

    /// Stop tracking a repository; its releases go with it
    pub async fn remove_repository(&self, id: RepositoryId) -> TrackerResult<()> {
        let _guard = self.locks.acquire(id).await;

        let removed = self
            .store
            .write(|tx| tx.delete_repository(id))?
            .ok_or(TrackerError::RepositoryNotFound(id))?;

        info!("Removed repository {} and {} releases", id, removed);
        Ok(())
    }

    /// Refresh every tracked repository with bounded concurrency
    pub async fn refresh_all(&self) -> TrackerResult<RefreshSummary> {
        let start_time = Instant::now();
        let repositories = self.store.read(|tx| tx.list_repositories())?;
        let total_repositories = repositories.len();

        info!(
            "Refreshing {} repositories with max_parallel={}",
            total_repositories, self.max_parallel
        );

        let semaphore = Semaphore::new(self.max_parallel);
        let mut futures = FuturesUnordered::new();

        for repository in repositories {
            let semaphore = &semaphore;
            futures.push(async move {
                let _permit = semaphore.acquire().await;
                let result = self.refresh_repository(repository.id).await;
                (repository, result)
            });
        }

        let mut refreshed = Vec::new();
        let mut failed = Vec::new();
        let mut counts = ReconcileCounts::default();

        while let Some((repository, result)) = futures.next().await {
            match result {
                Ok(outcome) => {
                    counts += outcome.counts;
                    refreshed.push(outcome);
                }
                Err(e) => {
                    error!("Refresh failed for {}: {}", repository.full_name, e);
                    failed.push(RefreshFailure {
                        repository_id: repository.id,
                        full_name: repository.full_name,
                        error: e,
                    });
                }
            }
        }

        let duration = start_time.elapsed();
        if !failed.is_empty() {
            warn!("{} of {} repositories failed to refresh", failed.len(), total_repositories);
        }
        info!(
            "Refresh completed in {:.2}s: {} new, {} updated, {} removed releases",
            duration.as_secs_f64(),
            counts.created,
            counts.updated,
            counts.deleted
        );

        Ok(RefreshSummary {
            total_repositories,
            refreshed,
            failed,
            counts,
            duration,
        })
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn list_repositories(&self, query: &ListQuery) -> TrackerResult<Vec<TrackedRepository>> {
        let all = self.store.read(|tx| {
            tx.list_repositories()?
                .into_iter()
                .map(|repository| {
                    let releases = tx.releases_for(repository.id)?;
                    Ok(TrackedRepository {
                        repository,
                        releases,
                    })
                })
                .collect::<TrackerResult<Vec<_>>>()
        })?;

        Ok(query.apply(all))
    }

    pub fn get_repository(&self, id: RepositoryId) -> TrackerResult<Option<TrackedRepository>> {
        self.store.read(|tx| tx.tracked(id))
    }

    /// Releases of a repository, newest first
    pub fn list_releases(&self, id: RepositoryId) -> TrackerResult<Vec<Release>> {
        self.store.read(|tx| {
            if tx.find_repository(id)?.is_none() {
                return Err(TrackerError::RepositoryNotFound(id));
            }
            tx.releases_for(id)
        })
    }

    pub fn get_release(&self, id: ReleaseId) -> TrackerResult<Option<Release>> {
        self.store.read(|tx| tx.find_release(id))
    }

    fn require_tracked(&self, id: RepositoryId) -> TrackerResult<TrackedRepository> {
        self.store
            .read(|tx| tx.tracked(id))?
            .ok_or(TrackerError::RepositoryNotFound(id))
    }
}
