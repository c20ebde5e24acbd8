//! Release reconciliation
//!
//! Computes the difference between the locally stored release set of a
//! repository and the release list GitHub currently reports, keyed by release
//! external id:
//!
//! - remote releases with a local counterpart are updated in place (local id
//!   and `seen` are kept)
//! - remote releases without one are created unseen
//! - local releases missing from the remote list are deleted
//!
//! Planning is pure; [`ReconcilePlan::apply`] writes the plan through a store
//! transaction.

use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

use crate::error::TrackerResult;
use crate::model::{Release, ReleaseId, RepositoryId};
use crate::source::RemoteRelease;
use crate::store::StoreTx;

/// Existing release that receives new remote data
#[derive(Debug, Clone, PartialEq)]
pub struct ReleaseUpdate {
    pub id: ReleaseId,
    pub remote: RemoteRelease,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcilePlan {
    pub creates: Vec<RemoteRelease>,
    pub updates: Vec<ReleaseUpdate>,
    pub deletes: Vec<ReleaseId>,
    /// Matched releases whose remote data is identical to what is stored
    pub unchanged: usize,
}

/// Counts of what a reconciliation changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileCounts {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub unchanged: usize,
}

impl ReconcileCounts {
    pub fn is_noop(&self) -> bool {
        self.created == 0 && self.updated == 0 && self.deleted == 0
    }
}

impl std::ops::AddAssign for ReconcileCounts {
    fn add_assign(&mut self, other: Self) {
        self.created += other.created;
        self.updated += other.updated;
        self.deleted += other.deleted;
        self.unchanged += other.unchanged;
    }
}

fn differs(local: &Release, remote: &RemoteRelease) -> bool {
    local.version != remote.version
        || local.name != remote.name
        || local.description != remote.description
        || local.release_time != remote.release_time
        || local.metadata != remote.metadata
}

impl ReconcilePlan {
    /// Diff `local` against `remote`. Duplicate external ids in the remote
    /// list are collapsed to their first occurrence.
    pub fn build(local: &[Release], remote: Vec<RemoteRelease>) -> Self {
        let by_external_id: HashMap<i64, &Release> =
            local.iter().map(|r| (r.external_id, r)).collect();
        let mut remote_ids = HashSet::with_capacity(remote.len());
        let mut plan = ReconcilePlan::default();

        for release in remote {
            if !remote_ids.insert(release.external_id) {
                warn!(
                    "Ignoring duplicate remote release {} ({})",
                    release.external_id, release.version
                );
                continue;
            }

            match by_external_id.get(&release.external_id) {
                Some(existing) if differs(existing, &release) => plan.updates.push(ReleaseUpdate {
                    id: existing.id,
                    remote: release,
                }),
                Some(_) => plan.unchanged += 1,
                None => plan.creates.push(release),
            }
        }

        plan.deletes = local
            .iter()
            .filter(|r| !remote_ids.contains(&r.external_id))
            .map(|r| r.id)
            .collect();

        plan
    }

    pub fn counts(&self) -> ReconcileCounts {
        ReconcileCounts {
            created: self.creates.len(),
            updated: self.updates.len(),
            deleted: self.deletes.len(),
            unchanged: self.unchanged,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.counts().is_noop()
    }

    /// Write the plan for `repository_id` inside an open transaction
    pub fn apply(&self, tx: &StoreTx<'_>, repository_id: RepositoryId) -> TrackerResult<()> {
        for id in &self.deletes {
            tx.delete_release(*id)?;
        }
        for update in &self.updates {
            tx.update_release(update.id, &update.remote)?;
        }
        for remote in &self.creates {
            tx.insert_release(repository_id, remote)?;
        }

        debug!(
            "Applied plan to {}: {} created, {} updated, {} deleted",
            repository_id,
            self.creates.len(),
            self.updates.len(),
            self.deletes.len()
        );
        Ok(())
    }
}
