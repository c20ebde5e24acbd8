//! Persistent store - SQLite-backed repositories and releases
//!
//! This module provides persistent storage for:
//! - Tracked repositories (keyed by local id, unique by GitHub id)
//! - Their releases, including the user-owned `seen` flag
//!
//! All access goes through [`Store::read`] or [`Store::write`], which run a
//! closure against a [`StoreTx`] inside one SQLite transaction. A closure that
//! returns an error leaves the database untouched.
//!
//! The database is stored in XDG_DATA_HOME/releasewatch/releases.db

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use crate::error::{TrackerError, TrackerResult};
use crate::model::{Release, ReleaseId, ReleaseMetadata, Repository, RepositoryId, TrackedRepository};
use crate::source::{RemoteRelease, RemoteRepository};

const REPOSITORY_COLUMNS: &str =
    "id, external_id, owner, name, full_name, description, archived, created_at, updated_at";

const RELEASE_COLUMNS: &str = "id, external_id, repository_id, version, name, description, \
     release_time, seen, metadata, created_at, updated_at";

/// Store handle shared by all tracker operations
pub struct Store {
    conn: Mutex<Connection>,
}

/// Operations available inside a store transaction
pub struct StoreTx<'a> {
    conn: &'a Connection,
}

impl Store {
    /// Open or create the database at a specific path
    pub fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;

        let store = Self::from_connection(conn)?;
        info!("Release database opened at {}", path.display());
        Ok(store)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", true)
            .context("Failed to enable foreign keys")?;
        Self::initialize(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Initialize the database schema
    fn initialize(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS repositories (
                id TEXT PRIMARY KEY NOT NULL,
                external_id INTEGER UNIQUE NOT NULL,
                owner TEXT NOT NULL,
                name TEXT NOT NULL,
                full_name TEXT NOT NULL,
                description TEXT,
                archived INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS releases (
                id TEXT PRIMARY KEY NOT NULL,
                external_id INTEGER UNIQUE NOT NULL,
                repository_id TEXT NOT NULL REFERENCES repositories(id) ON DELETE CASCADE,
                version TEXT NOT NULL,
                name TEXT NOT NULL,
                description TEXT,
                release_time TEXT NOT NULL,
                seen INTEGER NOT NULL DEFAULT 0,
                metadata TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_releases_repository ON releases(repository_id, release_time);
            CREATE INDEX IF NOT EXISTS idx_repositories_updated ON repositories(updated_at);
            "#,
        )
        .context("Failed to initialize database schema")?;

        debug!("Database schema initialized");
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // A panic mid-transaction rolls the transaction back on unwind, so the
        // connection is still usable.
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run read-only queries against one consistent snapshot
    pub fn read<T, F>(&self, f: F) -> TrackerResult<T>
    where
        F: FnOnce(&StoreTx<'_>) -> TrackerResult<T>,
    {
        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Deferred)?;
        let value = f(&StoreTx { conn: &tx });
        // nothing to commit; dropping the transaction releases the snapshot
        value
    }

    /// Run `f` as one transaction; commits only if `f` succeeds
    pub fn write<T, F>(&self, f: F) -> TrackerResult<T>
    where
        F: FnOnce(&StoreTx<'_>) -> TrackerResult<T>,
    {
        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&StoreTx { conn: &tx })?;
        tx.commit()?;
        Ok(value)
    }
}

/// Current time at the precision we persist
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

fn format_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_time(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn repository_from_row(row: &Row<'_>) -> rusqlite::Result<Repository> {
    Ok(Repository {
        id: row.get(0)?,
        external_id: row.get(1)?,
        owner: row.get(2)?,
        name: row.get(3)?,
        full_name: row.get(4)?,
        description: row.get(5)?,
        archived: row.get(6)?,
        created_at: parse_time(row, 7)?,
        updated_at: parse_time(row, 8)?,
    })
}

fn release_from_row(row: &Row<'_>) -> rusqlite::Result<Release> {
    let metadata: String = row.get(8)?;
    let metadata: ReleaseMetadata = serde_json::from_str(&metadata)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(8, Type::Text, Box::new(e)))?;

    Ok(Release {
        id: row.get(0)?,
        external_id: row.get(1)?,
        repository_id: row.get(2)?,
        version: row.get(3)?,
        name: row.get(4)?,
        description: row.get(5)?,
        release_time: parse_time(row, 6)?,
        seen: row.get(7)?,
        metadata,
        created_at: parse_time(row, 9)?,
        updated_at: parse_time(row, 10)?,
    })
}

/// Undecodable rows are reported separately from database failures
fn classify(err: rusqlite::Error) -> TrackerError {
    match err {
        rusqlite::Error::FromSqlConversionFailure(idx, _, source) => {
            TrackerError::CorruptRecord(format!("column {}: {}", idx, source))
        }
        other => TrackerError::Persistence(other),
    }
}

fn encode_metadata(metadata: &ReleaseMetadata) -> TrackerResult<String> {
    serde_json::to_string(metadata)
        .map_err(|e| TrackerError::CorruptRecord(format!("release metadata: {}", e)))
}

impl StoreTx<'_> {
    // =========================================================================
    // Repository Operations
    // =========================================================================

    pub fn find_repository(&self, id: RepositoryId) -> TrackerResult<Option<Repository>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM repositories WHERE id = ?1", REPOSITORY_COLUMNS),
                params![id],
                repository_from_row,
            )
            .optional()
            .map_err(classify)
    }

    pub fn find_repository_by_external_id(&self, external_id: i64) -> TrackerResult<Option<Repository>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {} FROM repositories WHERE external_id = ?1",
                    REPOSITORY_COLUMNS
                ),
                params![external_id],
                repository_from_row,
            )
            .optional()
            .map_err(classify)
    }

    /// All repositories, most recently updated first
    pub fn list_repositories(&self) -> TrackerResult<Vec<Repository>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM repositories ORDER BY updated_at DESC, full_name ASC",
            REPOSITORY_COLUMNS
        ))?;

        let repositories = stmt
            .query_map([], repository_from_row)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(classify)?;

        Ok(repositories)
    }

    pub fn insert_repository(&self, remote: &RemoteRepository) -> TrackerResult<Repository> {
        let id = RepositoryId::new();
        let now = format_time(&now());

        self.conn.execute(
            r#"
            INSERT INTO repositories (id, external_id, owner, name, full_name, description, archived, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
            "#,
            params![
                id,
                remote.external_id,
                remote.owner,
                remote.name,
                remote.full_name,
                remote.description,
                remote.archived,
                now,
            ],
        )?;

        debug!("Inserted repository {} ({})", remote.full_name, id);
        self.find_repository(id)?
            .ok_or(TrackerError::RepositoryNotFound(id))
    }

    /// Update the fields that may change after registration
    pub fn update_repository_metadata(
        &self,
        id: RepositoryId,
        description: Option<&str>,
        archived: bool,
    ) -> TrackerResult<()> {
        let changed = self.conn.execute(
            "UPDATE repositories SET description = ?2, archived = ?3, updated_at = ?4 WHERE id = ?1",
            params![id, description, archived, format_time(&now())],
        )?;

        if changed == 0 {
            return Err(TrackerError::RepositoryNotFound(id));
        }
        Ok(())
    }

    /// Delete a repository and its releases. Returns the number of releases
    /// removed, or `None` if the repository did not exist.
    pub fn delete_repository(&self, id: RepositoryId) -> TrackerResult<Option<usize>> {
        let releases = self
            .conn
            .execute("DELETE FROM releases WHERE repository_id = ?1", params![id])?;
        let repositories = self
            .conn
            .execute("DELETE FROM repositories WHERE id = ?1", params![id])?;

        if repositories == 0 {
            return Ok(None);
        }
        debug!("Deleted repository {} with {} releases", id, releases);
        Ok(Some(releases))
    }

    /// Repository together with its releases
    pub fn tracked(&self, id: RepositoryId) -> TrackerResult<Option<TrackedRepository>> {
        match self.find_repository(id)? {
            Some(repository) => {
                let releases = self.releases_for(id)?;
                Ok(Some(TrackedRepository {
                    repository,
                    releases,
                }))
            }
            None => Ok(None),
        }
    }

    // =========================================================================
    // Release Operations
    // =========================================================================

    /// Releases of one repository, newest first
    pub fn releases_for(&self, repository_id: RepositoryId) -> TrackerResult<Vec<Release>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM releases WHERE repository_id = ?1 ORDER BY release_time DESC, external_id DESC",
            RELEASE_COLUMNS
        ))?;

        let releases = stmt
            .query_map(params![repository_id], release_from_row)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(classify)?;

        Ok(releases)
    }

    pub fn find_release(&self, id: ReleaseId) -> TrackerResult<Option<Release>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM releases WHERE id = ?1", RELEASE_COLUMNS),
                params![id],
                release_from_row,
            )
            .optional()
            .map_err(classify)
    }

    /// Insert a new release; it always starts unseen
    pub fn insert_release(
        &self,
        repository_id: RepositoryId,
        remote: &RemoteRelease,
    ) -> TrackerResult<Release> {
        let id = ReleaseId::new();
        let now = format_time(&now());

        self.conn.execute(
            r#"
            INSERT INTO releases (id, external_id, repository_id, version, name, description, release_time, seen, metadata, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8, ?9, ?9)
            "#,
            params![
                id,
                remote.external_id,
                repository_id,
                remote.version,
                remote.name,
                remote.description,
                format_time(&remote.release_time),
                encode_metadata(&remote.metadata)?,
                now,
            ],
        )?;

        self.find_release(id)?.ok_or(TrackerError::ReleaseNotFound(id))
    }

    /// Overwrite every remote-derived field; `seen` is left alone
    pub fn update_release(&self, id: ReleaseId, remote: &RemoteRelease) -> TrackerResult<()> {
        let changed = self.conn.execute(
            r#"
            UPDATE releases
            SET version = ?2, name = ?3, description = ?4, release_time = ?5, metadata = ?6, updated_at = ?7
            WHERE id = ?1
            "#,
            params![
                id,
                remote.version,
                remote.name,
                remote.description,
                format_time(&remote.release_time),
                encode_metadata(&remote.metadata)?,
                format_time(&now()),
            ],
        )?;

        if changed == 0 {
            return Err(TrackerError::ReleaseNotFound(id));
        }
        Ok(())
    }

    pub fn delete_release(&self, id: ReleaseId) -> TrackerResult<()> {
        let changed = self
            .conn
            .execute("DELETE FROM releases WHERE id = ?1", params![id])?;

        if changed == 0 {
            return Err(TrackerError::ReleaseNotFound(id));
        }
        Ok(())
    }

    /// Set the seen flag; returns false if the release does not exist
    pub fn set_seen(&self, id: ReleaseId, seen: bool) -> TrackerResult<bool> {
        let changed = self.conn.execute(
            "UPDATE releases SET seen = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, seen, format_time(&now())],
        )?;
        Ok(changed > 0)
    }

    /// Set the seen flag on every release of a repository whose flag differs
    pub fn set_all_seen(&self, repository_id: RepositoryId, seen: bool) -> TrackerResult<usize> {
        let changed = self.conn.execute(
            "UPDATE releases SET seen = ?2, updated_at = ?3 WHERE repository_id = ?1 AND seen != ?2",
            params![repository_id, seen, format_time(&now())],
        )?;
        Ok(changed)
    }

    pub fn count_releases(&self, repository_id: RepositoryId) -> TrackerResult<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM releases WHERE repository_id = ?1",
            params![repository_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}
