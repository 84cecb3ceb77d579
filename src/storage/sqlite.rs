//! SQLite storage implementation.
//!
//! [`SqliteStore`] backs the change queue's [`DurableStorage`] contract with
//! a single `kv_store` table and keeps a history of sync cycles in
//! `sync_runs` for the CLI.

use super::schema::apply_schema;
use super::{DurableStorage, PersistenceError};
use crate::sync::{ChangeError, SyncResult};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// SQLite-based storage backend.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

/// One recorded sync cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRun {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// `completed`, `offline`, `already_syncing` or `aborted`.
    pub outcome: String,
    pub synced: usize,
    pub failed: usize,
    pub deferred: usize,
    pub conflicts_resolved: usize,
    pub errors: Vec<ChangeError>,
}

impl SyncRun {
    /// Build a run record from a cycle's timing and (optional) result.
    #[must_use]
    pub fn new(
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        outcome: &str,
        result: Option<&SyncResult>,
    ) -> Self {
        let id = format!("run_{}", &uuid::Uuid::new_v4().simple().to_string()[..12]);
        let mut run = Self {
            id,
            started_at,
            finished_at,
            outcome: outcome.to_string(),
            synced: 0,
            failed: 0,
            deferred: 0,
            conflicts_resolved: 0,
            errors: Vec::new(),
        };
        if let Some(result) = result {
            run.synced = result.synced;
            run.failed = result.failed;
            run.deferred = result.deferred;
            run.conflicts_resolved = result.conflicts_resolved;
            run.errors.clone_from(&result.errors);
        }
        run
    }
}

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

fn count_to_sql(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn count_from_sql(n: i64) -> usize {
    usize::try_from(n).unwrap_or(0)
}

impl SqliteStore {
    /// Open a database at the given path.
    ///
    /// Creates parent directories and applies the schema if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema fails.
    pub fn open(path: &Path) -> Result<Self, PersistenceError> {
        Self::open_with_timeout(path, None)
    }

    /// Open a database with an optional busy timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema fails.
    pub fn open_with_timeout(path: &Path, timeout_ms: Option<u64>) -> Result<Self, PersistenceError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_millis(timeout_ms.unwrap_or(5000)))?;

        apply_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing).
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub fn open_memory() -> Result<Self, PersistenceError> {
        let conn = Connection::open_in_memory()?;
        apply_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, PersistenceError> {
        self.conn.lock().map_err(|_| PersistenceError::Poisoned)
    }

    /// Record a finished sync cycle.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub fn record_run(&self, run: &SyncRun) -> Result<(), PersistenceError> {
        let errors = serde_json::to_string(&run.errors)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO sync_runs
                (id, started_at, finished_at, outcome, synced, failed, deferred, conflicts_resolved, errors)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            rusqlite::params![
                run.id,
                run.started_at.timestamp_millis(),
                run.finished_at.timestamp_millis(),
                run.outcome,
                count_to_sql(run.synced),
                count_to_sql(run.failed),
                count_to_sql(run.deferred),
                count_to_sql(run.conflicts_resolved),
                errors,
            ],
        )?;
        Ok(())
    }

    /// Most recent sync cycles, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a stored error list is corrupt.
    pub fn recent_runs(&self, limit: usize) -> Result<Vec<SyncRun>, PersistenceError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, started_at, finished_at, outcome, synced, failed, deferred, conflicts_resolved, errors
             FROM sync_runs ORDER BY started_at DESC, rowid DESC LIMIT ?1",
        )?;

        let rows = stmt
            .query_map([count_to_sql(limit)], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, i64>(6)?,
                    row.get::<_, i64>(7)?,
                    row.get::<_, String>(8)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(
                |(id, started, finished, outcome, synced, failed, deferred, conflicts, errors)| {
                    Ok(SyncRun {
                        id,
                        started_at: millis_to_datetime(started),
                        finished_at: millis_to_datetime(finished),
                        outcome,
                        synced: count_from_sql(synced),
                        failed: count_from_sql(failed),
                        deferred: count_from_sql(deferred),
                        conflicts_resolved: count_from_sql(conflicts),
                        errors: serde_json::from_str(&errors)?,
                    })
                },
            )
            .collect()
    }
}

impl DurableStorage for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, PersistenceError> {
        let conn = self.conn()?;
        let value = conn
            .query_row("SELECT value FROM kv_store WHERE key = ?1", [key], |row| {
                row.get::<_, Vec<u8>>(0)
            })
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), PersistenceError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO kv_store (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            rusqlite::params![key, value, Utc::now().timestamp_millis()],
        )?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), PersistenceError> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM kv_store WHERE key = ?1", [key])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EntityKind;
    use crate::sync::FailureReason;
    use tempfile::TempDir;

    #[test]
    fn test_kv_roundtrip() {
        let store = SqliteStore::open_memory().unwrap();
        assert!(store.get("queue").unwrap().is_none());

        store.set("queue", b"[1]").unwrap();
        store.set("queue", b"[1,2]").unwrap();
        assert_eq!(store.get("queue").unwrap().as_deref(), Some(&b"[1,2]"[..]));

        store.delete("queue").unwrap();
        store.delete("queue").unwrap();
        assert!(store.get("queue").unwrap().is_none());
    }

    #[test]
    fn test_values_survive_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("sync.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.set("queue", b"payload").unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.get("queue").unwrap().as_deref(), Some(&b"payload"[..]));
    }

    #[test]
    fn test_record_and_list_runs() {
        let store = SqliteStore::open_memory().unwrap();
        let t0 = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        let t1 = Utc.timestamp_millis_opt(1_700_000_060_000).unwrap();

        let mut result = SyncResult::default();
        result.synced = 2;
        result.failed = 1;
        result.errors.push(ChangeError {
            change_id: "chg_1".into(),
            entity: EntityKind::Product,
            entity_id: "p1".into(),
            reason: FailureReason::Validation {
                message: "bad".into(),
            },
        });

        store
            .record_run(&SyncRun::new(t0, t0, "offline", None))
            .unwrap();
        store
            .record_run(&SyncRun::new(t1, t1, "completed", Some(&result)))
            .unwrap();

        let runs = store.recent_runs(10).unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].outcome, "completed");
        assert_eq!(runs[0].synced, 2);
        assert_eq!(runs[0].errors.len(), 1);
        assert_eq!(runs[1].outcome, "offline");

        assert_eq!(store.recent_runs(1).unwrap().len(), 1);
    }
}
