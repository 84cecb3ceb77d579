//! Database migrations, applied in order on every open.

use chrono::Utc;
use rusqlite::{params, Connection, Result};
use std::collections::HashSet;
use tracing::{info, warn};

struct Migration {
    version: &'static str,
    sql: &'static str,
}

/// Schema changes after the base schema, oldest first.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: "001_add_sync_runs",
        sql: "CREATE TABLE IF NOT EXISTS sync_runs (
                id TEXT PRIMARY KEY,
                started_at INTEGER NOT NULL,
                finished_at INTEGER NOT NULL,
                outcome TEXT NOT NULL,
                synced INTEGER NOT NULL DEFAULT 0,
                failed INTEGER NOT NULL DEFAULT 0,
                errors TEXT NOT NULL DEFAULT '[]'
            );
            CREATE INDEX IF NOT EXISTS idx_sync_runs_started ON sync_runs(started_at);",
    },
    Migration {
        version: "002_add_sync_runs_deferred",
        sql: "ALTER TABLE sync_runs ADD COLUMN deferred INTEGER NOT NULL DEFAULT 0;",
    },
    Migration {
        version: "003_add_sync_runs_conflicts",
        sql: "ALTER TABLE sync_runs ADD COLUMN conflicts_resolved INTEGER NOT NULL DEFAULT 0;",
    },
];

/// Bring `conn` up to date with [`MIGRATIONS`].
///
/// Versions already recorded in `schema_migrations` are skipped.
///
/// # Errors
///
/// Returns the first SQL error other than a duplicate column, which only
/// means an earlier open added the column without recording it.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version TEXT PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
    )?;

    let done = applied_versions(conn)?;
    let pending = MIGRATIONS.iter().filter(|m| !done.contains(m.version));

    for migration in pending {
        match conn.execute_batch(migration.sql) {
            Ok(()) => info!(version = migration.version, "Applied migration"),
            Err(e) if is_duplicate_column(&e) => {
                warn!(version = migration.version, "Columns already present, recording migration");
            }
            Err(e) => return Err(e),
        }
        record(conn, migration.version)?;
    }

    Ok(())
}

fn applied_versions(conn: &Connection) -> Result<HashSet<String>> {
    let mut stmt = conn.prepare("SELECT version FROM schema_migrations")?;
    let rows = stmt.query_map([], |row| row.get(0))?;
    rows.collect()
}

fn record(conn: &Connection, version: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
        params![version, Utc::now().timestamp_millis()],
    )?;
    Ok(())
}

fn is_duplicate_column(err: &rusqlite::Error) -> bool {
    err.to_string().contains("duplicate column name")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::schema::SCHEMA_SQL;

    fn setup_db(conn: &Connection) {
        conn.execute_batch(SCHEMA_SQL).expect("Base schema should apply");
    }

    fn applied_count(conn: &Connection) -> i64 {
        conn.query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_run_migrations_fresh_db() {
        let conn = Connection::open_in_memory().unwrap();
        setup_db(&conn);
        run_migrations(&conn).expect("Migrations should apply to fresh database");
        assert_eq!(applied_count(&conn), i64::try_from(MIGRATIONS.len()).unwrap());

        conn.execute(
            "INSERT INTO sync_runs (id, started_at, finished_at, outcome, deferred)
             VALUES ('run_1', 1, 2, 'completed', 3)",
            [],
        )
        .unwrap();
    }

    #[test]
    fn test_run_migrations_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        setup_db(&conn);

        run_migrations(&conn).expect("First run should succeed");
        run_migrations(&conn).expect("Second run should succeed (idempotent)");
        assert_eq!(applied_count(&conn), i64::try_from(MIGRATIONS.len()).unwrap());
    }

    #[test]
    fn test_duplicate_column_is_tolerated() {
        let conn = Connection::open_in_memory().unwrap();
        setup_db(&conn);
        conn.execute_batch(MIGRATIONS[0].sql).unwrap();
        conn.execute_batch("ALTER TABLE sync_runs ADD COLUMN deferred INTEGER NOT NULL DEFAULT 0;")
            .unwrap();

        run_migrations(&conn).expect("duplicate column should be tolerated");

        let has_conflicts: bool = conn
            .prepare("SELECT 1 FROM pragma_table_info('sync_runs') WHERE name = 'conflicts_resolved'")
            .unwrap()
            .exists([])
            .unwrap();
        assert!(has_conflicts);
    }
}
