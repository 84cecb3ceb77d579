//! Database schema definitions.
//!
//! The base schema holds the key/value table the change queue is persisted
//! in. Everything added later lives in [`super::migrations`].

use rusqlite::{Connection, Result};

/// The base SQL schema.
///
/// Timestamps are stored as INTEGER (Unix milliseconds).
pub const SCHEMA_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version TEXT PRIMARY KEY,
    applied_at INTEGER NOT NULL
);

-- Durable key/value entries (the pending-change envelope lives here)
CREATE TABLE IF NOT EXISTS kv_store (
    key TEXT PRIMARY KEY,
    value BLOB NOT NULL,
    updated_at INTEGER NOT NULL
);
";

/// Prepare a freshly opened connection: pragmas, base tables, migrations.
///
/// `synchronous=FULL` makes a committed queue write durable before
/// `execute` returns.
///
/// # Errors
///
/// Returns an error if a pragma, the schema, or a migration fails.
pub fn apply_schema(conn: &Connection) -> Result<()> {
    for (pragma, value) in [
        ("journal_mode", "WAL"),
        ("synchronous", "FULL"),
        ("temp_store", "MEMORY"),
    ] {
        conn.pragma_update(None, pragma, value)?;
    }
    conn.execute_batch(SCHEMA_SQL)?;
    super::migrations::run_migrations(conn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_schema_creates_tables() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).unwrap();

        for table in ["kv_store", "sync_runs", "schema_migrations"] {
            let exists: bool = conn
                .query_row(
                    "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert!(exists, "missing table {table}");
        }
    }

    #[test]
    fn test_apply_schema_twice() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).unwrap();
        apply_schema(&conn).unwrap();
    }
}
