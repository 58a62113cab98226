//! Schema versioning for the flight log store.
//!
//! The schema version lives in `PRAGMA user_version`. Each entry of
//! [`MIGRATIONS`] upgrades the database by exactly one version and runs in
//! its own transaction.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::{Error, Result};

use super::schema::SCHEMA_V1;

/// Ordered migrations; entry `n` upgrades version `n` to `n + 1`.
pub const MIGRATIONS: &[&[&str]] = &[SCHEMA_V1];

/// The schema version this build writes.
#[must_use]
pub fn current_version() -> i32 {
    i32::try_from(MIGRATIONS.len()).unwrap_or(i32::MAX)
}

/// Bring the database schema up to [`current_version`].
///
/// # Errors
///
/// Returns an error if the database was written by a newer build or a
/// migration statement fails.
pub fn initialize_schema(conn: &mut Connection) -> Result<()> {
    let found = schema_version(conn)?;
    let target = current_version();

    if found > target {
        return Err(Error::DatabaseMigration {
            message: format!("user_version {found} is newer than this build ({target})"),
        });
    }

    for version in found..target {
        let statements = usize::try_from(version)
            .ok()
            .and_then(|index| MIGRATIONS.get(index))
            .ok_or_else(|| Error::DatabaseMigration {
                message: format!("no migration from version {version}"),
            })?;

        debug!("Migrating flight log schema {} -> {}", version, version + 1);
        let tx = conn.transaction()?;
        for statement in *statements {
            tx.execute(statement, [])?;
        }
        tx.pragma_update(None, "user_version", version + 1)?;
        tx.commit()?;
    }

    if found < target {
        info!("Flight log schema at version {}", target);
    }
    Ok(())
}

/// Read the schema version; a fresh database reports 0.
///
/// # Errors
///
/// Returns an error if the pragma cannot be read.
pub fn schema_version(conn: &Connection) -> Result<i32> {
    let version = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_db() -> Connection {
        Connection::open_in_memory().expect("failed to create in-memory database")
    }

    fn table_exists(conn: &Connection, name: &str) -> bool {
        let count: i32 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                [name],
                |row| row.get(0),
            )
            .unwrap();
        count == 1
    }

    #[test]
    fn test_fresh_database_is_version_zero() {
        let conn = create_test_db();
        assert_eq!(schema_version(&conn).unwrap(), 0);
    }

    #[test]
    fn test_initialize_creates_tables() {
        let mut conn = create_test_db();
        initialize_schema(&mut conn).expect("failed to initialize schema");

        assert!(table_exists(&conn, "flight_logs"));
        assert!(table_exists(&conn, "flight_samples"));
        assert_eq!(schema_version(&conn).unwrap(), current_version());
    }

    #[test]
    fn test_initialize_idempotent() {
        let mut conn = create_test_db();
        initialize_schema(&mut conn).expect("first init failed");
        initialize_schema(&mut conn).expect("second init failed");
        assert_eq!(schema_version(&conn).unwrap(), current_version());
    }

    #[test]
    fn test_newer_database_rejected() {
        let mut conn = create_test_db();
        conn.pragma_update(None, "user_version", current_version() + 5)
            .unwrap();

        let err = initialize_schema(&mut conn).unwrap_err();
        assert!(matches!(err, Error::DatabaseMigration { .. }));
        assert!(err.to_string().contains("newer than this build"));
    }

    #[test]
    fn test_indexes_created() {
        let mut conn = create_test_db();
        initialize_schema(&mut conn).unwrap();

        let indexes: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='index' AND name LIKE 'idx_%'")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(std::result::Result::ok)
            .collect();

        assert!(indexes.iter().any(|n| n == "idx_flight_samples_flight"));
        assert!(indexes.iter().any(|n| n == "idx_flight_logs_base"));
    }
}
