//! Durable flight log store.
//!
//! Flight records are kept in `SQLite`, keyed by the flight key derived from
//! their metadata. Every stored record holds samples for exactly one metadata
//! identity: an append whose metadata disagrees with the record already under
//! its key is written to a new conflict fork instead of mutating the original.

pub mod conflict;
pub mod key;
pub mod migrations;
pub mod schema;

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::telemetry::{FlightMetadata, TelemetrySample};

/// A stored flight: its metadata and every sample appended under it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlightRecord {
    /// Key the record is stored under.
    pub flight_key: String,
    /// Derived flight key; differs from `flight_key` only for conflict forks.
    pub base_key: String,
    /// Metadata identity shared by every sample in the record.
    pub metadata: FlightMetadata,
    /// Samples in original append order.
    pub samples: Vec<TelemetrySample>,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When a sample was last appended.
    pub updated_at: DateTime<Utc>,
}

impl FlightRecord {
    /// Whether this record is a conflict fork of another flight.
    #[must_use]
    pub fn is_conflict_fork(&self) -> bool {
        self.flight_key != self.base_key
    }
}

/// What an append did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    /// A new record was created for a previously unseen key.
    Created {
        /// Key of the new record.
        flight_key: String,
    },
    /// The sample was appended to an existing record with matching metadata.
    Appended {
        /// Key of the extended record.
        flight_key: String,
        /// Number of samples the record now holds.
        sample_count: usize,
    },
    /// Metadata disagreed with the existing record; a fork was created.
    Forked {
        /// Key of the new conflict record.
        flight_key: String,
        /// Key of the untouched original record.
        base_key: String,
    },
}

impl AppendOutcome {
    /// Key of the record the sample landed in.
    #[must_use]
    pub fn flight_key(&self) -> &str {
        match self {
            Self::Created { flight_key }
            | Self::Appended { flight_key, .. }
            | Self::Forked { flight_key, .. } => flight_key,
        }
    }
}

/// Statistics about the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    /// Number of stored records, forks included.
    pub total_records: usize,
    /// Number of records that are conflict forks.
    pub conflict_forks: usize,
    /// Number of samples across all records.
    pub total_samples: usize,
    /// Size of the database file in bytes.
    pub db_size_bytes: u64,
}

/// Keyed append-log of flight records.
///
/// All writes go through one connection behind a mutex, and each append runs
/// its lookup-then-write inside an immediate transaction, so concurrent
/// appends for the same key are serialized and never lose a sample.
#[derive(Debug)]
pub struct FlightLogStore {
    /// Path to the database file.
    path: PathBuf,
    /// The single writer connection.
    conn: Mutex<Connection>,
}

impl FlightLogStore {
    /// Open or create a store at the given path.
    ///
    /// Creates parent directories as needed and brings the schema up to date.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening flight log store at {}", path.display());
        let mut conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        migrations::initialize_schema(&mut conn)?;

        info!("Flight log store opened at {}", path.display());
        Ok(Self {
            path,
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;
        migrations::initialize_schema(&mut conn)?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn: Mutex::new(conn),
        })
    }

    /// Get the path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one sample under the flight identified by `metadata`.
    ///
    /// Creates the record on first use, extends it when the stored metadata
    /// is equivalent, and otherwise writes a new record under
    /// `<key>_conflict_<unix millis>`, leaving the original untouched.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingIdentity`] before touching the database if the
    /// key cannot be derived, or a store error if the write fails. Nothing is
    /// written when an error is returned.
    pub fn append(
        &self,
        metadata: &FlightMetadata,
        sample: &TelemetrySample,
    ) -> Result<AppendOutcome> {
        let base_key = key::derive_key(metadata)?;
        let metadata_json = serde_json::to_string(metadata)?;
        let sample_json = serde_json::to_string(sample)?;
        let now = Utc::now();

        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let stored: Option<String> = tx
            .query_row(
                "SELECT metadata FROM flight_logs WHERE flight_key = ?1",
                [&base_key],
                |row| row.get(0),
            )
            .optional()?;

        let outcome = match stored {
            None => {
                Self::insert_record(&tx, &base_key, &base_key, &metadata_json, now)?;
                Self::insert_sample(&tx, &base_key, &sample_json, now)?;
                AppendOutcome::Created {
                    flight_key: base_key,
                }
            }
            Some(stored) => {
                let stored: FlightMetadata = serde_json::from_str(&stored)?;
                if conflict::equivalent(&stored, metadata) {
                    Self::insert_sample(&tx, &base_key, &sample_json, now)?;
                    let sample_count = Self::sample_count(&tx, &base_key)?;
                    AppendOutcome::Appended {
                        flight_key: base_key,
                        sample_count,
                    }
                } else {
                    let fork_key = Self::free_conflict_key(&tx, &base_key, now.timestamp_millis())?;
                    Self::insert_record(&tx, &fork_key, &base_key, &metadata_json, now)?;
                    Self::insert_sample(&tx, &fork_key, &sample_json, now)?;
                    AppendOutcome::Forked {
                        flight_key: fork_key,
                        base_key,
                    }
                }
            }
        };

        tx.commit()?;

        match &outcome {
            AppendOutcome::Created { flight_key } => info!("Created flight log {}", flight_key),
            AppendOutcome::Appended {
                flight_key,
                sample_count,
            } => debug!("Appended sample {} to {}", sample_count, flight_key),
            AppendOutcome::Forked {
                flight_key,
                base_key,
            } => warn!(
                "Metadata for {} changed; wrote conflict fork {}",
                base_key, flight_key
            ),
        }
        Ok(outcome)
    }

    /// Get one record with its samples in append order.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails or a stored payload
    /// is corrupt.
    pub fn get(&self, flight_key: &str) -> Result<Option<FlightRecord>> {
        let conn = self.lock()?;
        let header = conn
            .query_row(
                r"
                SELECT flight_key, base_key, metadata, created_at, updated_at
                FROM flight_logs WHERE flight_key = ?1
                ",
                [flight_key],
                RecordHeader::from_row,
            )
            .optional()?;

        header
            .map(|header| header.into_record(&conn))
            .transpose()
    }

    /// Get every stored record, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails or a stored payload
    /// is corrupt.
    pub fn get_all(&self) -> Result<Vec<FlightRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r"
            SELECT flight_key, base_key, metadata, created_at, updated_at
            FROM flight_logs ORDER BY created_at ASC, flight_key ASC
            ",
        )?;

        let headers = stmt
            .query_map([], RecordHeader::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        headers
            .into_iter()
            .map(|header| header.into_record(&conn))
            .collect()
    }

    /// Keys of the conflict forks created for `base_key`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn forks_of(&self, base_key: &str) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            r"
            SELECT flight_key FROM flight_logs
            WHERE base_key = ?1 AND flight_key != base_key
            ORDER BY created_at ASC, flight_key ASC
            ",
        )?;
        let keys = stmt
            .query_map([base_key], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(keys)
    }

    /// Delete a record and its samples.
    ///
    /// Returns `true` if a record was deleted, `false` if not found.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn delete(&self, flight_key: &str) -> Result<bool> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            "DELETE FROM flight_samples WHERE flight_key = ?1",
            [flight_key],
        )?;
        let affected = tx.execute("DELETE FROM flight_logs WHERE flight_key = ?1", [flight_key])?;
        tx.commit()?;

        if affected > 0 {
            info!("Deleted flight log {}", flight_key);
        }
        Ok(affected > 0)
    }

    /// Count stored records, forks included.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn count(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM flight_logs", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Get store statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.lock()?;
        let (total_records, conflict_forks): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(flight_key != base_key), 0) FROM flight_logs",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let total_samples: i64 =
            conn.query_row("SELECT COUNT(*) FROM flight_samples", [], |row| row.get(0))?;

        let db_size_bytes = if self.path.to_string_lossy() == ":memory:" {
            0
        } else {
            std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
        };

        Ok(StoreStats {
            total_records: usize::try_from(total_records).unwrap_or(0),
            conflict_forks: usize::try_from(conflict_forks).unwrap_or(0),
            total_samples: usize::try_from(total_samples).unwrap_or(0),
            db_size_bytes,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::internal("flight log writer lock poisoned"))
    }

    fn insert_record(
        tx: &Transaction<'_>,
        flight_key: &str,
        base_key: &str,
        metadata_json: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let timestamp = now.to_rfc3339();
        tx.execute(
            r"
            INSERT INTO flight_logs (flight_key, base_key, metadata, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?4)
            ",
            params![flight_key, base_key, metadata_json, timestamp],
        )?;
        Ok(())
    }

    fn insert_sample(
        tx: &Transaction<'_>,
        flight_key: &str,
        sample_json: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        tx.execute(
            "INSERT INTO flight_samples (flight_key, payload) VALUES (?1, ?2)",
            params![flight_key, sample_json],
        )?;
        tx.execute(
            "UPDATE flight_logs SET updated_at = ?2 WHERE flight_key = ?1",
            params![flight_key, now.to_rfc3339()],
        )?;
        Ok(())
    }

    fn sample_count(tx: &Transaction<'_>, flight_key: &str) -> Result<usize> {
        let count: i64 = tx.query_row(
            "SELECT COUNT(*) FROM flight_samples WHERE flight_key = ?1",
            [flight_key],
            |row| row.get(0),
        )?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// First conflict key at or after `timestamp_ms` that is not yet taken.
    fn free_conflict_key(tx: &Transaction<'_>, base_key: &str, timestamp_ms: i64) -> Result<String> {
        let mut stamp = timestamp_ms;
        loop {
            let candidate = key::conflict_key(base_key, stamp);
            let taken: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM flight_logs WHERE flight_key = ?1)",
                [&candidate],
                |row| row.get(0),
            )?;
            if !taken {
                return Ok(candidate);
            }
            stamp += 1;
        }
    }
}

/// A `flight_logs` row before its samples are loaded.
struct RecordHeader {
    flight_key: String,
    base_key: String,
    metadata: String,
    created_at: String,
    updated_at: String,
}

impl RecordHeader {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            flight_key: row.get(0)?,
            base_key: row.get(1)?,
            metadata: row.get(2)?,
            created_at: row.get(3)?,
            updated_at: row.get(4)?,
        })
    }

    fn into_record(self, conn: &Connection) -> Result<FlightRecord> {
        let mut stmt = conn
            .prepare_cached("SELECT payload FROM flight_samples WHERE flight_key = ?1 ORDER BY id")?;
        let payloads = stmt
            .query_map([&self.flight_key], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let samples = payloads
            .iter()
            .map(|payload| serde_json::from_str(payload))
            .collect::<std::result::Result<Vec<TelemetrySample>, _>>()?;

        Ok(FlightRecord {
            metadata: serde_json::from_str(&self.metadata)?,
            created_at: parse_timestamp(&self.created_at),
            updated_at: parse_timestamp(&self.updated_at),
            flight_key: self.flight_key,
            base_key: self.base_key,
            samples,
        })
    }
}

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value).map_or_else(
        |_| {
            warn!("Unparseable stored timestamp {}, using now", value);
            Utc::now()
        },
        |dt| dt.with_timezone(&Utc),
    )
}
