//! `SQLite` schema definitions for the flight log store.

/// One row per stored flight record, original or conflict fork.
///
/// `base_key` is the derived flight key; it equals `flight_key` for an
/// original record and names the forked original for a conflict record.
pub const CREATE_FLIGHT_LOGS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS flight_logs (
    flight_key TEXT PRIMARY KEY,
    base_key TEXT NOT NULL,
    metadata TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)
";

/// Serialized samples; insertion order is the `id` order.
pub const CREATE_FLIGHT_SAMPLES_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS flight_samples (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    flight_key TEXT NOT NULL REFERENCES flight_logs(flight_key),
    payload TEXT NOT NULL
)
";

/// Index for reading one flight's samples in order.
pub const CREATE_SAMPLES_FLIGHT_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_flight_samples_flight ON flight_samples(flight_key, id)
";

/// Index for finding the conflict forks of a base key.
pub const CREATE_LOGS_BASE_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_flight_logs_base ON flight_logs(base_key)
";

/// Statements making up schema version 1.
pub const SCHEMA_V1: &[&str] = &[
    CREATE_FLIGHT_LOGS_TABLE,
    CREATE_FLIGHT_SAMPLES_TABLE,
    CREATE_SAMPLES_FLIGHT_INDEX,
    CREATE_LOGS_BASE_INDEX,
];
