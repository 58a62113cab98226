//! Error types for flightstream.
//!
//! Transport and decode failures are contained inside the stream client and
//! only ever logged; store and configuration failures are returned to the
//! caller that asked for the operation.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for flightstream operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Stream Errors ===
    /// An inbound payload could not be decoded.
    #[error("failed to decode telemetry payload: {0}")]
    Decode(#[source] serde_json::Error),

    /// The transport failed to connect, send, or receive.
    #[error("connection to {endpoint} failed: {message}")]
    Connection {
        /// The endpoint the connection targets.
        endpoint: String,
        /// Description of what went wrong.
        message: String,
    },

    // === Identity Errors ===
    /// Flight metadata lacks a field required to derive its key.
    #[error("flight metadata is missing required field '{field}'")]
    MissingIdentity {
        /// The missing field name.
        field: &'static str,
    },

    // === Storage Errors ===
    /// Failed to open or create the database.
    #[error("failed to open database at {path}: {source}")]
    DatabaseOpen {
        /// Path to the database file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// A database query failed.
    #[error("database query failed: {0}")]
    DatabaseQuery(#[from] rusqlite::Error),

    /// Failed to run database migrations.
    #[error("database migration failed: {message}")]
    DatabaseMigration {
        /// Description of what went wrong.
        message: String,
    },

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A stored record could not be serialized or deserialized.
    #[error("stored record is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === Generic Errors ===
    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for flightstream operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a connection error for the given endpoint.
    #[must_use]
    pub fn connection(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connection {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Check if this error means a flight key could not be derived.
    #[must_use]
    pub fn is_missing_identity(&self) -> bool {
        matches!(self, Self::MissingIdentity { .. })
    }

    /// Check if this error came from the durable store.
    #[must_use]
    pub fn is_store_error(&self) -> bool {
        matches!(
            self,
            Self::DatabaseOpen { .. }
                | Self::DatabaseQuery(_)
                | Self::DatabaseMigration { .. }
                | Self::DirectoryCreate { .. }
                | Self::Json(_)
        )
    }

    /// Check if this error is a transport or decode failure.
    ///
    /// These never escape the stream client; they are logged and retried.
    #[must_use]
    pub fn is_transport_error(&self) -> bool {
        matches!(self, Self::Decode(_) | Self::Connection { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn json_error() -> serde_json::Error {
        serde_json::from_str::<serde_json::Value>("{not json").unwrap_err()
    }

    #[test]
    fn test_missing_identity_display() {
        let err = Error::MissingIdentity { field: "date" };
        assert_eq!(
            err.to_string(),
            "flight metadata is missing required field 'date'"
        );
        assert!(err.is_missing_identity());
        assert!(!err.is_store_error());
    }

    #[test]
    fn test_connection_error_display() {
        let err = Error::connection("ws://localhost:8765", "connection refused");
        let msg = err.to_string();
        assert!(msg.contains("ws://localhost:8765"));
        assert!(msg.contains("connection refused"));
        assert!(err.is_transport_error());
    }

    #[test]
    fn test_decode_is_transport_error() {
        let err = Error::Decode(json_error());
        assert!(err.is_transport_error());
        assert!(!err.is_store_error());
        assert!(err.to_string().starts_with("failed to decode telemetry payload"));
    }

    #[test]
    fn test_json_is_store_error() {
        let err: Error = json_error().into();
        assert!(matches!(err, Error::Json(_)));
        assert!(err.is_store_error());
        assert!(!err.is_transport_error());
    }

    #[test]
    fn test_from_rusqlite_error() {
        let result = rusqlite::Connection::open_with_flags(
            "/nonexistent/path/flightlogs.db",
            rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY,
        );
        if let Err(sqlite_err) = result {
            let err: Error = sqlite_err.into();
            assert!(matches!(err, Error::DatabaseQuery(_)));
            assert!(err.is_store_error());
        }
    }

    #[test]
    fn test_database_migration_error_display() {
        let err = Error::DatabaseMigration {
            message: "user_version 7 is newer than this build".to_string(),
        };
        assert!(err.to_string().contains("user_version 7"));
        assert!(err.is_store_error());
    }

    #[test]
    fn test_config_validation_error_display() {
        let err = Error::ConfigValidation {
            message: "buffer_capacity must be greater than 0".to_string(),
        };
        assert!(err.to_string().contains("buffer_capacity"));
        assert!(!err.is_store_error());
    }

    #[test]
    fn test_directory_create_error_display() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err = Error::DirectoryCreate {
            path: PathBuf::from("/root/forbidden"),
            source: io_err,
        };
        assert!(err.to_string().contains("/root/forbidden"));
        assert!(err.is_store_error());
    }

    #[test]
    fn test_internal_error() {
        let err = Error::internal("writer lock poisoned");
        assert_eq!(err.to_string(), "internal error: writer lock poisoned");
    }
}
