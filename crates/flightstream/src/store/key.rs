//! Flight key derivation.

use crate::error::{Error, Result};
use crate::telemetry::{FlightMetadata, DATE_FIELD, MODEL_FIELD};

/// Placeholder used when metadata carries no segment.
pub const MISSING_SEGMENT: &str = "N/A";

/// Separator between a base key and the timestamp of a conflict fork.
pub const CONFLICT_MARKER: &str = "_conflict_";

/// Derive the stable identity key `<model>_<date>_<segment>` for a flight.
///
/// # Errors
///
/// Returns [`Error::MissingIdentity`] if `model` or `date` is absent. The
/// caller must abort the write rather than fall back to a placeholder key.
pub fn derive_key(metadata: &FlightMetadata) -> Result<String> {
    let model = metadata
        .model()
        .ok_or(Error::MissingIdentity { field: MODEL_FIELD })?;
    let date = metadata
        .date()
        .ok_or(Error::MissingIdentity { field: DATE_FIELD })?;
    let segment = metadata
        .segment()
        .unwrap_or_else(|| MISSING_SEGMENT.to_string());

    Ok(format!("{model}_{date}_{segment}"))
}

/// Key for a conflict fork of `base_key` created at `timestamp_ms`.
#[must_use]
pub fn conflict_key(base_key: &str, timestamp_ms: i64) -> String {
    format!("{base_key}{CONFLICT_MARKER}{timestamp_ms}")
}
