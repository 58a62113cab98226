//! `flightstream` - Live flight telemetry with a durable per-flight log
//!
//! This library provides a reconnecting telemetry stream client with a
//! pause/resume control protocol, and a SQLite-backed store that records
//! samples keyed by flight identity, forking a new record whenever a flight's
//! metadata changes under an existing key.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod replay;
pub mod store;
pub mod stream;
pub mod telemetry;

pub use config::Config;
pub use error::{Error, Result};
pub use logging::init_logging;
pub use replay::ReplaySession;
pub use store::{AppendOutcome, FlightLogStore, FlightRecord, StoreStats};
pub use stream::{ClientOptions, StreamEvent, TelemetryStreamClient};
pub use telemetry::{ControlDirective, FlightMetadata, TelemetrySample};
