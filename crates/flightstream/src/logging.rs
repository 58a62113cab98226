//! Logging setup for flightstream.
//!
//! Everything logs through `tracing`. The binary installs a fmt subscriber
//! filtered to the `flightstream` target at the chosen verbosity; `RUST_LOG`
//! replaces that filter entirely when set.

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Log target shared by the library and the binary.
const LOG_TARGET: &str = "flightstream";

/// Verbosity level for logging output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// Errors only.
    Quiet,
    /// Info and above: connects, disconnects, reconnect scheduling.
    #[default]
    Normal,
    /// Debug and above: metadata changes, handshakes.
    Verbose,
    /// Everything, including each frame sent.
    Trace,
}

impl Verbosity {
    /// Pick a verbosity from CLI flags. `quiet` wins over any `-v` count.
    #[must_use]
    pub fn from_flags(quiet: bool, verbose: u8) -> Self {
        match (quiet, verbose) {
            (true, _) => Self::Quiet,
            (false, 0) => Self::Normal,
            (false, 1) => Self::Verbose,
            (false, _) => Self::Trace,
        }
    }

    /// The tracing level for this verbosity.
    #[must_use]
    pub fn level(self) -> Level {
        match self {
            Self::Quiet => Level::ERROR,
            Self::Normal => Level::INFO,
            Self::Verbose => Level::DEBUG,
            Self::Trace => Level::TRACE,
        }
    }

    fn directive(self) -> String {
        format!("{LOG_TARGET}={}", self.level())
    }
}

/// Initialize the logging system.
///
/// Call once at startup. Log lines go to stderr so that sample output on
/// stdout stays machine readable.
///
/// # Examples
///
/// ```no_run
/// use flightstream::{init_logging, logging::Verbosity};
///
/// init_logging(Verbosity::Verbose);
/// ```
pub fn init_logging(verbosity: Verbosity) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(verbosity.directive()));

    let subscriber = tracing_subscriber::registry().with(env_filter).with(
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false),
    );

    // Already installed is fine.
    let _ = subscriber.try_init();
}

/// Initialize logging for tests, warnings and errors only.
#[cfg(test)]
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("warn")
        .with_test_writer()
        .try_init();
}
