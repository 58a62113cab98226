//! Live telemetry streaming.
//!
//! - [`transport`]: connector and link abstraction, WebSocket implementation
//! - [`supervisor`]: connect / pump / reconnect loop
//! - [`buffer`]: sliding window of recent samples
//! - [`control`]: pause/resume directives
//! - [`client`]: the composed [`TelemetryStreamClient`]

pub mod buffer;
pub mod client;
pub mod control;
pub mod supervisor;
pub mod transport;

pub use buffer::TelemetryBuffer;
pub use client::{ClientOptions, SampleObserver, StreamCore, StreamEvent, TelemetryStreamClient};
pub use control::{ControlChannel, ListeningState};
pub use supervisor::{ConnectionState, ConnectionSupervisor, LinkHandler};
pub use transport::{Connector, Link, WsConnector};
