//! Connection lifecycle and auto-reconnect.
//!
//! The supervisor owns one physical connection at a time. Whenever that
//! connection closes, for any reason, it waits a fixed delay and connects
//! again, forever, until cancelled. Because a single task runs the loop there
//! is never more than one connect in flight or one reconnect timer pending.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::transport::{Connector, Link};

/// Reconnect delay used by the live stream.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Physical connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// No connection and no attempt in progress.
    #[default]
    Disconnected,
    /// A connection attempt is in flight.
    Connecting,
    /// A connection is open.
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
        }
    }
}

/// Receives connection events from the supervisor.
///
/// Events arrive sequentially from the supervisor task; a returned frame is
/// sent on the open connection before the next event is delivered.
pub trait LinkHandler: Send + 'static {
    /// A connection opened. Returns a frame to send, if any.
    fn on_open(&mut self) -> Option<String>;

    /// A payload arrived. Returns a frame to send back, if any.
    fn on_message(&mut self, payload: &str) -> Option<String>;

    /// The connection closed or an attempt failed.
    fn on_close(&mut self);
}

/// Runs the connect / pump / reconnect loop for one endpoint.
pub struct ConnectionSupervisor {
    connector: Arc<dyn Connector>,
    reconnect_delay: Duration,
    state: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for ConnectionSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSupervisor")
            .field("endpoint", &self.connector.endpoint())
            .field("reconnect_delay", &self.reconnect_delay)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}

impl ConnectionSupervisor {
    /// Create a supervisor; nothing connects until [`run`](Self::run).
    #[must_use]
    pub fn new(connector: Arc<dyn Connector>, reconnect_delay: Duration) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            connector,
            reconnect_delay,
            state,
            cancel: CancellationToken::new(),
        }
    }

    /// Watch connection state transitions.
    #[must_use]
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Token that stops the loop, closes the open connection and cancels any
    /// pending reconnect.
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run until cancelled.
    ///
    /// Frames arriving on `outbound` are written to the open connection.
    /// Frames sent while no connection is open are discarded when the next
    /// connection opens.
    pub async fn run<H: LinkHandler>(
        self,
        mut handler: H,
        mut outbound: mpsc::UnboundedReceiver<String>,
    ) {
        let endpoint = self.connector.endpoint().to_string();

        loop {
            self.state.send_replace(ConnectionState::Connecting);
            debug!("Connecting to {}", endpoint);

            let attempt = tokio::select! {
                () = self.cancel.cancelled() => break,
                attempt = self.connector.connect() => attempt,
            };

            match attempt {
                Ok(mut link) => {
                    while outbound.try_recv().is_ok() {}
                    self.state.send_replace(ConnectionState::Connected);
                    info!("Connected to {}", endpoint);

                    let greeting = handler.on_open();
                    let cancelled = self
                        .pump(link.as_mut(), &mut handler, &mut outbound, greeting)
                        .await;

                    handler.on_close();
                    self.state.send_replace(ConnectionState::Disconnected);
                    if cancelled {
                        link.close().await;
                        info!("Closed connection to {}", endpoint);
                        break;
                    }
                }
                Err(e) => {
                    warn!("Connection attempt failed: {}", e);
                    handler.on_close();
                    self.state.send_replace(ConnectionState::Disconnected);
                }
            }

            warn!(
                "Disconnected from {}, reconnecting in {:?}",
                endpoint, self.reconnect_delay
            );
            tokio::select! {
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(self.reconnect_delay) => {}
            }
        }

        self.state.send_replace(ConnectionState::Disconnected);
        debug!("Supervisor for {} stopped", endpoint);
    }

    /// Shuttle frames until the link ends. Returns `true` if cancelled.
    async fn pump<H: LinkHandler>(
        &self,
        link: &mut dyn Link,
        handler: &mut H,
        outbound: &mut mpsc::UnboundedReceiver<String>,
        greeting: Option<String>,
    ) -> bool {
        if let Some(frame) = greeting {
            if let Err(e) = link.send(frame).await {
                warn!("Failed to send on open: {}", e);
                return false;
            }
        }

        loop {
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => return true,

                Some(frame) = outbound.recv() => {
                    if let Err(e) = link.send(frame).await {
                        warn!("Failed to send control frame: {}", e);
                        return false;
                    }
                }

                message = link.recv() => match message {
                    Some(Ok(payload)) => {
                        if let Some(reply) = handler.on_message(&payload) {
                            if let Err(e) = link.send(reply).await {
                                warn!("Failed to send reply: {}", e);
                                return false;
                            }
                        }
                    }
                    Some(Err(e)) => {
                        warn!("Connection error: {}", e);
                        return false;
                    }
                    None => {
                        info!("Peer closed the connection");
                        return false;
                    }
                },
            }
        }
    }
}
