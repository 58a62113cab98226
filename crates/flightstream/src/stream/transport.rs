//! Transport abstraction for the telemetry stream.
//!
//! A [`Connector`] opens [`Link`]s to one endpoint. The production transport
//! is a WebSocket client; tests substitute scripted in-process links.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};

/// One open connection carrying text payloads in both directions.
#[async_trait]
pub trait Link: Send {
    /// Send one text frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the frame cannot be written.
    async fn send(&mut self, frame: String) -> Result<()>;

    /// Receive the next payload.
    ///
    /// Returns `None` once the peer has closed the connection.
    async fn recv(&mut self) -> Option<Result<String>>;

    /// Close the connection.
    async fn close(&mut self);
}

/// Opens links to a configured endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
    /// The endpoint links are opened to.
    fn endpoint(&self) -> &str;

    /// Establish one connection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the endpoint is unreachable or the
    /// handshake fails.
    async fn connect(&self) -> Result<Box<dyn Link>>;
}

/// WebSocket connector.
#[derive(Debug, Clone)]
pub struct WsConnector {
    endpoint: String,
}

impl WsConnector {
    /// Create a connector for a `ws://` endpoint.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl Connector for WsConnector {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn connect(&self) -> Result<Box<dyn Link>> {
        let (stream, response) = tokio_tungstenite::connect_async(self.endpoint.as_str())
            .await
            .map_err(|e| Error::connection(&self.endpoint, e.to_string()))?;
        debug!(status = %response.status(), "WebSocket handshake with {} complete", self.endpoint);

        Ok(Box::new(WsLink {
            endpoint: self.endpoint.clone(),
            stream,
        }))
    }
}

/// An open WebSocket connection.
pub struct WsLink {
    endpoint: String,
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl std::fmt::Debug for WsLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsLink")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Link for WsLink {
    async fn send(&mut self, frame: String) -> Result<()> {
        trace!("-> {}", frame);
        self.stream
            .send(Message::Text(frame.into()))
            .await
            .map_err(|e| Error::connection(&self.endpoint, e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.to_string())),
                // Binary frames carry the same JSON; invalid UTF-8 is dropped.
                Ok(Message::Binary(data)) => match String::from_utf8(data.into()) {
                    Ok(text) => return Some(Ok(text)),
                    Err(e) => warn!("Dropping binary frame from {}: {}", self.endpoint, e),
                },
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "{} sent close", self.endpoint);
                    return None;
                }
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
                Err(e) => return Some(Err(Error::connection(&self.endpoint, e.to_string()))),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            debug!("Error closing {}: {}", self.endpoint, e);
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted in-process links.

    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use super::{Connector, Link};
    use crate::error::{Error, Result};

    pub(crate) const ENDPOINT: &str = "ws://scripted.test";

    /// Hands out pre-built links, then refuses connections.
    pub(crate) struct ScriptedConnector {
        links: Mutex<VecDeque<ScriptedLink>>,
        attempts: Arc<AtomicUsize>,
    }

    impl ScriptedConnector {
        pub(crate) fn new(links: Vec<ScriptedLink>) -> Self {
            Self {
                links: Mutex::new(links.into()),
                attempts: Arc::new(AtomicUsize::new(0)),
            }
        }

        pub(crate) fn attempts(&self) -> Arc<AtomicUsize> {
            Arc::clone(&self.attempts)
        }
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        fn endpoint(&self) -> &str {
            ENDPOINT
        }

        async fn connect(&self) -> Result<Box<dyn Link>> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let next = self.links.lock().unwrap().pop_front();
            match next {
                Some(link) => Ok(Box::new(link)),
                None => Err(Error::connection(ENDPOINT, "connection refused")),
            }
        }
    }

    pub(crate) struct ScriptedLink {
        inbound: mpsc::UnboundedReceiver<String>,
        outbound: mpsc::UnboundedSender<String>,
    }

    /// The test's end of a scripted link. Dropping it closes the link.
    pub(crate) struct LinkRemote {
        pub(crate) inbound: mpsc::UnboundedSender<String>,
        pub(crate) outbound: mpsc::UnboundedReceiver<String>,
    }

    pub(crate) fn scripted_link() -> (ScriptedLink, LinkRemote) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        (
            ScriptedLink {
                inbound: inbound_rx,
                outbound: outbound_tx,
            },
            LinkRemote {
                inbound: inbound_tx,
                outbound: outbound_rx,
            },
        )
    }

    #[async_trait]
    impl Link for ScriptedLink {
        async fn send(&mut self, frame: String) -> Result<()> {
            self.outbound
                .send(frame)
                .map_err(|_| Error::connection(ENDPOINT, "remote dropped"))
        }

        async fn recv(&mut self) -> Option<Result<String>> {
            self.inbound.recv().await.map(Ok)
        }

        async fn close(&mut self) {
            self.inbound.close();
        }
    }
}
