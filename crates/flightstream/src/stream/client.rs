//! The public telemetry stream client.
//!
//! [`TelemetryStreamClient`] composes the connection supervisor, the sliding
//! buffer and the control channel. Message handling lives in [`StreamCore`],
//! which the supervisor task drives one event at a time; the client handle
//! reads snapshots of the same core.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::buffer::{TelemetryBuffer, DEFAULT_CAPACITY};
use super::control::{ControlChannel, ListeningState};
use super::supervisor::{ConnectionState, ConnectionSupervisor, LinkHandler, DEFAULT_RECONNECT_DELAY};
use super::transport::Connector;
use crate::config::StreamConfig;
use crate::telemetry::{ControlDirective, FlightMetadata, InboundMessage, TelemetrySample};

/// Status shown before any sample has reported an operation class.
pub const INITIAL_STATUS: &str = "N/A";

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Callback invoked with each sample accepted while listening, together with
/// the flight metadata held at that moment.
pub type SampleObserver = Arc<dyn Fn(&TelemetrySample, Option<&FlightMetadata>) + Send + Sync>;

/// Observable changes published by the client.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A connection opened.
    Connected,
    /// The open connection closed.
    Disconnected,
    /// New flight metadata replaced the held one.
    FlightInfoChanged(FlightMetadata),
    /// The status string changed.
    StatusChanged(String),
    /// A sample was accepted into the buffer.
    Sample(TelemetrySample),
    /// The local listening state flipped.
    ListeningChanged(bool),
}

/// Tunables for a stream client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    /// Number of recent samples kept for display.
    pub buffer_capacity: usize,
    /// Delay between a close and the next connection attempt.
    pub reconnect_delay: Duration,
    /// Start in the paused state.
    pub start_paused: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_CAPACITY,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            start_paused: false,
        }
    }
}

impl From<&StreamConfig> for ClientOptions {
    fn from(config: &StreamConfig) -> Self {
        Self {
            buffer_capacity: config.buffer_capacity,
            reconnect_delay: Duration::from_millis(config.reconnect_delay_ms),
            start_paused: config.start_paused,
        }
    }
}

/// Result of handling one inbound payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageOutcome {
    /// Control directive to send back on the open connection.
    pub directive: Option<ControlDirective>,
    /// The accepted sample and the metadata held when it was accepted.
    pub delivered: Option<(TelemetrySample, Option<FlightMetadata>)>,
}

/// Message-handling state of one client.
#[derive(Debug)]
pub struct StreamCore {
    buffer: TelemetryBuffer,
    control: ControlChannel,
    flight_info: Option<FlightMetadata>,
    status: String,
    connected: bool,
    dropped_while_paused: u64,
    decode_failures: u64,
    events: broadcast::Sender<StreamEvent>,
}

impl StreamCore {
    /// Create a core publishing to `events`.
    #[must_use]
    pub fn new(options: &ClientOptions, events: broadcast::Sender<StreamEvent>) -> Self {
        let initial = if options.start_paused {
            ListeningState::Paused
        } else {
            ListeningState::Listening
        };
        Self {
            buffer: TelemetryBuffer::new(options.buffer_capacity),
            control: ControlChannel::new(initial),
            flight_info: None,
            status: INITIAL_STATUS.to_string(),
            connected: false,
            dropped_while_paused: 0,
            decode_failures: 0,
            events,
        }
    }

    /// A connection opened: re-sync the listening state to the peer.
    pub fn on_open(&mut self) -> Option<ControlDirective> {
        self.connected = true;
        self.publish(StreamEvent::Connected);
        self.control.sync(self.connected)
    }

    /// The connection closed or an attempt failed.
    pub fn on_close(&mut self) {
        if self.connected {
            self.publish(StreamEvent::Disconnected);
        }
        self.connected = false;
    }

    /// Handle one inbound payload.
    ///
    /// Every payload re-syncs the listening state, whether or not it decodes
    /// and whether or not the client is paused. Malformed payloads are logged
    /// and dropped; payloads arriving while paused are decoded and dropped.
    pub fn on_message(&mut self, raw: &str) -> MessageOutcome {
        let directive = self.control.sync(self.connected);

        let message = match InboundMessage::decode(raw) {
            Ok(message) => message,
            Err(e) => {
                self.decode_failures += 1;
                warn!("Dropping payload: {}", e);
                return MessageOutcome {
                    directive,
                    delivered: None,
                };
            }
        };

        if !self.control.desired().is_listening() {
            self.dropped_while_paused += 1;
            trace!("Paused, dropping payload");
            return MessageOutcome {
                directive,
                delivered: None,
            };
        }

        if let Some(info) = message.flight_info {
            if self.flight_info.as_ref() != Some(&info) {
                debug!("Flight metadata changed");
                self.flight_info = Some(info.clone());
                self.publish(StreamEvent::FlightInfoChanged(info));
            }
        }

        let delivered = message.sensor_data.map(|sample| {
            self.buffer.push(sample.clone());
            if let Some(class) = sample.operation_class() {
                if class != self.status {
                    self.status.clone_from(&class);
                    self.publish(StreamEvent::StatusChanged(class));
                }
            }
            self.publish(StreamEvent::Sample(sample.clone()));
            (sample, self.flight_info.clone())
        });

        MessageOutcome {
            directive,
            delivered,
        }
    }

    /// Flip the listening state and sync it to the peer.
    pub fn toggle_listening(&mut self) -> Option<ControlDirective> {
        let directive = self.control.toggle(self.connected);
        self.publish(StreamEvent::ListeningChanged(
            self.control.desired().is_listening(),
        ));
        directive
    }

    /// Whether a connection is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Whether inbound telemetry is being processed.
    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.control.desired().is_listening()
    }

    /// The held flight metadata.
    #[must_use]
    pub fn flight_info(&self) -> Option<&FlightMetadata> {
        self.flight_info.as_ref()
    }

    /// The current status string.
    #[must_use]
    pub fn status(&self) -> &str {
        &self.status
    }

    /// The sample window.
    #[must_use]
    pub fn buffer(&self) -> &TelemetryBuffer {
        &self.buffer
    }

    /// Payloads decoded and dropped because the client was paused.
    #[must_use]
    pub fn dropped_while_paused(&self) -> u64 {
        self.dropped_while_paused
    }

    /// Payloads that failed to decode.
    #[must_use]
    pub fn decode_failures(&self) -> u64 {
        self.decode_failures
    }

    /// Control directives produced for transmission.
    #[must_use]
    pub fn directives_sent(&self) -> u64 {
        self.control.directives_sent()
    }

    fn publish(&self, event: StreamEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

fn lock_core(core: &Mutex<StreamCore>) -> MutexGuard<'_, StreamCore> {
    core.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Bridges supervisor events into the shared core and the sample observers.
struct CoreHandler {
    core: Arc<Mutex<StreamCore>>,
    observers: Arc<RwLock<Vec<SampleObserver>>>,
}

impl LinkHandler for CoreHandler {
    fn on_open(&mut self) -> Option<String> {
        lock_core(&self.core).on_open().map(ControlDirective::to_frame)
    }

    fn on_message(&mut self, payload: &str) -> Option<String> {
        let outcome = lock_core(&self.core).on_message(payload);

        if let Some((sample, flight_info)) = &outcome.delivered {
            let observers = self
                .observers
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            for observer in &observers {
                observer(sample, flight_info.as_ref());
            }
        }

        outcome.directive.map(ControlDirective::to_frame)
    }

    fn on_close(&mut self) {
        lock_core(&self.core).on_close();
    }
}

/// Live telemetry stream client.
///
/// Create it, register observers, then call [`connect`](Self::connect) from
/// within a tokio runtime. Dropping the client or calling
/// [`shutdown`](Self::shutdown) closes the connection and cancels any pending
/// reconnect.
pub struct TelemetryStreamClient {
    endpoint: String,
    core: Arc<Mutex<StreamCore>>,
    observers: Arc<RwLock<Vec<SampleObserver>>>,
    events: broadcast::Sender<StreamEvent>,
    outbound: mpsc::UnboundedSender<String>,
    pending: Option<(ConnectionSupervisor, mpsc::UnboundedReceiver<String>)>,
    state: watch::Receiver<ConnectionState>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for TelemetryStreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryStreamClient")
            .field("endpoint", &self.endpoint)
            .field("state", &*self.state.borrow())
            .field("listening", &self.is_listening())
            .finish_non_exhaustive()
    }
}

impl TelemetryStreamClient {
    /// Create a client for the connector's endpoint.
    #[must_use]
    pub fn new(connector: Arc<dyn Connector>, options: &ClientOptions) -> Self {
        let endpoint = connector.endpoint().to_string();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let core = Arc::new(Mutex::new(StreamCore::new(options, events.clone())));
        let supervisor = ConnectionSupervisor::new(connector, options.reconnect_delay);
        let state = supervisor.state();
        let cancel = supervisor.cancel_token();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        Self {
            endpoint,
            core,
            observers: Arc::new(RwLock::new(Vec::new())),
            events,
            outbound,
            pending: Some((supervisor, outbound_rx)),
            state,
            cancel,
            task: None,
        }
    }

    /// Start the connection loop. Calling it again is a no-op.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(&mut self) {
        let Some((supervisor, outbound_rx)) = self.pending.take() else {
            debug!("Stream client for {} already started", self.endpoint);
            return;
        };

        let handler = CoreHandler {
            core: Arc::clone(&self.core),
            observers: Arc::clone(&self.observers),
        };
        self.task = Some(tokio::spawn(supervisor.run(handler, outbound_rx)));
    }

    /// Register a callback for every sample accepted while listening.
    pub fn on_sample<F>(&self, observer: F)
    where
        F: Fn(&TelemetrySample, Option<&FlightMetadata>) + Send + Sync + 'static,
    {
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(observer));
    }

    /// Subscribe to client events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.events.subscribe()
    }

    /// Watch connection state transitions.
    #[must_use]
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Flip listening on or off and tell the peer if connected.
    pub fn toggle_listening(&self) {
        let directive = lock_core(&self.core).toggle_listening();
        if let Some(directive) = directive {
            if self.outbound.send(directive.to_frame()).is_err() {
                debug!("Supervisor stopped, dropping {} directive", directive);
            }
        }
    }

    /// The endpoint this client streams from.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Whether a connection is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        lock_core(&self.core).is_connected()
    }

    /// Whether inbound telemetry is being processed.
    #[must_use]
    pub fn is_listening(&self) -> bool {
        lock_core(&self.core).is_listening()
    }

    /// The held flight metadata.
    #[must_use]
    pub fn flight_info(&self) -> Option<FlightMetadata> {
        lock_core(&self.core).flight_info().cloned()
    }

    /// The buffered samples, oldest first.
    #[must_use]
    pub fn samples(&self) -> Vec<TelemetrySample> {
        lock_core(&self.core).buffer().to_vec()
    }

    /// The most recent sample.
    #[must_use]
    pub fn latest(&self) -> Option<TelemetrySample> {
        lock_core(&self.core).buffer().latest().cloned()
    }

    /// The current status string.
    #[must_use]
    pub fn status(&self) -> String {
        lock_core(&self.core).status().to_string()
    }

    /// Close the connection, cancel any pending reconnect and wait for the
    /// connection task to finish.
    pub async fn shutdown(&mut self) {
        self.cancel.cancel();
        self.pending = None;
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("Stream task for {} ended abnormally: {}", self.endpoint, e);
            }
        }
    }
}

impl Drop for TelemetryStreamClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::transport::testing::{scripted_link, ScriptedConnector};
    use serde_json::json;
    use std::sync::atomic::Ordering;

    const RESUME: &str = r#"{"control":"resume"}"#;
    const PAUSE: &str = r#"{"control":"pause"}"#;

    fn core(options: &ClientOptions) -> (StreamCore, broadcast::Receiver<StreamEvent>) {
        let (events, rx) = broadcast::channel(64);
        (StreamCore::new(options, events), rx)
    }

    fn payload(seq: u64, class: &str) -> String {
        json!({
            "flight_info": {"model": "X", "date": "2024-01-01"},
            "sensor_data": {"seq": seq, "operation_class": class}
        })
        .to_string()
    }

    fn drain(rx: &mut broadcast::Receiver<StreamEvent>) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_message_while_listening() {
        let (mut core, mut rx) = core(&ClientOptions::default());
        assert_eq!(core.on_open(), Some(ControlDirective::Resume));

        let outcome = core.on_message(&payload(1, "takeoff"));
        assert_eq!(outcome.directive, Some(ControlDirective::Resume));
        let (sample, info) = outcome.delivered.unwrap();
        assert_eq!(sample.payload()["seq"], 1);
        assert_eq!(info.unwrap().model().as_deref(), Some("X"));

        assert_eq!(core.buffer().len(), 1);
        assert_eq!(core.status(), "takeoff");

        let events = drain(&mut rx);
        assert_eq!(events[0], StreamEvent::Connected);
        assert!(matches!(events[1], StreamEvent::FlightInfoChanged(_)));
        assert_eq!(events[2], StreamEvent::StatusChanged("takeoff".into()));
        assert!(matches!(events[3], StreamEvent::Sample(_)));
    }

    #[test]
    fn test_equal_metadata_not_replaced() {
        let (mut core, mut rx) = core(&ClientOptions::default());
        core.on_open();
        core.on_message(&payload(1, "cruise"));
        core.on_message(
            &json!({
                "flight_info": {"date": "2024-01-01", "model": "X"},
                "sensor_data": {"seq": 2, "operation_class": "cruise"}
            })
            .to_string(),
        );

        let changes = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, StreamEvent::FlightInfoChanged(_)))
            .count();
        assert_eq!(changes, 1);
        assert_eq!(core.buffer().len(), 2);
    }

    #[test]
    fn test_different_metadata_replaced() {
        let (mut core, _rx) = core(&ClientOptions::default());
        core.on_open();
        core.on_message(&payload(1, "cruise"));
        core.on_message(
            &json!({"flight_info": {"model": "X", "date": "2024-01-01", "segment": "B"}})
                .to_string(),
        );
        assert_eq!(
            core.flight_info().unwrap().segment().as_deref(),
            Some("B")
        );
        assert_eq!(core.buffer().len(), 1);
    }

    #[test]
    fn test_malformed_payload_is_dropped() {
        let (mut core, _rx) = core(&ClientOptions::default());
        core.on_open();

        let outcome = core.on_message("{not json");
        assert_eq!(outcome.directive, Some(ControlDirective::Resume));
        assert!(outcome.delivered.is_none());
        assert_eq!(core.decode_failures(), 1);
        assert!(core.is_connected());

        assert!(core.on_message(&payload(1, "cruise")).delivered.is_some());
    }

    #[test]
    fn test_paused_messages_dropped_not_replayed() {
        let (mut core, _rx) = core(&ClientOptions::default());
        core.on_open();
        core.on_message(&payload(1, "climb"));

        assert_eq!(core.toggle_listening(), Some(ControlDirective::Pause));
        for seq in 2..6 {
            let outcome = core.on_message(&payload(seq, "descent"));
            assert_eq!(outcome.directive, Some(ControlDirective::Pause));
            assert!(outcome.delivered.is_none());
        }
        assert_eq!(core.dropped_while_paused(), 4);
        assert_eq!(core.status(), "climb");

        assert_eq!(core.toggle_listening(), Some(ControlDirective::Resume));
        core.on_message(&payload(6, "cruise"));

        let seqs: Vec<_> = core
            .buffer()
            .iter()
            .map(|s| s.payload()["seq"].as_u64().unwrap())
            .collect();
        assert_eq!(seqs, vec![1, 6]);
    }

    #[test]
    fn test_sync_on_every_message_and_toggle() {
        let (mut core, _rx) = core(&ClientOptions::default());
        core.on_open();
        for seq in 0..5 {
            core.on_message(&payload(seq, "cruise"));
        }
        core.toggle_listening();
        core.toggle_listening();
        // 1 open + 5 messages + 2 toggles
        assert_eq!(core.directives_sent(), 8);
    }

    #[test]
    fn test_no_directive_while_disconnected() {
        let (mut core, mut rx) = core(&ClientOptions::default());
        assert_eq!(core.toggle_listening(), None);
        assert!(!core.is_listening());
        assert_eq!(core.directives_sent(), 0);
        assert_eq!(drain(&mut rx), vec![StreamEvent::ListeningChanged(false)]);

        assert_eq!(core.on_open(), Some(ControlDirective::Pause));
        core.on_close();
        assert!(!core.is_connected());
    }

    #[test]
    fn test_buffer_capacity_applied() {
        let options = ClientOptions {
            buffer_capacity: 10,
            ..ClientOptions::default()
        };
        let (mut core, _rx) = core(&options);
        core.on_open();
        for seq in 0..25 {
            core.on_message(&payload(seq, "cruise"));
        }
        assert_eq!(core.buffer().len(), 10);
        assert_eq!(core.buffer().latest().unwrap().payload()["seq"], 24);
    }

    #[test]
    fn test_metadata_only_payload_does_not_notify() {
        let (mut core, _rx) = core(&ClientOptions::default());
        core.on_open();
        let outcome = core.on_message(&json!({"flight_info": {"model": "X"}}).to_string());
        assert!(outcome.delivered.is_none());
        assert!(core.flight_info().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_streams_to_observer() {
        let (link, mut remote) = scripted_link();
        let connector = Arc::new(ScriptedConnector::new(vec![link]));
        let mut client = TelemetryStreamClient::new(connector, &ClientOptions::default());

        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        client.on_sample(move |sample, info| {
            let _ = seen_tx.send((sample.clone(), info.cloned()));
        });
        client.connect();

        assert_eq!(remote.outbound.recv().await.unwrap(), RESUME);
        assert!(client.is_connected());

        remote.inbound.send(payload(7, "cruise")).unwrap();
        let (sample, info) = seen_rx.recv().await.unwrap();
        assert_eq!(sample.payload()["seq"], 7);
        assert_eq!(info.unwrap().date().as_deref(), Some("2024-01-01"));
        // Every inbound message re-syncs.
        assert_eq!(remote.outbound.recv().await.unwrap(), RESUME);

        assert_eq!(client.samples().len(), 1);
        assert_eq!(client.status(), "cruise");
        assert_eq!(client.latest(), Some(sample));

        client.shutdown().await;
        assert!(!client.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_toggle_sends_directive_and_survives_reconnect() {
        let (first, mut first_remote) = scripted_link();
        let (second, mut second_remote) = scripted_link();
        let connector = Arc::new(ScriptedConnector::new(vec![first, second]));
        let mut client = TelemetryStreamClient::new(connector, &ClientOptions::default());
        client.connect();

        assert_eq!(first_remote.outbound.recv().await.unwrap(), RESUME);
        client.toggle_listening();
        assert!(!client.is_listening());
        assert_eq!(first_remote.outbound.recv().await.unwrap(), PAUSE);

        drop(first_remote);
        assert_eq!(second_remote.outbound.recv().await.unwrap(), PAUSE);

        second_remote.inbound.send(payload(1, "cruise")).unwrap();
        assert_eq!(second_remote.outbound.recv().await.unwrap(), PAUSE);
        assert!(client.samples().is_empty());

        client.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_paused_syncs_pause_on_open() {
        let (link, mut remote) = scripted_link();
        let connector = Arc::new(ScriptedConnector::new(vec![link]));
        let options = ClientOptions {
            start_paused: true,
            ..ClientOptions::default()
        };
        let mut client = TelemetryStreamClient::new(connector, &options);
        client.connect();

        assert_eq!(remote.outbound.recv().await.unwrap(), PAUSE);
        client.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_is_idempotent() {
        let (link, mut remote) = scripted_link();
        let connector = Arc::new(ScriptedConnector::new(vec![link]));
        let attempts = connector.attempts();
        let mut client = TelemetryStreamClient::new(connector, &ClientOptions::default());

        client.connect();
        client.connect();
        assert_eq!(remote.outbound.recv().await.unwrap(), RESUME);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);

        client.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_pending_reconnect() {
        let connector = Arc::new(ScriptedConnector::new(Vec::new()));
        let attempts = connector.attempts();
        let mut client = TelemetryStreamClient::new(connector, &ClientOptions::default());
        client.connect();

        while attempts.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        client.shutdown().await;

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(*client.connection_state().borrow(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels_reconnect() {
        let connector = Arc::new(ScriptedConnector::new(Vec::new()));
        let attempts = connector.attempts();
        let mut client = TelemetryStreamClient::new(connector, &ClientOptions::default());
        client.connect();

        while attempts.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        drop(client);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_options_from_config() {
        let config = StreamConfig {
            buffer_capacity: 10,
            reconnect_delay_ms: 500,
            start_paused: true,
            ..StreamConfig::default()
        };
        let options = ClientOptions::from(&config);
        assert_eq!(options.buffer_capacity, 10);
        assert_eq!(options.reconnect_delay, Duration::from_millis(500));
        assert!(options.start_paused);
    }
}
