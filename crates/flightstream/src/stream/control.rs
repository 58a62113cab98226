//! Pause/resume control channel.
//!
//! The local listening state is the source of truth. [`ControlChannel::sync`]
//! produces the directive to transmit whenever the connection is open and
//! nothing otherwise; directives are never queued for a later connection,
//! the next open re-syncs instead.
//!
//! The client calls `sync` on every inbound message as well as on open and on
//! toggle, so the same directive is re-sent for every message received. That
//! chatter keeps the peer converged on the local state and is not filtered.

use crate::telemetry::ControlDirective;

/// Local desire to receive and process inbound telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListeningState {
    /// Process inbound telemetry.
    #[default]
    Listening,
    /// Drop inbound telemetry and ask the peer to pause.
    Paused,
}

impl ListeningState {
    /// Whether this state is [`ListeningState::Listening`].
    #[must_use]
    pub fn is_listening(self) -> bool {
        matches!(self, Self::Listening)
    }

    /// The opposite state.
    #[must_use]
    pub fn toggled(self) -> Self {
        match self {
            Self::Listening => Self::Paused,
            Self::Paused => Self::Listening,
        }
    }

    /// The directive that tells the peer about this state.
    #[must_use]
    pub fn directive(self) -> ControlDirective {
        ControlDirective::for_listening(self.is_listening())
    }
}

/// Keeps the remote peer's pause/resume state aligned with the local one.
#[derive(Debug, Clone, Default)]
pub struct ControlChannel {
    desired: ListeningState,
    sent: u64,
}

impl ControlChannel {
    /// Create a channel with the given initial state.
    #[must_use]
    pub fn new(desired: ListeningState) -> Self {
        Self { desired, sent: 0 }
    }

    /// The desired listening state.
    #[must_use]
    pub fn desired(&self) -> ListeningState {
        self.desired
    }

    /// The directive to transmit now, or `None` if the connection is closed.
    pub fn sync(&mut self, connection_open: bool) -> Option<ControlDirective> {
        if !connection_open {
            return None;
        }
        self.sent += 1;
        Some(self.desired.directive())
    }

    /// Flip the desired state and sync immediately.
    pub fn toggle(&mut self, connection_open: bool) -> Option<ControlDirective> {
        self.desired = self.desired.toggled();
        self.sync(connection_open)
    }

    /// Number of directives produced for transmission.
    #[must_use]
    pub fn directives_sent(&self) -> u64 {
        self.sent
    }
}
