//! Connection abstraction traits.
//!
//! These traits define what the pool needs from a relay connection library.
//! The pool never touches sockets or wire messages; any transport that can
//! subscribe, deliver events and end-of-stored-events, publish, and report a
//! lifecycle state can be pooled.

use crate::listeners::ListenerId;
use crate::url::EndpointId;
use async_trait::async_trait;
use relaymux_protocol::{Event, Filter, ProtocolError};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectionState {
    /// Handshake in progress.
    Connecting = 0,
    /// Ready for traffic.
    Open = 1,
    /// Shutdown requested.
    Closing = 2,
    /// Closed or failed; never reused.
    Closed = 3,
}

impl ConnectionState {
    /// Whether the pool may hand this connection out again.
    #[must_use]
    pub fn is_reusable(self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Open)
    }
}

impl From<ConnectionState> for u8 {
    fn from(state: ConnectionState) -> u8 {
        state as u8
    }
}

impl TryFrom<u8> for ConnectionState {
    type Error = &'static str;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ConnectionState::Connecting),
            1 => Ok(ConnectionState::Open),
            2 => Ok(ConnectionState::Closing),
            3 => Ok(ConnectionState::Closed),
            _ => Err("Invalid connection state"),
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Connection timed out.
    #[error("Connection timed out")]
    Timeout,

    /// Handshake with the relay failed.
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Predicate a connection may consult before emitting an event: returns
/// `true` when the event id is already known and can be skipped.
pub type AlreadyHave = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Per-subscription options passed through to the connection.
#[derive(Clone, Default)]
pub struct SubscriptionOptions {
    /// Subscription id to use on the wire; generated when absent.
    pub id: Option<String>,
    /// Duplicate-suppression hint.
    pub already_have: Option<AlreadyHave>,
}

impl SubscriptionOptions {
    /// Create empty options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a fixed subscription id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Install a duplicate-suppression predicate.
    #[must_use]
    pub fn with_already_have(
        mut self,
        predicate: impl Fn(&str) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.already_have = Some(Arc::new(predicate));
        self
    }

    /// Evaluate the predicate, `false` when none is installed.
    #[must_use]
    pub fn already_have(&self, id: &str) -> bool {
        self.already_have.as_ref().is_some_and(|f| f(id))
    }
}

impl fmt::Debug for SubscriptionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionOptions")
            .field("id", &self.id)
            .field("already_have", &self.already_have.is_some())
            .finish()
    }
}

/// Receives the output of one child subscription.
pub trait SubscriptionHandler: Send + Sync {
    /// An event matching the subscription arrived.
    fn on_event(&self, event: Event);

    /// The relay has sent every stored event for the subscription.
    fn on_eose(&self);

    /// The connection failed or closed; nothing more will arrive.
    ///
    /// Connections call this once for every subscription still registered
    /// when they reach `Closed`, and immediately for a subscription opened
    /// on a connection that is already closed.
    fn on_closed(&self) {
        self.on_eose();
    }
}

/// A subscription on a single connection.
pub trait ChildSubscription: Send + Sync {
    /// Subscription id on the wire.
    fn id(&self) -> &str;

    /// Replace the subscription's filters, keeping its id and handler.
    fn resubscribe(&self, filters: Vec<Filter>, options: SubscriptionOptions);

    /// Close the subscription. Calling it twice is a no-op.
    fn unsubscribe(&self);
}

/// Outcome classes a publish handle reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PublishStatus {
    /// The relay accepted the event.
    Ok,
    /// The relay rejected the event or it could not be sent.
    Failed,
}

/// Listener for publish outcomes; receives the relay's message or the
/// failure reason.
pub type PublishListener = Box<dyn Fn(&str) + Send + Sync>;

/// Result handle for one event published to one relay.
pub trait PublishHandle: Send + Sync {
    /// Endpoint the event was published to.
    fn endpoint(&self) -> &EndpointId;

    /// Register a listener for an outcome.
    fn on(&self, status: PublishStatus, listener: PublishListener) -> ListenerId;

    /// Remove a listener. Unknown ids are ignored.
    fn off(&self, id: ListenerId);
}

/// A duplex link to one relay.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Endpoint this connection talks to.
    fn endpoint(&self) -> &EndpointId;

    /// Current lifecycle state.
    fn state(&self) -> ConnectionState;

    /// Run the connect sequence until the connection is open.
    async fn connect(&self) -> Result<(), TransportError>;

    /// Open a subscription. May be called while still connecting.
    fn subscribe(
        &self,
        filters: Vec<Filter>,
        options: SubscriptionOptions,
        handler: Arc<dyn SubscriptionHandler>,
    ) -> Box<dyn ChildSubscription>;

    /// Publish an event.
    fn publish(&self, event: &Event) -> Box<dyn PublishHandle>;

    /// Request shutdown. Does not wait for it to finish.
    fn close(&self);
}

/// Creates connections for the pool.
pub trait Connector: Send + Sync {
    /// Build a connection in the `Connecting` state without starting I/O.
    fn create(&self, endpoint: &EndpointId) -> Arc<dyn Connection>;
}
