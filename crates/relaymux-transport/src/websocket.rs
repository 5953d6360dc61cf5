//! WebSocket relay connections.
//!
//! This module provides a client-side relay connection using tokio-tungstenite.
//! Outbound messages go through an unbounded queue that is drained by a
//! writer task once the handshake completes, so subscriptions and publishes
//! may be issued while the connection is still connecting.

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use relaymux_core::{
    ChildSubscription, Connection, ConnectionState, Connector, EndpointId, ListenerId, Listeners,
    PublishHandle, PublishListener, PublishStatus, SubscriptionHandler, SubscriptionOptions,
    TransportError,
};
use relaymux_protocol::{codec, ClientMessage, Event, EventId, Filter, RelayMessage};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, trace, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Counter for generated subscription ids.
static NEXT_SUBSCRIPTION: AtomicU64 = AtomicU64::new(1);

/// WebSocket connection configuration.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Prefix for generated subscription ids.
    pub subscription_prefix: String,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            subscription_prefix: "rmx".to_string(),
        }
    }
}

/// Creates [`WebSocketConnection`]s for the pool.
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector {
    config: WebSocketConfig,
}

impl WebSocketConnector {
    /// Create a connector with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a connector with custom configuration.
    #[must_use]
    pub fn with_config(config: WebSocketConfig) -> Self {
        Self { config }
    }
}

impl Connector for WebSocketConnector {
    fn create(&self, endpoint: &EndpointId) -> Arc<dyn Connection> {
        Arc::new(WebSocketConnection::new(endpoint.clone(), self.config.clone()))
    }
}

enum Outbound {
    Message(ClientMessage),
    Shutdown,
}

struct SubscriptionEntry {
    handler: Arc<dyn SubscriptionHandler>,
    options: Mutex<SubscriptionOptions>,
}

struct Shared {
    endpoint: EndpointId,
    config: WebSocketConfig,
    state: AtomicU8,
    outbound: mpsc::UnboundedSender<Outbound>,
    queue: Mutex<Option<mpsc::UnboundedReceiver<Outbound>>>,
    subscriptions: DashMap<String, Arc<SubscriptionEntry>>,
    /// Awaiting the relay's OK; failed wholesale when the connection closes.
    publishes: DashMap<EventId, Arc<PublishState>>,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        ConnectionState::try_from(self.state.load(Ordering::Acquire))
            .unwrap_or(ConnectionState::Closed)
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state.into(), Ordering::Release);
    }

    fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.state
            .compare_exchange(from.into(), to.into(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn send(&self, message: ClientMessage) -> Result<(), TransportError> {
        self.outbound
            .send(Outbound::Message(message))
            .map_err(|_| TransportError::ConnectionClosed)
    }

    fn dispatch(&self, text: &str) {
        let message = match codec::decode(text) {
            Ok(message) => message,
            Err(e) => {
                debug!(endpoint = %self.endpoint, error = %e, "Ignoring undecodable relay message");
                return;
            }
        };

        match message {
            RelayMessage::Event {
                subscription_id,
                event,
            } => {
                let Some(entry) = self.subscription(&subscription_id) else {
                    trace!(endpoint = %self.endpoint, subscription = %subscription_id, "Event for unknown subscription");
                    return;
                };
                if entry.options.lock().already_have(&event.id) {
                    trace!(endpoint = %self.endpoint, event = %event.id, "Skipping known event");
                    return;
                }
                entry.handler.on_event(*event);
            }
            RelayMessage::Eose(subscription_id) => {
                if let Some(entry) = self.subscription(&subscription_id) {
                    entry.handler.on_eose();
                }
            }
            RelayMessage::Ok {
                event_id,
                accepted,
                message,
            } => {
                if let Some((_, publish)) = self.publishes.remove(&event_id) {
                    let status = if accepted {
                        PublishStatus::Ok
                    } else {
                        PublishStatus::Failed
                    };
                    publish.resolve(status, &message);
                }
            }
            RelayMessage::Notice(notice) => {
                info!(endpoint = %self.endpoint, notice = %notice, "Relay notice");
            }
            RelayMessage::Closed {
                subscription_id,
                message,
            } => {
                debug!(
                    endpoint = %self.endpoint,
                    subscription = %subscription_id,
                    reason = %message,
                    "Relay closed subscription"
                );
                // No more stored events will follow.
                if let Some((_, entry)) = self.subscriptions.remove(&subscription_id) {
                    entry.handler.on_eose();
                }
            }
        }
    }

    fn subscription(&self, id: &str) -> Option<Arc<SubscriptionEntry>> {
        self.subscriptions.get(id).map(|entry| Arc::clone(entry.value()))
    }

    fn fail_publish(&self, event_id: &str, reason: &str) {
        if let Some((_, publish)) = self.publishes.remove(event_id) {
            publish.resolve(PublishStatus::Failed, reason);
        }
    }

    /// Tell every registered subscription the connection is gone.
    ///
    /// Callers set the state to `Closed` first, so a subscription registered
    /// concurrently is caught by the state check in `subscribe`.
    fn close_subscriptions(&self) {
        let ids: Vec<String> = self.subscriptions.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Some((_, entry)) = self.subscriptions.remove(&id) {
                trace!(endpoint = %self.endpoint, subscription = %id, "Closing subscription with connection");
                entry.handler.on_closed();
            }
        }
    }

    fn shut_down(&self, reason: &str) {
        self.set_state(ConnectionState::Closed);
        self.close_subscriptions();
        self.fail_pending_publishes(reason);
    }

    fn fail_pending_publishes(&self, reason: &str) {
        let pending: Vec<EventId> = self.publishes.iter().map(|e| e.key().clone()).collect();
        for event_id in pending {
            self.fail_publish(&event_id, reason);
        }
    }
}

/// A WebSocket connection to one relay.
pub struct WebSocketConnection {
    shared: Arc<Shared>,
}

impl WebSocketConnection {
    /// Create a connection in the `Connecting` state. No I/O happens until
    /// [`Connection::connect`] is called.
    #[must_use]
    pub fn new(endpoint: EndpointId, config: WebSocketConfig) -> Self {
        let (outbound, queue) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(Shared {
                endpoint,
                config,
                state: AtomicU8::new(ConnectionState::Connecting.into()),
                outbound,
                queue: Mutex::new(Some(queue)),
                subscriptions: DashMap::new(),
                publishes: DashMap::new(),
            }),
        }
    }

    /// Number of live subscriptions on this connection.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.shared.subscriptions.len()
    }

    fn next_subscription_id(&self) -> String {
        let n = NEXT_SUBSCRIPTION.fetch_add(1, Ordering::Relaxed);
        format!("{}:{:x}", self.shared.config.subscription_prefix, n)
    }
}

#[async_trait]
impl Connection for WebSocketConnection {
    fn endpoint(&self) -> &EndpointId {
        &self.shared.endpoint
    }

    fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    async fn connect(&self) -> Result<(), TransportError> {
        let Some(queue) = self.shared.queue.lock().take() else {
            return Err(TransportError::Other("connect already attempted".to_string()));
        };
        let endpoint = &self.shared.endpoint;
        debug!(endpoint = %endpoint, "Connecting");

        let (mut stream, _response) = match connect_async(endpoint.as_str()).await {
            Ok(connected) => connected,
            Err(e) => {
                self.shared.shut_down("connection failed");
                return Err(TransportError::Handshake(e.to_string()));
            }
        };

        if !self
            .shared
            .transition(ConnectionState::Connecting, ConnectionState::Open)
        {
            debug!(endpoint = %endpoint, "Closed while connecting");
            let _ = stream.close(None).await;
            self.shared.shut_down("connection closed");
            return Err(TransportError::ConnectionClosed);
        }

        let (sink, stream) = stream.split();
        tokio::spawn(write_loop(Arc::clone(&self.shared), sink, queue));
        tokio::spawn(read_loop(Arc::clone(&self.shared), stream));

        debug!(endpoint = %endpoint, "Connected");
        Ok(())
    }

    fn subscribe(
        &self,
        filters: Vec<Filter>,
        options: SubscriptionOptions,
        handler: Arc<dyn SubscriptionHandler>,
    ) -> Box<dyn ChildSubscription> {
        let id = options
            .id
            .clone()
            .unwrap_or_else(|| self.next_subscription_id());

        self.shared.subscriptions.insert(
            id.clone(),
            Arc::new(SubscriptionEntry {
                handler,
                options: Mutex::new(options),
            }),
        );
        if self.shared.state() == ConnectionState::Closed {
            if let Some((_, entry)) = self.shared.subscriptions.remove(&id) {
                debug!(endpoint = %self.shared.endpoint, subscription = %id, "Subscribed on closed connection");
                entry.handler.on_closed();
            }
        } else if let Err(e) = self.shared.send(ClientMessage::req(id.clone(), filters)) {
            debug!(endpoint = %self.shared.endpoint, subscription = %id, error = %e, "REQ not sent");
        }

        Box::new(RelaySubscription {
            id,
            shared: Arc::clone(&self.shared),
            closed: AtomicBool::new(false),
        })
    }

    fn publish(&self, event: &Event) -> Box<dyn PublishHandle> {
        let publish = Arc::new(PublishState::new(self.shared.endpoint.clone()));
        // OK names only the event id, so a repeat publish takes over the slot.
        if let Some(previous) = self
            .shared
            .publishes
            .insert(event.id.clone(), Arc::clone(&publish))
        {
            previous.resolve(PublishStatus::Failed, "superseded by a later publish");
        }

        if self.shared.send(ClientMessage::event(event.clone())).is_err() {
            self.shared.fail_publish(&event.id, "connection closed");
        }
        Box::new(RelayPublish { state: publish })
    }

    fn close(&self) {
        match self.shared.state() {
            ConnectionState::Open => {
                self.shared.set_state(ConnectionState::Closing);
                let _ = self.shared.outbound.send(Outbound::Shutdown);
            }
            ConnectionState::Connecting => {
                if self.shared.queue.lock().take().is_some() {
                    // Never started.
                    self.shared.shut_down("connection closed");
                } else {
                    self.shared.set_state(ConnectionState::Closing);
                }
            }
            ConnectionState::Closing | ConnectionState::Closed => {}
        }
    }
}

impl std::fmt::Debug for WebSocketConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketConnection")
            .field("endpoint", &self.shared.endpoint)
            .field("state", &self.shared.state())
            .field("subscriptions", &self.shared.subscriptions.len())
            .finish()
    }
}

async fn write_loop(
    shared: Arc<Shared>,
    mut sink: SplitSink<WsStream, Message>,
    mut queue: mpsc::UnboundedReceiver<Outbound>,
) {
    while let Some(item) = queue.recv().await {
        let message = match item {
            Outbound::Message(message) => message,
            Outbound::Shutdown => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
        };

        let text = match codec::encode(&message) {
            Ok(text) => text,
            Err(e) => {
                warn!(endpoint = %shared.endpoint, kind = message.tag(), error = %e, "Failed to encode message");
                if let ClientMessage::Event(event) = &message {
                    shared.fail_publish(&event.id, &e.to_string());
                }
                continue;
            }
        };

        if let Err(e) = sink.send(Message::Text(text)).await {
            warn!(endpoint = %shared.endpoint, error = %e, "Send failed");
            if let ClientMessage::Event(event) = &message {
                shared.fail_publish(&event.id, &e.to_string());
            }
            break;
        }
    }

    let _ = sink.close().await;
    shared.shut_down("connection closed");
    debug!(endpoint = %shared.endpoint, "Writer stopped");
}

async fn read_loop(shared: Arc<Shared>, mut stream: SplitStream<WsStream>) {
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => shared.dispatch(&text),
            Ok(Message::Binary(data)) => match std::str::from_utf8(&data) {
                Ok(text) => shared.dispatch(text),
                Err(_) => debug!(endpoint = %shared.endpoint, "Ignoring non-UTF-8 binary frame"),
            },
            Ok(Message::Close(_)) => {
                debug!(endpoint = %shared.endpoint, "Received close frame");
                break;
            }
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
            Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => break,
            Err(e) => {
                warn!(endpoint = %shared.endpoint, error = %e, "Receive failed");
                break;
            }
        }
    }

    let _ = shared.outbound.send(Outbound::Shutdown);
    shared.shut_down("connection closed");
    debug!(endpoint = %shared.endpoint, "Reader stopped");
}

/// One subscription on a [`WebSocketConnection`].
struct RelaySubscription {
    id: String,
    shared: Arc<Shared>,
    closed: AtomicBool,
}

impl ChildSubscription for RelaySubscription {
    fn id(&self) -> &str {
        &self.id
    }

    fn resubscribe(&self, filters: Vec<Filter>, options: SubscriptionOptions) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        match self.shared.subscription(&self.id) {
            Some(entry) => *entry.options.lock() = options,
            None => return,
        }
        let _ = self.shared.send(ClientMessage::req(self.id.clone(), filters));
    }

    fn unsubscribe(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.subscriptions.remove(&self.id);
        if self.shared.state().is_reusable() {
            let _ = self.shared.send(ClientMessage::close(self.id.clone()));
        }
    }
}

/// Outcome of one publish, shared between the reader and the handle.
struct PublishState {
    endpoint: EndpointId,
    outcome: Mutex<Option<(PublishStatus, String)>>,
    ok: Listeners<dyn Fn(&str) + Send + Sync>,
    failed: Listeners<dyn Fn(&str) + Send + Sync>,
}

impl PublishState {
    fn new(endpoint: EndpointId) -> Self {
        Self {
            endpoint,
            outcome: Mutex::new(None),
            ok: Listeners::new(),
            failed: Listeners::new(),
        }
    }

    fn listeners(&self, status: PublishStatus) -> &Listeners<dyn Fn(&str) + Send + Sync> {
        match status {
            PublishStatus::Ok => &self.ok,
            PublishStatus::Failed => &self.failed,
        }
    }

    fn resolve(&self, status: PublishStatus, message: &str) {
        {
            let mut outcome = self.outcome.lock();
            if outcome.is_some() {
                return;
            }
            *outcome = Some((status, message.to_string()));
        }
        debug!(endpoint = %self.endpoint, ?status, detail = message, "Publish resolved");
        self.listeners(status).for_each(|listener| listener(message));
        self.ok.clear();
        self.failed.clear();
    }
}

struct RelayPublish {
    state: Arc<PublishState>,
}

impl PublishHandle for RelayPublish {
    fn endpoint(&self) -> &EndpointId {
        &self.state.endpoint
    }

    fn on(&self, status: PublishStatus, listener: PublishListener) -> ListenerId {
        let outcome = self.state.outcome.lock();
        match outcome.as_ref() {
            None => self.state.listeners(status).add(Arc::from(listener)),
            Some((resolved, message)) => {
                let message = message.clone();
                let resolved = *resolved;
                drop(outcome);
                if resolved == status {
                    listener(&message);
                }
                ListenerId::next()
            }
        }
    }

    fn off(&self, id: ListenerId) {
        if !self.state.ok.remove(id) {
            self.state.failed.remove(id);
        }
    }
}
