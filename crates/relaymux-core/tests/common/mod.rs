//! In-memory relays for driving the pool in tests.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use relaymux_core::{
    normalize, ChildSubscription, Connection, ConnectionState, Connector, EndpointId, Event,
    Filter, ListenerId, PoolConfig, PublishHandle, PublishListener, PublishStatus, RelayPool,
    SubscriptionHandler, SubscriptionOptions, TransportError,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// How a mock relay behaves.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Connect succeeds; stored events are replayed on subscribe, followed
    /// by EOSE when `auto_eose` is set.
    Serve { events: Vec<Event>, auto_eose: bool },
    /// Connect fails with a handshake error.
    Fail,
    /// Connect never finishes.
    Hang,
}

impl Behavior {
    pub fn serve(events: Vec<Event>) -> Self {
        Behavior::Serve {
            events,
            auto_eose: true,
        }
    }

    pub fn silent(events: Vec<Event>) -> Self {
        Behavior::Serve {
            events,
            auto_eose: false,
        }
    }
}

#[derive(Default)]
pub struct MockConnector {
    behaviors: Mutex<HashMap<EndpointId, Behavior>>,
    relays: Mutex<Vec<Arc<MockRelay>>>,
    created: AtomicUsize,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Set the behavior for relays created for `url` from now on.
    pub fn set(&self, url: &str, behavior: Behavior) {
        let endpoint = normalize(url).unwrap();
        self.behaviors.lock().insert(endpoint, behavior);
    }

    /// The most recently created relay for `url`.
    pub fn relay(&self, url: &str) -> Arc<MockRelay> {
        let endpoint = normalize(url).unwrap();
        self.relays
            .lock()
            .iter()
            .rev()
            .find(|relay| relay.endpoint == endpoint)
            .cloned()
            .unwrap_or_else(|| panic!("no relay created for {endpoint}"))
    }

    /// Number of connections created.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl Connector for MockConnector {
    fn create(&self, endpoint: &EndpointId) -> Arc<dyn Connection> {
        let behavior = self
            .behaviors
            .lock()
            .get(endpoint)
            .cloned()
            .unwrap_or_else(|| Behavior::serve(Vec::new()));
        let relay = Arc::new(MockRelay {
            endpoint: endpoint.clone(),
            behavior,
            state: Mutex::new(ConnectionState::Connecting),
            subs: Mutex::new(Vec::new()),
            published: Mutex::new(Vec::new()),
        });
        self.created.fetch_add(1, Ordering::SeqCst);
        self.relays.lock().push(Arc::clone(&relay));
        relay
    }
}

pub struct MockRelay {
    endpoint: EndpointId,
    behavior: Behavior,
    state: Mutex<ConnectionState>,
    subs: Mutex<Vec<Arc<MockSub>>>,
    published: Mutex<Vec<Event>>,
}

impl MockRelay {
    fn stored(&self) -> &[Event] {
        match &self.behavior {
            Behavior::Serve { events, .. } => events.as_slice(),
            _ => &[],
        }
    }

    fn auto_eose(&self) -> bool {
        matches!(self.behavior, Behavior::Serve { auto_eose: true, .. })
    }

    fn replay(&self, sub: &MockSub) {
        for event in self.stored() {
            sub.offer(event);
        }
        if self.auto_eose() {
            sub.handler.on_eose();
        }
    }

    /// Push a live event to every open subscription it matches.
    pub fn emit(&self, event: &Event) {
        let subs = self.subs.lock().clone();
        for sub in subs.iter().filter(|s| !s.closed.load(Ordering::SeqCst)) {
            sub.offer(event);
        }
    }

    /// Push an event to every subscription's handler, closed or not, the way
    /// a frame already in flight would arrive after CLOSE.
    pub fn emit_unchecked(&self, event: &Event) {
        let subs = self.subs.lock().clone();
        for sub in &subs {
            sub.handler.on_event(event.clone());
        }
    }

    /// Send EOSE on every open subscription.
    pub fn emit_eose(&self) {
        let subs = self.subs.lock().clone();
        for sub in subs.iter().filter(|s| !s.closed.load(Ordering::SeqCst)) {
            sub.handler.on_eose();
        }
    }

    /// Drop the connection: mark it closed and tell every open subscription.
    pub fn disconnect(&self) {
        self.set_state(ConnectionState::Closed);
        let subs = self.subs.lock().clone();
        for sub in &subs {
            if !sub.closed.swap(true, Ordering::SeqCst) {
                sub.handler.on_closed();
            }
        }
    }

    pub fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
    }

    pub fn subscription_count(&self) -> usize {
        self.subs.lock().len()
    }

    pub fn open_subscriptions(&self) -> usize {
        self.subs
            .lock()
            .iter()
            .filter(|s| !s.closed.load(Ordering::SeqCst))
            .count()
    }

    pub fn published(&self) -> Vec<Event> {
        self.published.lock().clone()
    }
}

#[async_trait]
impl Connection for MockRelay {
    fn endpoint(&self) -> &EndpointId {
        &self.endpoint
    }

    fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    async fn connect(&self) -> Result<(), TransportError> {
        match self.behavior {
            Behavior::Serve { .. } => {
                self.set_state(ConnectionState::Open);
                // Subscriptions queued while connecting.
                let pending = self.subs.lock().clone();
                for sub in pending.iter().filter(|s| !s.closed.load(Ordering::SeqCst)) {
                    self.replay(sub);
                }
                Ok(())
            }
            Behavior::Fail => {
                self.disconnect();
                Err(TransportError::Handshake("connection refused".to_string()))
            }
            Behavior::Hang => std::future::pending().await,
        }
    }

    fn subscribe(
        &self,
        filters: Vec<Filter>,
        options: SubscriptionOptions,
        handler: Arc<dyn SubscriptionHandler>,
    ) -> Box<dyn ChildSubscription> {
        let mut subs = self.subs.lock();
        let sub = Arc::new(MockSub {
            id: options
                .id
                .clone()
                .unwrap_or_else(|| format!("mock:{}", subs.len())),
            filters: Mutex::new(filters),
            options: Mutex::new(options),
            handler,
            closed: AtomicBool::new(false),
        });
        subs.push(Arc::clone(&sub));
        drop(subs);

        match self.state() {
            ConnectionState::Open => self.replay(&sub),
            ConnectionState::Closed => {
                sub.closed.store(true, Ordering::SeqCst);
                sub.handler.on_closed();
            }
            ConnectionState::Connecting | ConnectionState::Closing => {}
        }
        Box::new(MockChild {
            sub,
            relay_events: self.stored().to_vec(),
            auto_eose: self.auto_eose(),
        })
    }

    fn publish(&self, event: &Event) -> Box<dyn PublishHandle> {
        self.published.lock().push(event.clone());
        Box::new(MockPublish {
            endpoint: self.endpoint.clone(),
        })
    }

    fn close(&self) {
        self.disconnect();
    }
}

pub struct MockSub {
    id: String,
    filters: Mutex<Vec<Filter>>,
    options: Mutex<SubscriptionOptions>,
    handler: Arc<dyn SubscriptionHandler>,
    closed: AtomicBool,
}

impl MockSub {
    fn offer(&self, event: &Event) {
        let matches = self.filters.lock().iter().any(|f| f.matches(event));
        if !matches || self.options.lock().already_have(&event.id) {
            return;
        }
        self.handler.on_event(event.clone());
    }
}

struct MockChild {
    sub: Arc<MockSub>,
    relay_events: Vec<Event>,
    auto_eose: bool,
}

impl ChildSubscription for MockChild {
    fn id(&self) -> &str {
        &self.sub.id
    }

    fn resubscribe(&self, filters: Vec<Filter>, options: SubscriptionOptions) {
        *self.sub.filters.lock() = filters;
        *self.sub.options.lock() = options;
        for event in &self.relay_events {
            self.sub.offer(event);
        }
        if self.auto_eose {
            self.sub.handler.on_eose();
        }
    }

    fn unsubscribe(&self) {
        self.sub.closed.store(true, Ordering::SeqCst);
    }
}

/// Accepts every event.
struct MockPublish {
    endpoint: EndpointId,
}

impl PublishHandle for MockPublish {
    fn endpoint(&self) -> &EndpointId {
        &self.endpoint
    }

    fn on(&self, status: PublishStatus, listener: PublishListener) -> ListenerId {
        if status == PublishStatus::Ok {
            listener("");
        }
        ListenerId::next()
    }

    fn off(&self, _id: ListenerId) {}
}

pub fn event(id: &str, kind: u32) -> Event {
    Event {
        id: id.to_string(),
        pubkey: "alice".to_string(),
        created_at: 1_700_000_000,
        kind,
        tags: vec![],
        content: format!("content of {id}"),
        sig: String::new(),
    }
}

pub fn pool(connector: &Arc<MockConnector>) -> RelayPool {
    RelayPool::with_config(
        Arc::clone(connector) as Arc<dyn Connector>,
        PoolConfig {
            connect_timeout: Duration::from_secs(10),
            eose_timeout: Duration::from_millis(2400),
            get_timeout: Duration::from_millis(1500),
        },
    )
}

pub fn ids(events: &[Event]) -> Vec<String> {
    let mut ids: Vec<String> = events.iter().map(|e| e.id.clone()).collect();
    ids.sort();
    ids
}
