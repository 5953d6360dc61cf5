//! Aggregate subscriptions.
//!
//! An aggregate subscription runs the same filters on several relays at
//! once. Events are deduplicated by id before they reach listeners, and the
//! relays' individual end-of-stored-events signals are folded into a single
//! [`Completion`]: either every relay answered (quorum) or the watchdog ran
//! out (timeout), whichever happens first. Completion fires exactly once.

use crate::connection::{
    AlreadyHave, ChildSubscription, Connection, SubscriptionHandler, SubscriptionOptions,
};
use crate::error::PoolError;
use crate::listeners::{ListenerId, Listeners};
use crate::metrics;
use crate::pool::{normalize_all, RelayPool};
use crate::provenance::Provenance;
use crate::url::EndpointId;
use dashmap::DashSet;
use futures::Stream;
use parking_lot::Mutex;
use relaymux_protocol::{Event, EventId, Filter};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Counter for aggregate subscription ids.
static NEXT_SUBSCRIPTION: AtomicU64 = AtomicU64::new(1);

/// How an aggregate subscription completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Completion {
    /// Every relay signalled end of stored events (or failed to connect).
    Quorum,
    /// The watchdog elapsed first; the result set may be incomplete.
    Timeout,
}

impl Completion {
    /// Whether completion came from the watchdog.
    #[must_use]
    pub fn is_timeout(self) -> bool {
        matches!(self, Completion::Timeout)
    }

    /// Short lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Completion::Quorum => "quorum",
            Completion::Timeout => "timeout",
        }
    }
}

impl fmt::Display for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type EventListener = dyn Fn(&Event) + Send + Sync;
type CompletionListener = dyn Fn(Completion) + Send + Sync;

/// State guarded by one lock so the quorum and timeout paths cannot both
/// fire.
struct Progress {
    outstanding: usize,
    completion: Option<Completion>,
    children: Vec<(EndpointId, Arc<dyn ChildSubscription>)>,
    watchdog: Option<JoinHandle<()>>,
}

struct Aggregate {
    id: String,
    endpoints: Vec<EndpointId>,
    seen: Arc<DashSet<EventId>>,
    closed: AtomicBool,
    progress: Mutex<Progress>,
    event_listeners: Listeners<EventListener>,
    completion_listeners: Listeners<CompletionListener>,
    provenance: Arc<Provenance>,
}

impl Aggregate {
    fn new(endpoints: Vec<EndpointId>, provenance: Arc<Provenance>) -> Self {
        let id = format!("agg:{:x}", NEXT_SUBSCRIPTION.fetch_add(1, Ordering::Relaxed));
        metrics::record_subscription_opened();
        Self {
            id,
            progress: Mutex::new(Progress {
                outstanding: endpoints.len(),
                completion: None,
                children: Vec::new(),
                watchdog: None,
            }),
            endpoints,
            seen: Arc::new(DashSet::new()),
            closed: AtomicBool::new(false),
            event_listeners: Listeners::new(),
            completion_listeners: Listeners::new(),
            provenance,
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Start the watchdog and one connect-then-subscribe task per endpoint.
    fn launch(
        self: &Arc<Self>,
        pool: &RelayPool,
        filters: Vec<Filter>,
        options: SubscriptionOptions,
    ) {
        debug!(
            subscription = %self.id,
            relays = self.endpoints.len(),
            filters = filters.len(),
            "Opening aggregate subscription"
        );

        if self.endpoints.is_empty() {
            self.finish(Completion::Quorum);
            return;
        }

        let timeout = pool.config().eose_timeout;
        let weak = Arc::downgrade(self);
        let watchdog = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(aggregate) = weak.upgrade() {
                aggregate.finish(Completion::Timeout);
            }
        });
        self.progress.lock().watchdog = Some(watchdog);

        for endpoint in self.endpoints.iter().cloned() {
            let pool = pool.clone();
            let weak = Arc::downgrade(self);
            let filters = filters.clone();
            let options = options.clone();
            tokio::spawn(async move {
                let connection = pool.ensure(&endpoint).await;
                let Some(aggregate) = weak.upgrade() else {
                    return;
                };
                match connection {
                    Ok(connection) => aggregate.attach(endpoint, connection, filters, options),
                    Err(e) => {
                        debug!(
                            subscription = %aggregate.id,
                            endpoint = %endpoint,
                            error = %e,
                            "Relay unavailable, counting it as answered"
                        );
                        aggregate.relay_done(&endpoint);
                    }
                }
            });
        }
    }

    fn attach(
        self: &Arc<Self>,
        endpoint: EndpointId,
        connection: Arc<dyn Connection>,
        filters: Vec<Filter>,
        options: SubscriptionOptions,
    ) {
        if self.is_closed() {
            return;
        }

        let handler = Arc::new(ChildHandler {
            aggregate: Arc::downgrade(self),
            endpoint: endpoint.clone(),
            eose_seen: AtomicBool::new(false),
        });
        let options = self.child_options(&endpoint, options);
        let child: Arc<dyn ChildSubscription> =
            Arc::from(connection.subscribe(filters, options, handler));

        let mut progress = self.progress.lock();
        if self.is_closed() {
            drop(progress);
            child.unsubscribe();
            return;
        }
        trace!(subscription = %self.id, endpoint = %endpoint, child = %child.id(), "Child attached");
        progress.children.push((endpoint, child));
    }

    /// Wrap the caller's `already_have` so the connection also consults the
    /// aggregate's dedup set.
    fn child_options(
        &self,
        endpoint: &EndpointId,
        mut options: SubscriptionOptions,
    ) -> SubscriptionOptions {
        let seen = Arc::clone(&self.seen);
        let provenance = Arc::clone(&self.provenance);
        let endpoint = endpoint.clone();
        let caller = options.already_have.take();

        let predicate: AlreadyHave = Arc::new(move |id: &str| {
            if seen.contains(id) {
                provenance.record(id, &endpoint);
                return true;
            }
            caller.as_ref().is_some_and(|f| f(id))
        });
        options.already_have = Some(predicate);
        options
    }

    fn deliver(&self, endpoint: &EndpointId, event: Event) {
        if self.is_closed() {
            trace!(subscription = %self.id, event = %event.id, "Dropping event after unsubscribe");
            return;
        }

        self.provenance.record(&event.id, endpoint);
        if !self.seen.insert(event.id.clone()) {
            trace!(subscription = %self.id, endpoint = %endpoint, event = %event.id, "Duplicate event");
            metrics::record_duplicate();
            return;
        }

        metrics::record_delivered();
        self.event_listeners.for_each(|listener| listener(&event));
    }

    /// One relay has answered (EOSE) or will never answer (connect failure).
    fn relay_done(&self, endpoint: &EndpointId) {
        let watchdog = {
            let mut progress = self.progress.lock();
            if progress.completion.is_some() || self.is_closed() {
                return;
            }
            progress.outstanding = progress.outstanding.saturating_sub(1);
            trace!(
                subscription = %self.id,
                endpoint = %endpoint,
                outstanding = progress.outstanding,
                "Relay finished stored events"
            );
            if progress.outstanding > 0 {
                return;
            }
            progress.completion = Some(Completion::Quorum);
            progress.watchdog.take()
        };

        if let Some(watchdog) = watchdog {
            watchdog.abort();
        }
        self.emit_completion(Completion::Quorum);
    }

    fn finish(&self, completion: Completion) {
        let outstanding = {
            let mut progress = self.progress.lock();
            if progress.completion.is_some() || self.is_closed() {
                return;
            }
            progress.completion = Some(completion);
            progress.watchdog = None;
            progress.outstanding
        };

        if completion.is_timeout() {
            warn!(
                subscription = %self.id,
                outstanding,
                "Completion watchdog elapsed before every relay answered"
            );
        }
        self.emit_completion(completion);
    }

    fn emit_completion(&self, completion: Completion) {
        metrics::record_completion(completion);
        let invoked = self
            .completion_listeners
            .for_each(|listener| listener(completion));
        self.completion_listeners.clear();
        debug!(subscription = %self.id, %completion, listeners = invoked, "Completed");
    }

    fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let (children, watchdog) = {
            let mut progress = self.progress.lock();
            (
                std::mem::take(&mut progress.children),
                progress.watchdog.take(),
            )
        };
        if let Some(watchdog) = watchdog {
            watchdog.abort();
        }
        for (_, child) in &children {
            child.unsubscribe();
        }

        self.event_listeners.clear();
        self.completion_listeners.clear();
        self.seen.clear();
        metrics::record_subscription_closed();
        debug!(subscription = %self.id, children = children.len(), "Unsubscribed");
    }
}

impl Drop for Aggregate {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Bridges one child subscription back into its aggregate.
struct ChildHandler {
    aggregate: Weak<Aggregate>,
    endpoint: EndpointId,
    eose_seen: AtomicBool,
}

impl SubscriptionHandler for ChildHandler {
    fn on_event(&self, event: Event) {
        if let Some(aggregate) = self.aggregate.upgrade() {
            aggregate.deliver(&self.endpoint, event);
        }
    }

    fn on_eose(&self) {
        self.answered();
    }

    fn on_closed(&self) {
        if let Some(aggregate) = self.aggregate.upgrade() {
            debug!(subscription = %aggregate.id, endpoint = %self.endpoint, "Relay connection closed");
        }
        self.answered();
    }
}

impl ChildHandler {
    // A relay may repeat EOSE after `extend`, or close after EOSE; only the
    // first signal counts.
    fn answered(&self) {
        if self.eose_seen.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(aggregate) = self.aggregate.upgrade() {
            aggregate.relay_done(&self.endpoint);
        }
    }
}

/// Handle to an aggregate subscription.
///
/// Clones share the subscription. Dropping the last handle unsubscribes.
#[derive(Clone)]
pub struct AggregateHandle {
    inner: Arc<Aggregate>,
}

impl AggregateHandle {
    pub(crate) fn new(endpoints: Vec<EndpointId>, provenance: Arc<Provenance>) -> Self {
        Self {
            inner: Arc::new(Aggregate::new(endpoints, provenance)),
        }
    }

    pub(crate) fn launch(&self, pool: &RelayPool, filters: Vec<Filter>, options: SubscriptionOptions) {
        self.inner.launch(pool, filters, options);
    }

    /// Local identifier of this subscription.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Endpoints the subscription was opened on, in request order.
    #[must_use]
    pub fn endpoints(&self) -> &[EndpointId] {
        &self.inner.endpoints
    }

    /// Re-issue `filters` on every attached child subscription.
    ///
    /// Dedup and completion state are kept.
    pub fn extend(&self, filters: Vec<Filter>, options: SubscriptionOptions) {
        if self.inner.is_closed() {
            return;
        }
        let children = self.inner.progress.lock().children.clone();
        for (endpoint, child) in children {
            let options = self.inner.child_options(&endpoint, options.clone());
            child.resubscribe(filters.clone(), options);
        }
    }

    /// Tear down every child subscription and stop all listener delivery.
    ///
    /// Idempotent. Pending [`EventStream`]s end and pending
    /// [`CompletionSignal`]s resolve to `None`.
    pub fn unsubscribe(&self) {
        self.inner.shutdown();
    }

    /// Check if [`unsubscribe`](Self::unsubscribe) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Register a listener for deduplicated events.
    ///
    /// Listeners run in registration order on the task that received the
    /// event.
    pub fn on_event(&self, listener: impl Fn(&Event) + Send + Sync + 'static) -> ListenerId {
        if self.inner.is_closed() {
            return ListenerId::next();
        }
        self.inner.event_listeners.add(Arc::new(listener))
    }

    /// Register a completion listener.
    ///
    /// A listener registered after completion has fired is accepted but never
    /// invoked.
    pub fn on_complete(
        &self,
        listener: impl Fn(Completion) + Send + Sync + 'static,
    ) -> ListenerId {
        let progress = self.inner.progress.lock();
        if progress.completion.is_some() || self.inner.is_closed() {
            return ListenerId::next();
        }
        self.inner.completion_listeners.add(Arc::new(listener))
    }

    /// Remove a listener registered with either `on_*` method.
    ///
    /// Returns `true` if it was still registered.
    pub fn off(&self, id: ListenerId) -> bool {
        self.inner.event_listeners.remove(id) || self.inner.completion_listeners.remove(id)
    }

    /// Stream of deduplicated events. Dropping the stream removes its
    /// listener; the stream ends on unsubscribe.
    #[must_use]
    pub fn events(&self) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.on_event(move |event| {
            let _ = tx.send(event.clone());
        });
        EventStream {
            id,
            rx,
            aggregate: Arc::downgrade(&self.inner),
        }
    }

    /// One-shot completion signal.
    ///
    /// Resolves to `None` if created after completion fired or if the
    /// subscription is unsubscribed first.
    #[must_use]
    pub fn completion(&self) -> CompletionSignal {
        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));
        self.on_complete(move |completion| {
            if let Some(tx) = tx.lock().take() {
                let _ = tx.send(completion);
            }
        });
        CompletionSignal { rx }
    }

    /// How the subscription completed, if it has.
    #[must_use]
    pub fn completion_state(&self) -> Option<Completion> {
        self.inner.progress.lock().completion
    }

    /// Relays that have neither signalled EOSE nor failed.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.inner.progress.lock().outstanding
    }

    /// Number of distinct events delivered so far.
    #[must_use]
    pub fn delivered(&self) -> usize {
        self.inner.seen.len()
    }
}

impl fmt::Debug for AggregateHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregateHandle")
            .field("id", &self.inner.id)
            .field("endpoints", &self.inner.endpoints)
            .field("closed", &self.inner.is_closed())
            .finish_non_exhaustive()
    }
}

/// A stream of deduplicated events from one aggregate subscription.
pub struct EventStream {
    id: ListenerId,
    rx: mpsc::UnboundedReceiver<Event>,
    aggregate: Weak<Aggregate>,
}

impl EventStream {
    /// Receive the next event, `None` once the subscription is closed.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }
}

impl Stream for EventStream {
    type Item = Event;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Event>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        if let Some(aggregate) = self.aggregate.upgrade() {
            aggregate.event_listeners.remove(self.id);
        }
    }
}

/// Resolves once with the subscription's [`Completion`].
pub struct CompletionSignal {
    rx: oneshot::Receiver<Completion>,
}

impl Future for CompletionSignal {
    type Output = Option<Completion>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(Result::ok)
    }
}

impl RelayPool {
    /// Open an aggregate subscription on `urls`.
    ///
    /// Returns immediately; connections are ensured and children attached on
    /// background tasks. Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::InvalidAddress`] if any address is invalid.
    pub fn subscribe<I, S>(
        &self,
        urls: I,
        filters: Vec<Filter>,
        options: SubscriptionOptions,
    ) -> Result<AggregateHandle, PoolError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let handle = self.prepare(urls)?;
        handle.launch(self, filters, options);
        Ok(handle)
    }

    /// Build a subscription without starting it, so listeners can be attached
    /// before any event can arrive.
    pub(crate) fn prepare<I, S>(&self, urls: I) -> Result<AggregateHandle, PoolError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let endpoints = normalize_all(urls)?;
        Ok(AggregateHandle::new(
            endpoints,
            Arc::clone(&self.inner.provenance),
        ))
    }
}
