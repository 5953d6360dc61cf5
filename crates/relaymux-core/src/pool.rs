//! The relay connection pool.
//!
//! The pool owns the endpoint → connection map. Connections are created on
//! first use, reused while they are connecting or open, and replaced once
//! they report closing or closed. Entries only leave the map through
//! [`RelayPool::close`] or [`RelayPool::close_all`].

use crate::connection::{Connection, ConnectionState, Connector, TransportError};
use crate::error::PoolError;
use crate::metrics;
use crate::provenance::Provenance;
use crate::url::{normalize, EndpointId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default connect watchdog.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default completion watchdog for aggregate subscriptions.
pub const DEFAULT_EOSE_TIMEOUT: Duration = Duration::from_millis(2400);

/// Default wait for [`RelayPool::get`].
pub const DEFAULT_GET_TIMEOUT: Duration = Duration::from_millis(1500);

/// Pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// How long `ensure` waits for a new connection to open.
    pub connect_timeout: Duration,
    /// How long an aggregate subscription waits for every relay's EOSE.
    pub eose_timeout: Duration,
    /// How long `get` waits for a first event.
    pub get_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            eose_timeout: DEFAULT_EOSE_TIMEOUT,
            get_timeout: DEFAULT_GET_TIMEOUT,
        }
    }
}

pub(crate) struct PoolInner {
    connector: Arc<dyn Connector>,
    connections: DashMap<EndpointId, Arc<dyn Connection>>,
    pub(crate) provenance: Arc<Provenance>,
    pub(crate) config: PoolConfig,
}

/// A pool of relay connections.
///
/// Cloning is cheap; clones share the same connections.
#[derive(Clone)]
pub struct RelayPool {
    pub(crate) inner: Arc<PoolInner>,
}

impl RelayPool {
    /// Create a pool with default configuration.
    #[must_use]
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self::with_config(connector, PoolConfig::default())
    }

    /// Create a pool with custom configuration.
    #[must_use]
    pub fn with_config(connector: Arc<dyn Connector>, config: PoolConfig) -> Self {
        info!("Creating relay pool with config: {:?}", config);
        Self {
            inner: Arc::new(PoolInner {
                connector,
                connections: DashMap::new(),
                provenance: Arc::new(Provenance::new()),
                config,
            }),
        }
    }

    /// Get the pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Normalize `url` and ensure a connection to it.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid or the connect sequence
    /// fails.
    pub async fn ensure_connection(&self, url: &str) -> Result<Arc<dyn Connection>, PoolError> {
        let endpoint = normalize(url)?;
        self.ensure(&endpoint).await
    }

    /// Return a usable connection for `endpoint`, creating one if needed.
    ///
    /// An existing connection that is connecting or open is returned as is.
    /// A new connection is waited on for at most `connect_timeout`; if the
    /// watchdog elapses first the still-connecting connection is returned and
    /// the attempt carries on in the background.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::ConnectFailed`] if the connect sequence fails.
    pub async fn ensure(&self, endpoint: &EndpointId) -> Result<Arc<dyn Connection>, PoolError> {
        let connection = match self.inner.connections.entry(endpoint.clone()) {
            Entry::Occupied(mut occupied) => {
                let state = occupied.get().state();
                if state.is_reusable() {
                    return Ok(Arc::clone(occupied.get()));
                }
                debug!(endpoint = %endpoint, state = %state, "Replacing stale connection");
                let connection = self.inner.connector.create(endpoint);
                occupied.insert(Arc::clone(&connection));
                connection
            }
            Entry::Vacant(vacant) => {
                debug!(endpoint = %endpoint, "Creating connection");
                let connection = self.inner.connector.create(endpoint);
                vacant.insert(Arc::clone(&connection));
                connection
            }
        };
        metrics::set_pooled(self.inner.connections.len());

        self.connect(endpoint, connection).await
    }

    async fn connect(
        &self,
        endpoint: &EndpointId,
        connection: Arc<dyn Connection>,
    ) -> Result<Arc<dyn Connection>, PoolError> {
        let attempt = {
            let connection = Arc::clone(&connection);
            tokio::spawn(async move { connection.connect().await })
        };

        match tokio::time::timeout(self.inner.config.connect_timeout, attempt).await {
            Ok(Ok(Ok(()))) => {
                debug!(endpoint = %endpoint, "Connected");
                metrics::record_connected();
                Ok(connection)
            }
            Ok(Ok(Err(source))) => {
                warn!(endpoint = %endpoint, error = %source, "Connect failed");
                metrics::record_connect_failure();
                Err(PoolError::ConnectFailed {
                    endpoint: endpoint.clone(),
                    source,
                })
            }
            Ok(Err(join_error)) => {
                warn!(endpoint = %endpoint, error = %join_error, "Connect task aborted");
                metrics::record_connect_failure();
                Err(PoolError::ConnectFailed {
                    endpoint: endpoint.clone(),
                    source: TransportError::Other(join_error.to_string()),
                })
            }
            Err(_) => {
                warn!(
                    endpoint = %endpoint,
                    timeout_ms = self.inner.config.connect_timeout.as_millis() as u64,
                    "Connect watchdog elapsed, continuing in background"
                );
                metrics::record_connect_watchdog();
                Ok(connection)
            }
        }
    }

    /// Look up the pooled connection for `url` without creating one.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid.
    pub fn connection(&self, url: &str) -> Result<Option<Arc<dyn Connection>>, PoolError> {
        let endpoint = normalize(url)?;
        Ok(self.get_connection(&endpoint))
    }

    pub(crate) fn get_connection(&self, endpoint: &EndpointId) -> Option<Arc<dyn Connection>> {
        self.inner
            .connections
            .get(endpoint)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Close and evict the connections for `urls`.
    ///
    /// Addresses without a pooled connection are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if any address is invalid; nothing is closed then.
    pub fn close<I, S>(&self, urls: I) -> Result<(), PoolError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let endpoints = normalize_all(urls)?;
        for endpoint in &endpoints {
            if let Some((_, connection)) = self.inner.connections.remove(endpoint) {
                debug!(endpoint = %endpoint, "Closing connection");
                connection.close();
            }
        }
        metrics::set_pooled(self.inner.connections.len());
        Ok(())
    }

    /// Close and evict every pooled connection.
    pub fn close_all(&self) {
        let endpoints = self.endpoints();
        for endpoint in &endpoints {
            if let Some((_, connection)) = self.inner.connections.remove(endpoint) {
                connection.close();
            }
        }
        metrics::set_pooled(self.inner.connections.len());
        debug!(count = endpoints.len(), "Closed all connections");
    }

    /// Endpoints currently in the pool.
    #[must_use]
    pub fn endpoints(&self) -> Vec<EndpointId> {
        self.inner
            .connections
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Endpoints that have delivered (or offered) the given event.
    ///
    /// Records are kept for every distinct event any subscription on this
    /// pool has received, and are never evicted: a long-lived pool should
    /// call [`clear_seen`](Self::clear_seen) periodically.
    /// [`PoolStats::tracked_events`] reports the current size.
    #[must_use]
    pub fn seen_on(&self, event_id: &str) -> Vec<EndpointId> {
        self.inner.provenance.seen_on(event_id)
    }

    /// Drop all provenance records.
    pub fn clear_seen(&self) {
        self.inner.provenance.clear();
    }

    /// Get pool statistics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let mut stats = PoolStats {
            pooled: self.inner.connections.len(),
            ..PoolStats::default()
        };
        for entry in self.inner.connections.iter() {
            match entry.value().state() {
                ConnectionState::Connecting => stats.connecting += 1,
                ConnectionState::Open => stats.open += 1,
                _ => stats.stale += 1,
            }
        }
        stats.tracked_events = self.inner.provenance.len();
        stats
    }
}

impl std::fmt::Debug for RelayPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayPool")
            .field("config", &self.inner.config)
            .field("connections", &self.inner.connections.len())
            .finish_non_exhaustive()
    }
}

/// Pool statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Connections in the map.
    pub pooled: usize,
    /// Connections still connecting.
    pub connecting: usize,
    /// Open connections.
    pub open: usize,
    /// Closing or closed connections awaiting replacement.
    pub stale: usize,
    /// Events with provenance records.
    pub tracked_events: usize,
}

/// Normalize every address, failing on the first invalid one.
pub(crate) fn normalize_all<I, S>(urls: I) -> Result<Vec<EndpointId>, PoolError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    urls.into_iter().map(|url| normalize(url.as_ref())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PoolConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.eose_timeout, Duration::from_millis(2400));
        assert_eq!(config.get_timeout, Duration::from_millis(1500));
    }

    #[test]
    fn test_normalize_all_fails_fast() {
        let ok = normalize_all(["wss://a.example", "wss://b.example/"]).unwrap();
        assert_eq!(ok.len(), 2);
        assert!(normalize_all(["wss://a.example", "nope"]).is_err());
    }
}
