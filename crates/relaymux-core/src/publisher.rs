//! Publishing to many relays.

use crate::connection::{PublishHandle, PublishListener, PublishStatus};
use crate::error::PoolError;
use crate::listeners::ListenerId;
use crate::metrics;
use crate::pool::{normalize_all, RelayPool};
use crate::url::EndpointId;
use relaymux_protocol::Event;
use tracing::debug;

/// Stand-in handle for an endpoint with no live connection.
///
/// A `Failed` listener is invoked as soon as it is registered; no other
/// listener is ever invoked.
#[derive(Debug, Clone)]
pub struct NotConnected {
    endpoint: EndpointId,
}

impl NotConnected {
    /// Create a handle for `endpoint`.
    #[must_use]
    pub fn new(endpoint: EndpointId) -> Self {
        Self { endpoint }
    }

    /// The failure reason reported to listeners.
    #[must_use]
    pub fn reason(&self) -> String {
        PoolError::NotConnected(self.endpoint.clone()).to_string()
    }
}

impl PublishHandle for NotConnected {
    fn endpoint(&self) -> &EndpointId {
        &self.endpoint
    }

    fn on(&self, status: PublishStatus, listener: PublishListener) -> ListenerId {
        if status == PublishStatus::Failed {
            listener(&self.reason());
        }
        ListenerId::next()
    }

    fn off(&self, _id: ListenerId) {}
}

impl RelayPool {
    /// Publish `event` to every endpoint in `urls`.
    ///
    /// Returns one handle per address, in input order. Endpoints without a
    /// connecting or open connection get a [`NotConnected`] handle; this call
    /// never connects or waits.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::InvalidAddress`] if any address is invalid.
    pub fn publish<I, S>(&self, urls: I, event: &Event) -> Result<Vec<Box<dyn PublishHandle>>, PoolError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let endpoints = normalize_all(urls)?;
        let handles = endpoints
            .into_iter()
            .map(|endpoint| match self.get_connection(&endpoint) {
                Some(connection) if connection.state().is_reusable() => {
                    metrics::record_publish(true);
                    debug!(endpoint = %endpoint, event = %event.id, "Publishing");
                    connection.publish(event)
                }
                _ => {
                    metrics::record_publish(false);
                    debug!(endpoint = %endpoint, event = %event.id, "Not connected, skipping publish");
                    Box::new(NotConnected::new(endpoint)) as Box<dyn PublishHandle>
                }
            })
            .collect();
        Ok(handles)
    }
}
