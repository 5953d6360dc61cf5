//! Which relays an event was seen on.

use crate::url::EndpointId;
use dashmap::DashMap;
use relaymux_protocol::EventId;

/// Event id → endpoints that delivered (or offered) it.
#[derive(Debug, Default)]
pub struct Provenance {
    seen: DashMap<EventId, Vec<EndpointId>>,
}

impl Provenance {
    /// Create an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `endpoint` has the event.
    ///
    /// Returns `true` if this endpoint was not yet recorded for the event.
    pub fn record(&self, event_id: &str, endpoint: &EndpointId) -> bool {
        if let Some(mut endpoints) = self.seen.get_mut(event_id) {
            if endpoints.contains(endpoint) {
                return false;
            }
            endpoints.push(endpoint.clone());
            return true;
        }
        let mut endpoints = self.seen.entry(event_id.to_string()).or_default();
        if endpoints.contains(endpoint) {
            return false;
        }
        endpoints.push(endpoint.clone());
        true
    }

    /// Endpoints the event was seen on, in first-seen order.
    #[must_use]
    pub fn seen_on(&self, event_id: &str) -> Vec<EndpointId> {
        self.seen
            .get(event_id)
            .map(|endpoints| endpoints.clone())
            .unwrap_or_default()
    }

    /// Forget an event.
    pub fn forget(&self, event_id: &str) -> bool {
        self.seen.remove(event_id).is_some()
    }

    /// Number of tracked events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Check if nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Forget everything.
    pub fn clear(&self) {
        self.seen.clear();
    }
}
