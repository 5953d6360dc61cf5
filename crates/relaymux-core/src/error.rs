//! Pool errors.

use crate::connection::TransportError;
use crate::url::EndpointId;
use thiserror::Error;

/// Errors surfaced by pool operations.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The address could not be parsed as a relay endpoint.
    #[error("Invalid relay address {url:?}: {reason}")]
    InvalidAddress {
        /// The raw address as given by the caller.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The connect sequence for an endpoint failed.
    #[error("Failed to connect to {endpoint}: {source}")]
    ConnectFailed {
        /// Endpoint that failed.
        endpoint: EndpointId,
        /// Underlying transport error.
        #[source]
        source: TransportError,
    },

    /// No live connection exists for the endpoint.
    ///
    /// Only reported through a publish handle's failure listener.
    #[error("relay {0} not connected")]
    NotConnected(EndpointId),
}

impl PoolError {
    pub(crate) fn invalid_address(url: &str, reason: impl Into<String>) -> Self {
        PoolError::InvalidAddress {
            url: url.to_string(),
            reason: reason.into(),
        }
    }

    /// The endpoint this error concerns, if any.
    #[must_use]
    pub fn endpoint(&self) -> Option<&EndpointId> {
        match self {
            PoolError::ConnectFailed { endpoint, .. } | PoolError::NotConnected(endpoint) => {
                Some(endpoint)
            }
            PoolError::InvalidAddress { .. } => None,
        }
    }
}
