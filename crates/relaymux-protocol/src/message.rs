//! Client and relay message types.

use crate::event::{Event, EventId, Filter};

/// A message sent from a client to a relay.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// Open (or replace) a subscription.
    Req {
        /// Subscription identifier, scoped to the connection.
        subscription_id: String,
        /// Filters, OR-ed together by the relay.
        filters: Vec<Filter>,
    },
    /// Close a subscription.
    Close(String),
    /// Publish an event.
    Event(Box<Event>),
}

impl ClientMessage {
    /// Create a `REQ` message.
    #[must_use]
    pub fn req(subscription_id: impl Into<String>, filters: Vec<Filter>) -> Self {
        ClientMessage::Req {
            subscription_id: subscription_id.into(),
            filters,
        }
    }

    /// Create a `CLOSE` message.
    #[must_use]
    pub fn close(subscription_id: impl Into<String>) -> Self {
        ClientMessage::Close(subscription_id.into())
    }

    /// Create an `EVENT` publish message.
    #[must_use]
    pub fn event(event: Event) -> Self {
        ClientMessage::Event(Box::new(event))
    }

    /// The message's type tag.
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            ClientMessage::Req { .. } => "REQ",
            ClientMessage::Close(_) => "CLOSE",
            ClientMessage::Event(_) => "EVENT",
        }
    }
}

/// A message sent from a relay to a client.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayMessage {
    /// An event matching a subscription.
    Event {
        /// Subscription the event belongs to.
        subscription_id: String,
        /// The event.
        event: Box<Event>,
    },
    /// End of stored events for a subscription.
    Eose(String),
    /// Publish acknowledgement.
    Ok {
        /// Identifier of the published event.
        event_id: EventId,
        /// Whether the relay accepted the event.
        accepted: bool,
        /// Human-readable detail (prefixed reason on rejection).
        message: String,
    },
    /// Free-form relay notice.
    Notice(String),
    /// The relay closed a subscription on its side.
    Closed {
        /// Subscription identifier.
        subscription_id: String,
        /// Reason given by the relay.
        message: String,
    },
}

impl RelayMessage {
    /// The message's type tag.
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            RelayMessage::Event { .. } => "EVENT",
            RelayMessage::Eose(_) => "EOSE",
            RelayMessage::Ok { .. } => "OK",
            RelayMessage::Notice(_) => "NOTICE",
            RelayMessage::Closed { .. } => "CLOSED",
        }
    }

    /// The subscription this message is addressed to, if any.
    #[must_use]
    pub fn subscription_id(&self) -> Option<&str> {
        match self {
            RelayMessage::Event {
                subscription_id, ..
            }
            | RelayMessage::Closed {
                subscription_id, ..
            } => Some(subscription_id),
            RelayMessage::Eose(id) => Some(id),
            RelayMessage::Ok { .. } | RelayMessage::Notice(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_tags() {
        assert_eq!(ClientMessage::req("s", vec![]).tag(), "REQ");
        assert_eq!(ClientMessage::close("s").tag(), "CLOSE");
        assert_eq!(RelayMessage::Eose("s".into()).tag(), "EOSE");
        assert_eq!(RelayMessage::Notice("hi".into()).tag(), "NOTICE");
    }

    #[test]
    fn test_subscription_id() {
        assert_eq!(RelayMessage::Eose("s1".into()).subscription_id(), Some("s1"));
        let ok = RelayMessage::Ok {
            event_id: "e".into(),
            accepted: true,
            message: String::new(),
        };
        assert_eq!(ok.subscription_id(), None);
    }
}
