//! # relaymux-protocol
//!
//! Wire messages exchanged between relaymux clients and relays.
//!
//! Relays speak a JSON-array text protocol over WebSocket:
//!
//! - `["REQ", <sub id>, <filter>...]` / `["CLOSE", <sub id>]` - subscriptions
//! - `["EVENT", <event>]` - publish an event
//! - `["EVENT", <sub id>, <event>]` - deliver a stored or live event
//! - `["EOSE", <sub id>]` - end of stored events for a subscription
//! - `["OK", <event id>, <accepted>, <message>]` - publish acknowledgement
//!
//! ## Example
//!
//! ```rust
//! use relaymux_protocol::{codec, ClientMessage, Filter};
//!
//! let req = ClientMessage::req("sub-1", vec![Filter::new().kinds([1]).limit(10)]);
//! let text = codec::encode(&req).unwrap();
//! assert!(text.starts_with("[\"REQ\",\"sub-1\""));
//! ```

pub mod codec;
pub mod event;
pub mod message;

pub use codec::{decode, decode_client, encode, encode_relay, ProtocolError};
pub use event::{Event, EventId, Filter};
pub use message::{ClientMessage, RelayMessage};
