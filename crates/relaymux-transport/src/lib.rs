//! # relaymux-transport
//!
//! Relay connections for the relaymux pool.
//!
//! [`WebSocketConnector`] plugs into [`relaymux_core::RelayPool`] and opens
//! one WebSocket per relay, speaking the JSON-array protocol from
//! `relaymux-protocol`.
//!
//! ```rust,ignore
//! use relaymux_core::RelayPool;
//! use relaymux_transport::WebSocketConnector;
//! use std::sync::Arc;
//!
//! let pool = RelayPool::new(Arc::new(WebSocketConnector::new()));
//! ```

#[cfg(feature = "websocket")]
pub mod websocket;

#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConfig, WebSocketConnection, WebSocketConnector};
