//! # relaymux-core
//!
//! A connection pool that fans one logical query out to many relays and
//! merges the answers.
//!
//! This crate provides:
//!
//! - **Url** - Endpoint normalization so equivalent addresses share a slot
//! - **Pool** - Endpoint → connection map with a bounded connect watchdog
//! - **Subscription** - Deduplicated aggregate subscriptions with a
//!   quorum-with-timeout completion signal
//! - **Collector** - Buffer an aggregate subscription into one batch
//! - **Publisher** - Fan an event out, one result handle per relay
//!
//! The pool never speaks the wire protocol itself; it drives connections
//! through the traits in [`connection`].
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌──────────────┐
//! │  RelayPool  │────▶│  Connector  │────▶│  Connection  │ × N
//! └─────────────┘     └─────────────┘     └──────────────┘
//!        │                                       │ events / EOSE
//!        ▼                                       ▼
//! ┌─────────────────────────────────────────────────────┐
//! │ AggregateHandle: dedup set, EOSE quorum, watchdog   │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod collector;
pub mod connection;
pub mod error;
pub mod listeners;
pub mod metrics;
pub mod pool;
pub mod provenance;
pub mod publisher;
pub mod subscription;
pub mod url;

pub use connection::{
    AlreadyHave, ChildSubscription, Connection, ConnectionState, Connector, PublishHandle,
    PublishListener, PublishStatus, SubscriptionHandler, SubscriptionOptions, TransportError,
};
pub use error::PoolError;
pub use listeners::{ListenerId, Listeners};
pub use pool::{PoolConfig, PoolStats, RelayPool};
pub use publisher::NotConnected;
pub use subscription::{AggregateHandle, Completion, CompletionSignal, EventStream};
pub use url::{normalize, EndpointId};

pub use relaymux_protocol::{Event, EventId, Filter};
