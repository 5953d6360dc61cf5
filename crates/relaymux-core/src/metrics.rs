//! Pool instrumentation.
//!
//! Emits through the `metrics` facade; installing an exporter is up to the
//! application.

use crate::subscription::Completion;
use metrics::{counter, gauge};

/// Metric names.
pub mod names {
    pub const CONNECTIONS_OPENED: &str = "relaymux_connections_opened_total";
    pub const CONNECT_FAILURES: &str = "relaymux_connect_failures_total";
    pub const CONNECT_WATCHDOG: &str = "relaymux_connect_watchdog_total";
    pub const CONNECTIONS_POOLED: &str = "relaymux_connections_pooled";
    pub const SUBSCRIPTIONS_ACTIVE: &str = "relaymux_subscriptions_active";
    pub const EVENTS_DELIVERED: &str = "relaymux_events_delivered_total";
    pub const EVENTS_DUPLICATE: &str = "relaymux_events_duplicate_total";
    pub const COMPLETIONS: &str = "relaymux_completions_total";
    pub const PUBLISHES: &str = "relaymux_publishes_total";
}

/// Describe every metric so exporters can render help text.
pub fn describe() {
    metrics::describe_counter!(names::CONNECTIONS_OPENED, "Connections that reached open");
    metrics::describe_counter!(names::CONNECT_FAILURES, "Connect attempts that failed");
    metrics::describe_counter!(
        names::CONNECT_WATCHDOG,
        "Connect attempts still pending when the watchdog elapsed"
    );
    metrics::describe_gauge!(names::CONNECTIONS_POOLED, "Connections currently pooled");
    metrics::describe_gauge!(
        names::SUBSCRIPTIONS_ACTIVE,
        "Aggregate subscriptions not yet unsubscribed"
    );
    metrics::describe_counter!(names::EVENTS_DELIVERED, "Events delivered to listeners");
    metrics::describe_counter!(names::EVENTS_DUPLICATE, "Duplicate events dropped");
    metrics::describe_counter!(names::COMPLETIONS, "Aggregate completions by reason");
    metrics::describe_counter!(names::PUBLISHES, "Publish handles by connection status");
}

pub(crate) fn record_connected() {
    counter!(names::CONNECTIONS_OPENED).increment(1);
}

pub(crate) fn record_connect_failure() {
    counter!(names::CONNECT_FAILURES).increment(1);
}

pub(crate) fn record_connect_watchdog() {
    counter!(names::CONNECT_WATCHDOG).increment(1);
}

pub(crate) fn set_pooled(count: usize) {
    gauge!(names::CONNECTIONS_POOLED).set(count as f64);
}

pub(crate) fn record_subscription_opened() {
    gauge!(names::SUBSCRIPTIONS_ACTIVE).increment(1.0);
}

pub(crate) fn record_subscription_closed() {
    gauge!(names::SUBSCRIPTIONS_ACTIVE).decrement(1.0);
}

pub(crate) fn record_delivered() {
    counter!(names::EVENTS_DELIVERED).increment(1);
}

pub(crate) fn record_duplicate() {
    counter!(names::EVENTS_DUPLICATE).increment(1);
}

pub(crate) fn record_completion(completion: Completion) {
    counter!(names::COMPLETIONS, "reason" => completion.as_str()).increment(1);
}

pub(crate) fn record_publish(connected: bool) {
    let status = if connected { "sent" } else { "not_connected" };
    counter!(names::PUBLISHES, "status" => status).increment(1);
}
