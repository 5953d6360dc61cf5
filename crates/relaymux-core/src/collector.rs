//! One-shot queries over an aggregate subscription.

use crate::connection::SubscriptionOptions;
use crate::error::PoolError;
use crate::pool::RelayPool;
use crate::subscription::Completion;
use parking_lot::Mutex;
use relaymux_protocol::{Event, Filter};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::debug;

impl RelayPool {
    /// Gather every event the relays hold for `filters`.
    ///
    /// Events are returned in arrival order once the subscription completes.
    /// A timeout completion yields whatever arrived before the watchdog.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::InvalidAddress`] if any address is invalid.
    pub async fn collect<I, S>(
        &self,
        urls: I,
        filters: Vec<Filter>,
        options: SubscriptionOptions,
    ) -> Result<Vec<Event>, PoolError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let (events, _) = self.collect_with_completion(urls, filters, options).await?;
        Ok(events)
    }

    /// Like [`collect`](Self::collect), also reporting how the subscription
    /// completed.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::InvalidAddress`] if any address is invalid.
    pub async fn collect_with_completion<I, S>(
        &self,
        urls: I,
        filters: Vec<Filter>,
        options: SubscriptionOptions,
    ) -> Result<(Vec<Event>, Completion), PoolError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let subscription = self.prepare(urls)?;

        let buffer = Arc::new(Mutex::new(Vec::new()));
        {
            let buffer = Arc::clone(&buffer);
            subscription.on_event(move |event| buffer.lock().push(event.clone()));
        }
        let signal = subscription.completion();

        subscription.launch(self, filters, options);
        let completion = signal.await.unwrap_or(Completion::Timeout);
        subscription.unsubscribe();

        let events = std::mem::take(&mut *buffer.lock());
        debug!(
            subscription = %subscription.id(),
            events = events.len(),
            %completion,
            "Collected"
        );
        Ok((events, completion))
    }

    /// Fetch the first event matching `filter`.
    ///
    /// Resolves with the first delivered event, or `None` once `get_timeout`
    /// elapses. The subscription is closed either way.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::InvalidAddress`] if any address is invalid.
    pub async fn get<I, S>(
        &self,
        urls: I,
        filter: Filter,
        options: SubscriptionOptions,
    ) -> Result<Option<Event>, PoolError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let subscription = self.prepare(urls)?;

        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));
        subscription.on_event(move |event| {
            if let Some(tx) = tx.lock().take() {
                let _ = tx.send(event.clone());
            }
        });

        subscription.launch(self, vec![filter], options);
        let first = tokio::time::timeout(self.inner.config.get_timeout, rx)
            .await
            .ok()
            .and_then(Result::ok);
        subscription.unsubscribe();

        debug!(subscription = %subscription.id(), found = first.is_some(), "Get finished");
        Ok(first)
    }
}
