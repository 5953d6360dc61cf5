//! Subcommand implementations.

use anyhow::{bail, Context, Result};
use relaymux_core::{normalize, Event, Filter, PublishStatus, RelayPool, SubscriptionOptions};
use std::collections::HashMap;
use std::io::Write;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Print the canonical id of each address.
pub fn normalize_urls(urls: &[String]) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    for url in urls {
        let endpoint = normalize(url)?;
        writeln!(stdout, "{endpoint}")?;
    }
    Ok(())
}

/// Print every matching event as one JSON line.
pub async fn collect(pool: &RelayPool, relays: &[String], filter: &str) -> Result<()> {
    let filter = parse_filter(filter)?;
    let (events, completion) = pool
        .collect_with_completion(relays, vec![filter], SubscriptionOptions::new())
        .await?;

    let mut stdout = std::io::stdout().lock();
    for event in &events {
        writeln!(stdout, "{}", serde_json::to_string(event)?)?;
    }
    info!(events = events.len(), %completion, "Collect finished");
    Ok(())
}

/// Print the first matching event.
pub async fn get(pool: &RelayPool, relays: &[String], filter: &str) -> Result<()> {
    let filter = parse_filter(filter)?;
    let Some(event) = pool.get(relays, filter, SubscriptionOptions::new()).await? else {
        bail!("No matching event within {:?}", pool.config().get_timeout);
    };
    println!("{}", serde_json::to_string(&event)?);
    Ok(())
}

/// Connect to every relay, publish `event`, and report each relay's answer.
pub async fn publish(pool: &RelayPool, relays: &[String], event: &str) -> Result<()> {
    let event = parse_event(event)?;

    let mut connecting = JoinSet::new();
    for relay in relays {
        let pool = pool.clone();
        let relay = relay.clone();
        connecting.spawn(async move {
            if let Err(e) = pool.ensure_connection(&relay).await {
                warn!(relay = %relay, error = %e, "Relay unavailable");
            }
        });
    }
    while connecting.join_next().await.is_some() {}

    let handles = pool.publish(relays, &event)?;
    let (tx, mut rx) = mpsc::unbounded_channel();
    for handle in &handles {
        for status in [PublishStatus::Ok, PublishStatus::Failed] {
            let tx = tx.clone();
            let endpoint = handle.endpoint().clone();
            handle.on(
                status,
                Box::new(move |message| {
                    let _ = tx.send((endpoint.clone(), status, message.to_string()));
                }),
            );
        }
    }
    drop(tx);

    let mut outcomes = HashMap::new();
    let deadline = tokio::time::sleep(pool.config().connect_timeout);
    tokio::pin!(deadline);
    while outcomes.len() < handles.len() {
        tokio::select! {
            received = rx.recv() => match received {
                Some((endpoint, status, message)) => {
                    outcomes.entry(endpoint).or_insert((status, message));
                }
                None => break,
            },
            () = &mut deadline => break,
        }
    }

    let mut stdout = std::io::stdout().lock();
    let mut accepted = 0;
    for handle in &handles {
        match outcomes.get(handle.endpoint()) {
            Some((PublishStatus::Ok, message)) => {
                accepted += 1;
                writeln!(stdout, "{}\tok\t{message}", handle.endpoint())?;
            }
            Some((PublishStatus::Failed, message)) => {
                writeln!(stdout, "{}\tfailed\t{message}", handle.endpoint())?;
            }
            None => writeln!(stdout, "{}\ttimeout", handle.endpoint())?,
        }
    }

    if accepted == 0 {
        bail!("No relay accepted event {}", event.id);
    }
    Ok(())
}

/// Resolve the relay list: explicit flags win over the configured list.
pub fn relays(explicit: Vec<String>, configured: &[String]) -> Result<Vec<String>> {
    let relays = if explicit.is_empty() {
        configured.to_vec()
    } else {
        explicit
    };
    if relays.is_empty() {
        bail!("No relays given; pass --relay or set `relays` in the config file");
    }
    // Reject bad addresses before any connection is opened.
    for relay in &relays {
        normalize(relay)?;
    }
    Ok(relays)
}

fn parse_filter(text: &str) -> Result<Filter> {
    serde_json::from_str(text).with_context(|| format!("Invalid filter: {text}"))
}

fn parse_event(arg: &str) -> Result<Event> {
    let text = match arg.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(shellexpand::tilde(path).as_ref())
            .with_context(|| format!("Failed to read event file: {path}"))?,
        None => arg.to_string(),
    };
    serde_json::from_str(&text).context("Invalid event JSON")
}
