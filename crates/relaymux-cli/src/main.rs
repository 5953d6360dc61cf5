//! # relaymux
//!
//! Query and publish to a set of relays through one connection pool.
//!
//! ## Usage
//!
//! ```bash
//! # Canonical form of relay addresses
//! relaymux normalize WSS://Relay.Example:443//
//!
//! # Every kind-1 event from two relays, deduplicated
//! relaymux collect -r wss://relay.one -r wss://relay.two -f '{"kinds":[1],"limit":20}'
//!
//! # Publish an event stored in a file
//! relaymux publish -r wss://relay.one -e @note.json
//!
//! # Relays and timeouts from a config file
//! relaymux --config ~/relaymux.toml collect -f '{"kinds":[0]}'
//! ```

mod commands;
mod config;
mod metrics;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use relaymux_core::RelayPool;
use relaymux_transport::WebSocketConnector;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "relaymux", version, about = "Query and publish to many relays at once")]
struct Cli {
    /// Config file (defaults to relaymux.toml, /etc/relaymux or ~/.config/relaymux)
    #[arg(short, long, global = true, env = "RELAYMUX_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the canonical form of relay addresses
    Normalize {
        #[arg(required = true)]
        urls: Vec<String>,
    },
    /// Print every matching event once all relays answered or the watchdog elapsed
    Collect(QueryArgs),
    /// Print the first matching event
    Get(QueryArgs),
    /// Publish an event and report each relay's answer
    Publish(PublishArgs),
}

#[derive(Args, Debug)]
struct QueryArgs {
    /// Relay address (repeatable)
    #[arg(short, long = "relay")]
    relays: Vec<String>,

    /// Filter as JSON
    #[arg(short, long, default_value = "{}")]
    filter: String,
}

#[derive(Args, Debug)]
struct PublishArgs {
    /// Relay address (repeatable)
    #[arg(short, long = "relay")]
    relays: Vec<String>,

    /// Event as JSON, or @path to read it from a file
    #[arg(short, long)]
    event: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relaymux=info,relaymux_core=info,relaymux_transport=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    if let Command::Normalize { urls } = &cli.command {
        return commands::normalize_urls(urls);
    }

    // Load configuration
    let config = config::Config::load(cli.config.as_deref())?;

    // Initialize metrics
    metrics::init_metrics();
    if config.metrics.enabled {
        metrics::start_metrics_server(config.metrics.port)?;
    }

    let pool = RelayPool::with_config(
        Arc::new(WebSocketConnector::new()),
        config.pool.to_pool_config(),
    );

    let result = match cli.command {
        Command::Normalize { .. } => Ok(()),
        Command::Collect(args) => {
            let relays = commands::relays(args.relays, &config.relays)?;
            commands::collect(&pool, &relays, &args.filter).await
        }
        Command::Get(args) => {
            let relays = commands::relays(args.relays, &config.relays)?;
            commands::get(&pool, &relays, &args.filter).await
        }
        Command::Publish(args) => {
            let relays = commands::relays(args.relays, &config.relays)?;
            commands::publish(&pool, &relays, &args.event).await
        }
    };

    pool.close_all();
    result
}
