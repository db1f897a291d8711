//! Greenhouse broker binary.
//!
//! # Usage
//!
//! ```bash
//! # Listen on the default port
//! greenhouse-server
//!
//! # Custom address, verbose logging
//! greenhouse-server --bind 127.0.0.1:4000 --log-level debug
//! ```

use clap::Parser;
use greenhouse_server::{BrokerConfig, DEFAULT_OUTBOX_CAPACITY, Server, ServerRuntimeConfig};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Greenhouse broker server
#[derive(Parser, Debug)]
#[command(name = "greenhouse-server")]
#[command(about = "Relays between greenhouse sensor nodes and control panels")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0:1212")]
    bind: String,

    /// Maximum concurrent connections
    #[arg(long, default_value = "10000")]
    max_connections: usize,

    /// Messages queued per connection before a slow reader is disconnected
    #[arg(long, default_value_t = DEFAULT_OUTBOX_CAPACITY)]
    outbox_capacity: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!("Greenhouse server starting");
    tracing::info!("Binding to {}", args.bind);

    let config = ServerRuntimeConfig {
        bind_address: args.bind,
        broker: BrokerConfig { max_connections: args.max_connections },
        outbox_capacity: args.outbox_capacity,
    };

    let server = Server::bind(config).await?;

    tracing::info!("Server listening on {}", server.local_addr()?);

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await?;

    tracing::info!("Server stopped");

    Ok(())
}
