//! netframe server binary.
//!
//! Ambient tooling to exercise the library API from the command line; the
//! real configuration surface is [`netframe_server::ServerConfig`]'s
//! builder methods, used directly by embedders.
//!
//! # Usage
//!
//! ```bash
//! netframe-server --bind 0.0.0.0:4433 --source-id server
//! ```

use clap::Parser;
use netframe_server::{Server, ServerConfig};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// netframe protocol server
#[derive(Parser, Debug)]
#[command(name = "netframe-server")]
#[command(about = "netframe messaging protocol server")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0:4433")]
    bind: String,

    /// This server's own id, compared against incoming `target_id` to
    /// decide local delivery vs. fan-out
    #[arg(long, default_value = "server")]
    source_id: String,

    /// Pre-shared key every session must present in `request_connection`
    #[arg(long, default_value = "")]
    connection_key: String,

    /// Caps simultaneous sessions; 0 means unlimited
    #[arg(long, default_value = "0")]
    session_limit_count: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!("netframe server starting");

    let config = ServerConfig {
        bind_address: args.bind,
        source_id: args.source_id,
        connection_key: args.connection_key,
        session_limit_count: args.session_limit_count,
        ..ServerConfig::default()
    };

    let server = Server::bind(config).await?;
    tracing::info!(addr = %server.local_addr()?, "netframe server listening");
    server.run().await?;

    Ok(())
}
