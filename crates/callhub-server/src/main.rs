//! Signaling relay for two-party audio/video calls.
//!
//! Browsers connect over WebSocket, register a display name, and exchange
//! call offers, answers and ICE candidates through the relay. Media never
//! passes through it.
//!
//! Run:
//!   cargo run -p callhub-server -- --port 5001
//!   RUST_LOG=callhub=debug cargo run -p callhub-server -- --config callhub.toml

use callhub_server::{Args, Config, server};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("callhub=info".parse()?))
        .init();

    let args = Args::parse();
    let config = Config::load(&args)?;

    tracing::info!(
        "Starting callhub on {} (ring timeout: {})",
        config.listen,
        match config.ring_timeout() {
            Some(t) => format!("{}s", t.as_secs()),
            None => "off".to_string(),
        }
    );

    server::run(config).await
}
