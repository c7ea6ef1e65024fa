//! `tworooms-server`: runs the coordinator until Ctrl-C.

use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;
use tworooms::{TwoRoomsError, TwoRoomsServer};

/// Two Rooms and a Boom game coordinator.
#[derive(Debug, Parser)]
#[command(name = "tworooms-server", version, about)]
struct Args {
    /// Interface to listen on.
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on.
    #[arg(long, env = "PORT", default_value_t = 8080)]
    port: u16,

    /// Seconds of silence before a connection is dropped.
    #[arg(long, env = "IDLE_TIMEOUT_SECS", default_value_t = 60)]
    idle_timeout_secs: u64,

    /// Seconds between keepalive pings.
    #[arg(long, env = "PING_INTERVAL_SECS", default_value_t = 54)]
    ping_interval_secs: u64,
}

#[tokio::main]
async fn main() -> Result<(), TwoRoomsError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let server = TwoRoomsServer::builder()
        .bind(&format!("{}:{}", args.host, args.port))
        .idle_timeout(Duration::from_secs(args.idle_timeout_secs))
        .ping_interval(Duration::from_secs(args.ping_interval_secs))
        .build()
        .await?;

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        })
        .await
}
