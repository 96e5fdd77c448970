//! Signal Relay Server
//!
//! WebSocket signaling relay for WebRTC calls. Peers register a user id,
//! then exchange offers, answers and ICE candidates through the relay
//! until their media connection is established directly.
//!
//! Signal payloads are opaque: the relay routes them but never parses them.

use std::time::Duration;

use clap::Parser;

use signal_relay::{router, AppState, RelayConfig};

// ── CLI Arguments ─────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "signal-relay", version, about = "WebRTC call signaling relay")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value_t = 8080, env = "RELAY_PORT")]
    port: u16,

    /// Seconds an unanswered call rings before both sides get call-timeout
    /// (0 disables)
    #[arg(long, default_value_t = 45, env = "RING_TIMEOUT_SECS")]
    ring_timeout_secs: u64,

    /// Seconds a finished call is kept so late messages are recognized
    #[arg(long, default_value_t = 300, env = "CALL_RETENTION_SECS")]
    call_retention_secs: i64,

    /// Seconds between sweeps of finished calls
    #[arg(long, default_value_t = 60, env = "SWEEP_INTERVAL_SECS")]
    sweep_interval_secs: u64,

    /// Maximum sessions in one group room
    #[arg(long, default_value_t = 50, env = "MAX_GROUP_SIZE")]
    max_group_size: usize,
}

// ── Entry Point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "signal_relay=info,tower_http=info".into()),
        )
        .init();

    let args = Args::parse();

    let config = RelayConfig {
        port: args.port,
        ring_timeout_secs: args.ring_timeout_secs,
        call_retention_secs: args.call_retention_secs,
        sweep_interval_secs: args.sweep_interval_secs.max(1),
        max_group_size: args.max_group_size,
    };

    tracing::info!(
        ring_timeout_secs = config.ring_timeout_secs,
        call_retention_secs = config.call_retention_secs,
        max_group_size = config.max_group_size,
        "Relay configured"
    );

    let state = AppState::start(config.clone());

    // Spawn periodic sweep of finished calls
    let sweep_relay = state.relay.clone();
    let sweep_interval = config.sweep_interval_secs;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(sweep_interval));
        loop {
            interval.tick().await;
            sweep_relay.sweep();
        }
    });

    let app = router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("Signal relay starting on {}", addr);

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
