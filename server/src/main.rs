//! Versecut Server - Main entry point.
//!
//! This binary starts the Versecut token service with:
//! - Structured JSON logging for production
//! - Graceful shutdown handling (SIGTERM/SIGINT)
//! - Background sweep of expired sessions
//!
//! # Configuration
//!
//! See [`versecut_server::config`] for environment variable configuration.
//!
//! # Example
//!
//! ```bash
//! VERSECUT_GOOGLE_CLIENT_ID="1234.apps.googleusercontent.com" \
//! VERSECUT_GOOGLE_CLIENT_SECRET="secret" \
//! VERSECUT_COOKIE_SECURE=true \
//! PORT=8080 \
//! cargo run --release --bin versecut-server
//! ```

use std::process::ExitCode;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use versecut_server::config::{Config, SessionStoreKind};
use versecut_server::routes::{create_router, AppState};
use versecut_server::tokens::TokenService;

/// Interval between sweeps of expired sessions (5 minutes).
const SWEEP_INTERVAL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "Failed to load configuration");
            eprintln!("Error: {err}");
            eprintln!();
            eprintln!("Required environment variables:");
            eprintln!("  VERSECUT_GOOGLE_CLIENT_ID     - OAuth client ID");
            eprintln!("  VERSECUT_GOOGLE_CLIENT_SECRET - OAuth client secret");
            eprintln!();
            eprintln!("Optional environment variables:");
            eprintln!("  PORT                          - HTTP server port (default: 8080)");
            eprintln!("  RUST_LOG                      - Log level filter (default: info)");
            eprintln!("  VERSECUT_SESSION_STORE        - 'memory' or 'file' (default: file)");
            eprintln!("  VERSECUT_SESSION_FILE         - Session file path");
            eprintln!("  VERSECUT_COOKIE_SECURE        - Set to 'true' when served over TLS");
            return ExitCode::from(1);
        }
    };

    let store_kind = match &config.session_store {
        SessionStoreKind::Memory => "memory",
        SessionStoreKind::File(_) => "file",
    };
    info!(
        port = config.port,
        session_store = store_kind,
        cookie_secure = config.cookie_secure,
        "Versecut server starting"
    );

    let state = match AppState::from_config(&config) {
        Ok(state) => state,
        Err(err) => {
            error!(error = %err, "Failed to initialize token service");
            return ExitCode::from(1);
        }
    };

    let sweep_handle = spawn_sweep_task(state.tokens.clone(), SWEEP_INTERVAL);
    info!(
        interval_secs = SWEEP_INTERVAL.as_secs(),
        "Session sweep task started"
    );

    let app = create_router(state);

    let bind_addr = format!("0.0.0.0:{}", config.port);
    let listener = match TcpListener::bind(&bind_addr).await {
        Ok(listener) => {
            info!(port = config.port, address = %bind_addr, "Server listening");
            listener
        }
        Err(err) => {
            error!(error = %err, address = %bind_addr, "Failed to bind to address");
            return ExitCode::from(1);
        }
    };

    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());

    info!("Server ready to accept connections");

    if let Err(err) = server.await {
        error!(error = %err, "Server error");
        return ExitCode::from(1);
    }

    info!("Server shutting down gracefully");
    sweep_handle.abort();
    info!("Server shutdown complete");
    ExitCode::SUCCESS
}

/// Periodically removes sessions whose refresh token or server-side
/// lifetime has expired.
fn spawn_sweep_task(tokens: TokenService, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match tokens.sweep_expired().await {
                Ok(0) => debug!("Session sweep found nothing to remove"),
                Ok(removed) => info!(removed_count = removed, "Swept expired sessions"),
                Err(err) => warn!(error = %err, "Session sweep failed"),
            }
        }
    })
}

/// Initialize structured logging with tracing.
///
/// JSON output, filtered by `RUST_LOG` with a default of
/// `info,tower_http=debug`.
fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug,axum::rejection=trace"));

    let json_layer = fmt::layer()
        .json()
        .with_target(true)
        .with_level(true)
        .with_file(false)
        .with_line_number(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .init();
}

/// Resolves when SIGINT or SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
