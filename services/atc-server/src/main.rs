use std::path::Path;
use std::sync::Arc;

use atc_server::{config, Orchestrator};
use atc_store_sqlite::SqliteStore;
use tracing::info;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "atc-server starting");

    let cfg = match config::load_config() {
        Ok(cfg) => {
            info!(frequencies = cfg.frequencies.len(), "config loaded");
            cfg
        }
        Err(e) => {
            eprintln!("FATAL: failed to load config: {e}");
            std::process::exit(1);
        }
    };

    let db_path = cfg.database.path.clone();
    let store: Arc<SqliteStore> = match SqliteStore::open(Path::new(&db_path)) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            eprintln!("FATAL: failed to open database '{db_path}': {e}");
            std::process::exit(1);
        }
    };

    let bind_addr = format!("{}:{}", cfg.server.host, cfg.server.port);
    let orchestrator = match Orchestrator::start(cfg, store).await {
        Ok(o) => o,
        Err(e) => {
            eprintln!("FATAL: failed to start orchestrator: {e}");
            std::process::exit(1);
        }
    };

    let router = orchestrator.router();
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("failed to bind event bus listener");
    info!(addr = %bind_addr, "event bus listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    orchestrator.stop().await;
    info!("atc-server shut down gracefully");
}

/// Waits for SIGTERM or Ctrl-C (SIGINT) and returns to trigger graceful
/// shutdown, exactly as `services/server/src/main.rs::shutdown_signal` does.
async fn shutdown_signal() {
    use tokio::signal;

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
        _ = ctrl_c => { info!("received Ctrl+C, shutting down"); },
        _ = terminate => { info!("received SIGTERM, shutting down"); },
    }
}
