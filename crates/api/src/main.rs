//! `framewatch-api` -- HTTP and WebSocket front of the job pipeline.
//!
//! Configuration comes from the environment (see `ServerConfig::from_env`
//! and `SupervisorConfig::from_env`); a `.env` file is honoured.

use std::net::SocketAddr;
use std::sync::Arc;

use framewatch_api::config::ServerConfig;
use framewatch_api::router::app_router;
use framewatch_api::state::AppState;
use framewatch_pipeline::{JobStore, LifecycleController, MemoryJobStore, Supervisor, SupervisorConfig};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_FILTER: &str = "framewatch_api=debug,framewatch_pipeline=debug,tower_http=debug";

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = ServerConfig::from_env();
    let supervisor_config = SupervisorConfig::from_env();
    tracing::info!(
        host = %config.host,
        port = config.port,
        worker_bin = %supervisor_config.worker_bin.display(),
        results_dir = %supervisor_config.results_dir.display(),
        "Configuration loaded",
    );
    if let Err(e) = std::fs::create_dir_all(&supervisor_config.results_dir) {
        panic!(
            "cannot create results directory {}: {e}",
            supervisor_config.results_dir.display()
        );
    }

    let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
    let supervisor = Arc::new(Supervisor::new(supervisor_config, Arc::clone(&store)));
    let shutdown = CancellationToken::new();
    let state = AppState {
        config: Arc::new(config.clone()),
        controller: Arc::new(LifecycleController::new(store, Arc::clone(&supervisor))),
        shutdown: shutdown.clone(),
    };

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .unwrap_or_else(|e| panic!("HOST/PORT do not form a socket address: {e}"));
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => panic!("cannot bind {addr}: {e}"),
    };
    tracing::info!(%addr, "Listening");

    let served = axum::serve(listener, app_router(state, &config))
        .with_graceful_shutdown(async move {
            wait_for_signal().await;
            // Open streams hold upgraded connections axum does not drain.
            shutdown.cancel();
        })
        .await;
    if let Err(e) = served {
        tracing::error!(error = %e, "Server failed");
    }

    let workers = supervisor.worker_count().await;
    tracing::info!(workers, "Stopping workers");
    supervisor.shutdown().await;
    tracing::info!("Shutdown complete");
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Resolves on SIGINT or SIGTERM.
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable, using Ctrl-C only");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => tracing::info!("SIGINT received"),
            _ = term.recv() => tracing::info!("SIGTERM received"),
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Ctrl-C received");
    }
}
