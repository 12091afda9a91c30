use std::net::SocketAddr;
use std::sync::Arc;

use motif_api::config::ServerConfig;
use motif_api::router::build_app_router;
use motif_api::state::AppState;
use motif_comfyui::pipeline::{Bridge, BridgeConfig};
use motif_comfyui::workflow::Workflow;
use motif_core::creations::CreationsStore;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "motif_api=debug,motif_comfyui=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(
        host = %config.host,
        port = %config.port,
        comfyui = %config.engine.api_url,
        strategy = ?config.engine.strategy,
        "Loaded server configuration",
    );

    // --- Workflow templates ---
    // Fail fast: a missing or malformed template means every request
    // would fail, so refuse to serve at all.
    let generate_workflow = Workflow::from_file(&config.engine.generate.workflow_path)
        .await
        .unwrap_or_else(|e| panic!("Failed to load generation workflow: {e}"));
    let remove_background_workflow =
        Workflow::from_file(&config.engine.remove_background.workflow_path)
            .await
            .unwrap_or_else(|e| panic!("Failed to load background-removal workflow: {e}"));
    tracing::info!(
        generate = %config.engine.generate.workflow_path,
        remove_background = %config.engine.remove_background.workflow_path,
        "Workflow templates loaded",
    );

    // --- Engine bridge ---
    let bridge = Bridge::new(BridgeConfig {
        api_url: config.engine.api_url.clone(),
        ws_url: config.engine.ws_url.clone(),
        strategy: config.engine.strategy,
        track_timeout: config.engine.track_timeout,
        poll_interval: config.engine.poll_interval,
        creations: Some(CreationsStore::new(&config.engine.creations_dir)),
    });

    // --- App state ---
    let state = AppState {
        config: Arc::new(config.clone()),
        bridge: Arc::new(bridge),
        generate_workflow: Arc::new(generate_workflow),
        remove_background_workflow: Arc::new(remove_background_workflow),
    };

    // --- Router ---
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the server
/// shuts down cleanly whether stopped interactively or by a process
/// manager (e.g. systemd, Docker, Kubernetes).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
