use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use doculab_events::LogBroadcaster;
use doculab_store::Stores;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use doculab_api::background::retention;
use doculab_api::config::ServerConfig;
use doculab_api::router::build_app_router;
use doculab_api::state::AppState;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "doculab_api=debug,doculab_pipeline=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(
        host = %config.host,
        port = %config.port,
        toolkit = %config.pipeline.toolkit.root.display(),
        work_root = %config.pipeline.work_root.display(),
        output_dir = %config.pipeline.output_dir.display(),
        "Loaded server configuration"
    );

    // --- Shared stores and log broadcaster ---
    let stores = Stores::in_memory();
    let broadcaster = Arc::new(LogBroadcaster::new(config.log_channel_capacity));

    // --- Pipeline ---
    let (service, dispatcher) =
        doculab_pipeline::build(&config.pipeline, &stores, Arc::clone(&broadcaster));
    let cancel = CancellationToken::new();
    let job_tracker = dispatcher.tracker();
    let dispatcher_handle = tokio::spawn(dispatcher.run(cancel.clone()));

    // --- Retention ---
    let retention_handle = tokio::spawn(retention::run(
        stores.clone(),
        Arc::clone(&broadcaster),
        config.retention_settings(),
        cancel.clone(),
    ));

    // --- App state ---
    let state = AppState {
        config: Arc::new(config.clone()),
        jobs: Arc::new(service),
        shutdown: cancel.clone(),
    };
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

    // The signal stops the dispatcher (failing queued jobs) and closes open
    // log streams so connections can drain.
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_cancel.cancel();
    });

    let server = axum::serve(listener, app)
        .with_graceful_shutdown(cancel.clone().cancelled_owned())
        .into_future();
    tokio::pin!(server);

    let server_stopped = tokio::select! {
        result = &mut server => {
            result.expect("Server error");
            true
        }
        _ = cancel.cancelled() => false,
    };
    cancel.cancel();

    // --- Post-shutdown cleanup ---
    // Connections and in-flight jobs share one drain budget.
    let deadline = Instant::now() + Duration::from_secs(config.shutdown_timeout_secs);

    if !server_stopped {
        match tokio::time::timeout_at(deadline, &mut server).await {
            Ok(result) => result.expect("Server error"),
            Err(_) => tracing::warn!("Open connections did not close before the shutdown timeout"),
        }
    }
    tracing::info!("Server stopped accepting connections, cleaning up");

    let _ = tokio::time::timeout_at(deadline, dispatcher_handle).await;
    if tokio::time::timeout_at(deadline, job_tracker.wait()).await.is_err() {
        tracing::warn!(
            running = job_tracker.len(),
            "In-flight jobs did not finish before the shutdown timeout"
        );
    } else {
        tracing::info!("In-flight jobs finished");
    }

    let _ = tokio::time::timeout(Duration::from_secs(5), retention_handle).await;
    tracing::info!("Retention job stopped");

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the server
/// shuts down cleanly whether stopped interactively or by a process
/// manager.
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
