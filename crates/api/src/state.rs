use std::sync::Arc;

use doculab_pipeline::JobService;
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable; everything is behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    /// Job service facade (submit, status, log stream).
    pub jobs: Arc<JobService>,
    /// Fired when the server starts shutting down; open log streams close.
    pub shutdown: CancellationToken,
}
