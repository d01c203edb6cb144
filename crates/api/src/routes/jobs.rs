use axum::routing::{get, post};
use axum::Router;

use crate::handlers;
use crate::state::AppState;

/// Job routes.
///
/// ```text
/// POST /process/{key}        submit a conversion
/// GET  /status/{task_id}     job record snapshot
/// GET  /stream/{task_id}     live output (server-sent events)
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/process/{key}", post(handlers::jobs::submit))
        .route("/status/{task_id}", get(handlers::jobs::get_status))
        .route("/stream/{task_id}", get(handlers::jobs::stream_log))
}
