//! Handlers for job submission, status polling and log streaming.

use std::convert::Infallible;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use doculab_core::artifacts::ResultManifest;
use doculab_core::error::JobErrorKind;
use doculab_core::job::{JobRecord, JobState};
use doculab_core::submission::SubmissionKey;
use doculab_core::types::{JobId, Timestamp};
use doculab_events::{LogEvent, END_MARKER};
use futures::{Stream, StreamExt};
use serde::Serialize;

use crate::error::AppResult;
use crate::state::AppState;

/// Message returned when a submission joins an already running job.
pub const ALREADY_RUNNING_MESSAGE: &str = "Task already running for this document";

/// SSE event name carrying the end-of-stream marker.
pub const END_EVENT: &str = "end";

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub task_id: JobId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'static str>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ResultManifest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<JobErrorKind>,
    pub submission_key: SubmissionKey,
    pub created_at: Timestamp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<Timestamp>,
}

impl From<JobRecord> for StatusResponse {
    fn from(record: JobRecord) -> Self {
        Self {
            status: record.state,
            result: record.result,
            error: record.error,
            error_kind: record.error_kind,
            submission_key: record.submission_key,
            created_at: record.created_at,
            started_at: record.started_at,
            finished_at: record.finished_at,
        }
    }
}

/// POST /process/{key}
pub async fn submit(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> AppResult<Json<SubmitResponse>> {
    let submission = state.jobs.submit(&key).await?;
    Ok(Json(SubmitResponse {
        task_id: submission.job_id,
        message: (!submission.created).then_some(ALREADY_RUNNING_MESSAGE),
    }))
}

/// GET /status/{task_id}
pub async fn get_status(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> AppResult<Json<StatusResponse>> {
    let job_id: JobId = task_id.parse()?;
    let record = state.jobs.get_state(&job_id).await?;
    Ok(Json(record.into()))
}

/// GET /stream/{task_id}
///
/// One `data:` event per output line, then an `end` event carrying the
/// end marker, after which the response completes. On server shutdown the
/// response completes early without the end event.
pub async fn stream_log(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> AppResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let job_id: JobId = task_id.parse()?;
    let subscription = state.jobs.stream_log(&job_id).await?;
    tracing::debug!(job_id = %job_id, "Log stream attached");

    let events = subscription
        .into_stream()
        .take_until(state.shutdown.clone().cancelled_owned())
        .map(|event| Ok(to_sse(event)));
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

fn to_sse(event: LogEvent) -> Event {
    match event {
        // SSE has no escape for a bare carriage return.
        LogEvent::Line(line) => Event::default().data(line.replace('\r', "\n")),
        LogEvent::End => Event::default().event(END_EVENT).data(END_MARKER),
    }
}
