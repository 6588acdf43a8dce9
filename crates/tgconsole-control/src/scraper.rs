use std::{convert::Infallible, time::Duration};

use axum::{
    Extension, Json,
    extract::State,
    http::{HeaderName, StatusCode, header},
    response::{
        IntoResponse, Response,
        sse::{Event, Sse},
    },
};
use futures_util::Stream;
use serde::Deserialize;
use serde_json::json;
use tgconsole_agent::{JobEvent, JobExit, OutputStream, StartedJob, signal, worker::ScrapeByDateParams};

use crate::audit;
use crate::auth::AuthUser;
use crate::jobs::{self, bad_request, deserialize_topic_id, owner_of, start_error_response};
use crate::security::{RequestMeta, json_error};
use crate::state::AppState;
use crate::storage;

const LABEL: &str = "scraper";
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeByDateRequest {
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub start_date: String,
    #[serde(default)]
    pub end_date: String,
    #[serde(default, deserialize_with = "deserialize_topic_id")]
    pub topic_id: Option<i64>,
    #[serde(default)]
    pub skip_media: bool,
}

/// Streams the scrape worker's output as server-sent events.
pub async fn scrape_by_date(
    State(state): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Extension(user): Extension<AuthUser>,
    Json(input): Json<ScrapeByDateRequest>,
) -> Response {
    if input.group.trim().is_empty()
        || input.start_date.trim().is_empty()
        || input.end_date.trim().is_empty()
    {
        return json_error(
            StatusCode::BAD_REQUEST,
            "missing required parameters (group, startDate, endDate)",
        );
    }

    let data_dir = &state.config.data_dir;
    if let Err(err) = storage::ensure_scraped_data_dir(data_dir, &user.email).await {
        tracing::error!(user = %user.email, %err, "cannot prepare scrape output directory");
        return json_error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string());
    }
    let session = match storage::first_session_file(data_dir, &user.email).await {
        Ok(Some(path)) => path,
        Ok(None) => {
            return json_error(
                StatusCode::BAD_REQUEST,
                "no session file found; upload a session file first",
            );
        }
        Err(err) => return json_error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    };
    tracing::info!(user = %user.email, session = %session.display(), "using session file");

    let mut params = match ScrapeByDateParams::new(
        &session,
        &input.group,
        &input.start_date,
        &input.end_date,
        state.config.scrape_timeout_secs,
    ) {
        Ok(p) => p,
        Err(err) => return bad_request(err),
    };
    params.topic_id = input.topic_id;
    params.skip_media = input.skip_media;

    let job = match state.scraper.start(&owner_of(&user), &params).await {
        Ok(job) => job,
        Err(err) => {
            audit::record(&meta, &user, "start", "scrape", err.code());
            return start_error_response(LABEL, err);
        }
    };
    audit::record(&meta, &user, "start", "scrape", "started");

    (
        [
            (header::CACHE_CONTROL, "no-cache"),
            (HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        Sse::new(event_stream(job)),
    )
        .into_response()
}

pub async fn stop(
    State(state): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Extension(user): Extension<AuthUser>,
) -> Response {
    jobs::stop(&state.scraper, LABEL, &meta, &user).await
}

pub async fn status(State(state): State<AppState>, Extension(user): Extension<AuthUser>) -> Response {
    jobs::status(&state.scraper, &user).await
}

/// Kills the worker if the client goes away before it finishes.
struct DisconnectGuard {
    pid: u32,
    armed: bool,
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        tracing::info!(pid = self.pid, "event stream dropped; killing scrape worker");
        if let Err(err) = signal::kill(self.pid) {
            tracing::debug!(pid = self.pid, %err, "kill on disconnect failed");
        }
    }
}

enum Wake {
    Event(Option<JobEvent>),
    Heartbeat,
}

fn event_stream(job: StartedJob) -> impl Stream<Item = Result<Event, Infallible>> {
    let StartedJob {
        record,
        first,
        mut events,
    } = job;
    // Armed before the first poll so an unpolled, dropped response still kills the worker.
    let mut guard = DisconnectGuard {
        pid: record.pid,
        armed: true,
    };

    async_stream::stream! {
        // Capture the whole guard (not just `guard.armed`) so it lives as long as the stream.
        let _ = &guard;
        let mut heartbeat = tokio::time::interval_at(
            tokio::time::Instant::now() + HEARTBEAT_INTERVAL,
            HEARTBEAT_INTERVAL,
        );
        let mut pending = Some(first);

        loop {
            let next = match pending.take() {
                Some(ev) => Some(ev),
                None => {
                    let woke = tokio::select! {
                        ev = events.recv() => Wake::Event(ev),
                        _ = heartbeat.tick() => Wake::Heartbeat,
                    };
                    match woke {
                        Wake::Event(ev) => ev,
                        Wake::Heartbeat => {
                            yield Ok(heartbeat_event());
                            continue;
                        }
                    }
                }
            };

            let Some(ev) = next else {
                guard.armed = false;
                yield Ok(json_event(json!({
                    "type": "error",
                    "message": "worker output ended unexpectedly",
                })));
                break;
            };
            if ev.is_terminal() {
                guard.armed = false;
            }
            match ev {
                JobEvent::Output { line, .. } if line.trim().is_empty() => {}
                JobEvent::Output { stream, line } => yield Ok(output_event(stream, line)),
                JobEvent::Exited(exit) => {
                    yield Ok(exit_event(&exit));
                    break;
                }
            }
        }
    }
}

fn json_event(value: serde_json::Value) -> Event {
    Event::default().data(value.to_string())
}

fn heartbeat_event() -> Event {
    json_event(json!({
        "type": "heartbeat",
        "timestamp": chrono::Utc::now().timestamp_millis(),
    }))
}

// Stdout lines are the worker's own JSON progress records and pass through untouched.
fn output_event(stream: OutputStream, line: String) -> Event {
    match stream {
        // SSE cannot carry carriage returns.
        OutputStream::Stdout => Event::default().data(line.replace('\r', "")),
        OutputStream::Stderr => json_event(json!({
            "type": "log",
            "stream": "stderr",
            "message": line,
        })),
    }
}

fn exit_event(exit: &JobExit) -> Event {
    if exit.success {
        return json_event(json!({
            "type": "complete",
            "message": "Scraping completed",
        }));
    }
    let message = if exit.deadline_exceeded {
        "Scraping exceeded the maximum run time".to_string()
    } else {
        match exit.code {
            Some(code) => format!("Script exited with code {code}"),
            None => "Script was terminated".to_string(),
        }
    };
    json_event(json!({
        "type": "error",
        "message": message,
        "stderr": exit.stderr,
    }))
}
