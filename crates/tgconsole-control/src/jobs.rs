//! Routes shared by every job kind.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Deserializer};
use serde_json::json;
use tgconsole_agent::{JobError, JobManager, OwnerId, StopOutcome};

use crate::audit;
use crate::auth::AuthUser;
use crate::security::{RequestMeta, json_error};

pub fn owner_of(user: &AuthUser) -> OwnerId {
    OwnerId::new(user.email.clone())
}

/// Maps a failed start. `label` names the job in messages, e.g. "auto chat".
pub fn start_error_response(label: &str, err: JobError) -> Response {
    match err {
        JobError::JobAlreadyRunning { pid, started_at, .. } => (
            StatusCode::CONFLICT,
            Json(json!({
                "success": false,
                "code": "job_already_running",
                "message": format!("a {label} process is already running; stop it before starting a new one"),
                "existingPid": pid,
                "startTime": started_at,
            })),
        )
            .into_response(),
        JobError::StartupTimeout {
            waited,
            partial_output,
        } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "success": false,
                "code": "startup_timeout",
                "message": format!("{label} process failed to start within timeout"),
                "error": format!("no output within {}ms", waited.as_millis()),
                "output": partial_output,
            })),
        )
            .into_response(),
        other => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "success": false,
                "code": other.code(),
                "message": format!("failed to start {label} process"),
                "error": other.to_string(),
            })),
        )
            .into_response(),
    }
}

pub async fn stop(
    manager: &JobManager,
    label: &str,
    meta: &RequestMeta,
    user: &AuthUser,
) -> Response {
    let owner = owner_of(user);
    let kind = manager.kind().as_str();
    match manager.stop(&owner).await {
        Ok(StopOutcome::Stopped { pids, errors }) => {
            audit::record(meta, user, "stop", kind, "stopped");
            let mut body = json!({
                "success": true,
                "message": format!("stopped {} {label} process(es)", pids.len()),
                "killedProcesses": pids,
            });
            if !errors.is_empty() {
                body["errors"] = json!(errors);
            }
            (StatusCode::OK, Json(body)).into_response()
        }
        Ok(StopOutcome::NothingToStop) => {
            audit::record(meta, user, "stop", kind, "nothing_to_stop");
            (
                StatusCode::OK,
                Json(json!({
                    "success": true,
                    "message": format!("no matching {label} processes found to stop"),
                    "killedProcesses": [],
                })),
            )
                .into_response()
        }
        Err(err) => {
            audit::record(meta, user, "stop", kind, "failed");
            tracing::error!(owner = %owner, %err, "stop failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "success": false,
                    "code": err.code(),
                    "message": format!("failed to stop {label}"),
                    "error": err.to_string(),
                })),
            )
                .into_response()
        }
    }
}

pub async fn status(manager: &JobManager, user: &AuthUser) -> Response {
    let report = manager.status(&owner_of(user)).await;
    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "email": report.owner_id,
            "userProcess": report.tracked,
            "allManagedProcesses": report.all_tracked,
            "systemProcesses": report.os_matching,
        })),
    )
        .into_response()
}

pub fn bad_request(err: anyhow::Error) -> Response {
    json_error(StatusCode::BAD_REQUEST, err.to_string())
}

/// Topic ids arrive as numbers or numeric strings; blanks mean "none".
pub fn deserialize_topic_id<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(i64),
        Text(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Num(n)) => Ok(Some(n)),
        Some(Raw::Text(s)) if s.trim().is_empty() => Ok(None),
        Some(Raw::Text(s)) => s
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("invalid topic id: {s}"))),
    }
}
