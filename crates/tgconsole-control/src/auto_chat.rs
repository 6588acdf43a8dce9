use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;
use tgconsole_agent::{JobEvent, OutputStream, worker::AutoChatParams};

use crate::audit;
use crate::auth::AuthUser;
use crate::jobs::{self, bad_request, deserialize_topic_id, owner_of, start_error_response};
use crate::security::RequestMeta;
use crate::state::AppState;

const LABEL: &str = "auto chat";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartAutoChatRequest {
    #[serde(default)]
    pub target_group: String,
    #[serde(default)]
    pub message_source: String,
    /// `"min-max"` seconds between messages.
    #[serde(default)]
    pub message_interval: String,
    #[serde(default)]
    pub is_topic: bool,
    #[serde(default, deserialize_with = "deserialize_topic_id")]
    pub topic_id: Option<i64>,
    #[serde(default)]
    pub enable_loop: bool,
}

impl StartAutoChatRequest {
    fn to_params(&self, root_dir: &std::path::Path) -> anyhow::Result<AutoChatParams> {
        let mut params = AutoChatParams::new(
            root_dir,
            &self.target_group,
            &self.message_source,
            &self.message_interval,
        )?;
        if self.is_topic {
            let topic = self
                .topic_id
                .ok_or_else(|| anyhow::anyhow!("topic id is required when posting to a topic"))?;
            params.topic_id = Some(topic);
        }
        params.enable_loop = self.enable_loop;
        Ok(params)
    }
}

/// Starts the caller's auto-chat worker and answers with its first line.
pub async fn start(
    State(state): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Extension(user): Extension<AuthUser>,
    Json(input): Json<StartAutoChatRequest>,
) -> Response {
    let params = match input.to_params(&state.config.root_dir) {
        Ok(p) => p,
        Err(err) => return bad_request(err),
    };
    let owner = owner_of(&user);

    let job = match state.auto_chat.start(&owner, &params).await {
        Ok(job) => job,
        Err(err) => {
            audit::record(&meta, &user, "start", "auto-chat", err.code());
            return start_error_response(LABEL, err);
        }
    };
    audit::record(&meta, &user, "start", "auto-chat", "started");
    let pid = job.record.pid;

    // The worker keeps running; its remaining output is drained by the agent.
    match job.first {
        JobEvent::Output {
            stream: OutputStream::Stdout,
            line,
        } => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "message": "auto chat process started successfully",
                "data": line,
                "pid": pid,
            })),
        )
            .into_response(),
        JobEvent::Output {
            stream: OutputStream::Stderr,
            line,
        } => (
            StatusCode::OK,
            Json(json!({
                "success": false,
                "message": "auto chat process reported an error",
                "error": line,
                "pid": pid,
            })),
        )
            .into_response(),
        JobEvent::Exited(exit) if exit.success => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "message": "auto chat process finished",
                "code": exit.code,
            })),
        )
            .into_response(),
        JobEvent::Exited(exit) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "success": false,
                "message": "auto chat process failed",
                "error": if exit.stderr.is_empty() { "unknown error".to_string() } else { exit.stderr },
                "code": exit.code,
            })),
        )
            .into_response(),
    }
}

pub async fn stop(
    State(state): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Extension(user): Extension<AuthUser>,
) -> Response {
    jobs::stop(&state.auto_chat, LABEL, &meta, &user).await
}

pub async fn status(State(state): State<AppState>, Extension(user): Extension<AuthUser>) -> Response {
    jobs::status(&state.auto_chat, &user).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn request(raw: serde_json::Value) -> StartAutoChatRequest {
        serde_json::from_value(raw).unwrap()
    }

    #[test]
    fn topic_flag_requires_id() {
        let req = request(json!({
            "targetGroup": "g",
            "messageSource": "s",
            "messageInterval": "2-10",
            "isTopic": true,
        }));
        assert!(req.to_params(Path::new("/srv")).is_err());
    }

    #[test]
    fn request_maps_to_params() {
        let req = request(json!({
            "targetGroup": "g",
            "messageSource": "s",
            "messageInterval": "2-10",
            "isTopic": true,
            "topicId": "5",
            "enableLoop": true,
        }));
        let params = req.to_params(Path::new("/srv")).unwrap();
        assert_eq!(params.topic_id, Some(5));
        assert!(params.enable_loop);
        assert_eq!((params.min_interval, params.max_interval), (2.0, 10.0));
    }

    #[test]
    fn topic_id_ignored_without_flag() {
        let req = request(json!({
            "targetGroup": "g",
            "messageSource": "s",
            "messageInterval": "1-2",
            "topicId": 9,
        }));
        assert_eq!(req.to_params(Path::new("/srv")).unwrap().topic_id, None);
    }
}
