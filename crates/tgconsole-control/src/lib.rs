//! HTTP control surface for the console's automation workers.

pub mod audit;
pub mod auth;
pub mod auto_chat;
pub mod config;
pub mod jobs;
pub mod scraper;
pub mod security;
pub mod state;
pub mod storage;


use axum::{
    Json, Router,
    extract::State,
    middleware,
    routing::{get, post},
};
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthzResponse {
    status: &'static str,
    version: &'static str,
    tracked_auto_chat: usize,
    tracked_scrapes: usize,
}

async fn healthz(State(state): State<AppState>) -> Json<HealthzResponse> {
    Json(HealthzResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        tracked_auto_chat: state.auto_chat.registry().len(),
        tracked_scrapes: state.scraper.registry().len(),
    })
}

pub fn router(state: AppState) -> Router {
    let auth_router = Router::new()
        .route("/csrf", get(auth::csrf))
        .route("/whoami", get(auth::whoami));

    // Layers run bottom-up: origin/CSRF first, then identity.
    let api_router = Router::new()
        .route("/auto-chat/start", post(auto_chat::start))
        .route("/auto-chat/stop", post(auto_chat::stop))
        .route("/auto-chat/status", get(auto_chat::status))
        .route("/chat-scraper/scrape-by-date", post(scraper::scrape_by_date))
        .route("/chat-scraper/stop", post(scraper::stop))
        .route("/chat-scraper/status", get(scraper::status))
        .layer(middleware::from_fn_with_state(state.clone(), security::require_user))
        .layer(middleware::from_fn_with_state(state.clone(), security::csrf_and_origin));

    Router::new()
        .route("/healthz", get(healthz))
        .nest("/auth", auth_router)
        .nest("/api", api_router)
        .layer(middleware::from_fn(security::request_id))
        .with_state(state)
}
