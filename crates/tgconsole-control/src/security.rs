use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderValue, Method, Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::CookieJar;
use serde::Serialize;
use tracing::Instrument;

use crate::auth::{CSRF_COOKIE_NAME, user_from_jar};
use crate::state::AppState;

const CSRF_HEADER_NAME: &str = "x-csrf-token";
pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Debug, Serialize)]
struct ErrorBody {
    success: bool,
    message: String,
}

pub fn json_error(code: StatusCode, message: impl Into<String>) -> Response {
    (
        code,
        axum::Json(ErrorBody {
            success: false,
            message: message.into(),
        }),
    )
        .into_response()
}

#[derive(Debug, Clone)]
pub struct RequestMeta {
    pub request_id: String,
}

// Middleware: accept or mint a request id, expose it to handlers, echo it back.
pub async fn request_id(mut req: Request<Body>, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim())
        .filter(|s| !s.is_empty() && s.len() <= 128)
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let span = tracing::info_span!(
        "http",
        request_id = %request_id,
        method = %req.method(),
        path = %req.uri().path(),
    );
    req.extensions_mut().insert(RequestMeta {
        request_id: request_id.clone(),
    });

    let mut resp = next.run(req).instrument(span).await;
    if let Ok(v) = HeaderValue::from_str(&request_id) {
        resp.headers_mut().insert(REQUEST_ID_HEADER, v);
    }
    resp
}

/// Why a state-changing API call was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Refusal {
    ForeignOrigin,
    MissingCsrfToken,
    CsrfMismatch,
}

impl Refusal {
    fn message(self) -> &'static str {
        match self {
            Refusal::ForeignOrigin => "request origin is not allowed to control workers",
            Refusal::MissingCsrfToken => "missing csrf token; fetch /auth/csrf first",
            Refusal::CsrfMismatch => "csrf token does not match",
        }
    }
}

/// Only start/stop style calls are guarded; status reads pass straight through.
fn changes_worker_state(method: &Method) -> bool {
    !matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

/// Browsers always send `Origin` on POST; scripts and curl usually don't.
fn check_origin(headers: &HeaderMap, allowed: &[String]) -> Result<(), Refusal> {
    let Some(origin) = headers.get(header::ORIGIN) else {
        return Ok(());
    };
    let origin = origin.to_str().map_err(|_| Refusal::ForeignOrigin)?;
    let origin = origin.trim_end_matches('/');
    if allowed.iter().any(|a| a.trim_end_matches('/') == origin) {
        Ok(())
    } else {
        Err(Refusal::ForeignOrigin)
    }
}

// The identity cookie rides along automatically, so cookie-bearing calls must prove
// they came from our page by echoing the csrf cookie in a header.
fn check_csrf(headers: &HeaderMap) -> Result<(), Refusal> {
    let has_cookies = headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| !v.trim().is_empty());
    if !has_cookies {
        return Ok(());
    }
    let jar = CookieJar::from_headers(headers);
    let sent = headers
        .get(CSRF_HEADER_NAME)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty());
    match (jar.get(CSRF_COOKIE_NAME), sent) {
        (Some(cookie), Some(sent)) if cookie.value() == sent => Ok(()),
        (Some(_), Some(_)) => Err(Refusal::CsrfMismatch),
        _ => Err(Refusal::MissingCsrfToken),
    }
}

fn check_worker_request(headers: &HeaderMap, allowed: &[String]) -> Result<(), Refusal> {
    check_origin(headers, allowed)?;
    check_csrf(headers)
}

// Middleware: origin allowlist + double-submit CSRF in front of the worker routes.
pub async fn csrf_and_origin(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if !changes_worker_state(req.method()) {
        return next.run(req).await;
    }
    if let Err(refusal) = check_worker_request(req.headers(), &state.config.allowed_origins) {
        tracing::warn!(
            path = %req.uri().path(),
            origin = ?req.headers().get(header::ORIGIN),
            ?refusal,
            "worker request refused"
        );
        return json_error(StatusCode::FORBIDDEN, refusal.message());
    }
    next.run(req).await
}

// Middleware: resolve the caller from the auth cookie; handlers read `Extension<AuthUser>`.
pub async fn require_user(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let jar = CookieJar::from_headers(req.headers());
    match user_from_jar(&jar, &state.config.jwt_secret) {
        Ok(user) => {
            req.extensions_mut().insert(user);
            next.run(req).await
        }
        Err(msg) => json_error(StatusCode::UNAUTHORIZED, msg),
    }
}
