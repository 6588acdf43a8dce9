use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::security::json_error;
use crate::state::AppState;

pub const CSRF_COOKIE_NAME: &str = "csrf";
pub const AUTH_COOKIE_NAME: &str = "auth-token";

/// Identity resolved from the `auth-token` cookie.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    pub email: String,
    pub is_admin: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Claims {
    email: String,
    is_admin: bool,
    /// RFC 3339 account expiry, checked on top of `exp`.
    expires_at: String,
    exp: usize,
}

fn random_token(n: usize) -> String {
    use rand::RngCore;
    let mut buf = vec![0u8; n];
    rand::rngs::OsRng.fill_bytes(&mut buf);
    // URL-safe base64 without padding.
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf)
}

fn csrf_cookie(value: String) -> Cookie<'static> {
    // Non-HttpOnly so the browser app can read and send it as a header.
    let mut c = Cookie::new(CSRF_COOKIE_NAME, value);
    c.set_http_only(false);
    c.set_same_site(SameSite::Lax);
    c.set_path("/");
    c
}

#[derive(Debug, Serialize)]
pub struct CsrfResponse {
    pub token: String,
}

pub async fn csrf(jar: CookieJar) -> impl IntoResponse {
    let token = random_token(32);
    let jar = jar.add(csrf_cookie(token.clone()));
    (jar, Json(CsrfResponse { token }))
}

pub fn validate_auth_token(token: &str, secret: &[u8]) -> anyhow::Result<AuthUser> {
    let validation = jsonwebtoken::Validation::new(jsonwebtoken::Algorithm::HS256);
    let data = jsonwebtoken::decode::<Claims>(
        token,
        &jsonwebtoken::DecodingKey::from_secret(secret),
        &validation,
    )?;
    let claims = data.claims;

    if claims.email.trim().is_empty() {
        anyhow::bail!("token carries no email");
    }
    let expires_at = chrono::DateTime::parse_from_rfc3339(&claims.expires_at)
        .map_err(|e| anyhow::anyhow!("invalid expiresAt: {e}"))?;
    if expires_at < chrono::Utc::now() {
        anyhow::bail!("token expired");
    }

    Ok(AuthUser {
        email: claims.email,
        is_admin: claims.is_admin,
    })
}

/// Signs a token the way the login service does. Valid for `ttl`.
#[cfg(test)]
pub(crate) fn issue_auth_token(
    user: &AuthUser,
    secret: &[u8],
    ttl: chrono::Duration,
) -> anyhow::Result<String> {
    let expires = chrono::Utc::now() + ttl;
    let claims = Claims {
        email: user.email.clone(),
        is_admin: user.is_admin,
        expires_at: expires.to_rfc3339(),
        exp: expires.timestamp().max(0) as usize,
    };
    Ok(jsonwebtoken::encode(
        &jsonwebtoken::Header::new(jsonwebtoken::Algorithm::HS256),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(secret),
    )?)
}

pub fn user_from_jar(jar: &CookieJar, secret: &[u8]) -> Result<AuthUser, &'static str> {
    let token = jar.get(AUTH_COOKIE_NAME).ok_or("no token found")?;
    validate_auth_token(token.value(), secret).map_err(|err| {
        tracing::debug!(%err, "rejected auth token");
        "invalid token"
    })
}

pub async fn whoami(State(state): State<AppState>, jar: CookieJar) -> impl IntoResponse {
    match user_from_jar(&jar, &state.config.jwt_secret) {
        Ok(me) => (StatusCode::OK, Json(me)).into_response(),
        Err(msg) => json_error(StatusCode::UNAUTHORIZED, msg),
    }
}
