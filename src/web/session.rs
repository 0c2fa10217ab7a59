//! Admin bearer tokens: HMAC-SHA256 signed `username|exp` payloads, plus the
//! axum extractor that guards the `/admin` routes. Distinct from respondent
//! session tokens, which are opaque database-backed credentials.

use crate::db;
use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{request::Parts, HeaderMap, StatusCode},
};
use base64::{engine::general_purpose, Engine as _};
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Matches the legacy deployment's 8-hour admin token lifetime.
pub const TOKEN_TTL_HOURS: i64 = 8;

#[derive(Debug, Clone)]
pub struct AdminClaims {
    pub username: String,
    pub exp: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("invalid token format")]
    Invalid,
    #[error("signature mismatch")]
    Signature,
    #[error("expired")]
    Expired,
}

pub fn sign_admin_token(username: &str, key: &[u8]) -> Result<String, TokenError> {
    let exp = Utc::now() + Duration::hours(TOKEN_TTL_HOURS);
    let payload = format!("{}|{}", username, exp.timestamp());
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| TokenError::Invalid)?;
    mac.update(payload.as_bytes());
    let sig = mac.finalize().into_bytes();
    Ok(format!(
        "{}.{}",
        general_purpose::STANDARD.encode(payload.as_bytes()),
        general_purpose::STANDARD.encode(sig)
    ))
}

pub fn verify_admin_token(token: &str, key: &[u8]) -> Result<AdminClaims, TokenError> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 2 {
        return Err(TokenError::Invalid);
    }
    let payload_bytes = general_purpose::STANDARD
        .decode(parts[0])
        .map_err(|_| TokenError::Invalid)?;
    let sig_bytes = general_purpose::STANDARD
        .decode(parts[1])
        .map_err(|_| TokenError::Invalid)?;

    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| TokenError::Invalid)?;
    mac.update(&payload_bytes);
    mac.verify_slice(&sig_bytes)
        .map_err(|_| TokenError::Signature)?;

    let payload = String::from_utf8(payload_bytes).map_err(|_| TokenError::Invalid)?;
    let (username, exp_raw) = payload.rsplit_once('|').ok_or(TokenError::Invalid)?;
    let exp: i64 = exp_raw.parse().map_err(|_| TokenError::Invalid)?;
    if Utc::now().timestamp() > exp {
        return Err(TokenError::Expired);
    }
    Ok(AdminClaims {
        username: username.to_string(),
        exp,
    })
}

pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    let auth = headers.get(axum::http::header::AUTHORIZATION)?;
    let val = auth.to_str().ok()?;
    let bearer = val.strip_prefix("Bearer ")?;
    Some(bearer.trim().to_string())
}

/// Extractor that admits only a valid token belonging to an active account.
pub struct AdminSession(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for AdminSession
where
    S: Send + Sync,
    crate::state::SharedState: FromRef<S>,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let shared = crate::state::SharedState::from_ref(state);

        let token = extract_token(&parts.headers).ok_or(StatusCode::UNAUTHORIZED)?;
        let claims = verify_admin_token(&token, &shared.session_key).map_err(|e| {
            tracing::warn!("admin token rejected: {}", e);
            StatusCode::UNAUTHORIZED
        })?;

        let user = db::find_user_by_username(&shared.pool, &claims.username)
            .await
            .map_err(|e| {
                tracing::error!("admin lookup failed: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            })?;
        match user {
            Some(u) if u.active => Ok(AdminSession(claims.username)),
            _ => Err(StatusCode::UNAUTHORIZED),
        }
    }
}
