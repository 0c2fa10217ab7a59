use crate::auth;
use crate::db;
use crate::error::ApiError;
use crate::middleware::RateLimiter;
use crate::state::SharedState;
use crate::web::session;
use axum::{
    extract::{ConnectInfo, State},
    http::HeaderMap,
    routing::post,
    Json, Router,
};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// 10 login attempts per 15 minutes per client.
static LOGIN_RATE_LIMITER: Lazy<RateLimiter> = Lazy::new(|| RateLimiter::new(10, 900));

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub ok: bool,
    pub token: String,
    #[serde(rename = "expiresIn")]
    pub expires_in: String,
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/login", post(login))
        .with_state(state)
}

/// Rate-limit key for a client: the first hop of `x-forwarded-for` when a
/// proxy supplies it, otherwise the peer address itself. Never a shared
/// constant, so header-less clients do not drain one common bucket.
pub(crate) fn client_ip(headers: &HeaderMap, peer: SocketAddr) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| peer.ip().to_string())
}

async fn login(
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    State(state): State<SharedState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    if !LOGIN_RATE_LIMITER.check(&client_ip(&headers, peer)).await {
        return Err(ApiError::RateLimited);
    }

    let username = payload.username.trim();
    if username.is_empty()
        || username.len() > 50
        || !username.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(ApiError::InvalidValue(
            "username must be 1-50 characters of letters, digits or underscores".into(),
        ));
    }
    if payload.password.is_empty() || payload.password.len() > 200 {
        return Err(ApiError::InvalidValue("password must be 1-200 characters".into()));
    }

    let user = db::find_user_by_username(&state.pool, username)
        .await?
        .ok_or_else(|| {
            tracing::warn!(username, "login failed, unknown user");
            ApiError::Unauthorized("invalid credentials".into())
        })?;

    if !user.active {
        tracing::warn!(username, "login failed, inactive user");
        return Err(ApiError::Unauthorized("user inactive".into()));
    }

    if !auth::verify_password(&payload.password, &user.password_hash) {
        tracing::warn!(username, "login failed, wrong password");
        return Err(ApiError::Unauthorized("invalid credentials".into()));
    }

    // upgrade legacy digests now that we hold the cleartext
    if auth::needs_rehash(&user.password_hash) {
        match auth::hash_password(&payload.password) {
            Ok(hash) => {
                db::update_password_hash(&state.pool, user.id, &hash).await?;
                tracing::info!(user_id = user.id, "password hash migrated");
            }
            Err(e) => tracing::error!(user_id = user.id, "hash migration failed: {e}"),
        }
    }

    let token = session::sign_admin_token(&user.username, &state.session_key)
        .map_err(|e| ApiError::Internal(anyhow::anyhow!(e)))?;

    tracing::info!(username = %user.username, "login successful");
    Ok(Json(LoginResponse {
        ok: true,
        token,
        expires_in: format!("{}h", session::TOKEN_TTL_HOURS),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::AppState;
    use std::sync::Arc;

    // sha256("admin1")
    const LEGACY_HASH: &str = "25f43b1486ad95a1398e3eeb3d83bc4010015fcc9bedb35b432e00298d5021f7";

    async fn shared_with_legacy_admin() -> SharedState {
        let pool = db::test_pool().await;
        sqlx::query("INSERT INTO users (username, password_hash, active) VALUES ('admin', ?, 1)")
            .bind(LEGACY_HASH)
            .execute(&pool)
            .await
            .unwrap();
        Arc::new(AppState {
            pool,
            session_key: b"test-key".to_vec(),
        })
    }

    fn request(username: &str, password: &str) -> Json<LoginRequest> {
        Json(LoginRequest {
            username: username.into(),
            password: password.into(),
        })
    }

    fn peer(last_octet: u8) -> ConnectInfo<SocketAddr> {
        ConnectInfo(SocketAddr::from(([127, 0, 0, last_octet], 40000)))
    }

    #[test]
    fn client_ip_prefers_forwarded_header_over_peer() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.9, 10.0.0.1".parse().unwrap());
        let addr = SocketAddr::from(([10, 0, 0, 1], 443));
        assert_eq!(client_ip(&headers, addr), "203.0.113.9");
    }

    #[test]
    fn header_less_clients_key_on_their_own_peer_address() {
        let headers = HeaderMap::new();
        let a = client_ip(&headers, SocketAddr::from(([192, 0, 2, 10], 1234)));
        let b = client_ip(&headers, SocketAddr::from(([192, 0, 2, 11], 1234)));
        assert_eq!(a, "192.0.2.10");
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn exhausting_one_client_does_not_lock_out_another() {
        let shared = shared_with_legacy_admin().await;

        for _ in 0..10 {
            let _ = login(peer(101), HeaderMap::new(), State(shared.clone()), request("admin", "wrong"))
                .await;
        }
        let err = login(peer(101), HeaderMap::new(), State(shared.clone()), request("admin", "admin1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::RateLimited));

        // a different peer address keeps its own budget
        let Json(resp) = login(peer(102), HeaderMap::new(), State(shared), request("admin", "admin1"))
            .await
            .unwrap();
        assert!(resp.ok);
    }

    #[tokio::test]
    async fn login_migrates_legacy_hash_and_issues_token() {
        let shared = shared_with_legacy_admin().await;

        let Json(resp) = login(
            peer(1),
            HeaderMap::new(),
            State(shared.clone()),
            request("admin", "admin1"),
        )
        .await
        .unwrap();
        assert!(resp.ok);
        let claims = session::verify_admin_token(&resp.token, &shared.session_key).unwrap();
        assert_eq!(claims.username, "admin");

        // stored hash upgraded in place, old password still works
        let user = db::find_user_by_username(&shared.pool, "admin")
            .await
            .unwrap()
            .unwrap();
        assert!(!auth::needs_rehash(&user.password_hash));
        assert!(auth::verify_password("admin1", &user.password_hash));
    }

    #[tokio::test]
    async fn login_rejects_bad_credentials_and_inactive_users() {
        let shared = shared_with_legacy_admin().await;

        let err = login(peer(2), HeaderMap::new(), State(shared.clone()), request("admin", "wrong"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));

        let err = login(peer(2), HeaderMap::new(), State(shared.clone()), request("ghost", "admin1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));

        sqlx::query("UPDATE users SET active = 0 WHERE username = 'admin'")
            .execute(&shared.pool)
            .await
            .unwrap();
        let err = login(peer(2), HeaderMap::new(), State(shared), request("admin", "admin1"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));
    }
}
