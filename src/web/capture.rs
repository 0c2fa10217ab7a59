//! Respondent-facing endpoints: redeem a code, submit ratings, finalize.
//! Thin layer over `domain::capture`; only wire shapes and boundary
//! validation live here.

use crate::db::QuestionRow;
use crate::domain::capture::{self, RatingEntry, RATING_SCALE};
use crate::error::ApiError;
use crate::middleware::RateLimiter;
use crate::state::SharedState;
use crate::web::auth::client_ip;
use axum::{
    extract::{ConnectInfo, State},
    http::HeaderMap,
    routing::post,
    Json, Router,
};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// 100 requests per 15 minutes per client across the capture flow.
static CAPTURE_RATE_LIMITER: Lazy<RateLimiter> = Lazy::new(|| RateLimiter::new(100, 900));

#[derive(Deserialize)]
pub struct RedeemPayload {
    #[serde(rename = "codigo")]
    pub code: String,
}

#[derive(Serialize)]
pub struct RedeemResponse {
    #[serde(rename = "sesion_id")]
    pub session_id: i64,
    #[serde(rename = "token_sesion")]
    pub session_token: String,
    #[serde(rename = "encuesta_id")]
    pub survey_id: i64,
    #[serde(rename = "equipo_id")]
    pub team_id: i64,
    #[serde(rename = "evaluado_nombre")]
    pub evaluee_name: Option<String>,
    #[serde(rename = "preguntas")]
    pub questions: Vec<QuestionRow>,
    pub meta: RedeemMeta,
}

#[derive(Serialize)]
pub struct RedeemMeta {
    #[serde(rename = "escala")]
    pub scale: [i64; 5],
}

#[derive(Deserialize)]
pub struct SubmitPayload {
    #[serde(rename = "token_sesion")]
    pub session_token: String,
    #[serde(rename = "respuestas")]
    pub responses: Vec<RatingPayload>,
}

#[derive(Deserialize)]
pub struct RatingPayload {
    #[serde(rename = "pregunta_id")]
    pub question_id: i64,
    #[serde(rename = "valor")]
    pub value: i64,
}

#[derive(Serialize)]
pub struct SubmitResponse {
    pub ok: bool,
    pub inserted: u64,
    pub updated: u64,
}

#[derive(Serialize)]
pub struct FinalizeResponse {
    pub ok: bool,
    #[serde(rename = "finalizada")]
    pub finalized: bool,
}

#[derive(Deserialize)]
pub struct FinalizePayload {
    #[serde(rename = "token_sesion")]
    pub session_token: String,
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/sesion", post(redeem))
        .route("/respuestas", post(submit))
        .route("/finalizar", post(finalize))
        .with_state(state)
}

async fn rate_limit(headers: &HeaderMap, peer: SocketAddr) -> Result<(), ApiError> {
    if CAPTURE_RATE_LIMITER.check(&client_ip(headers, peer)).await {
        Ok(())
    } else {
        Err(ApiError::RateLimited)
    }
}

fn validate_token(token: &str) -> Result<(), ApiError> {
    if token.is_empty() || token.len() > 200 {
        return Err(ApiError::InvalidValue("token_sesion must be 1-200 characters".into()));
    }
    Ok(())
}

async fn redeem(
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    State(state): State<SharedState>,
    Json(payload): Json<RedeemPayload>,
) -> Result<Json<RedeemResponse>, ApiError> {
    rate_limit(&headers, peer).await?;

    let code = payload.code.trim().to_uppercase();
    if code.is_empty() || code.len() > 20 || !code.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(ApiError::InvalidValue(
            "codigo must be 1-20 uppercase alphanumeric characters".into(),
        ));
    }

    let out = capture::redeem(&state.pool, &code).await?;
    Ok(Json(RedeemResponse {
        session_id: out.session_id,
        session_token: out.token.as_str().to_string(),
        survey_id: out.survey_id,
        team_id: out.team_id,
        evaluee_name: out.evaluee_name,
        questions: out.questions,
        meta: RedeemMeta { scale: RATING_SCALE },
    }))
}

async fn submit(
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    State(state): State<SharedState>,
    Json(payload): Json<SubmitPayload>,
) -> Result<Json<SubmitResponse>, ApiError> {
    rate_limit(&headers, peer).await?;

    let token = payload.session_token.trim();
    validate_token(token)?;
    if payload.responses.is_empty() {
        return Err(ApiError::InvalidValue("respuestas must not be empty".into()));
    }

    let entries: Vec<RatingEntry> = payload
        .responses
        .iter()
        .map(|r| RatingEntry {
            question_id: r.question_id,
            value: r.value,
        })
        .collect();

    let out = capture::submit(&state.pool, token, &entries).await?;
    Ok(Json(SubmitResponse {
        ok: true,
        inserted: out.inserted,
        updated: out.updated,
    }))
}

async fn finalize(
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    State(state): State<SharedState>,
    Json(payload): Json<FinalizePayload>,
) -> Result<Json<FinalizeResponse>, ApiError> {
    rate_limit(&headers, peer).await?;

    let token = payload.session_token.trim();
    validate_token(token)?;

    capture::finalize(&state.pool, token).await?;
    Ok(Json(FinalizeResponse {
        ok: true,
        finalized: true,
    }))
}
