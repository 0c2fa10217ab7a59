//! Administrator endpoints: code lifecycle, aggregated reports, and account
//! management. Everything here sits behind the `AdminSession` extractor.

use crate::auth;
use crate::db::{self, CodeRow, UserRow};
use crate::domain::codes::{self, CodeUpdate, DeleteOutcome, NewCode};
use crate::domain::reports::{self, EvalueeReport, SessionReport};
use crate::error::{is_unique_violation, ApiError};
use crate::state::SharedState;
use crate::web::session::AdminSession;
use axum::{
    extract::{Path, State},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Deserialize)]
pub struct CreateCodePayload {
    #[serde(rename = "encuesta_id")]
    pub survey_id: Option<i64>,
    #[serde(rename = "evaluado_nombre")]
    pub evaluee_name: String,
    #[serde(rename = "codigo")]
    pub code: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateCodePayload {
    #[serde(rename = "evaluado_nombre")]
    pub evaluee_name: Option<String>,
    #[serde(rename = "activo")]
    pub active: Option<bool>,
    #[serde(rename = "codigo")]
    pub code: Option<String>,
}

#[derive(Deserialize)]
pub struct CreateUserPayload {
    pub username: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct UpdateUserPayload {
    pub username: Option<String>,
    pub password: Option<String>,
    #[serde(rename = "activo")]
    pub active: Option<bool>,
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/codigos", get(list_codes))
        .route("/codigos", post(create_code))
        .route("/codigos/:id", put(update_code))
        .route("/codigos/:id", delete(delete_code))
        .route("/evaluaciones", get(report_by_session))
        .route("/evaluaciones-por-evaluado", get(report_by_evaluee))
        .route("/usuarios", get(list_users))
        .route("/usuarios", post(create_user))
        .route("/usuarios/:id", put(update_user))
        .route("/usuarios/:id", delete(delete_user))
        .with_state(state)
}

fn validate_code_string(code: &str) -> Result<(), ApiError> {
    if code.is_empty() || code.len() > 20 || !code.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(ApiError::InvalidValue(
            "codigo must be 1-20 uppercase alphanumeric characters".into(),
        ));
    }
    Ok(())
}

fn validate_evaluee_name(name: &str) -> Result<(), ApiError> {
    if name.trim().is_empty() || name.len() > 200 {
        return Err(ApiError::InvalidValue(
            "evaluado_nombre must be 1-200 characters".into(),
        ));
    }
    Ok(())
}

fn validate_username(username: &str) -> Result<(), ApiError> {
    if username.len() < 3
        || username.len() > 50
        || !username.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(ApiError::InvalidValue(
            "username must be 3-50 characters of letters, digits or underscores".into(),
        ));
    }
    Ok(())
}

fn validate_password(password: &str) -> Result<(), ApiError> {
    if password.len() < 4 || password.len() > 200 {
        return Err(ApiError::InvalidValue("password must be 4-200 characters".into()));
    }
    Ok(())
}

// ---- codes ----

async fn list_codes(
    AdminSession(_): AdminSession,
    State(state): State<SharedState>,
) -> Result<Json<Vec<CodeRow>>, ApiError> {
    let rows = db::list_codes(&state.pool).await?;
    Ok(Json(rows))
}

async fn create_code(
    AdminSession(_): AdminSession,
    State(state): State<SharedState>,
    Json(payload): Json<CreateCodePayload>,
) -> Result<Json<CodeRow>, ApiError> {
    validate_evaluee_name(&payload.evaluee_name)?;
    if let Some(code) = &payload.code {
        validate_code_string(&codes::normalize_code(code))?;
    }

    let created = codes::create(
        &state.pool,
        NewCode {
            survey_id: payload.survey_id.unwrap_or(1),
            evaluee_name: payload.evaluee_name,
            desired_code: payload.code,
        },
    )
    .await?;
    Ok(Json(created))
}

async fn update_code(
    AdminSession(_): AdminSession,
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateCodePayload>,
) -> Result<Json<CodeRow>, ApiError> {
    if let Some(name) = &payload.evaluee_name {
        validate_evaluee_name(name)?;
    }
    if let Some(code) = &payload.code {
        validate_code_string(&codes::normalize_code(code))?;
    }

    let updated = codes::update(
        &state.pool,
        id,
        CodeUpdate {
            evaluee_name: payload.evaluee_name,
            active: payload.active,
            code: payload.code,
        },
    )
    .await?;
    Ok(Json(updated))
}

async fn delete_code(
    AdminSession(_): AdminSession,
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    match codes::delete(&state.pool, id).await? {
        DeleteOutcome::Deactivated => Ok(Json(json!({ "ok": true, "desactivado": true }))),
        DeleteOutcome::Deleted => Ok(Json(json!({ "ok": true, "eliminado": true }))),
    }
}

// ---- reports ----

async fn report_by_session(
    AdminSession(_): AdminSession,
    State(state): State<SharedState>,
) -> Result<Json<Vec<SessionReport>>, ApiError> {
    let rows = reports::by_session(&state.pool).await?;
    Ok(Json(rows))
}

async fn report_by_evaluee(
    AdminSession(_): AdminSession,
    State(state): State<SharedState>,
) -> Result<Json<Vec<EvalueeReport>>, ApiError> {
    let rows = reports::by_evaluee(&state.pool).await?;
    Ok(Json(rows))
}

// ---- users ----

async fn list_users(
    AdminSession(_): AdminSession,
    State(state): State<SharedState>,
) -> Result<Json<Vec<UserRow>>, ApiError> {
    let rows = db::list_users(&state.pool).await?;
    Ok(Json(rows))
}

async fn create_user(
    AdminSession(_): AdminSession,
    State(state): State<SharedState>,
    Json(payload): Json<CreateUserPayload>,
) -> Result<Json<UserRow>, ApiError> {
    let username = payload.username.trim().to_string();
    validate_username(&username)?;
    validate_password(&payload.password)?;

    let hash = auth::hash_password(&payload.password)?;
    let res = sqlx::query("INSERT INTO users (username, password_hash, active) VALUES (?, ?, 1)")
        .bind(&username)
        .bind(&hash)
        .execute(&state.pool)
        .await;
    let id = match res {
        Ok(r) => r.last_insert_rowid(),
        Err(e) if is_unique_violation(&e) => {
            return Err(ApiError::Conflict("username already exists".into()));
        }
        Err(e) => return Err(e.into()),
    };

    tracing::info!(id, username = %username, "user created");
    let row = db::find_user_row(&state.pool, id)
        .await?
        .ok_or_else(|| ApiError::internal("created user not found"))?;
    Ok(Json(row))
}

async fn update_user(
    AdminSession(_): AdminSession,
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateUserPayload>,
) -> Result<Json<UserRow>, ApiError> {
    if payload.username.is_none() && payload.password.is_none() && payload.active.is_none() {
        return Err(ApiError::NoOp("no fields to update".into()));
    }

    let username = payload.username.map(|u| u.trim().to_lowercase());
    if let Some(name) = &username {
        validate_username(name)?;
    }
    let password_hash = match &payload.password {
        Some(password) => {
            validate_password(password)?;
            Some(auth::hash_password(password)?)
        }
        None => None,
    };

    let mut tx = state.pool.begin().await?;

    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE id = ?)")
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;
    if !exists {
        return Err(ApiError::NotFound("user not found".into()));
    }

    if let Some(name) = &username {
        let taken: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE username = ? AND id != ?)")
                .bind(name)
                .bind(id)
                .fetch_one(&mut *tx)
                .await?;
        if taken {
            return Err(ApiError::Conflict("username already exists".into()));
        }
    }

    sqlx::query(
        r#"
        UPDATE users
        SET username = COALESCE(?, username),
            password_hash = COALESCE(?, password_hash),
            active = COALESCE(?, active),
            updated_at = datetime('now')
        WHERE id = ?
        "#,
    )
    .bind(username)
    .bind(password_hash)
    .bind(payload.active)
    .bind(id)
    .execute(&mut *tx)
    .await?;

    let row = sqlx::query_as::<_, UserRow>(
        "SELECT id, username, active, created_at, updated_at FROM users WHERE id = ?",
    )
    .bind(id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    tracing::info!(id, "user updated");
    Ok(Json(row))
}

async fn delete_user(
    AdminSession(_): AdminSession,
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let res = sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(id)
        .execute(&state.pool)
        .await?;
    if res.rows_affected() == 0 {
        return Err(ApiError::NotFound("user not found".into()));
    }

    tracing::info!(id, "user deleted");
    Ok(Json(json!({ "ok": true, "eliminado": true })))
}
