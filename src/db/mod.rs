pub mod seed;

use anyhow::Result;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};

/// A redeemable access code: one survey + evaluated-person pairing.
#[derive(Debug, Serialize, Deserialize, FromRow)]
pub struct CodeRow {
    pub id: i64,
    #[serde(rename = "encuesta_id")]
    pub survey_id: i64,
    #[serde(rename = "equipo_id")]
    pub team_id: i64,
    #[serde(rename = "codigo")]
    pub code: String,
    #[serde(rename = "activo")]
    pub active: bool,
    #[serde(rename = "evaluado_nombre")]
    pub evaluee_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, FromRow)]
pub struct QuestionRow {
    pub id: i64,
    #[serde(rename = "texto")]
    pub text: String,
    pub dimension: String,
}

/// A session resolved by its bearer token, joined with its code.
#[derive(Debug, FromRow)]
pub struct SessionRecord {
    pub id: i64,
    pub finalized: bool,
    pub survey_id: i64,
}

#[derive(Debug, Serialize, Deserialize, FromRow)]
pub struct UserRow {
    pub id: i64,
    pub username: String,
    #[serde(rename = "activo")]
    pub active: bool,
    #[serde(rename = "creado_en")]
    pub created_at: NaiveDateTime,
    #[serde(rename = "actualizado_en")]
    pub updated_at: NaiveDateTime,
}

/// Full user record, only used inside the auth path; the hash never leaves it.
#[derive(Debug, FromRow)]
pub struct UserAuthRow {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
    pub active: bool,
}

pub async fn find_code_by_id(pool: &SqlitePool, id: i64) -> Result<Option<CodeRow>> {
    let row = sqlx::query_as::<_, CodeRow>(
        r#"
        SELECT id, survey_id, team_id, code, active, evaluee_name
        FROM codes
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn list_codes(pool: &SqlitePool) -> Result<Vec<CodeRow>> {
    let rows = sqlx::query_as::<_, CodeRow>(
        r#"
        SELECT id, survey_id, team_id, code, active, evaluee_name
        FROM codes
        ORDER BY id DESC
        "#,
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn find_user_by_username(pool: &SqlitePool, username: &str) -> Result<Option<UserAuthRow>> {
    let row = sqlx::query_as::<_, UserAuthRow>(
        "SELECT id, username, password_hash, active FROM users WHERE username = ?",
    )
    .bind(username)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn list_users(pool: &SqlitePool) -> Result<Vec<UserRow>> {
    let rows = sqlx::query_as::<_, UserRow>(
        r#"
        SELECT id, username, active, created_at, updated_at
        FROM users
        ORDER BY id DESC
        "#,
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn find_user_row(pool: &SqlitePool, id: i64) -> Result<Option<UserRow>> {
    let row = sqlx::query_as::<_, UserRow>(
        r#"
        SELECT id, username, active, created_at, updated_at
        FROM users
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn update_password_hash(pool: &SqlitePool, user_id: i64, hash: &str) -> Result<()> {
    sqlx::query("UPDATE users SET password_hash = ?, updated_at = datetime('now') WHERE id = ?")
        .bind(hash)
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// In-memory database with migrations and demo fixtures applied. One
/// connection only: each `:memory:` connection is otherwise a separate db.
#[cfg(test)]
pub async fn test_pool() -> SqlitePool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory pool");
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await
        .expect("enable foreign keys");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("migrations");
    seed::seed_demo(&pool).await.expect("demo seed");
    pool
}
