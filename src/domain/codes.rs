//! Administration of access codes: creation with a bounded retry budget,
//! partial updates, and delete-or-deactivate with response history preserved.

use crate::db::CodeRow;
use crate::error::{is_unique_violation, ApiError};
use rand::Rng;
use sqlx::SqlitePool;

/// Attempts before giving up on generating a non-colliding random code.
const CODE_ATTEMPTS: usize = 10;

pub struct NewCode {
    pub survey_id: i64,
    pub evaluee_name: String,
    pub desired_code: Option<String>,
}

#[derive(Debug, Default)]
pub struct CodeUpdate {
    pub evaluee_name: Option<String>,
    pub active: Option<bool>,
    pub code: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// Code and its (response-free) sessions removed.
    Deleted,
    /// Dependent responses exist; the code was soft-disabled instead.
    Deactivated,
}

pub fn normalize_code(raw: &str) -> String {
    raw.trim().to_uppercase()
}

/// Random 6-character code: 3 uppercase letters followed by 3 digits.
pub fn generate_code() -> String {
    let mut rng = rand::thread_rng();
    let letters: String = (0..3)
        .map(|_| rng.gen_range(b'A'..=b'Z') as char)
        .collect();
    let digits: String = (0..3).map(|_| rng.gen_range(b'0'..=b'9') as char).collect();
    format!("{letters}{digits}")
}

pub async fn create(pool: &SqlitePool, new: NewCode) -> Result<CodeRow, ApiError> {
    create_with(pool, new, generate_code).await
}

/// Insertion loop with an injectable generator so the collision/retry path is
/// testable. An explicit desired code gets exactly one attempt.
async fn create_with(
    pool: &SqlitePool,
    new: NewCode,
    mut gen: impl FnMut() -> String,
) -> Result<CodeRow, ApiError> {
    let team_id = ensure_default_team(pool).await?;
    let desired = new
        .desired_code
        .as_deref()
        .map(normalize_code)
        .filter(|c| !c.is_empty());
    let evaluee_name = new.evaluee_name.trim().to_string();

    for _ in 0..CODE_ATTEMPTS {
        let candidate = desired.clone().unwrap_or_else(&mut gen);
        match sqlx::query(
            "INSERT INTO codes (survey_id, team_id, code, active, evaluee_name) VALUES (?, ?, ?, 1, ?)",
        )
        .bind(new.survey_id)
        .bind(team_id)
        .bind(&candidate)
        .bind(&evaluee_name)
        .execute(pool)
        .await
        {
            Ok(res) => {
                tracing::info!(id = res.last_insert_rowid(), code = %candidate, "code created");
                return Ok(CodeRow {
                    id: res.last_insert_rowid(),
                    survey_id: new.survey_id,
                    team_id,
                    code: candidate,
                    active: true,
                    evaluee_name: Some(evaluee_name),
                });
            }
            Err(e) if is_unique_violation(&e) => {
                if desired.is_some() {
                    return Err(ApiError::Conflict("code already in use".into()));
                }
                tracing::warn!(code = %candidate, "generated code collided, retrying");
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(ApiError::Exhausted(format!(
        "could not generate a unique code in {CODE_ATTEMPTS} attempts"
    )))
}

/// Partial update; absent fields keep their stored value.
pub async fn update(pool: &SqlitePool, id: i64, upd: CodeUpdate) -> Result<CodeRow, ApiError> {
    if upd.evaluee_name.is_none() && upd.active.is_none() && upd.code.is_none() {
        return Err(ApiError::NoOp("no fields to update".into()));
    }

    let new_code = upd.code.as_deref().map(normalize_code);

    let mut tx = pool.begin().await?;

    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM codes WHERE id = ?)")
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;
    if !exists {
        return Err(ApiError::NotFound("code not found".into()));
    }

    if let Some(code) = &new_code {
        let taken: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM codes WHERE code = ? AND id != ?)")
                .bind(code)
                .bind(id)
                .fetch_one(&mut *tx)
                .await?;
        if taken {
            return Err(ApiError::Conflict("code already in use".into()));
        }
    }

    sqlx::query(
        r#"
        UPDATE codes
        SET evaluee_name = COALESCE(?, evaluee_name),
            active = COALESCE(?, active),
            code = COALESCE(?, code)
        WHERE id = ?
        "#,
    )
    .bind(upd.evaluee_name.map(|n| n.trim().to_string()))
    .bind(upd.active)
    .bind(new_code)
    .bind(id)
    .execute(&mut *tx)
    .await?;

    let row = sqlx::query_as::<_, CodeRow>(
        "SELECT id, survey_id, team_id, code, active, evaluee_name FROM codes WHERE id = ?",
    )
    .bind(id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::info!(id, "code updated");
    Ok(row)
}

/// Delete a code and its sessions, unless any session under it holds
/// responses; in that case the code is deactivated so history stays
/// auditable. Decision and mutation share one transaction.
pub async fn delete(pool: &SqlitePool, id: i64) -> Result<DeleteOutcome, ApiError> {
    let mut tx = pool.begin().await?;

    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM codes WHERE id = ?)")
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;
    if !exists {
        return Err(ApiError::NotFound("code not found".into()));
    }

    let has_responses: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM responses r
            JOIN sessions s ON s.id = r.session_id
            WHERE s.code_id = ?
        )
        "#,
    )
    .bind(id)
    .fetch_one(&mut *tx)
    .await?;

    if has_responses {
        sqlx::query("UPDATE codes SET active = 0 WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        tracing::info!(id, "code deactivated, dependent responses exist");
        return Ok(DeleteOutcome::Deactivated);
    }

    sqlx::query("DELETE FROM sessions WHERE code_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    let res = sqlx::query("DELETE FROM codes WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    if res.rows_affected() == 0 {
        // existence was checked in this transaction; zero rows means a race
        return Err(ApiError::internal("code delete affected no rows"));
    }

    tx.commit().await?;
    tracing::info!(id, "code deleted");
    Ok(DeleteOutcome::Deleted)
}

/// Company/team scaffolding for new codes; creates the defaults on first use.
async fn ensure_default_team(pool: &SqlitePool) -> Result<i64, ApiError> {
    let existing: Option<i64> = sqlx::query_scalar("SELECT id FROM teams ORDER BY id LIMIT 1")
        .fetch_optional(pool)
        .await?;
    if let Some(id) = existing {
        return Ok(id);
    }

    let mut tx = pool.begin().await?;
    let company_id = sqlx::query("INSERT INTO companies (name) VALUES ('Demo Company')")
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();
    let team_id = sqlx::query("INSERT INTO teams (company_id, name) VALUES (?, 'General Team')")
        .bind(company_id)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();
    tx.commit().await?;
    tracing::info!(team_id, "created default team");
    Ok(team_id)
}
