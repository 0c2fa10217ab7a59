use crate::auth;
use anyhow::Result;
use sqlx::SqlitePool;

pub async fn seed_all(pool: &SqlitePool) -> Result<()> {
    seed_demo(pool).await?;
    seed_admin(pool).await?;
    Ok(())
}

/// First-run fixtures: one company/team/survey, three questions and a
/// ready-to-use demo code. Idempotent, guarded on the surveys table.
pub async fn seed_demo(pool: &SqlitePool) -> Result<()> {
    let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM surveys")
        .fetch_one(pool)
        .await?;
    if existing > 0 {
        return Ok(());
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
    let survey_id = sqlx::query("INSERT INTO surveys (name) VALUES ('General Survey Q4')")
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

    let questions = [
        ("The leader communicates goals clearly", "COM"),
        ("The team collaborates effectively", "TEQ"),
        ("I feel motivated by my work", "MOT"),
    ];
    for (text, dimension) in questions {
        sqlx::query("INSERT INTO questions (survey_id, text, dimension) VALUES (?, ?, ?)")
            .bind(survey_id)
            .bind(text)
            .bind(dimension)
            .execute(&mut *tx)
            .await?;
    }

    sqlx::query(
        "INSERT INTO codes (survey_id, team_id, code, active, evaluee_name) VALUES (?, ?, 'ABC123', 1, NULL)",
    )
    .bind(survey_id)
    .bind(team_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    tracing::info!("seeded demo data, trial code: ABC123");
    Ok(())
}

/// Default admin account for a fresh database. The password comes from
/// ADMIN_PASSWORD; the fallback mirrors the legacy deployment default.
pub async fn seed_admin(pool: &SqlitePool) -> Result<()> {
    let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
        .fetch_one(pool)
        .await?;
    if existing > 0 {
        return Ok(());
    }

    let password = std::env::var("ADMIN_PASSWORD").unwrap_or_else(|_| "admin1".to_string());
    let hash = auth::hash_password(&password)?;
    sqlx::query("INSERT INTO users (username, password_hash, active) VALUES ('admin', ?, 1)")
        .bind(hash)
        .execute(pool)
        .await?;
    tracing::info!("seeded default admin user");
    Ok(())
}
