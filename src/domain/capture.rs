//! Session lifecycle core: code redemption, response capture, finalization.
//!
//! Every operation here runs as one transaction, so a concurrent submit and
//! finalize on the same session serialize at the database rather than
//! interleaving half-applied state.

use crate::db::{QuestionRow, SessionRecord};
use crate::domain::token::SessionToken;
use crate::error::{is_unique_violation, ApiError};
use sqlx::SqlitePool;
use std::collections::HashSet;

pub const RATING_SCALE: [i64; 5] = [1, 2, 3, 4, 5];

pub struct RedeemOutcome {
    pub session_id: i64,
    pub token: SessionToken,
    pub survey_id: i64,
    pub team_id: i64,
    pub evaluee_name: Option<String>,
    pub questions: Vec<QuestionRow>,
}

#[derive(Debug, Clone, Copy)]
pub struct RatingEntry {
    pub question_id: i64,
    pub value: i64,
}

#[derive(Debug, PartialEq, Eq)]
pub struct SubmitOutcome {
    pub inserted: u64,
    pub updated: u64,
}

/// Exchange an access code for a new session plus the survey's question set.
/// Unknown and deactivated codes are indistinguishable to the caller.
pub async fn redeem(pool: &SqlitePool, raw_code: &str) -> Result<RedeemOutcome, ApiError> {
    let code = raw_code.trim().to_uppercase();

    let mut tx = pool.begin().await?;

    let row: Option<(i64, i64, i64, bool, Option<String>)> = sqlx::query_as(
        "SELECT id, survey_id, team_id, active, evaluee_name FROM codes WHERE code = ?",
    )
    .bind(&code)
    .fetch_optional(&mut *tx)
    .await?;

    let Some((code_id, survey_id, team_id, active, evaluee_name)) = row else {
        return Err(ApiError::NotFound("code not found or inactive".into()));
    };
    if !active {
        return Err(ApiError::NotFound("code not found or inactive".into()));
    }

    let token = SessionToken::generate();
    let session_id = match sqlx::query("INSERT INTO sessions (code_id, token) VALUES (?, ?)")
        .bind(code_id)
        .bind(token.as_str())
        .execute(&mut *tx)
        .await
    {
        Ok(res) => res.last_insert_rowid(),
        // A colliding 192-bit token means the entropy source is broken;
        // fail loudly instead of retrying.
        Err(e) if is_unique_violation(&e) => {
            return Err(ApiError::internal("session token collision"));
        }
        Err(e) => return Err(e.into()),
    };

    let questions =
        sqlx::query_as::<_, QuestionRow>("SELECT id, text, dimension FROM questions WHERE survey_id = ? ORDER BY id")
            .bind(survey_id)
            .fetch_all(&mut *tx)
            .await?;

    tx.commit().await?;

    tracing::info!(session_id, code_id, "session created");
    Ok(RedeemOutcome {
        session_id,
        token,
        survey_id,
        team_id,
        evaluee_name,
        questions,
    })
}

/// Survey questions that the submitted batch does not cover, in survey order.
pub fn missing_questions(survey_ids: &[i64], submitted_ids: &[i64]) -> Vec<i64> {
    let submitted: HashSet<i64> = submitted_ids.iter().copied().collect();
    survey_ids
        .iter()
        .copied()
        .filter(|id| !submitted.contains(id))
        .collect()
}

/// Upsert a complete batch of ratings for an open session. All preconditions
/// are checked before the first write; the batch commits or rolls back as a
/// whole. Resubmitting overwrites prior values, never duplicates rows.
pub async fn submit(
    pool: &SqlitePool,
    session_token: &str,
    entries: &[RatingEntry],
) -> Result<SubmitOutcome, ApiError> {
    let mut tx = pool.begin().await?;

    let session: Option<SessionRecord> = sqlx::query_as(
        r#"
        SELECT s.id, s.finalized, c.survey_id
        FROM sessions s
        JOIN codes c ON c.id = s.code_id
        WHERE s.token = ?
        "#,
    )
    .bind(session_token)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(session) = session else {
        return Err(ApiError::NotFound("session not found".into()));
    };
    if session.finalized {
        return Err(ApiError::Conflict("session already finalized".into()));
    }

    let survey_ids: Vec<i64> =
        sqlx::query_scalar("SELECT id FROM questions WHERE survey_id = ? ORDER BY id")
            .bind(session.survey_id)
            .fetch_all(&mut *tx)
            .await?;
    let submitted_ids: Vec<i64> = entries.iter().map(|e| e.question_id).collect();

    let missing = missing_questions(&survey_ids, &submitted_ids);
    if !missing.is_empty() {
        return Err(ApiError::Incomplete {
            missing,
            total: survey_ids.len(),
        });
    }

    let survey_set: HashSet<i64> = survey_ids.iter().copied().collect();
    let foreign: Vec<i64> = submitted_ids
        .iter()
        .copied()
        .filter(|id| !survey_set.contains(id))
        .collect();
    if !foreign.is_empty() {
        return Err(ApiError::InvalidReference(foreign));
    }

    if let Some(bad) = entries.iter().find(|e| !RATING_SCALE.contains(&e.value)) {
        return Err(ApiError::InvalidValue(format!(
            "rating {} for question {} is outside 1..=5",
            bad.value, bad.question_id
        )));
    }

    let mut answered: HashSet<i64> =
        sqlx::query_scalar("SELECT question_id FROM responses WHERE session_id = ?")
            .bind(session.id)
            .fetch_all(&mut *tx)
            .await?
            .into_iter()
            .collect();

    let mut inserted = 0u64;
    let mut updated = 0u64;
    for entry in entries {
        sqlx::query(
            r#"
            INSERT INTO responses (session_id, question_id, value)
            VALUES (?, ?, ?)
            ON CONFLICT (session_id, question_id)
            DO UPDATE SET value = excluded.value, created_at = datetime('now')
            "#,
        )
        .bind(session.id)
        .bind(entry.question_id)
        .bind(entry.value)
        .execute(&mut *tx)
        .await?;
        if answered.insert(entry.question_id) {
            inserted += 1;
        } else {
            updated += 1;
        }
    }

    tx.commit().await?;

    tracing::info!(session_id = session.id, inserted, updated, "responses stored");
    Ok(SubmitOutcome { inserted, updated })
}

/// One-way latch: flips `finalized` exactly once. The check-and-set runs in a
/// single transaction so racing callers cannot both succeed.
pub async fn finalize(pool: &SqlitePool, session_token: &str) -> Result<(), ApiError> {
    let mut tx = pool.begin().await?;

    let row: Option<(i64, bool)> =
        sqlx::query_as("SELECT id, finalized FROM sessions WHERE token = ?")
            .bind(session_token)
            .fetch_optional(&mut *tx)
            .await?;

    let Some((session_id, finalized)) = row else {
        return Err(ApiError::NotFound("session not found".into()));
    };
    if finalized {
        return Err(ApiError::Conflict("session already finalized".into()));
    }

    let res = sqlx::query("UPDATE sessions SET finalized = 1 WHERE id = ? AND finalized = 0")
        .bind(session_id)
        .execute(&mut *tx)
        .await?;
    if res.rows_affected() == 0 {
        return Err(ApiError::Conflict("session already finalized".into()));
    }

    tx.commit().await?;

    tracing::info!(session_id, "session finalized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn batch(values: &[(i64, i64)]) -> Vec<RatingEntry> {
        values
            .iter()
            .map(|&(question_id, value)| RatingEntry { question_id, value })
            .collect()
    }

    #[test]
    fn missing_questions_is_set_difference_in_survey_order() {
        assert_eq!(missing_questions(&[1, 2, 3], &[2]), vec![1, 3]);
        assert_eq!(missing_questions(&[1, 2, 3], &[3, 2, 1]), Vec::<i64>::new());
        assert_eq!(missing_questions(&[], &[7]), Vec::<i64>::new());
    }

    #[tokio::test]
    async fn redeem_returns_questions_in_stable_order() {
        let pool = db::test_pool().await;
        let out = redeem(&pool, "  abc123 ").await.unwrap();
        assert_eq!(out.survey_id, 1);
        let ids: Vec<i64> = out.questions.iter().map(|q| q.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(out.questions[0].dimension, "COM");
    }

    #[tokio::test]
    async fn redeem_rejects_unknown_and_inactive_codes() {
        let pool = db::test_pool().await;
        assert!(matches!(
            redeem(&pool, "NOPE99").await,
            Err(ApiError::NotFound(_))
        ));

        sqlx::query("UPDATE codes SET active = 0 WHERE code = 'ABC123'")
            .execute(&pool)
            .await
            .unwrap();
        assert!(matches!(
            redeem(&pool, "ABC123").await,
            Err(ApiError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn redeem_creates_distinct_sessions() {
        let pool = db::test_pool().await;
        let a = redeem(&pool, "ABC123").await.unwrap();
        let b = redeem(&pool, "ABC123").await.unwrap();
        assert_ne!(a.session_id, b.session_id);
        assert_ne!(a.token, b.token);
    }

    #[tokio::test]
    async fn submit_requires_every_survey_question() {
        let pool = db::test_pool().await;
        let session = redeem(&pool, "ABC123").await.unwrap();

        let err = submit(&pool, session.token.as_str(), &batch(&[(1, 4), (3, 5)]))
            .await
            .unwrap_err();
        match err {
            ApiError::Incomplete { missing, total } => {
                assert_eq!(missing, vec![2]);
                assert_eq!(total, 3);
            }
            other => panic!("expected Incomplete, got {other:?}"),
        }

        // nothing was written
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM responses")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn submit_rejects_foreign_questions_without_writing() {
        let pool = db::test_pool().await;
        // second survey with its own question
        sqlx::query("INSERT INTO surveys (name) VALUES ('Other')")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO questions (survey_id, text, dimension) VALUES (2, 'x', 'COM')")
            .execute(&pool)
            .await
            .unwrap();

        let session = redeem(&pool, "ABC123").await.unwrap();
        let err = submit(
            &pool,
            session.token.as_str(),
            &batch(&[(1, 4), (2, 5), (3, 3), (4, 2)]),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::InvalidReference(ids) if ids == vec![4]));

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM responses")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn submit_rejects_out_of_range_values_before_writing() {
        let pool = db::test_pool().await;
        let session = redeem(&pool, "ABC123").await.unwrap();
        let err = submit(
            &pool,
            session.token.as_str(),
            &batch(&[(1, 4), (2, 6), (3, 3)]),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::InvalidValue(_)));

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM responses")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn submit_upserts_and_reports_counts() {
        let pool = db::test_pool().await;
        let session = redeem(&pool, "ABC123").await.unwrap();
        let token = session.token.as_str();

        let first = submit(&pool, token, &batch(&[(1, 4), (2, 5), (3, 3)]))
            .await
            .unwrap();
        assert_eq!(first, SubmitOutcome { inserted: 3, updated: 0 });

        let second = submit(&pool, token, &batch(&[(1, 2), (2, 5), (3, 3)]))
            .await
            .unwrap();
        assert_eq!(second, SubmitOutcome { inserted: 0, updated: 3 });

        // exactly one row per question, values from the latest batch
        let rows: Vec<(i64, i64)> = sqlx::query_as(
            "SELECT question_id, value FROM responses WHERE session_id = ? ORDER BY question_id",
        )
        .bind(session.session_id)
        .fetch_all(&pool)
        .await
        .unwrap();
        assert_eq!(rows, vec![(1, 2), (2, 5), (3, 3)]);
    }

    #[tokio::test]
    async fn submit_unknown_token_is_not_found() {
        let pool = db::test_pool().await;
        let err = submit(&pool, "bogus", &batch(&[(1, 1), (2, 1), (3, 1)]))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn finalize_is_single_shot_and_freezes_the_ledger() {
        let pool = db::test_pool().await;
        let session = redeem(&pool, "ABC123").await.unwrap();
        let token = session.token.as_str();

        submit(&pool, token, &batch(&[(1, 4), (2, 5), (3, 3)]))
            .await
            .unwrap();
        finalize(&pool, token).await.unwrap();

        assert!(matches!(
            finalize(&pool, token).await,
            Err(ApiError::Conflict(_))
        ));
        assert!(matches!(
            submit(&pool, token, &batch(&[(1, 1), (2, 1), (3, 1)])).await,
            Err(ApiError::Conflict(_))
        ));

        // values unchanged after the rejected submit
        let rows: Vec<(i64, i64)> = sqlx::query_as(
            "SELECT question_id, value FROM responses WHERE session_id = ? ORDER BY question_id",
        )
        .bind(session.session_id)
        .fetch_all(&pool)
        .await
        .unwrap();
        assert_eq!(rows, vec![(1, 4), (2, 5), (3, 3)]);
    }

    #[tokio::test]
    async fn finalize_unknown_token_is_not_found() {
        let pool = db::test_pool().await;
        assert!(matches!(
            finalize(&pool, "bogus").await,
            Err(ApiError::NotFound(_))
        ));
    }
}
