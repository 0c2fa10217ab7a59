//! Read-only aggregation over finalized sessions: arithmetic mean per
//! dimension, grouped by session or accumulated per evaluated person.

use crate::error::ApiError;
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use std::collections::HashMap;

#[derive(Debug, Serialize)]
pub struct SessionReport {
    #[serde(rename = "sesion_id")]
    pub session_id: i64,
    #[serde(rename = "codigo")]
    pub code: String,
    #[serde(rename = "evaluado_nombre")]
    pub evaluee_name: Option<String>,
    #[serde(rename = "por_area")]
    pub by_dimension: BTreeMap<String, f64>,
}

#[derive(Debug, Serialize)]
pub struct EvalueeReport {
    #[serde(rename = "evaluado_id")]
    pub evaluee_id: i64,
    #[serde(rename = "codigo")]
    pub code: String,
    #[serde(rename = "evaluado_nombre")]
    pub evaluee_name: Option<String>,
    #[serde(rename = "por_area")]
    pub by_dimension: BTreeMap<String, f64>,
}

/// Half-up rounding at the second decimal, matching the report contract.
pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// One record per finalized session; dimensions without responses are absent
/// from the mapping rather than zero.
pub async fn by_session(pool: &SqlitePool) -> Result<Vec<SessionReport>, ApiError> {
    let rows: Vec<(i64, String, Option<String>, String, f64)> = sqlx::query_as(
        r#"
        SELECT s.id, c.code, c.evaluee_name, q.dimension, AVG(r.value)
        FROM sessions s
        JOIN codes c ON c.id = s.code_id
        JOIN responses r ON r.session_id = s.id
        JOIN questions q ON q.id = r.question_id
        WHERE s.finalized = 1
        GROUP BY s.id, q.dimension
        ORDER BY s.id DESC, q.dimension
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut reports: Vec<SessionReport> = Vec::new();
    let mut index: HashMap<i64, usize> = HashMap::new();
    for (session_id, code, evaluee_name, dimension, avg) in rows {
        let idx = *index.entry(session_id).or_insert_with(|| {
            reports.push(SessionReport {
                session_id,
                code,
                evaluee_name,
                by_dimension: BTreeMap::new(),
            });
            reports.len() - 1
        });
        reports[idx].by_dimension.insert(dimension, round2(avg));
    }
    Ok(reports)
}

/// One record per code identity, averaging over every individual response
/// value across all of that code's finalized sessions. A mean over values,
/// not a mean of per-session means.
pub async fn by_evaluee(pool: &SqlitePool) -> Result<Vec<EvalueeReport>, ApiError> {
    let rows: Vec<(i64, String, Option<String>, String, f64)> = sqlx::query_as(
        r#"
        SELECT c.id, c.code, c.evaluee_name, q.dimension, AVG(r.value)
        FROM sessions s
        JOIN codes c ON c.id = s.code_id
        JOIN responses r ON r.session_id = s.id
        JOIN questions q ON q.id = r.question_id
        WHERE s.finalized = 1
        GROUP BY c.id, q.dimension
        ORDER BY c.id DESC, q.dimension
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut reports: Vec<EvalueeReport> = Vec::new();
    let mut index: HashMap<i64, usize> = HashMap::new();
    for (evaluee_id, code, evaluee_name, dimension, avg) in rows {
        let idx = *index.entry(evaluee_id).or_insert_with(|| {
            reports.push(EvalueeReport {
                evaluee_id,
                code,
                evaluee_name,
                by_dimension: BTreeMap::new(),
            });
            reports.len() - 1
        });
        reports[idx].by_dimension.insert(dimension, round2(avg));
    }
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::domain::capture::{self, RatingEntry};
    use crate::domain::codes::{self, NewCode};

    async fn finalized_session(pool: &sqlx::SqlitePool, code: &str, values: [i64; 3]) -> i64 {
        let session = capture::redeem(pool, code).await.unwrap();
        let entries = [
            RatingEntry { question_id: 1, value: values[0] },
            RatingEntry { question_id: 2, value: values[1] },
            RatingEntry { question_id: 3, value: values[2] },
        ];
        capture::submit(pool, session.token.as_str(), &entries)
            .await
            .unwrap();
        capture::finalize(pool, session.token.as_str()).await.unwrap();
        session.session_id
    }

    #[test]
    fn rounding_is_half_up_at_two_decimals() {
        assert_eq!(round2(11.0 / 3.0), 3.67);
        assert_eq!(round2(13.0 / 3.0), 4.33);
        assert_eq!(round2(4.125), 4.13);
        assert_eq!(round2(4.0), 4.0);
    }

    #[tokio::test]
    async fn unfinalized_sessions_are_excluded_from_both_views() {
        let pool = db::test_pool().await;
        let session = capture::redeem(&pool, "ABC123").await.unwrap();
        let entries = [
            RatingEntry { question_id: 1, value: 5 },
            RatingEntry { question_id: 2, value: 5 },
            RatingEntry { question_id: 3, value: 5 },
        ];
        capture::submit(&pool, session.token.as_str(), &entries)
            .await
            .unwrap();

        assert!(by_session(&pool).await.unwrap().is_empty());
        assert!(by_evaluee(&pool).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn per_session_view_groups_by_dimension() {
        let pool = db::test_pool().await;
        let session_id = finalized_session(&pool, "ABC123", [4, 5, 3]).await;

        let reports = by_session(&pool).await.unwrap();
        assert_eq!(reports.len(), 1);
        let report = &reports[0];
        assert_eq!(report.session_id, session_id);
        assert_eq!(report.code, "ABC123");
        assert_eq!(report.by_dimension.get("COM"), Some(&4.0));
        assert_eq!(report.by_dimension.get("TEQ"), Some(&5.0));
        assert_eq!(report.by_dimension.get("MOT"), Some(&3.0));
    }

    #[tokio::test]
    async fn accumulated_view_averages_values_not_session_means() {
        let pool = db::test_pool().await;
        // extra MOT question so one session can carry two MOT values
        sqlx::query("INSERT INTO questions (survey_id, text, dimension) VALUES (1, 'extra', 'MOT')")
            .execute(&pool)
            .await
            .unwrap();

        // session A: MOT values [5, 5]; session B: MOT value [1] plus filler
        let a = capture::redeem(&pool, "ABC123").await.unwrap();
        capture::submit(
            &pool,
            a.token.as_str(),
            &[
                RatingEntry { question_id: 1, value: 3 },
                RatingEntry { question_id: 2, value: 3 },
                RatingEntry { question_id: 3, value: 5 },
                RatingEntry { question_id: 4, value: 5 },
            ],
        )
        .await
        .unwrap();
        capture::finalize(&pool, a.token.as_str()).await.unwrap();

        let b = capture::redeem(&pool, "ABC123").await.unwrap();
        capture::submit(
            &pool,
            b.token.as_str(),
            &[
                RatingEntry { question_id: 1, value: 3 },
                RatingEntry { question_id: 2, value: 3 },
                RatingEntry { question_id: 3, value: 1 },
                RatingEntry { question_id: 4, value: 1 },
            ],
        )
        .await
        .unwrap();
        // drop one MOT answer from B so the distribution is [5,5] vs [1]
        sqlx::query("DELETE FROM responses WHERE session_id = ? AND question_id = 4")
            .bind(b.session_id)
            .execute(&pool)
            .await
            .unwrap();
        capture::finalize(&pool, b.token.as_str()).await.unwrap();

        let reports = by_evaluee(&pool).await.unwrap();
        assert_eq!(reports.len(), 1);
        // (5 + 5 + 1) / 3 = 3.67, not the 3.0 a mean of session means would give
        assert_eq!(reports[0].by_dimension.get("MOT"), Some(&3.67));
    }

    #[tokio::test]
    async fn views_order_most_recent_first() {
        let pool = db::test_pool().await;
        codes::create(
            &pool,
            NewCode {
                survey_id: 1,
                evaluee_name: "Ana".into(),
                desired_code: Some("ZZZ999".into()),
            },
        )
        .await
        .unwrap();

        let first = finalized_session(&pool, "ABC123", [1, 1, 1]).await;
        let second = finalized_session(&pool, "ZZZ999", [5, 5, 5]).await;

        let sessions = by_session(&pool).await.unwrap();
        assert_eq!(
            sessions.iter().map(|r| r.session_id).collect::<Vec<_>>(),
            vec![second, first]
        );

        let evaluees = by_evaluee(&pool).await.unwrap();
        assert_eq!(
            evaluees.iter().map(|r| r.code.as_str()).collect::<Vec<_>>(),
            vec!["ZZZ999", "ABC123"]
        );
    }
}
