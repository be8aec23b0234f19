use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::error::{AppError, AppResult};
use crate::models::{score_type_label, score_type_slice};
use crate::scoring::{Metric, ScoringEngine};

/// Rows per batched insert; each row binds 8 parameters and Postgres
/// caps a statement at 65535 binds.
const SCORE_INSERT_CHUNK: usize = 4_000;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ScoreStateRow {
    pub current_day: i32,
    pub current_date: Option<NaiveDate>,
    pub reference_date: DateTime<Utc>,
    pub invalid_uids: String,
    pub valid_uids: String,
    pub last_update_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct ScoreRow {
    miner_uid: i32,
    day_id: i32,
    score_type: String,
    clv_score: Option<f64>,
    roi_score: Option<f64>,
    entropy_score: Option<f64>,
    composite_score: Option<f64>,
    sortino_score: Option<f64>,
}

/// Relational persistence for the scoring engine: a singleton state
/// row plus the full M x D x 6 score matrix, committed atomically
/// every tick so a restart always resumes from a completed tick.
pub struct ScoreStateRepository {
    pool: PgPool,
}

impl ScoreStateRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> AppResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS score_state (
                state_id INT PRIMARY KEY,
                current_day INT NOT NULL,
                "current_date" DATE,
                reference_date TIMESTAMPTZ NOT NULL,
                invalid_uids TEXT NOT NULL,
                valid_uids TEXT NOT NULL,
                last_update_date DATE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS scores (
                miner_uid INT NOT NULL,
                day_id INT NOT NULL,
                score_type TEXT NOT NULL,
                clv_score DOUBLE PRECISION,
                roi_score DOUBLE PRECISION,
                entropy_score DOUBLE PRECISION,
                composite_score DOUBLE PRECISION,
                sortino_score DOUBLE PRECISION,
                PRIMARY KEY (miner_uid, day_id, score_type)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Persist a completed tick. The state row and every score row
    /// commit in one transaction; any failure rolls the whole tick
    /// back and surfaces as fatal so the driver can retry the tick.
    pub async fn save(&self, engine: &ScoringEngine) -> AppResult<()> {
        let invalid_uids = serde_json::to_string(&engine.partition().invalid.to_uids())?;
        let valid_uids = serde_json::to_string(&engine.partition().valid.to_uids())?;

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO score_state
                (state_id, current_day, "current_date", reference_date,
                 invalid_uids, valid_uids, last_update_date)
            VALUES (1, $1, $2, $3, $4, $5, $6)
            ON CONFLICT (state_id) DO UPDATE SET
                current_day = excluded.current_day,
                "current_date" = excluded."current_date",
                reference_date = excluded.reference_date,
                invalid_uids = excluded.invalid_uids,
                valid_uids = excluded.valid_uids,
                last_update_date = excluded.last_update_date
            "#,
        )
        .bind(engine.buffer.current_day as i32)
        .bind(engine.current_date())
        .bind(engine.reference_date())
        .bind(&invalid_uids)
        .bind(&valid_uids)
        .bind(engine.buffer.last_update_date)
        .execute(&mut *tx)
        .await?;

        let records = collect_score_rows(engine);
        for chunk in records.chunks(SCORE_INSERT_CHUNK) {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO scores (miner_uid, day_id, score_type, clv_score, \
                 roi_score, entropy_score, composite_score, sortino_score) ",
            );
            builder.push_values(chunk, |mut b, rec| {
                b.push_bind(rec.miner_uid)
                    .push_bind(rec.day_id)
                    .push_bind(&rec.score_type)
                    .push_bind(rec.clv_score)
                    .push_bind(rec.roi_score)
                    .push_bind(rec.entropy_score)
                    .push_bind(rec.composite_score)
                    .push_bind(rec.sortino_score);
            });
            builder.push(
                " ON CONFLICT (miner_uid, day_id, score_type) DO UPDATE SET \
                 clv_score = excluded.clv_score, \
                 roi_score = excluded.roi_score, \
                 entropy_score = excluded.entropy_score, \
                 composite_score = excluded.composite_score, \
                 sortino_score = excluded.sortino_score",
            );
            builder.build().execute(&mut *tx).await?;
        }

        tx.commit()
            .await
            .map_err(|e| AppError::Database(format!("Commit failed: {}", e)))?;

        tracing::info!("Saved scoring state and {} score rows", records.len());
        Ok(())
    }

    /// Restore the engine from the last committed tick. Returns true
    /// when no saved state exists (first run).
    pub async fn load(&self, engine: &mut ScoringEngine) -> AppResult<bool> {
        let state = sqlx::query_as::<_, ScoreStateRow>(
            r#"
            SELECT current_day, "current_date", reference_date,
                   invalid_uids, valid_uids, last_update_date
            FROM score_state
            WHERE state_id = 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        let Some(state) = state else {
            tracing::warn!("No scoring state in database, starting with default state");
            return Ok(true);
        };

        let valid_uids: Vec<usize> = serde_json::from_str(&state.valid_uids)?;
        let invalid_uids: Vec<usize> = serde_json::from_str(&state.invalid_uids)?;
        engine.restore_cursor(
            state.current_day.max(0) as usize,
            state.current_date,
            state.reference_date,
            state.last_update_date,
            &valid_uids,
            &invalid_uids,
        );

        tracing::info!("Loading scores from database, this might take a while...");
        self.load_scores(engine).await?;
        Ok(false)
    }

    async fn load_scores(&self, engine: &mut ScoringEngine) -> AppResult<()> {
        let rows = sqlx::query_as::<_, ScoreRow>(
            r#"
            SELECT miner_uid, day_id, score_type, clv_score, roi_score,
                   entropy_score, composite_score, sortino_score
            FROM scores
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let num_miners = engine.num_miners();
        let max_days = engine.max_days();
        let mut applied = 0usize;

        for row in rows {
            let uid = row.miner_uid as usize;
            let day = row.day_id as usize;
            if uid >= num_miners || day >= max_days {
                tracing::warn!(
                    "Skipping out-of-range score row (uid {}, day {})",
                    row.miner_uid,
                    row.day_id
                );
                continue;
            }

            match row.score_type.as_str() {
                "daily" => {
                    engine.buffer.metric_col_mut(Metric::Clv, day)[uid] =
                        row.clv_score.unwrap_or(0.0);
                    engine.buffer.metric_col_mut(Metric::Roi, day)[uid] =
                        row.roi_score.unwrap_or(0.0);
                    engine.buffer.metric_col_mut(Metric::Entropy, day)[uid] =
                        row.entropy_score.unwrap_or(0.0);
                    engine.buffer.metric_col_mut(Metric::Sortino, day)[uid] =
                        row.sortino_score.unwrap_or(0.0);
                    engine
                        .buffer
                        .set_composite(uid, day, 0, row.composite_score.unwrap_or(0.0));
                    applied += 1;
                }
                other => match score_type_slice(other) {
                    Some(slice) => {
                        engine.buffer.set_composite(
                            uid,
                            day,
                            slice,
                            row.composite_score.unwrap_or(0.0),
                        );
                        applied += 1;
                    }
                    None => {
                        tracing::warn!("Unknown score_type '{}', skipping row", other);
                    }
                },
            }
        }

        tracing::info!("Loaded {} score rows from database", applied);
        Ok(())
    }

    /// Drop all persisted scoring state; used by the driver's
    /// state-reset toggle together with `ScoringEngine::full_reset`.
    pub async fn clear(&self) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM score_state")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM scores").execute(&mut *tx).await?;
        tx.commit().await?;
        tracing::info!("Cleared persisted scoring state");
        Ok(())
    }
}

struct ScoreRecord {
    miner_uid: i32,
    day_id: i32,
    score_type: String,
    clv_score: Option<f64>,
    roi_score: Option<f64>,
    entropy_score: Option<f64>,
    composite_score: Option<f64>,
    sortino_score: Option<f64>,
}

/// Flatten the engine's matrices into score rows: one `daily` row
/// per (miner, day) carrying the raw metrics, plus one row per tier
/// slice carrying only the rolling composite. UID-major, day-minor,
/// so write order is stable across runs.
fn collect_score_rows(engine: &ScoringEngine) -> Vec<ScoreRecord> {
    let num_miners = engine.num_miners();
    let max_days = engine.max_days();
    let mut records = Vec::with_capacity(num_miners * max_days * 6);

    for uid in 0..num_miners {
        for day in 0..max_days {
            records.push(ScoreRecord {
                miner_uid: uid as i32,
                day_id: day as i32,
                score_type: score_type_label(0).to_string(),
                clv_score: Some(engine.buffer.metric_cell(Metric::Clv, uid, day)),
                roi_score: Some(engine.buffer.metric_cell(Metric::Roi, uid, day)),
                entropy_score: Some(engine.buffer.metric_cell(Metric::Entropy, uid, day)),
                composite_score: Some(engine.buffer.composite(uid, day, 0)),
                sortino_score: Some(engine.buffer.metric_cell(Metric::Sortino, uid, day)),
            });

            for slice in 1..6 {
                records.push(ScoreRecord {
                    miner_uid: uid as i32,
                    day_id: day as i32,
                    score_type: score_type_label(slice).to_string(),
                    clv_score: None,
                    roi_score: None,
                    entropy_score: None,
                    composite_score: Some(engine.buffer.composite(uid, day, slice)),
                    sortino_score: None,
                });
            }
        }
    }

    records
}
