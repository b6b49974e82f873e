//! Database access for games and analysis jobs

use std::future::Future;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use tracing::info;

use crate::error::{JobError, WorkerError};
use crate::job::{AnalysisJob, JobStatus};

/// Schema owned by the worker. `games` normally comes from the import
/// service; creating it here only matters for a fresh local database.
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS games (
    id BIGSERIAL PRIMARY KEY,
    pgn TEXT NOT NULL,
    opening_name TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS analyses (
    id BIGSERIAL PRIMARY KEY,
    game_id BIGINT NOT NULL REFERENCES games(id) ON DELETE CASCADE,
    depth INTEGER NOT NULL CHECK (depth > 0),
    status TEXT NOT NULL CHECK (status IN ('pending', 'running', 'completed', 'failed')),
    evaluation JSONB,
    best_moves JSONB,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_analyses_game_created ON analyses(game_id, created_at DESC);
"#;

pub async fn run_migrations(pool: &PgPool) -> Result<(), WorkerError> {
    sqlx::raw_sql(SCHEMA_SQL).execute(pool).await?;
    info!("Database schema ready");
    Ok(())
}

/// Storage used by the analysis orchestrator.
pub trait AnalysisRepository: Send + Sync {
    /// Move text of a game, `None` when the game does not exist.
    fn fetch_move_text(
        &self,
        game_id: i64,
    ) -> impl Future<Output = Result<Option<String>, WorkerError>> + Send;

    /// Persist a new job and return its id.
    fn insert_job(&self, job: &AnalysisJob) -> impl Future<Output = Result<i64, WorkerError>> + Send;

    /// Persist a job's status and results.
    fn update_job(&self, job: &AnalysisJob) -> impl Future<Output = Result<(), WorkerError>> + Send;
}

#[derive(Clone)]
pub struct PgAnalysisRepository {
    pool: PgPool,
}

impl PgAnalysisRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl AnalysisRepository for PgAnalysisRepository {
    async fn fetch_move_text(&self, game_id: i64) -> Result<Option<String>, WorkerError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT pgn FROM games WHERE id = $1")
            .bind(game_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|(pgn,)| pgn))
    }

    async fn insert_job(&self, job: &AnalysisJob) -> Result<i64, WorkerError> {
        let (id,): (i64,) = sqlx::query_as(
            r#"INSERT INTO analyses (game_id, depth, status, evaluation, best_moves, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id"#,
        )
        .bind(job.game_id)
        .bind(job.depth as i32)
        .bind(job.status().as_str())
        .bind(to_json(job.evaluation())?)
        .bind(to_json(job.best_moves())?)
        .bind(job.created_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    async fn update_job(&self, job: &AnalysisJob) -> Result<(), WorkerError> {
        // Terminal rows are never rewritten.
        let result = sqlx::query(
            r#"UPDATE analyses SET status = $2, evaluation = $3, best_moves = $4
            WHERE id = $1 AND status IN ('pending', 'running')"#,
        )
        .bind(job.id)
        .bind(job.status().as_str())
        .bind(to_json(job.evaluation())?)
        .bind(to_json(job.best_moves())?)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(WorkerError::Analysis(format!(
                "analysis {} is missing or already finished",
                job.id
            )));
        }
        Ok(())
    }
}

fn to_json<T: serde::Serialize>(value: Option<&T>) -> Result<Option<JsonValue>, WorkerError> {
    value
        .map(serde_json::to_value)
        .transpose()
        .map_err(WorkerError::from)
}

type JobRow = (
    i64,
    i64,
    i32,
    String,
    Option<JsonValue>,
    Option<JsonValue>,
    DateTime<Utc>,
);

fn job_from_row(row: JobRow) -> Result<AnalysisJob, WorkerError> {
    let (id, game_id, depth, status, evaluation, best_moves, created_at) = row;
    let status: JobStatus = status.parse()?;
    let evaluation = evaluation.map(serde_json::from_value).transpose()?;
    let best_moves = best_moves.map(serde_json::from_value).transpose()?;
    let depth = u32::try_from(depth).map_err(|_| JobError::Inconsistent(id))?;

    Ok(AnalysisJob::restore(
        id, game_id, depth, created_at, status, evaluation, best_moves,
    )?)
}

/// All jobs for a game, newest first.
pub async fn list_jobs_for_game(pool: &PgPool, game_id: i64) -> Result<Vec<AnalysisJob>, WorkerError> {
    let rows: Vec<JobRow> = sqlx::query_as(
        r#"SELECT id, game_id, depth, status, evaluation, best_moves, created_at
        FROM analyses
        WHERE game_id = $1
        ORDER BY created_at DESC, id DESC"#,
    )
    .bind(game_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(job_from_row).collect()
}

/// Games whose opening name should be (re)computed.
pub async fn fetch_games_for_opening_backfill(
    pool: &PgPool,
    force: bool,
) -> Result<Vec<(i64, String)>, WorkerError> {
    let sql = if force {
        "SELECT id, pgn FROM games ORDER BY id"
    } else {
        "SELECT id, pgn FROM games WHERE opening_name IS NULL ORDER BY id"
    };
    Ok(sqlx::query_as(sql).fetch_all(pool).await?)
}

pub async fn set_opening_name(
    pool: &PgPool,
    game_id: i64,
    opening_name: Option<&str>,
) -> Result<(), WorkerError> {
    sqlx::query("UPDATE games SET opening_name = $2 WHERE id = $1")
        .bind(game_id)
        .bind(opening_name)
        .execute(pool)
        .await?;
    Ok(())
}
