//! SQLite store implementation.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::store::{
    Outcome, RunDetail, RunId, RunRecord, Status, StepId, StepRecord, Store, StoreError,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS runs (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    started_at TEXT NOT NULL,
    ended_at TEXT,
    duration_ms INTEGER,
    status TEXT NOT NULL DEFAULT 'running',
    metadata TEXT NOT NULL,
    error TEXT
);

CREATE TABLE IF NOT EXISTS steps (
    id TEXT PRIMARY KEY,
    run_id TEXT NOT NULL REFERENCES runs(id),
    name TEXT NOT NULL,
    step_index INTEGER NOT NULL,
    started_at TEXT NOT NULL,
    ended_at TEXT,
    duration_ms INTEGER,
    status TEXT NOT NULL DEFAULT 'running',
    input TEXT NOT NULL,
    output TEXT,
    reasoning TEXT,
    filters_applied TEXT,
    evaluations TEXT,
    error TEXT
);

CREATE INDEX IF NOT EXISTS idx_steps_run_id ON steps(run_id);
CREATE INDEX IF NOT EXISTS idx_runs_started_at ON runs(started_at DESC)
"#;

type RunRow = (
    String,
    String,
    String,
    Option<String>,
    Option<i64>,
    String,
    String,
    Option<String>,
);

type StepRow = (
    String,
    String,
    i64,
    String,
    Option<String>,
    Option<i64>,
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
);

/// SQLite-backed store over a connection pool.
///
/// The reference durable backend: two tables linked by foreign key, every
/// write a single auto-committed statement. Timestamps are RFC 3339 UTC text
/// with microsecond precision, so lexical order matches chronological order.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a store over an existing connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (or create) a database file and run migrations.
    ///
    /// With `None`, the path comes from the `GLASSBOX_DB_PATH` environment
    /// variable, falling back to `glassbox.db`. Parent directories are
    /// created if missing.
    pub async fn open(path: Option<&Path>) -> Result<Self, StoreError> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => default_db_path(),
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::Storage(e.to_string()))?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Storage(e.to_string()))?;

        let store = Self::new(pool);
        store.run_migrations().await?;
        debug!("opened sqlite store at {}", path.display());
        Ok(store)
    }

    /// Run database migrations to create the runs and steps tables.
    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        for statement in SCHEMA.split(';') {
            let trimmed = statement.trim();
            if !trimmed.is_empty() {
                sqlx::query(trimmed)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| StoreError::Storage(e.to_string()))?;
            }
        }
        Ok(())
    }
}

fn default_db_path() -> PathBuf {
    std::env::var_os("GLASSBOX_DB_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("glassbox.db"))
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(text: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Deserialization(format!("bad timestamp '{text}': {e}")))
}

fn parse_status(text: &str) -> Result<Status, StoreError> {
    Status::parse(text)
        .ok_or_else(|| StoreError::Deserialization(format!("unknown status '{text}'")))
}

fn parse_json(text: &str) -> Result<Value, StoreError> {
    serde_json::from_str(text).map_err(|e| StoreError::Deserialization(e.to_string()))
}

fn encode_json(value: &Value) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn run_from_row(row: RunRow) -> Result<RunRecord, StoreError> {
    let (id, name, started_at, ended_at, duration_ms, status, metadata, error) = row;
    Ok(RunRecord {
        id: id
            .parse()
            .map_err(|e| StoreError::Deserialization(format!("bad run id '{id}': {e}")))?,
        name,
        started_at: parse_timestamp(&started_at)?,
        ended_at: ended_at.as_deref().map(parse_timestamp).transpose()?,
        duration_ms,
        status: parse_status(&status)?,
        metadata: parse_json(&metadata)?,
        error,
    })
}

fn step_from_row(run_id: RunId, row: StepRow) -> Result<StepRecord, StoreError> {
    let (
        id,
        name,
        step_index,
        started_at,
        ended_at,
        duration_ms,
        status,
        input,
        output,
        reasoning,
        filters_applied,
        evaluations,
        error,
    ) = row;

    let evaluations = evaluations
        .as_deref()
        .map(|text| {
            serde_json::from_str::<Vec<Value>>(text)
                .map_err(|e| StoreError::Deserialization(e.to_string()))
        })
        .transpose()?;

    Ok(StepRecord {
        id: id
            .parse()
            .map_err(|e| StoreError::Deserialization(format!("bad step id '{id}': {e}")))?,
        run_id,
        name,
        index: step_index as u32,
        started_at: parse_timestamp(&started_at)?,
        ended_at: ended_at.as_deref().map(parse_timestamp).transpose()?,
        duration_ms,
        status: parse_status(&status)?,
        input: parse_json(&input)?,
        output: output.as_deref().map(parse_json).transpose()?,
        reasoning,
        filters_applied: filters_applied.as_deref().map(parse_json).transpose()?,
        evaluations,
        error,
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn create_run(&self, id: RunId, name: &str, metadata: &Value) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO runs (id, name, started_at, status, metadata) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(name)
        .bind(format_timestamp(Utc::now()))
        .bind(Status::Running.as_str())
        .bind(encode_json(metadata)?)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?;

        debug!("created run {id} ({name})");
        Ok(())
    }

    async fn finish_run(
        &self,
        id: RunId,
        ended_at: DateTime<Utc>,
        duration_ms: i64,
        outcome: &Outcome,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE runs SET ended_at = ?, duration_ms = ?, status = ?, error = ? WHERE id = ?",
        )
        .bind(format_timestamp(ended_at))
        .bind(duration_ms)
        .bind(outcome.status().as_str())
        .bind(outcome.error())
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("run {id} not found")));
        }
        debug!("finished run {id} ({})", outcome.status());
        Ok(())
    }

    async fn create_step(
        &self,
        id: StepId,
        run_id: RunId,
        name: &str,
        index: u32,
        input: &Value,
        reasoning: Option<&str>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO steps (id, run_id, name, step_index, started_at, status, input, reasoning) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(run_id.to_string())
        .bind(name)
        .bind(index as i64)
        .bind(format_timestamp(Utc::now()))
        .bind(Status::Running.as_str())
        .bind(encode_json(input)?)
        .bind(reasoning)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?;

        debug!("created step {id} ({name}, index {index}) for run {run_id}");
        Ok(())
    }

    async fn finish_step(
        &self,
        id: StepId,
        ended_at: DateTime<Utc>,
        duration_ms: i64,
        outcome: &Outcome,
        output: Option<&Value>,
        filters_applied: Option<&Value>,
        evaluations: Option<&[Value]>,
    ) -> Result<(), StoreError> {
        let evaluations = evaluations
            .map(|evals| {
                serde_json::to_string(evals).map_err(|e| StoreError::Serialization(e.to_string()))
            })
            .transpose()?;

        let result = sqlx::query(
            "UPDATE steps SET ended_at = ?, duration_ms = ?, status = ?, \
             output = ?, filters_applied = ?, evaluations = ?, error = ? WHERE id = ?",
        )
        .bind(format_timestamp(ended_at))
        .bind(duration_ms)
        .bind(outcome.status().as_str())
        .bind(output.map(encode_json).transpose()?)
        .bind(filters_applied.map(encode_json).transpose()?)
        .bind(evaluations)
        .bind(outcome.error())
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("step {id} not found")));
        }
        debug!("finished step {id} ({})", outcome.status());
        Ok(())
    }

    async fn list_runs(&self, limit: u32) -> Result<Vec<RunRecord>, StoreError> {
        let rows: Vec<RunRow> = sqlx::query_as(
            "SELECT id, name, started_at, ended_at, duration_ms, status, metadata, error \
             FROM runs ORDER BY started_at DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?;

        rows.into_iter().map(run_from_row).collect()
    }

    async fn get_run(&self, id: RunId) -> Result<Option<RunDetail>, StoreError> {
        let row: Option<RunRow> = sqlx::query_as(
            "SELECT id, name, started_at, ended_at, duration_ms, status, metadata, error \
             FROM runs WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let run = run_from_row(row)?;

        let step_rows: Vec<StepRow> = sqlx::query_as(
            "SELECT id, name, step_index, started_at, ended_at, duration_ms, status, \
             input, output, reasoning, filters_applied, evaluations, error \
             FROM steps WHERE run_id = ? ORDER BY step_index ASC",
        )
        .bind(id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(e.to_string()))?;

        let steps = step_rows
            .into_iter()
            .map(|row| step_from_row(id, row))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(RunDetail { run, steps }))
    }
}
