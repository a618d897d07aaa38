//! Storage trait and the record types it persists.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Unique identifier for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a fresh random run id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Unique identifier for a step within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepId(pub Uuid);

impl StepId {
    /// Generate a fresh random step id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for StepId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for StepId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Lifecycle status of a run or step.
///
/// `Running` from creation until exactly one finalize call moves the record
/// to `Success` or `Error`; finalized records are immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Running,
    Success,
    Error,
}

impl Status {
    /// The canonical lowercase string stored in the status column.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Success => "success",
            Self::Error => "error",
        }
    }

    /// Parse a stored status string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "success" => Some(Self::Success),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The terminal transition of a run or step.
///
/// Carries the error message with the error variant so a finalized record
/// can never have a message without `error` status, or vice versa.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The scope body completed normally.
    Success,
    /// The scope body failed.
    Error { message: String },
}

impl Outcome {
    /// The status this outcome finalizes the record to.
    pub fn status(&self) -> Status {
        match self {
            Self::Success => Status::Success,
            Self::Error { .. } => Status::Error,
        }
    }

    /// The error message, present iff this is the error outcome.
    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Success => None,
            Self::Error { message } => Some(message),
        }
    }
}

/// A persisted run, without its steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: RunId,
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub status: Status,
    pub metadata: Value,
    pub error: Option<String>,
}

/// A persisted step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub id: StepId,
    pub run_id: RunId,
    pub name: String,
    pub index: u32,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub status: Status,
    pub input: Value,
    pub output: Option<Value>,
    pub reasoning: Option<String>,
    pub filters_applied: Option<Value>,
    pub evaluations: Option<Vec<Value>>,
    pub error: Option<String>,
}

/// A run together with its steps, ordered by index ascending.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunDetail {
    #[serde(flatten)]
    pub run: RunRecord,
    pub steps: Vec<StepRecord>,
}

/// Error type for store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The backend could not complete a read or write. Covers I/O failures,
    /// constraint violations, and duplicate identifiers on create.
    #[error("storage error: {0}")]
    Storage(String),

    /// A finalize call matched no row.
    #[error("not found: {0}")]
    NotFound(String),

    /// A payload could not be encoded to JSON.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A stored payload, timestamp, or status could not be decoded.
    #[error("deserialization error: {0}")]
    Deserialization(String),
}

/// Trait for tracing storage backends.
///
/// The six operations below are the tracing core's entire I/O boundary.
/// Payload arguments (metadata, input, output, filters, evaluations) are
/// opaque [`Value`]s stored verbatim; implementations must round-trip them by
/// key-set and value. Each call mutates or reads exactly one row's worth of
/// state and must be atomic on its own.
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert a new run with status `running`, stamping the current time as
    /// its start. Fails with [`StoreError::Storage`] if `id` already exists.
    async fn create_run(&self, id: RunId, name: &str, metadata: &Value) -> Result<(), StoreError>;

    /// Finalize a run in place. Fails with [`StoreError::NotFound`] if no
    /// run matches `id`.
    async fn finish_run(
        &self,
        id: RunId,
        ended_at: DateTime<Utc>,
        duration_ms: i64,
        outcome: &Outcome,
    ) -> Result<(), StoreError>;

    /// Insert a new step with status `running`, stamping the current time as
    /// its start.
    async fn create_step(
        &self,
        id: StepId,
        run_id: RunId,
        name: &str,
        index: u32,
        input: &Value,
        reasoning: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Finalize a step in place with whatever the step accumulated. Fails
    /// with [`StoreError::NotFound`] if no step matches `id`.
    #[allow(clippy::too_many_arguments)]
    async fn finish_step(
        &self,
        id: StepId,
        ended_at: DateTime<Utc>,
        duration_ms: i64,
        outcome: &Outcome,
        output: Option<&Value>,
        filters_applied: Option<&Value>,
        evaluations: Option<&[Value]>,
    ) -> Result<(), StoreError>;

    /// The `limit` most recently started runs, newest first, without steps.
    async fn list_runs(&self, limit: u32) -> Result<Vec<RunRecord>, StoreError>;

    /// A run plus all its steps ordered by index ascending, or `None` if the
    /// run does not exist. Absence is not an error for this operation.
    async fn get_run(&self, id: RunId) -> Result<Option<RunDetail>, StoreError>;
}
