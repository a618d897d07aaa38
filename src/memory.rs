//! In-memory store implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

use crate::store::{
    Outcome, RunDetail, RunId, RunRecord, Status, StepId, StepRecord, Store, StoreError,
};

#[derive(Default)]
struct Inner {
    runs: HashMap<RunId, RunRecord>,
    steps: HashMap<StepId, StepRecord>,
}

/// A store that keeps everything in process memory.
///
/// Implements the full [`Store`] contract, including strict not-found on
/// finalize. Useful for tests and for pipelines that only need their traces
/// inspected within the same process.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Create an empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_run(&self, id: RunId, name: &str, metadata: &Value) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if inner.runs.contains_key(&id) {
            return Err(StoreError::Storage(format!("run {id} already exists")));
        }
        inner.runs.insert(
            id,
            RunRecord {
                id,
                name: name.to_string(),
                started_at: Utc::now(),
                ended_at: None,
                duration_ms: None,
                status: Status::Running,
                metadata: metadata.clone(),
                error: None,
            },
        );
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
        let mut inner = self.inner.lock();
        let run = inner
            .runs
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("run {id} not found")))?;
        run.ended_at = Some(ended_at);
        run.duration_ms = Some(duration_ms);
        run.status = outcome.status();
        run.error = outcome.error().map(str::to_string);
        debug!("finished run {id} ({})", run.status);
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
        let mut inner = self.inner.lock();
        if inner.steps.contains_key(&id) {
            return Err(StoreError::Storage(format!("step {id} already exists")));
        }
        inner.steps.insert(
            id,
            StepRecord {
                id,
                run_id,
                name: name.to_string(),
                index,
                started_at: Utc::now(),
                ended_at: None,
                duration_ms: None,
                status: Status::Running,
                input: input.clone(),
                output: None,
                reasoning: reasoning.map(str::to_string),
                filters_applied: None,
                evaluations: None,
                error: None,
            },
        );
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
        let mut inner = self.inner.lock();
        let step = inner
            .steps
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("step {id} not found")))?;
        step.ended_at = Some(ended_at);
        step.duration_ms = Some(duration_ms);
        step.status = outcome.status();
        step.error = outcome.error().map(str::to_string);
        step.output = output.cloned();
        step.filters_applied = filters_applied.cloned();
        step.evaluations = evaluations.map(<[Value]>::to_vec);
        debug!("finished step {id} ({})", step.status);
        Ok(())
    }

    async fn list_runs(&self, limit: u32) -> Result<Vec<RunRecord>, StoreError> {
        let inner = self.inner.lock();
        let mut runs: Vec<RunRecord> = inner.runs.values().cloned().collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs.truncate(limit as usize);
        Ok(runs)
    }

    async fn get_run(&self, id: RunId) -> Result<Option<RunDetail>, StoreError> {
        let inner = self.inner.lock();
        let Some(run) = inner.runs.get(&id).cloned() else {
            return Ok(None);
        };
        let mut steps: Vec<StepRecord> = inner
            .steps
            .values()
            .filter(|s| s.run_id == id)
            .cloned()
            .collect();
        steps.sort_by_key(|s| s.index);
        Ok(Some(RunDetail { run, steps }))
    }
}
