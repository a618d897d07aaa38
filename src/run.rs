//! Run handle: step-index ownership and the step scope.

use chrono::Utc;
use serde_json::{Map, Value};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use crate::step::StepHandle;
use crate::store::{Outcome, RunId, StepId, Store, StoreError};

/// Handle to an open run, handed to the run scope body.
///
/// Owns the monotonically increasing step-index counter. `step` takes
/// `&mut self`, so one run is driven by exactly one caller at a time and
/// index assignment needs no locking.
pub struct RunHandle {
    id: RunId,
    name: String,
    store: Arc<dyn Store>,
    next_index: u32,
}

impl RunHandle {
    pub(crate) fn new(id: RunId, name: String, store: Arc<dyn Store>) -> Self {
        Self {
            id,
            name,
            store,
            next_index: 0,
        }
    }

    /// This run's identifier.
    pub fn id(&self) -> RunId {
        self.id
    }

    /// The run name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Begin a step of this run.
    ///
    /// Returns a builder for the step's input and reasoning; the builder's
    /// [`scope`](StepBuilder::scope) opens the step, runs the body, and
    /// finalizes the step on every exit path.
    pub fn step(&mut self, name: impl Into<String>) -> StepBuilder<'_> {
        StepBuilder {
            run: self,
            name: name.into(),
            input: None,
            reasoning: None,
        }
    }
}

/// Builder for one traced step, returned by [`RunHandle::step`].
#[must_use = "a step runs only when its scope is awaited"]
pub struct StepBuilder<'a> {
    run: &'a mut RunHandle,
    name: String,
    input: Option<Value>,
    reasoning: Option<String>,
}

impl StepBuilder<'_> {
    /// Attach the step's input payload. Defaults to an empty object.
    pub fn input(mut self, input: Value) -> Self {
        self.input = Some(input);
        self
    }

    /// Attach free-form reasoning text explaining what this step is doing.
    pub fn reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }

    /// Open the step, run `body` with its handle, and finalize it.
    ///
    /// The step index is allocated before any I/O, so assignment is
    /// independent of the step's outcome. Every successfully created step is
    /// finished exactly once: with `success` when the body returns `Ok`, with
    /// `error` and the stringified failure when it returns `Err`. The body's
    /// result is returned unchanged, except that a storage failure while
    /// finalizing propagates in its place.
    pub async fn scope<T, E, F, Fut>(self, body: F) -> Result<T, E>
    where
        F: FnOnce(StepHandle) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<StoreError> + Display,
    {
        let StepBuilder {
            run,
            name,
            input,
            reasoning,
        } = self;

        let index = run.next_index;
        run.next_index += 1;

        let id = StepId::new();
        let input = input.unwrap_or_else(|| Value::Object(Map::new()));

        // No finish_step on a failed create: there is no row to finalize.
        run.store
            .create_step(id, run.id, &name, index, &input, reasoning.as_deref())
            .await
            .map_err(E::from)?;

        let started = Instant::now();
        let handle = StepHandle::new(id, run.id, &name, index);

        let result = body(handle.clone()).await;

        let outcome = match &result {
            Ok(_) => Outcome::Success,
            Err(e) => Outcome::Error {
                message: e.to_string(),
            },
        };
        let (output, filters, evaluations) = handle.close();

        run.store
            .finish_step(
                id,
                Utc::now(),
                started.elapsed().as_millis() as i64,
                &outcome,
                output.as_ref(),
                filters.as_ref(),
                evaluations.as_deref(),
            )
            .await
            .map_err(E::from)?;

        result
    }
}
