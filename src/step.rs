//! Step handle: one step's accumulation state between create and finish.

use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;

use crate::store::{RunId, StepId};

#[derive(Default)]
struct StepState {
    output: Option<Value>,
    filters: Option<Value>,
    evaluations: Vec<Value>,
    closed: bool,
}

/// Handle to an open step, handed to the step scope body.
///
/// Cheaply cloneable; clones share the same accumulation state. The enclosing
/// scope closes the handle exactly once when the body exits, draining whatever
/// was accumulated into the store. After close every setter is a no-op, so a
/// clone that escapes the scope can never corrupt the persisted step.
#[derive(Clone)]
pub struct StepHandle {
    id: StepId,
    run_id: RunId,
    name: Arc<str>,
    index: u32,
    state: Arc<Mutex<StepState>>,
}

impl StepHandle {
    pub(crate) fn new(id: StepId, run_id: RunId, name: &str, index: u32) -> Self {
        Self {
            id,
            run_id,
            name: Arc::from(name),
            index,
            state: Arc::new(Mutex::new(StepState::default())),
        }
    }

    /// This step's identifier.
    pub fn id(&self) -> StepId {
        self.id
    }

    /// The identifier of the run this step belongs to.
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// The step name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The step's zero-based index within its run.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Set the step's output. Last write wins if called more than once.
    pub fn set_output(&self, output: Value) {
        let mut state = self.state.lock();
        if !state.closed {
            state.output = Some(output);
        }
    }

    /// Set the description of the filters this step applied.
    pub fn set_filters(&self, filters: Value) {
        let mut state = self.state.lock();
        if !state.closed {
            state.filters = Some(filters);
        }
    }

    /// Append one candidate evaluation. Never replaces prior entries.
    pub fn add_evaluation(&self, evaluation: Value) {
        let mut state = self.state.lock();
        if !state.closed {
            state.evaluations.push(evaluation);
        }
    }

    /// Append multiple candidate evaluations in order.
    pub fn add_evaluations(&self, evaluations: impl IntoIterator<Item = Value>) {
        let mut state = self.state.lock();
        if !state.closed {
            state.evaluations.extend(evaluations);
        }
    }

    /// Close the handle and drain the accumulated state.
    ///
    /// Empty evaluations drain to `None` so they persist as absent, not `[]`.
    pub(crate) fn close(&self) -> (Option<Value>, Option<Value>, Option<Vec<Value>>) {
        let mut state = self.state.lock();
        state.closed = true;
        let evaluations = if state.evaluations.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut state.evaluations))
        };
        (state.output.take(), state.filters.take(), evaluations)
    }
}
