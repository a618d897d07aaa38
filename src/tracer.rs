//! Tracer facade: the run scope and the opt-in global registry.

use chrono::Utc;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use crate::run::RunHandle;
use crate::store::{Outcome, RunId, Store, StoreError};

/// Entry point for tracing pipeline executions.
///
/// Wraps a shared [`Store`]; callers construct one with the backend they want
/// and pass it where it is needed.
#[derive(Clone)]
pub struct Tracer {
    store: Arc<dyn Store>,
}

impl Tracer {
    /// Create a tracer over the given store.
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// The store this tracer records into. Read paths (dashboards) use this.
    pub fn store(&self) -> Arc<dyn Store> {
        Arc::clone(&self.store)
    }

    /// Begin a traced run.
    ///
    /// Returns a builder for the run's metadata; the builder's
    /// [`scope`](RunBuilder::scope) opens the run, hands the body a
    /// [`RunHandle`], and finalizes the run on every exit path.
    pub fn run(&self, name: impl Into<String>) -> RunBuilder<'_> {
        RunBuilder {
            tracer: self,
            name: name.into(),
            metadata: None,
        }
    }
}

/// Builder for one traced run, returned by [`Tracer::run`].
#[must_use = "a run starts only when its scope is awaited"]
pub struct RunBuilder<'a> {
    tracer: &'a Tracer,
    name: String,
    metadata: Option<Value>,
}

impl RunBuilder<'_> {
    /// Attach metadata describing this run. Defaults to an empty object.
    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Open the run, execute `body` with its handle, and finalize it.
    ///
    /// The run is finished exactly once on every exit path: `success` when
    /// the body returns `Ok`, `error` with the stringified failure when it
    /// returns `Err`. The body's result is returned unchanged — the facade
    /// never swallows a caller failure — except that a storage failure while
    /// finalizing propagates in its place.
    pub async fn scope<T, E, F, Fut>(self, body: F) -> Result<T, E>
    where
        F: FnOnce(RunHandle) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<StoreError> + Display,
    {
        let id = RunId::new();
        let metadata = self.metadata.unwrap_or_else(|| Value::Object(Map::new()));
        let store = Arc::clone(&self.tracer.store);

        store
            .create_run(id, &self.name, &metadata)
            .await
            .map_err(E::from)?;

        let started = Instant::now();
        let handle = RunHandle::new(id, self.name, Arc::clone(&store));

        let result = body(handle).await;

        let outcome = match &result {
            Ok(_) => Outcome::Success,
            Err(e) => Outcome::Error {
                message: e.to_string(),
            },
        };

        store
            .finish_run(id, Utc::now(), started.elapsed().as_millis() as i64, &outcome)
            .await
            .map_err(E::from)?;

        result
    }
}

static GLOBAL_TRACER: RwLock<Option<Arc<Tracer>>> = RwLock::new(None);

/// Install a process-wide tracer.
///
/// Pure convenience for applications that want one shared instance; nothing
/// in the core requires it, and there is no lazy default — callers that want
/// a global build one and install it.
pub fn set_global(tracer: Tracer) {
    *GLOBAL_TRACER.write() = Some(Arc::new(tracer));
}

/// The installed process-wide tracer, if any.
pub fn global() -> Option<Arc<Tracer>> {
    GLOBAL_TRACER.read().clone()
}
