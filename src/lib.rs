//! # Glassbox
//!
//! Execution tracing for decision pipelines.
//!
//! Open a *run* for one pipeline execution, subdivide it into named *steps*,
//! and attach structured input, output, reasoning, applied filters, and
//! per-candidate evaluation records to each step. Everything is persisted so
//! a later viewer can reconstruct, in order, what the pipeline decided and
//! why — including runs that crashed, which is the whole point of the error
//! path.
//!
//! ## Why Glassbox?
//!
//! - **Scoped lifecycles** - Every opened run and step is finalized exactly
//!   once, on every exit path, failure included
//! - **Opaque payloads** - Inputs, outputs, filters, and evaluations are
//!   arbitrary JSON; the core stores them verbatim and never interprets them
//! - **Pluggable storage** - One trait, two backends: SQLite for durability,
//!   in-memory for tests
//! - **Embeddable** - A library, not a service. Runs in your process.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use glassbox::{MemoryStore, Tracer};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let tracer = Tracer::new(Arc::new(MemoryStore::new()));
//!
//! tracer
//!     .run("competitor_selection")
//!     .metadata(json!({"product": "B0XYZ123"}))
//!     .scope(|mut run| async move {
//!         run.step("keyword_generation")
//!             .input(json!({"title": "Steel Bottle 32oz"}))
//!             .reasoning("Extracting key product attributes")
//!             .scope(|step| async move {
//!                 step.set_output(json!({"keywords": ["steel bottle"]}));
//!                 Ok::<_, anyhow::Error>(())
//!             })
//!             .await?;
//!         Ok(run.id())
//!     })
//!     .await?;
//! ```
//!
//! ## Web Dashboard
//!
//! Use `glassbox-dashboard` to browse persisted runs in a browser:
//!
//! ```rust,ignore
//! let store = Arc::new(SqliteStore::open(None).await?);
//! glassbox_dashboard::serve(store, 3000).await?;
//! ```
//!
//! ## Feature Flags
//!
//! - `sqlite` (default) - Enable the SQLite-backed store

pub mod memory;
pub mod run;
pub mod step;
pub mod store;
pub mod tracer;

pub use memory::MemoryStore;
pub use run::{RunHandle, StepBuilder};
pub use step::StepHandle;
pub use store::{
    Outcome, RunDetail, RunId, RunRecord, Status, StepId, StepRecord, Store, StoreError,
};
pub use tracer::{global, set_global, RunBuilder, Tracer};

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
