//! Web dashboard for browsing glassbox runs.
//!
//! Serves a single embedded page plus a small read-only JSON API over any
//! [`glassbox::Store`]:
//!
//! - `GET /` - the dashboard page
//! - `GET /api/runs` - the 50 most recent runs
//! - `GET /api/runs/:id` - one run with all its steps
//!
//! There is no mutation path: presentation code only ever reads.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use glassbox::MemoryStore;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let store = Arc::new(MemoryStore::new());
//! glassbox_dashboard::serve(store, 3000).await?;
//! # Ok(())
//! # }
//! ```

mod server;

pub use server::{create_router, serve};
