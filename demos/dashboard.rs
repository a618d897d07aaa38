//! Record a traced run into SQLite and serve the dashboard over it.
//!
//! The database path comes from `GLASSBOX_DB_PATH` (default `glassbox.db`),
//! so repeated invocations accumulate runs. Open http://localhost:3000 to
//! browse them.

use anyhow::Result;
use glassbox::{SqliteStore, Store, Tracer};
use serde_json::json;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let store: Arc<dyn Store> = Arc::new(SqliteStore::open(None).await?);
    let tracer = Tracer::new(Arc::clone(&store));

    let run_id = tracer
        .run("catalog_health_check")
        .metadata(json!({"trigger": "dashboard_demo"}))
        .scope(|mut run| async move {
            let id = run.id();

            let stale = run
                .step("scan_listings")
                .input(json!({"catalog_size": 4}))
                .reasoning("Checking mock listings for stale prices")
                .scope(|step| async move {
                    let listings = [("B0A", 19.99), ("B0B", 0.0), ("B0C", 45.50), ("B0D", 0.0)];
                    let stale: Vec<&str> = listings
                        .iter()
                        .filter(|(_, price)| *price == 0.0)
                        .map(|(asin, _)| *asin)
                        .collect();
                    for (asin, price) in listings {
                        step.add_evaluation(json!({
                            "asin": asin,
                            "metrics": {"price": price},
                            "qualified": price > 0.0,
                        }));
                    }
                    step.set_output(json!({"stale": stale.clone()}));
                    Ok::<_, anyhow::Error>(stale.len())
                })
                .await?;

            run.step("summarize")
                .input(json!({"stale_count": stale}))
                .scope(|step| async move {
                    step.set_output(json!({
                        "verdict": if stale == 0 { "healthy" } else { "needs_repricing" },
                    }));
                    Ok::<_, anyhow::Error>(())
                })
                .await?;

            Ok::<_, anyhow::Error>(id)
        })
        .await?;

    info!("recorded run {run_id}");
    glassbox_dashboard::serve(store, 3000).await
}
