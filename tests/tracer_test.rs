//! Lifecycle tests for the tracer facade and handles against MemoryStore.

use anyhow::anyhow;
use glassbox::{MemoryStore, Status, StepHandle, Store, StoreError, Tracer};
use serde_json::json;
use std::sync::Arc;

fn tracer() -> (Tracer, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    (Tracer::new(Arc::clone(&store) as Arc<dyn Store>), store)
}

#[tokio::test]
async fn successful_run_is_recorded_once() {
    let (tracer, store) = tracer();

    let run_id = tracer
        .run("nightly_selection")
        .metadata(json!({"product_id": "B0XYZ123"}))
        .scope(|mut run| async move {
            let id = run.id();
            run.step("generate")
                .input(json!({"x": 1}))
                .scope(|step| async move {
                    step.set_output(json!({"keywords": ["bottle"]}));
                    Ok::<_, anyhow::Error>(())
                })
                .await?;
            Ok::<_, anyhow::Error>(id)
        })
        .await
        .unwrap();

    let runs = store.list_runs(10).await.unwrap();
    assert_eq!(runs.len(), 1);

    let detail = store.get_run(run_id).await.unwrap().unwrap();
    assert_eq!(detail.run.name, "nightly_selection");
    assert_eq!(detail.run.status, Status::Success);
    assert_eq!(detail.run.metadata, json!({"product_id": "B0XYZ123"}));
    assert!(detail.run.ended_at.is_some());
    assert!(detail.run.duration_ms.unwrap() >= 0);
    assert_eq!(detail.run.error, None);

    assert_eq!(detail.steps.len(), 1);
    let step = &detail.steps[0];
    assert_eq!(step.status, Status::Success);
    assert_eq!(step.input, json!({"x": 1}));
    assert_eq!(step.output, Some(json!({"keywords": ["bottle"]})));
    assert!(step.duration_ms.unwrap() >= 0);
}

#[tokio::test]
async fn run_body_error_is_recorded_and_propagates() {
    let (tracer, store) = tracer();

    let mut run_id = None;
    let result: Result<(), anyhow::Error> = tracer
        .run("doomed")
        .scope(|run| {
            run_id = Some(run.id());
            async move { Err(anyhow!("pipeline exploded")) }
        })
        .await;

    // The original failure still reaches the caller.
    assert_eq!(result.unwrap_err().to_string(), "pipeline exploded");

    let detail = store.get_run(run_id.unwrap()).await.unwrap().unwrap();
    assert_eq!(detail.run.status, Status::Error);
    assert_eq!(detail.run.error.as_deref(), Some("pipeline exploded"));
    assert!(detail.run.ended_at.is_some());
}

#[tokio::test]
async fn failing_step_marks_step_and_run() {
    let (tracer, store) = tracer();

    let mut run_id = None;
    let result: Result<(), anyhow::Error> = tracer
        .run("r")
        .scope(|mut run| {
            run_id = Some(run.id());
            async move {
                run.step("s1")
                    .input(json!({"x": 1}))
                    .scope(|_step| async move { Err::<(), _>(anyhow!("boom")) })
                    .await
            }
        })
        .await;

    assert_eq!(result.unwrap_err().to_string(), "boom");

    // Exactly one run and one step, both finalized as errors with the message.
    assert_eq!(store.list_runs(10).await.unwrap().len(), 1);
    let detail = store.get_run(run_id.unwrap()).await.unwrap().unwrap();
    assert_eq!(detail.run.status, Status::Error);
    assert_eq!(detail.run.error.as_deref(), Some("boom"));
    assert_eq!(detail.steps.len(), 1);
    assert_eq!(detail.steps[0].status, Status::Error);
    assert_eq!(detail.steps[0].error.as_deref(), Some("boom"));
    assert_eq!(detail.steps[0].input, json!({"x": 1}));
}

#[tokio::test]
async fn step_indices_are_dense_regardless_of_outcome() {
    let (tracer, store) = tracer();

    let run_id = tracer
        .run("mixed")
        .scope(|mut run| async move {
            let id = run.id();
            run.step("first")
                .scope(|_| async move { Ok::<_, anyhow::Error>(()) })
                .await?;
            // Second step fails, but the run swallows it and keeps going.
            let failed = run
                .step("second")
                .scope(|_| async move { Err::<(), anyhow::Error>(anyhow!("transient")) })
                .await;
            assert!(failed.is_err());
            run.step("third")
                .scope(|_| async move { Ok::<_, anyhow::Error>(()) })
                .await?;
            Ok::<_, anyhow::Error>(id)
        })
        .await
        .unwrap();

    let detail = store.get_run(run_id).await.unwrap().unwrap();
    let indices: Vec<u32> = detail.steps.iter().map(|s| s.index).collect();
    assert_eq!(indices, vec![0, 1, 2]);
    assert_eq!(detail.steps[1].status, Status::Error);
    assert_eq!(detail.run.status, Status::Success);
}

#[tokio::test]
async fn evaluations_accumulate_in_call_order() {
    let (tracer, store) = tracer();

    let run_id = tracer
        .run("evals")
        .scope(|mut run| async move {
            let id = run.id();
            run.step("filter")
                .scope(|step| async move {
                    step.add_evaluation(json!({"asin": "A", "qualified": true}));
                    step.add_evaluation(json!({"asin": "B", "qualified": false}));
                    step.add_evaluation(json!({"asin": "C", "qualified": true}));
                    Ok::<_, anyhow::Error>(())
                })
                .await?;
            Ok::<_, anyhow::Error>(id)
        })
        .await
        .unwrap();

    let detail = store.get_run(run_id).await.unwrap().unwrap();
    let evaluations = detail.steps[0].evaluations.as_ref().unwrap();
    assert_eq!(evaluations.len(), 3);
    assert_eq!(evaluations[0]["asin"], "A");
    assert_eq!(evaluations[1]["asin"], "B");
    assert_eq!(evaluations[2]["asin"], "C");
}

#[tokio::test]
async fn set_output_keeps_only_the_last_value() {
    let (tracer, store) = tracer();

    let run_id = tracer
        .run("rewrite")
        .scope(|mut run| async move {
            let id = run.id();
            run.step("s")
                .scope(|step| async move {
                    step.set_output(json!({"attempt": 1}));
                    step.set_output(json!({"attempt": 2}));
                    Ok::<_, anyhow::Error>(())
                })
                .await?;
            Ok::<_, anyhow::Error>(id)
        })
        .await
        .unwrap();

    let detail = store.get_run(run_id).await.unwrap().unwrap();
    assert_eq!(detail.steps[0].output, Some(json!({"attempt": 2})));
}

#[tokio::test]
async fn payloads_round_trip_verbatim() {
    let (tracer, store) = tracer();

    let payload = json!({
        "nested": {"list": [1, 2.5, "three", null, true]},
        "empty": {},
        "unicode": "32oz бутылка",
    });
    let filters = json!({"price_range": {"min": 14.99, "max": 59.99}});

    let sent = payload.clone();
    let sent_filters = filters.clone();
    let run_id = tracer
        .run("roundtrip")
        .metadata(payload.clone())
        .scope(|mut run| async move {
            let id = run.id();
            run.step("s")
                .input(sent.clone())
                .reasoning("checking payload fidelity")
                .scope(|step| async move {
                    step.set_output(sent.clone());
                    step.set_filters(sent_filters);
                    step.add_evaluation(sent);
                    Ok::<_, anyhow::Error>(())
                })
                .await?;
            Ok::<_, anyhow::Error>(id)
        })
        .await
        .unwrap();

    let detail = store.get_run(run_id).await.unwrap().unwrap();
    assert_eq!(detail.run.metadata, payload);
    let step = &detail.steps[0];
    assert_eq!(step.input, payload);
    assert_eq!(step.output, Some(payload.clone()));
    assert_eq!(step.filters_applied, Some(filters));
    assert_eq!(step.evaluations.as_ref().unwrap()[0], payload);
    assert_eq!(step.reasoning.as_deref(), Some("checking payload fidelity"));
}

#[tokio::test]
async fn list_runs_returns_newest_first_up_to_limit() {
    let (tracer, store) = tracer();

    for name in ["one", "two", "three"] {
        tracer
            .run(name)
            .scope(|_run| async move { Ok::<_, anyhow::Error>(()) })
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    }

    let runs = store.list_runs(2).await.unwrap();
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0].name, "three");
    assert_eq!(runs[1].name, "two");
}

#[tokio::test]
async fn get_run_on_unknown_id_is_none_not_error() {
    let (_, store) = tracer();
    let missing = store.get_run(glassbox::RunId::new()).await.unwrap();
    assert!(missing.is_none());
}

#[tokio::test]
async fn setters_after_scope_close_do_not_touch_persisted_state() {
    let (tracer, store) = tracer();

    let mut escaped: Option<StepHandle> = None;
    let run_id = tracer
        .run("escape")
        .scope(|mut run| {
            let escaped = &mut escaped;
            async move {
                let id = run.id();
                run.step("s")
                    .scope(|step| {
                        *escaped = Some(step.clone());
                        async move {
                            step.set_output(json!({"final": true}));
                            Ok::<_, anyhow::Error>(())
                        }
                    })
                    .await?;
                Ok::<_, anyhow::Error>(id)
            }
        })
        .await
        .unwrap();

    let stale = escaped.unwrap();
    stale.set_output(json!({"final": false}));
    stale.add_evaluation(json!({"late": true}));

    let detail = store.get_run(run_id).await.unwrap().unwrap();
    assert_eq!(detail.steps[0].output, Some(json!({"final": true})));
    assert_eq!(detail.steps[0].evaluations, None);
}

#[tokio::test]
async fn strict_finish_against_missing_rows_is_not_found() {
    let store = MemoryStore::new();

    let err = store
        .finish_run(
            glassbox::RunId::new(),
            chrono::Utc::now(),
            0,
            &glassbox::Outcome::Success,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));

    let err = store
        .finish_step(
            glassbox::StepId::new(),
            chrono::Utc::now(),
            0,
            &glassbox::Outcome::Success,
            None,
            None,
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}

#[tokio::test]
async fn duplicate_run_id_is_a_storage_error() {
    let store = MemoryStore::new();
    let id = glassbox::RunId::new();

    store.create_run(id, "first", &json!({})).await.unwrap();
    let err = store.create_run(id, "second", &json!({})).await.unwrap_err();
    assert!(matches!(err, StoreError::Storage(_)));
}

/// Delegates everything to MemoryStore but fails every finalize call.
struct BrokenFinishStore(MemoryStore);

#[async_trait::async_trait]
impl Store for BrokenFinishStore {
    async fn create_run(
        &self,
        id: glassbox::RunId,
        name: &str,
        metadata: &serde_json::Value,
    ) -> Result<(), StoreError> {
        self.0.create_run(id, name, metadata).await
    }

    async fn finish_run(
        &self,
        _id: glassbox::RunId,
        _ended_at: chrono::DateTime<chrono::Utc>,
        _duration_ms: i64,
        _outcome: &glassbox::Outcome,
    ) -> Result<(), StoreError> {
        Err(StoreError::Storage("disk full".to_string()))
    }

    async fn create_step(
        &self,
        id: glassbox::StepId,
        run_id: glassbox::RunId,
        name: &str,
        index: u32,
        input: &serde_json::Value,
        reasoning: Option<&str>,
    ) -> Result<(), StoreError> {
        self.0.create_step(id, run_id, name, index, input, reasoning).await
    }

    async fn finish_step(
        &self,
        _id: glassbox::StepId,
        _ended_at: chrono::DateTime<chrono::Utc>,
        _duration_ms: i64,
        _outcome: &glassbox::Outcome,
        _output: Option<&serde_json::Value>,
        _filters_applied: Option<&serde_json::Value>,
        _evaluations: Option<&[serde_json::Value]>,
    ) -> Result<(), StoreError> {
        Err(StoreError::Storage("disk full".to_string()))
    }

    async fn list_runs(&self, limit: u32) -> Result<Vec<glassbox::RunRecord>, StoreError> {
        self.0.list_runs(limit).await
    }

    async fn get_run(
        &self,
        id: glassbox::RunId,
    ) -> Result<Option<glassbox::RunDetail>, StoreError> {
        self.0.get_run(id).await
    }
}

#[tokio::test]
async fn finalize_failure_takes_precedence_over_body_failure() {
    let tracer = Tracer::new(Arc::new(BrokenFinishStore(MemoryStore::new())));

    let result: Result<(), anyhow::Error> = tracer
        .run("cursed")
        .scope(|_run| async move { Err(anyhow!("body failure")) })
        .await;

    // The storage error from finish_run masks the body's own failure.
    assert!(result.unwrap_err().to_string().contains("disk full"));
}

#[tokio::test]
async fn global_registry_is_opt_in() {
    assert!(glassbox::global().is_none());

    let (tracer, _) = tracer();
    glassbox::set_global(tracer);
    let shared = glassbox::global().expect("registry should hold the tracer");

    shared
        .run("via_global")
        .scope(|_run| async move { Ok::<_, anyhow::Error>(()) })
        .await
        .unwrap();
}
