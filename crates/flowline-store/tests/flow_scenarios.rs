//! End-to-end scenarios in sync (inline-step) mode.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use flowline_core::store::{RUN_CONTEXT_PREFIX, Store, record_prefix};
use flowline_core::{FlowEngine, NodeHandler, bool_fn, node_fn};
use flowline_store::MemStore;
use flowline_types::data::Data;
use flowline_types::error::{FlowError, StepError, StoreError};
use flowline_types::flow::{RerunContext, RunStatus};
use flowline_types::options::FlowOptions;

fn sync_options() -> FlowOptions {
    FlowOptions::new()
        .disable_auto_start()
        .disable_task_run_async()
        .enable_mem_store()
}

fn counting(counter: &Arc<AtomicUsize>) -> NodeHandler {
    let counter = Arc::clone(counter);
    node_fn(move |_cx, data| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(data)
        }
    })
}

fn params() -> Data {
    let mut data = Data::new();
    data.set("test_param1", "show me the money");
    data.set("test_param2", "black sheep wall");
    data
}

/// node1 -> node2 -> node3, with the data-bag assertions of a real pipeline:
/// node1 stamps a key, node2 reads it back.
fn register_linear(
    engine: &FlowEngine<MemStore>,
    name: &str,
    counters: [&Arc<AtomicUsize>; 3],
) {
    let [c1, c2, c3] = counters.map(Arc::clone);
    engine
        .register_dag(name, |dag| {
            dag.node(
                "node1",
                node_fn(move |cx, mut data| {
                    let c1 = Arc::clone(&c1);
                    async move {
                        assert!(!cx.request_id().is_empty());
                        assert_eq!(
                            data.get_string("test_param1").as_deref(),
                            Some("show me the money")
                        );
                        c1.fetch_add(1, Ordering::SeqCst);
                        data.set("node1", "food for thought");
                        Ok(data)
                    }
                }),
            )?;
            dag.node(
                "node2",
                node_fn(move |_cx, data| {
                    let c2 = Arc::clone(&c2);
                    async move {
                        assert_eq!(data.get_string("node1").as_deref(), Some("food for thought"));
                        c2.fetch_add(1, Ordering::SeqCst);
                        Ok(data)
                    }
                }),
            )?;
            dag.node("node3", counting(&c3))?;
            dag.edge("node1", "node2")?;
            dag.edge("node2", "node3")
        })
        .unwrap();
}

fn new_counters() -> [Arc<AtomicUsize>; 3] {
    [
        Arc::new(AtomicUsize::new(0)),
        Arc::new(AtomicUsize::new(0)),
        Arc::new(AtomicUsize::new(0)),
    ]
}

fn loads(counters: &[Arc<AtomicUsize>; 3]) -> [usize; 3] {
    [
        counters[0].load(Ordering::SeqCst),
        counters[1].load(Ordering::SeqCst),
        counters[2].load(Ordering::SeqCst),
    ]
}

// ---------------------------------------------------------------------------
// Linear DAG
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_linear_dag_one_vertex_per_tick() {
    let store = MemStore::new();
    let engine = FlowEngine::new(store.clone(), sync_options());
    let counters = new_counters();
    register_linear(&engine, "test", [&counters[0], &counters[1], &counters[2]]);

    engine.run_dag("test", "test-request-id", params()).await.unwrap();

    engine.run_once().await.unwrap();
    assert_eq!(loads(&counters), [1, 0, 0]);
    let status = engine.get_request_status("test-request-id").unwrap();
    assert_eq!(status.status, RunStatus::Running);
    assert_eq!(
        status.last_record.unwrap().vertex.dotted(),
        "test.node1"
    );

    engine.run_once().await.unwrap();
    assert_eq!(loads(&counters), [1, 1, 0]);

    engine.run_once().await.unwrap();
    assert_eq!(loads(&counters), [1, 1, 1]);
    let status = engine.get_request_status("test-request-id").unwrap();
    assert_eq!(status.status, RunStatus::Finished);

    // The rerun context clears on successful completion.
    assert!(
        store
            .get(RUN_CONTEXT_PREFIX, "test-request-id")
            .await
            .unwrap()
            .is_none()
    );

    // A fourth tick changes nothing and sweeps the finished runner out.
    engine.run_once().await.unwrap();
    assert_eq!(loads(&counters), [1, 1, 1]);
    assert!(matches!(
        engine.get_request_status("test-request-id"),
        Err(FlowError::NotFound(_))
    ));

    engine.close().await.unwrap();
}

// ---------------------------------------------------------------------------
// Conditional branching
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_conditional_branching_both_ways() {
    let engine = FlowEngine::new(MemStore::new(), sync_options());
    let counters = new_counters();
    let cond_trigger = Arc::new(AtomicUsize::new(0));
    let flag = Arc::new(AtomicBool::new(false));

    {
        let [c1, c2, c3] = counters.each_ref().map(Arc::clone);
        let cond_trigger = Arc::clone(&cond_trigger);
        let flag = Arc::clone(&flag);
        engine
            .register_dag("test", move |dag| {
                dag.node("node1", counting(&c1))?;
                dag.node("node2", counting(&c2))?;
                dag.node("node3", counting(&c3))?;

                let branch = move |cond: &Arc<AtomicUsize>, flag: &Arc<AtomicBool>| {
                    let cond = Arc::clone(cond);
                    let flag = Arc::clone(flag);
                    bool_fn(move |_cx, _data| {
                        let cond = Arc::clone(&cond);
                        let flag = Arc::clone(&flag);
                        async move {
                            cond.fetch_add(1, Ordering::SeqCst);
                            Ok(flag.load(Ordering::SeqCst))
                        }
                    })
                };
                dag.condition("cond1", "node2", "node3", branch(&cond_trigger, &flag))?;
                dag.condition("cond2", "node2", "node3", branch(&cond_trigger, &flag))?;

                // Conditions can not be edge sources.
                assert!(matches!(
                    dag.edge("cond1", "node1"),
                    Err(FlowError::BadRequest(_))
                ));

                dag.edge("node1", "cond1")?;
                dag.edge("node3", "cond2")
            })
            .unwrap();
    }

    engine.run_dag("test", "testcond-request-id", params()).await.unwrap();

    // node1, then cond1 takes the false branch to node3.
    engine.run_once().await.unwrap();
    engine.run_once().await.unwrap();
    assert_eq!(cond_trigger.load(Ordering::SeqCst), 1);
    engine.run_once().await.unwrap();
    assert_eq!(loads(&counters), [1, 0, 1]);

    // Redirect: cond2 now takes the true branch to node2.
    flag.store(true, Ordering::SeqCst);
    engine.run_once().await.unwrap();
    assert_eq!(cond_trigger.load(Ordering::SeqCst), 2);
    engine.run_once().await.unwrap();
    assert_eq!(loads(&counters), [1, 1, 1]);

    engine.run_once().await.unwrap();
    let status = engine.get_request_status("testcond-request-id");
    assert!(
        matches!(status, Err(FlowError::NotFound(_)))
            || status.unwrap().status == RunStatus::Finished
    );
}

// ---------------------------------------------------------------------------
// Retry with backoff
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_retry_then_success() {
    let store = MemStore::new();
    let engine = FlowEngine::new(store.clone(), sync_options());
    let attempts = Arc::new(AtomicUsize::new(0));

    {
        let attempts = Arc::clone(&attempts);
        engine
            .register_dag("test", move |dag| {
                let attempts = Arc::clone(&attempts);
                dag.node(
                    "retry",
                    node_fn(move |_cx, data| {
                        let attempts = Arc::clone(&attempts);
                        async move {
                            if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                                Err(StepError::retry("try again", Duration::from_millis(90)))
                            } else {
                                Ok(data)
                            }
                        }
                    }),
                )
            })
            .unwrap();
    }

    let started = Instant::now();
    engine.run_dag("test", "retry-request", Data::new()).await.unwrap();

    engine.run_once().await.unwrap();
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    let status = engine.get_request_status("retry-request").unwrap();
    assert_eq!(status.status, RunStatus::Retrying);
    assert!(status.last_error.unwrap().contains("try again"));

    // Backoff has not elapsed: the runner is parked.
    engine.run_once().await.unwrap();
    assert_eq!(attempts.load(Ordering::SeqCst), 1);

    while engine.get_request_status("retry-request").unwrap().status != RunStatus::Finished {
        tokio::time::sleep(Duration::from_millis(20)).await;
        engine.run_once().await.unwrap();
    }

    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert!(started.elapsed() >= Duration::from_millis(180));

    // Retries overwrite the trace record of the vertex, so one record exists.
    let keys = store.list_keys(&record_prefix("retry-request")).await.unwrap();
    assert_eq!(keys, vec!["test.retry".to_string()]);
}

// ---------------------------------------------------------------------------
// Fatal and failed outcomes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_fatal_keeps_runner_resident() {
    let engine = FlowEngine::new(MemStore::new(), sync_options());
    let normal = Arc::new(AtomicUsize::new(0));

    {
        let normal = Arc::clone(&normal);
        engine
            .register_dag("test", move |dag| {
                dag.node("a", counting(&normal))?;
                dag.node(
                    "b",
                    node_fn(|_cx, _data| async move {
                        Err(StepError::fatal("disk on fire"))
                    }),
                )?;
                dag.edge("a", "b")
            })
            .unwrap();
    }

    engine.run_dag("test", "fatal-request", Data::new()).await.unwrap();
    engine.run_once().await.unwrap();
    engine.run_once().await.unwrap();

    let status = engine.get_request_status("fatal-request").unwrap();
    assert_eq!(status.status, RunStatus::Fatal);
    assert!(status.last_error.unwrap().contains("disk on fire"));

    // Fatal runners are not swept; the request stays inspectable.
    engine.run_once().await.unwrap();
    engine.run_once().await.unwrap();
    assert_eq!(
        engine.get_request_status("fatal-request").unwrap().status,
        RunStatus::Fatal
    );
}

#[tokio::test]
async fn test_plain_error_fails_and_sweeps() {
    let engine = FlowEngine::new(MemStore::new(), sync_options());
    engine
        .register_dag("test", |dag| {
            dag.node(
                "a",
                node_fn(|_cx, _data| async move { Err(StepError::failed("nope")) }),
            )
        })
        .unwrap();

    engine.run_dag("test", "failed-request", Data::new()).await.unwrap();
    engine.run_once().await.unwrap();
    assert_eq!(
        engine.get_request_status("failed-request").unwrap().status,
        RunStatus::Failed
    );

    // Failed runners are removable.
    engine.run_once().await.unwrap();
    assert!(matches!(
        engine.get_request_status("failed-request"),
        Err(FlowError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_panic_becomes_fatal() {
    let engine = FlowEngine::new(MemStore::new(), sync_options());
    engine
        .register_dag("test", |dag| {
            dag.node(
                "boom",
                node_fn(|_cx, _data| async move { panic!("handler exploded") }),
            )
        })
        .unwrap();

    engine.run_dag("test", "panic-request", Data::new()).await.unwrap();
    engine.run_once().await.unwrap();

    let status = engine.get_request_status("panic-request").unwrap();
    assert_eq!(status.status, RunStatus::Fatal);
    let message = status.last_error.unwrap();
    assert!(message.contains("panic on test.boom"), "got: {message}");
    assert!(message.contains("handler exploded"), "got: {message}");
}

// ---------------------------------------------------------------------------
// Crash recovery
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_crash_recovery_resumes_where_it_left_off() {
    let store = MemStore::new();

    let counters = new_counters();
    {
        let engine = FlowEngine::new(store.clone(), sync_options());
        register_linear(&engine, "test", [&counters[0], &counters[1], &counters[2]]);
        engine.run_dag("test", "test-request-id", params()).await.unwrap();
        engine.run_once().await.unwrap();
        assert_eq!(loads(&counters), [1, 0, 0]);
        // Engine dropped without close: the crash.
    }

    let engine = FlowEngine::new(store.clone(), sync_options());
    let fresh = new_counters();
    register_linear(&engine, "test", [&fresh[0], &fresh[1], &fresh[2]]);

    let results = engine.reload_requests().await.unwrap();
    assert_eq!(results.len(), 1);
    assert!(results.get("test-request-id").unwrap().is_ok());

    // Reloading a resident request reports AlreadyExists.
    let again = engine.reload_requests().await.unwrap();
    assert!(matches!(
        again.get("test-request-id").unwrap(),
        Err(FlowError::AlreadyExists(_))
    ));

    engine.run_once().await.unwrap();
    assert_eq!(loads(&fresh), [0, 1, 0]);
    engine.run_once().await.unwrap();
    assert_eq!(loads(&fresh), [0, 1, 1]);
    engine.run_once().await.unwrap();
    assert_eq!(loads(&fresh), [0, 1, 1]);
    assert_eq!(loads(&counters), [1, 0, 0]);
}

#[tokio::test]
async fn test_reload_restores_paused_status() {
    let store = MemStore::new();

    {
        let engine = FlowEngine::new(store.clone(), sync_options());
        let counters = new_counters();
        register_linear(&engine, "test", [&counters[0], &counters[1], &counters[2]]);
        engine.run_dag("test", "paused-request", params()).await.unwrap();
        engine.run_once().await.unwrap();
        engine.pause_request("paused-request").unwrap();
        // Persist the pause the way a clean shutdown would.
        engine.close().await.unwrap();
    }

    let engine = FlowEngine::new(store.clone(), sync_options());
    let fresh = new_counters();
    register_linear(&engine, "test", [&fresh[0], &fresh[1], &fresh[2]]);
    engine.reload_requests().await.unwrap();

    assert_eq!(
        engine.get_request_status("paused-request").unwrap().status,
        RunStatus::Paused
    );

    // Paused runners never advance.
    engine.run_once().await.unwrap();
    assert_eq!(loads(&fresh), [0, 0, 0]);

    engine.resume_request("paused-request").unwrap();
    for _ in 0..3 {
        engine.run_once().await.unwrap();
    }
    assert_eq!(loads(&fresh), [0, 1, 1]);
    assert!(
        store
            .get(RUN_CONTEXT_PREFIX, "paused-request")
            .await
            .unwrap()
            .is_none()
    );
}

// ---------------------------------------------------------------------------
// Sub-DAG composition
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_sub_dag_paths_and_order() {
    let store = MemStore::new();
    let engine = FlowEngine::new(store.clone(), sync_options());

    let inner = new_counters();
    register_linear(&engine, "inner", [&inner[0], &inner[1], &inner[2]]);

    let outer_counter = Arc::new(AtomicUsize::new(0));
    {
        let outer_counter = Arc::clone(&outer_counter);
        engine
            .register_dag("outer", move |dag| {
                let outer_counter = Arc::clone(&outer_counter);
                dag.node(
                    "x",
                    node_fn(move |cx, mut data| {
                        let outer_counter = Arc::clone(&outer_counter);
                        async move {
                            assert_eq!(cx.current_vertex(), "outer.x");
                            outer_counter.fetch_add(1, Ordering::SeqCst);
                            data.set("node1", "food for thought");
                            Ok(data)
                        }
                    }),
                )?;
                dag.sub_dag("sub", "inner")?;
                dag.edge("x", "sub")
            })
            .unwrap();
    }

    engine.run_dag("outer", "subdag-request", params()).await.unwrap();

    engine.run_once().await.unwrap();
    assert_eq!(outer_counter.load(Ordering::SeqCst), 1);
    assert_eq!(loads(&inner), [0, 0, 0]);

    engine.run_once().await.unwrap();
    assert_eq!(loads(&inner), [1, 0, 0]);
    engine.run_once().await.unwrap();
    assert_eq!(loads(&inner), [1, 1, 0]);
    engine.run_once().await.unwrap();
    assert_eq!(loads(&inner), [1, 1, 1]);
    assert_eq!(
        engine.get_request_status("subdag-request").unwrap().status,
        RunStatus::Finished
    );

    engine.run_once().await.unwrap();
    assert_eq!(loads(&inner), [1, 1, 1]);

    // Trace records are keyed by the full dotted path through the sub-DAG.
    let mut keys = store.list_keys(&record_prefix("subdag-request")).await.unwrap();
    keys.sort();
    assert_eq!(
        keys,
        vec![
            "outer.sub.inner.node1".to_string(),
            "outer.sub.inner.node2".to_string(),
            "outer.sub.inner.node3".to_string(),
            "outer.x".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_crash_recovery_inside_sub_dag() {
    let store = MemStore::new();

    {
        let engine = FlowEngine::new(store.clone(), sync_options());
        let inner = new_counters();
        register_linear(&engine, "inner", [&inner[0], &inner[1], &inner[2]]);
        engine
            .register_dag("outer", |dag| {
                dag.node(
                    "x",
                    node_fn(|_cx, mut data| async move {
                        data.set("node1", "food for thought");
                        Ok(data)
                    }),
                )?;
                dag.sub_dag("sub", "inner")?;
                dag.edge("x", "sub")
            })
            .unwrap();
        engine.run_dag("outer", "deep-request", params()).await.unwrap();
        // x and inner.node1 run, then the process dies.
        engine.run_once().await.unwrap();
        engine.run_once().await.unwrap();
        assert_eq!(loads(&inner), [1, 0, 0]);
    }

    // The persisted entrypoint points into the sub-DAG.
    let bytes = store
        .get(RUN_CONTEXT_PREFIX, "deep-request")
        .await
        .unwrap()
        .unwrap();
    let rerun: RerunContext = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(rerun.entrypoint.dotted(), "outer.sub.inner.node2");

    let engine = FlowEngine::new(store.clone(), sync_options());
    let inner = new_counters();
    register_linear(&engine, "inner", [&inner[0], &inner[1], &inner[2]]);
    engine
        .register_dag("outer", |dag| {
            dag.node("x", node_fn(|_cx, data| async move { Ok(data) }))?;
            dag.sub_dag("sub", "inner")?;
            dag.edge("x", "sub")
        })
        .unwrap();

    let results = engine.reload_requests().await.unwrap();
    assert!(results.get("deep-request").unwrap().is_ok());

    engine.run_once().await.unwrap();
    engine.run_once().await.unwrap();
    assert_eq!(loads(&inner), [0, 1, 1]);
    assert_eq!(
        engine.get_request_status("deep-request").unwrap().status,
        RunStatus::Finished
    );
    engine.run_once().await.unwrap();
    assert_eq!(loads(&inner), [0, 1, 1]);
}

// ---------------------------------------------------------------------------
// Pause / resume / terminate
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_pause_and_resume() {
    let engine = FlowEngine::new(MemStore::new(), sync_options());
    let counters = new_counters();
    register_linear(&engine, "test", [&counters[0], &counters[1], &counters[2]]);

    engine.run_dag("test", "pause-request", params()).await.unwrap();
    engine.run_once().await.unwrap();
    assert_eq!(loads(&counters), [1, 0, 0]);

    engine.pause_request("pause-request").unwrap();
    assert_eq!(
        engine.get_request_status("pause-request").unwrap().status,
        RunStatus::Paused
    );

    // Ticks are no-ops while paused.
    engine.run_once().await.unwrap();
    engine.run_once().await.unwrap();
    assert_eq!(loads(&counters), [1, 0, 0]);

    engine.resume_request("pause-request").unwrap();
    assert_eq!(
        engine.get_request_status("pause-request").unwrap().status,
        RunStatus::Retrying
    );

    engine.run_once().await.unwrap();
    engine.run_once().await.unwrap();
    assert_eq!(loads(&counters), [1, 1, 1]);
    assert_eq!(
        engine.get_request_status("pause-request").unwrap().status,
        RunStatus::Finished
    );
}

#[tokio::test]
async fn test_terminate_goes_fatal() {
    let engine = FlowEngine::new(MemStore::new(), sync_options());
    let counters = new_counters();
    register_linear(&engine, "test", [&counters[0], &counters[1], &counters[2]]);

    engine.run_dag("test", "kill-request", params()).await.unwrap();
    engine.run_once().await.unwrap();

    engine.terminate_request("kill-request").unwrap();
    assert_eq!(
        engine.get_request_status("kill-request").unwrap().status,
        RunStatus::Fatal
    );

    engine.run_once().await.unwrap();
    assert_eq!(loads(&counters), [1, 0, 0]);

    // Resuming a terminated request is not an allowed transition.
    assert!(matches!(
        engine.resume_request("kill-request"),
        Err(FlowError::Forbidden(_))
    ));
}

// ---------------------------------------------------------------------------
// Failing registrations and store failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_failed_registrations_leave_no_residue() {
    let engine = FlowEngine::new(MemStore::new(), sync_options());

    // Sub-DAG of an unregistered DAG.
    assert!(matches!(
        engine.register_dag("test", |dag| dag.sub_dag("subdag", "missing")),
        Err(FlowError::NotFound(_))
    ));
    // Edge between undeclared vertices.
    assert!(matches!(
        engine.register_dag("test", |dag| dag.edge("node1", "node2")),
        Err(FlowError::NotFound(_))
    ));
    // Condition with undeclared successors.
    assert!(matches!(
        engine.register_dag("test", |dag| dag.condition(
            "cond",
            "node1",
            "node2",
            bool_fn(|_cx, _data| async move { Ok(false) })
        )),
        Err(FlowError::NotFound(_))
    ));
    assert!(engine.list_dag_names().is_empty());

    // The same name registers cleanly afterwards.
    let counters = new_counters();
    register_linear(&engine, "test", [&counters[0], &counters[1], &counters[2]]);
    engine.run_dag("test", "after-failures", params()).await.unwrap();
    for _ in 0..3 {
        engine.run_once().await.unwrap();
    }
    assert_eq!(loads(&counters), [1, 1, 1]);
}

#[tokio::test]
async fn test_store_errors_surface_from_ticks() {
    let failing = Arc::new(AtomicBool::new(false));
    let store = {
        let failing = Arc::clone(&failing);
        MemStore::with_fault(Arc::new(move || {
            if failing.load(Ordering::SeqCst) {
                Err(StoreError::Backend("injected".to_string()))
            } else {
                Ok(())
            }
        }))
    };
    let engine = FlowEngine::new(store, sync_options());

    let trigger = Arc::new(AtomicUsize::new(0));
    {
        let trigger = Arc::clone(&trigger);
        engine
            .register_dag("test", move |dag| {
                for name in ["n1", "n2", "n3", "n4", "n5"] {
                    dag.node(name, counting(&trigger))?;
                }
                dag.edge("n1", "n2")?;
                dag.edge("n2", "n3")?;
                dag.edge("n3", "n4")?;
                dag.edge("n4", "n5")
            })
            .unwrap();
    }

    engine.run_dag("test", "faulty-request", Data::new()).await.unwrap();
    engine.run_once().await.unwrap();

    failing.store(true, Ordering::SeqCst);
    // Steps still execute; persisting the rerun context fails and surfaces.
    assert!(engine.run_once().await.is_err());
    assert!(engine.run_once().await.is_err());
    assert!(engine.run_once().await.is_err());

    failing.store(false, Ordering::SeqCst);
    engine.run_once().await.unwrap();
    assert_eq!(trigger.load(Ordering::SeqCst), 5);
    assert_eq!(
        engine.get_request_status("faulty-request").unwrap().status,
        RunStatus::Finished
    );
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_render_request_reflects_progress() {
    let engine = FlowEngine::new(MemStore::new(), sync_options());
    let counters = new_counters();
    register_linear(&engine, "test", [&counters[0], &counters[1], &counters[2]]);

    engine.run_dag("test", "render-request", params()).await.unwrap();
    engine.run_once().await.unwrap();

    let dot = engine.render_request_status("render-request").await.unwrap();
    assert!(dot.contains("digraph D {"));
    // node1 completed (green); the rest have no record yet.
    assert!(dot.contains(r#"color="green""#), "{dot}");
    assert!(dot.contains("test_node1 -> test_node2"), "{dot}");

    assert!(matches!(
        engine.render_request_status("unknown").await,
        Err(FlowError::NotFound(_))
    ));
}

// ---------------------------------------------------------------------------
// Store selection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_open_store_defaults_to_memory() {
    let options = FlowOptions::new().enable_mem_store();
    let store = flowline_store::open_store(&options).await.unwrap();
    store.set("/dag/", "x", b"1").await.unwrap();
    assert!(store.get("/dag/", "x").await.unwrap().is_some());
}
