//! The top-level façade.
//!
//! A [`FlowEngine`] owns the registered plans, the process-wide vertex index,
//! and the batch scheduler. Callers register DAGs, launch requests against
//! them, and either let the internal driver loop tick the scheduler or call
//! [`FlowEngine::run_once`] themselves.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use flowline_types::data::Data;
use flowline_types::error::FlowError;
use flowline_types::flow::{RequestStatus, RerunContext, RunStatus, TraceRecord};
use flowline_types::options::FlowOptions;
use flowline_types::path::Path;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::dag::builder::{DagBuilder, DagRegistry, VertexIndex};
use crate::dag::plan::ExecutePlan;
use crate::dag::runtime::compile_runtime;
use crate::flow::batch::BatchRunner;
use crate::flow::render::render_plan;
use crate::flow::runner::ContextRunner;
use crate::store::{DAG_PLAN_PREFIX, RUN_CONTEXT_PREFIX, Store, record_prefix};

struct EngineInner<S: Store + 'static> {
    store: Arc<S>,
    max_run_amount: usize,
    cancel: CancellationToken,
    running: AtomicBool,
    batch: BatchRunner<S>,
    index: VertexIndex,
    registry: DagRegistry,
    driver: Mutex<Option<JoinHandle<()>>>,
}

/// The engine façade. Cheap to clone; all clones share one engine.
pub struct FlowEngine<S: Store + 'static> {
    inner: Arc<EngineInner<S>>,
}

impl<S: Store + 'static> Clone for FlowEngine<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: Store + 'static> FlowEngine<S> {
    /// Construct an engine over `store`.
    ///
    /// With `auto_start` enabled this spawns the driver loop, so it must be
    /// called within a tokio runtime.
    pub fn new(store: S, options: FlowOptions) -> Self {
        let engine = Self {
            inner: Arc::new(EngineInner {
                store: Arc::new(store),
                max_run_amount: options.max_node_concurrency,
                cancel: CancellationToken::new(),
                running: AtomicBool::new(true),
                batch: BatchRunner::new(options.max_node_concurrency, options.task_run_async),
                index: VertexIndex::new(),
                registry: DagRegistry::new(),
                driver: Mutex::new(None),
            }),
        };
        if options.auto_start {
            engine.spawn_driver();
        }
        engine
    }

    fn spawn_driver(&self) {
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            loop {
                if inner.cancel.is_cancelled() || !inner.running.load(Ordering::Acquire) {
                    break;
                }
                if let Err(error) = inner.batch.run_once(inner.max_run_amount).await {
                    tracing::warn!(%error, "driver tick failed");
                }
                if inner.batch.is_empty() {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                } else {
                    tokio::task::yield_now().await;
                }
            }
        });
        *self.inner.driver.lock().expect("driver lock") = Some(handle);
    }

    /// The root cancellation token propagated (as child tokens) into every
    /// handler invocation. Cancelled on [`FlowEngine::close`].
    pub fn cancel_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    // -----------------------------------------------------------------------
    // Registration and launch
    // -----------------------------------------------------------------------

    /// Register a DAG under `name` by running the caller's builder closure.
    pub fn register_dag<'e, F>(&'e self, name: &str, build: F) -> Result<(), FlowError>
    where
        F: FnOnce(&mut DagBuilder<'e>) -> Result<(), FlowError>,
    {
        if !self.inner.running.load(Ordering::Acquire) {
            return Err(FlowError::Closed);
        }
        let mut builder = DagBuilder::new(name, &self.inner.index, &self.inner.registry);
        build(&mut builder)?;
        self.inner.registry.insert(name, builder.into_plan());
        tracing::debug!(dag = name, "registered DAG");
        Ok(())
    }

    pub fn list_dag_names(&self) -> Vec<String> {
        self.inner.registry.names()
    }

    /// Launch one request execution of a registered DAG.
    ///
    /// Persists the compiled plan under the request id and adds a runner to
    /// the scheduler. If anything fails after the plan was persisted, the
    /// plan is removed again on a best-effort basis.
    pub async fn run_dag(
        &self,
        dag_name: &str,
        request_id: &str,
        params: Data,
    ) -> Result<(), FlowError> {
        if !self.inner.running.load(Ordering::Acquire) {
            return Err(FlowError::Closed);
        }
        let plan = self
            .inner
            .registry
            .get(dag_name)
            .ok_or_else(|| FlowError::NotFound(format!("DAG name: {dag_name}")))?;
        if self.inner.batch.exists(request_id) {
            return Err(FlowError::AlreadyExists(format!("request id: {request_id}")));
        }

        let launched = self
            .launch(&plan, request_id, params, Path::new(), RunStatus::Pending, true)
            .await;
        if let Err(error) = launched {
            if let Err(cleanup) = self.inner.store.remove(DAG_PLAN_PREFIX, request_id).await {
                tracing::error!(request_id, %cleanup, "failed to remove plan after launch error");
            }
            return Err(error);
        }

        tracing::info!(request_id, dag = dag_name, "launched request");
        Ok(())
    }

    async fn launch(
        &self,
        plan: &ExecutePlan,
        request_id: &str,
        params: Data,
        entrypoint: Path,
        status: RunStatus,
        persist_plan: bool,
    ) -> Result<(), FlowError> {
        let (graph, root) = compile_runtime(plan, &self.inner.index, &entrypoint)?;
        if persist_plan {
            let bytes = serde_json::to_vec(plan)?;
            self.inner
                .store
                .set(DAG_PLAN_PREFIX, request_id, &bytes)
                .await?;
        }
        let runner = Arc::new(ContextRunner::new(
            Arc::clone(&self.inner.store),
            request_id.to_string(),
            graph,
            root,
            params,
            self.inner.cancel.child_token(),
            status,
        ));
        self.inner.batch.add(request_id, runner)
    }

    // -----------------------------------------------------------------------
    // Driving
    // -----------------------------------------------------------------------

    /// One scheduler tick. Only needed when `auto_start` is disabled.
    pub async fn run_once(&self) -> Result<(), FlowError> {
        self.inner.batch.run_once(self.inner.max_run_amount).await
    }

    // -----------------------------------------------------------------------
    // Request lifecycle
    // -----------------------------------------------------------------------

    fn runner(&self, request_id: &str) -> Result<Arc<ContextRunner<S>>, FlowError> {
        self.inner
            .batch
            .get(request_id)
            .ok_or_else(|| FlowError::NotFound(format!("request id: {request_id}")))
    }

    pub fn pause_request(&self, request_id: &str) -> Result<(), FlowError> {
        self.runner(request_id)?.set_next_status(RunStatus::Paused)
    }

    pub fn resume_request(&self, request_id: &str) -> Result<(), FlowError> {
        self.runner(request_id)?.set_next_status(RunStatus::Retrying)
    }

    pub fn terminate_request(&self, request_id: &str) -> Result<(), FlowError> {
        self.runner(request_id)?.set_next_status(RunStatus::Fatal)
    }

    pub fn get_request_status(&self, request_id: &str) -> Result<RequestStatus, FlowError> {
        Ok(self.runner(request_id)?.status_report())
    }

    // -----------------------------------------------------------------------
    // Reload
    // -----------------------------------------------------------------------

    /// Reconstruct runners for every request with a persisted rerun context.
    ///
    /// Returns a per-request result map; requests already resident report
    /// `AlreadyExists`. Registered DAGs must match the ones the requests were
    /// launched against (the plans carry vertex names, the index carries the
    /// handlers).
    pub async fn reload_requests(
        &self,
    ) -> Result<HashMap<String, Result<(), FlowError>>, FlowError> {
        let request_ids = self.inner.store.list_keys(RUN_CONTEXT_PREFIX).await?;
        let mut results = HashMap::with_capacity(request_ids.len());
        for request_id in request_ids {
            let result = self.rerun_plan(&request_id).await;
            if let Err(error) = &result {
                tracing::warn!(%request_id, %error, "reload failed");
            }
            results.insert(request_id, result);
        }
        Ok(results)
    }

    async fn rerun_plan(&self, request_id: &str) -> Result<(), FlowError> {
        if self.inner.batch.exists(request_id) {
            return Err(FlowError::AlreadyExists(format!(
                "request already running: {request_id}"
            )));
        }

        let plan_bytes = self
            .inner
            .store
            .get(DAG_PLAN_PREFIX, request_id)
            .await?
            .ok_or_else(|| FlowError::NotFound(format!("DAG plan for request: {request_id}")))?;
        let plan: ExecutePlan = serde_json::from_slice(&plan_bytes)?;

        let rerun_bytes = self
            .inner
            .store
            .get(RUN_CONTEXT_PREFIX, request_id)
            .await?
            .ok_or_else(|| FlowError::NotFound(format!("rerun context: {request_id}")))?;
        let rerun: RerunContext = serde_json::from_slice(&rerun_bytes)?;

        self.launch(
            &plan,
            request_id,
            rerun.data,
            rerun.entrypoint,
            rerun.status,
            false,
        )
        .await
    }

    // -----------------------------------------------------------------------
    // Rendering
    // -----------------------------------------------------------------------

    /// DOT graph of a registered DAG.
    pub fn render_dag(&self, name: &str) -> Result<String, FlowError> {
        let plan = self
            .inner
            .registry
            .get(name)
            .ok_or_else(|| FlowError::NotFound(format!("DAG name: {name}")))?;
        Ok(render_plan(&plan, &BTreeMap::new()))
    }

    /// DOT graph of a request's persisted plan, colored by its trace records.
    pub async fn render_request_status(&self, request_id: &str) -> Result<String, FlowError> {
        let plan_bytes = self
            .inner
            .store
            .get(DAG_PLAN_PREFIX, request_id)
            .await?
            .ok_or_else(|| FlowError::NotFound(format!("DAG plan for request: {request_id}")))?;
        let plan: ExecutePlan = serde_json::from_slice(&plan_bytes)?;
        let records = self.load_records(request_id).await?;
        Ok(render_plan(&plan, &records))
    }

    async fn load_records(
        &self,
        request_id: &str,
    ) -> Result<BTreeMap<String, TraceRecord>, FlowError> {
        let prefix = record_prefix(request_id);
        let mut records = BTreeMap::new();
        for key in self.inner.store.list_keys(&prefix).await? {
            let bytes = match self.inner.store.get(&prefix, &key).await {
                Ok(Some(bytes)) => bytes,
                Ok(None) => continue,
                Err(error) => {
                    tracing::error!(request_id, %key, %error, "load trace record failed");
                    continue;
                }
            };
            match serde_json::from_slice::<TraceRecord>(&bytes) {
                Ok(record) => {
                    records.insert(key, record);
                }
                Err(error) => {
                    tracing::error!(request_id, %key, %error, "decode trace record failed");
                }
            }
        }
        Ok(records)
    }

    // -----------------------------------------------------------------------
    // Shutdown
    // -----------------------------------------------------------------------

    /// Close the engine: cancel the root context, stop the driver, wait for
    /// in-flight steps and park all resident requests as Paused.
    pub async fn close(&self) -> Result<(), FlowError> {
        if !self.inner.running.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        self.inner.cancel.cancel();
        let handle = self.inner.driver.lock().expect("driver lock").take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.inner.batch.stop_wait().await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
