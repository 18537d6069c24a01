//! Per-step flow context and the handler-facing view of it.
//!
//! A [`FlowContext`] is threaded through one step of one request. It tracks
//! the dotted execution path as the step descends through sub-DAGs, and
//! accumulates the trace record that is flushed to the store when the step
//! ends. Handlers never see it directly; they get a [`StepContext`] snapshot.

use std::sync::Arc;

use chrono::Utc;
use flowline_types::data::Data;
use flowline_types::error::StepError;
use flowline_types::flow::TraceRecord;
use flowline_types::path::Path;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::store::{Store, record_prefix};

/// Sub-DAG nesting is bounded; exceeding this is a programmer error.
pub const MAX_DEPTH: usize = 32;

// ---------------------------------------------------------------------------
// Handler types
// ---------------------------------------------------------------------------

/// A work unit: consumes the current data bag, produces the next one.
pub type NodeHandler =
    Arc<dyn Fn(StepContext, Data) -> BoxFuture<'static, Result<Data, StepError>> + Send + Sync>;

/// A branching decision: selects the true or false successor.
pub type BooleanHandler =
    Arc<dyn Fn(StepContext, Data) -> BoxFuture<'static, Result<bool, StepError>> + Send + Sync>;

/// Wrap a plain async closure as a [`NodeHandler`].
pub fn node_fn<F, Fut>(f: F) -> NodeHandler
where
    F: Fn(StepContext, Data) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Data, StepError>> + Send + 'static,
{
    Arc::new(move |cx, data| f(cx, data).boxed())
}

/// Wrap a plain async closure as a [`BooleanHandler`].
pub fn bool_fn<F, Fut>(f: F) -> BooleanHandler
where
    F: Fn(StepContext, Data) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<bool, StepError>> + Send + 'static,
{
    Arc::new(move |cx, data| f(cx, data).boxed())
}

// ---------------------------------------------------------------------------
// StepContext
// ---------------------------------------------------------------------------

/// What a handler sees of its surroundings: the request id, its own dotted
/// vertex address, and the engine's cancellation signal.
///
/// Cancellation is cooperative -- the engine never aborts a handler, it
/// signals the token and waits.
#[derive(Clone)]
pub struct StepContext {
    request_id: String,
    vertex: String,
    cancel: CancellationToken,
}

impl StepContext {
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn current_vertex(&self) -> &str {
        &self.vertex
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

// ---------------------------------------------------------------------------
// FlowContext
// ---------------------------------------------------------------------------

/// Step-scoped bookkeeping for one request.
pub(crate) struct FlowContext<S> {
    store: Arc<S>,
    request_id: String,
    cancel: CancellationToken,

    depth: usize,
    execute_path: Path,
    record: Option<TraceRecord>,
}

impl<S: Store> FlowContext<S> {
    pub fn new(store: Arc<S>, request_id: String, cancel: CancellationToken) -> Self {
        Self {
            store,
            request_id,
            cancel,
            depth: 0,
            execute_path: Path::new(),
            record: None,
        }
    }

    pub fn current_vertex(&self) -> String {
        self.execute_path.dotted()
    }

    /// Snapshot for the handler about to run at the current path.
    pub fn step_context(&self) -> StepContext {
        StepContext {
            request_id: self.request_id.clone(),
            vertex: self.current_vertex(),
            cancel: self.cancel.child_token(),
        }
    }

    /// Descend one level (a DAG scope or the leaf vertex).
    ///
    /// The path is appended but never popped within a step: exactly one leaf
    /// runs per step, so at step end the path spells the leaf's full address.
    pub fn enter(&mut self, name: &str) {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            panic!("DAG nesting exceeds {MAX_DEPTH} levels at {}", self.execute_path);
        }
        self.execute_path.push(name);
    }

    pub fn exit(&mut self) {
        self.depth -= 1;
    }

    /// Begin the trace record for one step.
    pub fn start_record(&mut self, path: Path, input: Data) {
        tracing::debug!(request_id = %self.request_id, path = %path, "running vertex");

        self.execute_path = Path::new();
        self.depth = 0;
        self.record = Some(TraceRecord {
            path,
            vertex: Path::new(),
            start_time: Utc::now(),
            end_time: None,
            error: None,
            input,
            output: None,
        });
    }

    /// Close the trace record and flush it to the store.
    ///
    /// The record is keyed by the dotted path actually walked, so a retry of
    /// the same vertex overwrites the previous attempt. Store failures here
    /// are logged, not propagated -- the rerun context is the durable unit.
    pub async fn end_record(&mut self, output: Option<Data>, error: Option<&StepError>) {
        let Some(record) = self.record.as_mut() else {
            return;
        };
        record.vertex = self.execute_path.clone();
        record.end_time = Some(Utc::now());
        record.error = error.map(ToString::to_string);
        record.output = output;

        let key = record.vertex.dotted();
        let bytes = match serde_json::to_vec(record) {
            Ok(bytes) => bytes,
            Err(error) => {
                tracing::error!(request_id = %self.request_id, %error, "serialize trace record failed");
                return;
            }
        };
        if let Err(error) = self
            .store
            .set(&record_prefix(&self.request_id), &key, &bytes)
            .await
        {
            tracing::error!(request_id = %self.request_id, %key, %error, "save trace record failed");
        }
    }

    pub fn last_record(&self) -> Option<&TraceRecord> {
        self.record.as_ref()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
