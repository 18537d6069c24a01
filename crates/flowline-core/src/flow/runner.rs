//! The per-request state machine.
//!
//! A [`ContextRunner`] owns one request between ticks: its status, the
//! compiled runtime graph, the current data bag, and backoff bookkeeping.
//! Each step executes one vertex, classifies the outcome, applies any pending
//! external transition, and persists the rerun context. The step lock is only
//! ever `try_lock`ed by the scheduler, so a runner mid-step is simply skipped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use flowline_types::data::Data;
use flowline_types::error::{FlowError, StepError};
use flowline_types::flow::{RequestStatus, RerunContext, RunStatus, TraceRecord};
use tokio::sync::Semaphore;
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;
use tokio_util::sync::CancellationToken;

use crate::dag::runtime::{NextRc, RcId, RuntimeGraph, run_rc};
use crate::flow::context::FlowContext;
use crate::store::{RUN_CONTEXT_PREFIX, Store};

// ---------------------------------------------------------------------------
// Transition rules
// ---------------------------------------------------------------------------

/// External transitions: pause/resume may interrupt live states, terminate
/// (to Fatal) is allowed from anything but Finished. Everything else is the
/// state machine's own business.
fn can_transition(current: RunStatus, to: RunStatus) -> bool {
    match to {
        RunStatus::Paused | RunStatus::Retrying => matches!(
            current,
            RunStatus::Pending | RunStatus::Retrying | RunStatus::Paused | RunStatus::Running
        ),
        RunStatus::Fatal => current != RunStatus::Finished,
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Runner state
// ---------------------------------------------------------------------------

/// State touched only while holding the step lock.
struct StepState<S> {
    graph: RuntimeGraph,
    running: NextRc,
    data: Data,
    fc: FlowContext<S>,
}

/// Small control state, readable without blocking behind an in-flight step.
struct ControlState {
    status: RunStatus,
    next_status: Option<RunStatus>,
    last_error: Option<String>,
    last_record: Option<TraceRecord>,
    next_run: Option<Instant>,
    last_run: Option<Instant>,
}

impl ControlState {
    fn runnable(&self) -> bool {
        self.status.is_runnable() && self.next_run.is_none_or(|at| Instant::now() >= at)
    }

    fn apply_next_status(&mut self, request_id: &str) {
        if let Some(next) = self.next_status.take() {
            if can_transition(self.status, next) {
                self.status = next;
            } else {
                tracing::error!(
                    request_id,
                    from = ?self.status,
                    to = ?next,
                    "dropped pending status transition"
                );
            }
        }
    }
}

/// One request's runner.
pub(crate) struct ContextRunner<S> {
    request_id: String,
    store: Arc<S>,

    /// Serializes steps; acquired non-blockingly so a busy runner is skipped.
    step: tokio::sync::Mutex<StepState<S>>,
    /// Guarded separately so pause/terminate never block behind a handler.
    control: Mutex<ControlState>,
    /// One-slot result channel for the async dispatch mode.
    slot: Mutex<Option<oneshot::Receiver<Result<(), FlowError>>>>,
    in_flight: AtomicBool,
}

impl<S: Store + 'static> ContextRunner<S> {
    pub fn new(
        store: Arc<S>,
        request_id: String,
        graph: RuntimeGraph,
        root: RcId,
        input: Data,
        cancel: CancellationToken,
        status: RunStatus,
    ) -> Self {
        let fc = FlowContext::new(Arc::clone(&store), request_id.clone(), cancel);
        Self {
            request_id,
            store,
            step: tokio::sync::Mutex::new(StepState {
                graph,
                running: NextRc::Id(root),
                data: input,
                fc,
            }),
            control: Mutex::new(ControlState {
                status,
                next_status: None,
                last_error: None,
                last_record: None,
                next_run: None,
                last_run: None,
            }),
            slot: Mutex::new(None),
            in_flight: AtomicBool::new(false),
        }
    }

    /// True when the scheduler may dispatch a step right now: the status is
    /// runnable, any backoff has elapsed, and no step is in flight.
    pub fn can_run(&self) -> bool {
        let Ok(_idle) = self.step.try_lock() else {
            return false;
        };
        if self.in_flight.load(Ordering::Acquire) {
            return false;
        }
        self.control.lock().expect("control lock").runnable()
    }

    /// Eligible for removal from the scheduler map.
    pub fn can_remove(&self) -> bool {
        let Ok(_idle) = self.step.try_lock() else {
            return false;
        };
        self.control
            .lock()
            .expect("control lock")
            .status
            .is_removable()
    }

    /// Execute one step inline. A no-op when the runner is busy or not
    /// runnable; store failures persisting the rerun context propagate.
    pub async fn run_once(&self) -> Result<(), FlowError> {
        let Ok(mut step) = self.step.try_lock() else {
            return Ok(());
        };
        {
            let mut control = self.control.lock().expect("control lock");
            if !control.runnable() {
                return Ok(());
            }
            control.status = RunStatus::Running;
            control.last_run = Some(Instant::now());
        }

        let state = &mut *step;
        let NextRc::Id(current) = state.running else {
            return Ok(());
        };

        state
            .fc
            .start_record(state.graph.path_of(current), state.data.clone());
        let result = run_rc(&mut state.graph, current, &mut state.fc, state.data.clone()).await;
        let (output, error) = match &result {
            Ok((_, data)) => (Some(data.clone()), None),
            Err(err) => (None, Some(err)),
        };
        state.fc.end_record(output, error).await;

        let status = {
            let mut control = self.control.lock().expect("control lock");
            match result {
                Ok((next, data)) => {
                    state.running = next;
                    state.data = data;
                    if matches!(next, NextRc::Termination) {
                        control.status = RunStatus::Finished;
                    }
                }
                Err(error) => {
                    control.last_error = Some(error.to_string());
                    match error {
                        StepError::Retry { backoff, .. } => {
                            control.status = RunStatus::Retrying;
                            control.next_run = Some(Instant::now() + backoff);
                        }
                        StepError::Fatal(_) => control.status = RunStatus::Fatal,
                        StepError::Pause(_) => control.status = RunStatus::Paused,
                        StepError::Failed(_) => control.status = RunStatus::Failed,
                    }
                }
            }
            control.apply_next_status(&self.request_id);
            control.last_record = state.fc.last_record().cloned();
            tracing::debug!(
                request_id = %self.request_id,
                status = ?control.status,
                step_ms = control.last_run.map(|at| at.elapsed().as_millis() as u64),
                "step complete"
            );
            control.status
        };

        self.persist(state, status).await
    }

    /// Dispatch one step to the worker pool, never blocking the caller.
    ///
    /// The first call submits the step and returns immediately. While the
    /// step is in flight subsequent calls are no-ops; once it completes the
    /// next call surfaces its result and clears the slot, making the runner
    /// eligible for a new submission.
    pub fn try_async_run_once(self: &Arc<Self>, pool: &Arc<Semaphore>) -> Result<(), FlowError> {
        let mut slot = self.slot.lock().expect("slot lock");
        if slot.is_none() {
            let (tx, rx) = oneshot::channel();
            *slot = Some(rx);
            self.in_flight.store(true, Ordering::Release);
            let runner = Arc::clone(self);
            let pool = Arc::clone(pool);
            tokio::spawn(async move {
                let Ok(_permit) = pool.acquire_owned().await else {
                    return;
                };
                let result = runner.run_once().await;
                runner.in_flight.store(false, Ordering::Release);
                let _ = tx.send(result);
            });
            return Ok(());
        }

        match slot.as_mut().expect("slot occupied").try_recv() {
            Ok(result) => {
                *slot = None;
                result
            }
            Err(TryRecvError::Empty) => Ok(()),
            Err(TryRecvError::Closed) => {
                *slot = None;
                Ok(())
            }
        }
    }

    /// Wait for any in-flight async step to finish (clean shutdown).
    pub async fn wait_in_flight(&self) {
        let receiver = self.slot.lock().expect("slot lock").take();
        if let Some(receiver) = receiver {
            let _ = receiver.await;
        }
    }

    /// Request an external transition (pause/resume/terminate).
    ///
    /// Applied immediately when the runner is idle; a runner mid-step picks
    /// the transition up when its current step completes.
    pub fn set_next_status(&self, status: RunStatus) -> Result<(), FlowError> {
        let mut control = self.control.lock().expect("control lock");
        if !can_transition(control.status, status) {
            return Err(FlowError::Forbidden(format!(
                "can not set status from {:?} to {:?}",
                control.status, status
            )));
        }
        match self.step.try_lock() {
            Ok(_idle) => control.status = status,
            Err(_busy) => control.next_status = Some(status),
        }
        Ok(())
    }

    /// Force a status and persist it, waiting for the step lock. Used by the
    /// scheduler's clean-shutdown sweep.
    pub async fn force_status(&self, status: RunStatus) -> Result<(), FlowError> {
        let step = self.step.lock().await;
        self.control.lock().expect("control lock").status = status;
        self.persist(&step, status).await
    }

    pub fn status_report(&self) -> RequestStatus {
        let control = self.control.lock().expect("control lock");
        RequestStatus {
            status: control.status,
            last_error: control.last_error.clone(),
            last_record: control.last_record.clone(),
        }
    }

    /// Write (or clear, once terminated successfully) the rerun context.
    async fn persist(&self, state: &StepState<S>, status: RunStatus) -> Result<(), FlowError> {
        match state.running {
            NextRc::Termination => {
                self.store
                    .remove(RUN_CONTEXT_PREFIX, &self.request_id)
                    .await?;
            }
            NextRc::Id(id) => {
                let rerun = RerunContext {
                    status,
                    entrypoint: state.graph.path_of(id),
                    data: state.data.clone(),
                };
                let bytes = serde_json::to_vec(&rerun)?;
                self.store
                    .set(RUN_CONTEXT_PREFIX, &self.request_id, &bytes)
                    .await?;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
