//! The scheduler: advances many independent runners per tick.
//!
//! One tick sweeps out runners that reached a removable state, then walks the
//! runner map and dispatches up to `max_run_amount` eligible runners (inline,
//! or onto the worker pool in async mode). Fairness is best-effort; requests
//! are independent and carry no cross-request ordering.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use flowline_types::error::FlowError;
use flowline_types::flow::RunStatus;
use tokio::sync::Semaphore;

use crate::flow::runner::ContextRunner;
use crate::store::Store;

pub(crate) struct BatchRunner<S> {
    runners: DashMap<String, Arc<ContextRunner<S>>>,
    /// Bounds concurrently executing async steps.
    pool: Arc<Semaphore>,
    async_mode: bool,
}

impl<S: Store + 'static> BatchRunner<S> {
    pub fn new(concurrency: usize, async_mode: bool) -> Self {
        Self {
            runners: DashMap::new(),
            pool: Arc::new(Semaphore::new(concurrency.max(1))),
            async_mode,
        }
    }

    pub fn add(&self, request_id: &str, runner: Arc<ContextRunner<S>>) -> Result<(), FlowError> {
        match self.runners.entry(request_id.to_string()) {
            Entry::Occupied(_) => Err(FlowError::AlreadyExists(format!(
                "request id: {request_id}"
            ))),
            Entry::Vacant(slot) => {
                slot.insert(runner);
                Ok(())
            }
        }
    }

    pub fn exists(&self, request_id: &str) -> bool {
        self.runners.contains_key(request_id)
    }

    pub fn get(&self, request_id: &str) -> Option<Arc<ContextRunner<S>>> {
        self.runners.get(request_id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn is_empty(&self) -> bool {
        self.runners.is_empty()
    }

    /// One tick: sweep removable runners, then dispatch up to
    /// `max_run_amount` eligible ones. The first store error aborts the tick
    /// and surfaces to the caller; it does not tear the scheduler down.
    ///
    /// Sweeping first keeps a request's terminal status queryable until the
    /// tick after it was reached.
    pub async fn run_once(&self, max_run_amount: usize) -> Result<(), FlowError> {
        if self.runners.is_empty() {
            return Ok(());
        }

        self.runners.retain(|_, runner| !runner.can_remove());

        let mut selected = Vec::new();
        for entry in self.runners.iter() {
            if selected.len() >= max_run_amount {
                break;
            }
            if entry.value().can_run() {
                selected.push(Arc::clone(entry.value()));
            }
        }

        for runner in selected {
            if self.async_mode {
                runner.try_async_run_once(&self.pool)?;
            } else {
                runner.run_once().await?;
            }
        }
        Ok(())
    }

    /// Clean shutdown: wait for in-flight steps, then park every resident
    /// runner as Paused and persist it.
    pub async fn stop_wait(&self) -> Result<(), FlowError> {
        let runners: Vec<_> = self
            .runners
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();

        for (_, runner) in &runners {
            runner.wait_in_flight().await;
        }

        let mut first_err = Ok(());
        for (request_id, runner) in &runners {
            if let Err(error) = runner.force_status(RunStatus::Paused).await {
                tracing::error!(%request_id, %error, "failed to park runner on shutdown");
                if first_err.is_ok() {
                    first_err = Err(error);
                }
            }
        }
        first_err
    }
}
