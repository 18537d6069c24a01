//! Error kinds for the engine surface and for user handlers.
//!
//! [`FlowError`] types builder-time and engine-operation failures by cause.
//! [`StepError`] is the vocabulary a node handler uses to steer its request:
//! retry with backoff, go fatal, pause, or just fail.

use std::time::Duration;

use thiserror::Error;

use crate::data::DataError;

// ---------------------------------------------------------------------------
// FlowError
// ---------------------------------------------------------------------------

/// Errors returned by DAG construction and engine operations.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not supported: {0}")]
    NotSupported(String),

    /// The engine has been closed; no further registrations or launches.
    #[error("engine is closed")]
    Closed,

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// StoreError
// ---------------------------------------------------------------------------

/// Errors from a persistence backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),

    #[error("store connection error: {0}")]
    Connection(String),
}

// ---------------------------------------------------------------------------
// StepError
// ---------------------------------------------------------------------------

/// Errors a handler returns to steer its request's state machine.
///
/// The runner classifies the value after each step:
/// `Retry` parks the request for `backoff` and re-runs the same vertex,
/// `Fatal` and `Pause` move it to the matching resident state, and
/// `Failed` (or any error converted into it) ends the request as failed.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("{message} (retry in {backoff:?})")]
    Retry { message: String, backoff: Duration },

    #[error("{0}")]
    Fatal(String),

    #[error("{0}")]
    Pause(String),

    #[error("{0}")]
    Failed(String),
}

impl StepError {
    pub fn retry(message: impl Into<String>, backoff: Duration) -> Self {
        Self::Retry {
            message: message.into(),
            backoff,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(message.into())
    }

    pub fn pause(message: impl Into<String>) -> Self {
        Self::Pause(message.into())
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// The requested backoff, for `Retry` errors.
    pub fn backoff(&self) -> Option<Duration> {
        match self {
            Self::Retry { backoff, .. } => Some(*backoff),
            _ => None,
        }
    }
}

impl From<DataError> for StepError {
    fn from(err: DataError) -> Self {
        Self::Failed(err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
