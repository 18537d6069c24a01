//! Request statuses, trace records, and the persisted rerun context.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::data::Data;
use crate::path::Path;

// ---------------------------------------------------------------------------
// RunStatus
// ---------------------------------------------------------------------------

/// The lifecycle status of one request.
///
/// `Failed`, `Fatal` and `Finished` are terminal. Only `Failed` and `Finished`
/// make a runner eligible for removal from the scheduler -- `Fatal` and
/// `Paused` stay resident so they can be inspected or resumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending = 1,
    Running = 2,
    Paused = 3,
    Retrying = 4,
    Failed = 5,
    Fatal = 9,
    Finished = 10,
}

impl RunStatus {
    /// No further steps will ever run for this request.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Fatal | Self::Finished)
    }

    /// The scheduler may dispatch a step for this request.
    pub fn is_runnable(self) -> bool {
        matches!(self, Self::Pending | Self::Running | Self::Retrying)
    }

    /// The scheduler may drop this runner from its map.
    pub fn is_removable(self) -> bool {
        matches!(self, Self::Failed | Self::Finished)
    }
}

// ---------------------------------------------------------------------------
// TraceRecord
// ---------------------------------------------------------------------------

/// One persisted execution trace per vertex, keyed by its dotted path.
///
/// Repeated executions of the same vertex (retries, loops reached through
/// conditions) overwrite the previous record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceRecord {
    /// The address of the vertex the step was dispatched to.
    pub path: Path,
    /// The path actually walked during the step (descends through sub-DAGs).
    pub vertex: Path,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub input: Data,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Data>,
}

// ---------------------------------------------------------------------------
// RequestStatus
// ---------------------------------------------------------------------------

/// Snapshot returned by `FlowEngine::get_request_status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestStatus {
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_record: Option<TraceRecord>,
}

// ---------------------------------------------------------------------------
// RerunContext
// ---------------------------------------------------------------------------

/// The durable per-request snapshot enabling crash recovery.
///
/// Written after every step under `/run_context/<request_id>`; removed when
/// the request finishes successfully.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerunContext {
    pub status: RunStatus,
    /// Address of the vertex the next step will execute.
    pub entrypoint: Path,
    #[serde(default)]
    pub data: Data,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
