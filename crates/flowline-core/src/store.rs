//! The persistence port the engine drives.
//!
//! A [`Store`] is a flat prefix+key blob map. The engine uses three
//! keyspaces: the compiled plan per request, the current rerun context per
//! request, and one trace record per executed vertex. Implementations live in
//! `flowline-store`.

use flowline_types::error::StoreError;

/// Keyspace holding the compiled plan of each launched request.
pub const DAG_PLAN_PREFIX: &str = "/dag/";

/// Keyspace holding the current rerun context of each live request.
pub const RUN_CONTEXT_PREFIX: &str = "/run_context/";

/// Base keyspace for per-request trace records.
pub const RECORD_PREFIX: &str = "/record/";

/// The trace-record keyspace of one request; keys are dotted vertex paths.
pub fn record_prefix(request_id: &str) -> String {
    format!("{RECORD_PREFIX}{request_id}")
}

/// Prefix+key blob storage.
///
/// Uses native async fn in traits (RPITIT); implementations must be safe for
/// concurrent access. Prefix and key are opaque to the backend -- how they
/// combine into a physical key is the backend's concern.
pub trait Store: Send + Sync {
    /// Fetch a value. Absent keys yield `Ok(None)`, not an error.
    fn get(
        &self,
        prefix: &str,
        key: &str,
    ) -> impl Future<Output = Result<Option<Vec<u8>>, StoreError>> + Send;

    /// Write a value (upsert).
    fn set(
        &self,
        prefix: &str,
        key: &str,
        value: &[u8],
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Delete a key. Removing an absent key is not an error.
    fn remove(
        &self,
        prefix: &str,
        key: &str,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// List the (unprefixed) keys under a prefix.
    fn list_keys(
        &self,
        prefix: &str,
    ) -> impl Future<Output = Result<Vec<String>, StoreError>> + Send;
}
