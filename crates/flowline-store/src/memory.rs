//! In-memory store for testing and development.
//!
//! Keys are flat `prefix|key` concatenations in one map. Clones share the
//! same map, so a "restarted" engine in a test can reuse the store of the
//! engine it replaces. A fault hook lets tests make every operation fail on
//! demand. Never use this in production -- nothing survives the process.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use flowline_core::store::Store;
use flowline_types::error::StoreError;

/// Invoked on every operation; return `Err` to simulate a backend failure.
pub type FaultHook = Arc<dyn Fn() -> Result<(), StoreError> + Send + Sync>;

#[derive(Clone, Default)]
pub struct MemStore {
    entries: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
    fault: Option<FaultHook>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose every operation consults `hook` first.
    pub fn with_fault(hook: FaultHook) -> Self {
        Self {
            entries: Arc::new(Mutex::new(BTreeMap::new())),
            fault: Some(hook),
        }
    }

    fn flat_key(prefix: &str, key: &str) -> String {
        format!("{prefix}|{key}")
    }

    fn check(&self) -> Result<(), StoreError> {
        match &self.fault {
            Some(hook) => hook(),
            None => Ok(()),
        }
    }
}

impl Store for MemStore {
    async fn get(&self, prefix: &str, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.check()?;
        let entries = self.entries.lock().expect("mem store lock");
        Ok(entries.get(&Self::flat_key(prefix, key)).cloned())
    }

    async fn set(&self, prefix: &str, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.check()?;
        let mut entries = self.entries.lock().expect("mem store lock");
        entries.insert(Self::flat_key(prefix, key), value.to_vec());
        Ok(())
    }

    async fn remove(&self, prefix: &str, key: &str) -> Result<(), StoreError> {
        self.check()?;
        let mut entries = self.entries.lock().expect("mem store lock");
        entries.remove(&Self::flat_key(prefix, key));
        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.check()?;
        let full_prefix = format!("{prefix}|");
        let entries = self.entries.lock().expect("mem store lock");
        Ok(entries
            .keys()
            .filter_map(|key| key.strip_prefix(&full_prefix))
            .map(str::to_string)
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
