//! Shared fixtures for unit tests.

use flowline_types::error::StoreError;

use crate::store::Store;

/// A store that remembers nothing. Good enough for tests that only exercise
/// in-memory control flow.
pub(crate) struct NullStore;

impl Store for NullStore {
    async fn get(&self, _prefix: &str, _key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(None)
    }

    async fn set(&self, _prefix: &str, _key: &str, _value: &[u8]) -> Result<(), StoreError> {
        Ok(())
    }

    async fn remove(&self, _prefix: &str, _key: &str) -> Result<(), StoreError> {
        Ok(())
    }

    async fn list_keys(&self, _prefix: &str) -> Result<Vec<String>, StoreError> {
        Ok(Vec::new())
    }
}
