//! Store backends for the flowline workflow engine.
//!
//! Implements the `Store` port defined in `flowline-core`: an in-memory map
//! for testing and a PostgreSQL table for production, plus [`AnyStore`] to
//! pick one at runtime from `FlowOptions`.

pub mod memory;
pub mod postgres;

pub use memory::{FaultHook, MemStore};
pub use postgres::PgStore;

use flowline_core::store::Store;
use flowline_types::error::StoreError;
use flowline_types::options::FlowOptions;

/// A store selected at runtime.
#[derive(Clone)]
pub enum AnyStore {
    Memory(MemStore),
    Postgres(PgStore),
}

impl Store for AnyStore {
    async fn get(&self, prefix: &str, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match self {
            Self::Memory(store) => store.get(prefix, key).await,
            Self::Postgres(store) => store.get(prefix, key).await,
        }
    }

    async fn set(&self, prefix: &str, key: &str, value: &[u8]) -> Result<(), StoreError> {
        match self {
            Self::Memory(store) => store.set(prefix, key, value).await,
            Self::Postgres(store) => store.set(prefix, key, value).await,
        }
    }

    async fn remove(&self, prefix: &str, key: &str) -> Result<(), StoreError> {
        match self {
            Self::Memory(store) => store.remove(prefix, key).await,
            Self::Postgres(store) => store.remove(prefix, key).await,
        }
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        match self {
            Self::Memory(store) => store.list_keys(prefix).await,
            Self::Postgres(store) => store.list_keys(prefix).await,
        }
    }
}

/// Open the store the options ask for.
///
/// A PostgreSQL configuration takes precedence over `mem_store`; with neither
/// set the in-memory store is still the fallback, so an unconfigured engine
/// works out of the box (but persists nothing across processes).
pub async fn open_store(options: &FlowOptions) -> Result<AnyStore, StoreError> {
    if let Some(config) = &options.postgres {
        return Ok(AnyStore::Postgres(PgStore::connect(config).await?));
    }
    if !options.mem_store {
        tracing::warn!("no store configured; falling back to the in-memory store");
    }
    Ok(AnyStore::Memory(MemStore::new()))
}
