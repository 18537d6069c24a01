//! PostgreSQL-backed store.
//!
//! One `flow_store` table keyed by `(prefix, key)` with a BYTEA value column.
//! The table is created on connect; no migration machinery.

use std::str::FromStr;

use flowline_core::store::Store;
use flowline_types::error::StoreError;
use flowline_types::options::PostgresConfig;
use sqlx::Row;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgSslMode};

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS flow_store (
    prefix      VARCHAR(255) NOT NULL,
    key         VARCHAR(255) NOT NULL,
    value       BYTEA,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    PRIMARY KEY (prefix, key)
)
"#;

const CREATE_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_flow_store_prefix ON flow_store (prefix)";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect with the given configuration and bootstrap the table.
    pub async fn connect(config: &PostgresConfig) -> Result<Self, StoreError> {
        let ssl_mode = PgSslMode::from_str(&config.ssl_mode).map_err(|error| {
            StoreError::Connection(format!("invalid ssl mode '{}': {error}", config.ssl_mode))
        })?;
        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password)
            .database(&config.database)
            .ssl_mode(ssl_mode);

        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await
            .map_err(|error| StoreError::Connection(error.to_string()))?;

        Self::with_pool(pool).await
    }

    /// Wrap an existing pool and bootstrap the table.
    pub async fn with_pool(pool: PgPool) -> Result<Self, StoreError> {
        let store = Self { pool };
        store.init_table().await?;
        Ok(store)
    }

    async fn init_table(&self) -> Result<(), StoreError> {
        for statement in [CREATE_TABLE, CREATE_INDEX] {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|error| StoreError::Backend(error.to_string()))?;
        }
        Ok(())
    }
}

impl Store for PgStore {
    async fn get(&self, prefix: &str, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let row = sqlx::query("SELECT value FROM flow_store WHERE prefix = $1 AND key = $2")
            .bind(prefix)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|error| StoreError::Backend(error.to_string()))?;

        match row {
            Some(row) => {
                let value: Vec<u8> = row
                    .try_get("value")
                    .map_err(|error| StoreError::Backend(error.to_string()))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn set(&self, prefix: &str, key: &str, value: &[u8]) -> Result<(), StoreError> {
        sqlx::query(
            r#"INSERT INTO flow_store (prefix, key, value) VALUES ($1, $2, $3)
               ON CONFLICT (prefix, key)
               DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()"#,
        )
        .bind(prefix)
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(|error| StoreError::Backend(error.to_string()))?;

        Ok(())
    }

    async fn remove(&self, prefix: &str, key: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM flow_store WHERE prefix = $1 AND key = $2")
            .bind(prefix)
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|error| StoreError::Backend(error.to_string()))?;

        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query("SELECT key FROM flow_store WHERE prefix = $1 ORDER BY key")
            .bind(prefix)
            .fetch_all(&self.pool)
            .await
            .map_err(|error| StoreError::Backend(error.to_string()))?;

        let mut keys = Vec::with_capacity(rows.len());
        for row in &rows {
            let key: String = row
                .try_get("key")
                .map_err(|error| StoreError::Backend(error.to_string()))?;
            keys.push(key);
        }
        Ok(keys)
    }
}

// ---------------------------------------------------------------------------
// Tests (need a local postgres; run with `cargo test -- --ignored`)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> PgStore {
        PgStore::connect(&PostgresConfig::default())
            .await
            .expect("local postgres with a 'flowline' database")
    }

    #[tokio::test]
    #[ignore = "requires a local postgres"]
    async fn test_set_get_remove_roundtrip() {
        let store = test_store().await;
        let key = uuid::Uuid::now_v7().to_string();

        store.set("/test/", &key, b"payload").await.unwrap();
        assert_eq!(
            store.get("/test/", &key).await.unwrap().as_deref(),
            Some(b"payload".as_slice())
        );

        store.set("/test/", &key, b"updated").await.unwrap();
        assert_eq!(
            store.get("/test/", &key).await.unwrap().as_deref(),
            Some(b"updated".as_slice())
        );

        store.remove("/test/", &key).await.unwrap();
        assert_eq!(store.get("/test/", &key).await.unwrap(), None);
        // Removing again is not an error.
        store.remove("/test/", &key).await.unwrap();
    }

    #[tokio::test]
    #[ignore = "requires a local postgres"]
    async fn test_list_keys_scoped_to_prefix() {
        let store = test_store().await;
        let prefix = format!("/test-{}/", uuid::Uuid::now_v7());

        store.set(&prefix, "b", b"1").await.unwrap();
        store.set(&prefix, "a", b"2").await.unwrap();
        store.set("/test-other/", "c", b"3").await.unwrap();

        let keys = store.list_keys(&prefix).await.unwrap();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);
    }
}
