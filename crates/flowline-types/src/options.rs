//! Engine configuration.

// ---------------------------------------------------------------------------
// FlowOptions
// ---------------------------------------------------------------------------

/// Options controlling engine scheduling and persistence.
#[derive(Debug, Clone)]
pub struct FlowOptions {
    /// Maximum runners dispatched per tick; also the worker-pool size in
    /// async mode. Default 100_000.
    pub max_node_concurrency: usize,
    /// When true the engine spawns an internal driver loop that ticks until
    /// close. When false the caller must invoke `run_once` itself.
    pub auto_start: bool,
    /// When true each step runs on the worker pool and a tick never blocks on
    /// a handler. Set to false for deterministic, inline stepping (tests).
    pub task_run_async: bool,
    /// Select the in-memory store. Testing only.
    pub mem_store: bool,
    /// Select the PostgreSQL store. Takes precedence over `mem_store`.
    pub postgres: Option<PostgresConfig>,
}

impl Default for FlowOptions {
    fn default() -> Self {
        Self {
            max_node_concurrency: 100_000,
            auto_start: true,
            task_run_async: true,
            mem_store: false,
            postgres: None,
        }
    }
}

impl FlowOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_node_concurrency(mut self, concurrency: usize) -> Self {
        self.max_node_concurrency = concurrency;
        self
    }

    pub fn disable_auto_start(mut self) -> Self {
        self.auto_start = false;
        self
    }

    pub fn disable_task_run_async(mut self) -> Self {
        self.task_run_async = false;
        self
    }

    pub fn enable_mem_store(mut self) -> Self {
        self.mem_store = true;
        self
    }

    pub fn with_postgres(mut self, config: PostgresConfig) -> Self {
        self.postgres = Some(config);
        self
    }
}

// ---------------------------------------------------------------------------
// PostgresConfig
// ---------------------------------------------------------------------------

/// PostgreSQL connection configuration.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    /// disable, require, verify-ca, verify-full
    pub ssl_mode: String,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            password: "postgres".to_string(),
            database: "flowline".to_string(),
            ssl_mode: "disable".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
