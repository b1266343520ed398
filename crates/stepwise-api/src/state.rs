//! Application state wiring the engine to its infrastructure.
//!
//! AppState holds the interpreter used by both CLI commands and REST API
//! handlers. The interpreter is generic over the repository; AppState pins it
//! to [`Store`], which selects SQLite or in-memory storage at startup.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use stepwise_core::event::bus::EventBus;
use stepwise_core::repository::execution::ExecutionRepository;
use stepwise_core::repository::memory::InMemoryExecutionRepository;
use stepwise_core::workflow::catalog::DefinitionCatalog;
use stepwise_core::workflow::invoker::BoxTaskInvoker;
use stepwise_core::workflow::interpreter::Interpreter;
use stepwise_core::workflow::model::Definition;
use stepwise_infra::invoker::routing::RoutingInvoker;
use stepwise_infra::sqlite::execution::SqliteExecutionRepository;
use stepwise_infra::sqlite::pool::{data_dir, default_database_url, DatabasePool};
use stepwise_types::config::StepwiseConfig;
use stepwise_types::error::RepositoryError;
use stepwise_types::event::ExecutionEvent;
use stepwise_types::execution::ExecutionRecord;
use uuid::Uuid;

/// `database_url` value selecting the volatile repository.
pub const MEMORY_DATABASE: &str = "memory";

/// Execution storage chosen from configuration.
#[derive(Clone)]
pub enum Store {
    Sqlite(SqliteExecutionRepository),
    Memory(InMemoryExecutionRepository),
}

impl ExecutionRepository for Store {
    async fn create_execution(&self, record: &ExecutionRecord) -> Result<(), RepositoryError> {
        match self {
            Store::Sqlite(repo) => repo.create_execution(record).await,
            Store::Memory(repo) => repo.create_execution(record).await,
        }
    }

    async fn update_execution(&self, record: &ExecutionRecord) -> Result<(), RepositoryError> {
        match self {
            Store::Sqlite(repo) => repo.update_execution(record).await,
            Store::Memory(repo) => repo.update_execution(record).await,
        }
    }

    async fn get_execution(&self, id: &Uuid) -> Result<Option<ExecutionRecord>, RepositoryError> {
        match self {
            Store::Sqlite(repo) => repo.get_execution(id).await,
            Store::Memory(repo) => repo.get_execution(id).await,
        }
    }

    async fn get_execution_by_name(
        &self,
        name: &str,
    ) -> Result<Option<ExecutionRecord>, RepositoryError> {
        match self {
            Store::Sqlite(repo) => repo.get_execution_by_name(name).await,
            Store::Memory(repo) => repo.get_execution_by_name(name).await,
        }
    }

    async fn list_executions(&self, limit: u32) -> Result<Vec<ExecutionRecord>, RepositoryError> {
        match self {
            Store::Sqlite(repo) => repo.list_executions(limit).await,
            Store::Memory(repo) => repo.list_executions(limit).await,
        }
    }

    async fn append_event(&self, event: &ExecutionEvent) -> Result<(), RepositoryError> {
        match self {
            Store::Sqlite(repo) => repo.append_event(event).await,
            Store::Memory(repo) => repo.append_event(event).await,
        }
    }

    async fn list_events(&self, execution_id: &Uuid) -> Result<Vec<ExecutionEvent>, RepositoryError> {
        match self {
            Store::Sqlite(repo) => repo.list_events(execution_id).await,
            Store::Memory(repo) => repo.list_events(execution_id).await,
        }
    }
}

pub type ConcreteInterpreter = Interpreter<Store>;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<StepwiseConfig>,
    pub interpreter: ConcreteInterpreter,
    pub catalog: Arc<DefinitionCatalog>,
}

impl AppState {
    /// Open storage and wire the interpreter to the routing invoker.
    pub async fn init(config: StepwiseConfig) -> anyhow::Result<Self> {
        let store = match config.database_url.as_deref() {
            Some(MEMORY_DATABASE) => Store::Memory(InMemoryExecutionRepository::new()),
            Some(url) => {
                let pool = DatabasePool::new(url)
                    .await
                    .with_context(|| format!("failed to open database '{url}'"))?;
                Store::Sqlite(SqliteExecutionRepository::new(pool))
            }
            None => {
                let dir = data_dir();
                tokio::fs::create_dir_all(&dir)
                    .await
                    .with_context(|| format!("failed to create data directory {}", dir.display()))?;
                let pool = DatabasePool::new(&default_database_url())
                    .await
                    .context("failed to open default database")?;
                Store::Sqlite(SqliteExecutionRepository::new(pool))
            }
        };

        let invoker = RoutingInvoker::from_config(&config);
        Ok(Self::with_parts(config, BoxTaskInvoker::new(invoker), store))
    }

    /// Assemble state from already-built parts.
    pub fn with_parts(config: StepwiseConfig, invoker: BoxTaskInvoker, store: Store) -> Self {
        let bus = EventBus::new(config.event_capacity);
        Self {
            interpreter: Interpreter::new(invoker, store, bus),
            catalog: Arc::new(DefinitionCatalog::new(config.definitions_dir.clone())),
            config: Arc::new(config),
        }
    }

    /// Definitions found under the configured `definitions_dir`.
    pub fn definitions(&self) -> anyhow::Result<Vec<(PathBuf, Arc<Definition>)>> {
        self.catalog.list().with_context(|| {
            format!(
                "failed to scan definitions in {}",
                self.catalog.base_dir().display()
            )
        })
    }

    /// Find a definition by name in `definitions_dir`.
    pub fn find_definition(&self, name: &str) -> anyhow::Result<Option<Arc<Definition>>> {
        self.catalog
            .get(name)
            .with_context(|| format!("failed to load definition '{name}'"))
    }
}
