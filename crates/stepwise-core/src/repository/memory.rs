//! In-memory execution repository backed by `DashMap`.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use stepwise_types::error::RepositoryError;
use stepwise_types::event::ExecutionEvent;
use stepwise_types::execution::ExecutionRecord;
use uuid::Uuid;

use super::execution::ExecutionRepository;

/// Volatile storage. Cloning shares the underlying maps.
#[derive(Debug, Clone, Default)]
pub struct InMemoryExecutionRepository {
    executions: Arc<DashMap<Uuid, ExecutionRecord>>,
    names: Arc<DashMap<String, Uuid>>,
    events: Arc<DashMap<Uuid, Vec<ExecutionEvent>>>,
}

impl InMemoryExecutionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExecutionRepository for InMemoryExecutionRepository {
    async fn create_execution(&self, record: &ExecutionRecord) -> Result<(), RepositoryError> {
        match self.names.entry(record.name.clone()) {
            Entry::Occupied(_) => {
                return Err(RepositoryError::Conflict(format!(
                    "execution name '{}' already exists",
                    record.name
                )));
            }
            Entry::Vacant(slot) => {
                slot.insert(record.id);
            }
        }
        self.executions.insert(record.id, record.clone());
        Ok(())
    }

    async fn update_execution(&self, record: &ExecutionRecord) -> Result<(), RepositoryError> {
        match self.executions.get_mut(&record.id) {
            Some(mut existing) => {
                *existing = record.clone();
                Ok(())
            }
            None => Err(RepositoryError::NotFound),
        }
    }

    async fn get_execution(&self, id: &Uuid) -> Result<Option<ExecutionRecord>, RepositoryError> {
        Ok(self.executions.get(id).map(|r| r.clone()))
    }

    async fn get_execution_by_name(
        &self,
        name: &str,
    ) -> Result<Option<ExecutionRecord>, RepositoryError> {
        let Some(id) = self.names.get(name).map(|id| *id) else {
            return Ok(None);
        };
        Ok(self.executions.get(&id).map(|r| r.clone()))
    }

    async fn list_executions(&self, limit: u32) -> Result<Vec<ExecutionRecord>, RepositoryError> {
        let mut records: Vec<ExecutionRecord> =
            self.executions.iter().map(|r| r.value().clone()).collect();
        // UUIDv7 ids sort by creation time.
        records.sort_by(|a, b| b.id.cmp(&a.id));
        records.truncate(limit as usize);
        Ok(records)
    }

    async fn append_event(&self, event: &ExecutionEvent) -> Result<(), RepositoryError> {
        self.events
            .entry(event.execution_id)
            .or_default()
            .push(event.clone());
        Ok(())
    }

    async fn list_events(&self, execution_id: &Uuid) -> Result<Vec<ExecutionEvent>, RepositoryError> {
        let mut events = self
            .events
            .get(execution_id)
            .map(|e| e.clone())
            .unwrap_or_default();
        events.sort_by_key(|e| e.sequence);
        Ok(events)
    }
}
