//! Execution history recording.
//!
//! Wraps `ExecutionRepository` to provide a higher-level API for recording
//! execution records and their transition events. Every event is persisted
//! and then broadcast on the event bus.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use stepwise_types::event::{EventKind, ExecutionEvent};
use stepwise_types::execution::ExecutionRecord;
use thiserror::Error;
use uuid::Uuid;

use crate::event::EventBus;
use crate::repository::execution::ExecutionRepository;

// ---------------------------------------------------------------------------
// HistoryRecorder
// ---------------------------------------------------------------------------

/// Persists execution records and events.
///
/// Generic over `R: ExecutionRepository` so it works with any storage backend
/// (SQLite, in-memory, etc.).
pub struct HistoryRecorder<R: ExecutionRepository> {
    repo: R,
    bus: EventBus,
}

impl<R: ExecutionRepository> HistoryRecorder<R> {
    pub fn new(repo: R, bus: EventBus) -> Self {
        Self { repo, bus }
    }

    /// Access the underlying repository.
    pub fn repo(&self) -> &R {
        &self.repo
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Insert a new execution record.
    pub async fn create(&self, record: &ExecutionRecord) -> Result<(), HistoryError> {
        self.repo.create_execution(record).await.map_err(|e| match e {
            stepwise_types::error::RepositoryError::Conflict(msg) => HistoryError::Conflict(msg),
            other => HistoryError::Repository(other.to_string()),
        })?;

        tracing::debug!(
            execution_id = %record.id,
            name = %record.name,
            "recorded execution"
        );
        Ok(())
    }

    /// Persist the current status/output of an execution.
    pub async fn update(&self, record: &ExecutionRecord) -> Result<(), HistoryError> {
        self.repo
            .update_execution(record)
            .await
            .map_err(|e| HistoryError::Repository(e.to_string()))?;

        tracing::debug!(
            execution_id = %record.id,
            status = %record.status,
            "updated execution"
        );
        Ok(())
    }

    /// Persist and broadcast one event.
    ///
    /// A failed write is logged, not returned: the run itself must not fail
    /// because its history could not be stored.
    pub async fn append(&self, event: ExecutionEvent) {
        if let Err(e) = self.repo.append_event(&event).await {
            tracing::warn!(
                execution_id = %event.execution_id,
                sequence = event.sequence,
                error = %e,
                "failed to persist execution event"
            );
        }
        self.bus.publish(event);
    }
}

/// Errors from history persistence.
#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("execution name conflict: {0}")]
    Conflict(String),

    #[error("repository error: {0}")]
    Repository(String),
}

// ---------------------------------------------------------------------------
// Journal
// ---------------------------------------------------------------------------

/// Event writer for one execution.
///
/// Cheap to clone; clones handed to `Parallel` branches share the sequence
/// counter so the history of an execution stays totally ordered.
pub struct Journal<R: ExecutionRepository> {
    recorder: Arc<HistoryRecorder<R>>,
    execution_id: Uuid,
    sequence: Arc<AtomicU64>,
}

impl<R: ExecutionRepository> Journal<R> {
    pub fn new(recorder: Arc<HistoryRecorder<R>>, execution_id: Uuid) -> Self {
        Self {
            recorder,
            execution_id,
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn execution_id(&self) -> Uuid {
        self.execution_id
    }

    pub async fn record(&self, kind: EventKind) {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        self.recorder
            .append(ExecutionEvent {
                execution_id: self.execution_id,
                sequence,
                timestamp: Utc::now(),
                kind,
            })
            .await;
    }
}

impl<R: ExecutionRepository> Clone for Journal<R> {
    fn clone(&self) -> Self {
        Self {
            recorder: Arc::clone(&self.recorder),
            execution_id: self.execution_id,
            sequence: Arc::clone(&self.sequence),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::memory::InMemoryExecutionRepository;
    use serde_json::json;

    #[tokio::test]
    async fn test_journal_sequences_and_publishes() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let recorder = Arc::new(HistoryRecorder::new(InMemoryExecutionRepository::new(), bus));
        let id = Uuid::now_v7();
        let journal = Journal::new(Arc::clone(&recorder), id);
        let branch = journal.clone();

        journal
            .record(EventKind::ExecutionStarted { input: json!({}) })
            .await;
        branch
            .record(EventKind::ChoiceMatched {
                state: "C".into(),
                next: "D".into(),
            })
            .await;

        let events = recorder.repo().list_events(&id).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].sequence, 1);
        assert_eq!(events[1].sequence, 2);
        assert_eq!(rx.recv().await.unwrap().sequence, 1);
    }

    #[tokio::test]
    async fn test_create_conflict_is_distinct() {
        let recorder = HistoryRecorder::new(InMemoryExecutionRepository::new(), EventBus::new(4));
        let record = ExecutionRecord::new("same".into(), "def".into(), json!({}));
        recorder.create(&record).await.unwrap();

        let again = ExecutionRecord::new("same".into(), "def".into(), json!({}));
        let err = recorder.create(&again).await.unwrap_err();
        assert!(matches!(err, HistoryError::Conflict(_)));
    }
}
