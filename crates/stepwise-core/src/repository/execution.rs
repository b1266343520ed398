//! Execution repository trait definition.
//!
//! Stores execution records and their ordered history events.

use stepwise_types::error::RepositoryError;
use stepwise_types::event::ExecutionEvent;
use stepwise_types::execution::ExecutionRecord;
use uuid::Uuid;

/// Repository trait for execution persistence.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait ExecutionRepository: Send + Sync {
    /// Insert a new execution. Fails with `Conflict` if the name is taken.
    fn create_execution(
        &self,
        record: &ExecutionRecord,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Replace status, output, error and stop time of an existing execution.
    fn update_execution(
        &self,
        record: &ExecutionRecord,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_execution(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<ExecutionRecord>, RepositoryError>> + Send;

    fn get_execution_by_name(
        &self,
        name: &str,
    ) -> impl std::future::Future<Output = Result<Option<ExecutionRecord>, RepositoryError>> + Send;

    /// Most recent executions first.
    fn list_executions(
        &self,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<ExecutionRecord>, RepositoryError>> + Send;

    fn append_event(
        &self,
        event: &ExecutionEvent,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// All events of an execution ordered by sequence number.
    fn list_events(
        &self,
        execution_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<ExecutionEvent>, RepositoryError>> + Send;
}
