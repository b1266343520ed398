//! SQLite execution repository implementation.
//!
//! Implements `ExecutionRepository` from `stepwise-core` using sqlx with split
//! read/write pools. Documents (input, output) are stored as JSON text; each
//! history event is stored whole as a JSON payload next to its kind label.

use chrono::{DateTime, Utc};
use sqlx::Row;
use stepwise_core::repository::execution::ExecutionRepository;
use stepwise_types::error::RepositoryError;
use stepwise_types::event::ExecutionEvent;
use stepwise_types::execution::{ErrorOutput, ExecutionRecord, ExecutionStatus};
use uuid::Uuid;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `ExecutionRepository`.
#[derive(Clone)]
pub struct SqliteExecutionRepository {
    pool: DatabasePool,
}

impl SqliteExecutionRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct ExecutionRow {
    id: String,
    name: String,
    definition_name: String,
    status: String,
    input: String,
    output: Option<String>,
    error: Option<String>,
    cause: Option<String>,
    started_at: String,
    stopped_at: Option<String>,
}

impl ExecutionRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            definition_name: row.try_get("definition_name")?,
            status: row.try_get("status")?,
            input: row.try_get("input")?,
            output: row.try_get("output")?,
            error: row.try_get("error")?,
            cause: row.try_get("cause")?,
            started_at: row.try_get("started_at")?,
            stopped_at: row.try_get("stopped_at")?,
        })
    }

    fn into_record(self) -> Result<ExecutionRecord, RepositoryError> {
        let status: ExecutionStatus = self
            .status
            .parse()
            .map_err(|_| RepositoryError::Query(format!("invalid execution status: {}", self.status)))?;

        let output = self
            .output
            .as_deref()
            .map(|s| parse_json(s, "output"))
            .transpose()?;

        let error = self.error.map(|error| ErrorOutput {
            error,
            cause: self.cause.unwrap_or_default(),
        });

        Ok(ExecutionRecord {
            id: parse_uuid(&self.id)?,
            name: self.name,
            definition_name: self.definition_name,
            status,
            input: parse_json(&self.input, "input")?,
            output,
            error,
            started_at: parse_datetime(&self.started_at)?,
            stopped_at: self.stopped_at.as_deref().map(parse_datetime).transpose()?,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_uuid(s: &str) -> Result<Uuid, RepositoryError> {
    s.parse::<Uuid>()
        .map_err(|e| RepositoryError::Query(format!("invalid UUID: {e}")))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn parse_json(s: &str, column: &str) -> Result<serde_json::Value, RepositoryError> {
    serde_json::from_str(s).map_err(|e| RepositoryError::Query(format!("invalid {column} JSON: {e}")))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, RepositoryError> {
    serde_json::to_string(value).map_err(|e| RepositoryError::Query(e.to_string()))
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.is_unique_violation(),
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// ExecutionRepository impl
// ---------------------------------------------------------------------------

impl ExecutionRepository for SqliteExecutionRepository {
    async fn create_execution(&self, record: &ExecutionRecord) -> Result<(), RepositoryError> {
        let output = record.output.as_ref().map(to_json).transpose()?;

        sqlx::query(
            r#"INSERT INTO executions
               (id, name, definition_name, status, input, output, error, cause, started_at, stopped_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(record.id.to_string())
        .bind(&record.name)
        .bind(&record.definition_name)
        .bind(record.status.to_string())
        .bind(to_json(&record.input)?)
        .bind(output)
        .bind(record.error.as_ref().map(|e| e.error.as_str()))
        .bind(record.error.as_ref().map(|e| e.cause.as_str()))
        .bind(format_datetime(&record.started_at))
        .bind(record.stopped_at.as_ref().map(format_datetime))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                RepositoryError::Conflict(format!("execution name '{}' already exists", record.name))
            } else {
                RepositoryError::Query(e.to_string())
            }
        })?;

        Ok(())
    }

    async fn update_execution(&self, record: &ExecutionRecord) -> Result<(), RepositoryError> {
        let output = record.output.as_ref().map(to_json).transpose()?;

        let result = sqlx::query(
            "UPDATE executions SET status = ?, output = ?, error = ?, cause = ?, stopped_at = ? WHERE id = ?",
        )
        .bind(record.status.to_string())
        .bind(output)
        .bind(record.error.as_ref().map(|e| e.error.as_str()))
        .bind(record.error.as_ref().map(|e| e.cause.as_str()))
        .bind(record.stopped_at.as_ref().map(format_datetime))
        .bind(record.id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn get_execution(&self, id: &Uuid) -> Result<Option<ExecutionRecord>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM executions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let r = ExecutionRow::from_row(&row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(r.into_record()?))
            }
            None => Ok(None),
        }
    }

    async fn get_execution_by_name(
        &self,
        name: &str,
    ) -> Result<Option<ExecutionRecord>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM executions WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let r = ExecutionRow::from_row(&row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(r.into_record()?))
            }
            None => Ok(None),
        }
    }

    async fn list_executions(&self, limit: u32) -> Result<Vec<ExecutionRecord>, RepositoryError> {
        // UUIDv7 text ids sort by creation time.
        let rows = sqlx::query("SELECT * FROM executions ORDER BY id DESC LIMIT ?")
            .bind(i64::from(limit))
            .fetch_all(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            let r = ExecutionRow::from_row(row)
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
            records.push(r.into_record()?);
        }
        Ok(records)
    }

    async fn append_event(&self, event: &ExecutionEvent) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO execution_events (execution_id, sequence, timestamp, kind, payload)
               VALUES (?, ?, ?, ?, ?)"#,
        )
        .bind(event.execution_id.to_string())
        .bind(i64::try_from(event.sequence).unwrap_or(i64::MAX))
        .bind(format_datetime(&event.timestamp))
        .bind(event.kind.label())
        .bind(to_json(event)?)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                RepositoryError::Conflict(format!(
                    "event {} of execution {} already recorded",
                    event.sequence, event.execution_id
                ))
            } else {
                RepositoryError::Query(e.to_string())
            }
        })?;

        Ok(())
    }

    async fn list_events(&self, execution_id: &Uuid) -> Result<Vec<ExecutionEvent>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT payload FROM execution_events WHERE execution_id = ? ORDER BY sequence ASC",
        )
        .bind(execution_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut events = Vec::with_capacity(rows.len());
        for row in &rows {
            let payload: String = row
                .try_get("payload")
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
            let event: ExecutionEvent = serde_json::from_str(&payload)
                .map_err(|e| RepositoryError::Query(format!("invalid event payload: {e}")))?;
            events.push(event);
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stepwise_types::event::EventKind;

    async fn repo() -> (tempfile::TempDir, SqliteExecutionRepository) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("exec.db").display());
        let pool = DatabasePool::new(&url).await.unwrap();
        (dir, SqliteExecutionRepository::new(pool))
    }

    fn record(name: &str) -> ExecutionRecord {
        ExecutionRecord::new(name.to_string(), "nightly".to_string(), json!({"date": "2024-01-02"}))
    }

    #[tokio::test]
    async fn test_create_get_and_update() {
        let (_dir, repo) = repo().await;
        let mut rec = record("nightly-1");
        repo.create_execution(&rec).await.unwrap();

        let loaded = repo.get_execution(&rec.id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "nightly-1");
        assert_eq!(loaded.status, ExecutionStatus::Pending);
        assert_eq!(loaded.input, json!({"date": "2024-01-02"}));
        assert!(loaded.output.is_none());

        rec.status = ExecutionStatus::Failed;
        rec.output = Some(json!({"date": "2024-01-02", "error": {"Error": "E"}}));
        rec.error = Some(ErrorOutput::new("Report.Corrupt", "checksum mismatch"));
        rec.stopped_at = Some(Utc::now());
        repo.update_execution(&rec).await.unwrap();

        let loaded = repo.get_execution_by_name("nightly-1").await.unwrap().unwrap();
        assert_eq!(loaded.status, ExecutionStatus::Failed);
        assert_eq!(loaded.output, rec.output);
        assert_eq!(loaded.error, rec.error);
        assert!(loaded.stopped_at.is_some());
    }

    #[tokio::test]
    async fn test_duplicate_name_is_conflict() {
        let (_dir, repo) = repo().await;
        repo.create_execution(&record("same")).await.unwrap();
        let err = repo.create_execution(&record("same")).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)), "got: {err}");
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let (_dir, repo) = repo().await;
        let err = repo.update_execution(&record("ghost")).await.unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound));
    }

    #[tokio::test]
    async fn test_list_newest_first_with_limit() {
        let (_dir, repo) = repo().await;
        for i in 0..3 {
            repo.create_execution(&record(&format!("run-{i}"))).await.unwrap();
        }
        let listed = repo.list_executions(2).await.unwrap();
        let names: Vec<&str> = listed.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["run-2", "run-1"]);
    }

    #[tokio::test]
    async fn test_events_round_trip_in_sequence_order() {
        let (_dir, repo) = repo().await;
        let rec = record("with-events");
        repo.create_execution(&rec).await.unwrap();

        for (sequence, kind) in [
            (2, EventKind::StateEntered { state: "Check".into(), input: json!({}) }),
            (1, EventKind::ExecutionStarted { input: json!({}) }),
            (3, EventKind::ExecutionAborted),
        ] {
            repo.append_event(&ExecutionEvent {
                execution_id: rec.id,
                sequence,
                timestamp: Utc::now(),
                kind,
            })
            .await
            .unwrap();
        }

        let events = repo.list_events(&rec.id).await.unwrap();
        let labels: Vec<&str> = events.iter().map(|e| e.kind.label()).collect();
        assert_eq!(labels, vec!["execution_started", "state_entered", "execution_aborted"]);
        assert_eq!(events[1].kind.state(), Some("Check"));
    }
}
