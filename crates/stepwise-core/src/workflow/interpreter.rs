//! Interpreter: drives an execution through its states.
//!
//! Each scope (the top-level definition or one `Parallel` branch) runs a
//! strict loop: resolve the current state, derive its effective input with
//! `InputPath`/`Parameters`, execute the behavior, shape the result with
//! `ResultSelector`/`ResultPath`/`OutputPath`, then follow the transition.
//!
//! Failures are offered to the failing state's `Retry` list, then its
//! `Catch` list; anything left over leaves the scope. Branch scopes surface
//! it to the enclosing `Parallel`, the top-level scope ends the execution.
//!
//! Every step is written to the history journal, and all waiting (explicit
//! `Wait` states, retry backoff, in-flight task calls) races the execution's
//! cancellation token so an abort interrupts it promptly. A unit that panics
//! fails its state with `States.Runtime`.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde_json::{json, Value};
use stepwise_types::event::EventKind;
use stepwise_types::execution::{ErrorOutput, ExecutionRecord, ExecutionStatus};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::event::EventBus;
use crate::repository::execution::ExecutionRepository;

use super::choice::first_match;
use super::context::ExecutionContext;
use super::failure::{ExecutionError, STATES_ABORTED, STATES_FAIL, STATES_RUNTIME};
use super::history::{HistoryError, HistoryRecorder, Journal};
use super::intrinsics::IntrinsicError;
use super::invoker::{BoxTaskInvoker, TaskFailure};
use super::model::{
    Definition, FailField, FailState, ParallelState, Resource, State, StateKind, TaskState,
    Transition,
};
use super::parallel::run_branches;
use super::path::{describe, JsonPath, PathError};
use super::retry::{CatchRule, RetryDecision, RetryHandler, RetryPolicy};
use super::template::Template;
use super::wait::{resolve_wait, sleep_cancellable};

// ---------------------------------------------------------------------------
// Results and errors
// ---------------------------------------------------------------------------

/// Outcome of a finished execution.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub id: Uuid,
    pub name: String,
    pub status: ExecutionStatus,
    /// Final document. On failure, the document as it stood when the
    /// failure left the top-level scope.
    pub output: Value,
    pub error: Option<ErrorOutput>,
}

impl From<&ExecutionRecord> for ExecutionResult {
    fn from(record: &ExecutionRecord) -> Self {
        Self {
            id: record.id,
            name: record.name.clone(),
            status: record.status,
            output: record.output.clone().unwrap_or(Value::Null),
            error: record.error.clone(),
        }
    }
}

/// Errors that prevent an execution from starting or being controlled.
#[derive(Debug, Error)]
pub enum InterpreterError {
    #[error("an execution named '{0}' already exists")]
    NameConflict(String),

    #[error("history error: {0}")]
    History(String),

    #[error("execution {0} is not running")]
    NotRunning(Uuid),
}

impl From<HistoryError> for InterpreterError {
    fn from(err: HistoryError) -> Self {
        match err {
            HistoryError::Conflict(name) => InterpreterError::NameConflict(name),
            HistoryError::Repository(msg) => InterpreterError::History(msg),
        }
    }
}

// ---------------------------------------------------------------------------
// Interpreter
// ---------------------------------------------------------------------------

struct RunHandle {
    token: CancellationToken,
    waiters: Arc<AtomicUsize>,
    started: AtomicBool,
}

/// Executes compiled definitions against a task invoker.
///
/// Generic over `R: ExecutionRepository` for storage flexibility. Cheap to
/// clone; clones share the invoker, the history recorder and the table of
/// running executions.
pub struct Interpreter<R: ExecutionRepository> {
    invoker: Arc<BoxTaskInvoker>,
    recorder: Arc<HistoryRecorder<R>>,
    running: Arc<DashMap<Uuid, RunHandle>>,
}

impl<R: ExecutionRepository> Clone for Interpreter<R> {
    fn clone(&self) -> Self {
        Self {
            invoker: Arc::clone(&self.invoker),
            recorder: Arc::clone(&self.recorder),
            running: Arc::clone(&self.running),
        }
    }
}

impl<R: ExecutionRepository + 'static> Interpreter<R> {
    pub fn new(invoker: BoxTaskInvoker, repo: R, bus: EventBus) -> Self {
        Self {
            invoker: Arc::new(invoker),
            recorder: Arc::new(HistoryRecorder::new(repo, bus)),
            running: Arc::new(DashMap::new()),
        }
    }

    pub fn repo(&self) -> &R {
        self.recorder.repo()
    }

    pub fn bus(&self) -> &EventBus {
        self.recorder.bus()
    }

    /// Live status of a registered execution: `Pending` until it starts
    /// driving, then `Waiting` while any of its scopes is sleeping and
    /// `Running` otherwise. `None` once it has finished.
    pub fn live_status(&self, id: &Uuid) -> Option<ExecutionStatus> {
        self.running.get(id).map(|handle| {
            if !handle.started.load(Ordering::SeqCst) {
                ExecutionStatus::Pending
            } else if handle.waiters.load(Ordering::SeqCst) > 0 {
                ExecutionStatus::Waiting
            } else {
                ExecutionStatus::Running
            }
        })
    }

    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    /// Run an execution to completion.
    ///
    /// `name` defaults to a generated `"{definition}-{timestamp}-…"` and must
    /// be unique.
    pub async fn execute(
        &self,
        definition: Arc<Definition>,
        input: Value,
        name: Option<String>,
    ) -> Result<ExecutionResult, InterpreterError> {
        let (record, run) = self.prepare(&definition, input, name).await?;
        Ok(self.drive(definition, record, run).await)
    }

    /// Register an execution and run it in the background.
    ///
    /// Returns the `Pending` record as soon as it is persisted, so name
    /// conflicts are still reported to the caller.
    pub async fn start(
        &self,
        definition: Arc<Definition>,
        input: Value,
        name: Option<String>,
    ) -> Result<ExecutionRecord, InterpreterError> {
        let (record, run) = self.prepare(&definition, input, name).await?;
        let this = self.clone();
        let launched = record.clone();
        tokio::spawn(async move {
            this.drive(definition, launched, run).await;
        });
        Ok(record)
    }

    /// Request cancellation of a running execution.
    pub fn abort(&self, id: &Uuid) -> Result<(), InterpreterError> {
        match self.running.get(id) {
            Some(handle) => {
                handle.token.cancel();
                tracing::info!(execution_id = %id, "abort requested");
                Ok(())
            }
            None => Err(InterpreterError::NotRunning(*id)),
        }
    }

    /// Cancel every running execution. Returns how many were signalled.
    pub fn abort_all(&self) -> usize {
        let mut count = 0;
        for handle in self.running.iter() {
            handle.token.cancel();
            count += 1;
        }
        if count > 0 {
            tracing::info!(count, "abort requested for all running executions");
        }
        count
    }

    async fn prepare(
        &self,
        definition: &Definition,
        input: Value,
        name: Option<String>,
    ) -> Result<(ExecutionRecord, Run<R>), InterpreterError> {
        let mut record = ExecutionRecord::new(String::new(), definition.name.clone(), input);
        record.name = name.unwrap_or_else(|| generate_name(&definition.name, &record.id));
        self.recorder.create(&record).await?;

        let token = CancellationToken::new();
        let waiters = Arc::new(AtomicUsize::new(0));
        self.running.insert(
            record.id,
            RunHandle {
                token: token.clone(),
                waiters: Arc::clone(&waiters),
                started: AtomicBool::new(false),
            },
        );

        let run = Run {
            invoker: Arc::clone(&self.invoker),
            journal: Journal::new(Arc::clone(&self.recorder), record.id),
            token,
            waiters,
        };
        Ok((record, run))
    }

    async fn drive(
        &self,
        definition: Arc<Definition>,
        mut record: ExecutionRecord,
        run: Run<R>,
    ) -> ExecutionResult {
        let journal = run.journal.clone();
        let token = run.token.clone();

        record.status = ExecutionStatus::Running;
        if let Err(e) = self.recorder.update(&record).await {
            tracing::warn!(execution_id = %record.id, error = %e, "failed to mark execution running");
        }
        if let Some(handle) = self.running.get(&record.id) {
            handle.started.store(true, Ordering::SeqCst);
        }

        journal
            .record(EventKind::ExecutionStarted {
                input: record.input.clone(),
            })
            .await;
        tracing::info!(
            execution_id = %record.id,
            name = %record.name,
            definition = %definition.name,
            "starting execution"
        );

        let ctx = ExecutionContext::new(
            record.id,
            record.name.clone(),
            definition.name.clone(),
            Arc::new(record.input.clone()),
        );
        let scope = run_scope(run, definition, record.input.clone(), ctx);
        let outcome = match AssertUnwindSafe(scope).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(payload) => {
                let error = ExecutionError::panicked("execution", payload.as_ref());
                tracing::error!(execution_id = %record.id, error = %error, "execution panicked");
                Err(ScopeFailure {
                    error,
                    document: record.input.clone(),
                })
            }
        };
        record.stopped_at = Some(Utc::now());

        match outcome {
            Ok(output) => {
                record.status = ExecutionStatus::Succeeded;
                journal
                    .record(EventKind::ExecutionSucceeded {
                        output: output.clone(),
                    })
                    .await;
                record.output = Some(output);
                tracing::info!(execution_id = %record.id, "execution succeeded");
            }
            Err(failure) if failure.error.is_abort() || token.is_cancelled() => {
                record.status = ExecutionStatus::Aborted;
                record.output = Some(failure.document);
                record.error = Some(ErrorOutput::new(STATES_ABORTED, "execution aborted"));
                journal.record(EventKind::ExecutionAborted).await;
                tracing::info!(execution_id = %record.id, "execution aborted");
            }
            Err(failure) => {
                let error = failure.error.to_error_output();
                record.status = ExecutionStatus::Failed;
                journal
                    .record(EventKind::ExecutionFailed {
                        error: error.error.clone(),
                        cause: error.cause.clone(),
                    })
                    .await;
                tracing::info!(
                    execution_id = %record.id,
                    error = %error.error,
                    cause = %error.cause,
                    "execution failed"
                );
                record.output = Some(failure.document);
                record.error = Some(error);
            }
        }

        if let Err(e) = self.recorder.update(&record).await {
            tracing::warn!(execution_id = %record.id, error = %e, "failed to persist final execution state");
        }
        self.running.remove(&record.id);

        ExecutionResult::from(&record)
    }
}

/// `{definition}-{timestamp}-{suffix}`; the suffix comes from the random
/// tail of the execution id so names generated in the same instant differ.
fn generate_name(definition: &str, id: &Uuid) -> String {
    let simple = id.simple().to_string();
    let suffix = &simple[simple.len() - 6..];
    format!("{definition}-{}-{suffix}", Utc::now().format("%Y%m%dT%H%M%S%3f"))
}

// ---------------------------------------------------------------------------
// Scope execution
// ---------------------------------------------------------------------------

/// Per-scope runtime handles. Branches get a clone with a child token.
struct Run<R: ExecutionRepository> {
    invoker: Arc<BoxTaskInvoker>,
    journal: Journal<R>,
    token: CancellationToken,
    waiters: Arc<AtomicUsize>,
}

impl<R: ExecutionRepository> Run<R> {
    fn with_token(&self, token: CancellationToken) -> Self {
        Self {
            invoker: Arc::clone(&self.invoker),
            journal: self.journal.clone(),
            token,
            waiters: Arc::clone(&self.waiters),
        }
    }

    fn waiting(&self) -> WaitGuard {
        self.waiters.fetch_add(1, Ordering::SeqCst);
        WaitGuard(Arc::clone(&self.waiters))
    }
}

/// Marks the execution `Waiting` for as long as it is held.
struct WaitGuard(Arc<AtomicUsize>);

impl Drop for WaitGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A failure leaving a scope, with the document it left with.
struct ScopeFailure {
    error: ExecutionError,
    document: Value,
}

enum Step {
    Next { state: String, output: Value },
    End(Value),
}

fn run_scope<R: ExecutionRepository + 'static>(
    run: Run<R>,
    definition: Arc<Definition>,
    input: Value,
    mut ctx: ExecutionContext,
) -> BoxFuture<'static, Result<Value, ScopeFailure>> {
    async move {
        let mut current = definition.start_at.clone();
        let mut document = input;

        loop {
            if run.token.is_cancelled() {
                return Err(ScopeFailure {
                    error: ExecutionError::Aborted,
                    document,
                });
            }
            let Some(state) = definition.state(&current) else {
                let error = ExecutionError::Declared {
                    error: STATES_RUNTIME.to_string(),
                    cause: format!("state '{current}' does not exist"),
                };
                return Err(ScopeFailure { error, document });
            };

            ctx.enter_state(&state.name);
            run.journal
                .record(EventKind::StateEntered {
                    state: state.name.clone(),
                    input: document.clone(),
                })
                .await;
            tracing::debug!(
                execution_id = %run.journal.execution_id(),
                scope = %definition.name,
                state = %state.name,
                "entering state"
            );

            let step = match run.step(state, &document, &mut ctx).await {
                Ok(step) => step,
                Err(error) => {
                    tracing::debug!(
                        execution_id = %run.journal.execution_id(),
                        state = %state.name,
                        error = %error,
                        "failure left state"
                    );
                    return Err(ScopeFailure { error, document });
                }
            };

            let (next, output) = match step {
                Step::Next { state, output } => (Some(state), output),
                Step::End(output) => (None, output),
            };
            run.journal
                .record(EventKind::StateExited {
                    state: state.name.clone(),
                    output: output.clone(),
                })
                .await;

            match next {
                Some(next) => {
                    current = next;
                    document = output;
                }
                None => return Ok(output),
            }
        }
    }
    .boxed()
}

impl<R: ExecutionRepository + 'static> Run<R> {
    /// Execute one state, applying its retry and catch policies.
    async fn step(
        &self,
        state: &State,
        document: &Value,
        ctx: &mut ExecutionContext,
    ) -> Result<Step, ExecutionError> {
        let (retry, catch): (&[RetryPolicy], &[CatchRule]) = match &state.kind {
            StateKind::Task(task) => (&task.retry, &task.catch),
            StateKind::Parallel(parallel) => (&parallel.retry, &parallel.catch),
            _ => return self.execute(state, document, ctx).await,
        };

        let mut attempts = vec![0u32; retry.len()];
        loop {
            let error = match self.execute(state, document, ctx).await {
                Ok(step) => return Ok(step),
                Err(error) => error,
            };
            if error.is_abort() || self.token.is_cancelled() {
                return Err(ExecutionError::Aborted);
            }

            match RetryHandler::decide(retry, catch, &mut attempts, &error) {
                RetryDecision::Retry { attempt, delay, .. } => {
                    let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
                    tracing::warn!(
                        execution_id = %self.journal.execution_id(),
                        state = %state.name,
                        error = %error.error_name(),
                        attempt,
                        delay_ms,
                        "retrying state"
                    );
                    self.journal
                        .record(EventKind::RetryScheduled {
                            state: state.name.clone(),
                            error: error.error_name().to_string(),
                            attempt,
                            delay_ms,
                        })
                        .await;
                    {
                        let _waiting = self.waiting();
                        sleep_cancellable(delay, &self.token).await?;
                    }
                    ctx.retry_count += 1;
                }
                RetryDecision::Catch(index) => {
                    let rule = &catch[index];
                    let output = rule
                        .result_path
                        .apply(document, error.to_error_output().to_value())?;
                    self.journal
                        .record(EventKind::CatchMatched {
                            state: state.name.clone(),
                            error: error.error_name().to_string(),
                            next: rule.next.clone(),
                        })
                        .await;
                    return Ok(Step::Next {
                        state: rule.next.clone(),
                        output,
                    });
                }
                RetryDecision::Propagate => return Err(error),
            }
        }
    }

    /// One attempt at a state's behavior.
    async fn execute(
        &self,
        state: &State,
        document: &Value,
        ctx: &ExecutionContext,
    ) -> Result<Step, ExecutionError> {
        let context = ctx.to_value();
        let effective = match &state.input_path {
            Some(path) => path.select(document, &context)?.clone(),
            None => json!({}),
        };

        let output = match &state.kind {
            StateKind::Task(task) => {
                let result = self.invoke(state, task, &effective, &context).await?;
                let selected = select_result(task.result_selector.as_ref(), result, &context)?;
                filter_output(state, task.result_path.apply(document, selected)?, &context)?
            }
            StateKind::Pass(pass) => {
                let result = match (&pass.result, &pass.parameters) {
                    (Some(result), _) => result.clone(),
                    (None, Some(template)) => template.evaluate(&effective, &context)?,
                    (None, None) => effective,
                };
                filter_output(state, pass.result_path.apply(document, result)?, &context)?
            }
            StateKind::Choice(choice) => {
                let next = match first_match(&choice.choices, &effective, &context)? {
                    Some(matched) => matched.next.clone(),
                    None => match &choice.default {
                        Some(default) => default.clone(),
                        None => {
                            return Err(ExecutionError::NoChoiceMatched {
                                state: state.name.clone(),
                            });
                        }
                    },
                };
                self.journal
                    .record(EventKind::ChoiceMatched {
                        state: state.name.clone(),
                        next: next.clone(),
                    })
                    .await;
                return Ok(Step::Next {
                    state: next,
                    output: filter_output(state, effective, &context)?,
                });
            }
            StateKind::Wait(wait) => {
                let duration = resolve_wait(wait, &effective, &context, Utc::now())?;
                let until = chrono::Duration::from_std(duration)
                    .ok()
                    .and_then(|d| Utc::now().checked_add_signed(d))
                    .unwrap_or(DateTime::<Utc>::MAX_UTC);
                self.journal
                    .record(EventKind::WaitStarted {
                        state: state.name.clone(),
                        until,
                    })
                    .await;
                {
                    let _waiting = self.waiting();
                    sleep_cancellable(duration, &self.token).await?;
                }
                filter_output(state, effective, &context)?
            }
            StateKind::Parallel(parallel) => {
                self.parallel(state, parallel, document, effective, ctx).await?
            }
            StateKind::Succeed => filter_output(state, effective, &context)?,
            StateKind::Fail(fail) => return Err(declared_failure(fail, &effective, &context)),
        };

        Ok(match &state.transition {
            Some(Transition::Next(next)) => Step::Next {
                state: next.clone(),
                output,
            },
            _ => Step::End(output),
        })
    }

    async fn invoke(
        &self,
        state: &State,
        task: &TaskState,
        effective: &Value,
        context: &Value,
    ) -> Result<Value, ExecutionError> {
        let resource = match &task.resource {
            Resource::Static(name) => name.clone(),
            Resource::Path(path) => string_at(path, effective, context)?,
        };
        let input = match &task.parameters {
            Some(template) => template.evaluate(effective, context)?,
            None => effective.clone(),
        };

        self.journal
            .record(EventKind::TaskScheduled {
                state: state.name.clone(),
                resource: resource.clone(),
                input: input.clone(),
            })
            .await;
        tracing::debug!(state = %state.name, resource = %resource, "invoking unit");

        let call = AssertUnwindSafe(self.invoker.invoke(&resource, input)).catch_unwind();
        let outcome = tokio::select! {
            biased;
            _ = self.token.cancelled() => return Err(ExecutionError::Aborted),
            outcome = call => outcome,
        };
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(payload) => {
                let error = ExecutionError::panicked(&format!("unit '{resource}'"), payload.as_ref());
                tracing::error!(state = %state.name, resource = %resource, error = %error, "unit panicked");
                self.journal
                    .record(EventKind::TaskFailed {
                        state: state.name.clone(),
                        resource,
                        error: error.error_name().to_string(),
                        cause: error.cause(),
                    })
                    .await;
                return Err(error);
            }
        };

        match outcome {
            Ok(output) => {
                self.journal
                    .record(EventKind::TaskSucceeded {
                        state: state.name.clone(),
                        resource,
                        output: output.clone(),
                    })
                    .await;
                Ok(output)
            }
            Err(TaskFailure { error, cause }) => {
                self.journal
                    .record(EventKind::TaskFailed {
                        state: state.name.clone(),
                        resource: resource.clone(),
                        error: error.clone(),
                        cause: cause.clone(),
                    })
                    .await;
                Err(ExecutionError::TaskExecution {
                    resource,
                    error,
                    cause,
                })
            }
        }
    }

    async fn parallel(
        &self,
        state: &State,
        parallel: &ParallelState,
        document: &Value,
        effective: Value,
        ctx: &ExecutionContext,
    ) -> Result<Value, ExecutionError> {
        let context = ctx.to_value();
        let input = match &parallel.parameters {
            Some(template) => template.evaluate(&effective, &context)?,
            None => effective,
        };

        self.journal
            .record(EventKind::ParallelStarted {
                state: state.name.clone(),
                branches: parallel.branches.len(),
            })
            .await;

        let outcome = run_branches(&parallel.branches, &input, &self.token, |_, branch, branch_input, token| {
            let mut branch_ctx = ctx.clone();
            branch_ctx.state_name = None;
            branch_ctx.entered_time = None;
            branch_ctx.retry_count = 0;
            run_scope(self.with_token(token), branch, branch_input, branch_ctx)
                .map(|result| result.map_err(|failure| failure.error))
        })
        .await;

        let results = match outcome {
            Ok(results) => results,
            Err(error) => {
                if let ExecutionError::ParallelBranch { index, source } = &error {
                    self.journal
                        .record(EventKind::ParallelBranchFailed {
                            state: state.name.clone(),
                            branch: *index,
                            error: source.error_name().to_string(),
                        })
                        .await;
                }
                return Err(error);
            }
        };

        self.journal
            .record(EventKind::ParallelSucceeded {
                state: state.name.clone(),
            })
            .await;

        let selected = select_result(parallel.result_selector.as_ref(), Value::Array(results), &context)?;
        Ok(filter_output(state, parallel.result_path.apply(document, selected)?, &context)?)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn select_result(
    selector: Option<&Template>,
    result: Value,
    context: &Value,
) -> Result<Value, IntrinsicError> {
    match selector {
        Some(template) => template.evaluate(&result, context),
        None => Ok(result),
    }
}

fn filter_output(state: &State, value: Value, context: &Value) -> Result<Value, PathError> {
    match &state.output_path {
        Some(path) if path.is_identity() => Ok(value),
        Some(path) => Ok(path.select(&value, context)?.clone()),
        None => Ok(json!({})),
    }
}

fn string_at(path: &JsonPath, document: &Value, context: &Value) -> Result<String, PathError> {
    let value = path.select(document, context)?;
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| PathError::TypeMismatch {
            path: path.to_string(),
            expected: "a string".to_string(),
            found: describe(value).to_string(),
        })
}

fn declared_failure(fail: &FailState, document: &Value, context: &Value) -> ExecutionError {
    let resolve = |field: &Option<FailField>, default: &str| match field {
        None => Ok(default.to_string()),
        Some(FailField::Literal(text)) => Ok(text.clone()),
        Some(FailField::Path(path)) => string_at(path, document, context),
    };

    let error = match resolve(&fail.error, STATES_FAIL) {
        Ok(error) => error,
        Err(e) => return e.into(),
    };
    let cause = match resolve(&fail.cause, "") {
        Ok(cause) => cause,
        Err(e) => return e.into(),
    };
    ExecutionError::Declared { error, cause }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::memory::InMemoryExecutionRepository;
    use crate::workflow::definition::parse_definition_value;
    use crate::workflow::failure::STATES_NO_CHOICE_MATCHED;
    use crate::workflow::invoker::TaskInvoker;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records every call; `fail:<Name>` units fail with that error name,
    /// `panic` panics and `slow` sleeps for an hour.
    #[derive(Clone, Default)]
    struct Recording {
        calls: Arc<Mutex<Vec<(String, Value)>>>,
    }

    impl TaskInvoker for Recording {
        async fn invoke(&self, resource: &str, input: Value) -> Result<Value, TaskFailure> {
            self.calls
                .lock()
                .unwrap()
                .push((resource.to_string(), input.clone()));
            match resource.strip_prefix("fail:") {
                Some(name) => Err(TaskFailure::new(name, "unit reported failure")),
                None if resource == "panic" => panic!("unit exploded"),
                None if resource == "slow" => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(input)
                }
                None => Ok(json!({"unit": resource, "echo": input})),
            }
        }
    }

    fn interpreter(invoker: Recording) -> Interpreter<InMemoryExecutionRepository> {
        Interpreter::new(
            BoxTaskInvoker::new(invoker),
            InMemoryExecutionRepository::new(),
            EventBus::new(256),
        )
    }

    fn definition(value: Value) -> Arc<Definition> {
        Arc::new(parse_definition_value("test", value).unwrap())
    }

    #[tokio::test]
    async fn test_pass_result_and_result_path() {
        let def = definition(json!({
            "StartAt": "Seed",
            "States": {
                "Seed": {"Type": "Pass", "Result": {"ready": true}, "ResultPath": "$.status", "Next": "Done"},
                "Done": {"Type": "Succeed"}
            }
        }));
        let result = interpreter(Recording::default())
            .execute(def, json!({"id": 7}), None)
            .await
            .unwrap();
        assert_eq!(result.status, ExecutionStatus::Succeeded);
        assert_eq!(result.output, json!({"id": 7, "status": {"ready": true}}));
        assert!(result.name.starts_with("test-"));
    }

    #[tokio::test]
    async fn test_null_input_and_output_paths() {
        let invoker = Recording::default();
        let def = definition(json!({
            "StartAt": "T",
            "States": {
                "T": {"Type": "Task", "Resource": "unit", "InputPath": null, "ResultPath": null, "Next": "Q"},
                "Q": {"Type": "Pass", "OutputPath": null, "End": true}
            }
        }));
        let result = interpreter(invoker.clone())
            .execute(def, json!({"secret": 1}), None)
            .await
            .unwrap();
        assert_eq!(invoker.calls.lock().unwrap()[0].1, json!({}));
        assert_eq!(result.output, json!({}));
    }

    #[tokio::test]
    async fn test_task_parameters_selector_and_output_path() {
        let invoker = Recording::default();
        let def = definition(json!({
            "StartAt": "T",
            "States": {
                "T": {
                    "Type": "Task",
                    "Resource": "report",
                    "InputPath": "$.job",
                    "Parameters": {"date.$": "$.date", "kind": "daily", "run.$": "$$.Execution.Name"},
                    "ResultSelector": {"unit.$": "$.unit"},
                    "ResultPath": "$.job.result",
                    "OutputPath": "$.job",
                    "End": true
                }
            }
        }));
        let result = interpreter(invoker.clone())
            .execute(def, json!({"job": {"date": "2024-01-02"}}), Some("nightly-1".into()))
            .await
            .unwrap();

        let calls = invoker.calls.lock().unwrap();
        assert_eq!(
            calls[0].1,
            json!({"date": "2024-01-02", "kind": "daily", "run": "nightly-1"})
        );
        assert_eq!(
            result.output,
            json!({"date": "2024-01-02", "result": {"unit": "report"}})
        );
    }

    #[tokio::test]
    async fn test_resource_path_dispatch() {
        let invoker = Recording::default();
        let def = definition(json!({
            "StartAt": "T",
            "States": {"T": {"Type": "Task", "ResourcePath": "$.unit", "ResultPath": "$.out", "End": true}}
        }));
        let result = interpreter(invoker.clone())
            .execute(def, json!({"unit": "dynamic"}), None)
            .await
            .unwrap();
        assert_eq!(invoker.calls.lock().unwrap()[0].0, "dynamic");
        assert_eq!(result.output["out"]["unit"], "dynamic");

        let def = definition(json!({
            "StartAt": "T",
            "States": {"T": {"Type": "Task", "ResourcePath": "$.unit", "End": true}}
        }));
        let result = interpreter(Recording::default())
            .execute(def, json!({"unit": 5}), None)
            .await
            .unwrap();
        assert_eq!(result.status, ExecutionStatus::Failed);
        assert_eq!(result.error.unwrap().error, "States.PathResolutionError");
    }

    #[tokio::test]
    async fn test_missing_input_path_fails_run() {
        let def = definition(json!({
            "StartAt": "T",
            "States": {"T": {"Type": "Pass", "InputPath": "$.post", "End": true}}
        }));
        let result = interpreter(Recording::default())
            .execute(def, json!({"other": 1}), None)
            .await
            .unwrap();
        assert_eq!(result.status, ExecutionStatus::Failed);
        assert_eq!(result.error.unwrap().error, "States.PathResolutionError");
        assert_eq!(result.output, json!({"other": 1}));
    }

    #[tokio::test]
    async fn test_no_choice_matched() {
        let def = definition(json!({
            "StartAt": "C",
            "States": {
                "C": {"Type": "Choice", "Choices": [{"Variable": "$.n", "NumericGreaterThan": 10, "Next": "D"}]},
                "D": {"Type": "Succeed"}
            }
        }));
        let result = interpreter(Recording::default())
            .execute(def, json!({"n": 1}), None)
            .await
            .unwrap();
        assert_eq!(result.status, ExecutionStatus::Failed);
        assert_eq!(result.error.unwrap().error, STATES_NO_CHOICE_MATCHED);
    }

    #[tokio::test]
    async fn test_fail_state_paths() {
        let def = definition(json!({
            "StartAt": "F",
            "States": {"F": {"Type": "Fail", "ErrorPath": "$.code", "CausePath": "$.why"}}
        }));
        let result = interpreter(Recording::default())
            .execute(def, json!({"code": "Report.Missing", "why": "no file"}), None)
            .await
            .unwrap();
        let error = result.error.unwrap();
        assert_eq!(error.error, "Report.Missing");
        assert_eq!(error.cause, "no file");
    }

    #[tokio::test]
    async fn test_fail_state_defaults() {
        let def = definition(json!({"StartAt": "F", "States": {"F": {"Type": "Fail"}}}));
        let result = interpreter(Recording::default())
            .execute(def, json!({}), None)
            .await
            .unwrap();
        assert_eq!(result.error.unwrap().error, STATES_FAIL);
    }

    #[tokio::test]
    async fn test_catch_injects_error_document() {
        let def = definition(json!({
            "StartAt": "T",
            "States": {
                "T": {
                    "Type": "Task",
                    "Resource": "fail:Unit.Crashed",
                    "Catch": [{"ErrorEquals": ["States.TaskFailed"], "Next": "Recover", "ResultPath": "$.error"}],
                    "End": true
                },
                "Recover": {"Type": "Succeed"}
            }
        }));
        let result = interpreter(Recording::default())
            .execute(def, json!({"id": 1}), None)
            .await
            .unwrap();
        assert_eq!(result.status, ExecutionStatus::Succeeded);
        assert_eq!(
            result.output,
            json!({"id": 1, "error": {"Error": "Unit.Crashed", "Cause": "unit reported failure"}})
        );
    }

    #[tokio::test]
    async fn test_context_retry_count_visible_to_parameters() {
        let invoker = Recording::default();
        let def = definition(json!({
            "StartAt": "T",
            "States": {
                "T": {
                    "Type": "Task",
                    "Resource": "fail:Flaky",
                    "Parameters": {"retry.$": "$$.State.RetryCount", "state.$": "$$.State.Name"},
                    "Retry": [{"ErrorEquals": ["Flaky"], "IntervalSeconds": 0.001, "MaxAttempts": 2}],
                    "End": true
                }
            }
        }));
        let result = interpreter(invoker.clone())
            .execute(def, json!({}), None)
            .await
            .unwrap();
        assert_eq!(result.status, ExecutionStatus::Failed);
        let calls = invoker.calls.lock().unwrap();
        let retries: Vec<Value> = calls.iter().map(|(_, input)| input["retry"].clone()).collect();
        assert_eq!(retries, vec![json!(0), json!(1), json!(2)]);
        assert_eq!(calls[0].1["state"], "T");
    }

    #[tokio::test]
    async fn test_history_is_recorded_in_order() {
        let interp = interpreter(Recording::default());
        let def = definition(json!({
            "StartAt": "T",
            "States": {
                "T": {"Type": "Task", "Resource": "unit", "Next": "C"},
                "C": {"Type": "Choice", "Choices": [{"Variable": "$.unit", "StringEquals": "unit", "Next": "D"}]},
                "D": {"Type": "Succeed"}
            }
        }));
        let result = interp.execute(def, json!({}), None).await.unwrap();

        let events = interp.repo().list_events(&result.id).await.unwrap();
        let labels: Vec<&str> = events.iter().map(|e| e.kind.label()).collect();
        assert_eq!(
            labels,
            vec![
                "execution_started",
                "state_entered",
                "task_scheduled",
                "task_succeeded",
                "state_exited",
                "state_entered",
                "choice_matched",
                "state_exited",
                "state_entered",
                "state_exited",
                "execution_succeeded",
            ]
        );
        let sequences: Vec<u64> = events.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, (1..=11).collect::<Vec<u64>>());

        let stored = interp.repo().get_execution(&result.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::Succeeded);
        assert!(stored.stopped_at.is_some());
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let interp = interpreter(Recording::default());
        let def = definition(json!({"StartAt": "S", "States": {"S": {"Type": "Succeed"}}}));
        interp
            .execute(Arc::clone(&def), json!({}), Some("once".into()))
            .await
            .unwrap();
        let err = interp
            .execute(def, json!({}), Some("once".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, InterpreterError::NameConflict(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_interrupts_wait() {
        let interp = interpreter(Recording::default());
        let def = definition(json!({
            "StartAt": "W",
            "States": {"W": {"Type": "Wait", "Seconds": 3600, "End": true}}
        }));
        let record = interp.start(def, json!({"n": 1}), None).await.unwrap();

        // Let the execution reach the wait.
        while interp.live_status(&record.id) != Some(ExecutionStatus::Waiting) {
            tokio::task::yield_now().await;
        }
        interp.abort(&record.id).unwrap();

        while interp.live_status(&record.id).is_some() {
            tokio::task::yield_now().await;
        }
        let stored = interp.repo().get_execution(&record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::Aborted);
        assert_eq!(stored.output, Some(json!({"n": 1})));

        let events = interp.repo().list_events(&record.id).await.unwrap();
        let aborted = events
            .iter()
            .filter(|e| matches!(e.kind, EventKind::ExecutionAborted))
            .count();
        assert_eq!(aborted, 1);

        assert!(matches!(
            interp.abort(&record.id),
            Err(InterpreterError::NotRunning(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_interrupts_task_call() {
        let interp = interpreter(Recording::default());
        let def = definition(json!({
            "StartAt": "T",
            "States": {"T": {"Type": "Task", "Resource": "slow", "End": true}}
        }));
        let record = interp.start(def, json!({}), None).await.unwrap();

        let mut events = interp.bus().subscribe_execution(record.id);
        while let Some(event) = events.next().await {
            if matches!(event.kind, EventKind::TaskScheduled { .. }) {
                break;
            }
        }
        interp.abort(&record.id).unwrap();

        while let Some(event) = events.next().await {
            if matches!(event.kind, EventKind::ExecutionAborted) {
                break;
            }
        }
        while interp.live_status(&record.id).is_some() {
            tokio::task::yield_now().await;
        }
        let stored = interp.repo().get_execution(&record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::Aborted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_all_stops_every_run() {
        let interp = interpreter(Recording::default());
        let def = definition(json!({
            "StartAt": "W",
            "States": {"W": {"Type": "Wait", "Seconds": 3600, "End": true}}
        }));
        let first = interp.start(Arc::clone(&def), json!({}), None).await.unwrap();
        let second = interp.start(def, json!({}), None).await.unwrap();
        assert_eq!(interp.running_count(), 2);

        assert_eq!(interp.abort_all(), 2);
        while interp.running_count() > 0 {
            tokio::task::yield_now().await;
        }
        for id in [first.id, second.id] {
            let stored = interp.repo().get_execution(&id).await.unwrap().unwrap();
            assert_eq!(stored.status, ExecutionStatus::Aborted);
        }
        assert_eq!(interp.abort_all(), 0);
    }

    #[tokio::test]
    async fn test_unit_panic_is_caught_as_runtime_error() {
        let interp = interpreter(Recording::default());
        let def = definition(json!({
            "StartAt": "Explode",
            "States": {
                "Explode": {
                    "Type": "Task",
                    "Resource": "panic",
                    "Catch": [{"ErrorEquals": ["States.ALL"], "ResultPath": "$.error", "Next": "Recovered"}],
                    "End": true
                },
                "Recovered": {"Type": "Pass", "End": true}
            }
        }));
        let record = interp.start(def, json!({"n": 1}), None).await.unwrap();

        while interp.live_status(&record.id).is_some() {
            tokio::task::yield_now().await;
        }
        assert_eq!(interp.running_count(), 0);

        let stored = interp.repo().get_execution(&record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::Succeeded);
        assert_eq!(
            stored.output,
            Some(json!({
                "n": 1,
                "error": {"Error": "States.Runtime", "Cause": "unit 'panic' panicked: unit exploded"}
            }))
        );

        let events = interp.repo().list_events(&record.id).await.unwrap();
        assert!(events.iter().any(|e| matches!(
            &e.kind,
            EventKind::TaskFailed { error, .. } if error == STATES_RUNTIME
        )));
    }

    #[tokio::test]
    async fn test_uncaught_unit_panic_fails_run() {
        let interp = interpreter(Recording::default());
        let def = definition(json!({
            "StartAt": "Explode",
            "States": {"Explode": {"Type": "Task", "Resource": "panic", "End": true}}
        }));
        let result = interp.execute(def, json!({}), None).await.unwrap();
        assert_eq!(result.status, ExecutionStatus::Failed);
        assert_eq!(result.error.unwrap().error, STATES_RUNTIME);
        assert_eq!(interp.running_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_started_record_is_pending_until_driven() {
        let interp = interpreter(Recording::default());
        let def = definition(json!({
            "StartAt": "W",
            "States": {"W": {"Type": "Wait", "Seconds": 3600, "End": true}}
        }));
        let record = interp.start(def, json!({}), None).await.unwrap();
        assert_eq!(record.status, ExecutionStatus::Pending);

        while interp.live_status(&record.id) != Some(ExecutionStatus::Waiting) {
            tokio::task::yield_now().await;
        }
        let stored = interp.repo().get_execution(&record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::Running);

        interp.abort(&record.id).unwrap();
        while interp.live_status(&record.id).is_some() {
            tokio::task::yield_now().await;
        }
    }
}
