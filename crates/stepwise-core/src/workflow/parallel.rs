//! Parallel Coordinator: fan out branches, join results in declaration order.
//!
//! Branches run concurrently via `tokio::task::JoinSet`. Each one receives its
//! own deep copy of the input and a child cancellation token. Results land in
//! a slot per branch index, so the output array never depends on completion
//! order. The first failure (in completion order) cancels and aborts every
//! sibling still running.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use serde_json::Value;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::failure::ExecutionError;
use super::model::Definition;

/// Run `branches` concurrently with `run_branch` and collect their outputs.
///
/// `run_branch` receives the branch index, the branch definition, a copy of
/// `input`, and a token that is cancelled when a sibling fails or `parent`
/// is cancelled. A branch that panics fails with `States.Runtime`.
pub async fn run_branches<F, Fut>(
    branches: &[Arc<Definition>],
    input: &Value,
    parent: &CancellationToken,
    run_branch: F,
) -> Result<Vec<Value>, ExecutionError>
where
    F: Fn(usize, Arc<Definition>, Value, CancellationToken) -> Fut,
    Fut: Future<Output = Result<Value, ExecutionError>> + Send + 'static,
{
    let group = parent.child_token();
    let mut join_set = JoinSet::new();
    let mut indices = HashMap::with_capacity(branches.len());

    for (index, branch) in branches.iter().enumerate() {
        let fut = run_branch(index, Arc::clone(branch), input.clone(), group.child_token());
        let handle = join_set.spawn(fut);
        indices.insert(handle.id(), index);
    }

    let mut slots: Vec<Option<Value>> = vec![None; branches.len()];

    while let Some(joined) = join_set.join_next_with_id().await {
        let failure = match joined {
            Ok((id, Ok(output))) => {
                if let Some(&index) = indices.get(&id) {
                    slots[index] = Some(output);
                }
                continue;
            }
            Ok((id, Err(error))) => (indices.get(&id).copied(), error),
            Err(join_err) => {
                let index = indices.get(&join_err.id()).copied();
                tracing::error!(branch = ?index, error = %join_err, "parallel branch task failed to join");
                let context = format!("branch {}", index.unwrap_or_default());
                let error = match join_err.try_into_panic() {
                    Ok(payload) => ExecutionError::panicked(&context, payload.as_ref()),
                    Err(join_err) => ExecutionError::panicked(&context, &join_err.to_string()),
                };
                (index, error)
            }
        };

        group.cancel();
        join_set.abort_all();

        let (index, error) = failure;
        if parent.is_cancelled() || error.is_abort() {
            return Err(ExecutionError::Aborted);
        }
        return Err(ExecutionError::ParallelBranch {
            // Every spawned task id was recorded above.
            index: index.unwrap_or_default(),
            source: Box::new(error),
        });
    }

    // Every slot is filled once the set drains without a failure.
    Ok(slots.into_iter().map(|slot| slot.unwrap_or(Value::Null)).collect())
}
