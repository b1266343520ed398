//! Compiled, immutable definition model.
//!
//! Produced by [`super::definition::compile_definition`]; every path,
//! template, choice rule and transition target in here has already been
//! validated, so the interpreter never has to re-check shape at runtime.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset};
use serde_json::Value;

use stepwise_types::definition::{DefinitionDocument, StateType};

use super::choice::Choice;
use super::path::{JsonPath, PathError};
use super::retry::{CatchRule, RetryPolicy};
use super::template::Template;

/// A validated workflow graph (or `Parallel` branch).
#[derive(Debug, Clone)]
pub struct Definition {
    /// Human-readable name (file stem for loaded definitions).
    pub name: String,
    pub comment: Option<String>,
    pub start_at: String,
    pub states: BTreeMap<String, State>,
    /// The declaration this was compiled from.
    pub document: DefinitionDocument,
}

impl Definition {
    pub fn state(&self, name: &str) -> Option<&State> {
        self.states.get(name)
    }
}

#[derive(Debug, Clone)]
pub struct State {
    pub name: String,
    /// `None` when declared `null`: the state sees `{}`.
    pub input_path: Option<JsonPath>,
    /// `None` when declared `null`: the state emits `{}`.
    pub output_path: Option<JsonPath>,
    /// Absent for `Choice`, `Succeed` and `Fail`.
    pub transition: Option<Transition>,
    pub kind: StateKind,
}

impl State {
    pub fn state_type(&self) -> StateType {
        match &self.kind {
            StateKind::Task(_) => StateType::Task,
            StateKind::Pass(_) => StateType::Pass,
            StateKind::Choice(_) => StateType::Choice,
            StateKind::Wait(_) => StateType::Wait,
            StateKind::Parallel(_) => StateType::Parallel,
            StateKind::Succeed => StateType::Succeed,
            StateKind::Fail(_) => StateType::Fail,
        }
    }

    /// All state names this state can move to.
    pub fn targets(&self) -> Vec<&str> {
        let mut out = Vec::new();
        if let Some(Transition::Next(next)) = &self.transition {
            out.push(next.as_str());
        }
        match &self.kind {
            StateKind::Choice(choice) => {
                out.extend(choice.choices.iter().map(|c| c.next.as_str()));
                if let Some(default) = &choice.default {
                    out.push(default.as_str());
                }
            }
            StateKind::Task(task) => out.extend(task.catch.iter().map(|c| c.next.as_str())),
            StateKind::Parallel(parallel) => {
                out.extend(parallel.catch.iter().map(|c| c.next.as_str()))
            }
            _ => {}
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Next(String),
    End,
}

/// Where a state's result is merged into its input.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultPath {
    /// Declared `null`: keep the input, drop the result.
    Discard,
    At(JsonPath),
}

impl ResultPath {
    pub fn apply(&self, input: &Value, result: Value) -> Result<Value, PathError> {
        match self {
            ResultPath::Discard => Ok(input.clone()),
            ResultPath::At(path) if path.is_identity() => Ok(result),
            ResultPath::At(path) => path.inject(input.clone(), result),
        }
    }
}

impl Default for ResultPath {
    fn default() -> Self {
        ResultPath::At(JsonPath::identity())
    }
}

#[derive(Debug, Clone)]
pub enum StateKind {
    Task(TaskState),
    Pass(PassState),
    Choice(ChoiceState),
    Wait(WaitState),
    Parallel(ParallelState),
    Succeed,
    Fail(FailState),
}

/// Unit identity, fixed or computed from the state input.
#[derive(Debug, Clone, PartialEq)]
pub enum Resource {
    Static(String),
    Path(JsonPath),
}

#[derive(Debug, Clone)]
pub struct TaskState {
    pub resource: Resource,
    pub parameters: Option<Template>,
    pub result_selector: Option<Template>,
    pub result_path: ResultPath,
    pub retry: Vec<RetryPolicy>,
    pub catch: Vec<CatchRule>,
}

#[derive(Debug, Clone)]
pub struct PassState {
    pub result: Option<Value>,
    pub parameters: Option<Template>,
    pub result_path: ResultPath,
}

#[derive(Debug, Clone)]
pub struct ChoiceState {
    pub choices: Vec<Choice>,
    pub default: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WaitState {
    Seconds(f64),
    SecondsPath(JsonPath),
    Timestamp(DateTime<FixedOffset>),
    TimestampPath(JsonPath),
}

#[derive(Debug, Clone)]
pub struct ParallelState {
    pub branches: Vec<Arc<Definition>>,
    pub parameters: Option<Template>,
    pub result_selector: Option<Template>,
    pub result_path: ResultPath,
    pub retry: Vec<RetryPolicy>,
    pub catch: Vec<CatchRule>,
}

/// A literal or path-valued `Error`/`Cause`.
#[derive(Debug, Clone, PartialEq)]
pub enum FailField {
    Literal(String),
    Path(JsonPath),
}

#[derive(Debug, Clone, Default)]
pub struct FailState {
    pub error: Option<FailField>,
    pub cause: Option<FailField>,
}
