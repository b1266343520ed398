//! Definition parsing, validation, and filesystem operations.
//!
//! Turns a JSON declaration into the immutable [`Definition`] graph. Every
//! structural rule is enforced here so that a definition which loads can
//! only fail at runtime because of its data, never because of its shape:
//! unknown state types, dangling transitions, malformed paths and templates,
//! and misplaced fields are all load-time errors.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::DateTime;
use serde_json::Value;
use thiserror::Error;

use stepwise_types::definition::{
    CatcherDocument, DefinitionDocument, RetrierDocument, StateDocument, StateType,
};

use super::choice::Choice;
use super::failure::STATES_ALL;
use super::graph;
use super::model::{
    ChoiceState, Definition, FailField, FailState, ParallelState, PassState, Resource, ResultPath,
    State, StateKind, TaskState, Transition, WaitState,
};
use super::path::{JsonPath, PathRoot};
use super::retry::{CatchRule, ErrorMatcher, RetryPolicy};
use super::template::Template;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur while loading a definition. Never retried or caught.
#[derive(Debug, Error)]
pub enum DefinitionError {
    /// JSON parse failure, including unknown state types and unknown fields.
    #[error("parse error: {0}")]
    Parse(String),

    /// Structural validation failure.
    #[error("validation error: {0}")]
    Validation(String),

    /// Filesystem I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse and compile a JSON string.
pub fn parse_definition_json(name: &str, json: &str) -> Result<Definition, DefinitionError> {
    let doc: DefinitionDocument =
        serde_json::from_str(json).map_err(|e| DefinitionError::Parse(e.to_string()))?;
    compile_definition(name, doc)
}

/// Parse and compile an already-decoded JSON value.
pub fn parse_definition_value(name: &str, value: Value) -> Result<Definition, DefinitionError> {
    let doc: DefinitionDocument =
        serde_json::from_value(value).map_err(|e| DefinitionError::Parse(e.to_string()))?;
    compile_definition(name, doc)
}

/// Validate a document and build the executable graph.
pub fn compile_definition(name: &str, doc: DefinitionDocument) -> Result<Definition, DefinitionError> {
    let definition = compile_scope(name, &doc)?;

    let report = graph::analyze(&definition);
    for state in &report.unreachable {
        tracing::warn!(definition = name, state = %state, "state is unreachable from StartAt");
    }

    Ok(definition)
}

fn compile_scope(scope: &str, doc: &DefinitionDocument) -> Result<Definition, DefinitionError> {
    if doc.states.is_empty() {
        return Err(DefinitionError::Validation(format!(
            "{scope}: definition must declare at least one state"
        )));
    }
    if !doc.states.contains_key(&doc.start_at) {
        return Err(DefinitionError::Validation(format!(
            "{scope}: StartAt '{}' does not name a state",
            doc.start_at
        )));
    }

    let mut states = BTreeMap::new();
    for (name, state_doc) in &doc.states {
        let state = StateCompiler {
            scope,
            name,
            doc: state_doc,
            siblings: &doc.states,
        }
        .compile()?;
        states.insert(name.clone(), state);
    }

    Ok(Definition {
        name: scope.to_string(),
        comment: doc.comment.clone(),
        start_at: doc.start_at.clone(),
        states,
        document: doc.clone(),
    })
}

// ---------------------------------------------------------------------------
// State compilation
// ---------------------------------------------------------------------------

struct StateCompiler<'a> {
    scope: &'a str,
    name: &'a str,
    doc: &'a StateDocument,
    siblings: &'a BTreeMap<String, StateDocument>,
}

impl StateCompiler<'_> {
    fn error(&self, message: impl AsRef<str>) -> DefinitionError {
        DefinitionError::Validation(format!(
            "{}: state '{}': {}",
            self.scope,
            self.name,
            message.as_ref()
        ))
    }

    fn compile(&self) -> Result<State, DefinitionError> {
        self.check_fields()?;
        let state_type = self.doc.state_type;

        let transition = match state_type {
            StateType::Choice | StateType::Succeed | StateType::Fail => None,
            _ => Some(self.transition()?),
        };

        let kind = match state_type {
            StateType::Task => StateKind::Task(self.task()?),
            StateType::Pass => StateKind::Pass(PassState {
                result: self.doc.result.clone(),
                parameters: self.template("Parameters", self.doc.parameters.as_ref())?,
                result_path: self.result_path("ResultPath", self.doc.result_path.as_ref())?,
            }),
            StateType::Choice => StateKind::Choice(self.choice()?),
            StateType::Wait => StateKind::Wait(self.wait()?),
            StateType::Parallel => StateKind::Parallel(self.parallel()?),
            StateType::Succeed => StateKind::Succeed,
            StateType::Fail => StateKind::Fail(self.fail()?),
        };

        Ok(State {
            name: self.name.to_string(),
            input_path: self.filter_path("InputPath", self.doc.input_path.as_ref())?,
            output_path: self.filter_path("OutputPath", self.doc.output_path.as_ref())?,
            transition,
            kind,
        })
    }

    /// Reject fields that do not apply to this state type.
    fn check_fields(&self) -> Result<(), DefinitionError> {
        let d = self.doc;
        let present = [
            ("Next", d.next.is_some()),
            ("End", d.end.is_some()),
            ("InputPath", d.input_path.is_some()),
            ("OutputPath", d.output_path.is_some()),
            ("ResultPath", d.result_path.is_some()),
            ("Parameters", d.parameters.is_some()),
            ("ResultSelector", d.result_selector.is_some()),
            ("Resource", d.resource.is_some()),
            ("ResourcePath", d.resource_path.is_some()),
            ("Retry", d.retry.is_some()),
            ("Catch", d.catch.is_some()),
            ("Result", d.result.is_some()),
            ("Choices", d.choices.is_some()),
            ("Default", d.default.is_some()),
            ("Seconds", d.seconds.is_some()),
            ("SecondsPath", d.seconds_path.is_some()),
            ("Timestamp", d.timestamp.is_some()),
            ("TimestampPath", d.timestamp_path.is_some()),
            ("Branches", d.branches.is_some()),
            ("Error", d.error.is_some()),
            ("ErrorPath", d.error_path.is_some()),
            ("Cause", d.cause.is_some()),
            ("CausePath", d.cause_path.is_some()),
        ];

        let allowed: &[&str] = match d.state_type {
            StateType::Task => &[
                "Next", "End", "InputPath", "OutputPath", "ResultPath", "Parameters",
                "ResultSelector", "Resource", "ResourcePath", "Retry", "Catch",
            ],
            StateType::Pass => &[
                "Next", "End", "InputPath", "OutputPath", "ResultPath", "Parameters", "Result",
            ],
            StateType::Choice => &["InputPath", "OutputPath", "Choices", "Default"],
            StateType::Wait => &[
                "Next", "End", "InputPath", "OutputPath", "Seconds", "SecondsPath", "Timestamp",
                "TimestampPath",
            ],
            StateType::Parallel => &[
                "Next", "End", "InputPath", "OutputPath", "ResultPath", "Parameters",
                "ResultSelector", "Branches", "Retry", "Catch",
            ],
            StateType::Succeed => &["InputPath", "OutputPath"],
            StateType::Fail => &["Error", "ErrorPath", "Cause", "CausePath"],
        };

        for (field, is_present) in present {
            if is_present && !allowed.contains(&field) {
                return Err(self.error(format!(
                    "field '{field}' is not allowed in a {} state",
                    d.state_type
                )));
            }
        }
        Ok(())
    }

    fn transition(&self) -> Result<Transition, DefinitionError> {
        match (&self.doc.next, self.doc.end) {
            (Some(_), Some(true)) => Err(self.error("'Next' and 'End' are mutually exclusive")),
            (Some(next), _) => {
                self.check_target("Next", next)?;
                Ok(Transition::Next(next.clone()))
            }
            (None, Some(true)) => Ok(Transition::End),
            (None, _) => Err(self.error("must declare either 'Next' or 'End: true'")),
        }
    }

    fn check_target(&self, field: &str, target: &str) -> Result<(), DefinitionError> {
        if self.siblings.contains_key(target) {
            Ok(())
        } else {
            Err(self.error(format!("{field} target '{target}' does not exist")))
        }
    }

    fn path(&self, field: &str, source: &str) -> Result<JsonPath, DefinitionError> {
        JsonPath::parse(source).map_err(|e| self.error(format!("{field}: {e}")))
    }

    /// `InputPath`/`OutputPath`: absent means `$`, null means `None`.
    fn filter_path(
        &self,
        field: &str,
        declared: Option<&Option<String>>,
    ) -> Result<Option<JsonPath>, DefinitionError> {
        match declared {
            None => Ok(Some(JsonPath::identity())),
            Some(None) => Ok(None),
            Some(Some(source)) => self.path(field, source).map(Some),
        }
    }

    fn result_path(
        &self,
        field: &str,
        declared: Option<&Option<String>>,
    ) -> Result<ResultPath, DefinitionError> {
        match declared {
            None => Ok(ResultPath::default()),
            Some(None) => Ok(ResultPath::Discard),
            Some(Some(source)) => {
                let path = self.path(field, source)?;
                if path.root() == PathRoot::Context {
                    return Err(self.error(format!("{field} must not address the context object")));
                }
                if path.has_negative_index() {
                    return Err(self.error(format!("{field} must not use negative indices")));
                }
                Ok(ResultPath::At(path))
            }
        }
    }

    fn template(&self, field: &str, value: Option<&Value>) -> Result<Option<Template>, DefinitionError> {
        value
            .map(Template::compile)
            .transpose()
            .map_err(|e| self.error(format!("{field}: {e}")))
    }

    fn task(&self) -> Result<TaskState, DefinitionError> {
        let resource = match (&self.doc.resource, &self.doc.resource_path) {
            (Some(_), Some(_)) => {
                return Err(self.error("'Resource' and 'ResourcePath' are mutually exclusive"));
            }
            (Some(name), None) if name.trim().is_empty() => {
                return Err(self.error("'Resource' must not be empty"));
            }
            (Some(name), None) => Resource::Static(name.clone()),
            (None, Some(path)) => Resource::Path(self.path("ResourcePath", path)?),
            (None, None) => return Err(self.error("must declare 'Resource' or 'ResourcePath'")),
        };

        Ok(TaskState {
            resource,
            parameters: self.template("Parameters", self.doc.parameters.as_ref())?,
            result_selector: self.template("ResultSelector", self.doc.result_selector.as_ref())?,
            result_path: self.result_path("ResultPath", self.doc.result_path.as_ref())?,
            retry: self.retriers()?,
            catch: self.catchers()?,
        })
    }

    fn choice(&self) -> Result<ChoiceState, DefinitionError> {
        let docs = match &self.doc.choices {
            Some(docs) if !docs.is_empty() => docs,
            _ => return Err(self.error("'Choices' must contain at least one rule")),
        };

        let mut choices = Vec::with_capacity(docs.len());
        for (index, doc) in docs.iter().enumerate() {
            let choice =
                Choice::compile(doc).map_err(|e| self.error(format!("Choices[{index}]: {e}")))?;
            self.check_target(&format!("Choices[{index}].Next"), &choice.next)?;
            choices.push(choice);
        }

        if let Some(default) = &self.doc.default {
            self.check_target("Default", default)?;
        }

        Ok(ChoiceState {
            choices,
            default: self.doc.default.clone(),
        })
    }

    fn wait(&self) -> Result<WaitState, DefinitionError> {
        let d = self.doc;
        let declared = [
            d.seconds.is_some(),
            d.seconds_path.is_some(),
            d.timestamp.is_some(),
            d.timestamp_path.is_some(),
        ]
        .iter()
        .filter(|present| **present)
        .count();
        if declared != 1 {
            return Err(self.error(
                "exactly one of 'Seconds', 'SecondsPath', 'Timestamp', 'TimestampPath' is required",
            ));
        }

        if let Some(seconds) = d.seconds {
            if !seconds.is_finite() || seconds < 0.0 {
                return Err(self.error("'Seconds' must be a non-negative number"));
            }
            return Ok(WaitState::Seconds(seconds));
        }
        if let Some(path) = &d.seconds_path {
            return Ok(WaitState::SecondsPath(self.path("SecondsPath", path)?));
        }
        if let Some(timestamp) = &d.timestamp {
            let parsed = DateTime::parse_from_rfc3339(timestamp)
                .map_err(|e| self.error(format!("'Timestamp' is not RFC 3339: {e}")))?;
            return Ok(WaitState::Timestamp(parsed));
        }
        match &d.timestamp_path {
            Some(path) => Ok(WaitState::TimestampPath(self.path("TimestampPath", path)?)),
            None => Err(self.error("missing wait duration")),
        }
    }

    fn parallel(&self) -> Result<ParallelState, DefinitionError> {
        let docs = match &self.doc.branches {
            Some(docs) if !docs.is_empty() => docs,
            _ => return Err(self.error("'Branches' must contain at least one branch")),
        };

        let mut branches = Vec::with_capacity(docs.len());
        for (index, branch) in docs.iter().enumerate() {
            let scope = format!("{}/{}[{index}]", self.scope, self.name);
            branches.push(Arc::new(compile_scope(&scope, branch)?));
        }

        Ok(ParallelState {
            branches,
            parameters: self.template("Parameters", self.doc.parameters.as_ref())?,
            result_selector: self.template("ResultSelector", self.doc.result_selector.as_ref())?,
            result_path: self.result_path("ResultPath", self.doc.result_path.as_ref())?,
            retry: self.retriers()?,
            catch: self.catchers()?,
        })
    }

    fn fail(&self) -> Result<FailState, DefinitionError> {
        let field = |literal: &Option<String>, path: &Option<String>, label: &str| {
            match (literal, path) {
                (Some(_), Some(_)) => Err(self.error(format!(
                    "'{label}' and '{label}Path' are mutually exclusive"
                ))),
                (Some(text), None) => Ok(Some(FailField::Literal(text.clone()))),
                (None, Some(path)) => self
                    .path(&format!("{label}Path"), path)
                    .map(|p| Some(FailField::Path(p))),
                (None, None) => Ok(None),
            }
        };

        Ok(FailState {
            error: field(&self.doc.error, &self.doc.error_path, "Error")?,
            cause: field(&self.doc.cause, &self.doc.cause_path, "Cause")?,
        })
    }

    fn error_matchers(
        &self,
        field: &str,
        names: &[String],
        is_last: bool,
    ) -> Result<Vec<ErrorMatcher>, DefinitionError> {
        if names.is_empty() {
            return Err(self.error(format!("{field}: 'ErrorEquals' must not be empty")));
        }
        if names.iter().any(|n| n == STATES_ALL) {
            if names.len() > 1 {
                return Err(self.error(format!(
                    "{field}: '{STATES_ALL}' must appear alone in 'ErrorEquals'"
                )));
            }
            if !is_last {
                return Err(self.error(format!(
                    "{field}: '{STATES_ALL}' must be in the last entry"
                )));
            }
        }
        Ok(names.iter().map(|n| ErrorMatcher::parse(n)).collect())
    }

    fn retriers(&self) -> Result<Vec<RetryPolicy>, DefinitionError> {
        let Some(docs) = &self.doc.retry else {
            return Ok(Vec::new());
        };
        docs.iter()
            .enumerate()
            .map(|(index, doc)| self.retrier(index, doc, index + 1 == docs.len()))
            .collect()
    }

    fn retrier(&self, index: usize, doc: &RetrierDocument, is_last: bool) -> Result<RetryPolicy, DefinitionError> {
        let field = format!("Retry[{index}]");
        let error_equals = self.error_matchers(&field, &doc.error_equals, is_last)?;

        let interval_seconds = doc
            .interval_seconds
            .unwrap_or(RetryPolicy::DEFAULT_INTERVAL_SECONDS);
        if !interval_seconds.is_finite() || interval_seconds <= 0.0 {
            return Err(self.error(format!("{field}: 'IntervalSeconds' must be positive")));
        }

        let backoff_rate = doc.backoff_rate.unwrap_or(RetryPolicy::DEFAULT_BACKOFF_RATE);
        if !backoff_rate.is_finite() || backoff_rate < 1.0 {
            return Err(self.error(format!("{field}: 'BackoffRate' must be at least 1.0")));
        }

        if let Some(max_delay) = doc.max_delay_seconds {
            if !max_delay.is_finite() || max_delay <= 0.0 {
                return Err(self.error(format!("{field}: 'MaxDelaySeconds' must be positive")));
            }
        }

        Ok(RetryPolicy {
            error_equals,
            interval_seconds,
            max_attempts: doc.max_attempts.unwrap_or(RetryPolicy::DEFAULT_MAX_ATTEMPTS),
            backoff_rate,
            max_delay_seconds: doc.max_delay_seconds,
        })
    }

    fn catchers(&self) -> Result<Vec<CatchRule>, DefinitionError> {
        let Some(docs) = &self.doc.catch else {
            return Ok(Vec::new());
        };
        docs.iter()
            .enumerate()
            .map(|(index, doc)| self.catcher(index, doc, index + 1 == docs.len()))
            .collect()
    }

    fn catcher(&self, index: usize, doc: &CatcherDocument, is_last: bool) -> Result<CatchRule, DefinitionError> {
        let field = format!("Catch[{index}]");
        let error_equals = self.error_matchers(&field, &doc.error_equals, is_last)?;
        self.check_target(&format!("{field}.Next"), &doc.next)?;
        Ok(CatchRule {
            error_equals,
            next: doc.next.clone(),
            result_path: self.result_path(&format!("{field}.ResultPath"), doc.result_path.as_ref())?,
        })
    }
}

// ---------------------------------------------------------------------------
// Filesystem operations
// ---------------------------------------------------------------------------

/// Definition name derived from a file path (its stem).
pub fn definition_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "definition".to_string())
}

/// Load and compile a definition from a JSON file.
pub fn load_definition_file(path: &Path) -> Result<Definition, DefinitionError> {
    let content = std::fs::read_to_string(path)?;
    parse_definition_json(&definition_name(path), &content)
}

/// Recursively discover `*.json` definitions under `base_dir`.
///
/// Files that fail to load are skipped with a warning. A missing directory
/// yields an empty list.
pub fn discover_definitions(base_dir: &Path) -> Result<Vec<(PathBuf, Definition)>, DefinitionError> {
    let mut results = Vec::new();
    for path in definition_files(base_dir)? {
        match load_definition_file(&path) {
            Ok(def) => results.push((path, def)),
            Err(e) => {
                tracing::warn!(?path, error = %e, "skipping invalid definition file");
            }
        }
    }
    results.sort_by(|a, b| a.1.name.cmp(&b.1.name));
    Ok(results)
}

/// Every `*.json` file under `base_dir`, recursively, in path order.
pub fn definition_files(base_dir: &Path) -> Result<Vec<PathBuf>, DefinitionError> {
    let mut files = Vec::new();
    if base_dir.exists() {
        collect_json_files(base_dir, &mut files)?;
    }
    files.sort();
    Ok(files)
}

fn collect_json_files(dir: &Path, files: &mut Vec<PathBuf>) -> Result<(), DefinitionError> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_json_files(&path, files)?;
        } else if path.extension().is_some_and(|ext| ext == "json") {
            files.push(path);
        }
    }
    Ok(())
}
