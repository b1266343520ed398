//! Workflow definition documents.
//!
//! These structs mirror the JSON declaration format one-to-one: PascalCase
//! keys, every state a flat object discriminated by `Type`. They carry no
//! semantics beyond shape; `stepwise-core` compiles a `DefinitionDocument`
//! into a validated, immutable graph before anything runs.
//!
//! ```json
//! {
//!   "StartAt": "Check",
//!   "States": {
//!     "Check": { "Type": "Task", "Resource": "check-status", "End": true }
//!   }
//! }
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

// ---------------------------------------------------------------------------
// Definition
// ---------------------------------------------------------------------------

/// A workflow (or a `Parallel` branch) as declared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct DefinitionDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// Name of the first state to execute.
    pub start_at: String,
    /// State name to state declaration.
    pub states: BTreeMap<String, StateDocument>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// The seven state variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StateType {
    Task,
    Pass,
    Choice,
    Wait,
    Parallel,
    Succeed,
    Fail,
}

impl fmt::Display for StateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StateType::Task => "Task",
            StateType::Pass => "Pass",
            StateType::Choice => "Choice",
            StateType::Wait => "Wait",
            StateType::Parallel => "Parallel",
            StateType::Succeed => "Succeed",
            StateType::Fail => "Fail",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// One state declaration.
///
/// All type-specific fields are optional here; which of them are allowed or
/// required for a given `Type` is checked when the definition is compiled.
///
/// `InputPath`, `OutputPath` and `ResultPath` distinguish "absent" (`None`)
/// from an explicit JSON `null` (`Some(None)`), since the two mean different
/// things.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct StateDocument {
    #[serde(rename = "Type")]
    pub state_type: StateType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<bool>,

    #[serde(
        default,
        deserialize_with = "nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub input_path: Option<Option<String>>,
    #[serde(
        default,
        deserialize_with = "nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub output_path: Option<Option<String>>,
    #[serde(
        default,
        deserialize_with = "nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub result_path: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_selector: Option<serde_json::Value>,

    /// Task: static unit name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    /// Task: path yielding the unit name at runtime.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<Vec<RetrierDocument>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catch: Option<Vec<CatcherDocument>>,

    /// Pass: literal result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choices: Option<Vec<ChoiceRuleDocument>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seconds_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branches: Option<Vec<DefinitionDocument>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause_path: Option<String>,
}

impl StateDocument {
    /// An empty declaration of the given type, handy for building documents in code.
    pub fn of_type(state_type: StateType) -> Self {
        Self {
            state_type,
            comment: None,
            next: None,
            end: None,
            input_path: None,
            output_path: None,
            result_path: None,
            parameters: None,
            result_selector: None,
            resource: None,
            resource_path: None,
            retry: None,
            catch: None,
            result: None,
            choices: None,
            default: None,
            seconds: None,
            seconds_path: None,
            timestamp: None,
            timestamp_path: None,
            branches: None,
            error: None,
            error_path: None,
            cause: None,
            cause_path: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Retry / Catch
// ---------------------------------------------------------------------------

/// A `Retry` entry. Omitted numeric fields take their defaults at compile time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct RetrierDocument {
    pub error_equals: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_delay_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// A `Catch` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct CatcherDocument {
    pub error_equals: Vec<String>,
    pub next: String,
    #[serde(
        default,
        deserialize_with = "nullable",
        skip_serializing_if = "Option::is_none"
    )]
    pub result_path: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

// ---------------------------------------------------------------------------
// Choice rules
// ---------------------------------------------------------------------------

/// A `Choices` entry, or a rule nested inside `And`/`Or`/`Not`.
///
/// The comparator (`StringEquals`, `NumericLessThanPath`, `IsPresent`, ...)
/// is captured in `comparator` so that unknown or duplicate comparators can
/// be reported with a useful message instead of a generic serde error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChoiceRuleDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variable: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub and: Option<Vec<ChoiceRuleDocument>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub or: Option<Vec<ChoiceRuleDocument>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not: Option<Box<ChoiceRuleDocument>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(flatten)]
    pub comparator: BTreeMap<String, serde_json::Value>,
}

/// Deserialize a field where explicit `null` differs from absence.
///
/// Used together with `#[serde(default)]`: a missing key never reaches this
/// function and stays `None`, while `null` becomes `Some(None)`.
fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}
