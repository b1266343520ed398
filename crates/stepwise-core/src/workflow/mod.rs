//! Workflow engine core: definition compilation, path handling, and execution.
//!
//! - `definition` -- JSON parsing, validation, filesystem load/discover
//! - `catalog` -- compiled definitions of a directory, cached per file
//! - `model` -- compiled, immutable state graph
//! - `graph` -- reachability and loop analysis over transitions
//! - `path` / `template` / `intrinsics` -- Path Engine and `States.*` functions
//! - `choice` -- `Choice` rule evaluation
//! - `failure` / `retry` -- error taxonomy and Retry/Catch policy engine
//! - `wait` / `parallel` -- timing and the Parallel Coordinator
//! - `context` -- the `$$` context object
//! - `history` -- execution records and ordered event journal
//! - `invoker` -- Task Invoker capability
//! - `interpreter` -- the state-machine driver

pub mod catalog;
pub mod choice;
pub mod context;
pub mod definition;
pub mod failure;
pub mod graph;
pub mod history;
pub mod interpreter;
pub mod intrinsics;
pub mod invoker;
pub mod model;
pub mod parallel;
pub mod path;
pub mod retry;
pub mod template;
pub mod wait;
