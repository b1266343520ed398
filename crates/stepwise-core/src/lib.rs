//! Workflow engine and repository trait definitions for Stepwise.
//!
//! This crate defines the "ports" (repository and task-invoker traits) that
//! the infrastructure layer implements. It depends only on `stepwise-types`
//! -- never on `stepwise-infra` or any database/IO crate.

pub mod event;
pub mod repository;
pub mod workflow;
