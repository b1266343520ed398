//! Shared domain types for Stepwise.
//!
//! This crate contains the serde-level shapes used across the engine: the
//! JSON workflow definition document, execution records, history events,
//! configuration, and the repository error type.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod definition;
pub mod error;
pub mod event;
pub mod execution;
