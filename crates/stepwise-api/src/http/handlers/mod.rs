//! REST API handlers.

pub mod definition;
pub mod execution;
