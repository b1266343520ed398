//! Infrastructure layer for Stepwise.
//!
//! Contains implementations of the traits defined in `stepwise-core`: the
//! SQLite execution repository, task invokers (in-process units, HTTP
//! endpoints, routing), and the TOML configuration loader.

pub mod config;
pub mod invoker;
pub mod sqlite;
