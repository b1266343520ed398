//! Task invoker implementations.
//!
//! - `registry`: in-process async units keyed by name
//! - `builtin`: `stepwise:echo` and `stepwise:fail`
//! - `http`: units behind configured HTTP endpoints
//! - `routing`: registry first, then HTTP

pub mod builtin;
pub mod http;
pub mod registry;
pub mod routing;
