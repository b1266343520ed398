//! Repository trait definitions (ports).
//!
//! These traits define the storage interface that the infrastructure layer
//! (stepwise-infra) implements. The in-memory implementation lives here
//! because it needs no IO; it backs runs without a configured database and
//! the engine's own tests.

pub mod execution;
pub mod memory;
