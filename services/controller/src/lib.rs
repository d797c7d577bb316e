//! Rotation controller service.
//!
//! Wires the reconciler to an in-memory store, a requeue schedule and
//! env-driven configuration.

pub mod config;
pub mod seed;
pub mod worker;
