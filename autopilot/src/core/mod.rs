//! Deterministic, pure logic shared by the engine.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod backoff;
pub mod branch;
pub mod history;
pub mod plan;
pub mod refs;
pub mod selector;
pub mod types;
pub mod workflow;
pub mod workflow_rules;
