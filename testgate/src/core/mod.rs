//! Deterministic, pure logic shared by the orchestrator.
//!
//! Core modules must be free of I/O side effects. They classify captured or
//! streamed output and build status values, which keeps them testable with
//! plain strings.

pub mod classify;
pub mod coverage;
pub mod filter;
pub mod patterns;
pub mod types;
