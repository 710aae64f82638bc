//! Cache-gated test runner for Go modules.
//!
//! A run performs static analysis, a native test pass with race detection and
//! coverage, and, when some packages only build for an alternate target, a
//! second pass through an execution shim. The one-line summary of a fully
//! successful run is cached against the repository's content fingerprint so
//! an unchanged tree is never tested twice.
//!
//! - **[`core`]**: Pure logic (output patterns, streaming filter, phase
//!   verdicts, coverage). No I/O.
//! - **[`io`]**: Side-effecting adapters (processes, git, cache, config,
//!   badges). Each sits behind a trait or a plain struct so tests can swap it.
//!
//! [`orchestrator`] runs the phases and [`gate`] wraps it with the cache.

pub mod core;
pub mod exit_codes;
pub mod gate;
pub mod io;
pub mod logging;
pub mod orchestrator;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
