//! Stable exit codes for testgate CLI commands.

/// Tests passed (or were served from a valid cache entry), or the command succeeded.
pub const OK: i32 = 0;
/// The test cycle ran and failed.
pub const FAILED: i32 = 1;
/// Invalid configuration or another error prevented the command from running.
pub const INVALID: i32 = 2;
/// `testgate status` found no valid cache entry for the current state.
pub const STALE: i32 = 3;
