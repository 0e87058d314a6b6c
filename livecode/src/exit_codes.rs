//! Stable exit codes for livecode CLI commands.

/// Command succeeded; for `check`, every rule passes.
pub const OK: i32 = 0;
/// Command failed due to invalid input, config, or rule files.
pub const INVALID: i32 = 1;
/// `check` completed but at least one rule is failing.
pub const FAILING: i32 = 2;
