//! Standard exit codes for CLI operations
//!
//! A failing subprocess (terraform, kubectl, helm) passes its own exit code
//! through instead.

/// Success - operation completed without errors
pub const SUCCESS: i32 = 0;

/// General error - unspecified failure
pub const ERROR: i32 = 1;
