//! Standard exit codes for CLI operations
//!
//! These exit codes follow Unix conventions and sysexits.h where applicable.

/// General error - unspecified failure
pub const ERROR: i32 = 1;

/// Not found - the path is absent from every source consulted
pub const NOT_FOUND: i32 = 2;

/// Configuration error - invalid repository definitions or membership
pub const CONFIG_ERROR: i32 = 3;

/// Remote error - origin unreachable, access denied or deadline elapsed
pub const REMOTE_ERROR: i32 = 4;

/// IO error - file not found, permission denied, etc.
pub const IO_ERROR: i32 = 5;

/// Usage error - invalid arguments or options (following sysexits.h convention)
pub const USAGE_ERROR: i32 = 64;
