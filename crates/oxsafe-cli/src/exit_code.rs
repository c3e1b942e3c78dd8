//! Exit codes for the CLI.
//!
//! These follow common Unix conventions and provide meaningful
//! status information for scripting and automation.

/// Successful execution
pub const SUCCESS: u8 = 0;

/// General/unspecified error
pub const GENERAL_ERROR: u8 = 1;

/// Command-line usage error (bad arguments)
pub const USAGE_ERROR: u8 = 2;

/// Authentication failed (wrong passphrase)
pub const AUTH_FAILED: u8 = 3;

/// Container or input text is invalid/corrupt
pub const INVALID_DATA: u8 = 4;

/// Permission denied
pub const PERMISSION_DENIED: u8 = 5;

/// File not found
pub const NOT_FOUND: u8 = 7;

/// Operation cancelled or interrupted
pub const CANCELLED: u8 = 8;

/// The container is locked by another session
pub const LOCKED: u8 = 9;
