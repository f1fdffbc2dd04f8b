//! Exit codes surfaced through `DebugSession::interactive_exit_code`.
//!
//! Clean stops (breakpoint hit, normal process exit) report 0.

/// The compiler driving the session crashed.
pub const COMPILER_CRASH: i32 = 253;

/// The connection to the VM was lost.
pub const CONNECTION_ERROR: i32 = 252;

/// The program failed to compile on the VM.
pub const COMPILE_TIME_ERROR: i32 = 254;

/// The program died with an uncaught exception.
pub const UNCAUGHT_EXCEPTION: i32 = 255;
