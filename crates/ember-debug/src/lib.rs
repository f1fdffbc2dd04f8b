//! ember-debug — client-side debug session controller for the Ember VM.
//!
//! This crate drives one VM debug connection: it loads and live-patches
//! compiled code, spawns and controls the debugged process, sets
//! breakpoints, steps at source and bytecode granularity, inspects stacks
//! and heap objects, and fans asynchronous stdio and lifecycle events out
//! to listeners.

pub mod backtrace;
pub mod breakpoint;
pub mod config;
pub mod controller;
pub mod error;
pub mod exit_codes;
pub mod info;
pub mod listener;
pub mod program;
pub mod session;
pub mod state;
pub mod translate;
pub mod value;

// Re-export key types for convenience.
pub use backtrace::{BackTrace, BackTraceFrame};
pub use breakpoint::{Breakpoint, FunctionRef};
pub use config::SessionConfig;
pub use controller::{DebugSession, InterruptHandle};
pub use error::SessionError;
pub use info::NameOffsetMapping;
pub use listener::{ListenerRegistry, SessionListener};
pub use program::{
    BreakLocation, ClassInfo, CompilationDelta, FunctionInfo, FunctionKind, ProgramSystem,
    SourceLocation, SourceMap, SourceMapEntry, SourceResolver,
};
pub use session::VmState;
pub use state::DebugState;
pub use translate::{IdOffsetMapping, IdTranslator};
pub use value::RemoteObject;
