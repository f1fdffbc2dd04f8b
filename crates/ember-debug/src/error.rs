//! Session error types.

use std::path::PathBuf;

use ember_wire::{Opcode, WireError};

use crate::session::VmState;

/// Errors from debug session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The connection to the VM died; the session is terminated.
    #[error("connection to the VM was lost")]
    ConnectionLost,

    /// The VM sent a reply the protocol does not allow at this point.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// A manually-driven command was handed to the generic engine.
    #[error("command {opcode:?} requires a dedicated driver routine")]
    ManualCommandRejected {
        /// The offending command's opcode.
        opcode: Opcode,
    },

    /// No handshake reply arrived before the deadline.
    #[error("no handshake reply within {0} seconds")]
    HandshakeTimeout(u64),

    /// The running snapshot does not match the info file next to it.
    #[error("snapshot hash mismatch: VM reports {actual:#010x}, info file has {expected:#010x}")]
    SnapshotHashMismatch {
        /// Hash recorded in the info file.
        expected: u32,
        /// Hash reported by the VM.
        actual: u32,
    },

    /// The snapshot info file is missing.
    #[error("snapshot info file not found: {0}")]
    InfoFileNotFound(PathBuf),

    /// The snapshot info file could not be decoded.
    #[error("malformed snapshot info file: {0}")]
    MalformedInfoFile(String),

    /// A command was issued after the session terminated.
    #[error("session already terminated")]
    SessionTerminated,

    /// The operation needs a paused process.
    #[error("operation requires a paused process (state is {0:?})")]
    NotPaused(VmState),

    /// The operation needs a spawned process.
    #[error("operation requires a spawned process (state is {0:?})")]
    NotSpawned(VmState),

    /// A lifecycle transition that the state machine forbids.
    #[error("illegal session transition: {event} while {from:?}")]
    IllegalTransition {
        /// State the session was in.
        from: VmState,
        /// The attempted transition.
        event: &'static str,
    },

    /// A frame operation ran without a current back trace.
    #[error("no current back trace")]
    NoBackTrace,

    /// A frame index that is not visible in the current back trace.
    #[error("no visible frame {0} in the current back trace")]
    InvalidFrame(usize),

    /// A breakpoint id with no entry in the breakpoint table.
    #[error("unknown breakpoint id {0}")]
    UnknownBreakpoint(u32),

    /// Wire-level failure.
    #[error(transparent)]
    Wire(#[from] WireError),
}
