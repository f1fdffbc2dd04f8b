//! ember-wire — binary wire protocol for Ember VM debug sessions.
//!
//! This crate implements the length-framed command protocol spoken between
//! the debugger client and the VM: payload scalars, frame transport, the
//! typed command/reply model, and the connection abstraction.

pub mod command;
pub mod connection;
pub mod error;
pub mod payload;
pub mod transport;

// Re-export key types for convenience.
pub use command::{
    Command, ExpectedReplies, IdTranslate, IdentityTranslate, Literal, MapId, Opcode, Reply,
};
pub use connection::{Connection, ConnectionReader, ConnectionWriter};
pub use error::WireError;
pub use transport::{decode_frame, encode_frame, Frame, FrameReader, FrameWriter, HEADER_LEN};
