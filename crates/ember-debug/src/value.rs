//! Structured remote objects read back from the VM heap.

use ember_wire::Literal;

/// A value fetched from the debugged process.
///
/// Primitive values arrive as a single frame; instances and arrays arrive as
/// a structure header followed by one frame per field or element.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteObject {
    /// A primitive value.
    Value(Literal),
    /// An instance with its fields, one level deep.
    Instance { class_id: u32, fields: Vec<RemoteObject> },
    /// An array slice with its elements, one level deep.
    Array {
        start_index: u32,
        end_index: u32,
        elements: Vec<RemoteObject>,
    },
    /// The VM answered with something that is not a value.
    Error(String),
}

impl RemoteObject {
    pub fn as_literal(&self) -> Option<&Literal> {
        match self {
            RemoteObject::Value(literal) => Some(literal),
            _ => None,
        }
    }
}
