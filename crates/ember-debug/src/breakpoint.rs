//! Breakpoint value types.

/// A function referenced by a breakpoint, captured at set time so the
/// breakpoint stays printable after live edits replace the function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionRef {
    pub id: u32,
    pub name: String,
}

/// A breakpoint registered with the VM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Breakpoint {
    /// VM-assigned breakpoint id.
    pub id: u32,
    pub function: FunctionRef,
    pub bytecode_index: u32,
}

impl std::fmt::Display for Breakpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "breakpoint {} at {}+{}",
            self.id, self.function.name, self.bytecode_index
        )
    }
}
