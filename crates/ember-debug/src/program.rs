//! Compiled-program model consumed by the debugger.
//!
//! The incremental compiler owns these structures; the session only reads
//! them to resolve function ids, compute source locations, and drive
//! source-level stepping.

use std::collections::BTreeMap;
use std::sync::Arc;

use ember_wire::Command;

/// A source position, resolved from a function's source map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLocation {
    /// Compiler-assigned source file id.
    pub file: u32,
    pub line: u32,
    pub column: u32,
}

/// One row of a function's bytecode → source mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceMapEntry {
    pub bytecode_index: u32,
    pub location: SourceLocation,
}

/// Bytecode → source mapping for one function, ordered by bytecode index.
#[derive(Debug, Clone, Default)]
pub struct SourceMap {
    entries: Vec<SourceMapEntry>,
}

impl SourceMap {
    pub fn new(mut entries: Vec<SourceMapEntry>) -> Self {
        entries.sort_by_key(|entry| entry.bytecode_index);
        Self { entries }
    }

    /// The source location governing the given bytecode index: the last
    /// entry at or before it.
    pub fn location_for(&self, bytecode_index: u32) -> Option<SourceLocation> {
        self.entries
            .iter()
            .take_while(|entry| entry.bytecode_index <= bytecode_index)
            .last()
            .map(|entry| entry.location)
    }

    /// The first bytecode index after `bytecode_index` whose location
    /// differs from `location`. This is the target of a source-level step.
    pub fn next_index_leaving(
        &self,
        bytecode_index: u32,
        location: SourceLocation,
    ) -> Option<u32> {
        self.entries
            .iter()
            .find(|entry| entry.bytecode_index > bytecode_index && entry.location != location)
            .map(|entry| entry.bytecode_index)
    }
}

/// What kind of code a function holds; only `Normal` functions correspond to
/// user-written source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    Normal,
    Stub,
    Internal,
}

/// A compiled function as the debugger sees it.
#[derive(Debug, Clone)]
pub struct FunctionInfo {
    pub id: u32,
    pub name: String,
    pub kind: FunctionKind,
    pub source_map: SourceMap,
}

impl FunctionInfo {
    pub fn is_internal(&self) -> bool {
        self.kind != FunctionKind::Normal
    }
}

/// A compiled class as the debugger sees it.
#[derive(Debug, Clone)]
pub struct ClassInfo {
    pub id: u32,
    pub name: String,
}

/// The compiler's current compilation system: every function and class the
/// running program may reference, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct ProgramSystem {
    functions: BTreeMap<u32, FunctionInfo>,
    classes: BTreeMap<u32, ClassInfo>,
}

impl ProgramSystem {
    pub fn new(functions: Vec<FunctionInfo>, classes: Vec<ClassInfo>) -> Self {
        Self {
            functions: functions.into_iter().map(|f| (f.id, f)).collect(),
            classes: classes.into_iter().map(|c| (c.id, c)).collect(),
        }
    }

    pub fn function_by_id(&self, id: u32) -> Option<&FunctionInfo> {
        self.functions.get(&id)
    }

    pub fn class_by_id(&self, id: u32) -> Option<&ClassInfo> {
        self.classes.get(&id)
    }

    pub fn functions(&self) -> impl Iterator<Item = &FunctionInfo> {
        self.functions.values()
    }

    pub fn classes(&self) -> impl Iterator<Item = &ClassInfo> {
        self.classes.values()
    }

    /// All functions with the given qualified name, in id order.
    pub fn functions_named<'a>(
        &'a self,
        name: &'a str,
    ) -> impl Iterator<Item = &'a FunctionInfo> + 'a {
        self.functions.values().filter(move |f| f.name == name)
    }
}

/// One incremental compile: the patch commands to apply on the VM and the
/// system that results from applying them.
#[derive(Debug, Clone)]
pub struct CompilationDelta {
    pub commands: Vec<Command>,
    pub system: Arc<ProgramSystem>,
}

/// A breakable location resolved from a source position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakLocation {
    pub function_id: u32,
    pub bytecode_index: u32,
}

/// Source-position resolution, provided by the compiler.
pub trait SourceResolver {
    /// Character position of `line:column` in the file, if the file is known.
    fn position_in_file(&self, uri: &str, line: u32, column: u32) -> Option<u32>;

    /// Character position of the first match of `pattern` on `line`.
    fn position_from_pattern(&self, uri: &str, line: u32, pattern: &str) -> Option<u32>;

    /// The breakable location covering a character position.
    fn debug_info_for_position(
        &self,
        uri: &str,
        position: u32,
        system: &ProgramSystem,
    ) -> Option<BreakLocation>;
}
