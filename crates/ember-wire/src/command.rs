//! Typed command model for the debug protocol.
//!
//! [`Command`] covers everything the debugger sends; [`Reply`] covers
//! everything the VM sends back. Each outbound command declares how many
//! reply frames the VM produces for it. Commands whose replies are consumed
//! by a dedicated driver routine declare [`ExpectedReplies::Manual`] and are
//! rejected by the generic request/reply engine.

use crate::error::WireError;
use crate::payload::{PayloadReader, PayloadWriter};
use crate::transport::{encode_frame, Frame};

/// Wire opcodes shared by both directions of the protocol.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    SessionEnd = 0,
    Debugging = 1,
    DebuggingReply = 2,
    HandShake = 3,
    HandShakeResult = 4,
    LiveEditing = 5,
    ProcessSpawnForMain = 6,
    ProcessRun = 7,
    ProcessContinue = 8,
    ProcessStep = 9,
    ProcessStepTo = 10,
    ProcessStepOver = 11,
    ProcessStepOut = 12,
    ProcessSetBreakpoint = 13,
    ProcessDeleteBreakpoint = 14,
    ProcessDeleteOneShotBreakpoint = 15,
    ProcessBacktraceRequest = 16,
    ProcessBacktrace = 17,
    ProcessFiberBacktraceRequest = 18,
    ProcessAddFibersToMap = 19,
    ProcessNumberOfStacks = 20,
    ProcessBreakpoint = 21,
    ProcessUncaughtExceptionRequest = 22,
    UncaughtException = 23,
    ProcessCompileTimeError = 24,
    ProcessTerminated = 25,
    ProcessDebugInterrupt = 26,
    ProcessGetProcessIds = 27,
    ProcessGetProcessIdsResult = 28,
    ProcessRestartFrame = 29,
    ProcessLocal = 30,
    ProcessLocalStructure = 31,
    NewMap = 32,
    DeleteMap = 33,
    PushFromMap = 34,
    CreateSnapshot = 35,
    ProgramInfo = 36,
    StdoutData = 37,
    StderrData = 38,
    Value = 39,
    InstanceStructure = 40,
    ArrayStructure = 41,
}

impl Opcode {
    pub fn from_u8(value: u8) -> Option<Opcode> {
        use Opcode::*;
        Some(match value {
            0 => SessionEnd,
            1 => Debugging,
            2 => DebuggingReply,
            3 => HandShake,
            4 => HandShakeResult,
            5 => LiveEditing,
            6 => ProcessSpawnForMain,
            7 => ProcessRun,
            8 => ProcessContinue,
            9 => ProcessStep,
            10 => ProcessStepTo,
            11 => ProcessStepOver,
            12 => ProcessStepOut,
            13 => ProcessSetBreakpoint,
            14 => ProcessDeleteBreakpoint,
            15 => ProcessDeleteOneShotBreakpoint,
            16 => ProcessBacktraceRequest,
            17 => ProcessBacktrace,
            18 => ProcessFiberBacktraceRequest,
            19 => ProcessAddFibersToMap,
            20 => ProcessNumberOfStacks,
            21 => ProcessBreakpoint,
            22 => ProcessUncaughtExceptionRequest,
            23 => UncaughtException,
            24 => ProcessCompileTimeError,
            25 => ProcessTerminated,
            26 => ProcessDebugInterrupt,
            27 => ProcessGetProcessIds,
            28 => ProcessGetProcessIdsResult,
            29 => ProcessRestartFrame,
            30 => ProcessLocal,
            31 => ProcessLocalStructure,
            32 => NewMap,
            33 => DeleteMap,
            34 => PushFromMap,
            35 => CreateSnapshot,
            36 => ProgramInfo,
            37 => StdoutData,
            38 => StderrData,
            39 => Value,
            40 => InstanceStructure,
            41 => ArrayStructure,
            _ => return None,
        })
    }
}

/// How many reply frames an outbound command produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedReplies {
    /// The VM sends exactly this many reply frames.
    Fixed(usize),
    /// Replies are consumed by a dedicated driver routine; the generic
    /// engine must reject the command.
    Manual,
}

/// Identifier translation applied while encoding and decoding.
///
/// Connected to a VM running from a snapshot, function and class ids on the
/// wire are symbolic snapshot offsets; otherwise ids pass through unchanged.
pub trait IdTranslate {
    fn function_to_wire(&self, id: u32) -> u32;
    fn function_from_wire(&self, id: u32) -> u32;
    fn class_to_wire(&self, id: u32) -> u32;
    fn class_from_wire(&self, id: u32) -> u32;
}

/// The non-snapshot translator: every id maps to itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityTranslate;

impl IdTranslate for IdentityTranslate {
    fn function_to_wire(&self, id: u32) -> u32 {
        id
    }
    fn function_from_wire(&self, id: u32) -> u32 {
        id
    }
    fn class_to_wire(&self, id: u32) -> u32 {
        id
    }
    fn class_from_wire(&self, id: u32) -> u32 {
        id
    }
}

/// VM-side remote maps addressed by [`Command::NewMap`] and friends.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapId {
    Methods = 0,
    Classes = 1,
    Fibers = 2,
}

impl MapId {
    fn from_u32(value: u32) -> Result<MapId, WireError> {
        match value {
            0 => Ok(MapId::Methods),
            1 => Ok(MapId::Classes),
            2 => Ok(MapId::Fibers),
            other => Err(WireError::InvalidPayload(format!("unknown map id {other}"))),
        }
    }
}

/// A primitive value echoed back by the VM.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    Str(String),
}

const LITERAL_NULL: u8 = 0;
const LITERAL_BOOL: u8 = 1;
const LITERAL_INT: u8 = 2;
const LITERAL_DOUBLE: u8 = 3;
const LITERAL_STR: u8 = 4;

impl Literal {
    fn serialize(&self, w: &mut PayloadWriter) {
        match self {
            Literal::Null => w.write_u8(LITERAL_NULL),
            Literal::Bool(b) => {
                w.write_u8(LITERAL_BOOL);
                w.write_bool(*b);
            }
            Literal::Int(i) => {
                w.write_u8(LITERAL_INT);
                w.write_i64(*i);
            }
            Literal::Double(d) => {
                w.write_u8(LITERAL_DOUBLE);
                w.write_f64(*d);
            }
            Literal::Str(s) => {
                w.write_u8(LITERAL_STR);
                w.write_string(s);
            }
        }
    }

    fn deserialize(r: &mut PayloadReader<'_>) -> Result<Literal, WireError> {
        match r.read_u8()? {
            LITERAL_NULL => Ok(Literal::Null),
            LITERAL_BOOL => Ok(Literal::Bool(r.read_bool()?)),
            LITERAL_INT => Ok(Literal::Int(r.read_i64()?)),
            LITERAL_DOUBLE => Ok(Literal::Double(r.read_f64()?)),
            LITERAL_STR => Ok(Literal::Str(r.read_string()?)),
            tag => Err(WireError::InvalidPayload(format!(
                "unknown literal tag {tag}"
            ))),
        }
    }
}

/// An outbound command from debugger to VM.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    HandShake { version: String },
    Debugging,
    LiveEditing,
    ProcessSpawnForMain { arguments: Vec<String> },
    ProcessRun,
    ProcessContinue,
    ProcessStep,
    ProcessStepTo { bytecode_index: u32 },
    ProcessStepOver,
    ProcessStepOut,
    ProcessSetBreakpoint { bytecode_index: u32 },
    ProcessDeleteBreakpoint { id: u32 },
    ProcessDeleteOneShotBreakpoint { id: u32 },
    ProcessBacktraceRequest { process_id: u32 },
    ProcessFiberBacktraceRequest { fiber: u32 },
    ProcessAddFibersToMap,
    ProcessUncaughtExceptionRequest,
    ProcessDebugInterrupt,
    ProcessGetProcessIds,
    ProcessRestartFrame { frame: u32 },
    ProcessLocal { frame: u32, slot: u32 },
    ProcessLocalStructure { frame: u32, slot: u32 },
    NewMap { map: MapId },
    DeleteMap { map: MapId },
    PushFromMap { map: MapId, id: u32 },
    CreateSnapshot { path: String },
    SessionEnd,
}

impl Command {
    pub fn opcode(&self) -> Opcode {
        match self {
            Command::HandShake { .. } => Opcode::HandShake,
            Command::Debugging => Opcode::Debugging,
            Command::LiveEditing => Opcode::LiveEditing,
            Command::ProcessSpawnForMain { .. } => Opcode::ProcessSpawnForMain,
            Command::ProcessRun => Opcode::ProcessRun,
            Command::ProcessContinue => Opcode::ProcessContinue,
            Command::ProcessStep => Opcode::ProcessStep,
            Command::ProcessStepTo { .. } => Opcode::ProcessStepTo,
            Command::ProcessStepOver => Opcode::ProcessStepOver,
            Command::ProcessStepOut => Opcode::ProcessStepOut,
            Command::ProcessSetBreakpoint { .. } => Opcode::ProcessSetBreakpoint,
            Command::ProcessDeleteBreakpoint { .. } => Opcode::ProcessDeleteBreakpoint,
            Command::ProcessDeleteOneShotBreakpoint { .. } => {
                Opcode::ProcessDeleteOneShotBreakpoint
            }
            Command::ProcessBacktraceRequest { .. } => Opcode::ProcessBacktraceRequest,
            Command::ProcessFiberBacktraceRequest { .. } => Opcode::ProcessFiberBacktraceRequest,
            Command::ProcessAddFibersToMap => Opcode::ProcessAddFibersToMap,
            Command::ProcessUncaughtExceptionRequest => Opcode::ProcessUncaughtExceptionRequest,
            Command::ProcessDebugInterrupt => Opcode::ProcessDebugInterrupt,
            Command::ProcessGetProcessIds => Opcode::ProcessGetProcessIds,
            Command::ProcessRestartFrame { .. } => Opcode::ProcessRestartFrame,
            Command::ProcessLocal { .. } => Opcode::ProcessLocal,
            Command::ProcessLocalStructure { .. } => Opcode::ProcessLocalStructure,
            Command::NewMap { .. } => Opcode::NewMap,
            Command::DeleteMap { .. } => Opcode::DeleteMap,
            Command::PushFromMap { .. } => Opcode::PushFromMap,
            Command::CreateSnapshot { .. } => Opcode::CreateSnapshot,
            Command::SessionEnd => Opcode::SessionEnd,
        }
    }

    /// Reply frames the VM produces for this command.
    pub fn expected_replies(&self) -> ExpectedReplies {
        use ExpectedReplies::*;
        match self {
            // Driven by dedicated routines: the handshake retry loop, the
            // run loop, the breakpoint helper, the step-over/step-out loops,
            // and the structured-object reader.
            Command::HandShake { .. }
            | Command::ProcessRun
            | Command::ProcessSetBreakpoint { .. }
            | Command::ProcessStepOver
            | Command::ProcessStepOut
            | Command::ProcessUncaughtExceptionRequest
            | Command::ProcessLocal { .. }
            | Command::ProcessLocalStructure { .. } => Manual,

            Command::LiveEditing
            | Command::ProcessSpawnForMain { .. }
            | Command::ProcessDebugInterrupt
            | Command::NewMap { .. }
            | Command::DeleteMap { .. }
            | Command::PushFromMap { .. }
            | Command::SessionEnd => Fixed(0),

            Command::Debugging
            | Command::ProcessContinue
            | Command::ProcessStep
            | Command::ProcessStepTo { .. }
            | Command::ProcessDeleteBreakpoint { .. }
            | Command::ProcessDeleteOneShotBreakpoint { .. }
            | Command::ProcessBacktraceRequest { .. }
            | Command::ProcessFiberBacktraceRequest { .. }
            | Command::ProcessAddFibersToMap
            | Command::ProcessGetProcessIds
            | Command::ProcessRestartFrame { .. }
            | Command::CreateSnapshot { .. } => Fixed(1),
        }
    }

    /// Serialize the payload, translating function/class ids for the wire.
    pub fn serialize(&self, w: &mut PayloadWriter, ids: &dyn IdTranslate) {
        match self {
            Command::HandShake { version } => w.write_string(version),
            Command::ProcessSpawnForMain { arguments } => {
                w.write_u32(arguments.len() as u32);
                for argument in arguments {
                    w.write_string(argument);
                }
            }
            Command::ProcessStepTo { bytecode_index }
            | Command::ProcessSetBreakpoint { bytecode_index } => w.write_u32(*bytecode_index),
            Command::ProcessDeleteBreakpoint { id }
            | Command::ProcessDeleteOneShotBreakpoint { id } => w.write_u32(*id),
            Command::ProcessBacktraceRequest { process_id } => w.write_u32(*process_id),
            Command::ProcessFiberBacktraceRequest { fiber } => w.write_u32(*fiber),
            Command::ProcessRestartFrame { frame } => w.write_u32(*frame),
            Command::ProcessLocal { frame, slot }
            | Command::ProcessLocalStructure { frame, slot } => {
                w.write_u32(*frame);
                w.write_u32(*slot);
            }
            Command::NewMap { map } | Command::DeleteMap { map } => w.write_u32(*map as u32),
            Command::PushFromMap { map, id } => {
                w.write_u32(*map as u32);
                let wire_id = match map {
                    MapId::Methods => ids.function_to_wire(*id),
                    MapId::Classes => ids.class_to_wire(*id),
                    MapId::Fibers => *id,
                };
                w.write_u32(wire_id);
            }
            Command::CreateSnapshot { path } => w.write_string(path),
            Command::Debugging
            | Command::LiveEditing
            | Command::ProcessRun
            | Command::ProcessContinue
            | Command::ProcessStep
            | Command::ProcessStepOver
            | Command::ProcessStepOut
            | Command::ProcessAddFibersToMap
            | Command::ProcessUncaughtExceptionRequest
            | Command::ProcessDebugInterrupt
            | Command::ProcessGetProcessIds
            | Command::SessionEnd => {}
        }
    }

    /// Encode the command as complete frame bytes.
    pub fn encode(&self, ids: &dyn IdTranslate) -> Vec<u8> {
        let mut w = PayloadWriter::new();
        self.serialize(&mut w, ids);
        encode_frame(self.opcode() as u8, &w.into_vec())
    }

    /// Decode an outbound command from a frame, with ids taken verbatim.
    ///
    /// This is the VM side of the codec; scripted test VMs use it to parse
    /// what the client sent.
    pub fn decode(frame: &Frame) -> Result<Command, WireError> {
        let opcode =
            Opcode::from_u8(frame.opcode).ok_or(WireError::UnknownOpcode(frame.opcode))?;
        let mut r = PayloadReader::new(&frame.payload);
        let command = match opcode {
            Opcode::HandShake => Command::HandShake {
                version: r.read_string()?,
            },
            Opcode::Debugging => Command::Debugging,
            Opcode::LiveEditing => Command::LiveEditing,
            Opcode::ProcessSpawnForMain => {
                let count = r.read_u32()? as usize;
                let mut arguments = Vec::with_capacity(count);
                for _ in 0..count {
                    arguments.push(r.read_string()?);
                }
                Command::ProcessSpawnForMain { arguments }
            }
            Opcode::ProcessRun => Command::ProcessRun,
            Opcode::ProcessContinue => Command::ProcessContinue,
            Opcode::ProcessStep => Command::ProcessStep,
            Opcode::ProcessStepTo => Command::ProcessStepTo {
                bytecode_index: r.read_u32()?,
            },
            Opcode::ProcessStepOver => Command::ProcessStepOver,
            Opcode::ProcessStepOut => Command::ProcessStepOut,
            Opcode::ProcessSetBreakpoint => Command::ProcessSetBreakpoint {
                bytecode_index: r.read_u32()?,
            },
            Opcode::ProcessDeleteBreakpoint => Command::ProcessDeleteBreakpoint {
                id: r.read_u32()?,
            },
            Opcode::ProcessDeleteOneShotBreakpoint => Command::ProcessDeleteOneShotBreakpoint {
                id: r.read_u32()?,
            },
            Opcode::ProcessBacktraceRequest => Command::ProcessBacktraceRequest {
                process_id: r.read_u32()?,
            },
            Opcode::ProcessFiberBacktraceRequest => Command::ProcessFiberBacktraceRequest {
                fiber: r.read_u32()?,
            },
            Opcode::ProcessAddFibersToMap => Command::ProcessAddFibersToMap,
            Opcode::ProcessUncaughtExceptionRequest => Command::ProcessUncaughtExceptionRequest,
            Opcode::ProcessDebugInterrupt => Command::ProcessDebugInterrupt,
            Opcode::ProcessGetProcessIds => Command::ProcessGetProcessIds,
            Opcode::ProcessRestartFrame => Command::ProcessRestartFrame {
                frame: r.read_u32()?,
            },
            Opcode::ProcessLocal => Command::ProcessLocal {
                frame: r.read_u32()?,
                slot: r.read_u32()?,
            },
            Opcode::ProcessLocalStructure => Command::ProcessLocalStructure {
                frame: r.read_u32()?,
                slot: r.read_u32()?,
            },
            Opcode::NewMap => Command::NewMap {
                map: MapId::from_u32(r.read_u32()?)?,
            },
            Opcode::DeleteMap => Command::DeleteMap {
                map: MapId::from_u32(r.read_u32()?)?,
            },
            Opcode::PushFromMap => Command::PushFromMap {
                map: MapId::from_u32(r.read_u32()?)?,
                id: r.read_u32()?,
            },
            Opcode::CreateSnapshot => Command::CreateSnapshot {
                path: r.read_string()?,
            },
            Opcode::SessionEnd => Command::SessionEnd,
            other => {
                return Err(WireError::InvalidPayload(format!(
                    "opcode {other:?} is not an outbound command"
                )))
            }
        };
        Ok(command)
    }
}

/// An inbound command from VM to debugger.
///
/// `ConnectionError` is a synthetic sentinel materialized by the session when
/// the connection dies; it never appears on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    ConnectionError,
    HandShakeResult {
        success: bool,
        version: String,
    },
    DebuggingReply {
        is_from_snapshot: bool,
        snapshot_hash: u32,
    },
    ProcessBreakpoint {
        process_id: u32,
        breakpoint_id: i32,
        function_id: u32,
        bytecode_index: u32,
    },
    ProcessSetBreakpoint {
        value: i32,
    },
    ProcessDeleteBreakpoint {
        id: u32,
    },
    ProcessBacktrace {
        function_ids: Vec<u32>,
        bytecode_indices: Vec<u32>,
    },
    ProcessNumberOfStacks {
        value: u32,
    },
    ProcessGetProcessIdsResult {
        ids: Vec<u32>,
    },
    UncaughtException {
        process_id: u32,
        function_id: u32,
        bytecode_index: u32,
    },
    ProcessCompileTimeError,
    ProcessTerminated,
    StdoutData {
        bytes: Vec<u8>,
    },
    StderrData {
        bytes: Vec<u8>,
    },
    Value(Literal),
    InstanceStructure {
        class_id: u32,
        field_count: u32,
    },
    ArrayStructure {
        start_index: u32,
        end_index: u32,
    },
    ProgramInfo {
        snapshot_hash: u32,
    },
}

impl Reply {
    /// Wire opcode, or `None` for the synthetic sentinel.
    pub fn opcode(&self) -> Option<Opcode> {
        Some(match self {
            Reply::ConnectionError => return None,
            Reply::HandShakeResult { .. } => Opcode::HandShakeResult,
            Reply::DebuggingReply { .. } => Opcode::DebuggingReply,
            Reply::ProcessBreakpoint { .. } => Opcode::ProcessBreakpoint,
            Reply::ProcessSetBreakpoint { .. } => Opcode::ProcessSetBreakpoint,
            Reply::ProcessDeleteBreakpoint { .. } => Opcode::ProcessDeleteBreakpoint,
            Reply::ProcessBacktrace { .. } => Opcode::ProcessBacktrace,
            Reply::ProcessNumberOfStacks { .. } => Opcode::ProcessNumberOfStacks,
            Reply::ProcessGetProcessIdsResult { .. } => Opcode::ProcessGetProcessIdsResult,
            Reply::UncaughtException { .. } => Opcode::UncaughtException,
            Reply::ProcessCompileTimeError => Opcode::ProcessCompileTimeError,
            Reply::ProcessTerminated => Opcode::ProcessTerminated,
            Reply::StdoutData { .. } => Opcode::StdoutData,
            Reply::StderrData { .. } => Opcode::StderrData,
            Reply::Value(_) => Opcode::Value,
            Reply::InstanceStructure { .. } => Opcode::InstanceStructure,
            Reply::ArrayStructure { .. } => Opcode::ArrayStructure,
            Reply::ProgramInfo { .. } => Opcode::ProgramInfo,
        })
    }

    /// Encode the reply as complete frame bytes.
    ///
    /// This is the VM side of the codec; scripted test VMs use it to answer
    /// the client. The sentinel has no wire form.
    pub fn encode(&self) -> Vec<u8> {
        let opcode = match self.opcode() {
            Some(opcode) => opcode,
            None => unreachable!("the connection-error sentinel never crosses the wire"),
        };
        let mut w = PayloadWriter::new();
        match self {
            Reply::ConnectionError => {}
            Reply::HandShakeResult { success, version } => {
                w.write_bool(*success);
                w.write_string(version);
            }
            Reply::DebuggingReply {
                is_from_snapshot,
                snapshot_hash,
            } => {
                w.write_bool(*is_from_snapshot);
                w.write_u32(*snapshot_hash);
            }
            Reply::ProcessBreakpoint {
                process_id,
                breakpoint_id,
                function_id,
                bytecode_index,
            } => {
                w.write_u32(*process_id);
                w.write_i32(*breakpoint_id);
                w.write_u32(*function_id);
                w.write_u32(*bytecode_index);
            }
            Reply::ProcessSetBreakpoint { value } => w.write_i32(*value),
            Reply::ProcessDeleteBreakpoint { id } => w.write_u32(*id),
            Reply::ProcessBacktrace {
                function_ids,
                bytecode_indices,
            } => {
                w.write_u32(function_ids.len() as u32);
                for (function_id, bytecode_index) in function_ids.iter().zip(bytecode_indices) {
                    w.write_u32(*function_id);
                    w.write_u32(*bytecode_index);
                }
            }
            Reply::ProcessNumberOfStacks { value } => w.write_u32(*value),
            Reply::ProcessGetProcessIdsResult { ids } => {
                w.write_u32(ids.len() as u32);
                for id in ids {
                    w.write_u32(*id);
                }
            }
            Reply::UncaughtException {
                process_id,
                function_id,
                bytecode_index,
            } => {
                w.write_u32(*process_id);
                w.write_u32(*function_id);
                w.write_u32(*bytecode_index);
            }
            Reply::ProcessCompileTimeError | Reply::ProcessTerminated => {}
            Reply::StdoutData { bytes } | Reply::StderrData { bytes } => w.write_bytes(bytes),
            Reply::Value(literal) => literal.serialize(&mut w),
            Reply::InstanceStructure {
                class_id,
                field_count,
            } => {
                w.write_u32(*class_id);
                w.write_u32(*field_count);
            }
            Reply::ArrayStructure {
                start_index,
                end_index,
            } => {
                w.write_u32(*start_index);
                w.write_u32(*end_index);
            }
            Reply::ProgramInfo { snapshot_hash } => w.write_u32(*snapshot_hash),
        }
        encode_frame(opcode as u8, &w.into_vec())
    }

    /// Decode an inbound command from a frame.
    pub fn decode(frame: &Frame) -> Result<Reply, WireError> {
        let opcode =
            Opcode::from_u8(frame.opcode).ok_or(WireError::UnknownOpcode(frame.opcode))?;
        let mut r = PayloadReader::new(&frame.payload);
        let reply = match opcode {
            Opcode::HandShakeResult => Reply::HandShakeResult {
                success: r.read_bool()?,
                version: r.read_string()?,
            },
            Opcode::DebuggingReply => Reply::DebuggingReply {
                is_from_snapshot: r.read_bool()?,
                snapshot_hash: r.read_u32()?,
            },
            Opcode::ProcessBreakpoint => Reply::ProcessBreakpoint {
                process_id: r.read_u32()?,
                breakpoint_id: r.read_i32()?,
                function_id: r.read_u32()?,
                bytecode_index: r.read_u32()?,
            },
            Opcode::ProcessSetBreakpoint => Reply::ProcessSetBreakpoint {
                value: r.read_i32()?,
            },
            Opcode::ProcessDeleteBreakpoint => Reply::ProcessDeleteBreakpoint {
                id: r.read_u32()?,
            },
            Opcode::ProcessBacktrace => {
                let count = r.read_u32()? as usize;
                let mut function_ids = Vec::with_capacity(count);
                let mut bytecode_indices = Vec::with_capacity(count);
                for _ in 0..count {
                    function_ids.push(r.read_u32()?);
                    bytecode_indices.push(r.read_u32()?);
                }
                Reply::ProcessBacktrace {
                    function_ids,
                    bytecode_indices,
                }
            }
            Opcode::ProcessNumberOfStacks => Reply::ProcessNumberOfStacks {
                value: r.read_u32()?,
            },
            Opcode::ProcessGetProcessIdsResult => {
                let count = r.read_u32()? as usize;
                let mut ids = Vec::with_capacity(count);
                for _ in 0..count {
                    ids.push(r.read_u32()?);
                }
                Reply::ProcessGetProcessIdsResult { ids }
            }
            Opcode::UncaughtException => Reply::UncaughtException {
                process_id: r.read_u32()?,
                function_id: r.read_u32()?,
                bytecode_index: r.read_u32()?,
            },
            Opcode::ProcessCompileTimeError => Reply::ProcessCompileTimeError,
            Opcode::ProcessTerminated => Reply::ProcessTerminated,
            Opcode::StdoutData => Reply::StdoutData {
                bytes: r.read_remaining().to_vec(),
            },
            Opcode::StderrData => Reply::StderrData {
                bytes: r.read_remaining().to_vec(),
            },
            Opcode::Value => Reply::Value(Literal::deserialize(&mut r)?),
            Opcode::InstanceStructure => Reply::InstanceStructure {
                class_id: r.read_u32()?,
                field_count: r.read_u32()?,
            },
            Opcode::ArrayStructure => Reply::ArrayStructure {
                start_index: r.read_u32()?,
                end_index: r.read_u32()?,
            },
            Opcode::ProgramInfo => Reply::ProgramInfo {
                snapshot_hash: r.read_u32()?,
            },
            other => {
                return Err(WireError::InvalidPayload(format!(
                    "opcode {other:?} is not an inbound command"
                )))
            }
        };
        Ok(reply)
    }

    /// Translate inbound function/class ids back to compiler ids.
    pub fn translate_ids(self, ids: &dyn IdTranslate) -> Reply {
        match self {
            Reply::ProcessBreakpoint {
                process_id,
                breakpoint_id,
                function_id,
                bytecode_index,
            } => Reply::ProcessBreakpoint {
                process_id,
                breakpoint_id,
                function_id: ids.function_from_wire(function_id),
                bytecode_index,
            },
            Reply::UncaughtException {
                process_id,
                function_id,
                bytecode_index,
            } => Reply::UncaughtException {
                process_id,
                function_id: ids.function_from_wire(function_id),
                bytecode_index,
            },
            Reply::ProcessBacktrace {
                function_ids,
                bytecode_indices,
            } => Reply::ProcessBacktrace {
                function_ids: function_ids
                    .into_iter()
                    .map(|id| ids.function_from_wire(id))
                    .collect(),
                bytecode_indices,
            },
            Reply::InstanceStructure {
                class_id,
                field_count,
            } => Reply::InstanceStructure {
                class_id: ids.class_from_wire(class_id),
                field_count,
            },
            other => other,
        }
    }
}
