//! Scripted fake VM and helpers shared by the session tests.
//!
//! The fake VM is a task on the far end of an in-memory duplex pipe. It
//! follows a fixed script of expectations and replies, speaking real wire
//! bytes through the same codec the client uses, and returns every command
//! it received so tests can assert on the outbound traffic.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::DuplexStream;
use tokio::task::JoinHandle;

use ember_debug::{
    BackTraceFrame, Breakpoint, CompilationDelta, FunctionInfo, FunctionKind, ProgramSystem,
    RemoteObject, SessionListener, SourceLocation, SourceMap, SourceMapEntry,
};
use ember_wire::{Command, FrameReader, FrameWriter, Literal, Opcode, Reply};

/// One step of a fake VM script.
pub enum VmStep {
    /// Read one command and assert its opcode.
    Expect(Opcode),
    /// Write one reply.
    Send(Reply),
    /// Keep the connection open without reading or writing.
    Sleep(Duration),
    /// Drop the connection immediately.
    Close,
}

/// Run a VM script against the far end of an in-memory connection.
///
/// The stream is dropped when the script ends, which the client observes as
/// a clean close. The returned task yields every command the VM received.
pub fn run_script(stream: DuplexStream, steps: Vec<VmStep>) -> JoinHandle<Vec<Command>> {
    tokio::spawn(async move {
        let (read_half, write_half) = tokio::io::split(stream);
        let mut reader = FrameReader::new(read_half);
        let mut writer = FrameWriter::new(write_half);
        let mut received = Vec::new();
        for step in steps {
            match step {
                VmStep::Expect(opcode) => {
                    let frame = reader
                        .next_frame()
                        .await
                        .expect("fake VM failed to read")
                        .expect("fake VM hit EOF while expecting a command");
                    let command = Command::decode(&frame).expect("fake VM failed to decode");
                    assert_eq!(command.opcode(), opcode, "fake VM script expectation");
                    received.push(command);
                }
                VmStep::Send(reply) => {
                    writer
                        .write_encoded(&reply.encode())
                        .await
                        .expect("fake VM failed to write");
                }
                VmStep::Sleep(duration) => tokio::time::sleep(duration).await,
                VmStep::Close => break,
            }
        }
        received
    })
}

/// The script prefix produced by `initialize` in live-editing mode with one
/// empty delta: debugging request, live editing, spawn.
pub fn boot_steps() -> Vec<VmStep> {
    vec![
        VmStep::Expect(Opcode::Debugging),
        VmStep::Send(Reply::DebuggingReply {
            is_from_snapshot: false,
            snapshot_hash: 0,
        }),
        VmStep::Expect(Opcode::LiveEditing),
        VmStep::Expect(Opcode::ProcessSpawnForMain),
    ]
}

/// Script steps for setting one breakpoint that the VM accepts with `id`.
pub fn set_breakpoint_steps(id: i32) -> Vec<VmStep> {
    vec![
        VmStep::Expect(Opcode::PushFromMap),
        VmStep::Expect(Opcode::ProcessSetBreakpoint),
        VmStep::Send(Reply::ProcessSetBreakpoint { value: id }),
    ]
}

/// A shared, thread-safe log of listener events.
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<String>>>,
}

impl EventLog {
    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn contains(&self, event: &str) -> bool {
        self.events.lock().unwrap().iter().any(|e| e == event)
    }

    pub fn count(&self, event: &str) -> usize {
        self.events.lock().unwrap().iter().filter(|e| *e == event).count()
    }
}

/// A listener that records every notification as a readable string.
pub struct TraceListener {
    log: EventLog,
}

impl TraceListener {
    pub fn new() -> (Self, EventLog) {
        let log = EventLog::default();
        (Self { log: log.clone() }, log)
    }
}

impl SessionListener for TraceListener {
    fn process_start(&mut self, process_id: u32) {
        self.log.push(format!("processStart {process_id}"));
    }
    fn process_runnable(&mut self, process_id: u32) {
        self.log.push(format!("processRunnable {process_id}"));
    }
    fn process_exit(&mut self, process_id: u32) {
        self.log.push(format!("processExit {process_id}"));
    }
    fn pause_start(&mut self, process_id: u32) {
        self.log.push(format!("pauseStart {process_id}"));
    }
    fn pause_breakpoint(&mut self, process_id: u32, frame: &BackTraceFrame, breakpoint: &Breakpoint) {
        self.log.push(format!(
            "pauseBreakpoint {process_id} fn{}:{} bp{}",
            frame.function_id, frame.bytecode_pointer, breakpoint.id
        ));
    }
    fn pause_interrupted(&mut self, process_id: u32, frame: &BackTraceFrame) {
        self.log.push(format!(
            "pauseInterrupted {process_id} fn{}:{}",
            frame.function_id, frame.bytecode_pointer
        ));
    }
    fn pause_exception(&mut self, process_id: u32, frame: &BackTraceFrame, thrown: &RemoteObject) {
        let rendered = match thrown.as_literal() {
            Some(Literal::Str(s)) => s.clone(),
            other => format!("{other:?}"),
        };
        self.log.push(format!(
            "pauseException {process_id} fn{}:{} {rendered}",
            frame.function_id, frame.bytecode_pointer
        ));
    }
    fn resume(&mut self, process_id: u32) {
        self.log.push(format!("resume {process_id}"));
    }
    fn breakpoint_added(&mut self, _process_id: u32, breakpoint: &Breakpoint) {
        self.log.push(format!("breakpointAdded bp{}", breakpoint.id));
    }
    fn breakpoint_removed(&mut self, _process_id: u32, breakpoint: &Breakpoint) {
        self.log.push(format!("breakpointRemoved bp{}", breakpoint.id));
    }
    fn write_stdout(&mut self, process_id: u32, bytes: &[u8]) {
        self.log.push(format!(
            "writeStdOut {process_id} {}",
            String::from_utf8_lossy(bytes)
        ));
    }
    fn write_stderr(&mut self, process_id: u32, bytes: &[u8]) {
        self.log.push(format!(
            "writeStdErr {process_id} {}",
            String::from_utf8_lossy(bytes)
        ));
    }
    fn lost_connection(&mut self) {
        self.log.push("lostConnection".into());
    }
    fn terminated(&mut self) {
        self.log.push("terminated".into());
    }
}

fn location(line: u32) -> SourceLocation {
    SourceLocation {
        file: 1,
        line,
        column: 1,
    }
}

fn entries(rows: &[(u32, u32)]) -> Vec<SourceMapEntry> {
    rows.iter()
        .map(|&(bytecode_index, line)| SourceMapEntry {
            bytecode_index,
            location: location(line),
        })
        .collect()
}

/// Function id of `main.fib` in the test system.
pub const FIB: u32 = 17;
/// Function id of `main.boom` in the test system.
pub const BOOM: u32 = 9;
/// Function id of the internal trampoline in the test system.
pub const TRAMPOLINE: u32 = 4;

/// A small compiled program: a main, a fib with three source lines, a boom
/// with two, and one internal trampoline.
pub fn test_system() -> Arc<ProgramSystem> {
    Arc::new(ProgramSystem::new(
        vec![
            FunctionInfo {
                id: 1,
                name: "main".into(),
                kind: FunctionKind::Normal,
                source_map: SourceMap::new(entries(&[(0, 1)])),
            },
            FunctionInfo {
                id: FIB,
                name: "main.fib".into(),
                kind: FunctionKind::Normal,
                source_map: SourceMap::new(entries(&[(0, 10), (4, 11), (9, 12)])),
            },
            FunctionInfo {
                id: BOOM,
                name: "main.boom".into(),
                kind: FunctionKind::Normal,
                source_map: SourceMap::new(entries(&[(12, 20), (13, 21)])),
            },
            FunctionInfo {
                id: TRAMPOLINE,
                name: "core.trampoline".into(),
                kind: FunctionKind::Internal,
                source_map: SourceMap::default(),
            },
        ],
        vec![],
    ))
}

/// An empty compilation delta carrying the test system.
pub fn delta(system: &Arc<ProgramSystem>) -> CompilationDelta {
    CompilationDelta {
        commands: vec![],
        system: system.clone(),
    }
}
