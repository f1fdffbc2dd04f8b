//! The debug session controller.
//!
//! [`DebugSession`] owns the connection, drives the request/reply engine,
//! maintains the lifecycle and debug state, and exposes the high-level
//! debugging operations. A single driver task owns the session; replies are
//! consumed strictly in wire order.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex as TokioMutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use ember_wire::{
    Command, Connection, ConnectionReader, ConnectionWriter, ExpectedReplies, IdentityTranslate,
    MapId, Reply,
};

use crate::backtrace::{BackTrace, BackTraceFrame};
use crate::breakpoint::{Breakpoint, FunctionRef};
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::exit_codes;
use crate::info::{info_file_path, load_name_offsets};
use crate::listener::{ListenerRegistry, SessionListener};
use crate::program::{CompilationDelta, ProgramSystem, SourceLocation, SourceResolver};
use crate::session::{VmLifecycle, VmState};
use crate::state::DebugState;
use crate::translate::{IdOffsetMapping, IdTranslator};
use crate::value::RemoteObject;

/// Stdio events carry this process id until the VM routes stdio per process.
const STDIO_PROCESS_ID: u32 = 0;

/// The main process id used in spawn/run/exit notifications.
const MAIN_PROCESS_ID: u32 = 0;

/// The client-side driver of one VM debug connection.
pub struct DebugSession {
    config: SessionConfig,
    lifecycle: VmLifecycle,
    state: DebugState,
    listeners: ListenerRegistry,
    translator: IdTranslator,
    system: Arc<ProgramSystem>,
    reader: ConnectionReader,
    writer: Arc<TokioMutex<ConnectionWriter>>,
    description: String,
    cancel: CancellationToken,
    connection_lost: bool,
    interactive_exit_code: i32,
    vm_exit: Option<tokio::sync::oneshot::Receiver<()>>,
}

impl DebugSession {
    pub fn new(connection: Connection, config: SessionConfig) -> Self {
        let (reader, writer, description) = connection.into_parts();
        let show_internal_frames = config.show_internal_frames;
        Self {
            config,
            lifecycle: VmLifecycle::new(),
            state: DebugState::new(show_internal_frames),
            listeners: ListenerRegistry::new(),
            translator: IdTranslator::Identity,
            system: Arc::new(ProgramSystem::default()),
            reader,
            writer: Arc::new(TokioMutex::new(writer)),
            description,
            cancel: CancellationToken::new(),
            connection_lost: false,
            interactive_exit_code: 0,
            vm_exit: None,
        }
    }

    pub fn vm_state(&self) -> VmState {
        self.lifecycle.state()
    }

    /// Exit code of the last handled process stop.
    pub fn interactive_exit_code(&self) -> i32 {
        self.interactive_exit_code
    }

    pub fn debug_state(&self) -> &DebugState {
        &self.state
    }

    pub fn system(&self) -> &Arc<ProgramSystem> {
        &self.system
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn add_listener(&mut self, listener: Box<dyn SessionListener>) {
        self.listeners.add(listener);
    }

    /// Register a future resolved when the external VM process exits;
    /// awaited by [`DebugSession::terminate`].
    pub fn set_vm_exit(&mut self, exit: tokio::sync::oneshot::Receiver<()>) {
        self.vm_exit = Some(exit);
    }

    /// A handle that can inject a debug interrupt while an operation on the
    /// session is awaiting its stop reply.
    pub fn interrupt_handle(&self) -> InterruptHandle {
        InterruptHandle {
            writer: self.writer.clone(),
            cancel: self.cancel.clone(),
        }
    }

    /// Select the n-th visible frame of the current back trace.
    pub fn select_frame(&mut self, visible_frame: usize) -> Result<(), SessionError> {
        self.state.select_frame(visible_frame)
    }

    /// Flip internal-frame visibility; returns the new setting.
    pub fn toggle_internal_frames(&mut self) -> bool {
        self.state.toggle_internal_frames()
    }

    /// The source location of the current top frame, if it has source info.
    pub fn current_location(&self) -> Option<SourceLocation> {
        let frame = self.state.top_frame()?;
        self.location_of(frame.function_id, frame.bytecode_pointer)
    }

    /// The exception that stopped the process, once fetched.
    pub fn uncaught_exception(&self) -> Option<&RemoteObject> {
        self.state.uncaught_exception()
    }

    // -----------------------------------------------------------------
    // Request/reply engine
    // -----------------------------------------------------------------

    async fn send_command(&mut self, command: &Command) -> Result<(), SessionError> {
        if self.lifecycle.is_terminated() {
            return Err(SessionError::SessionTerminated);
        }
        if self.connection_lost {
            // The loss materializes as a sentinel on the next read.
            return Ok(());
        }
        trace!(opcode = ?command.opcode(), "send");
        let bytes = command.encode(&self.translator);
        let mut writer = self.writer.lock().await;
        if let Err(err) = writer.write_encoded(&bytes).await {
            drop(writer);
            warn!("write failed, treating connection as lost: {err}");
            self.connection_lost = true;
        }
        Ok(())
    }

    /// Read the next non-stdio inbound command.
    ///
    /// Stdout/stderr frames are dispatched to listeners and never returned;
    /// they do not count against any command's expected replies. Once the
    /// stream dies this returns the `ConnectionError` sentinel (with
    /// `force`) or `None` (without, used only by the shutdown drain), and
    /// keeps doing so on every subsequent call.
    async fn read_next_reply(&mut self, force: bool) -> Option<Reply> {
        loop {
            if self.connection_lost {
                return force.then_some(Reply::ConnectionError);
            }
            let next = tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.connection_lost = true;
                    continue;
                }
                frame = self.reader.next_frame() => frame,
            };
            let frame = match next {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    debug!("VM closed the connection");
                    self.connection_lost = true;
                    continue;
                }
                Err(err) => {
                    warn!("inbound stream failed: {err}");
                    self.connection_lost = true;
                    continue;
                }
            };
            let reply = match Reply::decode(&frame) {
                Ok(reply) => reply.translate_ids(&self.translator),
                Err(err) => {
                    warn!("undecodable frame (opcode {:#04x}): {err}", frame.opcode);
                    self.connection_lost = true;
                    continue;
                }
            };
            match reply {
                Reply::StdoutData { bytes } => {
                    self.listeners
                        .notify(|l| l.write_stdout(STDIO_PROCESS_ID, &bytes));
                }
                Reply::StderrData { bytes } => {
                    self.listeners
                        .notify(|l| l.write_stderr(STDIO_PROCESS_ID, &bytes));
                }
                other => {
                    trace!(opcode = ?other.opcode(), "recv");
                    return Some(other);
                }
            }
        }
    }

    /// A forced read always yields a reply; the sentinel stands in for a
    /// dead connection.
    async fn read_forced(&mut self) -> Reply {
        self.read_next_reply(true)
            .await
            .unwrap_or(Reply::ConnectionError)
    }

    /// Run a sequence of fixed-reply commands: send each in order, consume
    /// exactly its declared reply count, and return the last reply seen
    /// (`None` when the sequence expects zero replies).
    pub async fn run_commands(
        &mut self,
        commands: &[Command],
    ) -> Result<Option<Reply>, SessionError> {
        for command in commands {
            if command.expected_replies() == ExpectedReplies::Manual {
                return Err(SessionError::ManualCommandRejected {
                    opcode: command.opcode(),
                });
            }
        }
        let mut last = None;
        for command in commands {
            self.send_command(command).await?;
            if let ExpectedReplies::Fixed(count) = command.expected_replies() {
                for _ in 0..count {
                    last = Some(self.read_forced().await);
                }
            }
        }
        Ok(last)
    }

    pub async fn run_command(&mut self, command: Command) -> Result<Option<Reply>, SessionError> {
        self.run_commands(std::slice::from_ref(&command)).await
    }

    /// Unwrap an engine reply for a query operation, converting the
    /// connection-error sentinel into a handled stop plus an error.
    async fn expect_reply(&mut self, reply: Option<Reply>) -> Result<Reply, SessionError> {
        match reply {
            Some(Reply::ConnectionError) => {
                self.handle_process_stop(Reply::ConnectionError).await?;
                Err(SessionError::ConnectionLost)
            }
            Some(reply) => Ok(reply),
            None => Err(SessionError::ProtocolViolation(
                "expected a reply, command produced none".into(),
            )),
        }
    }

    // -----------------------------------------------------------------
    // Process-stop handling
    // -----------------------------------------------------------------

    /// Handle a reply that stops the process: reset pause-scoped state, set
    /// the exit code, advance the lifecycle, and notify listeners. Returns
    /// the reply for the caller to inspect.
    async fn handle_process_stop(&mut self, reply: Reply) -> Result<Reply, SessionError> {
        self.state.reset();
        match &reply {
            Reply::ProcessBreakpoint {
                process_id,
                breakpoint_id,
                function_id,
                bytecode_index,
            } => {
                self.interactive_exit_code = 0;
                self.lifecycle.paused()?;
                self.state.set_current_process_id(*process_id);
                let frame = self.resolve_frame(*function_id, *bytecode_index);
                self.state.set_top_frame(Some(frame));
                match self.state.breakpoint_for_wire_id(*breakpoint_id) {
                    Some(breakpoint) => {
                        let process_id = *process_id;
                        self.listeners
                            .notify(|l| l.pause_breakpoint(process_id, &frame, &breakpoint));
                    }
                    None => {
                        let process_id = *process_id;
                        self.listeners
                            .notify(|l| l.pause_interrupted(process_id, &frame));
                    }
                }
            }
            Reply::UncaughtException {
                process_id,
                function_id,
                bytecode_index,
            } => {
                self.interactive_exit_code = exit_codes::UNCAUGHT_EXCEPTION;
                self.lifecycle.terminating()?;
                self.state.set_current_process_id(*process_id);
                let frame = self.resolve_frame(*function_id, *bytecode_index);
                self.state.set_top_frame(Some(frame));
                let thrown = self.fetch_uncaught_exception().await?;
                self.state.set_uncaught_exception(Some(thrown.clone()));
                let process_id = *process_id;
                self.listeners
                    .notify(|l| l.pause_exception(process_id, &frame, &thrown));
            }
            Reply::ProcessCompileTimeError => {
                self.interactive_exit_code = exit_codes::COMPILE_TIME_ERROR;
                self.lifecycle.terminating()?;
                self.listeners.notify(|l| l.process_exit(MAIN_PROCESS_ID));
            }
            Reply::ProcessTerminated => {
                self.interactive_exit_code = 0;
                self.lifecycle.terminating()?;
                self.listeners.notify(|l| l.process_exit(MAIN_PROCESS_ID));
            }
            Reply::ConnectionError => {
                self.interactive_exit_code = exit_codes::CONNECTION_ERROR;
                if !self.lifecycle.is_terminated() {
                    // terminating → terminated in one step; there is nothing
                    // left to wind down on a dead connection.
                    self.lifecycle.force_terminated();
                    self.listeners.notify(|l| l.lost_connection());
                }
            }
            other => {
                return Err(SessionError::ProtocolViolation(format!(
                    "unexpected reply in stop handling: {:?}",
                    other.opcode()
                )))
            }
        }
        Ok(reply)
    }

    fn resolve_frame(&self, function_id: u32, bytecode_pointer: u32) -> BackTraceFrame {
        let is_visible = match self.system.function_by_id(function_id) {
            Some(function) => self.state.show_internal_frames() || !function.is_internal(),
            // Unknown function id: substitute a sentinel frame.
            None => false,
        };
        BackTraceFrame {
            function_id,
            bytecode_pointer,
            is_visible,
        }
    }

    fn location_of(&self, function_id: u32, bytecode_pointer: u32) -> Option<SourceLocation> {
        self.system
            .function_by_id(function_id)?
            .source_map
            .location_for(bytecode_pointer)
    }

    async fn fetch_uncaught_exception(&mut self) -> Result<RemoteObject, SessionError> {
        self.send_command(&Command::ProcessUncaughtExceptionRequest)
            .await?;
        self.read_structured_object().await
    }

    /// Read one structured object: a primitive frame, or a structure header
    /// followed by one leaf frame per field/element.
    async fn read_structured_object(&mut self) -> Result<RemoteObject, SessionError> {
        match self.read_forced().await {
            Reply::Value(literal) => Ok(RemoteObject::Value(literal)),
            Reply::InstanceStructure {
                class_id,
                field_count,
            } => {
                let mut fields = Vec::with_capacity(field_count as usize);
                for _ in 0..field_count {
                    fields.push(self.read_object_leaf().await?);
                }
                Ok(RemoteObject::Instance { class_id, fields })
            }
            Reply::ArrayStructure {
                start_index,
                end_index,
            } => {
                let count = end_index.saturating_sub(start_index);
                let mut elements = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    elements.push(self.read_object_leaf().await?);
                }
                Ok(RemoteObject::Array {
                    start_index,
                    end_index,
                    elements,
                })
            }
            Reply::ConnectionError => {
                Box::pin(self.handle_process_stop(Reply::ConnectionError)).await?;
                Err(SessionError::ConnectionLost)
            }
            other => Ok(RemoteObject::Error(format!(
                "unexpected reply {:?}",
                other.opcode()
            ))),
        }
    }

    async fn read_object_leaf(&mut self) -> Result<RemoteObject, SessionError> {
        match self.read_forced().await {
            Reply::Value(literal) => Ok(RemoteObject::Value(literal)),
            Reply::ConnectionError => {
                Box::pin(self.handle_process_stop(Reply::ConnectionError)).await?;
                Err(SessionError::ConnectionLost)
            }
            other => Ok(RemoteObject::Error(format!(
                "unexpected reply {:?}",
                other.opcode()
            ))),
        }
    }

    // -----------------------------------------------------------------
    // Connection setup
    // -----------------------------------------------------------------

    /// Exchange version handshakes with the VM.
    ///
    /// The handshake is re-sent on an interval until the VM answers or the
    /// deadline fires. Returns the reply if it is a handshake result, `None`
    /// if the VM answered with something else.
    pub async fn handshake(&mut self, version: &str) -> Result<Option<Reply>, SessionError> {
        let deadline = Instant::now() + self.config.handshake_timeout;
        let retry_interval = self.config.handshake_retry_interval;
        let command = Command::HandShake {
            version: version.to_string(),
        };
        self.send_command(&command).await?;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Err(SessionError::HandshakeTimeout(
                    self.config.handshake_timeout.as_secs(),
                ));
            }
            let window = retry_interval.min(deadline - now);
            match tokio::time::timeout(window, self.read_next_reply(true)).await {
                Ok(reply) => {
                    return Ok(match reply {
                        Some(reply @ Reply::HandShakeResult { .. }) => Some(reply),
                        _ => None,
                    });
                }
                Err(_elapsed) => {
                    if Instant::now() >= deadline {
                        return Err(SessionError::HandshakeTimeout(
                            self.config.handshake_timeout.as_secs(),
                        ));
                    }
                    self.send_command(&command).await?;
                }
            }
        }
    }

    /// Put the VM into debugging mode and load the program.
    ///
    /// In snapshot mode the info file next to `snapshot_location` is loaded,
    /// its hash verified against the VM's, and the id/offset translator
    /// installed. Otherwise the compilation deltas are applied over live
    /// editing. Ends by spawning the main process if none exists yet.
    pub async fn initialize(
        &mut self,
        deltas: &[CompilationDelta],
        snapshot_location: Option<&Path>,
    ) -> Result<(), SessionError> {
        if let Some(delta) = deltas.last() {
            self.system = delta.system.clone();
        }
        let reply = self.run_command(Command::Debugging).await?;
        let (is_from_snapshot, snapshot_hash) = match reply {
            Some(Reply::DebuggingReply {
                is_from_snapshot,
                snapshot_hash,
            }) => (is_from_snapshot, snapshot_hash),
            Some(Reply::ConnectionError) => {
                self.handle_process_stop(Reply::ConnectionError).await?;
                return Err(SessionError::ConnectionLost);
            }
            other => {
                return Err(SessionError::ProtocolViolation(format!(
                    "unexpected reply to debugging request: {other:?}"
                )))
            }
        };

        if is_from_snapshot {
            let info_path = match snapshot_location {
                Some(snapshot) => info_file_path(snapshot),
                None => {
                    self.shutdown(true).await?;
                    return Err(SessionError::InfoFileNotFound(PathBuf::from(
                        "<no snapshot location>",
                    )));
                }
            };
            let names = match load_name_offsets(&info_path) {
                Ok(names) => names,
                Err(err) => {
                    self.shutdown(true).await?;
                    return Err(err);
                }
            };
            if names.snapshot_hash != snapshot_hash {
                self.shutdown(true).await?;
                return Err(SessionError::SnapshotHashMismatch {
                    expected: names.snapshot_hash,
                    actual: snapshot_hash,
                });
            }
            self.translator =
                IdTranslator::Offset(IdOffsetMapping::from_system(&self.system, &names));
        } else {
            self.run_command(Command::LiveEditing).await?;
            for delta in deltas {
                self.run_commands(&delta.commands).await?;
            }
        }

        if self.lifecycle.state() == VmState::Initial {
            self.spawn_process(&[]).await?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------
    // Process control
    // -----------------------------------------------------------------

    /// Spawn the main process with the given arguments.
    pub async fn spawn_process(&mut self, arguments: &[String]) -> Result<(), SessionError> {
        self.run_command(Command::ProcessSpawnForMain {
            arguments: arguments.to_vec(),
        })
        .await?;
        self.lifecycle.spawned()?;
        self.listeners.notify(|l| l.pause_start(MAIN_PROCESS_ID));
        self.listeners
            .notify(|l| l.process_runnable(MAIN_PROCESS_ID));
        Ok(())
    }

    /// Start the spawned process and wait for its first stop. Returns the
    /// interactive exit code of that stop.
    pub async fn run(&mut self) -> Result<i32, SessionError> {
        if self.lifecycle.state() != VmState::Spawned {
            return Err(SessionError::NotSpawned(self.lifecycle.state()));
        }
        self.send_command(&Command::ProcessRun).await?;
        self.lifecycle.running()?;
        self.listeners.notify(|l| l.process_start(MAIN_PROCESS_ID));
        self.listeners
            .notify(|l| l.process_runnable(MAIN_PROCESS_ID));
        self.listeners.notify(|l| l.resume(MAIN_PROCESS_ID));
        let stop = self.read_forced().await;
        self.handle_process_stop(stop).await?;
        Ok(self.interactive_exit_code)
    }

    /// Resume the paused process and wait for the next stop.
    pub async fn cont(&mut self) -> Result<Reply, SessionError> {
        self.require_paused()?;
        self.state.reset();
        self.lifecycle.running()?;
        self.listeners.notify(|l| l.resume(MAIN_PROCESS_ID));
        let reply = self.run_command(Command::ProcessContinue).await?;
        let stop = reply.ok_or_else(|| {
            SessionError::ProtocolViolation("continue produced no stop reply".into())
        })?;
        self.handle_process_stop(stop).await
    }

    /// Interrupt a running process without waiting for the stop; the
    /// operation awaiting the stop reply observes the pause.
    pub async fn interrupt(&mut self) -> Result<(), SessionError> {
        self.send_command(&Command::ProcessDebugInterrupt).await
    }

    // -----------------------------------------------------------------
    // Stepping
    // -----------------------------------------------------------------

    /// Source-level single step.
    ///
    /// Issues bytecode steps (targeted where the source map names the next
    /// location, single-bytecode otherwise) until the source location
    /// changes, the process is no longer paused, or a step makes no
    /// progress.
    pub async fn step(&mut self) -> Result<Reply, SessionError> {
        self.require_paused()?;
        let previous = self.current_location();
        let mut stop;
        loop {
            let before = self.state.top_frame().copied();
            let target = previous.and_then(|location| self.next_bytecode_leaving(location));
            self.state.reset();
            self.lifecycle.running()?;
            let reply = match target {
                Some((function_id, bytecode_index)) => {
                    self.run_commands(&[
                        Command::PushFromMap {
                            map: MapId::Methods,
                            id: function_id,
                        },
                        Command::ProcessStepTo { bytecode_index },
                    ])
                    .await?
                }
                None => self.run_command(Command::ProcessStep).await?,
            };
            let reply = reply.ok_or_else(|| {
                SessionError::ProtocolViolation("step produced no stop reply".into())
            })?;
            stop = self.handle_process_stop(reply).await?;
            if !self.lifecycle.is_paused() {
                break;
            }
            if self.current_location() != previous {
                break;
            }
            if self.state.top_frame().copied() == before {
                // The last bytecode step made no progress.
                break;
            }
        }
        Ok(stop)
    }

    /// Source-level step over calls.
    ///
    /// Each iteration the VM installs a one-shot breakpoint past the call
    /// and resumes; if the stop is somewhere else while the process is still
    /// paused, the one-shot is deleted before the next iteration.
    pub async fn step_over(&mut self) -> Result<Reply, SessionError> {
        self.require_paused()?;
        let previous = self.current_location();
        let mut stop;
        loop {
            let before = self.state.top_frame().copied();
            self.state.reset();
            self.lifecycle.running()?;
            self.send_command(&Command::ProcessStepOver).await?;
            let one_shot = match self.read_forced().await {
                Reply::ProcessSetBreakpoint { value } => value,
                Reply::ConnectionError => {
                    stop = self.handle_process_stop(Reply::ConnectionError).await?;
                    break;
                }
                other => {
                    return Err(SessionError::ProtocolViolation(format!(
                        "expected one-shot breakpoint reply, got {:?}",
                        other.opcode()
                    )))
                }
            };
            let reply = self.read_forced().await;
            stop = self.handle_process_stop(reply).await?;
            self.delete_missed_one_shot(&stop, one_shot).await?;
            if !self.lifecycle.is_paused() {
                break;
            }
            if self.current_location() != previous {
                break;
            }
            if self.state.top_frame().copied() == before {
                break;
            }
        }
        Ok(stop)
    }

    /// Run until the current function returns.
    ///
    /// With at most one visible frame this degrades to [`DebugSession::cont`].
    /// After landing in the caller, a stop exactly on the recorded return
    /// location is stepped once more to move past the call site.
    pub async fn step_out(&mut self) -> Result<Reply, SessionError> {
        self.require_paused()?;
        let trace = self.back_trace().await?;
        if trace.visible_count() <= 1 {
            return self.cont().await;
        }
        let return_location = trace
            .visible_frame(1)
            .copied()
            .and_then(|frame| self.location_of(frame.function_id, frame.bytecode_pointer));

        let mut stop;
        loop {
            self.state.reset();
            self.lifecycle.running()?;
            self.send_command(&Command::ProcessStepOut).await?;
            let one_shot = match self.read_forced().await {
                Reply::ProcessSetBreakpoint { value } => value,
                Reply::ConnectionError => {
                    return self.handle_process_stop(Reply::ConnectionError).await;
                }
                other => {
                    return Err(SessionError::ProtocolViolation(format!(
                        "expected one-shot breakpoint reply, got {:?}",
                        other.opcode()
                    )))
                }
            };
            let reply = self.read_forced().await;
            stop = self.handle_process_stop(reply).await?;
            let hit_one_shot = matches!(
                &stop,
                Reply::ProcessBreakpoint { breakpoint_id, .. } if *breakpoint_id == one_shot
            );
            if !hit_one_shot {
                self.delete_missed_one_shot(&stop, one_shot).await?;
                return Ok(stop);
            }
            if !self.lifecycle.is_paused() {
                return Ok(stop);
            }
            if self.state.top_frame().is_some_and(|f| f.is_visible) {
                break;
            }
        }

        if return_location.is_some() && self.current_location() == return_location {
            return self.step().await;
        }
        Ok(stop)
    }

    /// Delete a one-shot breakpoint the stop did not consume. Nothing is
    /// sent when the session is no longer paused; on a lost connection the
    /// VM cleans up its own one-shots.
    async fn delete_missed_one_shot(
        &mut self,
        stop: &Reply,
        one_shot: i32,
    ) -> Result<(), SessionError> {
        let hit = matches!(
            stop,
            Reply::ProcessBreakpoint { breakpoint_id, .. } if *breakpoint_id == one_shot
        );
        if !hit && self.lifecycle.is_paused() && one_shot >= 0 {
            self.run_command(Command::ProcessDeleteOneShotBreakpoint {
                id: one_shot as u32,
            })
            .await?;
        }
        Ok(())
    }

    /// Restart the n-th visible frame: unwind to it and re-enter the
    /// function, stopping at its first instruction.
    pub async fn restart_frame(&mut self, visible_frame: usize) -> Result<Reply, SessionError> {
        self.require_paused()?;
        let trace = self.back_trace().await?;
        let actual = trace
            .actual_frame_number(visible_frame)
            .ok_or(SessionError::InvalidFrame(visible_frame))?;
        self.state.reset();
        self.lifecycle.running()?;
        let reply = self
            .run_command(Command::ProcessRestartFrame {
                frame: actual as u32,
            })
            .await?;
        let stop = reply.ok_or_else(|| {
            SessionError::ProtocolViolation("frame restart produced no stop reply".into())
        })?;
        self.handle_process_stop(stop).await
    }

    fn next_bytecode_leaving(&self, location: SourceLocation) -> Option<(u32, u32)> {
        let frame = self.state.top_frame()?;
        let function = self.system.function_by_id(frame.function_id)?;
        let target = function
            .source_map
            .next_index_leaving(frame.bytecode_pointer, location)?;
        Some((frame.function_id, target))
    }

    // -----------------------------------------------------------------
    // Inspection
    // -----------------------------------------------------------------

    /// The current process's stack, cached until the next resume.
    pub async fn back_trace(&mut self) -> Result<BackTrace, SessionError> {
        self.require_stopped()?;
        if let Some(trace) = self.state.back_trace() {
            return Ok(trace.clone());
        }
        let process_id = self.state.current_process_id();
        let reply = self
            .run_command(Command::ProcessBacktraceRequest { process_id })
            .await?;
        let reply = self.expect_reply(reply).await?;
        let trace = match reply {
            Reply::ProcessBacktrace {
                function_ids,
                bytecode_indices,
            } => self.trace_from_parts(&function_ids, &bytecode_indices),
            other => {
                return Err(SessionError::ProtocolViolation(format!(
                    "unexpected reply to backtrace request: {:?}",
                    other.opcode()
                )))
            }
        };
        self.state.set_back_trace(Some(trace.clone()));
        Ok(trace)
    }

    /// Stacks of all fibers of the current process, in fiber order.
    pub async fn fibers(&mut self) -> Result<Vec<BackTrace>, SessionError> {
        self.require_paused()?;
        let reply = self
            .run_commands(&[
                Command::NewMap { map: MapId::Fibers },
                Command::ProcessAddFibersToMap,
            ])
            .await?;
        let reply = self.expect_reply(reply).await?;
        let count = match reply {
            Reply::ProcessNumberOfStacks { value } => value,
            other => {
                return Err(SessionError::ProtocolViolation(format!(
                    "unexpected reply to fiber enumeration: {:?}",
                    other.opcode()
                )))
            }
        };
        let mut stacks = Vec::with_capacity(count as usize);
        for fiber in 0..count {
            let reply = self
                .run_command(Command::ProcessFiberBacktraceRequest { fiber })
                .await?;
            let reply = self.expect_reply(reply).await?;
            match reply {
                Reply::ProcessBacktrace {
                    function_ids,
                    bytecode_indices,
                } => stacks.push(self.trace_from_parts(&function_ids, &bytecode_indices)),
                other => {
                    return Err(SessionError::ProtocolViolation(format!(
                        "unexpected reply to fiber backtrace: {:?}",
                        other.opcode()
                    )))
                }
            }
        }
        self.run_command(Command::DeleteMap { map: MapId::Fibers })
            .await?;
        Ok(stacks)
    }

    fn trace_from_parts(&self, function_ids: &[u32], bytecode_indices: &[u32]) -> BackTrace {
        let frames = function_ids
            .iter()
            .zip(bytecode_indices)
            .map(|(&function_id, &bytecode_index)| self.resolve_frame(function_id, bytecode_index))
            .collect();
        BackTrace::new(frames)
    }

    /// Ids of all live processes on the VM.
    pub async fn processes(&mut self) -> Result<Vec<u32>, SessionError> {
        let reply = self.run_command(Command::ProcessGetProcessIds).await?;
        let reply = self.expect_reply(reply).await?;
        match reply {
            Reply::ProcessGetProcessIdsResult { ids } => Ok(ids),
            other => Err(SessionError::ProtocolViolation(format!(
                "unexpected reply to process enumeration: {:?}",
                other.opcode()
            ))),
        }
    }

    /// Read a local variable slot of the selected frame.
    pub async fn local(&mut self, slot: u32) -> Result<RemoteObject, SessionError> {
        let frame = self.selected_actual_frame().await?;
        self.send_command(&Command::ProcessLocal { frame, slot })
            .await?;
        self.read_structured_object().await
    }

    /// Read a local variable slot with one level of structure expanded.
    pub async fn local_structure(&mut self, slot: u32) -> Result<RemoteObject, SessionError> {
        let frame = self.selected_actual_frame().await?;
        self.send_command(&Command::ProcessLocalStructure { frame, slot })
            .await?;
        self.read_structured_object().await
    }

    async fn selected_actual_frame(&mut self) -> Result<u32, SessionError> {
        self.require_paused()?;
        let trace = self.back_trace().await?;
        let selected = self.state.current_frame_number();
        trace
            .actual_frame_number(selected)
            .map(|index| index as u32)
            .ok_or(SessionError::InvalidFrame(selected))
    }

    // -----------------------------------------------------------------
    // Breakpoints
    // -----------------------------------------------------------------

    /// Set a breakpoint in every function with the given name. Returns the
    /// breakpoints the VM accepted.
    pub async fn set_breakpoint_at_method(
        &mut self,
        method_name: &str,
        bytecode_index: u32,
    ) -> Result<Vec<Breakpoint>, SessionError> {
        let targets: Vec<(u32, String)> = self
            .system
            .functions_named(method_name)
            .map(|function| (function.id, function.name.clone()))
            .collect();
        let mut set = Vec::new();
        for (function_id, name) in targets {
            if let Some(breakpoint) = self
                .set_breakpoint_helper(function_id, name, bytecode_index)
                .await?
            {
                set.push(breakpoint);
            }
        }
        Ok(set)
    }

    /// Set a breakpoint at `line:column` of a source file. Returns `None`
    /// when the position does not resolve to a breakable location.
    pub async fn set_file_breakpoint(
        &mut self,
        resolver: &dyn SourceResolver,
        uri: &str,
        line: u32,
        column: u32,
    ) -> Result<Option<Breakpoint>, SessionError> {
        let position = match resolver.position_in_file(uri, line, column) {
            Some(position) => position,
            None => return Ok(None),
        };
        self.set_position_breakpoint(resolver, uri, position).await
    }

    /// Set a breakpoint at the first match of `pattern` on a line.
    pub async fn set_pattern_breakpoint(
        &mut self,
        resolver: &dyn SourceResolver,
        uri: &str,
        line: u32,
        pattern: &str,
    ) -> Result<Option<Breakpoint>, SessionError> {
        let position = match resolver.position_from_pattern(uri, line, pattern) {
            Some(position) => position,
            None => return Ok(None),
        };
        self.set_position_breakpoint(resolver, uri, position).await
    }

    async fn set_position_breakpoint(
        &mut self,
        resolver: &dyn SourceResolver,
        uri: &str,
        position: u32,
    ) -> Result<Option<Breakpoint>, SessionError> {
        let info = match resolver.debug_info_for_position(uri, position, &self.system) {
            Some(info) => info,
            None => return Ok(None),
        };
        let name = self
            .system
            .function_by_id(info.function_id)
            .map(|function| function.name.clone())
            .unwrap_or_default();
        self.set_breakpoint_helper(info.function_id, name, info.bytecode_index)
            .await
    }

    async fn set_breakpoint_helper(
        &mut self,
        function_id: u32,
        function_name: String,
        bytecode_index: u32,
    ) -> Result<Option<Breakpoint>, SessionError> {
        self.send_command(&Command::PushFromMap {
            map: MapId::Methods,
            id: function_id,
        })
        .await?;
        self.send_command(&Command::ProcessSetBreakpoint { bytecode_index })
            .await?;
        let value = match self.read_forced().await {
            Reply::ProcessSetBreakpoint { value } => value,
            Reply::ConnectionError => {
                self.handle_process_stop(Reply::ConnectionError).await?;
                return Err(SessionError::ConnectionLost);
            }
            other => {
                return Err(SessionError::ProtocolViolation(format!(
                    "unexpected reply to breakpoint request: {:?}",
                    other.opcode()
                )))
            }
        };
        let id = match u32::try_from(value) {
            Ok(id) => id,
            // The VM rejected the location.
            Err(_) => return Ok(None),
        };
        let breakpoint = Breakpoint {
            id,
            function: FunctionRef {
                id: function_id,
                name: function_name,
            },
            bytecode_index,
        };
        self.state.add_breakpoint(breakpoint.clone());
        let process_id = self.state.current_process_id();
        self.listeners
            .notify(|l| l.breakpoint_added(process_id, &breakpoint));
        Ok(Some(breakpoint))
    }

    /// Delete a breakpoint by id.
    pub async fn delete_breakpoint(&mut self, id: u32) -> Result<Breakpoint, SessionError> {
        if self.state.breakpoint(id).is_none() {
            return Err(SessionError::UnknownBreakpoint(id));
        }
        let reply = self
            .run_command(Command::ProcessDeleteBreakpoint { id })
            .await?;
        let reply = self.expect_reply(reply).await?;
        match reply {
            Reply::ProcessDeleteBreakpoint { id: deleted } if deleted == id => {}
            other => {
                return Err(SessionError::ProtocolViolation(format!(
                    "breakpoint delete acknowledged {:?}, expected id {id}",
                    other
                )))
            }
        }
        let breakpoint = self
            .state
            .take_breakpoint(id)
            .ok_or(SessionError::UnknownBreakpoint(id))?;
        let process_id = self.state.current_process_id();
        self.listeners
            .notify(|l| l.breakpoint_removed(process_id, &breakpoint));
        Ok(breakpoint)
    }

    // -----------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------

    /// Write the program state out as a snapshot, then end the session.
    pub async fn create_snapshot(&mut self, path: &Path) -> Result<Reply, SessionError> {
        let reply = self
            .run_command(Command::CreateSnapshot {
                path: path.display().to_string(),
            })
            .await?;
        let reply = self.expect_reply(reply).await?;
        let info = match reply {
            info @ Reply::ProgramInfo { .. } => info,
            other => {
                return Err(SessionError::ProtocolViolation(format!(
                    "unexpected reply to snapshot request: {:?}",
                    other.opcode()
                )))
            }
        };
        self.shutdown(false).await?;
        Ok(info)
    }

    /// End the session cooperatively: tell the VM, wait for the external
    /// process to exit if one was registered, then shut down.
    pub async fn terminate(&mut self) -> Result<(), SessionError> {
        self.run_command(Command::SessionEnd).await?;
        if let Some(exit) = self.vm_exit.take() {
            let _ = exit.await;
        }
        self.shutdown(true).await
    }

    /// Close the connection and drain pending inbound frames. A real
    /// command among them is fatal unless `ignore_extra_commands` is set.
    /// A no-op on an already-terminated session.
    pub async fn shutdown(&mut self, ignore_extra_commands: bool) -> Result<(), SessionError> {
        if self.lifecycle.is_terminated() {
            return Ok(());
        }
        {
            let mut writer = self.writer.lock().await;
            let _ = writer.shutdown().await;
        }
        while let Some(reply) = self.read_next_reply(false).await {
            if !ignore_extra_commands {
                let opcode = reply.opcode();
                self.kill().await;
                return Err(SessionError::ProtocolViolation(format!(
                    "unexpected command during shutdown: {opcode:?}"
                )));
            }
        }
        self.kill().await;
        Ok(())
    }

    /// Tear the session down unconditionally: mark it terminated, cancel
    /// the inbound reader, and close the connection. Idempotent; never
    /// fails.
    pub async fn kill(&mut self) {
        if self.lifecycle.is_terminated() {
            return;
        }
        self.lifecycle.force_terminated();
        self.connection_lost = true;
        self.cancel.cancel();
        {
            let mut writer = self.writer.lock().await;
            let _ = writer.shutdown().await;
        }
        self.listeners.notify(|l| l.terminated());
    }

    // -----------------------------------------------------------------
    // Preconditions
    // -----------------------------------------------------------------

    fn require_paused(&self) -> Result<(), SessionError> {
        if self.lifecycle.is_paused() {
            Ok(())
        } else {
            Err(SessionError::NotPaused(self.lifecycle.state()))
        }
    }

    fn require_stopped(&self) -> Result<(), SessionError> {
        if self.lifecycle.is_stopped() {
            Ok(())
        } else {
            Err(SessionError::NotPaused(self.lifecycle.state()))
        }
    }
}

impl std::fmt::Debug for DebugSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebugSession")
            .field("description", &self.description)
            .field("state", &self.lifecycle.state())
            .field("exit_code", &self.interactive_exit_code)
            .finish()
    }
}

/// Sends debug interrupts from outside the session driver, e.g. a SIGINT
/// handler while `run` or `cont` is awaiting a stop.
#[derive(Clone)]
pub struct InterruptHandle {
    writer: Arc<TokioMutex<ConnectionWriter>>,
    cancel: CancellationToken,
}

impl InterruptHandle {
    pub async fn interrupt(&self) -> Result<(), SessionError> {
        if self.cancel.is_cancelled() {
            return Err(SessionError::SessionTerminated);
        }
        let bytes = Command::ProcessDebugInterrupt.encode(&IdentityTranslate);
        let mut writer = self.writer.lock().await;
        writer.write_encoded(&bytes).await?;
        Ok(())
    }
}
