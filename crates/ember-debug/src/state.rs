//! Per-session debug state: the breakpoint table and pause-scoped caches.

use std::collections::HashMap;

use crate::backtrace::{BackTrace, BackTraceFrame};
use crate::breakpoint::Breakpoint;
use crate::error::SessionError;
use crate::value::RemoteObject;

/// Mutable debugging state owned by the session driver.
///
/// The breakpoint table survives process stops; everything scoped to a
/// single pause (back trace, selected frame, uncaught exception) is cleared
/// by [`DebugState::reset`].
#[derive(Debug, Default)]
pub struct DebugState {
    current_process_id: u32,
    top_frame: Option<BackTraceFrame>,
    current_back_trace: Option<BackTrace>,
    breakpoints: HashMap<u32, Breakpoint>,
    current_frame_number: usize,
    show_internal_frames: bool,
    current_uncaught_exception: Option<RemoteObject>,
}

impl DebugState {
    pub fn new(show_internal_frames: bool) -> Self {
        Self {
            show_internal_frames,
            ..Self::default()
        }
    }

    /// Clear everything scoped to the current pause. The breakpoint table
    /// and current process id are left intact.
    pub fn reset(&mut self) {
        self.top_frame = None;
        self.current_back_trace = None;
        self.current_frame_number = 0;
        self.current_uncaught_exception = None;
    }

    pub fn current_process_id(&self) -> u32 {
        self.current_process_id
    }

    pub fn set_current_process_id(&mut self, process_id: u32) {
        self.current_process_id = process_id;
    }

    pub fn top_frame(&self) -> Option<&BackTraceFrame> {
        self.top_frame.as_ref()
    }

    pub fn set_top_frame(&mut self, frame: Option<BackTraceFrame>) {
        self.top_frame = frame;
    }

    pub fn back_trace(&self) -> Option<&BackTrace> {
        self.current_back_trace.as_ref()
    }

    pub fn set_back_trace(&mut self, trace: Option<BackTrace>) {
        self.current_back_trace = trace;
    }

    pub fn uncaught_exception(&self) -> Option<&RemoteObject> {
        self.current_uncaught_exception.as_ref()
    }

    pub fn set_uncaught_exception(&mut self, thrown: Option<RemoteObject>) {
        self.current_uncaught_exception = thrown;
    }

    pub fn show_internal_frames(&self) -> bool {
        self.show_internal_frames
    }

    /// Flip internal-frame visibility. Invalidates the cached back trace,
    /// whose visibility flags were computed under the old setting.
    pub fn toggle_internal_frames(&mut self) -> bool {
        self.show_internal_frames = !self.show_internal_frames;
        self.current_back_trace = None;
        self.current_frame_number = 0;
        self.show_internal_frames
    }

    pub fn current_frame_number(&self) -> usize {
        self.current_frame_number
    }

    /// Select the n-th visible frame of the current back trace.
    pub fn select_frame(&mut self, visible_frame: usize) -> Result<(), SessionError> {
        let trace = self
            .current_back_trace
            .as_ref()
            .ok_or(SessionError::NoBackTrace)?;
        if trace.actual_frame_number(visible_frame).is_none() {
            return Err(SessionError::InvalidFrame(visible_frame));
        }
        self.current_frame_number = visible_frame;
        Ok(())
    }

    pub fn add_breakpoint(&mut self, breakpoint: Breakpoint) {
        self.breakpoints.insert(breakpoint.id, breakpoint);
    }

    pub fn breakpoint(&self, id: u32) -> Option<&Breakpoint> {
        self.breakpoints.get(&id)
    }

    /// Look up a breakpoint by the id carried in a stop reply. Negative ids
    /// mean the stop was not caused by a user breakpoint.
    pub fn breakpoint_for_wire_id(&self, id: i32) -> Option<Breakpoint> {
        u32::try_from(id)
            .ok()
            .and_then(|id| self.breakpoints.get(&id))
            .cloned()
    }

    pub fn take_breakpoint(&mut self, id: u32) -> Option<Breakpoint> {
        self.breakpoints.remove(&id)
    }

    pub fn breakpoints(&self) -> impl Iterator<Item = &Breakpoint> {
        self.breakpoints.values()
    }
}
