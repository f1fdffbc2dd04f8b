//! Session event listeners.
//!
//! A listener is a capability set: every method has a no-op default, and
//! concrete listeners override only what they consume. Notification is
//! sequential in subscription order; a panicking listener is dropped from
//! that notification but never interrupts the session.

use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::warn;

use crate::backtrace::BackTraceFrame;
use crate::breakpoint::Breakpoint;
use crate::value::RemoteObject;

/// Receives lifecycle, pause, breakpoint, and stdio events from a session.
#[allow(unused_variables)]
pub trait SessionListener: Send {
    fn process_start(&mut self, process_id: u32) {}
    fn process_runnable(&mut self, process_id: u32) {}
    fn process_exit(&mut self, process_id: u32) {}
    fn pause_start(&mut self, process_id: u32) {}
    fn pause_exit(&mut self, process_id: u32, frame: &BackTraceFrame) {}
    fn pause_breakpoint(&mut self, process_id: u32, frame: &BackTraceFrame, breakpoint: &Breakpoint) {
    }
    fn pause_interrupted(&mut self, process_id: u32, frame: &BackTraceFrame) {}
    fn pause_exception(&mut self, process_id: u32, frame: &BackTraceFrame, thrown: &RemoteObject) {}
    fn resume(&mut self, process_id: u32) {}
    fn breakpoint_added(&mut self, process_id: u32, breakpoint: &Breakpoint) {}
    fn breakpoint_removed(&mut self, process_id: u32, breakpoint: &Breakpoint) {}
    fn gc(&mut self, process_id: u32) {}
    fn write_stdout(&mut self, process_id: u32, bytes: &[u8]) {}
    fn write_stderr(&mut self, process_id: u32, bytes: &[u8]) {}
    fn lost_connection(&mut self) {}
    fn terminated(&mut self) {}
}

/// Ordered fan-out of session events to subscribed listeners.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: Vec<Box<dyn SessionListener>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, listener: Box<dyn SessionListener>) {
        self.listeners.push(listener);
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Invoke `notification` on every listener in subscription order.
    /// Listener panics are caught and discarded.
    pub fn notify(&mut self, mut notification: impl FnMut(&mut dyn SessionListener)) {
        for listener in &mut self.listeners {
            let outcome = catch_unwind(AssertUnwindSafe(|| notification(listener.as_mut())));
            if outcome.is_err() {
                warn!("listener panicked during notification; event discarded");
            }
        }
    }
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
