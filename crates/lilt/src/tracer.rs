//! Execution tracing hooks.
//!
//! The VM reports interesting events through a [`VmTracer`]; the default
//! [`NoopTracer`] compiles away, and [`StderrTracer`] gives a line-per-event
//! trace for debugging interpreter or program behavior.

use crate::bytecode::Opcode;

/// Receives VM events. All methods default to doing nothing, so a tracer
/// implements only what it cares about.
pub trait VmTracer {
    /// Called before an instruction dispatches.
    fn on_instruction(&mut self, _offset: usize, _op: Opcode) {}

    /// Called when a call frame is pushed. `depth` is the new frame count.
    fn on_call(&mut self, _depth: usize) {}

    /// Called when a call frame returns. `depth` is the remaining frame count.
    fn on_return(&mut self, _depth: usize) {}

    /// Called when an exception begins unwinding.
    fn on_throw(&mut self, _message: &str) {}
}

/// The default tracer: does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTracer;

impl VmTracer for NoopTracer {}

/// Writes one line per event to stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrTracer;

impl VmTracer for StderrTracer {
    fn on_instruction(&mut self, offset: usize, op: Opcode) {
        eprintln!("[lilt] {offset:06} {op:?}");
    }

    fn on_call(&mut self, depth: usize) {
        eprintln!("[lilt] call -> depth {depth}");
    }

    fn on_return(&mut self, depth: usize) {
        eprintln!("[lilt] ret  -> depth {depth}");
    }

    fn on_throw(&mut self, message: &str) {
        eprintln!("[lilt] throw: {message}");
    }
}
