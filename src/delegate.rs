//! Delegate surface (C6): the typed callbacks the protocol handler uses
//! to notify the façade above it. Modeled as a trait with default no-op
//! bodies rather than a bag of `Option<Box<dyn Fn>>` fields — implementers
//! get a normal `impl Delegate for X`, and callers who want type erasure
//! can still use `Box<dyn Delegate>`.
//!
//! All methods are optional (the default body does nothing). Delivery
//! order matches inbound frame order; the handler finishes updating its
//! own state before calling out, so implementations must not call back
//! into the protocol handler from within one of these methods.

use crate::events::{BacktraceFrame, BreakpointHit, EvalOutcome, ExceptionHit, ScriptParsed};

pub trait Delegate {
    fn on_script_parsed(&mut self, _script: ScriptParsed) {}

    fn on_breakpoint_hit(&mut self, _hit: BreakpointHit) {}

    fn on_exception_hit(&mut self, _hit: ExceptionHit) {}

    fn on_backtrace(&mut self, _frames: &[BacktraceFrame]) {}

    fn on_eval_result(&mut self, _outcome: EvalOutcome, _value: &str) {}

    fn on_wait_for_source(&mut self) {}

    fn on_resume(&mut self) {}

    /// `code` is always `0` for the fatal protocol errors this crate
    /// raises (spec.md §7, kind 1); the field exists for forward
    /// compatibility with richer codes a façade might want to surface.
    fn on_error(&mut self, _code: u32, _message: &str) {}
}

/// A [`Delegate`] that records every callback invocation verbatim, for
/// tests that assert on delivery order and payload content.
#[derive(Debug, Default)]
pub struct RecordingDelegate {
    pub scripts: Vec<ScriptParsed>,
    pub breakpoint_hits: Vec<BreakpointHit>,
    pub exception_hits: Vec<ExceptionHit>,
    pub backtraces: Vec<Vec<BacktraceFrame>>,
    pub eval_results: Vec<(EvalOutcome, String)>,
    pub wait_for_source_count: usize,
    pub resume_count: usize,
    pub errors: Vec<(u32, String)>,
}

impl Delegate for RecordingDelegate {
    fn on_script_parsed(&mut self, script: ScriptParsed) {
        self.scripts.push(script);
    }

    fn on_breakpoint_hit(&mut self, hit: BreakpointHit) {
        self.breakpoint_hits.push(hit);
    }

    fn on_exception_hit(&mut self, hit: ExceptionHit) {
        self.exception_hits.push(hit);
    }

    fn on_backtrace(&mut self, frames: &[BacktraceFrame]) {
        self.backtraces.push(frames.to_vec());
    }

    fn on_eval_result(&mut self, outcome: EvalOutcome, value: &str) {
        self.eval_results.push((outcome, value.to_string()));
    }

    fn on_wait_for_source(&mut self) {
        self.wait_for_source_count += 1;
    }

    fn on_resume(&mut self) {
        self.resume_count += 1;
    }

    fn on_error(&mut self, code: u32, message: &str) {
        self.errors.push((code, message.to_string()));
    }
}
