//! Data passed to the [`crate::delegate::Delegate`] trait (C6). These are
//! plain, cloneable values — the handler is done mutating its own state
//! by the time it builds one of these and calls out, so callbacks never
//! observe half-updated state and never need to re-enter the handler.

use serde::Serialize;

use crate::model::{Breakpoint, ScriptId};

#[derive(Debug, Clone, Serialize)]
pub struct ScriptParsed {
    pub id: ScriptId,
    pub name: String,
    pub line_count: usize,
}

/// The user command that caused the current halt, used to label a stop
/// for the façade. `Entry` means no command caused it (e.g. the very
/// first breakpoint hit after a fresh connection).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StopType {
    Step,
    StepIn,
    StepOut,
    Continue,
    Pause,
    Entry,
}

impl StopType {
    pub fn label(self) -> &'static str {
        match self {
            StopType::StepIn => "step-in",
            StopType::Step => "step",
            StopType::StepOut => "step-out",
            StopType::Continue => "continue",
            StopType::Pause => "pause",
            StopType::Entry => "entry",
        }
    }
}

/// A resolved breakpoint hit or exception hit, with the human-readable
/// stop label spec.md §4.4.3 describes: `"<inactive ><type>? breakpoint
/// (<stop type>)"`.
#[derive(Debug, Clone, Serialize)]
pub struct BreakpointHit {
    pub breakpoint: Breakpoint,
    pub exact: bool,
    pub stop_label: String,
}

impl BreakpointHit {
    pub fn new(breakpoint: Breakpoint, exact: bool, stop_type: StopType) -> Self {
        let prefix = if breakpoint.is_active() { "" } else { "inactive " };
        let stop_label = format!("{}breakpoint ({})", prefix, stop_type.label());
        BreakpointHit {
            breakpoint,
            exact,
            stop_label,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExceptionHit {
    pub breakpoint: Breakpoint,
    pub exact: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BacktraceFrame {
    pub breakpoint: Breakpoint,
    pub exact: bool,
}

/// The subtype byte that terminates an EVAL_RESULT frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EvalOutcome {
    Ok,
    Error,
    ExceptionError,
    Abort,
}

impl EvalOutcome {
    pub fn from_subtype(byte: u8) -> Option<Self> {
        match byte {
            crate::constants::EVAL_OK => Some(EvalOutcome::Ok),
            crate::constants::EVAL_ERROR => Some(EvalOutcome::Error),
            crate::constants::EVAL_ERROR_EXCEPTION => Some(EvalOutcome::ExceptionError),
            crate::constants::EVAL_ABORT => Some(EvalOutcome::Abort),
            _ => None,
        }
    }
}
