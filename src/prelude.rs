//! The types a caller of this crate almost always needs, re-exported in
//! one place.

pub use crate::codec::ByteConfig;
pub use crate::delegate::Delegate;
pub use crate::errors::{CodecError, CommandError, ProtocolError};
pub use crate::events::{BacktraceFrame, BreakpointHit, EvalOutcome, ExceptionHit, ScriptParsed, StopType};
pub use crate::model::{Breakpoint, BreakpointHandle, ModelError, ScriptId};
pub use crate::protocol::ProtocolHandler;
pub use crate::session::Session;
pub use crate::transport::{FrameAssembler, SerialConfig, Transport, TransportError};
