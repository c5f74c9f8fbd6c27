use thiserror::Error;

/// Failures from the byte codec (C1): malformed format strings, short
/// buffers, out-of-range values, or an unsupported pointer width.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("unknown format character '{0}'")]
    UnknownFormatChar(char),

    #[error("buffer too short: need {need} bytes, have {have}")]
    BufferTooShort { need: usize, have: usize },

    #[error("value {value} out of range for format character '{fmt}'")]
    ValueOutOfRange { fmt: char, value: i64 },

    #[error("expected {expected} values for format string, got {got}")]
    ValueCountMismatch { expected: usize, got: usize },

    #[error("unsupported compressed pointer size {0}, expected 2 or 4")]
    UnsupportedPointerSize(usize),

    #[error("invalid CESU-8 byte sequence")]
    InvalidCesu8,
}

/// Fatal protocol errors (spec.md §7, kind 1). Reported through
/// [`crate::delegate::Delegate::on_error`] with code `0` and end the
/// session; the handler does not attempt to recover.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("message too short: need at least {need} bytes, have {have}")]
    MessageTooShort { need: usize, have: usize },

    #[error("unknown message tag {0}")]
    UnknownTag(u8),

    #[error("first message must be CONFIGURATION, got tag {0}")]
    ExpectedConfiguration(u8),

    #[error("unsupported protocol version {got}, expected {expected}")]
    VersionMismatch { expected: u8, got: u8 },

    #[error("BYTE_CODE_CP received with an empty parser stack")]
    EmptyParserStack,

    #[error("malformed breakpoint list: length {0} is not of the form 1 + 4k with k >= 1")]
    MalformedBreakpointList(usize),

    #[error("cpointer size assigned more than once")]
    PointerSizeReassigned,

    #[error("breakpoint hit at an unresolvable byte_code_cp")]
    UnresolvedHit,

    #[error("unknown eval result subtype {0}")]
    UnknownEvalSubtype(u8),
}

/// Command-state errors (spec.md §7, kind 2). These fail only the command
/// that raised them; the session and its state are unaffected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("command requires the engine to be halted at a breakpoint")]
    NotHalted,

    #[error("command requires the engine to be running")]
    NotRunning,

    #[error("breakpoint is already active")]
    AlreadyActive,

    #[error("breakpoint is already inactive")]
    AlreadyInactive,

    #[error("not waiting for source upload")]
    NotWaitingForSource,

    #[error("invalid source control code")]
    InvalidControlCode,

    #[error("failed to submit request to the transport")]
    TransportSubmitFailed,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

pub type CodecResult<T> = Result<T, CodecError>;
pub type ProtocolResult<T> = Result<T, ProtocolError>;
pub type CommandResult<T> = Result<T, CommandError>;
