//! Wire tag values shared by the codec and the protocol handler.
//!
//! These are a compatibility surface: they must match the engine's own
//! tag table bit for bit. Keeping them in one module means the codec and
//! the protocol handler never drift from each other.

/// Protocol version baked into this build. The handshake's version byte
/// must equal this exactly; any mismatch is a fatal protocol error.
pub const PROTOCOL_VERSION: u8 = 9;

/// Default maximum outbound message size, used when a transport does not
/// override it during the handshake.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 256;

// --- engine -> client -------------------------------------------------

pub const CONFIGURATION: u8 = 1;
pub const PARSE_FUNCTION: u8 = 2;
pub const BYTE_CODE_CP: u8 = 3;
pub const PARSE_FUNCTION_END: u8 = 4;
pub const BREAKPOINT_LIST: u8 = 5;
pub const BREAKPOINT_OFFSET_LIST: u8 = 6;
pub const SOURCE_CODE: u8 = 7;
pub const SOURCE_CODE_END: u8 = 8;
pub const SOURCE_CODE_NAME: u8 = 9;
pub const SOURCE_CODE_NAME_END: u8 = 10;
pub const FUNCTION_NAME: u8 = 11;
pub const FUNCTION_NAME_END: u8 = 12;
pub const RELEASE_BYTE_CODE_CP: u8 = 13;
pub const BREAKPOINT_HIT: u8 = 14;
pub const EXCEPTION_HIT: u8 = 15;
pub const EXCEPTION_STR: u8 = 16;
pub const EXCEPTION_STR_END: u8 = 17;
pub const BACKTRACE: u8 = 18;
pub const BACKTRACE_END: u8 = 19;
pub const EVAL_RESULT: u8 = 20;
pub const EVAL_RESULT_END: u8 = 21;
pub const WAIT_FOR_SOURCE: u8 = 22;

// --- client -> engine ---------------------------------------------------

pub const FREE_BYTE_CODE_CP: u8 = 64;
pub const UPDATE_BREAKPOINT: u8 = 65;
pub const EXCEPTION_CONFIG: u8 = 66;
pub const GET_BACKTRACE: u8 = 67;
pub const EVAL: u8 = 68;
pub const EVAL_PART: u8 = 69;
pub const STEP: u8 = 70;
pub const NEXT: u8 = 71;
pub const FINISH: u8 = 72;
pub const CONTINUE: u8 = 73;
pub const STOP: u8 = 74;
pub const CLIENT_SOURCE: u8 = 75;
pub const CLIENT_SOURCE_PART: u8 = 76;
pub const NO_MORE_SOURCES: u8 = 77;
pub const CONTEXT_RESET: u8 = 78;

// --- eval result subtypes -----------------------------------------------

pub const EVAL_OK: u8 = 0;
pub const EVAL_ERROR: u8 = 1;
pub const EVAL_ERROR_EXCEPTION: u8 = 2;
pub const EVAL_ABORT: u8 = 3;

/// Sentinel value sent as the eval payload for `restart()`.
pub const RESTART_SENTINEL: &str = "r353t";
