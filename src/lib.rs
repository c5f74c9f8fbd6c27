//! Client-side core for the JerryScript remote debugger wire protocol:
//! byte codec, transport contract, breakpoint model, protocol state
//! machine, and the thin async session façade that ties them together.
//!
//! This crate has no opinion about IDEs, the Debug Adapter Protocol, or
//! which transport (WebSocket, serial) a caller uses — it only speaks the
//! engine's wire format and hands typed events to a [`delegate::Delegate`].

pub mod codec;
pub mod constants;
pub mod delegate;
pub mod errors;
pub mod events;
pub mod model;
pub mod protocol;
pub mod queue;
pub mod session;
pub mod transport;

pub mod prelude;
