//! Transport adapter (C2).
//!
//! Real WebSocket and serial-port drivers are external collaborators
//! (spec.md §1 Out of scope) — this module specifies only their
//! byte-stream *contract*: the [`Transport`] trait every driver must
//! implement, the serial configuration string grammar, and the frame
//! reassembly rules ([`FrameAssembler`]) a driver is responsible for
//! applying before handing a logical frame up to the protocol handler.
//!
//! [`ChannelTransport`] is the one concrete implementation shipped here:
//! an in-memory transport backed by `tokio::sync::mpsc`, used to drive the
//! core end-to-end in tests without a real socket or serial port.

use bytes::{Buf, BytesMut};
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport is already connected")]
    AlreadyConnected,

    #[error("transport is not connected")]
    NotConnected,

    #[error("invalid serial configuration: {0}")]
    InvalidSerialConfig(String),
}

/// Contract every transport driver (WebSocket, serial, or a test double)
/// must satisfy. `connect` completes before any frame is delivered;
/// `disconnect` must be idempotent; `send` reports submission success
/// synchronously (from the caller's point of view — the callee may still
/// be asynchronous).
#[async_trait::async_trait]
pub trait Transport: Send {
    async fn connect(&mut self) -> Result<(), TransportError>;

    /// Submit a fully-encoded outbound frame. Returns `false` on a hard
    /// submit failure; the caller (C4) must treat that as a failure of
    /// the in-flight command, not retry internally.
    async fn send(&mut self, bytes: &[u8]) -> bool;

    /// Receive the next complete logical frame, or `None` once the
    /// transport has closed. Once `None` has been returned, all further
    /// calls must also return `None` (the close callback fires exactly
    /// once).
    async fn recv(&mut self) -> Option<Vec<u8>>;

    async fn disconnect(&mut self);
}

/// Reassembles a raw byte stream into logical frames per spec.md §4.2.
#[derive(Debug, Clone)]
pub enum FrameAssembler {
    /// One inbound chunk == one logical frame (WebSocket: one binary
    /// message per protocol frame).
    WebSocket,
    /// Length-prefixed: the first byte of the buffered stream is the
    /// payload length `N`; once `N + 1` bytes are buffered, the payload
    /// (`buffer[1..=N]`) is emitted and consumed.
    Serial { buffer: BytesMut },
}

impl FrameAssembler {
    pub fn websocket() -> Self {
        FrameAssembler::WebSocket
    }

    pub fn serial() -> Self {
        FrameAssembler::Serial { buffer: BytesMut::new() }
    }

    /// Feed a freshly-received chunk in and drain every complete frame it
    /// makes available. May return zero, one, or several frames from a
    /// single chunk (serial framing can pack multiple payloads back to
    /// back); a WebSocket chunk always yields exactly one frame.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        match self {
            FrameAssembler::WebSocket => vec![chunk.to_vec()],
            FrameAssembler::Serial { buffer } => {
                buffer.extend_from_slice(chunk);
                let mut frames = Vec::new();
                loop {
                    let Some(&len) = buffer.first() else {
                        break;
                    };
                    let len = len as usize;
                    if buffer.len() < len + 1 {
                        break;
                    }
                    let frame = buffer[1..=len].to_vec();
                    buffer.advance(len + 1);
                    frames.push(frame);
                }
                frames
            }
        }
    }
}

/// Parsed and validated serial transport configuration, from the 5-field
/// comma-separated string `port,baud,databits,parity,stopbits`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    pub port: String,
    pub baud: u32,
    pub databits: u8,
    pub parity: Parity,
    pub stopbits: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    None,
    Odd,
    Even,
}

impl SerialConfig {
    pub fn parse(spec: &str) -> Result<Self, TransportError> {
        let invalid = || TransportError::InvalidSerialConfig(spec.to_string());
        let parts: Vec<&str> = spec.split(',').collect();
        let [port, baud, databits, parity, stopbits] = <[&str; 5]>::try_from(parts)
            .map_err(|_| invalid())?;

        let baud: u32 = baud.parse().map_err(|_| invalid())?;

        let databits: u8 = databits.parse().map_err(|_| invalid())?;
        if !(5..=8).contains(&databits) {
            return Err(invalid());
        }

        let parity = match parity {
            "N" => Parity::None,
            "O" => Parity::Odd,
            "E" => Parity::Even,
            _ => return Err(invalid()),
        };

        let stopbits: u8 = stopbits.parse().map_err(|_| invalid())?;
        if stopbits != 1 && stopbits != 2 {
            return Err(invalid());
        }

        Ok(SerialConfig {
            port: port.to_string(),
            baud,
            databits,
            parity,
            stopbits,
        })
    }
}

/// An in-memory [`Transport`] for tests: inbound frames are pushed by a
/// paired [`ChannelTransportHandle`], outbound frames are forwarded to it.
pub struct ChannelTransport {
    inbound: mpsc::UnboundedReceiver<Vec<u8>>,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
    connected: bool,
    closed: bool,
    fail_sends: bool,
}

pub struct ChannelTransportHandle {
    pub to_core: mpsc::UnboundedSender<Vec<u8>>,
    pub from_core: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl ChannelTransport {
    pub fn pair() -> (Self, ChannelTransportHandle) {
        let (to_core, inbound) = mpsc::unbounded_channel();
        let (outbound, from_core) = mpsc::unbounded_channel();
        let transport = ChannelTransport {
            inbound,
            outbound,
            connected: false,
            closed: false,
            fail_sends: false,
        };
        (transport, ChannelTransportHandle { to_core, from_core })
    }

    /// Make every subsequent `send` report failure, to exercise the
    /// "transport send returns false" failure path.
    pub fn set_fail_sends(&mut self, fail: bool) {
        self.fail_sends = fail;
    }
}

#[async_trait::async_trait]
impl Transport for ChannelTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        if self.connected {
            return Err(TransportError::AlreadyConnected);
        }
        self.connected = true;
        Ok(())
    }

    async fn send(&mut self, bytes: &[u8]) -> bool {
        if !self.connected || self.fail_sends {
            return false;
        }
        self.outbound.send(bytes.to_vec()).is_ok()
    }

    async fn recv(&mut self) -> Option<Vec<u8>> {
        if self.closed {
            return None;
        }
        match self.inbound.recv().await {
            Some(frame) => Some(frame),
            None => {
                self.closed = true;
                None
            }
        }
    }

    async fn disconnect(&mut self) {
        self.closed = true;
        self.connected = false;
    }
}
