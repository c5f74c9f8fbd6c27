//! Session façade (C9, ambient): the minimal host needed to drive a
//! [`ProtocolHandler`] end-to-end over a real [`Transport`] without a
//! bespoke harness per caller. Not a DAP/IDE adapter — it has no opinion
//! about how its delegate callbacks get turned into IDE-visible events.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::delegate::Delegate;
use crate::errors::CommandResult;
use crate::model::{BreakpointHandle, ModelError, Script, ScriptId};
use crate::protocol::ProtocolHandler;
use crate::transport::{FrameAssembler, Transport};

/// Owns a transport and protocol handler pair, reading frames off the
/// transport on a background task and feeding them to the handler, while
/// exposing the handler's command methods directly to the caller.
///
/// `D` must be `Send + 'static` to cross into the read-loop task;
/// wrap a non-`Send` delegate behind a channel if this doesn't fit.
pub struct Session<T: Transport, D: Delegate + Send + 'static> {
    transport: Arc<Mutex<T>>,
    handler: Arc<Mutex<ProtocolHandler>>,
    delegate: Arc<Mutex<D>>,
    read_loop: Option<tokio::task::JoinHandle<()>>,
}

impl<T: Transport + 'static, D: Delegate + Send + 'static> Session<T, D> {
    /// Connect `transport` and start the background read loop. `assembler`
    /// determines how raw chunks from `transport.recv()` are reassembled
    /// into logical frames before reaching the handler (spec.md §4.2) —
    /// pass [`FrameAssembler::websocket`] for a transport that already
    /// delivers one frame per `recv()`.
    pub async fn connect(
        mut transport: T,
        delegate: D,
        assembler: FrameAssembler,
    ) -> Result<Self, crate::transport::TransportError> {
        transport.connect().await?;

        let transport = Arc::new(Mutex::new(transport));
        let handler = Arc::new(Mutex::new(ProtocolHandler::new()));
        let delegate = Arc::new(Mutex::new(delegate));

        let read_loop = tokio::task::spawn(Self::run_read_loop(
            Arc::clone(&transport),
            Arc::clone(&handler),
            Arc::clone(&delegate),
            assembler,
        ));

        Ok(Session {
            transport,
            handler,
            delegate,
            read_loop: Some(read_loop),
        })
    }

    async fn run_read_loop(
        transport: Arc<Mutex<T>>,
        handler: Arc<Mutex<ProtocolHandler>>,
        delegate: Arc<Mutex<D>>,
        mut assembler: FrameAssembler,
    ) {
        loop {
            let chunk = {
                let mut t = transport.lock().await;
                t.recv().await
            };
            let Some(chunk) = chunk else {
                debug!("transport closed, ending read loop");
                return;
            };
            for frame in assembler.push(&chunk) {
                let mut t = transport.lock().await;
                let mut h = handler.lock().await;
                let mut d = delegate.lock().await;
                if let Err(e) = h.on_frame(&frame, &mut *t, &mut *d).await {
                    warn!(error = %e, "fatal protocol error, ending read loop");
                    return;
                }
            }
        }
    }

    /// True once the read loop has observed a transport close or a fatal
    /// protocol error.
    pub fn is_closed(&self) -> bool {
        self.read_loop.as_ref().map(|h| h.is_finished()).unwrap_or(true)
    }

    pub async fn step_into(&self) -> CommandResult<()> {
        let mut t = self.transport.lock().await;
        let mut h = self.handler.lock().await;
        let mut d = self.delegate.lock().await;
        h.step_into(&mut *t, &mut *d).await
    }

    pub async fn step_over(&self) -> CommandResult<()> {
        let mut t = self.transport.lock().await;
        let mut h = self.handler.lock().await;
        let mut d = self.delegate.lock().await;
        h.step_over(&mut *t, &mut *d).await
    }

    pub async fn step_out(&self) -> CommandResult<()> {
        let mut t = self.transport.lock().await;
        let mut h = self.handler.lock().await;
        let mut d = self.delegate.lock().await;
        h.step_out(&mut *t, &mut *d).await
    }

    pub async fn resume(&self) -> CommandResult<()> {
        let mut t = self.transport.lock().await;
        let mut h = self.handler.lock().await;
        let mut d = self.delegate.lock().await;
        h.resume(&mut *t, &mut *d).await
    }

    pub async fn pause(&self) -> CommandResult<()> {
        let mut t = self.transport.lock().await;
        let mut h = self.handler.lock().await;
        h.pause(&mut *t).await
    }

    pub async fn evaluate(&self, expression: &str, scope_chain_index: u32) -> CommandResult<()> {
        let mut t = self.transport.lock().await;
        let mut h = self.handler.lock().await;
        h.evaluate(expression, scope_chain_index, &mut *t).await
    }

    pub async fn restart(&self) -> CommandResult<()> {
        let mut t = self.transport.lock().await;
        let mut h = self.handler.lock().await;
        h.restart(&mut *t).await
    }

    pub async fn send_client_source(&self, name: &str, source: &str) -> CommandResult<()> {
        let mut t = self.transport.lock().await;
        let mut h = self.handler.lock().await;
        h.send_client_source(name, source, &mut *t).await
    }

    pub async fn send_client_source_control(&self, code: u8) -> CommandResult<()> {
        let mut t = self.transport.lock().await;
        let mut h = self.handler.lock().await;
        h.send_client_source_control(code, &mut *t).await
    }

    pub async fn update_breakpoint(&self, handle: BreakpointHandle, enable: bool) -> CommandResult<()> {
        let mut t = self.transport.lock().await;
        let mut h = self.handler.lock().await;
        h.update_breakpoint(handle, enable, &mut *t).await
    }

    pub async fn request_backtrace(&self) -> CommandResult<()> {
        let mut t = self.transport.lock().await;
        let mut h = self.handler.lock().await;
        h.request_backtrace(&mut *t).await
    }

    pub async fn is_halted(&self) -> bool {
        self.handler.lock().await.is_halted()
    }

    pub async fn script(&self, id: ScriptId) -> Result<Script, ModelError> {
        self.handler.lock().await.script(id).cloned()
    }

    pub async fn script_count(&self) -> usize {
        self.handler.lock().await.script_count()
    }

    pub async fn find_breakpoint(&self, script_id: ScriptId, line: u32) -> Result<BreakpointHandle, ModelError> {
        self.handler.lock().await.find_breakpoint(script_id, line)
    }

    pub async fn get_possible_breakpoints(
        &self,
        script_id: ScriptId,
        range: std::ops::RangeInclusive<u32>,
    ) -> Result<Vec<u32>, ModelError> {
        self.handler.lock().await.get_possible_breakpoints(script_id, range)
    }

    /// Disconnect the transport and wait for the read loop to exit.
    pub async fn shutdown(mut self) {
        self.transport.lock().await.disconnect().await;
        if let Some(handle) = self.read_loop.take() {
            let _ = handle.await;
        }
    }
}

impl<T: Transport, D: Delegate + Send + 'static> Drop for Session<T, D> {
    fn drop(&mut self) {
        if let Some(handle) = self.read_loop.take() {
            handle.abort();
        }
    }
}
