//! Application → native calls.

use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use serde_json::Value;

use crate::codec;
use crate::correlator::{Completion, Outcome, ReturnCorrelator};
use crate::dispatch::UiQueue;
use crate::error::BridgeError;
use crate::transport::NativeTransport;

pub struct OutboundRouter {
    transport: Arc<dyn NativeTransport>,
    correlator: Arc<ReturnCorrelator>,
    queue: UiQueue,
    call_timeout: Option<Duration>,
}

/// An asynchronous call still waiting on the native side.
#[derive(Clone)]
pub struct CallHandle {
    id: String,
    correlator: Arc<ReturnCorrelator>,
}

impl CallHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_pending(&self) -> bool {
        self.correlator.is_pending(&self.id)
    }

    /// Gives up on the result. The continuation will not run; returns `false` if it
    /// already did.
    pub fn abandon(&self) -> bool {
        self.correlator.abandon(&self.id)
    }
}

impl OutboundRouter {
    pub fn new(
        transport: Arc<dyn NativeTransport>,
        correlator: Arc<ReturnCorrelator>,
        queue: UiQueue,
        call_timeout: Option<Duration>,
    ) -> Self {
        Self {
            transport,
            correlator,
            queue,
            call_timeout,
        }
    }

    /// Calls `selector` and blocks until the native side resolves it.
    pub fn invoke(&self, selector: &str, payload: Value) -> Result<Value, BridgeError> {
        if self.queue.is_ui_thread() {
            return Err(BridgeError::UiThreadBlocked(selector.to_string()));
        }

        let (tx, rx) = mpsc::sync_channel(1);
        let id = self.correlator.register(Completion::Blocking(tx));
        self.dispatch(&id, selector, &payload)?;

        let outcome = match self.call_timeout {
            None => rx.recv().map_err(|_| dropped(&id))?,
            Some(timeout) => match rx.recv_timeout(timeout) {
                Ok(outcome) => outcome,
                Err(RecvTimeoutError::Timeout) => {
                    if self.correlator.abandon(&id) {
                        tracing::warn!(correlation = %id, selector, "outbound call timed out");
                        return Err(BridgeError::Timeout {
                            id,
                            selector: selector.to_string(),
                        });
                    }
                    // Resolved between the timeout and the abandon.
                    rx.recv().map_err(|_| dropped(&id))?
                }
                Err(RecvTimeoutError::Disconnected) => return Err(dropped(&id)),
            },
        };

        outcome.map_err(BridgeError::Native)
    }

    /// Calls `selector` and returns at once; `on_return` runs on the resolving thread.
    pub fn invoke_async<F>(
        &self,
        selector: &str,
        payload: Value,
        on_return: F,
    ) -> Result<CallHandle, BridgeError>
    where
        F: FnOnce(Outcome) + Send + 'static,
    {
        let id = self
            .correlator
            .register(Completion::Continuation(Box::new(on_return)));
        self.dispatch(&id, selector, &payload)?;

        Ok(CallHandle {
            id,
            correlator: self.correlator.clone(),
        })
    }

    /// Fire-and-forget call; the native side does not answer.
    pub fn post(&self, selector: &str, payload: Value) -> Result<(), BridgeError> {
        let call = codec::encode(selector, &payload, None);
        tracing::debug!(selector, "posting outbound call");
        self.transport.send(call)
    }

    fn dispatch(&self, id: &str, selector: &str, payload: &Value) -> Result<(), BridgeError> {
        let call = codec::encode(selector, payload, Some(id));
        tracing::debug!(correlation = %id, selector, "outbound call");

        if let Err(err) = self.transport.send(call) {
            self.correlator.cancel(id);
            tracing::warn!(correlation = %id, selector, "transport rejected call: {err}");
            return Err(err);
        }

        Ok(())
    }
}

fn dropped(id: &str) -> BridgeError {
    BridgeError::Transport(format!("pending call {id} dropped without a result"))
}
