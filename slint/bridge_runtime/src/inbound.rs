//! Native → application calls.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::{Value, json};

use crate::codec::{self, Call};
use crate::dispatch::UiQueue;
use crate::error::{BridgeError, HandlerError};
use crate::outbound::OutboundRouter;
use crate::registry::{Element, ElementRegistry};

/// Method the native side sends when it tears down the view behind an element.
pub const RELEASE_METHOD: &str = "$release";

/// Selector used to push the result of a correlated UI-affine call back to native.
pub const RETURN_SELECTOR: &str = "bridge.Return";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    /// Runs on the calling native thread; the reply is returned immediately.
    Inline,
    /// Runs later on the UI thread; nothing is returned to the caller.
    UiAffine,
}

pub struct InboundRouter {
    registry: Arc<ElementRegistry>,
    queue: UiQueue,
    outbound: Arc<OutboundRouter>,
}

impl InboundRouter {
    pub fn new(
        registry: Arc<ElementRegistry>,
        queue: UiQueue,
        outbound: Arc<OutboundRouter>,
    ) -> Self {
        Self {
            registry,
            queue,
            outbound,
        }
    }

    /// Routes one encoded call. Inline calls return the encoded reply; UI-affine
    /// calls return `None` once scheduled.
    pub fn handle(&self, raw: &str, kind: CallKind) -> Result<Option<String>, BridgeError> {
        let call = codec::decode(raw).inspect_err(|err| {
            tracing::warn!("rejecting inbound call: {err}");
        })?;
        let (target, method) = codec::split_selector(&call.selector)?;
        let (target, method) = (target.to_string(), method.to_string());

        if method == RELEASE_METHOD {
            self.registry
                .delete(&target)
                .map_err(|_| BridgeError::ElementNotFound(target.clone()))?;
            return Ok(match kind {
                CallKind::Inline => Some(codec::encode_reply(&Ok(Value::Null))),
                CallKind::UiAffine => None,
            });
        }

        let element = self.registry.lookup(&target).map_err(|_| {
            tracing::warn!(element = %target, method = %method, "inbound call for unknown element");
            BridgeError::ElementNotFound(target.clone())
        })?;

        match kind {
            CallKind::Inline => {
                let outcome = run_handler(element.as_ref(), &method, call.payload);
                Ok(Some(codec::encode_reply(&outcome)))
            }
            CallKind::UiAffine => {
                drop(element);
                let Call {
                    payload,
                    correlation,
                    ..
                } = call;
                let deferred = Deferred {
                    registry: self.registry.clone(),
                    outbound: self.outbound.clone(),
                    target,
                    method,
                    payload,
                    correlation,
                };

                self.queue.submit(move || deferred.run())?;
                Ok(None)
            }
        }
    }
}

/// A UI-affine call waiting for the pump.
struct Deferred {
    registry: Arc<ElementRegistry>,
    outbound: Arc<OutboundRouter>,
    target: String,
    method: String,
    payload: Value,
    correlation: Option<String>,
}

impl Deferred {
    fn run(self) {
        // The element may have been deleted while the call sat in the queue.
        let outcome = match self.registry.lookup(&self.target) {
            Ok(element) => run_handler(element.as_ref(), &self.method, self.payload),
            Err(_) => {
                tracing::warn!(element = %self.target, "element deleted before ui call ran");
                Err(BridgeError::ElementNotFound(self.target.clone()).to_string())
            }
        };

        match (self.correlation, outcome) {
            (Some(id), outcome) => {
                let payload = match outcome {
                    Ok(ret) => json!({ "id": id, "ret": ret }),
                    Err(err) => json!({ "id": id, "err": err }),
                };
                if let Err(err) = self.outbound.post(RETURN_SELECTOR, payload) {
                    tracing::warn!(correlation = %id, "failed to push ui call result: {err}");
                }
            }
            (None, Err(err)) => {
                tracing::warn!(element = %self.target, method = %self.method, "ui call failed: {err}");
            }
            (None, Ok(_)) => {}
        }
    }
}

fn run_handler(element: &dyn Element, method: &str, payload: Value) -> Result<Value, String> {
    match panic::catch_unwind(AssertUnwindSafe(|| element.call(method, payload))) {
        Ok(outcome) => outcome.map_err(|HandlerError(message)| message),
        Err(_) => {
            tracing::error!(method, "element handler panicked");
            Err(format!("handler for {method} panicked"))
        }
    }
}
