use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use serde_json::Value;

use crate::config::BridgeConfig;
use crate::correlator::{Outcome, ReturnCorrelator};
use crate::dispatch::{UiExecutor, UiQueue};
use crate::error::BridgeError;
use crate::inbound::{CallKind, InboundRouter};
use crate::outbound::{CallHandle, OutboundRouter};
use crate::registry::ElementRegistry;
use crate::transport::NativeTransport;

const PUMP_THREAD_NAME: &str = "callbridge-ui";

/// Where the UI pump runs.
pub enum PumpHost {
    /// A bridge-owned thread that becomes the UI thread.
    Dedicated,
    /// A native event loop that owns the UI thread; the executor schedules drains on it.
    EventLoop(Arc<dyn UiExecutor>),
}

/// Composition root. Cheap to clone; every clone shares the same bridge.
#[derive(Clone)]
pub struct Driver {
    inner: Arc<DriverInner>,
}

struct DriverInner {
    config: BridgeConfig,
    registry: Arc<ElementRegistry>,
    queue: UiQueue,
    correlator: Arc<ReturnCorrelator>,
    outbound: Arc<OutboundRouter>,
    inbound: InboundRouter,
    started: AtomicBool,
    pump_thread: Mutex<Option<JoinHandle<Result<(), BridgeError>>>>,
}

impl Driver {
    pub fn new(config: BridgeConfig, transport: Arc<dyn NativeTransport>) -> Self {
        let registry = Arc::new(ElementRegistry::new());
        let queue = UiQueue::bounded(config.ui_queue_capacity);
        let correlator = Arc::new(ReturnCorrelator::new());
        let outbound = Arc::new(OutboundRouter::new(
            transport,
            correlator.clone(),
            queue.clone(),
            config.call_timeout,
        ));
        let inbound = InboundRouter::new(registry.clone(), queue.clone(), outbound.clone());

        Self {
            inner: Arc::new(DriverInner {
                config,
                registry,
                queue,
                correlator,
                outbound,
                inbound,
                started: AtomicBool::new(false),
                pump_thread: Mutex::new(None),
            }),
        }
    }

    /// Starts the UI pump. Only the first call succeeds.
    pub fn run(&self, host: PumpHost) -> Result<(), BridgeError> {
        if self.inner.started.swap(true, Ordering::AcqRel) {
            return Err(BridgeError::AlreadyRunning);
        }

        match host {
            PumpHost::Dedicated => {
                let pump = self.inner.queue.pump();
                let handle = thread::Builder::new()
                    .name(PUMP_THREAD_NAME.to_string())
                    .spawn(move || pump.run())?;
                *self.inner.pump_thread.lock() = Some(handle);
            }
            PumpHost::EventLoop(executor) => self.inner.queue.attach_executor(executor)?,
        }

        tracing::info!(
            ui_queue_capacity = self.inner.config.ui_queue_capacity,
            call_timeout = ?self.inner.config.call_timeout,
            "bridge running"
        );
        Ok(())
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &ElementRegistry {
        &self.inner.registry
    }

    /// The only way onto the UI thread.
    pub fn dispatch_to_ui<F>(&self, task: F) -> Result<(), BridgeError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.queue.submit(task)
    }

    pub fn is_ui_thread(&self) -> bool {
        self.inner.queue.is_ui_thread()
    }

    /// Entry point for calls originating in native code.
    pub fn handle_inbound(&self, raw: &str, kind: CallKind) -> Result<Option<String>, BridgeError> {
        self.inner.inbound.handle(raw, kind)
    }

    pub fn invoke(&self, selector: &str, payload: Value) -> Result<Value, BridgeError> {
        self.inner.outbound.invoke(selector, payload)
    }

    pub fn invoke_async<F>(
        &self,
        selector: &str,
        payload: Value,
        on_return: F,
    ) -> Result<CallHandle, BridgeError>
    where
        F: FnOnce(Outcome) + Send + 'static,
    {
        self.inner.outbound.invoke_async(selector, payload, on_return)
    }

    pub fn post(&self, selector: &str, payload: Value) -> Result<(), BridgeError> {
        self.inner.outbound.post(selector, payload)
    }

    pub fn resolve(&self, id: &str, outcome: Outcome) -> Result<(), BridgeError> {
        self.inner.correlator.resolve(id, outcome)
    }

    pub fn resolve_raw(&self, id: &str, ret: &str, err: &str) -> Result<(), BridgeError> {
        self.inner.correlator.resolve_raw(id, ret, err)
    }

    pub fn pending_calls(&self) -> usize {
        self.inner.correlator.len()
    }

    /// Closes the UI queue and, for a dedicated pump, waits for queued work to finish.
    pub fn shutdown(&self) {
        self.inner.queue.close();

        if self.is_ui_thread() {
            return;
        }

        let Some(handle) = self.inner.pump_thread.lock().take() else {
            return;
        };

        match handle.join() {
            Ok(Ok(())) => tracing::debug!("ui pump joined"),
            Ok(Err(err)) => tracing::error!("ui pump returned error: {err}"),
            Err(err) => tracing::error!("ui pump join failed: {err:?}"),
        }
    }
}
