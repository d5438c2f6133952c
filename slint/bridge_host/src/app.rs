//! Application-side objects the window talks to.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use callbridge_runtime::{Driver, Element, HandlerError};
use serde_json::{Value, json};

pub const DEFAULT_TICK_MS: u64 = 1_000;

pub fn tick_from_env() -> Duration {
    let ms = std::env::var("CALLBRIDGE_TICK_MS")
        .ok()
        .and_then(|raw| raw.parse::<u64>().ok())
        .filter(|ms| *ms > 0)
        .unwrap_or(DEFAULT_TICK_MS);
    Duration::from_millis(ms)
}

/// Counts clicks and reports the total back to the window.
pub struct Counter {
    clicks: AtomicU64,
    driver: Driver,
}

impl Counter {
    pub fn new(driver: Driver) -> Self {
        Self {
            clicks: AtomicU64::new(0),
            driver,
        }
    }

    pub fn clicks(&self) -> u64 {
        self.clicks.load(Ordering::SeqCst)
    }
}

impl Element for Counter {
    fn call(&self, method: &str, _payload: Value) -> Result<Value, HandlerError> {
        match method {
            "Click" => {
                let total = self.clicks.fetch_add(1, Ordering::SeqCst) + 1;
                let status = match total {
                    1 => "clicked once".to_string(),
                    n => format!("clicked {n} times"),
                };

                // Runs on the UI thread, so never wait on the window here.
                self.driver
                    .invoke_async("Window.SetStatus", json!(status), move |outcome| {
                        if let Err(err) = outcome {
                            tracing::warn!(total, "status update failed: {err}");
                        }
                    })
                    .map_err(|err| HandlerError::new(err.to_string()))?;

                Ok(json!(total))
            }
            "Reset" => Ok(json!(self.clicks.swap(0, Ordering::SeqCst))),
            other => Err(HandlerError::unknown_method(other)),
        }
    }
}

/// Owns the decision to close the window.
pub struct Shell {
    driver: Driver,
    closing: AtomicBool,
}

impl Shell {
    pub fn new(driver: Driver) -> Self {
        Self {
            driver,
            closing: AtomicBool::new(false),
        }
    }
}

impl Element for Shell {
    fn call(&self, method: &str, _payload: Value) -> Result<Value, HandlerError> {
        match method {
            "CloseRequested" => {
                if self.closing.swap(true, Ordering::AcqRel) {
                    return Ok(json!("already closing"));
                }

                tracing::info!("closing window");
                self.driver
                    .post("Window.SetStatus", json!("closing"))
                    .and_then(|()| {
                        self.driver.invoke_async("Window.Close", Value::Null, |outcome| {
                            tracing::debug!(?outcome, "window close acknowledged");
                        })
                    })
                    .map_err(|err| HandlerError::new(err.to_string()))?;

                Ok(json!("closing"))
            }
            other => Err(HandlerError::unknown_method(other)),
        }
    }
}

/// Background caller that blocks on the window once per tick.
pub struct Heartbeat {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl Heartbeat {
    pub fn spawn(driver: Driver, tick: Duration) -> io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let handle = thread::Builder::new()
            .name("callbridge-heartbeat".to_string())
            .spawn(move || {
                let started = Instant::now();
                while !stop_flag.load(Ordering::Acquire) {
                    thread::sleep(tick);
                    let heading = format!("callbridge · up {}s", started.elapsed().as_secs());
                    if let Err(err) = driver.invoke("Window.SetHeading", json!(heading)) {
                        tracing::debug!("heartbeat stopped: {err}");
                        return;
                    }
                }
            })?;

        Ok(Self { stop, handle })
    }

    /// Signals the thread and joins it if it already exited. A heartbeat parked
    /// on a call the closed window will never answer is left behind.
    pub fn stop(self) {
        self.stop.store(true, Ordering::Release);
        if self.handle.is_finished() {
            if let Err(err) = self.handle.join() {
                tracing::error!("heartbeat join failed: {err:?}");
            }
        } else {
            tracing::debug!("heartbeat still active during shutdown; skipping join");
        }
    }
}
