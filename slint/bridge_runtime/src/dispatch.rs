//! UI dispatch queue.
//!
//! Any thread may submit; only the thread bound to the [`UiPump`] executes. The
//! buffer is a bounded `sync_channel`, so order across submitters is the order in
//! which their sends completed, and a full queue blocks the sender instead of
//! dropping work. A submission that returned `Ok` always runs, even when it raced
//! with [`UiQueue::close`].

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TryRecvError, TrySendError};
use std::sync::{Arc, OnceLock};
use std::thread::{self, ThreadId};
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::BridgeError;

pub type UiTask = Box<dyn FnOnce() + Send + 'static>;

/// How long a closing pump waits for a submitter that is still mid-send.
const CLOSE_SETTLE_POLL: Duration = Duration::from_millis(1);

/// The native toolkit's "run this on the UI thread" primitive.
pub trait UiExecutor: Send + Sync {
    fn execute(&self, job: UiTask) -> Result<(), BridgeError>;
}

impl<F> UiExecutor for F
where
    F: Fn(UiTask) -> Result<(), BridgeError> + Send + Sync,
{
    fn execute(&self, job: UiTask) -> Result<(), BridgeError> {
        self(job)
    }
}

enum Slot {
    Task(UiTask),
    Close,
}

struct Shared {
    capacity: usize,
    ui_thread: OnceLock<ThreadId>,
    executor: OnceLock<Arc<dyn UiExecutor>>,
    closed: AtomicBool,
    /// Submitters between their open check and the end of their send.
    in_flight: AtomicUsize,
}

impl Shared {
    fn is_ui_thread(&self) -> bool {
        self.ui_thread.get() == Some(&thread::current().id())
    }

    /// Registers a submitter, then checks that the queue is still open. Once
    /// `closed` is set, a pump that sees `in_flight == 0` has every accepted task
    /// in the channel.
    fn enter(&self) -> Result<InFlight<'_>, BridgeError> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let guard = InFlight(self);

        if self.closed.load(Ordering::SeqCst) {
            return Err(BridgeError::QueueClosed);
        }

        Ok(guard)
    }
}

struct InFlight<'a>(&'a Shared);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Clone)]
pub struct UiQueue {
    tx: SyncSender<Slot>,
    pump: Arc<UiPump>,
    shared: Arc<Shared>,
}

pub struct UiPump {
    rx: Mutex<Receiver<Slot>>,
    shared: Arc<Shared>,
}

impl UiQueue {
    pub fn bounded(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::sync_channel(capacity);
        let shared = Arc::new(Shared {
            capacity,
            ui_thread: OnceLock::new(),
            executor: OnceLock::new(),
            closed: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
        });

        let pump = Arc::new(UiPump {
            rx: Mutex::new(rx),
            shared: shared.clone(),
        });

        Self { tx, pump, shared }
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn pump(&self) -> Arc<UiPump> {
        self.pump.clone()
    }

    pub fn is_ui_thread(&self) -> bool {
        self.shared.is_ui_thread()
    }

    /// Enqueues `task`, blocking while the queue is full.
    ///
    /// The UI thread itself gets `QueueFull` instead of blocking: it is the only
    /// consumer.
    pub fn submit<F>(&self, task: F) -> Result<(), BridgeError>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.shared.is_ui_thread() {
            return self.try_submit(task);
        }

        let in_flight = self.shared.enter()?;
        self.tx
            .send(Slot::Task(Box::new(task)))
            .map_err(|_| BridgeError::QueueClosed)?;
        drop(in_flight);

        self.wake();
        Ok(())
    }

    pub fn try_submit<F>(&self, task: F) -> Result<(), BridgeError>
    where
        F: FnOnce() + Send + 'static,
    {
        let in_flight = self.shared.enter()?;
        let sent = self.tx.try_send(Slot::Task(Box::new(task)));
        drop(in_flight);

        match sent {
            Ok(()) => {
                self.wake();
                Ok(())
            }
            Err(TrySendError::Full(_task)) => Err(BridgeError::QueueFull(self.shared.capacity)),
            Err(TrySendError::Disconnected(_task)) => Err(BridgeError::QueueClosed),
        }
    }

    /// Stops accepting work. Every task whose submission already succeeded, or
    /// succeeds while racing this call, still runs.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        // Only wakes an idle dedicated pump; a full queue means it is busy anyway.
        if self.tx.try_send(Slot::Close).is_err() {
            tracing::debug!("ui queue full at close; pump notices once drained");
        }

        self.wake();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Routes future wakeups through `executor`; each submission then schedules a
    /// [`UiPump::drain`] on the UI thread.
    pub(crate) fn attach_executor(&self, executor: Arc<dyn UiExecutor>) -> Result<(), BridgeError> {
        self.shared
            .executor
            .set(executor)
            .map_err(|_| BridgeError::AlreadyRunning)?;
        // Work submitted before the executor existed.
        self.wake();
        Ok(())
    }

    fn wake(&self) {
        let Some(executor) = self.shared.executor.get() else {
            return;
        };

        let pump = self.pump.clone();
        let scheduled = executor.execute(Box::new(move || {
            if let Err(err) = pump.drain() {
                tracing::error!("ui drain rejected: {err}");
            }
        }));

        if let Err(err) = scheduled {
            tracing::warn!("failed to schedule ui drain: {err}");
        }
    }
}

impl UiPump {
    /// Runs tasks until the queue is closed. The calling thread becomes the UI thread.
    pub fn run(&self) -> Result<(), BridgeError> {
        self.bind()?;
        let rx = self.rx.lock();
        tracing::debug!("ui pump running");

        loop {
            let slot = match rx.try_recv() {
                Ok(slot) => slot,
                Err(TryRecvError::Disconnected) => break,
                Err(TryRecvError::Empty) if !self.shared.closed.load(Ordering::SeqCst) => {
                    match rx.recv() {
                        Ok(slot) => slot,
                        Err(_) => break,
                    }
                }
                Err(TryRecvError::Empty) if self.shared.in_flight.load(Ordering::SeqCst) == 0 => {
                    // Closed with no submitter mid-send: whatever was accepted is queued.
                    match rx.try_recv() {
                        Ok(slot) => slot,
                        Err(_) => break,
                    }
                }
                Err(TryRecvError::Empty) => match rx.recv_timeout(CLOSE_SETTLE_POLL) {
                    Ok(slot) => slot,
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                },
            };

            if let Slot::Task(task) = slot {
                run_task(task);
            }
        }

        tracing::debug!("ui pump stopped");
        Ok(())
    }

    /// Runs what is queued right now, at most one queue's worth, and returns the
    /// number of tasks executed. A drain nested inside a running task is a no-op.
    pub fn drain(&self) -> Result<usize, BridgeError> {
        self.bind()?;
        let Some(rx) = self.rx.try_lock() else {
            return Ok(0);
        };

        let mut ran = 0;
        while ran < self.shared.capacity {
            match rx.try_recv() {
                Ok(Slot::Task(task)) => {
                    run_task(task);
                    ran += 1;
                }
                Ok(Slot::Close) => continue,
                Err(_) => break,
            }
        }

        Ok(ran)
    }

    fn bind(&self) -> Result<(), BridgeError> {
        let current = thread::current().id();
        let bound = *self.shared.ui_thread.get_or_init(|| current);

        if bound == current {
            Ok(())
        } else {
            tracing::error!("ui pump invoked off the ui thread");
            Err(BridgeError::WrongThread)
        }
    }
}

fn run_task(task: UiTask) {
    if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
        tracing::error!("ui task panicked; continuing with the next task");
    }
}
