//! Pending outbound calls keyed by correlation id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::SyncSender;

use parking_lot::Mutex;
use serde_json::Value;

use crate::error::BridgeError;

/// What the native side answered: a value, or its error message.
pub type Outcome = Result<Value, String>;

pub type Continuation = Box<dyn FnOnce(Outcome) + Send + 'static>;

pub(crate) enum Completion {
    /// A synchronous caller parked on the receiving end.
    Blocking(SyncSender<Outcome>),
    Continuation(Continuation),
}

enum Pending {
    Waiting(Completion),
    /// The caller gave up; a late resolution is dropped quietly.
    Abandoned,
}

#[derive(Default)]
pub struct ReturnCorrelator {
    pending: Mutex<HashMap<String, Pending>>,
    next_id: AtomicU64,
}

impl ReturnCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self, completion: Completion) -> String {
        let id = (self.next_id.fetch_add(1, Ordering::Relaxed) + 1).to_string();
        self.pending
            .lock()
            .insert(id.clone(), Pending::Waiting(completion));
        id
    }

    /// Delivers `outcome` to whoever waits on `id`, exactly once.
    pub fn resolve(&self, id: &str, outcome: Outcome) -> Result<(), BridgeError> {
        let entry = self.pending.lock().remove(id);

        match entry {
            Some(Pending::Waiting(completion)) => {
                tracing::debug!(correlation = %id, ok = outcome.is_ok(), "call resolved");
                deliver(id, completion, outcome);
                Ok(())
            }
            Some(Pending::Abandoned) => {
                tracing::debug!(correlation = %id, "late resolution of abandoned call discarded");
                Ok(())
            }
            None => {
                tracing::warn!(correlation = %id, "resolution for unknown correlation id");
                Err(BridgeError::UnknownCorrelation(id.to_string()))
            }
        }
    }

    /// Resolves from the native string triple. An empty `err` means success and an
    /// empty `ret` means `null`.
    pub fn resolve_raw(&self, id: &str, ret: &str, err: &str) -> Result<(), BridgeError> {
        let outcome = if !err.is_empty() {
            Err(err.to_string())
        } else if ret.is_empty() {
            Ok(Value::Null)
        } else {
            Ok(serde_json::from_str(ret)?)
        };

        self.resolve(id, outcome)
    }

    /// Marks a pending call as given up. Returns `false` if it already resolved.
    pub fn abandon(&self, id: &str) -> bool {
        match self.pending.lock().get_mut(id) {
            Some(entry) => {
                *entry = Pending::Abandoned;
                true
            }
            None => false,
        }
    }

    /// Drops the entry without delivering anything, e.g. when the call never left.
    pub(crate) fn cancel(&self, id: &str) {
        self.pending.lock().remove(id);
    }

    pub fn is_pending(&self, id: &str) -> bool {
        matches!(self.pending.lock().get(id), Some(Pending::Waiting(_)))
    }

    /// Entries still in the table, abandoned ones included.
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn deliver(id: &str, completion: Completion, outcome: Outcome) {
    match completion {
        Completion::Blocking(tx) => {
            // Capacity 1 and a single resolution per entry: never full.
            if tx.try_send(outcome).is_err() {
                tracing::debug!(correlation = %id, "synchronous caller is gone");
            }
        }
        Completion::Continuation(continuation) => continuation(outcome),
    }
}
