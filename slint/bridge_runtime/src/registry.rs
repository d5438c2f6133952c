//! Element registry: string handles that native code holds for application objects.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use serde_json::Value;

use crate::codec::SELECTOR_SEPARATOR;
use crate::error::{BridgeError, HandlerError};

const DEFAULT_PREFIX: &str = "elem";

/// Table size below which dead entries are left alone.
const PRUNE_FLOOR: usize = 64;

/// Application-side object reachable from native code through the registry.
pub trait Element: Send + Sync {
    fn call(&self, method: &str, payload: Value) -> Result<Value, HandlerError>;
}

impl<F> Element for F
where
    F: Fn(&str, Value) -> Result<Value, HandlerError> + Send + Sync,
{
    fn call(&self, method: &str, payload: Value) -> Result<Value, HandlerError> {
        self(method, payload)
    }
}

/// Maps element ids to application objects without owning them.
///
/// Object lifetime stays with the application: an element dropped without a
/// `delete` simply stops resolving, and its entry is swept on a later insert.
#[derive(Default)]
pub struct ElementRegistry {
    table: RwLock<Table>,
    next_id: AtomicU64,
}

#[derive(Default)]
struct Table {
    entries: HashMap<String, Weak<dyn Element>>,
    /// Entry count that triggers the next sweep of dead associations.
    prune_at: usize,
}

impl Table {
    fn prune_if_due(&mut self) {
        if self.entries.len() < self.prune_at {
            return;
        }

        let before = self.entries.len();
        self.entries.retain(|_, weak| weak.strong_count() > 0);
        self.prune_at = (self.entries.len() * 2).max(PRUNE_FLOOR);

        if before > self.entries.len() {
            tracing::debug!(pruned = before - self.entries.len(), "dropped dead element entries");
        }
    }
}

impl ElementRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create<E: Element + 'static>(&self, element: &Arc<E>) -> String {
        self.insert(DEFAULT_PREFIX, element)
    }

    /// Registers `element` under `<prefix>-<n>`; `n` is unique across the registry.
    pub fn create_named<E: Element + 'static>(
        &self,
        prefix: &str,
        element: &Arc<E>,
    ) -> Result<String, BridgeError> {
        if prefix.is_empty() || prefix.contains(SELECTOR_SEPARATOR) {
            return Err(BridgeError::InvalidSelector(prefix.to_string()));
        }

        Ok(self.insert(prefix, element))
    }

    fn insert<E: Element + 'static>(&self, prefix: &str, element: &Arc<E>) -> String {
        let weak: Weak<E> = Arc::downgrade(element);
        let weak: Weak<dyn Element> = weak;

        let n = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let id = format!("{prefix}-{n}");

        let mut table = self.table.write();
        table.prune_if_due();
        table.entries.insert(id.clone(), weak);
        drop(table);

        tracing::debug!(element = %id, "element registered");
        id
    }

    pub fn lookup(&self, id: &str) -> Result<Arc<dyn Element>, BridgeError> {
        self.table
            .read()
            .entries
            .get(id)
            .and_then(Weak::upgrade)
            .ok_or_else(|| BridgeError::NotFound(id.to_string()))
    }

    pub fn delete(&self, id: &str) -> Result<(), BridgeError> {
        match self.table.write().entries.remove(id) {
            Some(_) => {
                tracing::debug!(element = %id, "element deleted");
                Ok(())
            }
            None => Err(BridgeError::NotFound(id.to_string())),
        }
    }

    /// Number of entries whose object is still alive.
    pub fn len(&self) -> usize {
        self.table
            .read()
            .entries
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
