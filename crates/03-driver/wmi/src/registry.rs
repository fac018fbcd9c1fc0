//! Event-handler registry shared by every handle of a soc.
//!
//! Entries live in a dense vector keyed by wire event id; removal swaps the
//! last entry into the hole. One lock guards scans and mutation and is never
//! held while a handler runs.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::context::{EventHandler, RxContext};
use crate::error::{WmiError, WmiResult};

struct Entry<V> {
    wire_id: u32,
    handler: EventHandler<V>,
    ctx: RxContext,
}

pub struct Registry<V> {
    entries: Mutex<Vec<Entry<V>>>,
    capacity: usize,
    wire_ids: HashMap<u32, u32>,
}

impl<V> Registry<V> {
    /// Creates an empty registry that maps logical ids through `event_table`.
    pub fn new(capacity: usize, event_table: impl IntoIterator<Item = (u32, u32)>) -> Self {
        Self {
            entries: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
            wire_ids: event_table.into_iter().collect(),
        }
    }

    /// Wire id for a logical event id.
    pub fn wire_id(&self, logical: u32) -> WmiResult<u32> {
        self.wire_ids
            .get(&logical)
            .copied()
            .ok_or(WmiError::UnmappedEvent { logical })
    }

    /// Registers `handler` for the logical event and returns its wire id.
    pub fn register(
        &self,
        logical: u32,
        handler: EventHandler<V>,
        ctx: RxContext,
    ) -> WmiResult<u32> {
        let wire_id = self.wire_id(logical)?;
        let mut entries = self.entries.lock();
        if entries.iter().any(|entry| entry.wire_id == wire_id) {
            return Err(WmiError::AlreadyRegistered { id: wire_id });
        }
        if entries.len() >= self.capacity {
            return Err(WmiError::RegistryFull {
                capacity: self.capacity,
            });
        }
        entries.push(Entry {
            wire_id,
            handler,
            ctx,
        });
        debug!(logical, wire_id, ?ctx, "event handler registered");
        Ok(wire_id)
    }

    pub fn unregister(&self, logical: u32) -> WmiResult<()> {
        let wire_id = self.wire_id(logical)?;
        let mut entries = self.entries.lock();
        let idx = entries
            .iter()
            .position(|entry| entry.wire_id == wire_id)
            .ok_or(WmiError::NotRegistered { id: wire_id })?;
        entries.swap_remove(idx);
        debug!(logical, wire_id, "event handler unregistered");
        Ok(())
    }

    /// Handler and context registered for a wire event id.
    pub fn lookup(&self, wire_id: u32) -> Option<(EventHandler<V>, RxContext)> {
        let entries = self.entries.lock();
        entries
            .iter()
            .find(|entry| entry.wire_id == wire_id)
            .map(|entry| (Arc::clone(&entry.handler), entry.ctx))
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Registered wire ids in table order.
    pub fn wire_ids(&self) -> Vec<u32> {
        self.entries.lock().iter().map(|entry| entry.wire_id).collect()
    }
}
