//! Observer bus: per-collection fan-out of typed update events.
//!
//! A [`Storage`](crate::storage::Storage) owns one `ObserverBus<Update>`
//! and calls [`ObserverBus::emit`] once per write, inside the very batch
//! that write is part of. Every attached observer — an [`crate::index`]
//! indexer, an [`crate::aggregator::IncrementalAggregator`], a
//! [`crate::groupby::MaterializedAggregator`] — appends its own rows to
//! that same batch before `emit` returns, so the event and its derived
//! writes commit atomically together.
//!
//! [`ObserverBus::register`] returns an [`ObserverTicket`] rather than a
//! bare id: dropping the ticket unregisters the callback. This breaks the
//! otherwise-cyclic lifetime between a storage (which owns the callback)
//! and an indexer (which owns a handle back to the storage) — destroying
//! an indexer synchronously removes its observer before the indexer's own
//! state is dropped.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, RwLock, Weak,
};

use crate::{batch::Batch, err_at, Result};

/// A single registered callback. Returning `Ok(false)` asks the bus to
/// unregister this callback after the current broadcast finishes; this is
/// the mechanism used by observers that are purely one-shot rescans.
type Callback<E> = Box<dyn Fn(&E, &mut Batch) -> Result<bool> + Send + Sync>;

struct Entry<E> {
    id: u64,
    callback: Callback<E>,
}

struct Inner<E> {
    entries: RwLock<Vec<Entry<E>>>,
}

/// Fan-out list for one producer collection's update events.
pub struct ObserverBus<E> {
    inner: Arc<Inner<E>>,
    next_id: AtomicU64,
}

impl<E> Default for ObserverBus<E> {
    fn default() -> Self {
        ObserverBus::new()
    }
}

impl<E> ObserverBus<E> {
    pub fn new() -> ObserverBus<E> {
        ObserverBus {
            inner: Arc::new(Inner {
                entries: RwLock::new(Vec::new()),
            }),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register `callback`; it will be invoked, in registration order, on
    /// every subsequent `emit`. The returned ticket owns the registration:
    /// drop it to unregister.
    pub fn register<F>(self: &Arc<Self>, callback: F) -> ObserverTicket<E>
    where
        F: Fn(&E, &mut Batch) -> Result<bool> + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.inner.entries.write().unwrap().push(Entry {
            id,
            callback: Box::new(callback),
        });
        ObserverTicket {
            inner: Arc::downgrade(&self.inner),
            id,
        }
    }

    pub fn unregister(&self, id: u64) {
        self.inner.entries.write().unwrap().retain(|e| e.id != id);
    }

    /// Invoke every observer, in registration order, against `event` and
    /// `batch`. Observers append their derived writes directly to `batch`.
    /// The first error aborts the broadcast and is returned to the caller,
    /// who is expected to roll the batch back. Observers that asked to be
    /// dropped (`Ok(false)`) are pruned once the broadcast completes
    /// cleanly.
    pub fn emit(&self, event: &E, batch: &mut Batch) -> Result<()> {
        let ids: Vec<u64> = {
            let entries = err_at!(KvBackend, self.inner.entries.read())?;
            entries.iter().map(|e| e.id).collect()
        };

        let mut to_drop = Vec::new();
        for id in ids {
            // Re-acquire the lock per callback rather than holding it across
            // the whole loop, so a callback that unregisters a *different*
            // observer via `unregister` does not deadlock against this read
            // guard.
            let entries = err_at!(KvBackend, self.inner.entries.read())?;
            let entry = match entries.iter().find(|e| e.id == id) {
                Some(e) => e,
                None => continue, // unregistered mid-broadcast
            };
            let keep = (entry.callback)(event, batch)?;
            drop(entries);
            if !keep {
                to_drop.push(id);
            }
        }

        if !to_drop.is_empty() {
            let mut entries = err_at!(KvBackend, self.inner.entries.write())?;
            entries.retain(|e| !to_drop.contains(&e.id));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.inner.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Owns an observer registration; dropping it unregisters the callback.
pub struct ObserverTicket<E> {
    inner: Weak<Inner<E>>,
    id: u64,
}

impl<E> Drop for ObserverTicket<E> {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.entries.write().unwrap().retain(|e| e.id != self.id);
        }
    }
}

#[cfg(test)]
#[path = "observer_test.rs"]
mod observer_test;
