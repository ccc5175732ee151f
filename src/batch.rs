//! Batches, the process-wide revision counter, and batch-scoped listener
//! hooks.
//!
//! A [`Batch`] accumulates writes from one logical operation — a document
//! `put`, together with every index/aggregator row its observers append —
//! and commits them to the engine as one atomic [`crate::kv::WriteBatch`].
//! Each batch carries a monotonically increasing `revision`, minted once
//! at construction from a process-wide counter; components that need
//! per-commit bookkeeping tied to a batch's fate (the unique-index key
//! lock manager, chiefly) register themselves as a [`BatchListener`] on
//! that batch rather than writing data through it.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use crate::{kv::Engine, kv::WriteBatch, Result};

static REVISION: AtomicU64 = AtomicU64::new(1);

/// Mint the next process-wide batch revision. Called once per [`Batch`].
fn next_revision() -> u64 {
    REVISION.fetch_add(1, Ordering::SeqCst)
}

/// Default op-count above which [`Batch::is_big`] reports true, prompting
/// bulk operations like `rescan_for` to flush and start a fresh batch.
pub const DEFAULT_BIG_THRESHOLD: usize = 1000;

/// A hook a collection registers on a batch to learn the batch's outcome.
///
/// `before_commit` runs for every registered listener, in registration
/// order, before any write reaches the engine; returning `Err` aborts the
/// whole batch. Exactly one of `after_commit`/`after_rollback` is then
/// called, exactly once, for every listener that was registered — including
/// ones whose own `before_commit` never got a chance to run because an
/// earlier listener already failed.
pub trait BatchListener: Send + Sync {
    fn before_commit(&self, _batch: &Batch) -> Result<()> {
        Ok(())
    }

    fn after_commit(&self, _revision: u64) {}

    fn after_rollback(&self, _revision: u64) {}
}

/// Accumulates writes for one atomic commit.
pub struct Batch {
    pub revision: u64,
    write: WriteBatch,
    listeners: Vec<Arc<dyn BatchListener>>,
    big_threshold: usize,
}

impl Batch {
    pub fn new() -> Batch {
        Batch {
            revision: next_revision(),
            write: WriteBatch::new(),
            listeners: Vec::new(),
            big_threshold: DEFAULT_BIG_THRESHOLD,
        }
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.write.put(key, value);
    }

    pub fn delete(&mut self, key: Vec<u8>) {
        self.write.delete(key);
    }

    pub fn delete_range(&mut self, start: Vec<u8>, end: Vec<u8>) {
        self.write.delete_range(start, end);
    }

    pub fn set_sync(&mut self, sync: bool) {
        self.write.sync = sync;
    }

    /// Register a listener if it is not already attached to this batch.
    /// Idempotent registration lets a listener be added once per emit call
    /// even though many emits can land in the same batch.
    pub fn register_listener(&mut self, listener: Arc<dyn BatchListener>) {
        if !self.listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            self.listeners.push(listener);
        }
    }

    /// True once this batch has accumulated enough ops that bulk callers
    /// (e.g. `rescan_for`) should flush it and start a new one.
    pub fn is_big(&self) -> bool {
        self.write.ops.len() >= self.big_threshold
    }

    pub fn set_big_threshold(&mut self, threshold: usize) {
        self.big_threshold = threshold;
    }

    pub fn op_count(&self) -> usize {
        self.write.ops.len()
    }

    /// Run every listener's `before_commit`, then apply the accumulated
    /// writes to `engine` atomically. On any failure, every listener's
    /// `after_rollback` runs and the failure is returned; on success every
    /// listener's `after_commit` runs and the batch's revision is returned.
    pub fn commit(mut self, engine: &dyn Engine) -> Result<u64> {
        for listener in self.listeners.iter() {
            if let Err(err) = listener.before_commit(&self) {
                self.rollback();
                return Err(err);
            }
        }

        match engine.write(std::mem::take(&mut self.write)) {
            Ok(()) => {
                for listener in self.listeners.iter() {
                    listener.after_commit(self.revision);
                }
                Ok(self.revision)
            }
            Err(err) => {
                self.rollback();
                Err(err)
            }
        }
    }

    /// Fire every registered listener's `after_rollback`, without touching
    /// the engine. Used both internally (a failed `before_commit`/write)
    /// and by callers that abort a batch themselves before ever reaching
    /// `commit` — e.g. a storage `put`/`erase` whose observer emit failed.
    pub fn rollback(&self) {
        for listener in self.listeners.iter() {
            listener.after_rollback(self.revision);
        }
    }
}

impl Default for Batch {
    fn default() -> Batch {
        Batch::new()
    }
}

#[cfg(test)]
#[path = "batch_test.rs"]
mod batch_test;
