//! In-flight key lock manager backing unique-index enforcement (spec'd
//! component for the `unique` indexer variant only).
//!
//! Locks are keyed by the *physical* index key and tagged with the batch
//! revision that holds them, never released except by that batch's
//! `after_commit`/`after_rollback`. This lets two concurrent batches each
//! check uniqueness against the DB without holding a cross-batch read
//! snapshot: the lock plus a read-verify after acquiring it (see
//! [`super::Index::emit_unique`]) is enough.

use std::{collections::HashMap, sync::{Arc, Mutex}};

use crate::{batch::BatchListener, err_at, storage::DocId, Result};

struct LockEntry {
    revision: u64,
    new_doc_id: DocId,
    prev_doc_id: DocId,
}

/// Shared across every batch touching one unique index.
#[derive(Default)]
pub struct KeyLockManager {
    locks: Mutex<HashMap<Vec<u8>, LockEntry>>,
}

impl KeyLockManager {
    pub fn new() -> KeyLockManager {
        KeyLockManager::default()
    }

    /// Acquire `key` for `revision`. Idempotent within the same revision;
    /// allowed across revisions when the incoming document is the same
    /// logical document the lock already describes (the replacement
    /// case); a true conflict returns `Err(DeadlockKey)`.
    pub fn lock_key(
        &self,
        kid: u8,
        revision: u64,
        key: &[u8],
        new_doc_id: DocId,
        prev_doc_id: DocId,
    ) -> Result<()> {
        let mut locks = err_at!(KvBackend, self.locks.lock())?;
        match locks.get(key) {
            Some(entry) if entry.revision == revision => Ok(()),
            Some(entry) if entry.new_doc_id == new_doc_id || entry.prev_doc_id == new_doc_id => {
                Ok(())
            }
            Some(entry) => Err(crate::Error::DeadlockKey(kid, key.to_vec(), entry.revision)),
            None => {
                locks.insert(
                    key.to_vec(),
                    LockEntry {
                        revision,
                        new_doc_id,
                        prev_doc_id,
                    },
                );
                Ok(())
            }
        }
    }

    /// Release every key held by `revision`, called from both
    /// `after_commit` and `after_rollback`.
    pub fn release_revision(&self, revision: u64) {
        let mut locks = self.locks.lock().expect("key lock manager poisoned");
        locks.retain(|_, entry| entry.revision != revision);
    }
}

/// Releases a [`KeyLockManager`]'s locks for a batch once that batch's
/// fate (commit or rollback) is known. Shared by [`super::Index`] and
/// [`crate::aggregator::IncrementalAggregator`], the two collections built
/// over per-batch key locking.
pub struct LockRelease {
    pub manager: Arc<KeyLockManager>,
}

impl BatchListener for LockRelease {
    fn after_commit(&self, revision: u64) {
        self.manager.release_revision(revision);
    }

    fn after_rollback(&self, revision: u64) {
        self.manager.release_revision(revision);
    }
}

#[cfg(test)]
#[path = "keylock_test.rs"]
mod keylock_test;
