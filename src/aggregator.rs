//! Incremental aggregator: a unique map whose emit operation is
//! read-modify-write against the current accumulator, used for SUM/AVG/
//! COUNT-class aggregates maintained in O(1) per document event.
//!
//! Physically a unique [`crate::map::Map`]: key `[KID][group_key]`, value
//! the accumulator bytes the user function returns. Grouped by
//! [`GroupFn`]; updated by [`UpdateFn`], which is handed the current
//! accumulator (if any) and decides whether to keep, replace, or clear it.
//! Per-batch key serialization reuses [`crate::index::keylock`], the same
//! component the unique indexer uses — this collection needs the same
//! "don't let two concurrent batches race on one group" guarantee but
//! none of the duplicate-key rejection, since overwriting the accumulator
//! is exactly what every update does.

use std::sync::Arc;

use crate::{
    batch::Batch,
    index::keylock::{KeyLockManager, LockRelease},
    keyspace::{app_key, collection_range, private_key, Keyspace, Purpose},
    kv::Engine,
    observer::ObserverTicket,
    recordset::Recordset,
    storage::{Storage, Update},
    Result,
};

/// Computes a document's group key.
pub type GroupFn = Arc<dyn Fn(&[u8]) -> Vec<u8> + Send + Sync>;

/// `(current accumulator, doc, is_erase) -> new accumulator, or None to
/// delete the group's row.` Called once per `Update` side that carries a
/// document: old-side with `is_erase = true`, new-side with
/// `is_erase = false`. Dedupe of a put-replacing-the-same-group event
/// (old and new sides landing on the same key) is this function's
/// responsibility, as it is for the C++ original this pattern is drawn
/// from.
pub type UpdateFn = Arc<dyn Fn(Option<&[u8]>, &[u8], bool) -> Option<Vec<u8>> + Send + Sync>;

pub struct IncrementalAggregator {
    kid: u8,
    engine: Arc<dyn Engine>,
    group_fn: GroupFn,
    update_fn: UpdateFn,
    compile_revision: u64,
    lock_manager: Arc<KeyLockManager>,
    lock_release: Arc<LockRelease>,
    highest_seen: std::sync::atomic::AtomicU64,
}

impl IncrementalAggregator {
    pub fn attach(
        engine: Arc<dyn Engine>,
        keyspace: &Keyspace,
        name: &str,
        group_fn: GroupFn,
        update_fn: UpdateFn,
        revision: u64,
        storage: &Storage,
    ) -> Result<(Arc<IncrementalAggregator>, ObserverTicket<Update>)> {
        let kid = keyspace.open_collection(name, Purpose::Aggregation)?;
        let lock_manager = Arc::new(KeyLockManager::new());
        let lock_release = Arc::new(LockRelease {
            manager: lock_manager.clone(),
        });

        let agg = Arc::new(IncrementalAggregator {
            kid,
            engine: engine.clone(),
            group_fn,
            update_fn,
            compile_revision: revision,
            lock_manager,
            lock_release,
            highest_seen: std::sync::atomic::AtomicU64::new(0),
        });

        let rev_key = private_key(kid, crate::revtag::REV_SUBKEY);
        let from_id = match engine.get(&rev_key)? {
            Some(raw) => {
                let (persisted_rev, highest) = crate::revtag::decode(&raw)?;
                if persisted_rev != revision {
                    agg.wipe()?;
                    1
                } else {
                    agg.highest_seen.store(highest, std::sync::atomic::Ordering::SeqCst);
                    highest + 1
                }
            }
            None => 1,
        };
        storage.rescan_for(from_id, |update, batch| agg.observe(update, batch))?;

        let live = agg.clone();
        let ticket = storage.observers.register(move |update, batch| {
            live.observe(update, batch)?;
            Ok(true)
        });

        Ok((agg, ticket))
    }

    pub fn kid(&self) -> u8 {
        self.kid
    }

    fn observe(&self, update: &Update, batch: &mut Batch) -> Result<()> {
        if let Some(old_doc) = &update.old_doc {
            self.apply(batch, old_doc, true)?;
        }
        if let Some(new_doc) = &update.new_doc {
            self.apply(batch, new_doc, false)?;
        }

        let highest = self
            .highest_seen
            .fetch_max(update.new_id, std::sync::atomic::Ordering::SeqCst)
            .max(update.new_id);
        batch.put(
            private_key(self.kid, crate::revtag::REV_SUBKEY),
            crate::revtag::encode(self.compile_revision, highest),
        );
        Ok(())
    }

    fn apply(&self, batch: &mut Batch, doc: &[u8], is_erase: bool) -> Result<()> {
        let group = (self.group_fn)(doc);
        let pkey = app_key(self.kid, &group);

        batch.register_listener(self.lock_release.clone());
        self.lock_manager.lock_key(self.kid, batch.revision, &pkey, batch.revision, 0)?;

        let current = self.engine.get(&pkey)?;
        match (self.update_fn)(current.as_deref(), doc, is_erase) {
            Some(next) => batch.put(pkey, next),
            None => batch.delete(pkey),
        }
        Ok(())
    }

    fn wipe(&self) -> Result<()> {
        let (start, end) = collection_range(self.kid);
        let mut batch = Batch::new();
        batch.delete_range(start, end);
        batch.put(
            private_key(self.kid, crate::revtag::REV_SUBKEY),
            crate::revtag::encode(self.compile_revision, 0),
        );
        batch.commit(self.engine.as_ref())?;
        self.highest_seen.store(0, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }

    pub fn reindex(&self, storage: &Storage) -> Result<()> {
        self.wipe()?;
        storage.rescan_for(1, |update, batch| self.observe(update, batch))
    }

    pub fn get(&self, group: &[u8]) -> Result<Option<Vec<u8>>> {
        self.engine.get(&app_key(self.kid, group))
    }

    pub fn scan(&self) -> Recordset {
        let (start, end) = collection_range(self.kid);
        Recordset::new(self.engine.snapshot(), start, end)
    }
}

impl std::fmt::Debug for IncrementalAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("IncrementalAggregator").field("kid", &self.kid).finish()
    }
}

#[cfg(test)]
#[path = "aggregator_test.rs"]
mod aggregator_test;
