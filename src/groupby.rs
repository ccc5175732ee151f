//! Materialized group-by aggregator: recomputes a group's aggregate from
//! scratch, over a source index, whenever that group is dirtied — as
//! opposed to [`crate::aggregator::IncrementalAggregator`]'s O(1)
//! read-modify-write per event.
//!
//! **Dirtying.** Every observed storage [`Update`] is fed through the
//! source index's own [`IndexFn`] to recover the emitted key(s) a
//! document produces, then [`GroupFn`] strips each key down to its group
//! prefix `G`. A private-area row `[bank][G] -> remainder` marks that
//! group dirty in the *current* bank; two banks (0/1) let the background
//! worker swap atomically, draining the outgoing bank while new
//! dirtiness lands in the incoming one.
//!
//! **Recomputation worker.** One dedicated thread per aggregator, modeled
//! on [`crate::util::thread::Thread`]. Waking (posted after every commit
//! that dirtied something, when automatic mode is on) flips the bank
//! under a short-held exclusive lock, then scans the old bank's dirty
//! rows: for each `G` it asks the source index for every row under `G*`,
//! runs [`AggFn`], and writes or deletes `[KID][G]` accordingly before
//! deleting the dirty row. A failure is captured and rethrown from the
//! next [`MaterializedAggregator::observe`] call, so the user sees it as
//! a rollback of their own write rather than silent drift.

use std::{
    ops::Bound,
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering},
        Arc, Condvar, Mutex,
    },
};

use crate::{
    batch::{Batch, BatchListener},
    err_at,
    index::{Emitter, Index, IndexFn},
    keyspace::{app_key, private_key, Keyspace, Purpose},
    kv::Engine,
    observer::ObserverTicket,
    revtag,
    storage::{DocId, Storage, Update},
    util::thread::Thread,
    Result,
};

/// Strips an emitted index key down to its group prefix. Must return an
/// actual prefix of its argument; the remainder stored in the dirty set
/// is computed as `key[group.len()..]`.
pub type GroupFn = Arc<dyn Fn(&[u8]) -> Vec<u8> + Send + Sync>;

/// Aggregates every row currently in one group, as `(doc_id, value)`
/// pairs in ascending key order. `None` deletes (or skips writing) the
/// group's row; shared with [`crate::groupby_scan::GroupByScan`].
pub type AggFn = Arc<dyn Fn(&[(DocId, Vec<u8>)]) -> Option<Vec<u8>> + Send + Sync>;

struct Inner {
    kid: u8,
    engine: Arc<dyn Engine>,
    source: Arc<Index>,
    index_fn: IndexFn,
    group_fn: GroupFn,
    agg_fn: AggFn,
    compile_revision: u64,
    bank: AtomicU8,
    swap_lock: Mutex<()>,
    auto: AtomicBool,
    pending: AtomicU64,
    completed: Mutex<u64>,
    completed_cv: Condvar,
    last_error: Mutex<Option<String>>,
    highest_seen: AtomicU64,
    worker_tx: Mutex<Option<crate::util::thread::Tx<(), ()>>>,
}

impl Inner {
    fn dirty_prefix(&self, bank: u8) -> Vec<u8> {
        private_key(self.kid, &[bank])
    }

    fn dirty_key(&self, bank: u8, group: &[u8]) -> Vec<u8> {
        let mut sub = Vec::with_capacity(1 + group.len());
        sub.push(bank);
        sub.extend_from_slice(group);
        private_key(self.kid, &sub)
    }

    fn collect_groups(&self, doc: &[u8], out: &mut Vec<(Vec<u8>, Vec<u8>)>) {
        let mut emitter = Emitter::default();
        (self.index_fn)(doc, &mut emitter);
        for (key, _value) in emitter.pairs() {
            let group = (self.group_fn)(key);
            let remainder = key[group.len().min(key.len())..].to_vec();
            out.push((group, remainder));
        }
    }

    fn observe(&self, update: &Update, batch: &mut Batch) -> Result<()> {
        if let Some(msg) = self.last_error.lock().expect("poisoned").take() {
            err_at!(KvBackend, msg: "materialized aggregator worker: {}", msg)?;
        }

        let mut groups = Vec::new();
        if let Some(doc) = &update.old_doc {
            self.collect_groups(doc, &mut groups);
        }
        if let Some(doc) = &update.new_doc {
            self.collect_groups(doc, &mut groups);
        }

        let bank = self.bank.load(Ordering::SeqCst);
        for (group, remainder) in &groups {
            batch.put(self.dirty_key(bank, group), remainder.clone());
        }

        let highest = self
            .highest_seen
            .fetch_max(update.new_id, Ordering::SeqCst)
            .max(update.new_id);
        batch.put(
            private_key(self.kid, revtag::REV_SUBKEY),
            revtag::encode(self.compile_revision, highest),
        );

        if !groups.is_empty() {
            self.pending.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn wake(&self) {
        if let Some(tx) = self.worker_tx.lock().expect("poisoned").as_ref() {
            let _ = tx.post(());
        }
    }

    fn recompute_group(&self, group: &[u8], dirty_key: Vec<u8>) -> Result<()> {
        let rows = self.source.scan_prefix(group)?;
        let mut batch = Batch::new();
        match (self.agg_fn)(&rows) {
            Some(bytes) => batch.put(app_key(self.kid, group), bytes),
            None => batch.delete(app_key(self.kid, group)),
        }
        batch.delete(dirty_key);
        batch.commit(self.engine.as_ref())?;
        Ok(())
    }

    /// Flip the bank and drain whichever one was just made the outgoing
    /// one. Runs on the worker thread, or inline on the caller's thread
    /// for [`MaterializedAggregator::update`].
    fn drain_once(&self) -> Result<()> {
        let guard = self.swap_lock.lock().expect("poisoned");
        let old_bank = self.bank.fetch_xor(1, Ordering::SeqCst);
        drop(guard);
        self.drain_bank(old_bank)
    }

    /// Non-blocking variant for [`MaterializedAggregator::try_update`]:
    /// `Ok(false)` if another caller (or the worker) already holds the
    /// swap lock, instead of waiting for it.
    fn try_drain_once(&self) -> Result<bool> {
        let guard = match self.swap_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => return Ok(false),
        };
        let old_bank = self.bank.fetch_xor(1, Ordering::SeqCst);
        drop(guard);
        self.drain_bank(old_bank)?;
        Ok(true)
    }

    fn drain_bank(&self, old_bank: u8) -> Result<()> {
        let prefix = self.dirty_prefix(old_bank);
        let end = crate::codec::prefix_end(&prefix).expect("dirty-set prefix never ends in 0xff run");
        let rows: Vec<(Vec<u8>, Vec<u8>)> = self
            .engine
            .snapshot()
            .range(Bound::Included(prefix.clone()), Bound::Excluded(end))
            .collect();

        for (key, _remainder) in rows {
            let group = key[prefix.len()..].to_vec();
            self.recompute_group(&group, key)?;
        }
        Ok(())
    }

    fn run_cycle(&self) {
        if let Err(err) = self.drain_once() {
            *self.last_error.lock().expect("poisoned") = Some(err.to_string());
        }
        {
            let mut completed = self.completed.lock().expect("poisoned");
            *completed += 1;
        }
        self.completed_cv.notify_all();
    }
}

struct WakeOnCommit {
    inner: Arc<Inner>,
}

impl BatchListener for WakeOnCommit {
    fn after_commit(&self, _revision: u64) {
        if self.inner.auto.load(Ordering::SeqCst) {
            self.inner.wake();
        }
    }
}

/// A derived collection whose rows are recomputed from scratch, per
/// group, whenever that group is touched — see the module documentation.
pub struct MaterializedAggregator {
    inner: Arc<Inner>,
    wake_listener: Arc<WakeOnCommit>,
    thread: Mutex<Option<Thread<(), (), ()>>>,
}

impl MaterializedAggregator {
    /// Attach a materialized aggregator over `source`, grouping the
    /// documents `source` itself indexes. `index_fn` must be the same
    /// emit function `source` was built with, so the two stay in lockstep
    /// on which keys a document produces. Starts in manual mode; call
    /// [`MaterializedAggregator::set_auto`] to schedule recomputation on
    /// every commit instead.
    #[allow(clippy::too_many_arguments)]
    pub fn attach(
        engine: Arc<dyn Engine>,
        keyspace: &Keyspace,
        name: &str,
        source: Arc<Index>,
        index_fn: IndexFn,
        group_fn: GroupFn,
        agg_fn: AggFn,
        revision: u64,
        storage: &Storage,
    ) -> Result<(Arc<MaterializedAggregator>, ObserverTicket<Update>)> {
        let kid = keyspace.open_collection(name, Purpose::Aggregation)?;

        let inner = Arc::new(Inner {
            kid,
            engine: engine.clone(),
            source,
            index_fn,
            group_fn,
            agg_fn,
            compile_revision: revision,
            bank: AtomicU8::new(0),
            swap_lock: Mutex::new(()),
            auto: AtomicBool::new(false),
            pending: AtomicU64::new(0),
            completed: Mutex::new(0),
            completed_cv: Condvar::new(),
            last_error: Mutex::new(None),
            highest_seen: AtomicU64::new(0),
            worker_tx: Mutex::new(None),
        });

        let rev_key = private_key(kid, revtag::REV_SUBKEY);
        let from_id = match engine.get(&rev_key)? {
            Some(raw) => {
                let (persisted_rev, highest) = revtag::decode(&raw)?;
                if persisted_rev != revision {
                    wipe(&inner)?;
                    1
                } else {
                    inner.highest_seen.store(highest, Ordering::SeqCst);
                    highest + 1
                }
            }
            None => 1,
        };
        storage.rescan_for(from_id, |update, batch| inner.observe(update, batch))?;

        let worker = inner.clone();
        let thread = Thread::new(move |rx| {
            move || loop {
                match rx.recv() {
                    Ok((_msg, resp)) => {
                        worker.run_cycle();
                        if let Some(resp) = resp {
                            let _ = resp.send(());
                        }
                    }
                    Err(_) => break,
                }
            }
        });
        *inner.worker_tx.lock().expect("poisoned") = Some(thread.to_tx());

        let wake_listener = Arc::new(WakeOnCommit { inner: inner.clone() });

        let agg = Arc::new(MaterializedAggregator {
            inner,
            wake_listener,
            thread: Mutex::new(Some(thread)),
        });

        let live = agg.inner.clone();
        let wake_listener = agg.wake_listener.clone();
        let ticket = storage.observers.register(move |update, batch| {
            live.observe(update, batch)?;
            batch.register_listener(wake_listener.clone());
            Ok(true)
        });

        Ok((agg, ticket))
    }

    pub fn kid(&self) -> u8 {
        self.inner.kid
    }

    /// Schedule the background worker on every future commit that dirties
    /// a group, instead of requiring `update()`/`try_update()`.
    pub fn set_auto(&self, auto: bool) {
        self.inner.auto.store(auto, Ordering::SeqCst);
        if auto {
            self.inner.wake();
        }
    }

    /// Recompute every currently dirty group, blocking until done. Safe
    /// to call alongside an active background worker; both sides
    /// serialize on the same bank-swap lock.
    pub fn update(&self) -> Result<()> {
        self.inner.drain_once()
    }

    /// Like [`MaterializedAggregator::update`], but returns `Ok(false)`
    /// immediately instead of blocking if a swap is already in progress
    /// (on the worker thread or another caller).
    pub fn try_update(&self) -> Result<bool> {
        self.inner.try_drain_once()
    }

    /// Block until every dirtying event observed before this call has
    /// been drained by a completed recomputation cycle.
    pub fn sync(&self) {
        self.inner.wake();
        let target = self.inner.pending.load(Ordering::SeqCst);
        let mut completed = self.inner.completed.lock().expect("poisoned");
        while *completed < target {
            completed = self.inner.completed_cv.wait(completed).expect("poisoned");
        }
    }

    pub fn get(&self, group: &[u8]) -> Result<Option<Vec<u8>>> {
        self.inner.engine.get(&app_key(self.inner.kid, group))
    }

    pub fn reindex(&self, storage: &Storage) -> Result<()> {
        wipe(&self.inner)?;
        storage.rescan_for(1, |update, batch| self.inner.observe(update, batch))
    }
}

fn wipe(inner: &Inner) -> Result<()> {
    let (start, end) = crate::keyspace::collection_range(inner.kid);
    let mut batch = Batch::new();
    batch.delete_range(start, end);
    for bank in [0u8, 1u8] {
        let prefix = inner.dirty_prefix(bank);
        let dend = crate::codec::prefix_end(&prefix).expect("dirty-set prefix never ends in 0xff run");
        batch.delete_range(prefix, dend);
    }
    batch.put(
        private_key(inner.kid, revtag::REV_SUBKEY),
        revtag::encode(inner.compile_revision, 0),
    );
    batch.commit(inner.engine.as_ref())?;
    inner.highest_seen.store(0, Ordering::SeqCst);
    Ok(())
}

impl Drop for MaterializedAggregator {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.lock().expect("poisoned").take() {
            let _ = thread.join();
        }
    }
}

impl std::fmt::Debug for MaterializedAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("MaterializedAggregator").field("kid", &self.inner.kid).finish()
    }
}

#[cfg(test)]
#[path = "groupby_test.rs"]
mod groupby_test;
