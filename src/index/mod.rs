//! Secondary indexers: derived collections maintained transactionally
//! from a [`crate::storage::Storage`]'s observer bus.
//!
//! Four physical variants share one [`Index`] type, distinguished by
//! [`IndexKind`]:
//!
//! * [`IndexKind::Multi`] — key `[KID][emit_key][DocID]`, value the
//!   emitted payload. Many documents may share an `emit_key`.
//! * [`IndexKind::UniqueNoCheck`] — key `[KID][emit_key]`, value
//!   `[DocID][emitted]`. Later writers silently win.
//! * [`IndexKind::Unique`] — same physical layout as `UniqueNoCheck`,
//!   enforced via [`keylock::KeyLockManager`]: a conflicting write raises
//!   [`crate::Error::DuplicateKey`] and aborts the batch.
//! * [`IndexKind::UniqueHideDup`] — physical layout of `Multi`; scans
//!   install a filter suppressing every row but the first in scan order
//!   sharing an `emit_key`.

pub mod keylock;

use std::{ops::Bound, sync::Arc};

use crate::{
    batch::Batch,
    err_at,
    keyspace::{app_key, collection_range, private_key, Keyspace, Purpose},
    kv::Engine,
    observer::ObserverTicket,
    recordset::Recordset,
    storage::{DocId, Storage, Update},
    Error, Result,
};

use keylock::{KeyLockManager, LockRelease};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexKind {
    Multi,
    UniqueNoCheck,
    Unique,
    UniqueHideDup,
}

/// Accumulates the `(emit_key, value)` pairs an index function wants
/// written for one document. An index function may emit zero, one, or
/// several rows per document (e.g. one row per tag in a multi-valued
/// field).
#[derive(Default)]
pub struct Emitter {
    pairs: Vec<(Vec<u8>, Vec<u8>)>,
}

impl Emitter {
    pub fn emit(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.pairs.push((key, value));
    }

    /// Every `(emit_key, value)` pair accumulated so far. Exposed so
    /// group-by readers can recover the keys a document's index function
    /// produces without duplicating the call.
    pub fn pairs(&self) -> &[(Vec<u8>, Vec<u8>)] {
        &self.pairs
    }
}

/// `fn(doc_bytes, &mut Emitter)`, supplied by the application.
pub type IndexFn = Arc<dyn Fn(&[u8], &mut Emitter) + Send + Sync>;

fn multi_key(kid: u8, emit_key: &[u8], doc_id: DocId) -> Vec<u8> {
    let mut row = emit_key.to_vec();
    row.extend_from_slice(&doc_id.to_be_bytes());
    app_key(kid, &row)
}

fn multi_prefix(kid: u8, emit_key: &[u8]) -> (Vec<u8>, Vec<u8>) {
    let start = app_key(kid, emit_key);
    let end = crate::codec::prefix_end(&start).unwrap_or_else(|| {
        let (_, end) = collection_range(kid);
        end
    });
    (start, end)
}

fn unique_key(kid: u8, emit_key: &[u8]) -> Vec<u8> {
    app_key(kid, emit_key)
}

fn encode_unique_value(doc_id: DocId, emitted: &[u8]) -> Vec<u8> {
    let mut v = Vec::with_capacity(8 + emitted.len());
    v.extend_from_slice(&doc_id.to_be_bytes());
    v.extend_from_slice(emitted);
    v
}

fn decode_unique_value(raw: &[u8]) -> Result<(DocId, &[u8])> {
    if raw.len() < 8 {
        err_at!(CorruptRow, msg: "truncated unique-index row, {} bytes", raw.len())?;
    }
    Ok((DocId::from_be_bytes(raw[..8].try_into().unwrap()), &raw[8..]))
}

/// A derived secondary collection, maintained from a storage's observer
/// bus.
pub struct Index {
    kid: u8,
    engine: Arc<dyn Engine>,
    kind: IndexKind,
    index_fn: IndexFn,
    compile_revision: u64,
    lock_manager: Option<Arc<KeyLockManager>>,
    /// A single shared listener reused across every `emit_unique` call in
    /// every batch, so [`Batch::register_listener`]'s `Arc::ptr_eq` check
    /// actually dedupes repeated emits within one batch.
    lock_release: Option<Arc<LockRelease>>,
    highest_seen: std::sync::atomic::AtomicU64,
}

impl Index {
    /// Attach an index of `kind` to `storage`, backfilling it from scratch
    /// if its persisted revision disagrees with `revision`, or catching up
    /// from `highest_seen + 1` otherwise. Returns the index together with
    /// the ticket that keeps its live observer registration alive; drop
    /// the ticket to detach.
    pub fn attach(
        engine: Arc<dyn Engine>,
        keyspace: &Keyspace,
        name: &str,
        kind: IndexKind,
        index_fn: IndexFn,
        revision: u64,
        storage: &Storage,
    ) -> Result<(Arc<Index>, ObserverTicket<Update>)> {
        let purpose = match kind {
            IndexKind::Unique => Purpose::UniqueIndex,
            _ => Purpose::Index,
        };
        let kid = keyspace.open_collection(name, purpose)?;
        let lock_manager = match kind {
            IndexKind::Unique => Some(Arc::new(KeyLockManager::new())),
            _ => None,
        };
        let lock_release = lock_manager.as_ref().map(|manager| {
            Arc::new(LockRelease {
                manager: manager.clone(),
            })
        });

        let index = Arc::new(Index {
            kid,
            engine: engine.clone(),
            kind,
            index_fn,
            compile_revision: revision,
            lock_manager,
            lock_release,
            highest_seen: std::sync::atomic::AtomicU64::new(0),
        });

        let rev_key = private_key(kid, crate::revtag::REV_SUBKEY);
        let persisted = engine.get(&rev_key)?;
        let from_id = match persisted {
            Some(raw) => {
                let (persisted_rev, highest) = crate::revtag::decode(&raw)?;
                if persisted_rev != revision {
                    index.wipe()?;
                    1
                } else {
                    index.highest_seen.store(highest, std::sync::atomic::Ordering::SeqCst);
                    highest + 1
                }
            }
            None => 1,
        };
        storage.rescan_for(from_id, |update, batch| index.observe(update, batch))?;

        let live = index.clone();
        let ticket = storage.observers.register(move |update, batch| {
            live.observe(update, batch)?;
            Ok(true)
        });

        Ok((index, ticket))
    }

    pub fn kid(&self) -> u8 {
        self.kid
    }

    pub fn kind(&self) -> IndexKind {
        self.kind
    }

    /// Attach this index's lock-release listener to `batch`. Called once
    /// per batch that might write to this index; idempotent via
    /// [`Batch::register_listener`]'s `Arc::ptr_eq` check, since
    /// `lock_release` is the same `Arc` on every call.
    fn ensure_lock_listener(&self, batch: &mut Batch) {
        batch.register_listener(self.lock_release.clone().expect("unique index has a lock release listener"));
    }

    /// React to one storage [`Update`]: per the common contract, call the
    /// index function once per side that has a document, old-side in
    /// "erase" mode, new-side in "insert" mode, writing/removing the
    /// corresponding physical rows into `batch`. Also updates this
    /// index's persisted high-water mark.
    fn observe(&self, update: &Update, batch: &mut Batch) -> Result<()> {
        if let Some(old_doc) = &update.old_doc {
            self.apply_erase(batch, old_doc, update.old_id)?;
        }
        if let Some(new_doc) = &update.new_doc {
            self.apply_insert(batch, new_doc, update.new_id, update.old_id)?;
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

    fn apply_erase(&self, batch: &mut Batch, doc: &[u8], doc_id: DocId) -> Result<()> {
        let mut emitter = Emitter::default();
        (self.index_fn)(doc, &mut emitter);
        for (key, _value) in emitter.pairs {
            match self.kind {
                IndexKind::Multi | IndexKind::UniqueHideDup => {
                    batch.delete(multi_key(self.kid, &key, doc_id));
                }
                IndexKind::UniqueNoCheck | IndexKind::Unique => {
                    // Only remove the primary row if it still points at
                    // the document being erased; a concurrent replacement
                    // may already own it.
                    let pkey = unique_key(self.kid, &key);
                    if let Some(raw) = self.engine.get(&pkey)? {
                        let (owner, _) = decode_unique_value(&raw)?;
                        if owner == doc_id {
                            batch.delete(pkey);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn apply_insert(&self, batch: &mut Batch, doc: &[u8], doc_id: DocId, prev_id: DocId) -> Result<()> {
        let mut emitter = Emitter::default();
        (self.index_fn)(doc, &mut emitter);
        for (key, value) in emitter.pairs {
            match self.kind {
                IndexKind::Multi | IndexKind::UniqueHideDup => {
                    batch.put(multi_key(self.kid, &key, doc_id), value);
                }
                IndexKind::UniqueNoCheck => {
                    batch.put(unique_key(self.kid, &key), encode_unique_value(doc_id, &value));
                }
                IndexKind::Unique => self.emit_unique(batch, &key, &value, doc_id, prev_id)?,
            }
        }
        Ok(())
    }

    /// Two-step lock + read-verify unique enforcement (spec §4.7).
    fn emit_unique(
        &self,
        batch: &mut Batch,
        key: &[u8],
        value: &[u8],
        doc_id: DocId,
        prev_id: DocId,
    ) -> Result<()> {
        let manager = self.lock_manager.as_ref().expect("unique index has a lock manager");
        self.ensure_lock_listener(batch);

        let pkey = unique_key(self.kid, key);
        manager.lock_key(self.kid, batch.revision, &pkey, doc_id, prev_id)?;

        if let Some(raw) = self.engine.get(&pkey)? {
            let (owner, _) = decode_unique_value(&raw)?;
            if owner != doc_id && owner != prev_id {
                return Err(Error::DuplicateKey(self.kid, pkey, owner, doc_id));
            }
        }
        batch.put(pkey, encode_unique_value(doc_id, value));
        Ok(())
    }

    /// Wipe every application row and reset the persisted revision record
    /// to (compile_revision, 0); the caller follows with a full rescan
    /// from id 1.
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

    /// Force a full reindex regardless of the persisted revision.
    pub fn reindex(&self, storage: &Storage) -> Result<()> {
        self.wipe()?;
        storage.rescan_for(1, |update, batch| self.observe(update, batch))
    }

    /// Every current row whose emitted key equals `emit_key`, as
    /// `(value, doc_id)` pairs in ascending `DocId` order. Valid for
    /// `Multi` and `UniqueHideDup`; `Unique`/`UniqueNoCheck` carry at most
    /// one row per key, use [`Index::lookup_unique`] instead.
    pub fn lookup(&self, emit_key: &[u8]) -> Result<Vec<(Vec<u8>, DocId)>> {
        let (start, end) = multi_prefix(self.kid, emit_key);
        let snapshot = self.engine.snapshot();
        let mut out = Vec::new();
        for (key, value) in snapshot.range(Bound::Included(start), Bound::Excluded(end)) {
            let doc_id = DocId::from_be_bytes(key[key.len() - 8..].try_into().unwrap());
            out.push((value, doc_id));
        }
        Ok(out)
    }

    /// Every current row whose physical key begins with `prefix` — which,
    /// unlike [`Index::lookup`], need not be a whole `emit_key`. Used by
    /// group-by readers that only know a group's key prefix and need every
    /// row sharing it, as `(doc_id, value)` pairs.
    pub fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(DocId, Vec<u8>)>> {
        let start = app_key(self.kid, prefix);
        let end = crate::codec::prefix_end(&start).unwrap_or_else(|| {
            let (_, end) = collection_range(self.kid);
            end
        });
        let snapshot = self.engine.snapshot();
        let mut out = Vec::new();
        for (key, value) in snapshot.range(Bound::Included(start), Bound::Excluded(end)) {
            match self.kind {
                IndexKind::Multi | IndexKind::UniqueHideDup => {
                    let doc_id = DocId::from_be_bytes(key[key.len() - 8..].try_into().unwrap());
                    out.push((doc_id, value));
                }
                IndexKind::UniqueNoCheck | IndexKind::Unique => {
                    let (doc_id, emitted) = decode_unique_value(&value)?;
                    out.push((doc_id, emitted.to_vec()));
                }
            }
        }
        Ok(out)
    }

    pub fn lookup_unique(&self, emit_key: &[u8]) -> Result<Option<(DocId, Vec<u8>)>> {
        let pkey = unique_key(self.kid, emit_key);
        match self.engine.get(&pkey)? {
            Some(raw) => {
                let (doc_id, value) = decode_unique_value(&raw)?;
                Ok(Some((doc_id, value.to_vec())))
            }
            None => Ok(None),
        }
    }

    /// A recordset over every current index row, ascending. For
    /// `UniqueHideDup`, installs the dedup filter described at module
    /// level.
    pub fn scan(&self) -> Recordset {
        let (start, end) = collection_range(self.kid);
        let mut rs = Recordset::new(self.engine.snapshot(), start, end);
        if self.kind == IndexKind::UniqueHideDup {
            let kid = self.kid;
            let last_seen: std::sync::Mutex<Option<Vec<u8>>> = std::sync::Mutex::new(None);
            rs.add_filter(Box::new(move |key, _value| {
                let stripped = &key[..key.len() - 8];
                let _ = kid;
                let mut last = last_seen.lock().unwrap();
                let pass = last.as_deref() != Some(stripped);
                *last = Some(stripped.to_vec());
                pass
            }));
        }
        rs
    }

    /// Feed every current index row to `cb` as `(emit_key, value, doc_id)`
    /// — the derivative-rebuild hook used by a materialized aggregator
    /// built over this index.
    pub fn rescan_for<F>(&self, mut cb: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8], DocId) -> Result<()>,
    {
        let (start, end) = collection_range(self.kid);
        let snapshot = self.engine.snapshot();
        for (key, value) in snapshot.range(Bound::Included(start), Bound::Excluded(end)) {
            match self.kind {
                IndexKind::Multi | IndexKind::UniqueHideDup => {
                    let row = &key[1..];
                    let emit_key = &row[..row.len() - 8];
                    let doc_id = DocId::from_be_bytes(row[row.len() - 8..].try_into().unwrap());
                    cb(emit_key, &value, doc_id)?;
                }
                IndexKind::UniqueNoCheck | IndexKind::Unique => {
                    let emit_key = &key[1..];
                    let (doc_id, emitted) = decode_unique_value(&value)?;
                    cb(emit_key, emitted, doc_id)?;
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Index {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Index")
            .field("kid", &self.kid)
            .field("kind", &self.kind)
            .finish()
    }
}
