//! Document storage: an append-only log of documents addressed by a
//! monotonic [`DocId`], with per-document revision chaining and tombstone
//! erasure.
//!
//! A [`Storage`] is backed by a keyspace collection of [`Purpose::Storage`]
//! and owns an [`ObserverBus<Update>`] that every [`crate::index`] indexer,
//! [`crate::aggregator::IncrementalAggregator`], and
//! [`crate::groupby::MaterializedAggregator`] attaches to: each write
//! builds the batch, notifies the bus (which lets every attached observer
//! append its own derived rows to that same batch), and only then commits.

use std::{ops::Bound, sync::Arc};

use crate::{
    batch::Batch,
    err_at,
    kv::Engine,
    keyspace::{app_key, collection_range, Keyspace, Purpose},
    observer::ObserverBus,
    Result,
};

/// 64-bit document identifier. `0` is reserved as "none" — the `prev_id`
/// of a document's very first revision, and the sentinel `old_id`/
/// `old_old_id` of an [`Update`] describing a fresh insert.
pub type DocId = u64;

/// Describes one storage mutation, handed to every attached observer
/// alongside the batch the mutation is part of.
#[derive(Clone, Debug)]
pub struct Update {
    pub old_doc: Option<Vec<u8>>,
    pub new_doc: Option<Vec<u8>>,
    pub new_id: DocId,
    pub old_id: DocId,
    pub old_old_id: DocId,
}

fn doc_key(kid: u8, id: DocId) -> Vec<u8> {
    app_key(kid, &id.to_be_bytes())
}

fn decode_doc_id(kid: u8, key: &[u8]) -> Result<DocId> {
    if key.len() != 9 || key[0] != kid {
        err_at!(CorruptRow, msg: "malformed storage key {:?}", key)?;
    }
    Ok(DocId::from_be_bytes(key[1..9].try_into().unwrap()))
}

fn encode_value(prev: DocId, doc: &[u8]) -> Vec<u8> {
    let mut v = Vec::with_capacity(8 + doc.len());
    v.extend_from_slice(&prev.to_be_bytes());
    v.extend_from_slice(doc);
    v
}

fn decode_value(raw: &[u8]) -> Result<(DocId, &[u8])> {
    if raw.len() < 8 {
        err_at!(CorruptRow, msg: "truncated storage row, {} bytes", raw.len())?;
    }
    let prev = DocId::from_be_bytes(raw[..8].try_into().unwrap());
    Ok((prev, &raw[8..]))
}

/// An append-only document log keyed by [`DocId`].
pub struct Storage {
    kid: u8,
    engine: Arc<dyn Engine>,
    next_id: std::sync::atomic::AtomicU64,
    pub observers: Arc<ObserverBus<Update>>,
}

impl Storage {
    /// Open (or lazily create) the named storage collection. `next_id` is
    /// recovered by scanning backward from the top of the collection's key
    /// range, per the invariant that the highest persisted `DocId` is
    /// always `< next_id`.
    pub fn open(engine: Arc<dyn Engine>, keyspace: &Keyspace, name: &str) -> Result<Storage> {
        let kid = keyspace.open_collection(name, Purpose::Storage)?;
        let (start, end) = collection_range(kid);
        let snapshot = engine.snapshot();
        let highest = snapshot
            .range(Bound::Included(start), Bound::Excluded(end))
            .next_back()
            .map(|(key, _)| decode_doc_id(kid, &key))
            .transpose()?
            .unwrap_or(0);
        Ok(Storage {
            kid,
            engine,
            next_id: std::sync::atomic::AtomicU64::new(highest + 1),
            observers: Arc::new(ObserverBus::new()),
        })
    }

    pub fn kid(&self) -> u8 {
        self.kid
    }

    fn alloc_id(&self) -> DocId {
        self.next_id.fetch_add(1, std::sync::atomic::Ordering::SeqCst)
    }

    /// Allocate a fresh id, write `doc` as a new revision chain, and
    /// notify observers. Convenience wrapper over `put_replacing` with
    /// `prev_id = 0`.
    pub fn put(&self, batch: &mut Batch, doc: &[u8]) -> Result<DocId> {
        self.put_replacing(batch, doc, 0)
    }

    /// Write `doc` as the next revision of `prev_id` (or a fresh chain if
    /// `prev_id == 0`). If a live (non-tombstone) row exists at `prev_id`,
    /// its document and its own `prev` are surfaced to observers as
    /// `old_doc`/`old_old_id`.
    pub fn put_replacing(&self, batch: &mut Batch, doc: &[u8], prev_id: DocId) -> Result<DocId> {
        let (old_doc, old_old_id) = self.read_live(prev_id)?;
        let new_id = self.alloc_id();
        batch.put(doc_key(self.kid, new_id), encode_value(prev_id, doc));
        let update = Update {
            old_doc,
            new_doc: Some(doc.to_vec()),
            new_id,
            old_id: prev_id,
            old_old_id,
        };
        if let Err(err) = self.observers.emit(&update, batch) {
            batch.rollback();
            return Err(err);
        }
        Ok(new_id)
    }

    /// Tombstone the revision chain rooted at `prev_id`: same mechanics as
    /// `put_replacing` with an empty document body.
    pub fn erase(&self, batch: &mut Batch, prev_id: DocId) -> Result<DocId> {
        let (old_doc, old_old_id) = self.read_live(prev_id)?;
        let new_id = self.alloc_id();
        batch.put(doc_key(self.kid, new_id), encode_value(prev_id, &[]));
        let update = Update {
            old_doc,
            new_doc: None,
            new_id,
            old_id: prev_id,
            old_old_id,
        };
        if let Err(err) = self.observers.emit(&update, batch) {
            batch.rollback();
            return Err(err);
        }
        Ok(new_id)
    }

    /// Unconditional row delete. No observer notification: this is
    /// operator tooling (e.g. `purge` on the CLI boundary), not a document
    /// lifecycle event.
    pub fn purge(&self, batch: &mut Batch, id: DocId) {
        batch.delete(doc_key(self.kid, id));
    }

    /// Drop every row superseded by a later revision: for each live row
    /// whose `prev` is nonzero, delete the row at that `prev` id. Surviving
    /// documents keep their ids.
    pub fn compact(&self, batch: &mut Batch) -> Result<()> {
        let (start, end) = collection_range(self.kid);
        let snapshot = self.engine.snapshot();
        let mut superseded = Vec::new();
        for (_key, value) in snapshot.range(Bound::Included(start), Bound::Excluded(end)) {
            let (prev, _doc) = decode_value(&value)?;
            if prev != 0 {
                superseded.push(prev);
            }
        }
        for prev in superseded {
            batch.delete(doc_key(self.kid, prev));
        }
        Ok(())
    }

    /// Read a row by id, tombstones included. `None` if the row does not
    /// exist.
    pub fn get(&self, id: DocId) -> Result<Option<Vec<u8>>> {
        match self.engine.get(&doc_key(self.kid, id))? {
            Some(raw) => {
                let (_prev, doc) = decode_value(&raw)?;
                Ok(Some(doc.to_vec()))
            }
            None => Ok(None),
        }
    }

    fn read_live(&self, id: DocId) -> Result<(Option<Vec<u8>>, DocId)> {
        if id == 0 {
            return Ok((None, 0));
        }
        match self.engine.get(&doc_key(self.kid, id))? {
            Some(raw) => {
                let (prev, doc) = decode_value(&raw)?;
                if doc.is_empty() {
                    Ok((None, 0)) // tombstoned: nothing live to surface
                } else {
                    Ok((Some(doc.to_vec()), prev))
                }
            }
            None => Ok((None, 0)),
        }
    }

    /// Replay every live row with id >= `from_id`, in ascending order, as a
    /// freshly-manufactured [`Update`] (`old_doc = None`, `old_id` set to
    /// the row's own stored `prev`), flushing batches as they cross the
    /// "big" threshold. Used by an indexer or aggregator to catch up after
    /// reattaching to a storage whose writes it missed.
    pub fn rescan_for<F>(&self, from_id: DocId, mut callback: F) -> Result<()>
    where
        F: FnMut(&Update, &mut Batch) -> Result<()>,
    {
        let (_, end) = collection_range(self.kid);
        let start = doc_key(self.kid, from_id);
        let snapshot = self.engine.snapshot();
        let mut batch = Batch::new();
        for (key, value) in snapshot.range(Bound::Included(start), Bound::Excluded(end)) {
            let id = decode_doc_id(self.kid, &key)?;
            let (prev, doc) = decode_value(&value)?;
            if doc.is_empty() {
                continue; // tombstones carry no live document to replay
            }
            let update = Update {
                old_doc: None,
                new_doc: Some(doc.to_vec()),
                new_id: id,
                old_id: prev,
                old_old_id: 0,
            };
            if let Err(err) = callback(&update, &mut batch) {
                batch.rollback();
                return Err(err);
            }
            if batch.is_big() {
                let flushed = std::mem::replace(&mut batch, Batch::new());
                flushed.commit(self.engine.as_ref())?;
            }
        }
        if batch.op_count() > 0 {
            batch.commit(self.engine.as_ref())?;
        }
        Ok(())
    }

    /// Emit `(id, raw_bytes)` for every row in `recordset`'s range, where
    /// `raw_bytes` is the stored value (`[prev_id][doc_bytes]`) verbatim.
    pub fn export(&self, recordset: &mut crate::recordset::Recordset) -> Result<Vec<(DocId, Vec<u8>)>> {
        let mut out = Vec::new();
        while let Some((key, value)) = recordset.next() {
            let id = decode_doc_id(self.kid, &key)?;
            out.push((id, value));
        }
        Ok(out)
    }

    /// Write `(id, raw_bytes)` verbatim and bump `next_id` past `id` if
    /// needed. Used by restore tooling to replay an `export` dump.
    pub fn import(&self, batch: &mut Batch, id: DocId, raw_bytes: Vec<u8>) {
        batch.put(doc_key(self.kid, id), raw_bytes);
        self.next_id
            .fetch_max(id + 1, std::sync::atomic::Ordering::SeqCst);
    }

    /// A recordset over every row currently in this storage, ascending.
    pub fn scan(&self) -> crate::recordset::Recordset {
        let (start, end) = collection_range(self.kid);
        crate::recordset::Recordset::new(self.engine.snapshot(), start, end)
    }
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Storage").field("kid", &self.kid).finish()
    }
}

#[cfg(test)]
#[path = "storage_test.rs"]
mod storage_test;
