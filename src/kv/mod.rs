//! The ordered key-value engine this crate consumes.
//!
//! Everything above this module — the keyspace registry, document storage,
//! indexers, aggregators — is written against [`Engine`] and never assumes
//! anything about how bytes are stored beyond byte-lexicographic ordering,
//! atomic batched writes, point-in-time snapshots, and approximate range
//! sizing. [`mem::MemEngine`] is the one concrete engine shipped here; a
//! LevelDB, RocksDB or sled-backed `Engine` impl plugs in without touching
//! any collection code.

use std::{fmt, ops::Bound, sync::Arc};

use crate::Result;

pub mod mem;

/// One write or delete destined for the engine, as part of a [`WriteBatch`].
#[derive(Clone, Debug)]
pub enum Op {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
    /// Delete every key in `[start, end)`. Used when a collection is
    /// dropped from the keyspace registry.
    DeleteRange(Vec<u8>, Vec<u8>),
}

/// A set of writes applied to the engine atomically.
#[derive(Clone, Debug, Default)]
pub struct WriteBatch {
    pub ops: Vec<Op>,
    /// Mirrors LevelDB-class `WriteOptions::sync`: the keyspace registry
    /// sets this for system-table writes so a crash can't lose a
    /// collection's identity even though ordinary application writes
    /// batch asynchronously.
    pub sync: bool,
}

impl WriteBatch {
    pub fn new() -> WriteBatch {
        WriteBatch::default()
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.ops.push(Op::Put(key, value));
    }

    pub fn delete(&mut self, key: Vec<u8>) {
        self.ops.push(Op::Delete(key));
    }

    pub fn delete_range(&mut self, start: Vec<u8>, end: Vec<u8>) {
        self.ops.push(Op::DeleteRange(start, end));
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn extend(&mut self, other: WriteBatch) {
        self.ops.extend(other.ops);
        self.sync = self.sync || other.sync;
    }
}

/// A point-in-time, read-only view of the engine's keyspace.
pub trait Snapshot: fmt::Debug + Send + Sync {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;

    /// Iterate `[start, end)` (per the given bounds) in ascending key
    /// order; callers that want descending order call `.rev()` on the
    /// returned iterator.
    fn range<'a>(
        &'a self,
        start: Bound<Vec<u8>>,
        end: Bound<Vec<u8>>,
    ) -> Box<dyn DoubleEndedIterator<Item = (Vec<u8>, Vec<u8>)> + 'a>;
}

/// The ordered key-value store contract the rest of this crate is written
/// against.
pub trait Engine: fmt::Debug + Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Apply `batch` atomically: either every op lands or none do.
    fn write(&self, batch: WriteBatch) -> Result<()>;

    fn snapshot(&self) -> Arc<dyn Snapshot>;

    /// Approximate on-disk (or in-memory) size, in bytes, of `[start,
    /// end)`. Engines are free to sample rather than compute exactly; the
    /// only caller, [`crate::recordset::Recordset::count_aprox`], treats
    /// the result as a heuristic, never an exact count.
    fn approx_size(&self, start: Bound<Vec<u8>>, end: Bound<Vec<u8>>) -> Result<u64>;

    /// Hint the engine to reclaim space in `[start, end)`. A no-op is a
    /// legal implementation.
    fn compact_range(&self, start: Bound<Vec<u8>>, end: Bound<Vec<u8>>) -> Result<()>;
}
