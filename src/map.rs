//! Map / KV view: a typed keyed store with no revision log and no
//! observer bus of its own. Key: `[KID][row-bytes]`. Value: `[doc_bytes]`.
//!
//! Where [`crate::storage::Storage`] is a log addressed by a
//! library-assigned [`crate::storage::DocId`], a `Map` is addressed by
//! caller-chosen key bytes — typically an [`crate::codec`] row encoding —
//! and holds exactly one current value per key, overwritten in place.

use std::{ops::Bound, sync::Arc};

use crate::{
    batch::Batch,
    keyspace::{app_key, collection_range, Keyspace, Purpose},
    kv::Engine,
    recordset::Recordset,
    Result,
};

/// A typed keyed store without a log: `put`/`get`/`delete` by caller-chosen
/// key bytes.
pub struct Map {
    kid: u8,
    engine: Arc<dyn Engine>,
}

impl Map {
    pub fn open(engine: Arc<dyn Engine>, keyspace: &Keyspace, name: &str) -> Result<Map> {
        let kid = keyspace.open_collection(name, Purpose::Map)?;
        Ok(Map { kid, engine })
    }

    pub fn kid(&self) -> u8 {
        self.kid
    }

    pub fn put(&self, batch: &mut Batch, key: &[u8], value: &[u8]) {
        batch.put(app_key(self.kid, key), value.to_vec());
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.engine.get(&app_key(self.kid, key))
    }

    pub fn delete(&self, batch: &mut Batch, key: &[u8]) {
        batch.delete(app_key(self.kid, key));
    }

    /// A recordset over every `(row-bytes, value)` pair, ascending.
    pub fn scan(&self) -> Recordset {
        let (start, end) = collection_range(self.kid);
        Recordset::new(self.engine.snapshot(), start, end)
    }

    /// A recordset over every key beginning with `prefix`.
    pub fn scan_prefix(&self, prefix: &[u8]) -> Recordset {
        let start = app_key(self.kid, prefix);
        let end = crate::codec::prefix_end(&start).unwrap_or_else(|| {
            let (_, collection_end) = collection_range(self.kid);
            collection_end
        });
        Recordset::new(self.engine.snapshot(), start, end)
    }

    pub fn approx_len(&self) -> Result<u64> {
        let (start, end) = collection_range(self.kid);
        self.engine
            .approx_size(Bound::Included(start), Bound::Excluded(end))
    }
}

impl std::fmt::Debug for Map {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Map").field("kid", &self.kid).finish()
    }
}

#[cfg(test)]
#[path = "map_test.rs"]
mod map_test;
