//! In-memory [`Engine`] implementation, backed by a `BTreeMap` guarded by
//! an `RwLock`. Snapshots are taken by cloning the `Arc` that wraps the
//! current map: readers holding an older snapshot keep seeing the map as
//! it was, while a writer installs a fresh `Arc` built with
//! copy-on-write semantics (`Arc::make_mut`). This trades an O(n) clone
//! on the first write after a snapshot is taken for a trivially-correct,
//! dependency-free stand-in for a real LSM/B-tree engine — adequate for
//! this crate's job of exercising the collection layer, not for running a
//! production-sized keyspace.

use std::{
    collections::BTreeMap,
    fmt,
    ops::Bound,
    sync::{Arc, RwLock},
};

use crate::{
    err_at,
    kv::{Engine, Op, Snapshot as SnapshotTrait, WriteBatch},
    Result,
};

#[derive(Debug, Default)]
pub struct MemEngine {
    inner: RwLock<Arc<BTreeMap<Vec<u8>, Vec<u8>>>>,
}

impl MemEngine {
    pub fn new() -> MemEngine {
        MemEngine {
            inner: RwLock::new(Arc::new(BTreeMap::new())),
        }
    }
}

impl Engine for MemEngine {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let guard = err_at!(KvBackend, self.inner.read())?;
        Ok(guard.get(key).cloned())
    }

    fn write(&self, batch: WriteBatch) -> Result<()> {
        let mut guard = err_at!(KvBackend, self.inner.write())?;
        let map = Arc::make_mut(&mut guard);
        for op in batch.ops {
            match op {
                Op::Put(k, v) => {
                    map.insert(k, v);
                }
                Op::Delete(k) => {
                    map.remove(&k);
                }
                Op::DeleteRange(start, end) => {
                    let keys: Vec<Vec<u8>> = map
                        .range((Bound::Included(start), Bound::Excluded(end)))
                        .map(|(k, _)| k.clone())
                        .collect();
                    for k in keys {
                        map.remove(&k);
                    }
                }
            }
        }
        Ok(())
    }

    fn snapshot(&self) -> Arc<dyn SnapshotTrait> {
        let guard = self.inner.read().expect("mem-engine lock poisoned");
        Arc::new(MemSnapshot(Arc::clone(&guard)))
    }

    fn approx_size(&self, start: Bound<Vec<u8>>, end: Bound<Vec<u8>>) -> Result<u64> {
        let guard = err_at!(KvBackend, self.inner.read())?;
        let size: usize = guard
            .range((start, end))
            .map(|(k, v)| k.len() + v.len())
            .sum();
        Ok(size as u64)
    }

    fn compact_range(&self, _start: Bound<Vec<u8>>, _end: Bound<Vec<u8>>) -> Result<()> {
        // Nothing to reclaim: the map holds no superseded physical pages.
        Ok(())
    }
}

struct MemSnapshot(Arc<BTreeMap<Vec<u8>, Vec<u8>>>);

impl fmt::Debug for MemSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "MemSnapshot({} entries)", self.0.len())
    }
}

impl SnapshotTrait for MemSnapshot {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.0.get(key).cloned()
    }

    fn range<'a>(
        &'a self,
        start: Bound<Vec<u8>>,
        end: Bound<Vec<u8>>,
    ) -> Box<dyn DoubleEndedIterator<Item = (Vec<u8>, Vec<u8>)> + 'a> {
        Box::new(self.0.range((start, end)).map(|(k, v)| (k.clone(), v.clone())))
    }
}

#[cfg(test)]
#[path = "mem_test.rs"]
mod mem_test;
