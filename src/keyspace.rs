//! Keyspace registry: multiplexes many logical collections onto one
//! ordered engine by handing each a one-byte collection id (KID).
//!
//! Physical key layout:
//!
//! * `[0xFF][0x00][name bytes]` → `[kid, purpose byte]` — the name↔kid↔purpose
//!   registry, the "system table".
//! * `[0xFF][0x01][kid][sub-key bytes]` → value — a collection's private
//!   area (schema/revision records, dirty sets, checkpoints).
//! * `[kid][row bytes]` → value — application rows.
//!
//! The literal layout in the governing specification collapses the system
//! table and the private area under a single `[0xFF][kid]` prefix, which is
//! ambiguous whenever a collection name's first byte collides with a valid
//! kid value. This implementation resolves that by inserting the `0x00`
//! (name entry) / `0x01` (private area) sub-tag immediately after `0xFF`;
//! see `DESIGN.md` for the record of that decision.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, RwLock},
};

use tracing::warn;

use crate::{codec, err_at, kv::Engine, kv::WriteBatch, Error, Result};

/// The reserved leading byte of every system-table and private-area key.
pub const SYS: u8 = 0xFF;
const NAME_TAG: u8 = 0x00;
const PRIVATE_TAG: u8 = 0x01;

/// The highest legal application KID; `0xFF` is reserved for the system
/// table.
pub const MAX_KID: u8 = 0xFE;

/// Declares what a collection is used for. Advisory: a purpose mismatch on
/// re-open is logged, not rejected, since purpose is metadata for tooling
/// rather than an enforced contract.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Purpose {
    Storage = 0,
    Index = 1,
    UniqueIndex = 2,
    Map = 3,
    Aggregation = 4,
    Undefined = 5,
    PrivateArea = 6,
}

impl Purpose {
    fn from_byte(b: u8) -> Result<Purpose> {
        Ok(match b {
            0 => Purpose::Storage,
            1 => Purpose::Index,
            2 => Purpose::UniqueIndex,
            3 => Purpose::Map,
            4 => Purpose::Aggregation,
            5 => Purpose::Undefined,
            6 => Purpose::PrivateArea,
            b => err_at!(CorruptRow, msg: "unknown purpose byte {}", b)?,
        })
    }
}

impl fmt::Display for Purpose {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Encode the system-table key for a collection name.
pub fn name_key(name: &str) -> Vec<u8> {
    let mut key = vec![SYS, NAME_TAG];
    key.extend_from_slice(name.as_bytes());
    key
}

/// Encode a private-area key for collection `kid`.
pub fn private_key(kid: u8, sub: &[u8]) -> Vec<u8> {
    let mut key = vec![SYS, PRIVATE_TAG, kid];
    key.extend_from_slice(sub);
    key
}

/// Encode an application-row key for collection `kid`.
pub fn app_key(kid: u8, row: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + row.len());
    key.push(kid);
    key.extend_from_slice(row);
    key
}

/// The `[start, end)` of every application row belonging to `kid`.
pub fn collection_range(kid: u8) -> (Vec<u8>, Vec<u8>) {
    let start = vec![kid];
    let end = codec::prefix_end(&start).unwrap_or_else(|| vec![SYS]);
    (start, end)
}

/// The `[start, end)` of every private-area row belonging to `kid`.
pub fn private_range(kid: u8) -> (Vec<u8>, Vec<u8>) {
    let start = vec![SYS, PRIVATE_TAG, kid];
    let end = codec::prefix_end(&start).expect("private key never ends in 0xff run");
    (start, end)
}

struct Inner {
    by_name: HashMap<String, (u8, Purpose)>,
    allocated: [bool; 256],
}

impl Inner {
    fn smallest_free(&self) -> Option<u8> {
        (0..=MAX_KID).find(|&kid| !self.allocated[kid as usize])
    }
}

/// Reader-writer-locked name↔kid↔purpose registry, seeded from the
/// system table on open.
pub struct Keyspace {
    engine: Arc<dyn Engine>,
    inner: RwLock<Inner>,
}

impl Keyspace {
    /// Scan the system table and build the in-memory registry.
    pub fn open(engine: Arc<dyn Engine>) -> Result<Keyspace> {
        let snapshot = engine.snapshot();
        let (start, end) = (vec![SYS, NAME_TAG], vec![SYS, NAME_TAG + 1]);
        let mut by_name = HashMap::new();
        let mut allocated = [false; 256];
        for (key, value) in snapshot.range(
            std::ops::Bound::Included(start),
            std::ops::Bound::Excluded(end),
        ) {
            let name = String::from_utf8(key[2..].to_vec())
                .map_err(|e| Error::CorruptRow("keyspace".into(), e.to_string()))?;
            if value.len() < 2 {
                err_at!(CorruptRow, msg: "truncated system-table row for {:?}", name)?;
            }
            let kid = value[0];
            let purpose = Purpose::from_byte(value[1])?;
            allocated[kid as usize] = true;
            by_name.insert(name, (kid, purpose));
        }
        Ok(Keyspace {
            engine,
            inner: RwLock::new(Inner { by_name, allocated }),
        })
    }

    /// Return the kid for `name`, allocating and persisting a fresh one if
    /// this is the first time it has been opened.
    pub fn open_collection(&self, name: &str, purpose: Purpose) -> Result<u8> {
        {
            let inner = err_at!(KvBackend, self.inner.read())?;
            if let Some((kid, existing)) = inner.by_name.get(name) {
                if *existing != purpose {
                    warn!(
                        collection = name,
                        persisted = %existing, requested = %purpose,
                        "collection purpose mismatch on open; keeping persisted purpose"
                    );
                }
                return Ok(*kid);
            }
        }

        let mut inner = err_at!(KvBackend, self.inner.write())?;
        // Re-check: another thread may have raced us to open this name.
        if let Some((kid, _)) = inner.by_name.get(name) {
            return Ok(*kid);
        }
        let kid = inner
            .smallest_free()
            .ok_or_else(|| Error::TooManyCollections("keyspace".into(), "no free kid".into()))?;

        let mut batch = WriteBatch::new();
        batch.sync = true;
        batch.put(name_key(name), vec![kid, purpose as u8]);
        self.engine.write(batch)?;

        inner.allocated[kid as usize] = true;
        inner.by_name.insert(name.to_string(), (kid, purpose));
        Ok(kid)
    }

    /// Erase the system row for `name`, every application row under its
    /// kid, and its private area, then return the kid to the free list.
    pub fn delete_collection(&self, name: &str) -> Result<()> {
        let mut inner = err_at!(KvBackend, self.inner.write())?;
        let (kid, _) = match inner.by_name.get(name) {
            Some(entry) => *entry,
            None => return Ok(()),
        };

        let mut batch = WriteBatch::new();
        batch.sync = true;
        let (app_start, app_end) = collection_range(kid);
        let (priv_start, priv_end) = private_range(kid);
        batch.delete_range(app_start, app_end);
        batch.delete_range(priv_start, priv_end);
        batch.delete(name_key(name));
        self.engine.write(batch)?;

        inner.by_name.remove(name);
        inner.allocated[kid as usize] = false;
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Result<Option<(u8, Purpose)>> {
        let inner = err_at!(KvBackend, self.inner.read())?;
        Ok(inner.by_name.get(name).copied())
    }

    pub fn list(&self) -> Result<Vec<(String, u8, Purpose)>> {
        let inner = err_at!(KvBackend, self.inner.read())?;
        Ok(inner
            .by_name
            .iter()
            .map(|(name, (kid, purpose))| (name.clone(), *kid, *purpose))
            .collect())
    }
}

#[cfg(test)]
#[path = "keyspace_test.rs"]
mod keyspace_test;
