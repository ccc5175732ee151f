//! Shared persisted-revision bookkeeping for every derived collection
//! that watches a storage's observer bus: indexers, the incremental
//! aggregator, and the materialized aggregator all stash the same
//! `(compile_revision, highest_doc_id_seen)` pair in their private area
//! and compare it against their own compile-time revision on reopen
//! (spec'd reindex-on-mismatch behavior, common to every one of them).

use crate::{err_at, storage::DocId, Result};

pub const REV_SUBKEY: &[u8] = b"rev";

pub fn encode(revision: u64, highest: DocId) -> Vec<u8> {
    let mut v = Vec::with_capacity(16);
    v.extend_from_slice(&revision.to_be_bytes());
    v.extend_from_slice(&highest.to_be_bytes());
    v
}

pub fn decode(raw: &[u8]) -> Result<(u64, DocId)> {
    if raw.len() != 16 {
        err_at!(CorruptRow, msg: "malformed revision record, {} bytes", raw.len())?;
    }
    let revision = u64::from_be_bytes(raw[..8].try_into().unwrap());
    let highest = DocId::from_be_bytes(raw[8..].try_into().unwrap());
    Ok((revision, highest))
}
