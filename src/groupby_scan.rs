//! Streaming, on-the-fly group-by: a read-only, single-pass alternative
//! to [`crate::groupby::MaterializedAggregator`] with no persistence.
//!
//! Wraps an index's [`crate::recordset::Recordset`] (so it inherits that
//! index's physical row ordering) and an [`AggFn`], and walks maximal
//! runs of rows sharing a group prefix, yielding one `(group, aggregate)`
//! pair per run. Relies on [`GroupFn`] returning a true prefix of the key
//! it is handed — which, because the underlying scan is lexicographic,
//! guarantees rows sharing a group are contiguous.

use crate::{
    groupby::{AggFn, GroupFn},
    index::{Index, IndexKind},
    recordset::Recordset,
    storage::DocId,
};

/// Decoded `(emit_key, doc_id, value)`, independent of the source index's
/// physical layout.
type Row = (Vec<u8>, DocId, Vec<u8>);

/// A single-pass iterator from an index's current rows to grouped,
/// aggregated results.
pub struct GroupByScan {
    rs: Recordset,
    kind: IndexKind,
    group_fn: GroupFn,
    agg_fn: AggFn,
    pending: Option<Row>,
    done: bool,
}

impl GroupByScan {
    pub fn new(source: &Index, group_fn: GroupFn, agg_fn: AggFn) -> GroupByScan {
        GroupByScan {
            rs: source.scan(),
            kind: source.kind(),
            group_fn,
            agg_fn,
            pending: None,
            done: false,
        }
    }

    fn decode(&self, key: &[u8], value: Vec<u8>) -> Row {
        match self.kind {
            IndexKind::Multi | IndexKind::UniqueHideDup => {
                let row = &key[1..];
                let emit_key = row[..row.len() - 8].to_vec();
                let doc_id = DocId::from_be_bytes(row[row.len() - 8..].try_into().unwrap());
                (emit_key, doc_id, value)
            }
            IndexKind::UniqueNoCheck | IndexKind::Unique => {
                let emit_key = key[1..].to_vec();
                let doc_id = DocId::from_be_bytes(value[..8].try_into().unwrap());
                (emit_key, doc_id, value[8..].to_vec())
            }
        }
    }

    fn next_row(&mut self) -> Option<Row> {
        let (key, value) = self.rs.next()?;
        Some(self.decode(&key, value))
    }

    /// Advance past the next maximal run of same-group rows, returning
    /// `(group, aggregate)`, or `None` once the source is exhausted. A
    /// group whose `AggFn` returns `None` is silently skipped, not
    /// returned with an empty value.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Option<(Vec<u8>, Vec<u8>)> {
        while !self.done {
            let first = self.pending.take().or_else(|| self.next_row())?;
            let group = (self.group_fn)(&first.0);
            let mut rows = vec![(first.1, first.2)];
            loop {
                match self.next_row() {
                    Some(row) => {
                        if (self.group_fn)(&row.0) == group {
                            rows.push((row.1, row.2));
                        } else {
                            self.pending = Some(row);
                            break;
                        }
                    }
                    None => {
                        self.done = true;
                        break;
                    }
                }
            }
            if let Some(value) = (self.agg_fn)(&rows) {
                return Some((group, value));
            }
        }
        None
    }
}

#[cfg(test)]
#[path = "groupby_scan_test.rs"]
mod groupby_scan_test;
