//! Bounded, directional row scans over a single snapshot.
//!
//! A [`Recordset`] is the one scanning primitive every typed view builds
//! on: [`crate::storage::Storage::scan`], indexer lookups, and the
//! streaming group-by in [`crate::groupby_scan`] all construct one against
//! their own key range and let it own the direction, the filter, and the
//! approximate sizing.
//!
//! Direction is implied, not a separate flag: a range whose start sorts
//! before its end scans forward; a range given start-after-end scans
//! backward by swapping bounds and reversing the iteration order. This
//! mirrors how a bidirectional cursor over an ordered store is normally
//! driven — advance toward whichever bound is further away.
//!
//! [`Snapshot::range`] hands back rows already materialized into owned
//! `Vec`s (no engine here streams lazily from disk), so a recordset pulls
//! its whole range into a buffer once, on first use, rather than holding a
//! live borrowed cursor alongside the `Arc<dyn Snapshot>` it came from.

use std::ops::Bound;

use crate::kv::Snapshot;

/// A predicate applied to each raw `(key, value)` row before it is
/// yielded. Rows failing the filter are skipped; [`Recordset::count_aprox`]
/// is a byte-range estimate and is unaffected by filters.
pub type Filter = Box<dyn Fn(&[u8], &[u8]) -> bool + Send + Sync>;

/// A bounded, directional iterator over one snapshot's key range.
pub struct Recordset {
    snapshot: std::sync::Arc<dyn Snapshot>,
    start: Vec<u8>,
    end: Vec<u8>,
    forward: bool,
    filters: Vec<Filter>,
    /// Rows in scan order (already reversed if `!forward`), with the index
    /// of the last row returned by `next`/`previous` — `None` until the
    /// first such call, or once `previous` has backed off the start.
    buffer: Option<(Vec<(Vec<u8>, Vec<u8>)>, Option<usize>)>,
}

impl Recordset {
    /// Build a scan over `[range_start, range_end)`. If `range_start >
    /// range_end` the scan runs backward over `[range_end, range_start)`.
    pub fn new(
        snapshot: std::sync::Arc<dyn Snapshot>,
        range_start: Vec<u8>,
        range_end: Vec<u8>,
    ) -> Recordset {
        let forward = range_start <= range_end;
        let (start, end) = if forward {
            (range_start, range_end)
        } else {
            (range_end, range_start)
        };
        Recordset {
            snapshot,
            start,
            end,
            forward,
            filters: Vec::new(),
            buffer: None,
        }
    }

    /// Attach a row filter. Filters apply in the order added; a row must
    /// pass all of them to be yielded. Invalidates any buffered scan.
    pub fn add_filter(&mut self, filter: Filter) -> &mut Recordset {
        self.filters.push(filter);
        self.buffer = None;
        self
    }

    /// Reposition the cursor to the start of the range (the near bound in
    /// the scan's own direction), discarding any in-flight iteration.
    pub fn reset(&mut self) {
        self.buffer = None;
    }

    fn fill(&mut self) {
        if self.buffer.is_some() {
            return;
        }
        let mut rows: Vec<(Vec<u8>, Vec<u8>)> = self
            .snapshot
            .range(
                Bound::Included(self.start.clone()),
                Bound::Excluded(self.end.clone()),
            )
            .filter(|(k, v)| self.filters.iter().all(|f| f(k, v)))
            .collect();
        if !self.forward {
            rows.reverse();
        }
        self.buffer = Some((rows, None));
    }

    /// Advance one row in the scan's direction. `None` once the range is
    /// exhausted.
    pub fn next(&mut self) -> Option<(Vec<u8>, Vec<u8>)> {
        self.fill();
        let (rows, pos) = self.buffer.as_mut().unwrap();
        let next_pos = match *pos {
            Some(p) => p + 1,
            None => 0,
        };
        let row = rows.get(next_pos).cloned();
        if row.is_some() {
            *pos = Some(next_pos);
        }
        row
    }

    /// Step back to the row returned by the previous `next`/`previous`
    /// call, i.e. undo the last `next`. `None` once stepped back past the
    /// first row yielded.
    pub fn previous(&mut self) -> Option<(Vec<u8>, Vec<u8>)> {
        self.fill();
        let (rows, pos) = self.buffer.as_mut().unwrap();
        match *pos {
            None => None,
            Some(0) => {
                *pos = None;
                None
            }
            Some(p) => {
                *pos = Some(p - 1);
                rows.get(p - 1).cloned()
            }
        }
    }

    /// A heuristic row-range size, delegated to the engine's own
    /// approximation; never an exact count. `cap` bounds the number of
    /// distinct sub-ranges probed when an engine samples rather than
    /// computes directly — unused by the in-memory engine, which computes
    /// exactly, but kept so pluggable engines that shard estimates can
    /// respect it.
    pub fn count_aprox(&self, engine: &dyn crate::kv::Engine, _cap: usize) -> crate::Result<u64> {
        engine.approx_size(
            Bound::Included(self.start.clone()),
            Bound::Excluded(self.end.clone()),
        )
    }
}

#[cfg(test)]
#[path = "recordset_test.rs"]
mod recordset_test;
