//! An embedded, single-process document database built as a set of typed
//! views over an ordered key-value store.
//!
//! Applications write documents through [`storage::Storage`]; every write
//! commits as one atomic batch that also carries whatever derived rows
//! its attached collections — [`index::Index`],
//! [`aggregator::IncrementalAggregator`],
//! [`groupby::MaterializedAggregator`] — append to it via
//! [`observer::ObserverBus`]. [`db::Db`] is the single entry point that
//! opens all of these against one shared [`kv::Engine`] and
//! [`keyspace::Keyspace`].
//!
//! Everything above [`kv::Engine`] is written against that trait alone:
//! point get, atomic write batches, snapshots, range iteration, and
//! approximate range sizing. [`kv::mem::MemEngine`] is the in-memory
//! engine shipped here; a LevelDB/RocksDB/sled-backed implementation
//! plugs in without touching any collection code.

pub mod aggregator;
pub mod batch;
pub mod codec;
pub mod db;
pub mod error;
pub mod groupby;
pub mod groupby_scan;
pub mod index;
pub mod keyspace;
pub mod kv;
pub mod map;
pub mod observer;
pub mod recordset;
pub mod revtag;
pub mod storage;
mod util;

pub use crate::db::Db;
pub use crate::error::{Error, Result};
pub use crate::keyspace::{Keyspace, Purpose};
pub use crate::kv::Engine;
pub use crate::storage::{DocId, Storage};
