//! Single entry point tying an [`Engine`] and its [`Keyspace`] together so
//! an application opens every collection kind — document storage, map,
//! index, incremental aggregator, materialized aggregator — against one
//! shared handle instead of threading the engine and keyspace through
//! every call site by hand.

use std::sync::Arc;

use crate::{
    aggregator::{GroupFn as IncrementalGroupFn, IncrementalAggregator, UpdateFn},
    groupby::{AggFn, GroupFn, MaterializedAggregator},
    index::{Index, IndexFn, IndexKind},
    keyspace::Keyspace,
    kv::Engine,
    map::Map,
    observer::ObserverTicket,
    storage::{Storage, Update},
    Result,
};

/// Owns the keyspace registry for one [`Engine`] and hands out typed
/// collection handles against it.
pub struct Db {
    engine: Arc<dyn Engine>,
    keyspace: Keyspace,
}

impl Db {
    /// Open (or re-open) the database backed by `engine`, seeding the
    /// keyspace registry from whatever system-table rows already exist.
    pub fn open(engine: Arc<dyn Engine>) -> Result<Db> {
        let keyspace = Keyspace::open(engine.clone())?;
        Ok(Db { engine, keyspace })
    }

    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }

    pub fn keyspace(&self) -> &Keyspace {
        &self.keyspace
    }

    pub fn storage(&self, name: &str) -> Result<Storage> {
        Storage::open(self.engine.clone(), &self.keyspace, name)
    }

    pub fn map(&self, name: &str) -> Result<Map> {
        Map::open(self.engine.clone(), &self.keyspace, name)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn index(
        &self,
        name: &str,
        kind: IndexKind,
        index_fn: IndexFn,
        revision: u64,
        storage: &Storage,
    ) -> Result<(Arc<Index>, ObserverTicket<Update>)> {
        Index::attach(self.engine.clone(), &self.keyspace, name, kind, index_fn, revision, storage)
    }

    pub fn incremental_aggregator(
        &self,
        name: &str,
        group_fn: IncrementalGroupFn,
        update_fn: UpdateFn,
        revision: u64,
        storage: &Storage,
    ) -> Result<(Arc<IncrementalAggregator>, ObserverTicket<Update>)> {
        IncrementalAggregator::attach(self.engine.clone(), &self.keyspace, name, group_fn, update_fn, revision, storage)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn materialized_aggregator(
        &self,
        name: &str,
        source: Arc<Index>,
        index_fn: IndexFn,
        group_fn: GroupFn,
        agg_fn: AggFn,
        revision: u64,
        storage: &Storage,
    ) -> Result<(Arc<MaterializedAggregator>, ObserverTicket<Update>)> {
        MaterializedAggregator::attach(
            self.engine.clone(),
            &self.keyspace,
            name,
            source,
            index_fn,
            group_fn,
            agg_fn,
            revision,
            storage,
        )
    }
}

#[cfg(test)]
#[path = "db_test.rs"]
mod db_test;
