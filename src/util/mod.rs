//! Generic multi-threading support shared by the background workers this
//! crate spawns, currently just [`crate::groupby::MaterializedAggregator`].

pub mod thread;
