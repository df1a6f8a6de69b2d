//! Cluster data model
//!
//! The snapshot is the only state store: nothing else is persisted.

pub mod snapshot;

pub use snapshot::*;
