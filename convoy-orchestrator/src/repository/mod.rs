//! Repository Module
//!
//! Persistence layer for the orchestrator. Pipelines are stored as JSON
//! snapshot files rather than database rows.

pub mod pipeline;

pub use pipeline::{SnapshotStore, StoreError};
