//! Storage Engine Adapter (C1, spec.md §4.1).

pub mod engine;

pub use engine::{EngineOptions, StorageEngine, WriteOp};
