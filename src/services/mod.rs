//! Persistence services module
//! 
//! This module contains the key-value storage boundary and the checkpoint
//! persistence built on top of it.

pub mod checkpoint;
pub mod storage;

// Re-export main types
pub use checkpoint::{Checkpoint, CheckpointStore, OverExposureRecord, Restored};
pub use storage::{FileStore, KeyValueStore, MemoryStore};
