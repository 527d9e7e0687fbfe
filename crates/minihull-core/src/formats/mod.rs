//! # Serialization Formats
//!
//! On-disk formats for the store. Pure transformations; no file I/O.

pub mod snapshot;

pub use snapshot::{MAX_SNAPSHOT_SIZE, SNAPSHOT_VERSION, StoreSnapshot, snapshot_from_bytes, snapshot_to_bytes};
