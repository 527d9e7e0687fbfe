//! # Snapshot Format
//!
//! JSON serialization of the full store state.
//!
//! File I/O operations are in the app layer.
//!
//! Format: a single JSON object with one array per collection:
//!
//! ```json
//! { "version": 1, "subscribers": [...], "entities": [...], "groups": [...] }
//! ```
//!
//! A missing `version` reads as the current one; any other value is rejected.
//!
//! Restoring is all-or-nothing: the payload is fully parsed and validated
//! before the store is touched.

use crate::store::Store;
use crate::types::{Collection, MinihullError, Record, record_id};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Maximum accepted snapshot payload.
///
/// Checked before parsing.
pub const MAX_SNAPSHOT_SIZE: usize = 64 * 1024 * 1024;

/// Snapshot format version written by this build.
pub const SNAPSHOT_VERSION: u8 = 1;

fn current_version() -> u8 {
    SNAPSHOT_VERSION
}

/// Serializable copy of every collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    #[serde(default = "current_version")]
    pub version: u8,
    #[serde(default)]
    pub subscribers: Vec<Record>,
    #[serde(default)]
    pub entities: Vec<Record>,
    #[serde(default)]
    pub groups: Vec<Record>,
}

impl Default for StoreSnapshot {
    fn default() -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            subscribers: Vec::new(),
            entities: Vec::new(),
            groups: Vec::new(),
        }
    }
}

impl StoreSnapshot {
    /// Capture the current state of a store.
    #[must_use]
    pub fn capture(store: &Store) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            subscribers: store.all(Collection::Subscribers).to_vec(),
            entities: store.all(Collection::Entities).to_vec(),
            groups: store.all(Collection::Groups).to_vec(),
        }
    }

    fn collection(&self, collection: Collection) -> &[Record] {
        match collection {
            Collection::Subscribers => &self.subscribers,
            Collection::Entities => &self.entities,
            Collection::Groups => &self.groups,
        }
    }

    /// Check the format version, then that every record carries a string
    /// id unique in its collection.
    pub fn validate(&self) -> Result<(), MinihullError> {
        if self.version != SNAPSHOT_VERSION {
            return Err(MinihullError::DeserializationError(format!(
                "Unsupported snapshot version: {} (expected {})",
                self.version, SNAPSHOT_VERSION
            )));
        }
        for collection in Collection::ALL {
            let mut seen = BTreeSet::new();
            for record in self.collection(collection) {
                let id = record_id(record).ok_or_else(|| {
                    MinihullError::DeserializationError(format!(
                        "record without string id in {collection}"
                    ))
                })?;
                if !seen.insert(id) {
                    return Err(MinihullError::DuplicateId {
                        collection,
                        id: id.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Replace the store's state with this snapshot.
    pub fn restore_into(self, store: &mut Store) -> Result<(), MinihullError> {
        self.validate()?;
        store.replace_collection(Collection::Subscribers, self.subscribers);
        store.replace_collection(Collection::Entities, self.entities);
        store.replace_collection(Collection::Groups, self.groups);
        Ok(())
    }
}

/// Serialize a store to pretty-printed JSON bytes.
pub fn snapshot_to_bytes(store: &Store) -> Result<Vec<u8>, MinihullError> {
    serde_json::to_vec_pretty(&StoreSnapshot::capture(store))
        .map_err(|e| MinihullError::SerializationError(e.to_string()))
}

/// Parse and validate snapshot bytes.
pub fn snapshot_from_bytes(bytes: &[u8]) -> Result<StoreSnapshot, MinihullError> {
    if bytes.len() > MAX_SNAPSHOT_SIZE {
        return Err(MinihullError::DeserializationError(format!(
            "Snapshot size {} exceeds maximum {} bytes",
            bytes.len(),
            MAX_SNAPSHOT_SIZE
        )));
    }
    let snapshot: StoreSnapshot = serde_json::from_slice(bytes)
        .map_err(|e| MinihullError::DeserializationError(e.to_string()))?;
    snapshot.validate()?;
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn record(value: Value) -> Record {
        value.as_object().cloned().expect("object literal")
    }

    #[test]
    fn restore_replaces_state() {
        let mut original = Store::new();
        original
            .insert(Collection::Entities, record(json!({"id": "u1", "name": "Ann"})))
            .expect("insert");
        original
            .insert(Collection::Groups, record(json!({"id": "g1", "name": "Leads"})))
            .expect("insert");
        let bytes = snapshot_to_bytes(&original).expect("serialize");

        let mut restored = Store::new();
        restored
            .insert(Collection::Entities, record(json!({"id": "stale"})))
            .expect("insert");
        snapshot_from_bytes(&bytes)
            .expect("parse")
            .restore_into(&mut restored)
            .expect("restore");

        assert!(restored.get(Collection::Entities, "stale").is_none());
        assert_eq!(
            StoreSnapshot::capture(&restored),
            StoreSnapshot::capture(&original)
        );
    }

    #[test]
    fn restored_ids_are_retired() {
        let snapshot = StoreSnapshot {
            groups: vec![record(json!({"id": "g1"}))],
            ..StoreSnapshot::default()
        };
        let mut store = Store::new();
        snapshot.restore_into(&mut store).expect("restore");
        assert!(store.insert(Collection::Groups, record(json!({"id": "g1"}))).is_err());
    }

    #[test]
    fn missing_id_is_rejected() {
        let bytes = br#"{"entities": [{"name": "no id"}]}"#;
        assert!(matches!(
            snapshot_from_bytes(bytes),
            Err(MinihullError::DeserializationError(_))
        ));
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let bytes = br#"{"groups": [{"id": "g"}, {"id": "g"}]}"#;
        assert!(matches!(
            snapshot_from_bytes(bytes),
            Err(MinihullError::DuplicateId { .. })
        ));
    }

    #[test]
    fn version_is_written_and_checked() {
        let bytes = snapshot_to_bytes(&Store::new()).expect("serialize");
        let value: Value = serde_json::from_slice(&bytes).expect("json");
        assert_eq!(value["version"], json!(SNAPSHOT_VERSION));

        let future = br#"{"version": 2, "entities": [{"id": "u1"}]}"#;
        assert!(matches!(
            snapshot_from_bytes(future),
            Err(MinihullError::DeserializationError(_))
        ));
    }

    #[test]
    fn missing_collections_default_to_empty() {
        let snapshot = snapshot_from_bytes(b"{}").expect("parse");
        assert_eq!(snapshot, StoreSnapshot::default());
    }
}
