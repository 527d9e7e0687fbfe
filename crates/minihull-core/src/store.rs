//! # Entity Store
//!
//! Named, ordered collections of JSON records with generated identifiers.
//!
//! ## Identifiers
//!
//! Generated ids are 12 random bytes from the operating system RNG, hex
//! encoded. Every id the store has ever held is remembered in a retired set,
//! so an id is never handed out twice for the lifetime of the store, even
//! after `remove` or `reset`.
//!
//! ## Concurrency
//!
//! The store itself is a plain value. The application wraps it in a lock so
//! that each mutation is applied as a whole before any reader can observe it.

use crate::membership::{group_ids, matching_groups};
use crate::types::{Collection, GROUP_IDS_FIELD, ID_FIELD, Ident, MinihullError, Record};
use rand::RngCore;
use rand::rngs::OsRng;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Number of random bytes in a generated identifier.
pub const ID_BYTES: usize = 12;

// =============================================================================
// IDENTIFIER GENERATION
// =============================================================================

/// A fresh random identifier, not checked against any retired set.
#[must_use]
pub fn random_id() -> String {
    let mut bytes = [0u8; ID_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Source of collision-free record identifiers.
#[derive(Debug, Default, Clone)]
pub struct IdGenerator {
    issued: BTreeSet<String>,
}

impl IdGenerator {
    /// Create a generator with no retired ids.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Produce a fresh id and retire it.
    pub fn next_id(&mut self) -> String {
        loop {
            let id = random_id();
            if self.issued.insert(id.clone()) {
                return id;
            }
        }
    }

    /// Retire an externally chosen id. Returns `false` if it was already used.
    pub fn claim(&mut self, id: &str) -> bool {
        self.issued.insert(id.to_string())
    }

    /// Whether the id has ever been issued or claimed.
    #[must_use]
    pub fn is_retired(&self, id: &str) -> bool {
        self.issued.contains(id)
    }
}

// =============================================================================
// MERGE
// =============================================================================

/// Merge `patch` into `target`.
///
/// Nested objects merge key by key; any other value in `patch` replaces the
/// value in `target`.
pub fn deep_merge(target: &mut Record, patch: &Record) {
    for (key, value) in patch {
        match (target.get_mut(key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                deep_merge(existing, incoming);
            }
            _ => {
                target.insert(key.clone(), value.clone());
            }
        }
    }
}

// =============================================================================
// STORE
// =============================================================================

/// In-memory state of the mock platform.
#[derive(Debug, Clone)]
pub struct Store {
    collections: BTreeMap<Collection, Vec<Record>>,
    ids: IdGenerator,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    /// Create a store with every collection present and empty.
    #[must_use]
    pub fn new() -> Self {
        let collections = Collection::ALL
            .iter()
            .map(|c| (*c, Vec::new()))
            .collect();
        Self {
            collections,
            ids: IdGenerator::new(),
        }
    }

    fn records(&self, collection: Collection) -> &[Record] {
        self.collections
            .get(&collection)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn records_mut(&mut self, collection: Collection) -> &mut Vec<Record> {
        self.collections.entry(collection).or_default()
    }

    /// Insert a record, assigning an id unless a string `id` is supplied.
    ///
    /// Returns the stored record including its id.
    pub fn insert(
        &mut self,
        collection: Collection,
        mut record: Record,
    ) -> Result<Record, MinihullError> {
        let id = match record.get(ID_FIELD) {
            Some(Value::String(id)) => {
                let id = id.clone();
                if !self.ids.claim(&id) {
                    return Err(MinihullError::DuplicateId { collection, id });
                }
                id
            }
            Some(Value::Number(n)) => {
                let id = n.to_string();
                if !self.ids.claim(&id) {
                    return Err(MinihullError::DuplicateId { collection, id });
                }
                id
            }
            _ => self.ids.next_id(),
        };
        record.insert(ID_FIELD.to_string(), Value::String(id));
        self.records_mut(collection).push(record.clone());
        Ok(record)
    }

    /// First record satisfying `predicate`, in collection order.
    pub fn find<P>(&self, collection: Collection, predicate: P) -> Option<&Record>
    where
        P: Fn(&Record) -> bool,
    {
        self.records(collection).iter().find(|r| predicate(r))
    }

    /// First record named by `ident`.
    #[must_use]
    pub fn resolve(&self, collection: Collection, ident: &Ident) -> Option<&Record> {
        self.find(collection, |r| ident.matches(r))
    }

    /// Record with the given id.
    #[must_use]
    pub fn get(&self, collection: Collection, id: &str) -> Option<&Record> {
        self.resolve(collection, &Ident::id(id))
    }

    /// Record at a position in the collection.
    #[must_use]
    pub fn nth(&self, collection: Collection, index: usize) -> Option<&Record> {
        self.records(collection).get(index)
    }

    /// Deep-merge `patch` into the record named by `ident`.
    ///
    /// The `id` field is never overwritten. Returns the record as it was
    /// before the patch together with the updated record, or `None` when
    /// nothing matched.
    pub fn update(
        &mut self,
        collection: Collection,
        ident: &Ident,
        patch: &Record,
    ) -> Option<(Record, Record)> {
        self.modify(collection, ident, |record| {
            let id = record.get(ID_FIELD).cloned();
            deep_merge(record, patch);
            if let Some(id) = id {
                record.insert(ID_FIELD.to_string(), id);
            }
        })
    }

    /// Apply an arbitrary in-place edit to the record named by `ident`.
    ///
    /// Returns `(before, after)` copies, or `None` when nothing matched.
    pub fn modify<F>(
        &mut self,
        collection: Collection,
        ident: &Ident,
        edit: F,
    ) -> Option<(Record, Record)>
    where
        F: FnOnce(&mut Record),
    {
        let record = self
            .records_mut(collection)
            .iter_mut()
            .find(|r| ident.matches(r))?;
        let before = record.clone();
        edit(record);
        Some((before, record.clone()))
    }

    /// Remove the record with the given id. Its id stays retired.
    pub fn remove(&mut self, collection: Collection, id: &str) -> Option<Record> {
        let records = self.records_mut(collection);
        let index = records
            .iter()
            .position(|r| crate::types::record_id(r) == Some(id))?;
        Some(records.remove(index))
    }

    /// All records of a collection, in insertion order.
    #[must_use]
    pub fn all(&self, collection: Collection) -> &[Record] {
        self.records(collection)
    }

    /// Number of records in a collection.
    #[must_use]
    pub fn len(&self, collection: Collection) -> usize {
        self.records(collection).len()
    }

    /// Whether every collection is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.collections.values().all(Vec::is_empty)
    }

    /// Records whose id is in `ids`, in the order of the collection.
    #[must_use]
    pub fn intersection_by_ids<S: AsRef<str>>(
        &self,
        collection: Collection,
        ids: &[S],
    ) -> Vec<Record> {
        let wanted: BTreeSet<&str> = ids.iter().map(AsRef::as_ref).collect();
        self.records(collection)
            .iter()
            .filter(|r| crate::types::record_id(r).is_some_and(|id| wanted.contains(id)))
            .cloned()
            .collect()
    }

    /// Groups the entity named by `ident` currently belongs to.
    ///
    /// The entity is re-read from the store so the result reflects the
    /// latest mutation. An unknown entity has no groups.
    #[must_use]
    pub fn matching_groups_for(&self, ident: &Ident) -> Vec<Record> {
        self.resolve(Collection::Entities, ident)
            .map(|entity| matching_groups(entity, self.all(Collection::Groups)))
            .unwrap_or_default()
    }

    /// Groups of a live entity record.
    ///
    /// A record without a usable `group_ids` list is resolved again through
    /// its id, mirroring callers that hold a stale copy.
    #[must_use]
    pub fn matching_groups(&self, entity: &Record) -> Vec<Record> {
        if entity.get(GROUP_IDS_FIELD).is_none() {
            if let Some(id) = crate::types::record_id(entity) {
                return self.matching_groups_for(&Ident::id(id));
            }
        }
        matching_groups(entity, self.all(Collection::Groups))
    }

    /// Raw `group_ids` of an entity, filtered to strings.
    #[must_use]
    pub fn group_ids_of(&self, ident: &Ident) -> Vec<String> {
        self.resolve(Collection::Entities, ident)
            .map(group_ids)
            .unwrap_or_default()
    }

    /// Drop every record. Retired ids stay retired.
    pub fn reset(&mut self) {
        for records in self.collections.values_mut() {
            records.clear();
        }
    }

    /// Replace one collection wholesale, retiring every id it contains.
    pub fn replace_collection(&mut self, collection: Collection, records: Vec<Record>) {
        for record in &records {
            if let Some(id) = crate::types::record_id(record) {
                self.ids.claim(id);
            }
        }
        self.collections.insert(collection, records);
    }
}

// =============================================================================
// TESTS
// =============================================================================
