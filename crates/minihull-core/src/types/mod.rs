//! # Core Type Definitions
//!
//! This module contains the shared vocabulary of the mock platform:
//! - Collection names (`Collection`)
//! - Records and the identifiers used to resolve them (`Record`, `Ident`)
//! - Well-known field names
//! - Error types (`MinihullError`)
//!
//! ## Records
//!
//! Every stored object is a flat JSON object. The store never imposes a
//! schema beyond the `id` field; everything else is opaque attribute data
//! owned by the test that seeded it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

// =============================================================================
// RECORDS
// =============================================================================

/// A stored object: a JSON object keyed by attribute name.
///
/// Insertion order of attributes is preserved.
pub type Record = Map<String, Value>;

/// Identifier field present on every stored record.
pub const ID_FIELD: &str = "id";

/// Back-reference list on entities pointing at group definitions.
pub const GROUP_IDS_FIELD: &str = "group_ids";

/// Subscriber origin URL.
pub const URL_FIELD: &str = "url";

/// Subscriber manifest (declares subscriptions and the admin page).
pub const MANIFEST_FIELD: &str = "manifest";

/// Opaque subscriber settings blob.
pub const SETTINGS_FIELD: &str = "settings";

/// Read the `id` of a record as a string slice.
#[must_use]
pub fn record_id(record: &Record) -> Option<&str> {
    record.get(ID_FIELD).and_then(Value::as_str)
}

// =============================================================================
// COLLECTIONS
// =============================================================================

/// Named collections held by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    /// Registered connectors listening for notifications.
    Subscribers,
    /// Primary entities (users, accounts, generic records).
    Entities,
    /// Group definitions (segments).
    Groups,
}

impl Collection {
    /// All collections, in snapshot order.
    pub const ALL: [Collection; 3] = [
        Collection::Subscribers,
        Collection::Entities,
        Collection::Groups,
    ];

    /// Collection name as used in snapshots and error messages.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Subscribers => "subscribers",
            Self::Entities => "entities",
            Self::Groups => "groups",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// IDENT
// =============================================================================

/// How an operation names the record it acts on.
///
/// Deserializes from either a bare string (an id) or an object whose fields
/// must all match the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Ident {
    /// Match by `id`.
    Id(String),
    /// Match every listed field exactly.
    Match(Record),
}

impl Ident {
    /// Build an id-based ident.
    #[must_use]
    pub fn id(id: impl Into<String>) -> Self {
        Self::Id(id.into())
    }

    /// Check whether a record is named by this ident.
    #[must_use]
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Self::Id(id) => record_id(record) == Some(id.as_str()),
            Self::Match(fields) => fields
                .iter()
                .all(|(key, value)| record.get(key) == Some(value)),
        }
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Match(fields) => write!(f, "{}", Value::Object(fields.clone())),
        }
    }
}

impl From<&str> for Ident {
    fn from(id: &str) -> Self {
        Self::Id(id.to_string())
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur in the mock platform.
///
/// Plain lookups never produce an error; they return `Option`. These
/// variants cover operations that require a record to exist, misuse of
/// removed operation names, and serialization or I/O failures.
#[derive(Debug, Error)]
pub enum MinihullError {
    /// An operation needed a record that is not in the collection.
    #[error("No record in {collection} matching {ident}")]
    RecordNotFound { collection: Collection, ident: String },

    /// No saved snapshot has this name.
    #[error("Snapshot `{0}` not found")]
    SnapshotNotFound(String),

    /// An explicit id on insert collides with an existing or retired id.
    #[error("Identifier {id} already used in {collection}")]
    DuplicateId { collection: Collection, id: String },

    /// A historical operation name was invoked.
    #[error("Operation `{name}` was removed; use `{replacement}` instead")]
    RemovedOperation {
        name: String,
        replacement: &'static str,
    },

    /// The operation name is not known at all.
    #[error("Unknown operation `{0}`")]
    UnknownOperation(String),

    /// Arguments to an operation were missing or had the wrong shape.
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// An outbound call the operation depends on failed.
    #[error("Outbound call failed: {0}")]
    OutboundFailed(String),

    /// A serialization error occurred.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// A deserialization error occurred.
    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(String),
}

// =============================================================================
// TESTS
// =============================================================================
