//! # Membership Matcher
//!
//! Resolves an entity's `group_ids` back-references against the group
//! definitions. References are weak: an id with no matching definition is
//! dropped without error, and a missing or malformed list means "no groups".

use crate::types::{GROUP_IDS_FIELD, Record, record_id};
use serde_json::Value;
use std::collections::BTreeSet;

/// String ids listed in an entity's `group_ids`.
///
/// Anything other than an array of strings yields nothing for the
/// offending part.
#[must_use]
pub fn group_ids(entity: &Record) -> Vec<String> {
    match entity.get(GROUP_IDS_FIELD) {
        Some(Value::Array(ids)) => ids
            .iter()
            .filter_map(|id| id.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

/// Groups whose id appears in the entity's `group_ids`.
///
/// The result follows the order of `groups`, not the order of the ids.
#[must_use]
pub fn matching_groups(entity: &Record, groups: &[Record]) -> Vec<Record> {
    let ids = group_ids(entity);
    if ids.is_empty() {
        return Vec::new();
    }
    let wanted: BTreeSet<&str> = ids.iter().map(String::as_str).collect();
    groups
        .iter()
        .filter(|g| record_id(g).is_some_and(|id| wanted.contains(id)))
        .cloned()
        .collect()
}
