//! # minihull-core
//!
//! The in-memory engine of the minihull mock platform - THE LOGIC.
//!
//! minihull stands in for a hosted platform during connector integration
//! tests. This crate holds its state and the pure algorithms over it:
//!
//! - `store`: ordered collections of JSON records with collision-free ids
//! - `diff`: field-level change sets using loose equality
//! - `membership`: resolving an entity's `group_ids` to group definitions
//! - `envelope`: report bundles, signing context, delivery planning
//! - `operations`: operation names and the removed-name table
//! - `formats`: JSON snapshot format
//!
//! ## Architectural Constraints
//!
//! - No async, no network dependencies
//! - Lookups return `Option`; only operations that need a record fail
//! - Randomness is confined to id generation

// =============================================================================
// MODULES
// =============================================================================

pub mod diff;
pub mod envelope;
pub mod formats;
pub mod membership;
pub mod operations;
pub mod store;
pub mod types;

// =============================================================================
// RE-EXPORTS
// =============================================================================

pub use diff::{Changes, diff, loose_equals};
pub use envelope::{
    DeliveryTarget, NotificationBody, Report, SigningContext, Subscription, plan_deliveries,
};
pub use formats::{StoreSnapshot, snapshot_from_bytes, snapshot_to_bytes};
pub use membership::{group_ids, matching_groups};
pub use operations::{Operation, REMOVED_OPERATIONS, resolve_operation};
pub use store::{IdGenerator, Store, deep_merge, random_id};
pub use types::{Collection, Ident, MinihullError, Record, record_id};
