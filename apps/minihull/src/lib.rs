//! # minihull
//!
//! Mock platform server for connector integration tests - THE BINARY.
//!
//! A test starts a [`Minihull`], seeds its store, triggers operations
//! (install, entity update, group enter/exit, rename) and awaits ledger
//! events to assert on what the connector under test sent and received.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    apps/minihull (THE BINARY)                │
//! │                                                              │
//! │  ┌──────────┐   ┌────────────┐   ┌───────────────────────┐  │
//! │  │   CLI    │   │  HTTP API  │   │ Dispatcher + Client   │  │
//! │  │  (clap)  │   │  (axum)    │   │ (reqwest, tokio)      │  │
//! │  └────┬─────┘   └─────┬──────┘   └──────────┬────────────┘  │
//! │       │         ledger + stubs              │               │
//! │       └───────────────┼─────────────────────┘               │
//! │                       ▼                                     │
//! │               ┌───────────────┐                             │
//! │               │ minihull-core │                             │
//! │               │  (THE LOGIC)  │                             │
//! │               └───────────────┘                             │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod ledger;
pub mod ops;
pub mod outbound;
pub mod platform;
pub mod server;
pub mod snapshots;
pub mod stubs;

pub use config::Config;
pub use dispatch::{DeliveryOutcome, DispatchReport};
pub use ledger::{Direction, Exchange, Ledger, LedgerEntry, LedgerError, LedgerWait};
pub use platform::{CallOutcome, Platform};
pub use server::Minihull;
pub use stubs::StubRegistry;
