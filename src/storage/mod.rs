//! # Queue Storage Module
//!
//! High-level lifecycle layer over the embedded storage engine. A
//! [`QueueStorage`] owns exactly one attached database per queue store,
//! guarantees the on-disk schema matches this build, recovers from unclean
//! shutdowns, and hands out scoped, lock-protected access to the logical
//! tables.
//!
//! ## Initialization Pipeline
//!
//! `QueueStorage::initialize` either returns a fully usable instance or an
//! error; there is no observable half-initialized state:
//!
//! ```text
//! prepare directories
//!     │
//!     ▼
//! strict attach ── missing ──▶ bootstrap schema ──▶ strict attach
//!     │        └── dirty ────▶ transient recovery ─▶ strict attach
//!     ▼                        (failures swallowed)
//! schema version gate (exact string match, else SchemaVersionMismatch)
//!     │
//!     ▼
//! column catalog load (all seven tables + layout rows, else fatal)
//!     │
//!     ▼
//! ready QueueStorage
//! ```
//!
//! ## Thread Safety
//!
//! The attached engine sits in a `parking_lot::RwLock<Option<_>>` that is
//! both the concurrency gate and the guarded slot:
//!
//! - scoped access ([`QueueStorage::global`], [`QueueStorage::send`]) holds
//!   the lock shared, so any number of actions run concurrently;
//! - teardown holds it exclusively, so it waits for every in-flight action
//!   and no new action can start once a teardown is waiting;
//! - after teardown the slot is `None` and scoped access fails with
//!   [`StorageError::Disposed`](crate::StorageError::Disposed).
//!
//! Re-entrant scoped access on one thread is tracked explicitly by the
//! `scope` submodule and does not self-deadlock.
//!
//! ## Module Organization
//!
//! - `storage`: the `QueueStorage` type, initialization and accessors
//! - `recovery`: attach-or-create protocol and the transient recovery pass
//! - `scope`: concurrency gate, re-entrancy tracking, action contexts
//! - `actions`: queue-level operations exposed through the action contexts
//! - `lifecycle`: graceful/abrupt shutdown and the drop fallback

mod actions;
mod lifecycle;
mod recovery;
mod scope;
#[allow(clippy::module_inception)]
mod storage;

pub use actions::{GlobalActions, OutgoingMessage, SendActions, DEFAULT_SUBQUEUE};
pub use storage::QueueStorage;
