//! # RelayQ Storage - Durable Queue Persistence
//!
//! RelayQ storage is the durability layer of the RelayQ message queue: an
//! embedded, transactional store for queue definitions, outgoing messages,
//! delivery history, and transaction recovery records. This crate owns the
//! storage lifecycle and prioritizes:
//!
//! - **Crash-safe startup**: a strict attach that never silently repairs a
//!   half-written file; recovery is an explicit, logged step
//! - **One gate for teardown**: scoped access that lets readers run
//!   concurrently while shutdown waits for all of them
//! - **Self-describing files**: schema version and column layouts persisted
//!   beside the data they describe
//!
//! ## Quick Start
//!
//! ```ignore
//! use relayq::{QueueStorage, StorageConfig};
//!
//! let storage = QueueStorage::initialize("orders", StorageConfig::new("./data"))?;
//!
//! storage.global(|g| g.create_queue("billing"))?;
//! let pending = storage.send(|s| s.pending_count())?;
//!
//! storage.shutdown()?;
//! ```
//!
//! ## Architecture
//!
//! The crate is layered; each layer only speaks to the one below it:
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │      Public API (QueueStorage)      │
//! ├─────────────────────────────────────┤
//! │   Scoped Actions (Global / Send)    │
//! ├──────────────────┬──────────────────┤
//! │ Schema Bootstrap │  Column Catalog  │
//! ├──────────────────┴──────────────────┤
//! │     Attach & Recovery Protocol      │
//! ├─────────────────────────────────────┤
//! │    Engine Adapter (redb database)   │
//! └─────────────────────────────────────┘
//! ```
//!
//! ## File Layout
//!
//! Each storage instance owns one directory tree:
//!
//! ```text
//! <root>/
//! ├── <name>.relayq    # main database file
//! ├── logs/            # engine log staging
//! ├── system/          # engine system files
//! └── temp/            # scratch space
//! ```
//!
//! ## Durability Profiles
//!
//! - `Durable` (default): every scoped write commits through to disk before
//!   returning
//! - `Buffered`: commits may sit in the engine's cache; a graceful shutdown
//!   flushes them, an abrupt one may lose them
//!
//! ## Module Overview
//!
//! - [`storage`]: lifecycle, scoped access, queue and message operations
//! - [`schema`]: logical tables, persisted layouts, column-id record codec
//! - [`engine`]: attach outcome classification over the underlying database
//! - [`config`]: configuration knobs and the derived directory layout
//! - [`error`]: the crate-wide error surface

pub mod config;
pub mod engine;
pub mod error;
pub mod schema;
pub mod storage;

pub use config::{DirectoryLayout, DurabilityProfile, StorageConfig};
pub use error::{Result, StorageError};
pub use storage::{GlobalActions, OutgoingMessage, QueueStorage, SendActions, DEFAULT_SUBQUEUE};
