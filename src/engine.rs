//! # Storage Engine Binding
//!
//! Adapter over the embedded [`redb`] engine. Everything above this module
//! speaks in terms of [`EngineInstance`] (settings plus a file path, no OS
//! resources) and [`AttachedEngine`] (a live database handle); no raw engine
//! error leaves the initialization path.
//!
//! ## Attach Outcomes
//!
//! The attach-and-recover protocol needs a three-way classification of a
//! failed primary attach, derived from the raw engine signal:
//!
//! | outcome                       | raw engine signal                        |
//! |-------------------------------|------------------------------------------|
//! | [`EngineError::Missing`]      | io `NotFound` while opening the file     |
//! | [`EngineError::DirtyShutdown`]| repair requested, aborted by our callback|
//! | [`EngineError::Locked`]       | file already attached elsewhere          |
//! | anything else                 | wrapped and propagated                   |
//!
//! The primary attach installs a repair callback that immediately aborts, so
//! a file left dirty by a crash fails fast instead of being repaired in
//! place. Repair is reserved for the transient recovery attach
//! ([`EngineInstance::attach_permissive`]), which opens the same file with
//! the same settings but lets the engine rebuild what it must.

use std::io;
use std::path::{Path, PathBuf};

use redb::{Database, Durability, ReadTransaction, WriteTransaction};
use thiserror::Error;

use crate::config::DurabilityProfile;

/// Faults reported by the storage engine, classified for the layer above.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The database file does not exist.
    #[error("database file not found")]
    Missing,

    /// The previous session did not detach cleanly; the file needs recovery.
    #[error("database file was not shut down cleanly")]
    DirtyShutdown,

    /// Another handle, in this process or another, has the file attached.
    #[error("database file is locked by another instance")]
    Locked,

    /// The file was written by an engine release this build cannot read.
    #[error("database file format version {0} is not supported")]
    UnsupportedFormat(u8),

    #[error(transparent)]
    Database(redb::DatabaseError),

    #[error(transparent)]
    Storage(#[from] redb::StorageError),

    #[error(transparent)]
    Transaction(#[from] redb::TransactionError),

    #[error(transparent)]
    Table(#[from] redb::TableError),

    #[error(transparent)]
    Commit(#[from] redb::CommitError),
}

/// Engine settings bound to a database file path.
///
/// Constructing one allocates nothing; [`attach`](Self::attach) and friends
/// are what touch the filesystem. The same value drives the primary attach,
/// the schema bootstrap and the transient recovery attach, which keeps their
/// tuning identical by construction.
#[derive(Debug, Clone)]
pub struct EngineInstance {
    path: PathBuf,
    cache_size: usize,
}

impl EngineInstance {
    pub fn new(path: impl Into<PathBuf>, cache_size: usize) -> Self {
        Self {
            path: path.into(),
            cache_size,
        }
    }

    /// Path of the database file this instance is bound to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Attaches the database file, refusing to repair it.
    ///
    /// A file left dirty by an unclean shutdown fails with
    /// [`EngineError::DirtyShutdown`] instead of being repaired here.
    pub fn attach(&self) -> Result<Database, EngineError> {
        let mut builder = redb::Builder::new();
        builder.set_cache_size(self.cache_size);
        builder.set_repair_callback(|session| session.abort());
        builder.open(&self.path).map_err(classify_attach)
    }

    /// Attaches the database file, letting the engine repair it if needed.
    ///
    /// Committed data survives repair; torn or unreachable structures are
    /// discarded and rebuilt. Only the transient recovery path uses this.
    pub fn attach_permissive(&self) -> Result<Database, EngineError> {
        let mut builder = redb::Builder::new();
        builder.set_cache_size(self.cache_size);
        builder.open(&self.path).map_err(classify_attach)
    }

    /// Creates the database file (or attaches it if it already exists).
    pub fn create(&self) -> Result<Database, EngineError> {
        let mut builder = redb::Builder::new();
        builder.set_cache_size(self.cache_size);
        builder.create(&self.path).map_err(classify_attach)
    }
}

fn classify_attach(err: redb::DatabaseError) -> EngineError {
    match err {
        redb::DatabaseError::RepairAborted => EngineError::DirtyShutdown,
        redb::DatabaseError::DatabaseAlreadyOpen => EngineError::Locked,
        redb::DatabaseError::UpgradeRequired(version) => {
            EngineError::UnsupportedFormat(version)
        }
        redb::DatabaseError::Storage(redb::StorageError::Io(ref io))
            if io.kind() == io::ErrorKind::NotFound =>
        {
            EngineError::Missing
        }
        other => EngineError::Database(other),
    }
}

/// A live database handle plus the durability applied to routine commits.
pub struct AttachedEngine {
    db: Database,
    commit_durability: Durability,
}

impl AttachedEngine {
    pub fn new(db: Database, profile: DurabilityProfile) -> Self {
        let commit_durability = match profile {
            DurabilityProfile::Durable => Durability::Immediate,
            DurabilityProfile::Buffered => Durability::Eventual,
        };
        Self {
            db,
            commit_durability,
        }
    }

    /// Starts a read transaction.
    pub fn begin_read(&self) -> Result<ReadTransaction, EngineError> {
        Ok(self.db.begin_read()?)
    }

    /// Starts a write transaction with the configured commit durability.
    pub fn begin_write(&self) -> Result<WriteTransaction, EngineError> {
        let mut txn = self.db.begin_write()?;
        txn.set_durability(self.commit_durability);
        Ok(txn)
    }

    /// Starts a write transaction that will sync on commit regardless of the
    /// configured profile.
    pub fn begin_write_durable(&self) -> Result<WriteTransaction, EngineError> {
        let mut txn = self.db.begin_write()?;
        txn.set_durability(Durability::Immediate);
        Ok(txn)
    }

    /// Commits an empty fully-durable transaction, forcing any buffered
    /// commits onto disk.
    pub fn flush_durable(&self) -> Result<(), EngineError> {
        let txn = self.begin_write_durable()?;
        txn.commit()?;
        Ok(())
    }

    /// Graceful detach: flush everything, then release the file.
    ///
    /// The handle is consumed either way; a flush failure is reported after
    /// the file has been released.
    pub fn detach(self) -> Result<(), EngineError> {
        let flushed = self.flush_durable();
        drop(self);
        flushed
    }

    /// Abrupt detach: release the file without the final flush. Buffered
    /// commits since the last sync may be lost.
    pub fn detach_rudely(self) {
        drop(self);
    }
}
