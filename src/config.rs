//! # Storage Configuration
//!
//! Caller-facing knobs for a storage instance plus the derived on-disk
//! layout. Configuration is pure assembly: the only side effect in this
//! module is directory creation via [`DirectoryLayout::ensure`].
//!
//! ## Directory Layout
//!
//! Every instance lives inside a single root directory:
//!
//! ```text
//! <root>/
//! ├── <name>.relayq    main database file
//! ├── logs/            engine log staging
//! ├── system/          engine system files
//! └── temp/            scratch space
//! ```
//!
//! The same layout is applied to the primary attach and to the transient
//! recovery attach so the two can never disagree about where files live.

use std::io;
use std::path::{Path, PathBuf};

/// File extension of the main database file.
pub const DATABASE_EXTENSION: &str = "relayq";

/// Default engine cache size in bytes.
pub const DEFAULT_CACHE_SIZE: usize = 64 * 1024 * 1024;

/// Durability applied to commits made inside scoped actions.
///
/// Graceful shutdown always ends with a fully durable flush commit no matter
/// which profile is selected, so `Buffered` trades at most the tail of
/// recent work against an abrupt termination, never against a clean one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurabilityProfile {
    /// Every scoped commit is synced to disk before returning.
    Durable,
    /// Scoped commits are batched by the engine and synced later.
    Buffered,
}

impl Default for DurabilityProfile {
    fn default() -> Self {
        DurabilityProfile::Durable
    }
}

/// Read-only configuration snapshot owned by a storage instance.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    root: PathBuf,
    cache_size: usize,
    durability: DurabilityProfile,
}

impl StorageConfig {
    /// Creates a configuration rooted at `root` with default tuning.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache_size: DEFAULT_CACHE_SIZE,
            durability: DurabilityProfile::default(),
        }
    }

    /// Sets the engine cache size in bytes.
    pub fn with_cache_size(mut self, bytes: usize) -> Self {
        self.cache_size = bytes;
        self
    }

    /// Sets the durability profile for scoped-action commits.
    pub fn with_durability(mut self, durability: DurabilityProfile) -> Self {
        self.durability = durability;
        self
    }

    /// Root directory the instance lives in.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Engine cache size in bytes.
    pub fn cache_size(&self) -> usize {
        self.cache_size
    }

    /// Durability profile for scoped-action commits.
    pub fn durability(&self) -> DurabilityProfile {
        self.durability
    }

    /// Derives the on-disk layout for the named database under this root.
    pub fn layout_for(&self, name: &str) -> DirectoryLayout {
        DirectoryLayout::derive(&self.root, name)
    }
}

/// Paths derived from a root directory and a database name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryLayout {
    root: PathBuf,
    database_file: PathBuf,
    temp_dir: PathBuf,
    system_dir: PathBuf,
    logs_dir: PathBuf,
}

impl DirectoryLayout {
    /// Pure derivation, no filesystem access.
    pub fn derive(root: impl Into<PathBuf>, name: &str) -> Self {
        let root = root.into();
        let database_file = root.join(format!("{name}.{DATABASE_EXTENSION}"));
        let temp_dir = root.join("temp");
        let system_dir = root.join("system");
        let logs_dir = root.join("logs");
        Self {
            root,
            database_file,
            temp_dir,
            system_dir,
            logs_dir,
        }
    }

    /// Creates the root and every derived directory if absent.
    pub fn ensure(&self) -> io::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(&self.temp_dir)?;
        std::fs::create_dir_all(&self.system_dir)?;
        std::fs::create_dir_all(&self.logs_dir)?;
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Full path of the main database file, `<root>/<name>.relayq`.
    pub fn database_file(&self) -> &Path {
        &self.database_file
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    pub fn system_dir(&self) -> &Path {
        &self.system_dir
    }

    pub fn logs_dir(&self) -> &Path {
        &self.logs_dir
    }
}
