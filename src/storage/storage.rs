//! # Queue Storage Instance
//!
//! The [`QueueStorage`] type: one attached database per queue store,
//! constructed ready by [`QueueStorage::initialize`]. Handles are cheap to
//! clone and share one inner state; the last handle to go away triggers the
//! drop fallback in `lifecycle`.

use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::config::{DirectoryLayout, StorageConfig};
use crate::engine::{AttachedEngine, EngineError, EngineInstance};
use crate::error::{Result, StorageError};
use crate::schema::{
    ColumnCatalog, StorageMetadata, METADATA_KEY, SCHEMA_VERSION, STORAGE_META,
};
use crate::storage::recovery;

pub(crate) struct StorageInner {
    /// Concurrency gate and guarded slot in one: shared holders run scoped
    /// actions, the exclusive holder tears down. `None` after disposal.
    pub(crate) engine: RwLock<Option<AttachedEngine>>,
    pub(crate) catalog: ColumnCatalog,
    pub(crate) id: Uuid,
    pub(crate) name: String,
    pub(crate) layout: DirectoryLayout,
    pub(crate) config: StorageConfig,
    pub(crate) disposed: AtomicBool,
}

/// Durable storage for one queue database.
///
/// Owns the attached engine, the loaded column catalog and the instance
/// identity. All access to the logical tables goes through the scoped entry
/// points [`global`](Self::global) and [`send`](Self::send); teardown goes
/// through [`shutdown`](Self::shutdown) or happens as a best effort when the
/// last handle drops.
#[derive(Clone)]
pub struct QueueStorage {
    pub(crate) inner: Arc<StorageInner>,
}

impl QueueStorage {
    /// Opens or creates the queue database `name` under the configured root
    /// and returns a ready instance.
    ///
    /// The full pipeline runs here: directory preparation, the
    /// attach-or-create protocol (including the transient recovery pass
    /// after an unclean shutdown), the schema version gate and the column
    /// catalog load. Apart from [`StorageError::SchemaVersionMismatch`],
    /// every failure is reported as [`StorageError::Initialization`] with
    /// the database path attached.
    pub fn initialize(name: &str, config: StorageConfig) -> Result<Self> {
        let layout = config.layout_for(name);
        let db_path = layout.database_file().to_path_buf();
        let wrap = |source: StorageError| StorageError::during_init(&db_path, source);

        layout.ensure().map_err(|err| wrap(StorageError::Io(err)))?;

        let instance = EngineInstance::new(&db_path, config.cache_size());
        let db = recovery::attach_or_create(&instance).map_err(wrap)?;
        let engine = AttachedEngine::new(db, config.durability());

        let metadata = verify_schema_version(&engine, &db_path).map_err(wrap)?;
        let catalog = ColumnCatalog::load(&engine).map_err(wrap)?;

        info!(path = %db_path.display(), id = %metadata.id, "queue storage ready");

        Ok(Self {
            inner: Arc::new(StorageInner {
                engine: RwLock::new(Some(engine)),
                catalog,
                id: metadata.id,
                name: name.to_string(),
                layout,
                config,
                disposed: AtomicBool::new(false),
            }),
        })
    }

    /// Stable identifier of this storage instance, generated at schema
    /// creation and identical across reopens.
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Name the database was initialized under.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Full path of the main database file.
    pub fn database_path(&self) -> &Path {
        self.inner.layout.database_file()
    }

    /// Derived on-disk layout of this instance.
    pub fn layout(&self) -> &DirectoryLayout {
        &self.inner.layout
    }

    /// Configuration snapshot the instance was initialized with.
    pub fn config(&self) -> &StorageConfig {
        &self.inner.config
    }

    /// Loaded column catalog.
    pub fn catalog(&self) -> &ColumnCatalog {
        &self.inner.catalog
    }
}

impl fmt::Debug for QueueStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueStorage")
            .field("name", &self.inner.name)
            .field("id", &self.inner.id)
            .field("path", &self.inner.layout.database_file())
            .field("disposed", &self.inner.disposed.load(Ordering::SeqCst))
            .finish()
    }
}

/// Reads and checks the metadata row. Runs once per initialization, before
/// the catalog load.
fn verify_schema_version(engine: &AttachedEngine, path: &Path) -> Result<StorageMetadata> {
    let txn = engine.begin_read()?;
    let meta = txn.open_table(STORAGE_META).map_err(EngineError::from)?;
    let row = meta
        .get(METADATA_KEY)
        .map_err(EngineError::from)?
        .ok_or_else(|| {
            StorageError::Corrupted(
                "missing storage metadata row; migrate the database or move it \
                 aside and let a fresh one be created"
                    .to_string(),
            )
        })?;
    let metadata: StorageMetadata = serde_json::from_slice(row.value()).map_err(|err| {
        StorageError::Corrupted(format!(
            "undecodable metadata row ({err}); migrate the database or move it \
             aside and let a fresh one be created"
        ))
    })?;

    if metadata.schema_version != SCHEMA_VERSION {
        return Err(StorageError::SchemaVersionMismatch {
            found: metadata.schema_version,
            expected: SCHEMA_VERSION.to_string(),
            path: path.to_path_buf(),
        });
    }
    Ok(metadata)
}
