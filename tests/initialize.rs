//! # Storage Initialization Tests
//!
//! This module tests the attach-or-create startup protocol end to end:
//! 1. A missing database file is bootstrapped with the full schema
//! 2. Reopening preserves the instance identity and all stored rows
//! 3. The schema version gate refuses files from other versions untouched
//! 4. A dirty file is refused by the strict attach and recovered explicitly
//! 5. Disposal leaves a file that the next startup can attach cleanly
//!
//! ## Background
//!
//! Startup never repairs silently: the first attach aborts on any sign of an
//! unclean shutdown, and recovery runs as its own logged step before the
//! attach is retried. The schema version is compared by exact string
//! equality before any operation touches the logical tables.
//!
//! ## Usage
//!
//! ```sh
//! cargo test --test initialize -- --nocapture
//! ```

use std::fs;

use tempfile::tempdir;
use uuid::Uuid;

use relayq::config::DEFAULT_CACHE_SIZE;
use relayq::engine::{EngineError, EngineInstance};
use relayq::schema::{self, StorageMetadata, SCHEMA_VERSION};
use relayq::{DirectoryLayout, QueueStorage, StorageConfig, StorageError};

mod fresh_instance {
    use super::*;

    #[test]
    fn creates_file_layout_and_schema() {
        let dir = tempdir().unwrap();
        let storage = QueueStorage::initialize("orders", StorageConfig::new(dir.path())).unwrap();

        assert_ne!(storage.id(), Uuid::nil());
        assert_eq!(storage.name(), "orders");
        assert!(storage.database_path().is_file());
        assert!(storage.layout().temp_dir().is_dir());
        assert!(storage.layout().system_dir().is_dir());
        assert!(storage.layout().logs_dir().is_dir());

        let tables: Vec<&str> = storage.catalog().tables().collect();
        assert_eq!(tables.len(), 7);
        assert!(storage.global(|g| g.queue_names()).unwrap().is_empty());
    }

    #[test]
    fn root_path_occupied_by_a_file_fails_as_initialization() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("taken");
        fs::write(&root, b"not a directory").unwrap();

        let err = QueueStorage::initialize("orders", StorageConfig::new(&root)).unwrap_err();
        assert!(matches!(err, StorageError::Initialization { .. }));
    }

    #[test]
    fn second_attach_in_the_same_process_is_refused() {
        let dir = tempdir().unwrap();
        let _open = QueueStorage::initialize("orders", StorageConfig::new(dir.path())).unwrap();

        let err = QueueStorage::initialize("orders", StorageConfig::new(dir.path())).unwrap_err();
        match err {
            StorageError::Initialization { source, .. } => {
                assert!(matches!(
                    *source,
                    StorageError::Engine(EngineError::Locked)
                ));
            }
            other => panic!("expected Initialization, got {other:?}"),
        }
    }
}

mod reopen {
    use super::*;

    #[test]
    fn preserves_identity_and_rows() {
        let dir = tempdir().unwrap();
        let id = {
            let storage =
                QueueStorage::initialize("orders", StorageConfig::new(dir.path())).unwrap();
            storage.global(|g| g.create_queue("billing")).unwrap();
            let id = storage.id();
            storage.shutdown().unwrap();
            id
        };

        let reopened = QueueStorage::initialize("orders", StorageConfig::new(dir.path())).unwrap();
        assert_eq!(reopened.id(), id);
        assert!(reopened.global(|g| g.queue_exists("billing")).unwrap());
    }

    #[test]
    fn dropped_without_shutdown_reattaches_strictly() {
        let dir = tempdir().unwrap();
        let path = {
            let storage =
                QueueStorage::initialize("orders", StorageConfig::new(dir.path())).unwrap();
            storage.database_path().to_path_buf()
        };

        // The drop fallback flushed, so the strict attach has nothing to refuse.
        drop(EngineInstance::new(&path, DEFAULT_CACHE_SIZE).attach().unwrap());
    }
}

mod version_gate {
    use super::*;

    fn rewrite_schema_version(dir: &tempfile::TempDir, version: &str) -> Uuid {
        let storage = QueueStorage::initialize("orders", StorageConfig::new(dir.path())).unwrap();
        let id = storage.id();
        let path = storage.database_path().to_path_buf();
        let cache_size = storage.config().cache_size();
        storage.shutdown().unwrap();

        let db = EngineInstance::new(&path, cache_size).attach().unwrap();
        let txn = db.begin_write().unwrap();
        {
            let mut meta = txn.open_table(schema::STORAGE_META).unwrap();
            let doctored = serde_json::to_vec(&StorageMetadata {
                id,
                schema_version: version.to_string(),
            })
            .unwrap();
            meta.insert(schema::METADATA_KEY, doctored.as_slice()).unwrap();
        }
        txn.commit().unwrap();
        drop(db);
        id
    }

    #[test]
    fn version_mismatch_is_reported_with_both_versions() {
        let dir = tempdir().unwrap();
        rewrite_schema_version(&dir, "0.9");

        let err = QueueStorage::initialize("orders", StorageConfig::new(dir.path())).unwrap_err();
        match err {
            StorageError::SchemaVersionMismatch { found, expected, .. } => {
                assert_eq!(found, "0.9");
                assert_eq!(expected, SCHEMA_VERSION);
            }
            other => panic!("expected SchemaVersionMismatch, got {other:?}"),
        }
    }

    #[test]
    fn refused_file_is_left_attachable() {
        let dir = tempdir().unwrap();
        rewrite_schema_version(&dir, "0.9");

        QueueStorage::initialize("orders", StorageConfig::new(dir.path())).unwrap_err();

        // The gate rejected the version without modifying the file.
        let layout = DirectoryLayout::derive(dir.path(), "orders");
        let instance = EngineInstance::new(layout.database_file(), DEFAULT_CACHE_SIZE);
        drop(instance.attach().unwrap());
    }

    #[test]
    fn matching_version_passes_the_gate() {
        let dir = tempdir().unwrap();
        let id = rewrite_schema_version(&dir, SCHEMA_VERSION);

        let storage = QueueStorage::initialize("orders", StorageConfig::new(dir.path())).unwrap();
        assert_eq!(storage.id(), id);
    }

    #[test]
    fn damaged_metadata_row_reports_the_remediation() {
        let dir = tempdir().unwrap();
        let storage = QueueStorage::initialize("orders", StorageConfig::new(dir.path())).unwrap();
        let path = storage.database_path().to_path_buf();
        storage.shutdown().unwrap();

        let db = EngineInstance::new(&path, DEFAULT_CACHE_SIZE).attach().unwrap();
        let txn = db.begin_write().unwrap();
        {
            let mut meta = txn.open_table(schema::STORAGE_META).unwrap();
            meta.remove(schema::METADATA_KEY).unwrap();
        }
        txn.commit().unwrap();
        drop(db);

        let err = QueueStorage::initialize("orders", StorageConfig::new(dir.path())).unwrap_err();
        match err {
            StorageError::Initialization { source, .. } => {
                assert!(matches!(*source, StorageError::Corrupted(_)));
                // The operator guidance survives the wrapping.
                assert!(source.to_string().contains("migrate the database"));
            }
            other => panic!("expected Initialization, got {other:?}"),
        }
    }
}

mod crash_recovery {
    use super::*;

    #[test]
    fn crash_image_is_refused_strictly_then_recovered() {
        let origin = tempdir().unwrap();
        let crashed = tempdir().unwrap();

        let storage = QueueStorage::initialize("orders", StorageConfig::new(origin.path())).unwrap();
        storage.global(|g| g.create_queue("billing")).unwrap();

        // Copying the file while it is attached captures a mid-flight image,
        // the same shape a power cut would leave behind.
        let image = crashed.path().join("orders.relayq");
        fs::copy(storage.database_path(), &image).unwrap();
        storage.shutdown().unwrap();

        let refused = EngineInstance::new(&image, DEFAULT_CACHE_SIZE).attach();
        assert!(matches!(refused, Err(EngineError::DirtyShutdown)));

        let recovered =
            QueueStorage::initialize("orders", StorageConfig::new(crashed.path())).unwrap();
        assert!(recovered.global(|g| g.queue_exists("billing")).unwrap());
    }
}

mod disposal {
    use super::*;

    #[test]
    fn operations_after_shutdown_are_refused() {
        let dir = tempdir().unwrap();
        let storage = QueueStorage::initialize("orders", StorageConfig::new(dir.path())).unwrap();

        storage.shutdown().unwrap();
        assert!(storage.is_disposed());

        let err = storage.global(|g| g.queue_names()).unwrap_err();
        assert!(matches!(err, StorageError::Disposed));
        let err = storage.send(|s| s.pending_count()).unwrap_err();
        assert!(matches!(err, StorageError::Disposed));
    }

    #[test]
    fn shutdown_releases_the_file_for_the_next_attach() {
        let dir = tempdir().unwrap();
        let storage = QueueStorage::initialize("orders", StorageConfig::new(dir.path())).unwrap();
        storage.shutdown().unwrap();
        storage.shutdown().unwrap();

        let reopened = QueueStorage::initialize("orders", StorageConfig::new(dir.path())).unwrap();
        assert!(!reopened.is_disposed());
    }
}
