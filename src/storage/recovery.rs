//! # Attach-and-Recover Protocol
//!
//! Decides how a database file becomes an attached engine handle:
//!
//! 1. Try the strict attach.
//! 2. Missing file: bootstrap a fresh schema, then strict attach.
//! 3. Dirty file: run one transient recovery pass, then strict attach. The
//!    recovery pass attaches permissively with the same settings against the
//!    same file, lets the engine repair what it must, checks integrity and
//!    detaches. Its handle never escapes this module and every failure in it
//!    is swallowed; the retry attach afterwards decides whether
//!    initialization proceeds.
//! 4. Anything else is already fatal and propagates.

use redb::Database;
use tracing::{info, warn};

use crate::engine::{EngineError, EngineInstance};
use crate::error::Result;
use crate::schema::create_schema;

/// Produces an attached database per the protocol above.
pub(crate) fn attach_or_create(instance: &EngineInstance) -> Result<Database> {
    match instance.attach() {
        Ok(db) => Ok(db),
        Err(EngineError::Missing) => {
            info!(path = %instance.path().display(), "no database file, creating schema");
            create_schema(instance)?;
            Ok(instance.attach()?)
        }
        Err(EngineError::DirtyShutdown) => {
            warn!(
                path = %instance.path().display(),
                "unclean shutdown detected, running recovery pass"
            );
            attempt("recovery pass", || recover(instance));
            Ok(instance.attach()?)
        }
        Err(other) => Err(other.into()),
    }
}

/// Transient recovery: attach permissively, verify, detach. No state is
/// shared with the primary instance.
fn recover(instance: &EngineInstance) -> std::result::Result<(), EngineError> {
    let mut db = instance.attach_permissive()?;
    let intact = db.check_integrity().map_err(EngineError::Database)?;
    if intact {
        info!(path = %instance.path().display(), "recovery pass found storage intact");
    } else {
        info!(path = %instance.path().display(), "recovery pass repaired storage structures");
    }
    drop(db);
    Ok(())
}

/// Runs one best-effort recovery step, logging and discarding any failure.
fn attempt(step_name: &str, step: impl FnOnce() -> std::result::Result<(), EngineError>) {
    if let Err(err) = step() {
        warn!(error = %err, "{step_name} failed, continuing");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use crate::schema::{METADATA_KEY, QUEUES, STORAGE_META};
    use std::path::Path;

    fn instance(path: &Path) -> EngineInstance {
        EngineInstance::new(path, 1024 * 1024)
    }

    fn metadata_bytes(db: &Database) -> Vec<u8> {
        let txn = db.begin_read().unwrap();
        let meta = txn.open_table(STORAGE_META).unwrap();
        meta.get(METADATA_KEY).unwrap().unwrap().value().to_vec()
    }

    #[test]
    fn missing_file_bootstraps_schema() {
        let dir = tempfile::tempdir().unwrap();
        let inst = instance(&dir.path().join("db.relayq"));

        let db = attach_or_create(&inst).unwrap();
        let txn = db.begin_read().unwrap();
        txn.open_table(QUEUES).unwrap();
        let meta = txn.open_table(STORAGE_META).unwrap();
        assert!(meta.get(METADATA_KEY).unwrap().is_some());
    }

    #[test]
    fn clean_file_reattaches_without_rewriting_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let inst = instance(&dir.path().join("db.relayq"));

        let db = attach_or_create(&inst).unwrap();
        let first = metadata_bytes(&db);
        drop(db);

        let db = attach_or_create(&inst).unwrap();
        assert_eq!(metadata_bytes(&db), first);
    }

    #[test]
    fn dirty_file_recovers_and_keeps_committed_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.relayq");
        let inst = instance(&path);

        let db = attach_or_create(&inst).unwrap();
        let txn = db.begin_write().unwrap();
        {
            let mut queues = txn.open_table(QUEUES).unwrap();
            queues.insert("orders", b"{}".as_slice()).unwrap();
        }
        txn.commit().unwrap();

        // A copy taken while the file is attached is byte-for-byte what an
        // abrupt process death would have left behind.
        let crashed = path.with_extension("crash");
        std::fs::copy(&path, &crashed).unwrap();
        drop(db);

        let crashed_inst = instance(&crashed);
        assert!(matches!(
            crashed_inst.attach(),
            Err(EngineError::DirtyShutdown)
        ));

        let db = attach_or_create(&crashed_inst).unwrap();
        let txn = db.begin_read().unwrap();
        let queues = txn.open_table(QUEUES).unwrap();
        assert!(queues.get("orders").unwrap().is_some());
    }

    #[test]
    fn locked_file_propagates_the_engine_error() {
        let dir = tempfile::tempdir().unwrap();
        let inst = instance(&dir.path().join("db.relayq"));

        let _held = attach_or_create(&inst).unwrap();
        assert!(matches!(
            attach_or_create(&inst),
            Err(StorageError::Engine(EngineError::Locked))
        ));
    }

    #[test]
    fn failing_recovery_step_is_swallowed() {
        let mut ran = false;
        attempt("doomed step", || {
            ran = true;
            Err(EngineError::Missing)
        });
        assert!(ran);
    }
}
