//! # Schema Bootstrap
//!
//! Creates a brand-new queue database: the database file, the seven logical
//! tables, one layout row per table, and the metadata row carrying a fresh
//! instance id and the current schema version. Everything lands in a single
//! fully-durable transaction, and the file is detached before the caller
//! re-attaches it through the normal strict path.

use redb::Durability;
use tracing::info;
use uuid::Uuid;

use crate::engine::{EngineError, EngineInstance};
use crate::error::Result;
use crate::schema::{
    layout_key, StorageMetadata, TableLayout, METADATA_KEY, OUTGOING, OUTGOING_HISTORY, QUEUES,
    RECOVERY, RECV_MSGS, SCHEMA_VERSION, STORAGE_META, SUBQUEUES, TABLE_LAYOUTS, TRANSACTIONS,
};

/// Creates the database file and writes the full schema into it.
///
/// Column ids are assigned from the declared column order, starting at 1.
/// Returns the generated instance id; the file is left cleanly detached.
pub fn create_schema(instance: &EngineInstance) -> Result<Uuid> {
    let db = instance.create()?;

    let mut txn = db.begin_write().map_err(EngineError::from)?;
    txn.set_durability(Durability::Immediate);

    txn.open_table(QUEUES).map_err(EngineError::from)?;
    txn.open_table(SUBQUEUES).map_err(EngineError::from)?;
    txn.open_table(OUTGOING).map_err(EngineError::from)?;
    txn.open_table(OUTGOING_HISTORY).map_err(EngineError::from)?;
    txn.open_table(RECOVERY).map_err(EngineError::from)?;
    txn.open_table(TRANSACTIONS).map_err(EngineError::from)?;
    txn.open_table(RECV_MSGS).map_err(EngineError::from)?;

    let id = Uuid::new_v4();
    {
        let mut meta = txn.open_table(STORAGE_META).map_err(EngineError::from)?;

        for (table, columns) in TABLE_LAYOUTS {
            let layout = TableLayout {
                table: table.to_string(),
                columns: columns
                    .iter()
                    .enumerate()
                    .map(|(index, name)| (name.to_string(), (index + 1) as u16))
                    .collect(),
            };
            let key = layout_key(table);
            let bytes = serde_json::to_vec(&layout)?;
            meta.insert(key.as_str(), bytes.as_slice())
                .map_err(EngineError::from)?;
        }

        let metadata = StorageMetadata {
            id,
            schema_version: SCHEMA_VERSION.to_string(),
        };
        let bytes = serde_json::to_vec(&metadata)?;
        meta.insert(METADATA_KEY, bytes.as_slice())
            .map_err(EngineError::from)?;
    }

    txn.commit().map_err(EngineError::from)?;
    drop(db);

    info!(
        path = %instance.path().display(),
        id = %id,
        schema_version = SCHEMA_VERSION,
        "created queue storage schema"
    );
    Ok(id)
}
