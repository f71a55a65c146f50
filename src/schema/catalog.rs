//! # Column Catalog
//!
//! In-memory cache of the persisted column layouts. Loaded once during
//! initialization, after the schema version gate, and immutable afterwards,
//! so scoped actions on any thread can resolve column ids without locking.
//!
//! Loading doubles as a schema presence check: every logical table is opened
//! read-only, and every layout row is fetched and decoded. A database that
//! passes the version gate but fails here has a disk format that disagrees
//! with its declared version, which is reported as corruption rather than
//! silently tolerated.

use hashbrown::HashMap;
use redb::ReadTransaction;

use crate::engine::{AttachedEngine, EngineError};
use crate::error::{Result, StorageError};
use crate::schema::{
    layout_key, TableLayout, LOGICAL_TABLES, OUTGOING, OUTGOING_HISTORY, QUEUES, RECOVERY,
    RECV_MSGS, STORAGE_META, SUBQUEUES, TRANSACTIONS,
};

/// Column-name to column-id mapping of one logical table.
#[derive(Debug, Clone)]
pub struct TableColumns {
    table: String,
    by_name: HashMap<String, u16>,
    ordered: Vec<(String, u16)>,
}

impl TableColumns {
    pub fn from_layout(layout: &TableLayout) -> Self {
        let by_name = layout
            .columns
            .iter()
            .map(|(name, id)| (name.clone(), *id))
            .collect();
        Self {
            table: layout.table.clone(),
            by_name,
            ordered: layout.columns.clone(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn id(&self, column: &str) -> Option<u16> {
        self.by_name.get(column).copied()
    }

    pub fn name(&self, id: u16) -> Option<&str> {
        self.ordered
            .iter()
            .find(|(_, candidate)| *candidate == id)
            .map(|(name, _)| name.as_str())
    }

    /// Column names in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.ordered.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }
}

/// All seven table layouts, keyed by table name.
#[derive(Debug, Clone)]
pub struct ColumnCatalog {
    tables: HashMap<String, TableColumns>,
}

impl ColumnCatalog {
    /// Loads the catalog from an attached database.
    ///
    /// A missing logical table surfaces as an engine fault; a missing or
    /// undecodable layout row surfaces as [`StorageError::Corrupted`].
    pub fn load(engine: &AttachedEngine) -> Result<Self> {
        let txn = engine.begin_read()?;

        open_check(&txn, QUEUES)?;
        open_check(&txn, SUBQUEUES)?;
        open_check(&txn, OUTGOING)?;
        open_check(&txn, OUTGOING_HISTORY)?;
        open_check(&txn, RECOVERY)?;
        open_check(&txn, TRANSACTIONS)?;
        open_check(&txn, RECV_MSGS)?;

        let meta = txn.open_table(STORAGE_META).map_err(EngineError::from)?;
        let mut tables = HashMap::with_capacity(LOGICAL_TABLES.len());
        for table in LOGICAL_TABLES {
            let key = layout_key(table);
            let row = meta
                .get(key.as_str())
                .map_err(EngineError::from)?
                .ok_or_else(|| {
                    StorageError::Corrupted(format!("missing layout row for table '{table}'"))
                })?;
            let layout: TableLayout = serde_json::from_slice(row.value()).map_err(|err| {
                StorageError::Corrupted(format!(
                    "undecodable layout row for table '{table}': {err}"
                ))
            })?;
            tables.insert(table.to_string(), TableColumns::from_layout(&layout));
        }

        Ok(Self { tables })
    }

    pub fn columns(&self, table: &str) -> Option<&TableColumns> {
        self.tables.get(table)
    }

    pub fn column_id(&self, table: &str, column: &str) -> Option<u16> {
        self.tables.get(table).and_then(|t| t.id(column))
    }

    /// Table names in catalog order.
    pub fn tables(&self) -> impl Iterator<Item = &str> + '_ {
        LOGICAL_TABLES
            .iter()
            .copied()
            .filter(|table| self.tables.contains_key(*table))
    }
}

fn open_check<K, V>(txn: &ReadTransaction, def: redb::TableDefinition<K, V>) -> Result<()>
where
    K: redb::Key + 'static,
    V: redb::Value + 'static,
{
    txn.open_table(def).map_err(EngineError::from)?;
    Ok(())
}
