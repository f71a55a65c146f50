//! # Queue Schema
//!
//! Declares the on-disk schema of a queue database: the seven logical
//! tables, their fixed column layouts, and the `storage_meta` system table
//! that describes the instance itself.
//!
//! ## Logical Tables
//!
//! | table              | key              | columns                         |
//! |--------------------|------------------|---------------------------------|
//! | `queues`           | queue name       | name, created_at                |
//! | `subqueues`        | (queue, subqueue)| queue, subqueue                 |
//! | `outgoing`         | message id       | id, queue, subqueue, destination, sent_at, deliver_by, attempts, payload |
//! | `outgoing_history` | message id       | id, queue, subqueue, destination, sent_at, delivered_at, payload |
//! | `recovery`         | transaction id   | tx_id, blob                     |
//! | `transactions`     | transaction id   | tx_id, state                    |
//! | `recv_msgs`        | message id       | id, queue, received_at          |
//!
//! ## The `storage_meta` Table
//!
//! One row under [`METADATA_KEY`] holds the [`StorageMetadata`] record: the
//! instance identifier and the schema version string, written once when the
//! schema is created and never mutated afterwards. One row per logical table
//! under `layout:<table>` holds that table's [`TableLayout`], the persisted
//! column-name to column-id mapping.
//!
//! Column ids are assigned ordinally at schema creation, starting at 1, and
//! become part of the on-disk format: row values are encoded keyed by column
//! id (see [`record`]), so nothing can be read back without the layout rows.

pub mod bootstrap;
pub mod catalog;
pub mod record;

pub use bootstrap::create_schema;
pub use catalog::{ColumnCatalog, TableColumns};

use redb::TableDefinition;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Version string of the on-disk schema. Compared with exact string equality
/// against the value persisted in the metadata row.
pub const SCHEMA_VERSION: &str = "1.4";

pub const QUEUES_TABLE: &str = "queues";
pub const SUBQUEUES_TABLE: &str = "subqueues";
pub const OUTGOING_TABLE: &str = "outgoing";
pub const OUTGOING_HISTORY_TABLE: &str = "outgoing_history";
pub const RECOVERY_TABLE: &str = "recovery";
pub const TRANSACTIONS_TABLE: &str = "transactions";
pub const RECV_MSGS_TABLE: &str = "recv_msgs";

/// System table holding the metadata row and the layout rows.
pub const STORAGE_META_TABLE: &str = "storage_meta";

/// Key of the metadata row inside `storage_meta`.
pub const METADATA_KEY: &str = "metadata";

/// Key prefix of the layout rows inside `storage_meta`.
pub const LAYOUT_KEY_PREFIX: &str = "layout:";

pub const QUEUES: TableDefinition<&str, &[u8]> = TableDefinition::new(QUEUES_TABLE);
pub const SUBQUEUES: TableDefinition<(&str, &str), &[u8]> =
    TableDefinition::new(SUBQUEUES_TABLE);
pub const OUTGOING: TableDefinition<u128, &[u8]> = TableDefinition::new(OUTGOING_TABLE);
pub const OUTGOING_HISTORY: TableDefinition<u128, &[u8]> =
    TableDefinition::new(OUTGOING_HISTORY_TABLE);
pub const RECOVERY: TableDefinition<u128, &[u8]> = TableDefinition::new(RECOVERY_TABLE);
pub const TRANSACTIONS: TableDefinition<u128, &[u8]> = TableDefinition::new(TRANSACTIONS_TABLE);
pub const RECV_MSGS: TableDefinition<u128, &[u8]> = TableDefinition::new(RECV_MSGS_TABLE);
pub const STORAGE_META: TableDefinition<&str, &[u8]> = TableDefinition::new(STORAGE_META_TABLE);

/// The seven logical tables in catalog order.
pub const LOGICAL_TABLES: [&str; 7] = [
    QUEUES_TABLE,
    SUBQUEUES_TABLE,
    OUTGOING_TABLE,
    OUTGOING_HISTORY_TABLE,
    RECOVERY_TABLE,
    TRANSACTIONS_TABLE,
    RECV_MSGS_TABLE,
];

/// Column-name constants for the logical tables.
pub mod columns {
    pub mod queues {
        pub const NAME: &str = "name";
        pub const CREATED_AT: &str = "created_at";
    }
    pub mod subqueues {
        pub const QUEUE: &str = "queue";
        pub const SUBQUEUE: &str = "subqueue";
    }
    pub mod outgoing {
        pub const ID: &str = "id";
        pub const QUEUE: &str = "queue";
        pub const SUBQUEUE: &str = "subqueue";
        pub const DESTINATION: &str = "destination";
        pub const SENT_AT: &str = "sent_at";
        pub const DELIVER_BY: &str = "deliver_by";
        pub const ATTEMPTS: &str = "attempts";
        pub const PAYLOAD: &str = "payload";
    }
    pub mod outgoing_history {
        pub const ID: &str = "id";
        pub const QUEUE: &str = "queue";
        pub const SUBQUEUE: &str = "subqueue";
        pub const DESTINATION: &str = "destination";
        pub const SENT_AT: &str = "sent_at";
        pub const DELIVERED_AT: &str = "delivered_at";
        pub const PAYLOAD: &str = "payload";
    }
    pub mod recovery {
        pub const TX_ID: &str = "tx_id";
        pub const BLOB: &str = "blob";
    }
    pub mod transactions {
        pub const TX_ID: &str = "tx_id";
        pub const STATE: &str = "state";
    }
    pub mod recv_msgs {
        pub const ID: &str = "id";
        pub const QUEUE: &str = "queue";
        pub const RECEIVED_AT: &str = "received_at";
    }
}

/// Declared column order of every logical table. Schema creation assigns
/// column ids from this ordering; changing it is a schema version change.
pub const TABLE_LAYOUTS: [(&str, &[&str]); 7] = [
    (
        QUEUES_TABLE,
        &[columns::queues::NAME, columns::queues::CREATED_AT],
    ),
    (
        SUBQUEUES_TABLE,
        &[columns::subqueues::QUEUE, columns::subqueues::SUBQUEUE],
    ),
    (
        OUTGOING_TABLE,
        &[
            columns::outgoing::ID,
            columns::outgoing::QUEUE,
            columns::outgoing::SUBQUEUE,
            columns::outgoing::DESTINATION,
            columns::outgoing::SENT_AT,
            columns::outgoing::DELIVER_BY,
            columns::outgoing::ATTEMPTS,
            columns::outgoing::PAYLOAD,
        ],
    ),
    (
        OUTGOING_HISTORY_TABLE,
        &[
            columns::outgoing_history::ID,
            columns::outgoing_history::QUEUE,
            columns::outgoing_history::SUBQUEUE,
            columns::outgoing_history::DESTINATION,
            columns::outgoing_history::SENT_AT,
            columns::outgoing_history::DELIVERED_AT,
            columns::outgoing_history::PAYLOAD,
        ],
    ),
    (
        RECOVERY_TABLE,
        &[columns::recovery::TX_ID, columns::recovery::BLOB],
    ),
    (
        TRANSACTIONS_TABLE,
        &[columns::transactions::TX_ID, columns::transactions::STATE],
    ),
    (
        RECV_MSGS_TABLE,
        &[
            columns::recv_msgs::ID,
            columns::recv_msgs::QUEUE,
            columns::recv_msgs::RECEIVED_AT,
        ],
    ),
];

/// Key of a table's layout row inside `storage_meta`.
pub fn layout_key(table: &str) -> String {
    format!("{LAYOUT_KEY_PREFIX}{table}")
}

/// The single metadata row: written at schema creation, read at every
/// startup, never mutated by this layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageMetadata {
    /// Stable identifier of the storage instance.
    pub id: Uuid,
    /// Schema version the file was created with.
    pub schema_version: String,
}

/// Persisted column layout of one logical table, stored under
/// `layout:<table>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableLayout {
    pub table: String,
    /// Column name and assigned id, in declaration order.
    pub columns: Vec<(String, u16)>,
}
