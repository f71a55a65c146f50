//! # Scoped Actions
//!
//! The operations higher layers run inside a scoped access. Two views exist
//! over the same context: [`GlobalActions`] for administrative work (queue
//! management, received-message bookkeeping, transaction recovery records)
//! and [`SendActions`] for the sender side (outgoing registration and
//! delivery bookkeeping).
//!
//! Every operation opens its own engine transaction; writes commit with the
//! configured durability profile. Row values go through the column-id codec
//! in [`crate::schema::record`], so the loaded catalog participates in each
//! operation.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use redb::{ReadableTable, ReadableTableMetadata};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use crate::config::StorageConfig;
use crate::engine::EngineError;
use crate::error::{Result, StorageError};
use crate::schema::{
    self, columns, record, OUTGOING, OUTGOING_HISTORY, QUEUES, RECOVERY, RECV_MSGS, SUBQUEUES,
    TRANSACTIONS,
};
use crate::storage::scope::ActionContext;

/// Subqueue every queue starts with.
pub const DEFAULT_SUBQUEUE: &str = "";

/// State recorded for a transaction that still has recovery information.
const PREPARED_STATE: &str = "prepared";

/// Parameters for registering one outgoing message.
#[derive(Debug, Clone)]
pub struct OutgoingMessage<'a> {
    pub queue: &'a str,
    pub subqueue: &'a str,
    pub destination: &'a str,
    /// Unix seconds after which delivery should no longer be attempted.
    pub deliver_by: Option<u64>,
    pub payload: &'a [u8],
}

/// Administrative view of the storage, handed to [`QueueStorage::global`]
/// closures.
///
/// [`QueueStorage::global`]: crate::QueueStorage::global
pub struct GlobalActions<'a> {
    cx: ActionContext<'a>,
}

impl<'a> GlobalActions<'a> {
    pub(crate) fn new(cx: ActionContext<'a>) -> Self {
        Self { cx }
    }

    /// Stable identifier of the storage instance.
    pub fn id(&self) -> Uuid {
        self.cx.id
    }

    /// Path of the attached database file.
    pub fn database_path(&self) -> &Path {
        self.cx.path
    }

    /// Configuration the storage was initialized with.
    pub fn config(&self) -> &StorageConfig {
        self.cx.config
    }

    /// Creates `queue` together with its default subqueue, in one commit.
    pub fn create_queue(&self, queue: &str) -> Result<()> {
        let queue_columns = self.cx.columns(schema::QUEUES_TABLE)?;
        let subqueue_columns = self.cx.columns(schema::SUBQUEUES_TABLE)?;

        let txn = self.cx.engine.begin_write()?;
        {
            let mut queues = txn.open_table(QUEUES).map_err(EngineError::from)?;
            if queues.get(queue).map_err(EngineError::from)?.is_some() {
                return Err(StorageError::QueueAlreadyExists(queue.to_string()));
            }
            let row = record::encode(
                queue_columns,
                &[
                    (columns::queues::NAME, json!(queue)),
                    (columns::queues::CREATED_AT, json!(unix_now())),
                ],
            )?;
            queues
                .insert(queue, row.as_slice())
                .map_err(EngineError::from)?;

            let mut subqueues = txn.open_table(SUBQUEUES).map_err(EngineError::from)?;
            let row = record::encode(
                subqueue_columns,
                &[
                    (columns::subqueues::QUEUE, json!(queue)),
                    (columns::subqueues::SUBQUEUE, json!(DEFAULT_SUBQUEUE)),
                ],
            )?;
            subqueues
                .insert((queue, DEFAULT_SUBQUEUE), row.as_slice())
                .map_err(EngineError::from)?;
        }
        txn.commit().map_err(EngineError::from)?;

        info!(queue, "created queue");
        Ok(())
    }

    pub fn queue_exists(&self, queue: &str) -> Result<bool> {
        let txn = self.cx.engine.begin_read()?;
        let queues = txn.open_table(QUEUES).map_err(EngineError::from)?;
        Ok(queues.get(queue).map_err(EngineError::from)?.is_some())
    }

    /// All queue names, in key order.
    pub fn queue_names(&self) -> Result<Vec<String>> {
        let txn = self.cx.engine.begin_read()?;
        let queues = txn.open_table(QUEUES).map_err(EngineError::from)?;
        let mut names = Vec::new();
        for entry in queues.iter().map_err(EngineError::from)? {
            let (key, _) = entry.map_err(EngineError::from)?;
            names.push(key.value().to_string());
        }
        Ok(names)
    }

    /// Subqueues of `queue`, in key order.
    pub fn subqueue_names(&self, queue: &str) -> Result<Vec<String>> {
        let txn = self.cx.engine.begin_read()?;
        self.require_queue(&txn, queue)?;

        let subqueues = txn.open_table(SUBQUEUES).map_err(EngineError::from)?;
        let mut names = Vec::new();
        for entry in subqueues.iter().map_err(EngineError::from)? {
            let (key, _) = entry.map_err(EngineError::from)?;
            let (owner, subqueue) = key.value();
            if owner == queue {
                names.push(subqueue.to_string());
            }
        }
        Ok(names)
    }

    /// Records that `message_id` arrived on `queue`.
    pub fn record_received(&self, queue: &str, message_id: Uuid) -> Result<()> {
        let recv_columns = self.cx.columns(schema::RECV_MSGS_TABLE)?;

        let txn = self.cx.engine.begin_write()?;
        {
            let queues = txn.open_table(QUEUES).map_err(EngineError::from)?;
            if queues.get(queue).map_err(EngineError::from)?.is_none() {
                return Err(StorageError::QueueNotFound(queue.to_string()));
            }

            let row = record::encode(
                recv_columns,
                &[
                    (columns::recv_msgs::ID, json!(message_id.to_string())),
                    (columns::recv_msgs::QUEUE, json!(queue)),
                    (columns::recv_msgs::RECEIVED_AT, json!(unix_now())),
                ],
            )?;
            let mut recv = txn.open_table(RECV_MSGS).map_err(EngineError::from)?;
            recv.insert(message_id.as_u128(), row.as_slice())
                .map_err(EngineError::from)?;
        }
        txn.commit().map_err(EngineError::from)?;
        Ok(())
    }

    /// Number of received messages recorded for `queue`.
    pub fn message_count(&self, queue: &str) -> Result<u64> {
        let recv_columns = self.cx.columns(schema::RECV_MSGS_TABLE)?;

        let txn = self.cx.engine.begin_read()?;
        self.require_queue(&txn, queue)?;

        let recv = txn.open_table(RECV_MSGS).map_err(EngineError::from)?;
        let mut count = 0;
        for entry in recv.iter().map_err(EngineError::from)? {
            let (_, value) = entry.map_err(EngineError::from)?;
            let row = record::decode(recv_columns, value.value())?;
            if row.as_str(columns::recv_msgs::QUEUE) == Some(queue) {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Stores the recovery blob for a prepared transaction and marks the
    /// transaction in flight, in one commit.
    pub fn register_recovery_info(&self, tx_id: Uuid, blob: &[u8]) -> Result<()> {
        let recovery_columns = self.cx.columns(schema::RECOVERY_TABLE)?;
        let tx_columns = self.cx.columns(schema::TRANSACTIONS_TABLE)?;

        let txn = self.cx.engine.begin_write()?;
        {
            let row = record::encode(
                recovery_columns,
                &[
                    (columns::recovery::TX_ID, json!(tx_id.to_string())),
                    (columns::recovery::BLOB, serde_json::to_value(blob)?),
                ],
            )?;
            let mut recovery = txn.open_table(RECOVERY).map_err(EngineError::from)?;
            recovery
                .insert(tx_id.as_u128(), row.as_slice())
                .map_err(EngineError::from)?;

            let row = record::encode(
                tx_columns,
                &[
                    (columns::transactions::TX_ID, json!(tx_id.to_string())),
                    (columns::transactions::STATE, json!(PREPARED_STATE)),
                ],
            )?;
            let mut transactions = txn.open_table(TRANSACTIONS).map_err(EngineError::from)?;
            transactions
                .insert(tx_id.as_u128(), row.as_slice())
                .map_err(EngineError::from)?;
        }
        txn.commit().map_err(EngineError::from)?;
        Ok(())
    }

    /// Drops the recovery blob and the in-flight marker of a completed
    /// transaction. Returns whether a blob existed.
    pub fn delete_recovery_info(&self, tx_id: Uuid) -> Result<bool> {
        let txn = self.cx.engine.begin_write()?;
        let existed = {
            let mut recovery = txn.open_table(RECOVERY).map_err(EngineError::from)?;
            let existed = recovery
                .remove(tx_id.as_u128())
                .map_err(EngineError::from)?
                .is_some();

            let mut transactions = txn.open_table(TRANSACTIONS).map_err(EngineError::from)?;
            transactions
                .remove(tx_id.as_u128())
                .map_err(EngineError::from)?;
            existed
        };
        txn.commit().map_err(EngineError::from)?;
        Ok(existed)
    }

    /// All stored recovery blobs with their transaction ids.
    pub fn recovery_info(&self) -> Result<Vec<(Uuid, Vec<u8>)>> {
        let recovery_columns = self.cx.columns(schema::RECOVERY_TABLE)?;

        let txn = self.cx.engine.begin_read()?;
        let recovery = txn.open_table(RECOVERY).map_err(EngineError::from)?;
        let mut blobs = Vec::new();
        for entry in recovery.iter().map_err(EngineError::from)? {
            let (key, value) = entry.map_err(EngineError::from)?;
            let row = record::decode(recovery_columns, value.value())?;
            let blob = row.as_bytes(columns::recovery::BLOB).ok_or_else(|| {
                StorageError::Corrupted(format!(
                    "recovery row {} has no readable blob",
                    key.value()
                ))
            })?;
            blobs.push((Uuid::from_u128(key.value()), blob));
        }
        Ok(blobs)
    }

    /// Ids of transactions that still hold recovery information.
    pub fn in_flight_transactions(&self) -> Result<Vec<Uuid>> {
        let txn = self.cx.engine.begin_read()?;
        let transactions = txn.open_table(TRANSACTIONS).map_err(EngineError::from)?;
        let mut ids = Vec::new();
        for entry in transactions.iter().map_err(EngineError::from)? {
            let (key, _) = entry.map_err(EngineError::from)?;
            ids.push(Uuid::from_u128(key.value()));
        }
        Ok(ids)
    }

    fn require_queue(&self, txn: &redb::ReadTransaction, queue: &str) -> Result<()> {
        let queues = txn.open_table(QUEUES).map_err(EngineError::from)?;
        if queues.get(queue).map_err(EngineError::from)?.is_none() {
            return Err(StorageError::QueueNotFound(queue.to_string()));
        }
        Ok(())
    }
}

/// Sender-side view of the storage, handed to [`QueueStorage::send`]
/// closures.
///
/// [`QueueStorage::send`]: crate::QueueStorage::send
pub struct SendActions<'a> {
    cx: ActionContext<'a>,
}

impl<'a> SendActions<'a> {
    pub(crate) fn new(cx: ActionContext<'a>) -> Self {
        Self { cx }
    }

    pub fn id(&self) -> Uuid {
        self.cx.id
    }

    pub fn database_path(&self) -> &Path {
        self.cx.path
    }

    pub fn config(&self) -> &StorageConfig {
        self.cx.config
    }

    /// Registers an outgoing message and returns its generated id.
    pub fn register_outgoing(&self, message: &OutgoingMessage<'_>) -> Result<Uuid> {
        let out_columns = self.cx.columns(schema::OUTGOING_TABLE)?;
        let id = Uuid::new_v4();

        let deliver_by = match message.deliver_by {
            Some(deadline) => json!(deadline),
            None => Value::Null,
        };
        let row = record::encode(
            out_columns,
            &[
                (columns::outgoing::ID, json!(id.to_string())),
                (columns::outgoing::QUEUE, json!(message.queue)),
                (columns::outgoing::SUBQUEUE, json!(message.subqueue)),
                (columns::outgoing::DESTINATION, json!(message.destination)),
                (columns::outgoing::SENT_AT, json!(unix_now())),
                (columns::outgoing::DELIVER_BY, deliver_by),
                (columns::outgoing::ATTEMPTS, json!(0u64)),
                (columns::outgoing::PAYLOAD, serde_json::to_value(message.payload)?),
            ],
        )?;

        let txn = self.cx.engine.begin_write()?;
        {
            let mut outgoing = txn.open_table(OUTGOING).map_err(EngineError::from)?;
            outgoing
                .insert(id.as_u128(), row.as_slice())
                .map_err(EngineError::from)?;
        }
        txn.commit().map_err(EngineError::from)?;
        Ok(id)
    }

    /// Number of outgoing messages not yet delivered.
    pub fn pending_count(&self) -> Result<u64> {
        let txn = self.cx.engine.begin_read()?;
        let outgoing = txn.open_table(OUTGOING).map_err(EngineError::from)?;
        Ok(outgoing.len().map_err(EngineError::from)?)
    }

    /// Number of delivered messages kept in history.
    pub fn delivered_count(&self) -> Result<u64> {
        let txn = self.cx.engine.begin_read()?;
        let history = txn.open_table(OUTGOING_HISTORY).map_err(EngineError::from)?;
        Ok(history.len().map_err(EngineError::from)?)
    }

    /// Moves a delivered message from `outgoing` to `outgoing_history`.
    /// Returns false if the id is not pending.
    pub fn mark_delivered(&self, id: Uuid) -> Result<bool> {
        let out_columns = self.cx.columns(schema::OUTGOING_TABLE)?;
        let hist_columns = self.cx.columns(schema::OUTGOING_HISTORY_TABLE)?;

        let txn = self.cx.engine.begin_write()?;
        let moved = {
            let mut outgoing = txn.open_table(OUTGOING).map_err(EngineError::from)?;
            let removed = match outgoing.remove(id.as_u128()).map_err(EngineError::from)? {
                None => None,
                Some(guard) => Some(record::decode(out_columns, guard.value())?),
            };

            match removed {
                None => false,
                Some(row) => {
                    let field = |column: &str| row.get(column).cloned().unwrap_or(Value::Null);
                    let history_row = record::encode(
                        hist_columns,
                        &[
                            (columns::outgoing_history::ID, field(columns::outgoing::ID)),
                            (
                                columns::outgoing_history::QUEUE,
                                field(columns::outgoing::QUEUE),
                            ),
                            (
                                columns::outgoing_history::SUBQUEUE,
                                field(columns::outgoing::SUBQUEUE),
                            ),
                            (
                                columns::outgoing_history::DESTINATION,
                                field(columns::outgoing::DESTINATION),
                            ),
                            (
                                columns::outgoing_history::SENT_AT,
                                field(columns::outgoing::SENT_AT),
                            ),
                            (columns::outgoing_history::DELIVERED_AT, json!(unix_now())),
                            (
                                columns::outgoing_history::PAYLOAD,
                                field(columns::outgoing::PAYLOAD),
                            ),
                        ],
                    )?;
                    let mut history =
                        txn.open_table(OUTGOING_HISTORY).map_err(EngineError::from)?;
                    history
                        .insert(id.as_u128(), history_row.as_slice())
                        .map_err(EngineError::from)?;
                    true
                }
            }
        };
        txn.commit().map_err(EngineError::from)?;
        Ok(moved)
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::storage::QueueStorage;

    fn open(dir: &tempfile::TempDir) -> QueueStorage {
        QueueStorage::initialize("orders", StorageConfig::new(dir.path())).unwrap()
    }

    #[test]
    fn created_queues_are_listed_with_default_subqueue() {
        let dir = tempfile::tempdir().unwrap();
        let storage = open(&dir);

        storage
            .global(|g| {
                g.create_queue("billing")?;
                g.create_queue("audit")
            })
            .unwrap();

        let names = storage.global(|g| g.queue_names()).unwrap();
        assert_eq!(names, vec!["audit".to_string(), "billing".to_string()]);

        let subqueues = storage.global(|g| g.subqueue_names("billing")).unwrap();
        assert_eq!(subqueues, vec![DEFAULT_SUBQUEUE.to_string()]);
    }

    #[test]
    fn duplicate_queue_is_rejected_without_side_effects() {
        let dir = tempfile::tempdir().unwrap();
        let storage = open(&dir);

        storage.global(|g| g.create_queue("billing")).unwrap();
        let err = storage.global(|g| g.create_queue("billing")).unwrap_err();
        assert!(matches!(err, StorageError::QueueAlreadyExists(_)));

        assert_eq!(storage.global(|g| g.queue_names()).unwrap().len(), 1);
    }

    #[test]
    fn received_messages_are_counted_per_queue() {
        let dir = tempfile::tempdir().unwrap();
        let storage = open(&dir);

        storage
            .global(|g| {
                g.create_queue("billing")?;
                g.create_queue("audit")?;
                g.record_received("billing", Uuid::new_v4())?;
                g.record_received("billing", Uuid::new_v4())?;
                g.record_received("audit", Uuid::new_v4())
            })
            .unwrap();

        assert_eq!(storage.global(|g| g.message_count("billing")).unwrap(), 2);
        assert_eq!(storage.global(|g| g.message_count("audit")).unwrap(), 1);
    }

    #[test]
    fn receive_for_unknown_queue_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let storage = open(&dir);

        let err = storage
            .global(|g| g.record_received("ghost", Uuid::new_v4()))
            .unwrap_err();
        assert!(matches!(err, StorageError::QueueNotFound(_)));
    }

    #[test]
    fn outgoing_messages_move_to_history_on_delivery() {
        let dir = tempfile::tempdir().unwrap();
        let storage = open(&dir);

        let id = storage
            .send(|s| {
                s.register_outgoing(&OutgoingMessage {
                    queue: "billing",
                    subqueue: DEFAULT_SUBQUEUE,
                    destination: "tcp://peer:2200",
                    deliver_by: Some(unix_now() + 60),
                    payload: b"invoice-7",
                })
            })
            .unwrap();

        assert_eq!(storage.send(|s| s.pending_count()).unwrap(), 1);
        assert_eq!(storage.send(|s| s.delivered_count()).unwrap(), 0);

        assert!(storage.send(|s| s.mark_delivered(id)).unwrap());
        assert_eq!(storage.send(|s| s.pending_count()).unwrap(), 0);
        assert_eq!(storage.send(|s| s.delivered_count()).unwrap(), 1);

        // A second delivery of the same id is a no-op.
        assert!(!storage.send(|s| s.mark_delivered(id)).unwrap());
    }

    #[test]
    fn history_rows_carry_the_delivery_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let storage = open(&dir);
        let before = unix_now();

        let id = storage
            .send(|s| {
                s.register_outgoing(&OutgoingMessage {
                    queue: "billing",
                    subqueue: DEFAULT_SUBQUEUE,
                    destination: "tcp://peer:2200",
                    deliver_by: None,
                    payload: b"invoice-7",
                })
            })
            .unwrap();
        assert!(storage.send(|s| s.mark_delivered(id)).unwrap());

        let guard = storage.inner.engine.read();
        let engine = guard.as_ref().unwrap();
        let txn = engine.begin_read().unwrap();
        let history = txn.open_table(OUTGOING_HISTORY).unwrap();
        let row = history.get(id.as_u128()).unwrap().unwrap();

        let hist_columns = storage
            .inner
            .catalog
            .columns(schema::OUTGOING_HISTORY_TABLE)
            .unwrap();
        let decoded = record::decode(hist_columns, row.value()).unwrap();

        assert_eq!(decoded.len(), 7);
        assert_eq!(
            decoded.as_str(columns::outgoing_history::DESTINATION),
            Some("tcp://peer:2200")
        );
        let sent = decoded.as_u64(columns::outgoing_history::SENT_AT);
        let delivered = decoded.as_u64(columns::outgoing_history::DELIVERED_AT);
        assert!(sent.is_some_and(|t| t >= before));
        assert!(delivered.is_some_and(|t| t >= before));
    }

    #[test]
    fn recovery_info_round_trips_and_clears() {
        let dir = tempfile::tempdir().unwrap();
        let storage = open(&dir);
        let tx_id = Uuid::new_v4();

        storage
            .global(|g| g.register_recovery_info(tx_id, b"enlistment"))
            .unwrap();

        let blobs = storage.global(|g| g.recovery_info()).unwrap();
        assert_eq!(blobs, vec![(tx_id, b"enlistment".to_vec())]);
        assert_eq!(
            storage.global(|g| g.in_flight_transactions()).unwrap(),
            vec![tx_id]
        );

        assert!(storage.global(|g| g.delete_recovery_info(tx_id)).unwrap());
        assert!(storage.global(|g| g.recovery_info()).unwrap().is_empty());
        assert!(storage
            .global(|g| g.in_flight_transactions())
            .unwrap()
            .is_empty());
        assert!(!storage.global(|g| g.delete_recovery_info(tx_id)).unwrap());
    }

    #[test]
    fn action_contexts_expose_instance_identity() {
        let dir = tempfile::tempdir().unwrap();
        let storage = open(&dir);
        let id = storage.id();

        storage
            .global(|g| {
                assert_eq!(g.id(), id);
                assert!(g.database_path().ends_with("orders.relayq"));
                Ok(())
            })
            .unwrap();
        storage
            .send(|s| {
                assert_eq!(s.id(), id);
                assert_eq!(s.config().cache_size(), storage.config().cache_size());
                Ok(())
            })
            .unwrap();
    }
}
