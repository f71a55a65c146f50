//! # Scoped Access
//!
//! Entry points that lend out the attached engine under the concurrency
//! gate. A scoped action holds the gate shared for exactly the duration of
//! its closure, so any number of actions run concurrently while teardown,
//! which takes the gate exclusively, waits for all of them and blocks new
//! ones from starting.
//!
//! ## Re-entrancy
//!
//! Actions are allowed to open another scoped action on the same storage
//! from inside their closure. A naive shared acquisition would deadlock
//! there the moment a teardown is queued between the outer and inner call:
//! the teardown waits for the outer holder, the inner acquisition waits
//! behind the teardown, and the outer holder waits for the inner call.
//!
//! Instead each thread keeps an explicit stack of the gates it is currently
//! inside. A top-level call acquires with `read()` and therefore queues
//! behind any waiting teardown; a call whose gate is already on the thread's
//! stack acquires with `read_recursive()`, which cannot be blocked by a
//! queued writer and piggybacks on the protection the outer frame already
//! provides. The disposed refusal follows the same split: a teardown that
//! has begun turns away new top-level entries, while a nested frame keeps
//! the access its outer frame still holds. Teardown ordering is preserved:
//! the gate is released only when the outermost frame ends.

use std::cell::RefCell;
use std::path::Path;
use std::sync::atomic::Ordering;

use parking_lot::RwLock;
use uuid::Uuid;

use crate::config::StorageConfig;
use crate::engine::AttachedEngine;
use crate::error::{Result, StorageError};
use crate::schema::catalog::TableColumns;
use crate::schema::ColumnCatalog;
use crate::storage::actions::{GlobalActions, SendActions};
use crate::storage::QueueStorage;

thread_local! {
    /// Addresses of the gates this thread is currently inside, outermost
    /// first.
    static GATE_STACK: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

/// Everything an action needs, borrowed for the scope of one closure.
#[derive(Clone, Copy)]
pub(crate) struct ActionContext<'a> {
    pub(crate) engine: &'a AttachedEngine,
    pub(crate) catalog: &'a ColumnCatalog,
    pub(crate) id: Uuid,
    pub(crate) path: &'a Path,
    pub(crate) config: &'a StorageConfig,
}

impl<'a> ActionContext<'a> {
    pub(crate) fn columns(&self, table: &str) -> Result<&'a TableColumns> {
        self.catalog.columns(table).ok_or_else(|| {
            StorageError::Corrupted(format!("catalog has no layout for table '{table}'"))
        })
    }
}

impl QueueStorage {
    /// Runs `action` against the administrative view of the storage.
    ///
    /// Shared access: concurrent `global`/`send` scopes run in parallel.
    /// Fails with [`StorageError::Disposed`] after shutdown. The closure's
    /// error propagates unchanged once the gate is released.
    pub fn global<T>(&self, action: impl FnOnce(&GlobalActions<'_>) -> Result<T>) -> Result<T> {
        self.scoped(|cx| action(&GlobalActions::new(cx)))
    }

    /// Runs `action` against the sender's view of the storage. Same gate
    /// semantics as [`global`](Self::global).
    pub fn send<T>(&self, action: impl FnOnce(&SendActions<'_>) -> Result<T>) -> Result<T> {
        self.scoped(|cx| action(&SendActions::new(cx)))
    }

    fn scoped<T>(&self, body: impl FnOnce(ActionContext<'_>) -> Result<T>) -> Result<T> {
        let gate = &self.inner.engine;
        let addr = gate as *const RwLock<Option<AttachedEngine>> as usize;
        let nested = GATE_STACK.with(|stack| stack.borrow().contains(&addr));

        // The disposed fast path turns away top-level entries only. A
        // nested call runs under an outer frame that still holds the
        // engine, and must keep working while a teardown waits for that
        // frame; the slot check below still covers it once the engine is
        // actually gone.
        if !nested && self.inner.disposed.load(Ordering::SeqCst) {
            return Err(StorageError::Disposed);
        }

        let guard = if nested {
            gate.read_recursive()
        } else {
            gate.read()
        };
        let engine = guard.as_ref().ok_or(StorageError::Disposed)?;
        let _frame = GateFrame::enter(addr);

        body(ActionContext {
            engine,
            catalog: &self.inner.catalog,
            id: self.inner.id,
            path: self.inner.layout.database_file(),
            config: &self.inner.config,
        })
    }
}

/// RAII entry on the thread's gate stack.
struct GateFrame {
    addr: usize,
}

impl GateFrame {
    fn enter(addr: usize) -> Self {
        GATE_STACK.with(|stack| stack.borrow_mut().push(addr));
        Self { addr }
    }
}

impl Drop for GateFrame {
    fn drop(&mut self) {
        GATE_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();
            debug_assert_eq!(popped, Some(self.addr));
        });
    }
}
