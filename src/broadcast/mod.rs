//! In-process change broadcaster
//!
//! Observers register by table name or by (operation, table) and are
//! notified after every successful CRUD. Notification is best-effort and
//! fire-and-forget: handlers run in registration order and a failing
//! handler never reaches the caller.

use crate::codec::wire::MsgFormat;
use crate::exec::request::CrudCode;
use dashmap::DashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// What happened, delivered to every matching observer.
#[derive(Debug, Clone)]
pub struct Notification {
    pub code: CrudCode,
    pub schema_name: String,
    pub table_name: String,
    pub rows_affected: u64,
    pub msg_format: MsgFormat,
    pub old_msg_bytes: Option<Vec<u8>>,
    pub new_msg_bytes: Option<Vec<u8>>,
}

/// An observer callback.
pub type BroadcastHandler = Arc<dyn Fn(&Notification) + Send + Sync>;

/// Registration handle, used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerId(u64);

/// Observer registries over table name and operation code.
#[derive(Default)]
pub struct BroadcastHub {
    next_id: AtomicU64,
    by_table: DashMap<String, Vec<(HandlerId, BroadcastHandler)>>,
    by_code_table: DashMap<(CrudCode, String), Vec<(HandlerId, BroadcastHandler)>>,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Observe every operation on a table.
    pub fn register_table(&self, table: impl Into<String>, handler: BroadcastHandler) -> HandlerId {
        let id = self.alloc_id();
        self.by_table
            .entry(table.into())
            .or_default()
            .push((id, handler));
        id
    }

    /// Observe one operation code on a table.
    pub fn register_code_table(
        &self,
        code: CrudCode,
        table: impl Into<String>,
        handler: BroadcastHandler,
    ) -> HandlerId {
        let id = self.alloc_id();
        self.by_code_table
            .entry((code, table.into()))
            .or_default()
            .push((id, handler));
        id
    }

    /// Drop a registration by its handle.
    pub fn unregister(&self, id: HandlerId) {
        for mut entry in self.by_table.iter_mut() {
            entry.value_mut().retain(|(h, _)| *h != id);
        }
        for mut entry in self.by_code_table.iter_mut() {
            entry.value_mut().retain(|(h, _)| *h != id);
        }
    }

    /// Run the table handlers, then the code+table handlers, in
    /// registration order. Handler panics are contained.
    pub fn notify(&self, notification: &Notification) {
        let mut handlers: Vec<BroadcastHandler> = Vec::new();
        if let Some(entry) = self.by_table.get(&notification.table_name) {
            handlers.extend(entry.value().iter().map(|(_, h)| h.clone()));
        }
        let code_key = (notification.code, notification.table_name.clone());
        if let Some(entry) = self.by_code_table.get(&code_key) {
            handlers.extend(entry.value().iter().map(|(_, h)| h.clone()));
        }

        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(notification))).is_err() {
                tracing::warn!(
                    table = %notification.table_name,
                    "broadcast handler panicked"
                );
            }
        }
    }

    fn alloc_id(&self) -> HandlerId {
        HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}
