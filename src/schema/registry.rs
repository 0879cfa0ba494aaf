/// Message registry: table name -> message descriptor
///
/// The host registers every message type it serves; the executors
/// resolve prototypes from here. A fresh `Message` is instantiated per
/// scan, so concurrent requests never share mutable state.
use crate::error::{MsgSqlError, Result};
use crate::schema::descriptor::MessageDescriptor;
use crate::schema::message::Message;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Registry of message types keyed by table name.
#[derive(Default)]
pub struct MessageRegistry {
    tables: RwLock<HashMap<String, Arc<MessageDescriptor>>>,
}

impl MessageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a message type under its table name. Re-registering a
    /// name replaces the previous descriptor.
    pub fn register(&self, descriptor: Arc<MessageDescriptor>) {
        self.tables
            .write()
            .insert(descriptor.name.clone(), descriptor);
    }

    /// Resolve a descriptor by table name.
    pub fn get(&self, table_name: &str) -> Result<Arc<MessageDescriptor>> {
        self.tables
            .read()
            .get(table_name)
            .cloned()
            .ok_or_else(|| MsgSqlError::UnknownTable(table_name.to_string()))
    }

    /// Check if a table is registered.
    pub fn contains(&self, table_name: &str) -> bool {
        self.tables.read().contains_key(table_name)
    }

    /// List all registered table names.
    pub fn tables(&self) -> Vec<String> {
        self.tables.read().keys().cloned().collect()
    }

    /// Instantiate a fresh message for a table.
    pub fn new_message(&self, table_name: &str) -> Result<Message> {
        Ok(Message::new(self.get(table_name)?))
    }
}
