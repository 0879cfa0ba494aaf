//! Schema model: descriptors, annotations, dynamic messages
//!
//! The message descriptor is the single source of truth for one table;
//! annotations drive what reaches the database and how.

pub mod annotation;
pub mod descriptor;
pub mod message;
pub mod registry;

pub use annotation::{
    effective_db_type, scalar_db_type, table_meta, DbType, FieldAnnotation, MessageAnnotation,
    SerialType, TableMeta,
};
pub use descriptor::{ElemKind, FieldDescriptor, FieldKind, MessageDescriptor, ScalarKind};
pub use message::{
    message_from_json, message_to_json, zero_value, MapKey, Message, MsgValue,
};
pub use registry::MessageRegistry;
