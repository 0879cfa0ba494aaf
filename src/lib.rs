//! msgsql
//!
//! Schema-driven data-access layer: a message schema (typed fields plus
//! per-field/per-message annotations) is the single source of truth for
//! relational tables. From one message definition it derives the CREATE
//! TABLE DDL, the CRUD statements, a typed table-query DSL compiled to
//! safe SQL for several dialects, and a streaming query pipeline with
//! permission hooks and an in-process change broadcaster.
//!
//! ## Architecture
//! - Schema layer: descriptors, annotations, dynamic messages
//! - SQL layer: dialect conventions, identifier guards, pure builders
//! - Codec layer: field <-> driver values, message <-> wire bytes
//! - Exec layer: CRUD dispatch + streaming query executor
//! - Broadcast: fire-and-forget observers over table and operation

pub mod broadcast;
pub mod codec;
pub mod config;
pub mod exec;
pub mod schema;
pub mod sql;
pub mod types;

mod error;

pub use config::StreamConfig;
pub use error::{MsgSqlError, Result};

// 主要对外 API
pub use broadcast::{BroadcastHandler, BroadcastHub, HandlerId, Notification};
pub use codec::{decode_field, decode_message, encode_field, encode_message, scan_row, MsgFormat};
pub use exec::{
    CrudCode, CrudExecutor, CrudPermission, CrudRequest, CrudResponse, DialectExecutor, Executor,
    QueryPermission, QueryResponse, QueryStreamer, RequestHeader, ResultType, Rows,
};
pub use schema::{
    FieldAnnotation, FieldDescriptor, FieldKind, MapKey, Message, MessageAnnotation,
    MessageDescriptor, MessageRegistry, MsgValue, ScalarKind,
};
pub use sql::{
    build_create_table, build_table_query, check_expression, check_identifier, Dialect,
    TableQueryReq, Where2Op,
};
pub use types::{SqlRow, SqlValue};
