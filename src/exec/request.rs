/// Request and response envelopes plus the host permission contracts
use crate::codec::wire::MsgFormat;
use crate::error::{MsgSqlError, Result};
use crate::exec::executor::Executor;
use crate::schema::descriptor::MessageDescriptor;
use crate::schema::message::Message;
use crate::types::SqlValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// CRUD operation code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CrudCode {
    Insert = 1,
    Update = 2,
    PartialUpdate = 3,
    Delete = 4,
    SelectOne = 5,
}

impl CrudCode {
    pub fn from_i32(v: i32) -> Result<Self> {
        match v {
            1 => Ok(CrudCode::Insert),
            2 => Ok(CrudCode::Update),
            3 => Ok(CrudCode::PartialUpdate),
            4 => Ok(CrudCode::Delete),
            5 => Ok(CrudCode::SelectOne),
            _ => Err(MsgSqlError::Decode(format!("unknown crud code {v}"))),
        }
    }
}

/// What the caller wants back from a CRUD.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultType {
    /// Affected-row count only
    Affected = 1,
    /// The row after the statement, via RETURNING
    New = 2,
    /// Both the prior and the new row, via the OLD/NEW capture
    OldAndNew = 3,
}

impl ResultType {
    pub fn from_i32(v: i32) -> Result<Self> {
        match v {
            1 => Ok(ResultType::Affected),
            2 => Ok(ResultType::New),
            3 => Ok(ResultType::OldAndNew),
            _ => Err(MsgSqlError::Decode(format!("unknown result type {v}"))),
        }
    }
}

/// Transport headers handed through to the permission hooks.
#[derive(Debug, Clone, Default)]
pub struct RequestHeader {
    pub entries: BTreeMap<String, String>,
}

impl RequestHeader {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }
}

/// The wire-facing CRUD request.
#[derive(Debug, Clone, Default)]
pub struct CrudRequest {
    pub code: i32,
    pub result_type: i32,
    pub schema_name: String,
    pub table_name: String,
    /// The serialized request message
    pub msg_bytes: Vec<u8>,
    pub msg_format: MsgFormat,
    /// Cutoff downgrading unset higher-numbered fields to their defaults
    pub msg_last_field_no: u32,
    pub partial_update_fields: Vec<String>,
    pub select_one_key_fields: Vec<String>,
    pub select_result_fields: Vec<String>,
}

/// The CRUD response record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CrudResponse {
    pub rows_affected: u64,
    pub old_msg_bytes: Option<Vec<u8>>,
    pub new_msg_bytes: Option<Vec<u8>>,
    pub msg_format: MsgFormat,
}

/// One streamed batch of encoded rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResponse {
    /// Monotonic per stream, starting at 0
    pub response_no: i64,
    pub msg_format: MsgFormat,
    /// One encoded message per row
    pub msg_bytes: Vec<Vec<u8>>,
    /// Non-empty only on the terminal error envelope
    pub err_info: String,
    /// Set on exactly the last envelope of the stream
    pub response_end: bool,
}

/// Per-table permission hook for CRUD requests, called once per request.
pub trait CrudPermission: Send + Sync {
    fn check(
        &self,
        header: &RequestHeader,
        schema_name: &str,
        code: CrudCode,
        executor: &dyn Executor,
        msg: &Message,
    ) -> Result<()>;
}

/// Per-table permission hook for table queries, called once per request.
/// Returns an optional WHERE fragment (in the dialect's placeholder
/// style, numbered from 1) plus its arguments.
pub trait QueryPermission: Send + Sync {
    fn filter(
        &self,
        header: &RequestHeader,
        schema_name: &str,
        table_name: &str,
        executor: &dyn Executor,
        prototype: &Arc<MessageDescriptor>,
    ) -> Result<Option<(String, Vec<SqlValue>)>>;
}
