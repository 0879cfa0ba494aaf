/// CRUD request executor
///
/// Dispatches `code x result_type` over the statement builders, executes
/// against the supplied executor, scans RETURNING rows back into fresh
/// messages, and notifies the broadcast hub after success. Broadcasts
/// are fire-and-forget: observers never block or fail the caller.
use crate::broadcast::{BroadcastHub, Notification};
use crate::codec::decode::{decode_field, scan_row};
use crate::codec::wire::{decode_message, encode_message};
use crate::error::{MsgSqlError, Result};
use crate::exec::executor::Executor;
use crate::exec::request::{
    CrudCode, CrudPermission, CrudRequest, CrudResponse, RequestHeader, ResultType,
};
use crate::schema::annotation::table_meta;
use crate::schema::descriptor::MessageDescriptor;
use crate::schema::message::Message;
use crate::schema::registry::MessageRegistry;
use crate::sql::crud::{
    build_delete, build_insert, build_partial_update, build_select_one, build_update,
    build_update_old_new,
};
use crate::types::{SqlRow, SqlValue};
use std::sync::Arc;

/// Executes CRUD requests against host-supplied executors.
pub struct CrudExecutor {
    registry: Arc<MessageRegistry>,
    hub: Arc<BroadcastHub>,
}

impl CrudExecutor {
    pub fn new(registry: Arc<MessageRegistry>, hub: Arc<BroadcastHub>) -> Self {
        Self { registry, hub }
    }

    /// Run one CRUD request: resolve the prototype, decode the request
    /// message, run the permission hook, dispatch the builder, execute,
    /// and scan any RETURNING rows.
    pub fn execute(
        &self,
        executor: &dyn Executor,
        header: &RequestHeader,
        req: &CrudRequest,
        permission: Option<&dyn CrudPermission>,
    ) -> Result<CrudResponse> {
        let code = CrudCode::from_i32(req.code)?;
        let result_type = ResultType::from_i32(req.result_type)?;
        let desc = self.registry.get(&req.table_name)?;
        let msg = decode_message(&desc, &req.msg_bytes, req.msg_format)?;

        if let Some(permission) = permission {
            permission
                .check(header, &req.schema_name, code, executor, &msg)
                .map_err(|err| match err {
                    MsgSqlError::Permission(_) => err,
                    other => MsgSqlError::Permission(other.to_string()),
                })?;
        }

        tracing::debug!(table = %req.table_name, ?code, ?result_type, "crud dispatch");

        let dialect = executor.dialect();
        let schema = req.schema_name.as_str();
        let mut response = match (code, result_type) {
            (CrudCode::Insert, ResultType::Affected) => {
                let (sql, args) = build_insert(&msg, schema, dialect, false, req.msg_last_field_no)?;
                affected(executor.exec(&sql, &args)?)
            }
            (CrudCode::Insert, ResultType::New) => {
                let (sql, args) = build_insert(&msg, schema, dialect, true, req.msg_last_field_no)?;
                self.returning_one(executor, &desc, req, &sql, &args)?
            }
            (CrudCode::Update, ResultType::Affected) => {
                let (sql, args) = build_update(&msg, schema, dialect, false, req.msg_last_field_no)?;
                affected(executor.exec(&sql, &args)?)
            }
            (CrudCode::Update, ResultType::New) => {
                let (sql, args) = build_update(&msg, schema, dialect, true, req.msg_last_field_no)?;
                self.returning_one(executor, &desc, req, &sql, &args)?
            }
            (CrudCode::Update, ResultType::OldAndNew) => {
                let (sql, args) =
                    build_update_old_new(&msg, schema, dialect, req.msg_last_field_no, None)?;
                self.returning_old_new(executor, &desc, req, &sql, &args)?
            }
            (CrudCode::PartialUpdate, ResultType::Affected) => {
                let (sql, args) =
                    build_partial_update(&msg, schema, dialect, false, &req.partial_update_fields)?;
                affected(executor.exec(&sql, &args)?)
            }
            (CrudCode::PartialUpdate, ResultType::New) => {
                let (sql, args) =
                    build_partial_update(&msg, schema, dialect, true, &req.partial_update_fields)?;
                self.returning_one(executor, &desc, req, &sql, &args)?
            }
            (CrudCode::PartialUpdate, ResultType::OldAndNew) => {
                let (sql, args) = build_update_old_new(
                    &msg,
                    schema,
                    dialect,
                    req.msg_last_field_no,
                    Some(&req.partial_update_fields),
                )?;
                self.returning_old_new(executor, &desc, req, &sql, &args)?
            }
            (CrudCode::Delete, ResultType::Affected) => {
                let (sql, args) = build_delete(&msg, schema, dialect, false)?;
                affected(executor.exec(&sql, &args)?)
            }
            (CrudCode::Delete, ResultType::New) => {
                let (sql, args) = build_delete(&msg, schema, dialect, true)?;
                self.returning_one(executor, &desc, req, &sql, &args)?
            }
            (CrudCode::SelectOne, ResultType::Affected) => {
                let (sql, args) = build_select_one(
                    &msg,
                    schema,
                    dialect,
                    &req.select_one_key_fields,
                    &req.select_result_fields,
                )?;
                self.returning_one(executor, &desc, req, &sql, &args)?
            }
            (code, result_type) => {
                return Err(MsgSqlError::UnsupportedOperator(format!(
                    "{code:?} does not support result type {result_type:?}"
                )))
            }
        };
        response.msg_format = req.msg_format;

        if code != CrudCode::SelectOne {
            let hub = self.hub.clone();
            let notification = Notification {
                code,
                schema_name: req.schema_name.clone(),
                table_name: req.table_name.clone(),
                rows_affected: response.rows_affected,
                msg_format: response.msg_format,
                old_msg_bytes: response.old_msg_bytes.clone(),
                new_msg_bytes: response.new_msg_bytes.clone(),
            };
            std::thread::spawn(move || hub.notify(&notification));
        }
        Ok(response)
    }

    fn returning_one(
        &self,
        executor: &dyn Executor,
        desc: &Arc<MessageDescriptor>,
        req: &CrudRequest,
        sql: &str,
        args: &[SqlValue],
    ) -> Result<CrudResponse> {
        let (columns, row) = executor.query_row(sql, args)?.ok_or(MsgSqlError::NoRows)?;
        let mut result = Message::new(desc.clone());
        scan_row(&mut result, &columns, &row)?;
        Ok(CrudResponse {
            rows_affected: 1,
            new_msg_bytes: Some(encode_message(&result, req.msg_format)?),
            ..Default::default()
        })
    }

    fn returning_old_new(
        &self,
        executor: &dyn Executor,
        desc: &Arc<MessageDescriptor>,
        req: &CrudRequest,
        sql: &str,
        args: &[SqlValue],
    ) -> Result<CrudResponse> {
        let (_, row) = executor.query_row(sql, args)?.ok_or(MsgSqlError::NoRows)?;
        let (old, new) = scan_old_new(desc, &row)?;
        Ok(CrudResponse {
            rows_affected: 1,
            old_msg_bytes: Some(encode_message(&old, req.msg_format)?),
            new_msg_bytes: Some(encode_message(&new, req.msg_format)?),
            ..Default::default()
        })
    }
}

fn affected(rows: u64) -> CrudResponse {
    CrudResponse {
        rows_affected: rows,
        ..Default::default()
    }
}

/// Split a `RETURNING old.*, new.*` row into the two messages by column
/// position, at the table's select-all column count.
fn scan_old_new(desc: &Arc<MessageDescriptor>, row: &SqlRow) -> Result<(Message, Message)> {
    let meta = table_meta(desc);
    let width = meta.column_count();
    if row.len() != width * 2 {
        return Err(MsgSqlError::Decode(format!(
            "old/new capture returned {} columns, expected {}",
            row.len(),
            width * 2
        )));
    }

    let mut old = Message::new(desc.clone());
    let mut new = Message::new(desc.clone());
    for (pos, &field_index) in meta.db_fields.iter().enumerate() {
        let field = &desc.fields[field_index];
        if let Some(value) = decode_field(field, &row[pos])? {
            old.set(field.tag, value);
        }
        if let Some(value) = decode_field(field, &row[width + pos])? {
            new.set(field.tag, value);
        }
    }
    Ok((old, new))
}
