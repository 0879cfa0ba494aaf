/// Streaming table-query executor
///
/// Compiles the request, runs it, scans each row into a fresh message,
/// and batches the encoded rows into response envelopes flushed by byte
/// size or row count. Envelopes carry a monotonic `response_no`;
/// exactly one envelope per stream has `response_end` set. Any
/// non-transport error becomes a single terminal error envelope instead
/// of surfacing to the caller.
use crate::config::StreamConfig;
use crate::codec::decode::scan_row;
use crate::codec::wire::encode_message;
use crate::error::Result;
use crate::exec::executor::Executor;
use crate::exec::request::{QueryPermission, QueryResponse, RequestHeader};
use crate::schema::message::Message;
use crate::schema::registry::MessageRegistry;
use crate::sql::table_query::{build_table_query, TableQueryReq};
use std::sync::Arc;

/// Callback receiving each response envelope; may block for
/// backpressure. An error from `send` aborts the stream and surfaces to
/// the caller.
pub type SendFn<'a> = dyn FnMut(QueryResponse) -> Result<()> + 'a;

/// Runs table queries and streams the results.
pub struct QueryStreamer {
    registry: Arc<MessageRegistry>,
    config: StreamConfig,
}

impl QueryStreamer {
    pub fn new(registry: Arc<MessageRegistry>) -> Self {
        Self {
            registry,
            config: StreamConfig::default(),
        }
    }

    pub fn with_config(registry: Arc<MessageRegistry>, config: StreamConfig) -> Self {
        Self { registry, config }
    }

    /// Run one table query. Query and codec errors terminate the stream
    /// with an error envelope and return `Ok`; only `send` failures
    /// propagate.
    pub fn run(
        &self,
        executor: &dyn Executor,
        header: &RequestHeader,
        req: &TableQueryReq,
        permission: Option<&dyn QueryPermission>,
        send: &mut SendFn<'_>,
    ) -> Result<()> {
        let mut response_no: i64 = 0;
        match self.run_inner(executor, header, req, permission, send, &mut response_no) {
            Ok(()) => Ok(()),
            Err(err) => {
                tracing::debug!(table = %req.table_name, %err, "query stream aborted");
                send(QueryResponse {
                    response_no,
                    msg_format: req.msg_format,
                    msg_bytes: Vec::new(),
                    err_info: err.to_string(),
                    response_end: true,
                })
            }
        }
    }

    fn run_inner(
        &self,
        executor: &dyn Executor,
        header: &RequestHeader,
        req: &TableQueryReq,
        permission: Option<&dyn QueryPermission>,
        send: &mut SendFn<'_>,
        response_no: &mut i64,
    ) -> Result<()> {
        let desc = self.registry.get(&req.table_name)?;

        let filter = match permission {
            Some(permission) => {
                permission.filter(header, &req.schema_name, &req.table_name, executor, &desc)?
            }
            None => None,
        };
        let (permission_where, permission_args) = match &filter {
            Some((fragment, args)) => (Some(fragment.as_str()), args.as_slice()),
            None => (None, &[][..]),
        };

        let (sql, args) = build_table_query(
            executor.dialect(),
            &desc,
            req,
            permission_where,
            permission_args,
        )?;
        let mut rows = executor.query(&sql, &args)?;
        let columns = rows.columns().to_vec();

        let batch_rows = self.config.clamp_batch_rows(req.prefer_batch_size) as usize;
        let mut buf: Vec<Vec<u8>> = Vec::new();
        let mut buf_bytes = 0usize;

        while let Some(row) = rows.next_row()? {
            let mut msg = Message::new(desc.clone());
            scan_row(&mut msg, &columns, &row)?;
            let encoded = encode_message(&msg, req.msg_format)?;

            // flush first if this row would push the envelope past the
            // byte ceiling, so only a single oversized row may exceed it
            if !buf.is_empty() && buf_bytes + encoded.len() >= self.config.max_envelope_bytes {
                flush(send, response_no, req, &mut buf, &mut buf_bytes)?;
            }
            buf_bytes += encoded.len();
            buf.push(encoded);

            if buf_bytes >= self.config.max_envelope_bytes || buf.len() >= batch_rows {
                flush(send, response_no, req, &mut buf, &mut buf_bytes)?;
            }
        }

        // terminal envelope carries any remaining rows
        send(QueryResponse {
            response_no: *response_no,
            msg_format: req.msg_format,
            msg_bytes: std::mem::take(&mut buf),
            err_info: String::new(),
            response_end: true,
        })
    }
}

fn flush(
    send: &mut SendFn<'_>,
    response_no: &mut i64,
    req: &TableQueryReq,
    buf: &mut Vec<Vec<u8>>,
    buf_bytes: &mut usize,
) -> Result<()> {
    send(QueryResponse {
        response_no: *response_no,
        msg_format: req.msg_format,
        msg_bytes: std::mem::take(buf),
        err_info: String::new(),
        response_end: false,
    })?;
    *response_no += 1;
    *buf_bytes = 0;
    Ok(())
}
