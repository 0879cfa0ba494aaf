//! Request execution
//!
//! The CRUD executor dispatches `code x result_type` over the builders
//! and scans RETURNING rows back into messages; the query streamer runs
//! a compiled table query and batches rows into response envelopes.

pub mod crud;
pub mod executor;
pub mod request;
pub mod stream;

pub use crud::CrudExecutor;
pub use executor::{DialectExecutor, Executor, Rows};
pub use request::{
    CrudCode, CrudPermission, CrudRequest, CrudResponse, QueryPermission, QueryResponse,
    RequestHeader, ResultType,
};
pub use stream::QueryStreamer;

#[cfg(test)]
pub(crate) mod testing {
    use crate::error::{MsgSqlError, Result};
    use crate::exec::executor::{Executor, Rows};
    use crate::sql::dialect::Dialect;
    use crate::types::{SqlRow, SqlValue};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// In-memory executor: answers every query with the configured rows
    /// and records each statement it sees.
    pub struct MockExecutor {
        pub dialect: Dialect,
        pub columns: Vec<String>,
        pub rows: Vec<SqlRow>,
        pub affected: u64,
        pub fail_with: Option<String>,
        pub statements: Mutex<Vec<(String, Vec<SqlValue>)>>,
    }

    impl MockExecutor {
        pub fn new(dialect: Dialect, columns: Vec<String>, rows: Vec<SqlRow>) -> Self {
            Self {
                dialect,
                columns,
                rows,
                affected: 1,
                fail_with: None,
                statements: Mutex::new(Vec::new()),
            }
        }

        fn record(&self, sql: &str, args: &[SqlValue]) {
            self.statements
                .lock()
                .unwrap()
                .push((sql.to_string(), args.to_vec()));
        }
    }

    pub struct MockRows {
        columns: Vec<String>,
        rows: VecDeque<SqlRow>,
        fail_with: Option<String>,
    }

    impl Rows for MockRows {
        fn columns(&self) -> &[String] {
            &self.columns
        }

        fn next_row(&mut self) -> Result<Option<SqlRow>> {
            if let Some(msg) = &self.fail_with {
                if self.rows.is_empty() {
                    return Err(MsgSqlError::Driver(msg.clone()));
                }
            }
            Ok(self.rows.pop_front())
        }
    }

    impl Executor for MockExecutor {
        fn dialect(&self) -> Dialect {
            self.dialect
        }

        fn exec(&self, sql: &str, args: &[SqlValue]) -> Result<u64> {
            self.record(sql, args);
            if let Some(msg) = &self.fail_with {
                return Err(MsgSqlError::Driver(msg.clone()));
            }
            Ok(self.affected)
        }

        fn query<'a>(&'a self, sql: &str, args: &[SqlValue]) -> Result<Box<dyn Rows + 'a>> {
            self.record(sql, args);
            Ok(Box::new(MockRows {
                columns: self.columns.clone(),
                rows: self.rows.clone().into(),
                fail_with: self.fail_with.clone(),
            }))
        }
    }
}
