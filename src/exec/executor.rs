/// Database executor contracts
///
/// Anything that accepts a statement plus arguments and returns rows or
/// an affected-count: a connection or a transaction, behind the same
/// trait. A transaction handle generally cannot expose its driver type,
/// so callers wrap it in `DialectExecutor` to tag the dialect; dialect
/// discovery on a wrapper is O(1).
use crate::error::Result;
use crate::sql::dialect::Dialect;
use crate::types::{SqlRow, SqlValue};

/// A streaming row cursor.
pub trait Rows {
    /// Projected column names, in result order.
    fn columns(&self) -> &[String];

    /// Next row, or `None` at the end of the result set.
    fn next_row(&mut self) -> Result<Option<SqlRow>>;
}

/// A connection or transaction that can run statements.
pub trait Executor: Send + Sync {
    /// The SQL dialect this executor speaks.
    fn dialect(&self) -> Dialect;

    /// Run a statement and return the affected-row count.
    fn exec(&self, sql: &str, args: &[SqlValue]) -> Result<u64>;

    /// Run a query and return a row cursor.
    fn query<'a>(&'a self, sql: &str, args: &[SqlValue]) -> Result<Box<dyn Rows + 'a>>;

    /// Run a query expected to produce at most one row.
    fn query_row(&self, sql: &str, args: &[SqlValue]) -> Result<Option<(Vec<String>, SqlRow)>> {
        let mut rows = self.query(sql, args)?;
        let columns = rows.columns().to_vec();
        Ok(rows.next_row()?.map(|row| (columns, row)))
    }
}

/// An executor wrapped with an explicit dialect tag.
pub struct DialectExecutor<E> {
    inner: E,
    dialect: Dialect,
}

impl<E: Executor> DialectExecutor<E> {
    pub fn new(inner: E, dialect: Dialect) -> Self {
        Self { inner, dialect }
    }

    pub fn into_inner(self) -> E {
        self.inner
    }
}

impl<E: Executor> Executor for DialectExecutor<E> {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn exec(&self, sql: &str, args: &[SqlValue]) -> Result<u64> {
        self.inner.exec(sql, args)
    }

    fn query<'a>(&'a self, sql: &str, args: &[SqlValue]) -> Result<Box<dyn Rows + 'a>> {
        self.inner.query(sql, args)
    }

    fn query_row(&self, sql: &str, args: &[SqlValue]) -> Result<Option<(Vec<String>, SqlRow)>> {
        self.inner.query_row(sql, args)
    }
}
