//! Multi-dialect SQL builders
//!
//! Pure statement construction: dialect conventions, identifier guards,
//! CREATE TABLE, the CRUD statements, and the table-query compiler.
//! Builders never touch a connection; they return statement text plus an
//! argument list and leave execution to `exec`.

pub mod crud;
pub mod ddl;
pub mod dialect;
pub mod ident;
pub mod table_query;

pub use crud::{
    build_delete, build_insert, build_partial_update, build_select_one, build_update,
    build_update_old_new,
};
pub use ddl::build_create_table;
pub use dialect::{cached_dialect, Dialect};
pub use ident::{check_expression, check_identifier};
pub use table_query::{build_table_query, TableQueryReq, Where2Op};
