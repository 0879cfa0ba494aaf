/// SQL dialects and their statement conventions
///
/// The dialect governs placeholder style, table-name qualification, and a
/// handful of function choices in the query compiler. Dialect per
/// connection is cached by connection identity so wrapper lookups stay
/// O(1).
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::sync::OnceLock;

/// The SQL variant targeted by a generated statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Dialect {
    Postgres,
    MySql,
    Sqlite,
    Oracle,
    #[default]
    Unknown,
}

impl Dialect {
    /// Append the n-th placeholder (1-based) to a statement buffer.
    pub fn push_placeholder(self, sql: &mut String, n: usize) {
        match self {
            Dialect::Postgres => {
                let _ = write!(sql, "${n}");
            }
            _ => sql.push('?'),
        }
    }

    /// The n-th placeholder (1-based) as a standalone token.
    pub fn placeholder(self, n: usize) -> String {
        match self {
            Dialect::Postgres => format!("${n}"),
            _ => "?".to_string(),
        }
    }

    /// Qualified table name. Postgres and Oracle separate schema and
    /// table with a dot; the rest concatenate; an empty schema leaves
    /// the name alone.
    pub fn qualify_table(self, schema: &str, name: &str) -> String {
        if schema.is_empty() {
            return name.to_string();
        }
        match self {
            Dialect::Postgres | Dialect::Oracle => format!("{schema}.{name}"),
            _ => format!("{schema}{name}"),
        }
    }

    /// Map a driver type string to a dialect. Unrecognized drivers are
    /// `Unknown`; callers may override via an explicit wrapper.
    pub fn from_driver(driver: &str) -> Self {
        match driver {
            "*stdlib.Driver" | "*pq.Driver" => Dialect::Postgres,
            "*mysql.MySQLDriver" => Dialect::MySql,
            "*sqlite3.SQLiteDriver" | "*sqlite.Driver" => Dialect::Sqlite,
            _ => Dialect::Unknown,
        }
    }
}

static DIALECT_CACHE: OnceLock<DashMap<usize, Dialect>> = OnceLock::new();

/// Dialect of a connection, cached by connection identity. `detect` runs
/// once per identity.
pub fn cached_dialect(conn_id: usize, detect: impl FnOnce() -> Dialect) -> Dialect {
    let cache = DIALECT_CACHE.get_or_init(DashMap::new);
    if let Some(dialect) = cache.get(&conn_id) {
        return *dialect;
    }
    let dialect = detect();
    cache.insert(conn_id, dialect);
    dialect
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_styles() {
        assert_eq!(Dialect::Postgres.placeholder(3), "$3");
        assert_eq!(Dialect::MySql.placeholder(3), "?");
        assert_eq!(Dialect::Sqlite.placeholder(1), "?");
    }

    #[test]
    fn test_qualify_table() {
        assert_eq!(Dialect::Postgres.qualify_table("app", "users"), "app.users");
        assert_eq!(Dialect::Oracle.qualify_table("app", "users"), "app.users");
        assert_eq!(Dialect::Sqlite.qualify_table("app_", "users"), "app_users");
        assert_eq!(Dialect::MySql.qualify_table("", "users"), "users");
    }

    #[test]
    fn test_driver_detection() {
        assert_eq!(Dialect::from_driver("*pq.Driver"), Dialect::Postgres);
        assert_eq!(Dialect::from_driver("*mysql.MySQLDriver"), Dialect::MySql);
        assert_eq!(Dialect::from_driver("*sqlite.Driver"), Dialect::Sqlite);
        assert_eq!(Dialect::from_driver("other"), Dialect::Unknown);
    }

    #[test]
    fn test_cached_dialect_runs_detect_once() {
        let mut calls = 0;
        let first = cached_dialect(0xdead_0001, || {
            calls += 1;
            Dialect::Postgres
        });
        let second = cached_dialect(0xdead_0001, || {
            calls += 1;
            Dialect::Sqlite
        });
        assert_eq!(first, Dialect::Postgres);
        assert_eq!(second, Dialect::Postgres);
        assert_eq!(calls, 1);
    }
}
