//! Driver-neutral SQL values
//!
//! `SqlValue` is the box that crosses the driver boundary in both
//! directions: builders produce argument lists of `SqlValue`, and row
//! scans hand `SqlValue` back to the codec. Typed array variants exist
//! for the Postgres array bind/scan path; every other dialect sees
//! arrays as JSON text.

use serde::{Deserialize, Serialize};

/// A SQL statement argument or a scanned column value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum SqlValue {
    /// SQL NULL
    Null,

    /// Boolean value
    Bool(bool),

    /// Integer value (all integer widths travel as i64)
    Int(i64),

    /// Floating point value
    Float(f64),

    /// Text string
    Text(String),

    /// Raw bytes
    Bytes(Vec<u8>),

    /// Postgres integer array (int/uint lists widen to bigint[])
    IntArray(Vec<i64>),

    /// Postgres float array
    FloatArray(Vec<f64>),

    /// Postgres text array
    TextArray(Vec<String>),

    /// Postgres boolean array
    BoolArray(Vec<bool>),
}

impl SqlValue {
    /// Whether this value is the SQL NULL marker.
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Short type label for error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            SqlValue::Null => "null",
            SqlValue::Bool(_) => "bool",
            SqlValue::Int(_) => "int",
            SqlValue::Float(_) => "float",
            SqlValue::Text(_) => "text",
            SqlValue::Bytes(_) => "bytes",
            SqlValue::IntArray(_) => "int[]",
            SqlValue::FloatArray(_) => "float[]",
            SqlValue::TextArray(_) => "text[]",
            SqlValue::BoolArray(_) => "bool[]",
        }
    }
}

/// A scanned row: one `SqlValue` per projected column.
pub type SqlRow = Vec<SqlValue>;
