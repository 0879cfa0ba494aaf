//! Error types for the msgsql data-access layer

use thiserror::Error;

pub type Result<T> = std::result::Result<T, MsgSqlError>;

#[derive(Error, Debug)]
pub enum MsgSqlError {
    #[error("Encode error: {0}")]
    Encode(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Invalid identifier: {0}")]
    Identifier(String),

    #[error("Missing value: {0}")]
    MissingValue(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Unknown field: {0}")]
    UnknownField(String),

    #[error("Unsupported operator: {0}")]
    UnsupportedOperator(String),

    #[error("Value parse error: {0}")]
    ValueParse(String),

    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error("Driver error: {0}")]
    Driver(String),

    #[error("Permission denied: {0}")]
    Permission(String),

    #[error("Nothing to update: {0}")]
    NothingToUpdate(String),

    #[error("No rows returned")]
    NoRows,

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<bincode::Error> for MsgSqlError {
    fn from(err: bincode::Error) -> Self {
        MsgSqlError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for MsgSqlError {
    fn from(err: serde_json::Error) -> Self {
        MsgSqlError::Serialization(err.to_string())
    }
}

impl MsgSqlError {
    /// Whether this error came from the SQL driver itself rather than
    /// from request validation or value conversion.
    pub fn is_driver(&self) -> bool {
        matches!(self, MsgSqlError::Driver(_))
    }

    /// Whether this error should be reported to the caller as a
    /// permission failure.
    pub fn is_permission(&self) -> bool {
        matches!(self, MsgSqlError::Permission(_))
    }
}
