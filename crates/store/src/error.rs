//! Error types for store operations.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by a [`Database`](crate::Database) implementation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// The connection could not be opened.
    #[error("connection to database '{database}' failed: {message}")]
    Connection {
        /// Configured database name.
        database: String,
        /// Driver message.
        message: String,
    },

    /// A select failed or its filter was rejected.
    #[error("query on table '{table}' failed: {message}")]
    Query {
        /// Table name.
        table: String,
        /// Driver message.
        message: String,
    },

    /// An insert or update failed.
    #[error("write to table '{table}' failed: {message}")]
    Write {
        /// Table name.
        table: String,
        /// Driver message.
        message: String,
    },

    /// A value could not be converted to or from the store's native type.
    #[error("cannot convert value of column '{column}': {message}")]
    Conversion {
        /// Column name.
        column: String,
        /// What went wrong.
        message: String,
    },

    /// The database was used before `init` succeeded.
    #[error("database '{0}' is not initialized")]
    NotInitialized(String),
}

impl StoreError {
    /// Build a query error.
    pub fn query(table: impl Into<String>, message: impl ToString) -> Self {
        Self::Query {
            table: table.into(),
            message: message.to_string(),
        }
    }

    /// Build a write error.
    pub fn write(table: impl Into<String>, message: impl ToString) -> Self {
        Self::Write {
            table: table.into(),
            message: message.to_string(),
        }
    }

    /// Build a conversion error.
    pub fn conversion(column: impl Into<String>, message: impl ToString) -> Self {
        Self::Conversion {
            column: column.into(),
            message: message.to_string(),
        }
    }

    /// Whether this error happened while writing.
    pub fn is_write(&self) -> bool {
        matches!(self, Self::Write { .. } | Self::Conversion { .. })
    }
}
