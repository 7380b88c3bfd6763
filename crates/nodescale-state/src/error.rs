//! Error types for the nodescale state store.

use thiserror::Error;

/// Result type alias for state store operations.
pub type StateResult<T> = Result<T, StateError>;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open state database: {0}")]
    Open(#[from] redb::DatabaseError),

    #[error("state transaction failed: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("state commit failed: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("cannot open table {table}: {source}")]
    Table {
        table: String,
        #[source]
        source: redb::TableError,
    },

    #[error("storage failure in table {table}: {source}")]
    Storage {
        table: String,
        #[source]
        source: redb::StorageError,
    },

    #[error("cannot encode {table}/{key}: {source}")]
    Encode {
        table: String,
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// A stored value no longer decodes as its type.
    #[error("corrupt entry {table}/{key}: {source}")]
    Corrupt {
        table: String,
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

impl StateError {
    pub(crate) fn table(table: &str) -> impl FnOnce(redb::TableError) -> Self + '_ {
        move |source| StateError::Table {
            table: table.to_string(),
            source,
        }
    }

    pub(crate) fn storage(table: &str) -> impl FnOnce(redb::StorageError) -> Self + '_ {
        move |source| StateError::Storage {
            table: table.to_string(),
            source,
        }
    }
}
