//! Crate-wide error type.
//!
//! Every fallible operation in the engine returns [`Result`]. The variants
//! form a small taxonomy that callers can branch on: the table layer turns
//! `AlreadyExists` from a unique index into `UniqueViolation`, the shell can
//! distinguish a missing row (`NotFound`) from a damaged file (`Corrupted`),
//! and so on. `Corrupted` is terminal: once it surfaces, the database must be
//! treated as read-only.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// A caller-supplied argument is unusable: empty name, wrong value
    /// count, NULL for a NOT NULL column, page number zero.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Key, table, index, or column does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Key, table, or index already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// A unique secondary index refused an insert or update.
    #[error("unique constraint violation: {0}")]
    UniqueViolation(String),

    /// Value type incompatible with a column, or an attempt to mutate a
    /// primary key in place.
    #[error("schema violation: {0}")]
    SchemaViolation(String),

    /// Invalid page header, truncated cell, bad magic, cyclic leaf chain,
    /// or any other sign the file can no longer be trusted.
    #[error("corrupted database: {0}")]
    Corrupted(String),

    /// Underlying file I/O failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A single cell does not fit in one page even after defragmentation.
    /// Overflow chains are not supported; oversize values are rejected.
    #[error("not enough space: cell of {cell_size} bytes exceeds {available} free bytes")]
    NotEnoughSpace { cell_size: u32, available: u32 },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn corrupted(msg: impl Into<String>) -> Self {
        Error::Corrupted(msg.into())
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    pub(crate) fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Corrupted(format!("malformed metadata payload: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_carry_context() {
        let err = Error::not_found("table 'users'");
        assert_eq!(err.to_string(), "not found: table 'users'");

        let err = Error::NotEnoughSpace {
            cell_size: 5000,
            available: 4076,
        };
        assert!(err.to_string().contains("5000"));
        assert!(err.to_string().contains("4076"));
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
