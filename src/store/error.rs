use thiserror::Error;
use crate::store::rows::NodeId;

// Primary SQLite result codes that mean the handle itself is unusable.
const SQLITE_PERM: i32 = 3;
const SQLITE_READONLY: i32 = 8;
const SQLITE_IOERR: i32 = 10;
const SQLITE_CORRUPT: i32 = 11;
const SQLITE_FULL: i32 = 13;
const SQLITE_CANTOPEN: i32 = 14;
const SQLITE_NOTADB: i32 = 26;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("move `{mv}` already exists under parent {parent}")]
    DuplicateKey {
        parent: NodeId,
        mv: String,
    },
    #[error("no move node with id {0}")]
    UnknownNode(NodeId),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("failed to roll back a partially applied record: {0}")]
    Rollback(#[source] sqlx::Error),
}

impl StoreError {
    /// Whether the storage handle can no longer be trusted.
    ///
    /// Constraint violations and other statement-level failures only affect the
    /// current record. I/O errors, corruption, a full disk or a closed connection
    /// affect every record after it.
    pub fn is_fatal(&self) -> bool {
        match self {
            StoreError::DuplicateKey { .. } => false,
            StoreError::UnknownNode(_) => false,
            // the record's mutations may still be part of the batch
            StoreError::Rollback(_) => true,
            StoreError::Database(error) => match error {
                sqlx::Error::Database(db_error) => db_error
                    .code()
                    .and_then(|code| code.parse::<i32>().ok())
                    .map(|code| is_fatal_sqlite_code(code & 0xff))
                    .unwrap_or(false),
                sqlx::Error::Io(_)
                | sqlx::Error::Tls(_)
                | sqlx::Error::Protocol(_)
                | sqlx::Error::Configuration(_)
                | sqlx::Error::PoolTimedOut
                | sqlx::Error::PoolClosed
                | sqlx::Error::WorkerCrashed => true,
                _ => false,
            },
        }
    }
}

fn is_fatal_sqlite_code(primary_code: i32) -> bool {
    matches!(
        primary_code,
        SQLITE_PERM
            | SQLITE_READONLY
            | SQLITE_IOERR
            | SQLITE_CORRUPT
            | SQLITE_FULL
            | SQLITE_CANTOPEN
            | SQLITE_NOTADB
    )
}
