// TABLE moves:
// id, parent_id (0 for first-ply moves), move, white_win_count, black_win_count, draw_count, unfinished_count
// (parent_id, move) is UNIQUE, which also gives the index every descent step goes through.

// TABLE ingest_runs:
// id, source, batch_size, committed_records, skipped_records, last_committed_line, status, started_at, finished_at

use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Connection, Sqlite, SqliteConnection, SqlitePool, Transaction};
use tracing::{debug, info};
use crate::store::error::StoreError;

pub mod error;
pub mod rows;

pub const DEFAULT_DB_PATH: &str = "movetree.db";
pub const MOVES_TABLE: &str = "moves";
pub const RUNS_TABLE: &str = "ingest_runs";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const READER_CONNECTIONS: u32 = 4;

/// The single writer handle. Owns one connection, so only one ingestion can hold it.
pub struct TreeStore {
    conn: SqliteConnection,
}

impl TreeStore {
    /// Opens the database at `path`, creating the file and the schema if they don't exist.
    pub async fn open(path: impl AsRef<Path>) -> Result<TreeStore, StoreError> {
        let path = path.as_ref();

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(BUSY_TIMEOUT);

        let mut conn = SqliteConnection::connect_with(&options).await?;
        create_tables_if_not_exists(&mut conn).await?;

        info!(path = %path.display(), "opened move tree store");

        Ok(TreeStore {
            conn,
        })
    }

    pub fn connection(&mut self) -> &mut SqliteConnection {
        &mut self.conn
    }

    /// Starts a batch transaction. Nothing written through it is visible to readers before
    /// it commits.
    pub async fn begin(&mut self) -> Result<Transaction<'_, Sqlite>, StoreError> {
        Ok(self.conn.begin().await?)
    }

    pub async fn close(self) -> Result<(), StoreError> {
        self.conn.close().await?;
        Ok(())
    }
}

/// A read handle. Every connection is switched to `query_only`, so nothing going through
/// it can mutate the tree.
#[derive(Clone)]
pub struct TreeReader {
    pool: SqlitePool,
}

impl TreeReader {
    /// Opens an existing database. Readers never create the file or the schema.
    pub async fn open(path: impl AsRef<Path>) -> Result<TreeReader, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(false)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(READER_CONNECTIONS)
            .after_connect(|conn, _meta| Box::pin(async move {
                sqlx::query("PRAGMA query_only = ON;").execute(conn).await?;
                Ok(())
            }))
            .connect_with(options)
            .await?;

        Ok(TreeReader {
            pool,
        })
    }

    pub async fn acquire(&self) -> Result<PoolConnection<Sqlite>, StoreError> {
        Ok(self.pool.acquire().await?)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

pub async fn create_tables_if_not_exists(conn: &mut SqliteConnection) -> Result<(), StoreError> {
    let result = sqlx::query(&format!(r"
        CREATE TABLE IF NOT EXISTS {} (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            parent_id INTEGER NOT NULL,
            move TEXT NOT NULL,
            white_win_count INTEGER NOT NULL DEFAULT 0 CHECK (white_win_count >= 0),
            black_win_count INTEGER NOT NULL DEFAULT 0 CHECK (black_win_count >= 0),
            draw_count INTEGER NOT NULL DEFAULT 0 CHECK (draw_count >= 0),
            unfinished_count INTEGER NOT NULL DEFAULT 0 CHECK (unfinished_count >= 0),
            UNIQUE (parent_id, move)
        );
    ", MOVES_TABLE)).execute(&mut *conn).await?;

    debug!(?result, "created moves table");

    let result = sqlx::query(&format!(r"
        CREATE TABLE IF NOT EXISTS {} (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source TEXT NOT NULL,
            batch_size INTEGER NOT NULL,
            committed_records INTEGER NOT NULL DEFAULT 0,
            skipped_records INTEGER NOT NULL DEFAULT 0,
            last_committed_line INTEGER NOT NULL DEFAULT 0,
            status TEXT NOT NULL,
            started_at INTEGER NOT NULL,
            finished_at INTEGER
        );
    ", RUNS_TABLE)).execute(&mut *conn).await?;

    debug!(?result, "created ingest_runs table");

    Ok(())
}

pub fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs() as i64)
        .unwrap_or(0)
}
