use std::fmt::{Display, Formatter};
use std::str::FromStr;
use serde::{Serialize, Deserialize};
use sqlx::error::ErrorKind;
use sqlx::SqliteConnection;
use crate::store::{MOVES_TABLE, RUNS_TABLE};
use crate::store::error::StoreError;

// The row types stored in each table of the DB, and the statements that touch them.

/// Surrogate id of a move node.
///
/// Real ids are handed out by SQLite `AUTOINCREMENT` and start at 1, so `0` is free to act
/// as the parent of every first-ply node.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct NodeId(i64);

impl NodeId {
    pub const ROOT: NodeId = NodeId(0);

    pub fn new(id: i64) -> NodeId {
        NodeId(id)
    }

    pub fn get(&self) -> i64 {
        self.0
    }

    pub fn is_root(&self) -> bool {
        *self == NodeId::ROOT
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.is_root() {
            write!(f, "root")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Terminal classification of a game.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    WhiteWin,
    BlackWin,
    Draw,
    Unfinished,
}

impl Outcome {
    pub const ALL: [Outcome; 4] = [
        Outcome::WhiteWin,
        Outcome::BlackWin,
        Outcome::Draw,
        Outcome::Unfinished,
    ];

    /// Recognizes the PGN result tags `1-0`, `0-1`, `1/2-1/2` and `*`.
    pub fn from_tag(tag: &str) -> Option<Outcome> {
        match tag {
            "1-0" => Some(Outcome::WhiteWin),
            "0-1" => Some(Outcome::BlackWin),
            "1/2-1/2" => Some(Outcome::Draw),
            "*" => Some(Outcome::Unfinished),
            _ => None,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Outcome::WhiteWin => "1-0",
            Outcome::BlackWin => "0-1",
            Outcome::Draw => "1/2-1/2",
            Outcome::Unfinished => "*",
        }
    }

    fn counter_column(&self) -> &'static str {
        match self {
            Outcome::WhiteWin => "white_win_count",
            Outcome::BlackWin => "black_win_count",
            Outcome::Draw => "draw_count",
            Outcome::Unfinished => "unfinished_count",
        }
    }
}

impl Display for Outcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.tag())
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Counters {
    pub white_wins: u64,
    pub black_wins: u64,
    pub draws: u64,
    pub unfinished: u64,
}

impl Counters {
    pub fn total(&self) -> u64 {
        self.white_wins + self.black_wins + self.draws + self.unfinished
    }

    pub fn get(&self, outcome: Outcome) -> u64 {
        match outcome {
            Outcome::WhiteWin => self.white_wins,
            Outcome::BlackWin => self.black_wins,
            Outcome::Draw => self.draws,
            Outcome::Unfinished => self.unfinished,
        }
    }

    fn from_columns((white_wins, black_wins, draws, unfinished): (i64, i64, i64, i64)) -> Counters {
        // the schema CHECKs every counter is >= 0
        Counters {
            white_wins: white_wins as u64,
            black_wins: black_wins as u64,
            draws: draws as u64,
            unfinished: unfinished as u64,
        }
    }
}

type MoveNodeColumns = (i64, i64, String, i64, i64, i64, i64);

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MoveNode {
    pub id: NodeId,
    pub parent_id: NodeId,
    pub mv: String,
    pub counters: Counters,
}

impl MoveNode {
    fn from_columns(columns: MoveNodeColumns) -> MoveNode {
        let (id, parent_id, mv, white, black, draw, unfinished) = columns;

        MoveNode {
            id: NodeId::new(id),
            parent_id: NodeId::new(parent_id),
            mv,
            counters: Counters::from_columns((white, black, draw, unfinished)),
        }
    }

    /// Exact lookup on the unique `(parent_id, move)` key.
    pub async fn find_child(
        conn: &mut SqliteConnection,
        parent: NodeId,
        mv: &str,
    ) -> Result<Option<NodeId>, StoreError> {
        let row: Option<(i64,)> = sqlx::query_as(&format!(r"
            SELECT id FROM {} WHERE parent_id = ? AND move = ?;
        ", MOVES_TABLE))
            .bind(parent.get())
            .bind(mv)
            .fetch_optional(&mut *conn)
            .await?;

        Ok(row.map(|(id,)| NodeId::new(id)))
    }

    /// Inserts a node with zeroed counters. Fails with `DuplicateKey` if the key is taken.
    pub async fn create_child(
        conn: &mut SqliteConnection,
        parent: NodeId,
        mv: &str,
    ) -> Result<NodeId, StoreError> {
        let result = sqlx::query(&format!(r"
            INSERT INTO {} (
                parent_id,
                move
            ) VALUES (
                ?,
                ?
            );
        ", MOVES_TABLE))
            .bind(parent.get())
            .bind(mv)
            .execute(&mut *conn)
            .await;

        match result {
            Ok(result) => Ok(NodeId::new(result.last_insert_rowid())),
            Err(sqlx::Error::Database(error)) if matches!(error.kind(), ErrorKind::UniqueViolation) => {
                Err(StoreError::DuplicateKey {
                    parent,
                    mv: mv.to_string(),
                })
            },
            Err(error) => Err(error.into()),
        }
    }

    pub async fn find_or_create_child(
        conn: &mut SqliteConnection,
        parent: NodeId,
        mv: &str,
    ) -> Result<NodeId, StoreError> {
        match MoveNode::find_child(conn, parent, mv).await? {
            Some(id) => Ok(id),
            None => MoveNode::create_child(conn, parent, mv).await,
        }
    }

    /// Adds one to the counter of `outcome`. A single UPDATE, so readers see either none or
    /// all of it.
    pub async fn increment_counters(
        conn: &mut SqliteConnection,
        id: NodeId,
        outcome: Outcome,
    ) -> Result<(), StoreError> {
        let column = outcome.counter_column();
        let result = sqlx::query(&format!(r"
            UPDATE {table}
            SET {column} = {column} + 1
            WHERE id = ?;
        ", table = MOVES_TABLE, column = column))
            .bind(id.get())
            .execute(&mut *conn)
            .await?;

        match result.rows_affected() {
            0 => Err(StoreError::UnknownNode(id)),
            _ => Ok(()),
        }
    }

    pub async fn read_counters(
        conn: &mut SqliteConnection,
        id: NodeId,
    ) -> Result<Option<Counters>, StoreError> {
        let row: Option<(i64, i64, i64, i64)> = sqlx::query_as(&format!(r"
            SELECT white_win_count, black_win_count, draw_count, unfinished_count
            FROM {}
            WHERE id = ?;
        ", MOVES_TABLE))
            .bind(id.get())
            .fetch_optional(&mut *conn)
            .await?;

        Ok(row.map(Counters::from_columns))
    }

    /// Sum of the counters of every first-ply node, i.e. of every ingested game.
    pub async fn root_counters(conn: &mut SqliteConnection) -> Result<Counters, StoreError> {
        let row: (i64, i64, i64, i64) = sqlx::query_as(&format!(r"
            SELECT
                COALESCE(SUM(white_win_count), 0),
                COALESCE(SUM(black_win_count), 0),
                COALESCE(SUM(draw_count), 0),
                COALESCE(SUM(unfinished_count), 0)
            FROM {}
            WHERE parent_id = ?;
        ", MOVES_TABLE))
            .bind(NodeId::ROOT.get())
            .fetch_one(&mut *conn)
            .await?;

        Ok(Counters::from_columns(row))
    }

    /// All continuations of `parent`, most played first.
    pub async fn children(
        conn: &mut SqliteConnection,
        parent: NodeId,
    ) -> Result<Vec<MoveNode>, StoreError> {
        let rows: Vec<MoveNodeColumns> = sqlx::query_as(&format!(r"
            SELECT id, parent_id, move, white_win_count, black_win_count, draw_count, unfinished_count
            FROM {}
            WHERE parent_id = ?
            ORDER BY (white_win_count + black_win_count + draw_count + unfinished_count) DESC, move ASC;
        ", MOVES_TABLE))
            .bind(parent.get())
            .fetch_all(&mut *conn)
            .await?;

        Ok(rows.into_iter().map(MoveNode::from_columns).collect())
    }

    pub async fn count(conn: &mut SqliteConnection) -> Result<u64, StoreError> {
        let (count,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {};", MOVES_TABLE))
            .fetch_one(&mut *conn)
            .await?;

        Ok(count as u64)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum RunStatus {
    Running,
    Completed,
    Interrupted,
    Failed,
}

impl Display for RunStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Running => write!(f, "running"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Interrupted => write!(f, "interrupted"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for RunStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "interrupted" => Ok(RunStatus::Interrupted),
            "failed" => Ok(RunStatus::Failed),
            other => Err(StoreError::Database(sqlx::Error::Decode(
                format!("unknown run status `{other}`").into(),
            ))),
        }
    }
}

type IngestRunColumns = (i64, String, i64, i64, i64, i64, String, i64, Option<i64>);

/// One pass of the ingestion pipeline over a source. Its progress columns are only ever
/// written inside a batch transaction, so `last_committed_line` is the durable boundary.
#[derive(Clone, Debug)]
pub struct IngestRunRow {
    pub id: i64,
    pub source: String,
    pub batch_size: u64,
    pub committed_records: u64,
    pub skipped_records: u64,
    pub last_committed_line: u64,
    pub status: RunStatus,
    pub started_at: i64,
    pub finished_at: Option<i64>,
}

impl IngestRunRow {
    fn from_columns(columns: IngestRunColumns) -> Result<IngestRunRow, StoreError> {
        let (id, source, batch_size, committed, skipped, last_line, status, started_at, finished_at) = columns;

        Ok(IngestRunRow {
            id,
            source,
            batch_size: batch_size as u64,
            committed_records: committed as u64,
            skipped_records: skipped as u64,
            last_committed_line: last_line as u64,
            status: status.parse()?,
            started_at,
            finished_at,
        })
    }

    pub async fn insert(
        conn: &mut SqliteConnection,
        source: &str,
        batch_size: u64,
        started_at: i64,
    ) -> Result<IngestRunRow, StoreError> {
        let result = sqlx::query(&format!(r"
            INSERT INTO {} (
                source,
                batch_size,
                status,
                started_at
            ) VALUES (
                ?,
                ?,
                ?,
                ?
            );
        ", RUNS_TABLE))
            .bind(source)
            .bind(batch_size as i64)
            .bind(RunStatus::Running.to_string())
            .bind(started_at)
            .execute(&mut *conn)
            .await?;

        Ok(IngestRunRow {
            id: result.last_insert_rowid(),
            source: source.to_string(),
            batch_size,
            committed_records: 0,
            skipped_records: 0,
            last_committed_line: 0,
            status: RunStatus::Running,
            started_at,
            finished_at: None,
        })
    }

    /// The most recent run over `source` that never completed.
    pub async fn latest_unfinished(
        conn: &mut SqliteConnection,
        source: &str,
    ) -> Result<Option<IngestRunRow>, StoreError> {
        let row: Option<IngestRunColumns> = sqlx::query_as(&format!(r"
            SELECT id, source, batch_size, committed_records, skipped_records,
                   last_committed_line, status, started_at, finished_at
            FROM {}
            WHERE source = ? AND status != ?
            ORDER BY id DESC
            LIMIT 1;
        ", RUNS_TABLE))
            .bind(source)
            .bind(RunStatus::Completed.to_string())
            .fetch_optional(&mut *conn)
            .await?;

        row.map(IngestRunRow::from_columns).transpose()
    }

    pub async fn fetch(conn: &mut SqliteConnection, id: i64) -> Result<Option<IngestRunRow>, StoreError> {
        let row: Option<IngestRunColumns> = sqlx::query_as(&format!(r"
            SELECT id, source, batch_size, committed_records, skipped_records,
                   last_committed_line, status, started_at, finished_at
            FROM {}
            WHERE id = ?;
        ", RUNS_TABLE))
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;

        row.map(IngestRunRow::from_columns).transpose()
    }

    pub async fn update_progress(&self, conn: &mut SqliteConnection) -> Result<(), StoreError> {
        sqlx::query(&format!(r"
            UPDATE {}
            SET committed_records = ?, skipped_records = ?, last_committed_line = ?, status = ?
            WHERE id = ?;
        ", RUNS_TABLE))
            .bind(self.committed_records as i64)
            .bind(self.skipped_records as i64)
            .bind(self.last_committed_line as i64)
            .bind(self.status.to_string())
            .bind(self.id)
            .execute(&mut *conn)
            .await?;

        Ok(())
    }

    pub async fn finish(
        &mut self,
        conn: &mut SqliteConnection,
        status: RunStatus,
        finished_at: i64,
    ) -> Result<(), StoreError> {
        self.status = status;
        self.finished_at = Some(finished_at);

        sqlx::query(&format!(r"
            UPDATE {}
            SET status = ?, finished_at = ?
            WHERE id = ?;
        ", RUNS_TABLE))
            .bind(status.to_string())
            .bind(finished_at)
            .bind(self.id)
            .execute(&mut *conn)
            .await?;

        Ok(())
    }
}
