// Read-only descent of the move tree. Shares the single-ply lookup with ingestion but never
// creates anything.

use serde::Serialize;
use sqlx::SqliteConnection;
use crate::query::stats::Stats;
use crate::store::TreeReader;
use crate::store::error::StoreError;
use crate::store::rows::{MoveNode, NodeId};

pub mod batch;
pub mod stats;

/// Where a descent ended.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Descent {
    /// Every move was found. `NodeId::ROOT` for the empty sequence.
    Reached(NodeId),
    /// The move at 1-based `ply` was never observed after the preceding prefix.
    Missing {
        ply: usize,
        mv: String,
    },
}

/// The result of a point query. Absence is its own variant, never a zeroed `Stats`.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum QueryOutcome {
    Found(Stats),
    NotFound {
        ply: usize,
        mv: String,
    },
}

impl QueryOutcome {
    pub fn found(&self) -> Option<&Stats> {
        match self {
            QueryOutcome::Found(stats) => Some(stats),
            QueryOutcome::NotFound { .. } => None,
        }
    }

    pub fn is_found(&self) -> bool {
        self.found().is_some()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PlyStats {
    pub ply: usize,
    pub mv: String,
    pub stats: Stats,
}

/// Statistics after every ply of a sequence, up to the first move that was never observed.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Progression {
    pub plies: Vec<PlyStats>,
    pub missing: Option<(usize, String)>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Continuation {
    pub mv: String,
    pub stats: Stats,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TreeSummary {
    pub nodes: u64,
    pub games: Stats,
}

pub async fn descend<S: AsRef<str>>(
    conn: &mut SqliteConnection,
    sequence: &[S],
) -> Result<Descent, StoreError> {
    let mut node = NodeId::ROOT;

    for (index, mv) in sequence.iter().enumerate() {
        let mv = mv.as_ref();

        match MoveNode::find_child(conn, node, mv).await? {
            Some(child) => node = child,
            None => return Ok(Descent::Missing {
                ply: index + 1,
                mv: mv.to_string(),
            }),
        }
    }

    Ok(Descent::Reached(node))
}

async fn node_stats(conn: &mut SqliteConnection, node: NodeId) -> Result<Stats, StoreError> {
    if node.is_root() {
        return Ok(MoveNode::root_counters(conn).await?.into());
    }

    // nodes are never deleted, so a node we just descended to must still be there
    MoveNode::read_counters(conn, node).await?
        .map(Stats::from)
        .ok_or(StoreError::UnknownNode(node))
}

pub async fn query_sequence<S: AsRef<str>>(
    conn: &mut SqliteConnection,
    sequence: &[S],
) -> Result<QueryOutcome, StoreError> {
    match descend(conn, sequence).await? {
        Descent::Reached(node) => Ok(QueryOutcome::Found(node_stats(conn, node).await?)),
        Descent::Missing { ply, mv } => Ok(QueryOutcome::NotFound { ply, mv }),
    }
}

pub async fn sequence_progression<S: AsRef<str>>(
    conn: &mut SqliteConnection,
    sequence: &[S],
) -> Result<Progression, StoreError> {
    let mut node = NodeId::ROOT;
    let mut plies = Vec::with_capacity(sequence.len());

    for (index, mv) in sequence.iter().enumerate() {
        let mv = mv.as_ref();

        node = match MoveNode::find_child(conn, node, mv).await? {
            Some(child) => child,
            None => {
                return Ok(Progression {
                    plies,
                    missing: Some((index + 1, mv.to_string())),
                })
            },
        };

        plies.push(PlyStats {
            ply: index + 1,
            mv: mv.to_string(),
            stats: node_stats(conn, node).await?,
        });
    }

    Ok(Progression {
        plies,
        missing: None,
    })
}

/// Every observed next move after `sequence`, most played first. `None` if the sequence
/// itself was never observed.
pub async fn sequence_continuations<S: AsRef<str>>(
    conn: &mut SqliteConnection,
    sequence: &[S],
) -> Result<Option<Vec<Continuation>>, StoreError> {
    let node = match descend(conn, sequence).await? {
        Descent::Reached(node) => node,
        Descent::Missing { .. } => return Ok(None),
    };

    let children = MoveNode::children(conn, node).await?;

    Ok(Some(children.into_iter()
        .map(|child| Continuation {
            mv: child.mv,
            stats: child.counters.into(),
        })
        .collect()))
}

pub async fn tree_summary(conn: &mut SqliteConnection) -> Result<TreeSummary, StoreError> {
    Ok(TreeSummary {
        nodes: MoveNode::count(conn).await?,
        games: MoveNode::root_counters(conn).await?.into(),
    })
}

impl TreeReader {
    pub async fn query<S: AsRef<str>>(&self, sequence: &[S]) -> Result<QueryOutcome, StoreError> {
        let mut conn = self.acquire().await?;
        query_sequence(&mut conn, sequence).await
    }

    pub async fn progression<S: AsRef<str>>(&self, sequence: &[S]) -> Result<Progression, StoreError> {
        let mut conn = self.acquire().await?;
        sequence_progression(&mut conn, sequence).await
    }

    pub async fn continuations<S: AsRef<str>>(
        &self,
        sequence: &[S],
    ) -> Result<Option<Vec<Continuation>>, StoreError> {
        let mut conn = self.acquire().await?;
        sequence_continuations(&mut conn, sequence).await
    }

    pub async fn summary(&self) -> Result<TreeSummary, StoreError> {
        let mut conn = self.acquire().await?;
        tree_summary(&mut conn).await
    }
}
