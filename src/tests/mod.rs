use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;
use crate::ingest::{IngestConfig, IngestSummary, Pipeline};
use crate::ingest::progress::NoProgress;
use crate::query::QueryOutcome;
use crate::query::stats::Stats;
use crate::store::{TreeReader, TreeStore};

mod ingestion;

pub const TEST_SOURCE: &str = "games.txt";

/// A writer handle on a fresh DB inside its own temporary directory.
pub struct TestTree {
    pub dir: TempDir,
    pub store: TreeStore,
}

impl TestTree {
    pub async fn new() -> TestTree {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let store = TreeStore::open(dir.path().join("tree.db")).await.expect("failed to open store");

        TestTree {
            dir,
            store,
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.dir.path().join("tree.db")
    }

    pub fn error_log_path(&self) -> PathBuf {
        self.dir.path().join("error_log.txt")
    }

    pub fn config(&self) -> IngestConfig {
        IngestConfig {
            error_log: self.error_log_path(),
            ..IngestConfig::default()
        }
    }

    pub async fn ingest(&mut self, input: &str) -> IngestSummary {
        let config = self.config();
        self.ingest_with(input, config).await
    }

    pub async fn ingest_with(&mut self, input: &str, config: IngestConfig) -> IngestSummary {
        Pipeline::new(config)
            .run(&mut self.store, TEST_SOURCE, input.as_bytes(), &mut NoProgress)
            .await
            .expect("ingestion failed")
    }

    pub async fn reader(&self) -> TreeReader {
        TreeReader::open(self.db_path()).await.expect("failed to open reader")
    }

    pub fn error_log(&self) -> String {
        fs::read_to_string(self.error_log_path()).unwrap_or_default()
    }
}

pub async fn found_stats(reader: &TreeReader, moves: &[&str]) -> Stats {
    match reader.query(moves).await.expect("query failed") {
        QueryOutcome::Found(stats) => stats,
        QueryOutcome::NotFound { ply, mv } => panic!("{moves:?} not found (`{mv}` at ply {ply})"),
    }
}
