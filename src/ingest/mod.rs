// Turns a stream of game lines into move tree mutations.
//
// Every record runs inside a SAVEPOINT of the batch transaction, the batch commits every
// `batch_size` processed records, and the run row in `ingest_runs` is updated inside that same
// commit, so the durable boundary and the recorded boundary never disagree.

use std::io::BufRead;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use serde::Serialize;
use sqlx::{Connection, Sqlite, SqliteConnection, Transaction};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use crate::ingest::error_log::{DEFAULT_ERROR_LOG_PATH, ErrorLog};
use crate::ingest::progress::ProgressReporter;
use crate::ingest::record::{GameRecord, ParseError};
use crate::ingest::replay::BoardReplay;
use crate::store::error::StoreError;
use crate::store::rows::{IngestRunRow, MoveNode, NodeId, RunStatus};
use crate::store::{unix_timestamp, TreeStore};

pub mod error_log;
pub mod progress;
pub mod record;
pub mod replay;

pub const DEFAULT_BATCH_SIZE: usize = 1000;

#[derive(Clone, Debug)]
pub struct IngestConfig {
    /// Records per transaction.
    pub batch_size: NonZeroUsize,
    /// Replay every game on a board and reject illegal moves.
    pub validate_moves: bool,
    /// Continue the latest unfinished run over the same source.
    pub resume: bool,
    pub error_log: PathBuf,
}

impl Default for IngestConfig {
    fn default() -> Self {
        IngestConfig {
            batch_size: NonZeroUsize::new(DEFAULT_BATCH_SIZE).unwrap_or(NonZeroUsize::MIN),
            validate_moves: false,
            resume: false,
            error_log: PathBuf::from(DEFAULT_ERROR_LOG_PATH),
        }
    }
}

/// Why a single record was skipped. Never escapes the ingestion loop on its own.
#[derive(Error, Debug)]
pub enum RecordError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Storage(#[from] StoreError),
}

/// Failures that end a run.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("storage failed after {committed} committed records (last committed line {last_committed_line}): {source}")]
    Fatal {
        committed: u64,
        last_committed_line: u64,
        source: StoreError,
    },
    #[error("failed to read input after line {line}: {source}")]
    Input {
        line: u64,
        source: std::io::Error,
    },
    #[error("failed to append to error log {path}: {source}")]
    ErrorLog {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl IngestError {
    /// The line up to which the input is durably ingested, for restarting.
    pub fn last_committed_line(&self) -> Option<u64> {
        match self {
            IngestError::Fatal { last_committed_line, .. } => Some(*last_committed_line),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct IngestSummary {
    pub run_id: i64,
    /// Records ingested and committed by this invocation.
    pub committed: u64,
    /// Records that failed and were logged by this invocation.
    pub skipped: u64,
    pub parse_failures: u64,
    pub storage_failures: u64,
    /// Lines up to here (inclusive) are durable.
    pub last_committed_line: u64,
    /// Lines skipped because an earlier run already committed them.
    pub resumed_after_line: u64,
    pub batches: u64,
    pub interrupted: bool,
}

// Counts since the last commit boundary.
#[derive(Debug, Default)]
struct PendingBatch {
    processed: u64,
    committed: u64,
    skipped: u64,
    parse_failures: u64,
    storage_failures: u64,
    last_line: u64,
}

pub struct Pipeline {
    config: IngestConfig,
    error_log: ErrorLog,
    stop: Arc<AtomicBool>,
}

impl Pipeline {
    pub fn new(config: IngestConfig) -> Pipeline {
        let error_log = ErrorLog::new(config.error_log.clone());

        Pipeline {
            config,
            error_log,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Setting the returned flag stops the run before the next record. The in-flight batch
    /// still commits.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// Ingests every line of `input`. `source` names the input in the run bookkeeping and is
    /// what `resume` matches on.
    pub async fn run<R: BufRead>(
        &mut self,
        store: &mut TreeStore,
        source: &str,
        mut input: R,
        progress: &mut dyn ProgressReporter,
    ) -> Result<IngestSummary, IngestError> {
        let batch_size = self.config.batch_size.get() as u64;
        let validate_moves = self.config.validate_moves;

        let mut run = self.start_run(store, source).await
            .map_err(|source| IngestError::Fatal {
                committed: 0,
                last_committed_line: 0,
                source,
            })?;

        let mut summary = IngestSummary {
            run_id: run.id,
            last_committed_line: run.last_committed_line,
            resumed_after_line: run.last_committed_line,
            ..IngestSummary::default()
        };
        let resume_after = run.last_committed_line;

        info!(run_id = run.id, source, batch_size, resume_after, "starting ingestion");

        let mut pending = PendingBatch::default();
        let mut line_number = 0u64;
        let mut buffer = Vec::new();

        let mut tx = store.begin().await.map_err(|source| fatal(&summary, source))?;

        loop {
            if self.stop.load(Ordering::SeqCst) {
                info!(line = line_number, "stop requested, finishing the current batch");
                summary.interrupted = true;
                break;
            }

            buffer.clear();
            let read = match input.read_until(b'\n', &mut buffer) {
                Ok(read) => read,
                Err(source) => {
                    let committed = self.commit_batch(tx, &mut run, &mut summary, &mut pending).await;
                    finish_run(store, &mut run, RunStatus::Failed).await;
                    committed?;
                    return Err(IngestError::Input {
                        line: line_number,
                        source,
                    });
                },
            };

            if read == 0 {
                break;
            }

            line_number += 1;
            if line_number <= resume_after {
                progress.advance(line_number);
                continue;
            }

            pending.last_line = line_number;
            let line = trim_line_ending(&buffer);

            if line.iter().all(|x| x.is_ascii_whitespace()) {
                progress.advance(line_number);
                continue;
            }

            let result = match GameRecord::from_bytes(line) {
                Ok(record) => ingest_in_savepoint(&mut tx, &record, validate_moves).await,
                Err(error) => Err(RecordError::Parse(error)),
            };

            match result {
                Ok(_) => pending.committed += 1,
                Err(RecordError::Storage(source)) if source.is_fatal() => {
                    error!(line = line_number, error = %source, "storage handle failed, aborting run");

                    if let Err(rollback_error) = tx.rollback().await {
                        debug!(error = %rollback_error, "rollback of the failed batch did not complete");
                    }
                    self.error_log.discard();
                    finish_run(store, &mut run, RunStatus::Failed).await;

                    return Err(fatal(&summary, source));
                },
                Err(error) => {
                    let raw = String::from_utf8_lossy(line);
                    warn!(line = line_number, error = %error, "skipping record");

                    match error {
                        RecordError::Parse(_) => pending.parse_failures += 1,
                        RecordError::Storage(_) => pending.storage_failures += 1,
                    }
                    pending.skipped += 1;
                    self.error_log.record(line_number, raw.trim(), &error);
                },
            }

            pending.processed += 1;
            progress.advance(line_number);

            if pending.processed >= batch_size {
                if let Err(error) = self.commit_batch(tx, &mut run, &mut summary, &mut pending).await {
                    finish_run(store, &mut run, RunStatus::Failed).await;
                    return Err(error);
                }
                tx = store.begin().await.map_err(|source| fatal(&summary, source))?;
            }
        }

        if let Err(error) = self.commit_batch(tx, &mut run, &mut summary, &mut pending).await {
            finish_run(store, &mut run, RunStatus::Failed).await;
            return Err(error);
        }

        let status = match summary.interrupted {
            true => RunStatus::Interrupted,
            false => RunStatus::Completed,
        };
        run.finish(store.connection(), status, unix_timestamp()).await
            .map_err(|source| fatal(&summary, source))?;

        progress.finish(summary.committed, summary.skipped);
        info!(
            run_id = run.id,
            committed = summary.committed,
            skipped = summary.skipped,
            last_committed_line = summary.last_committed_line,
            interrupted = summary.interrupted,
            "ingestion finished",
        );

        Ok(summary)
    }

    async fn start_run(&self, store: &mut TreeStore, source: &str) -> Result<IngestRunRow, StoreError> {
        let conn = store.connection();

        if self.config.resume {
            if let Some(mut run) = IngestRunRow::latest_unfinished(conn, source).await? {
                info!(
                    run_id = run.id,
                    last_committed_line = run.last_committed_line,
                    previous_status = %run.status,
                    "resuming unfinished run",
                );

                run.status = RunStatus::Running;
                run.update_progress(conn).await?;
                return Ok(run);
            }
        }

        IngestRunRow::insert(conn, source, self.config.batch_size.get() as u64, unix_timestamp()).await
    }

    /// Makes everything since the last boundary durable, then appends its error log entries.
    async fn commit_batch(
        &mut self,
        mut tx: Transaction<'_, Sqlite>,
        run: &mut IngestRunRow,
        summary: &mut IngestSummary,
        pending: &mut PendingBatch,
    ) -> Result<(), IngestError> {
        run.committed_records += pending.committed;
        run.skipped_records += pending.skipped;
        run.last_committed_line = run.last_committed_line.max(pending.last_line);

        let committed = match run.update_progress(&mut tx).await {
            Ok(()) => tx.commit().await.map_err(StoreError::from),
            Err(error) => Err(error),
        };

        if let Err(source) = committed {
            error!(error = %source, "batch commit failed");
            self.error_log.discard();
            return Err(fatal(summary, source));
        }

        summary.committed += pending.committed;
        summary.skipped += pending.skipped;
        summary.parse_failures += pending.parse_failures;
        summary.storage_failures += pending.storage_failures;
        summary.last_committed_line = run.last_committed_line;
        if pending.processed > 0 {
            summary.batches += 1;
        }

        debug!(
            batch = summary.batches,
            records = pending.processed,
            committed = pending.committed,
            skipped = pending.skipped,
            last_committed_line = run.last_committed_line,
            "committed batch",
        );

        *pending = PendingBatch::default();

        self.error_log.flush().map_err(|source| IngestError::ErrorLog {
            path: self.error_log.path().to_path_buf(),
            source,
        })
    }
}

/// Walks the record's moves, creating missing nodes, then counts the game on every node of
/// the path. Returns the number of nodes on the path.
pub async fn insert_record(
    conn: &mut SqliteConnection,
    record: &GameRecord,
    validate_moves: bool,
) -> Result<usize, RecordError> {
    let mut replay = validate_moves.then(BoardReplay::default);
    let mut parent = NodeId::ROOT;
    let mut path = Vec::with_capacity(record.moves.len());

    for mv in record.moves.iter() {
        if let Some(replay) = replay.as_mut() {
            replay.play(mv)?;
        }

        parent = MoveNode::find_or_create_child(conn, parent, mv).await?;
        path.push(parent);
    }

    for node in path.iter() {
        MoveNode::increment_counters(conn, *node, record.outcome).await?;
    }

    Ok(path.len())
}

/// Runs `insert_record` as its own unit of work: all of it lands in the batch, or none of it.
pub async fn ingest_in_savepoint(
    conn: &mut SqliteConnection,
    record: &GameRecord,
    validate_moves: bool,
) -> Result<usize, RecordError> {
    let mut savepoint = conn.begin().await.map_err(StoreError::from)?;

    match insert_record(&mut savepoint, record, validate_moves).await {
        Ok(path_len) => {
            savepoint.commit().await.map_err(StoreError::from)?;
            Ok(path_len)
        },
        Err(error) => {
            savepoint.rollback().await.map_err(StoreError::Rollback)?;
            Err(error)
        },
    }
}

async fn finish_run(store: &mut TreeStore, run: &mut IngestRunRow, status: RunStatus) {
    if let Err(error) = run.finish(store.connection(), status, unix_timestamp()).await {
        debug!(run_id = run.id, error = %error, "could not record the final run status");
    }
}

fn fatal(summary: &IngestSummary, source: StoreError) -> IngestError {
    IngestError::Fatal {
        committed: summary.committed,
        last_committed_line: summary.last_committed_line,
        source,
    }
}

fn trim_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}
