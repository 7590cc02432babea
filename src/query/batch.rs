use std::io::{BufRead, Write};
use serde::Serialize;
use thiserror::Error;
use crate::query::{query_sequence, QueryOutcome};
use crate::store::TreeReader;
use crate::store::error::StoreError;

#[derive(Error, Debug)]
pub enum BatchQueryError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("failed to read sequences: {0}")]
    Input(#[from] std::io::Error),
    #[error("failed to write results: {0}")]
    Output(#[from] csv::Error),
}

/// One CSV row per queried sequence. Counts and rates are empty for sequences that were
/// never observed.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BatchRow {
    pub sequence: String,
    pub found: bool,
    pub missing_ply: Option<usize>,
    pub total: Option<u64>,
    pub white_wins: Option<u64>,
    pub black_wins: Option<u64>,
    pub draws: Option<u64>,
    pub unfinished: Option<u64>,
    pub white_win_rate: Option<f64>,
    pub black_win_rate: Option<f64>,
    pub draw_rate: Option<f64>,
    pub unfinished_rate: Option<f64>,
}

impl BatchRow {
    pub fn new(sequence: String, outcome: &QueryOutcome) -> BatchRow {
        match outcome {
            QueryOutcome::Found(stats) => BatchRow {
                sequence,
                found: true,
                missing_ply: None,
                total: Some(stats.total),
                white_wins: Some(stats.white_wins),
                black_wins: Some(stats.black_wins),
                draws: Some(stats.draws),
                unfinished: Some(stats.unfinished),
                white_win_rate: Some(stats.white_win_rate),
                black_win_rate: Some(stats.black_win_rate),
                draw_rate: Some(stats.draw_rate),
                unfinished_rate: Some(stats.unfinished_rate),
            },
            QueryOutcome::NotFound { ply, .. } => BatchRow {
                sequence,
                found: false,
                missing_ply: Some(*ply),
                total: None,
                white_wins: None,
                black_wins: None,
                draws: None,
                unfinished: None,
                white_win_rate: None,
                black_win_rate: None,
                draw_rate: None,
                unfinished_rate: None,
            },
        }
    }
}

/// Resolves every non-blank line of `input` (a whitespace separated move sequence) and writes
/// one row per line. Returns `(queried, found)`: how many sequences were looked up, and how
/// many of them were observed.
pub async fn query_batch<R: BufRead, W: Write>(
    reader: &TreeReader,
    input: R,
    output: &mut csv::Writer<W>,
) -> Result<(usize, usize), BatchQueryError> {
    let mut conn = reader.acquire().await?;
    let mut queried = 0;
    let mut found = 0;

    for line in input.lines() {
        let line = line?;
        let sequence = line.split_whitespace().collect::<Vec<_>>();

        if sequence.is_empty() {
            continue;
        }

        let outcome = query_sequence(&mut conn, &sequence).await?;
        if outcome.is_found() {
            found += 1;
        }
        queried += 1;

        output.serialize(BatchRow::new(sequence.join(" "), &outcome))?;
    }

    output.flush().map_err(csv::Error::from)?;
    Ok((queried, found))
}
