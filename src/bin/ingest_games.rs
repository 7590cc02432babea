//! This executable ingests a file of games into the move tree DB.
//! Every line is one game: SAN moves separated by spaces, then `1-0`, `0-1`, `1/2-1/2` or `*`.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use anyhow::{Context, Result};
use clap::Parser;
use tracing::warn;
use movetree::args::IngestArgs;
use movetree::ingest::Pipeline;
use movetree::ingest::progress::{ingest_progress_bar, NoProgress, ProgressReporter};
use movetree::logging::init_tracing;
use movetree::store::TreeStore;

const INTERRUPTED_EXIT_CODE: u8 = 130;

fn main() -> Result<ExitCode> {
    init_tracing();
    let args = IngestArgs::parse();

    let tokio_runtime = tokio::runtime::Runtime::new().context("failed to create tokio runtime")?;
    tokio_runtime.block_on(ingest(args))
}

async fn ingest(args: IngestArgs) -> Result<ExitCode> {
    // first pass only counts, so the progress bar has a total
    let total = count_lines(&args.input)?;

    let file = File::open(&args.input)
        .with_context(|| format!("failed to open {}", args.input.display()))?;
    let source = std::fs::canonicalize(&args.input)
        .unwrap_or_else(|_| args.input.clone())
        .display()
        .to_string();

    let mut store = TreeStore::open(&args.db_path).await
        .with_context(|| format!("failed to open move tree at {}", args.db_path.display()))?;

    let mut pipeline = Pipeline::new(args.ingest_config());
    let stop = pipeline.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after the current record");
            stop.store(true, Ordering::SeqCst);
        }
    });

    let mut progress: Box<dyn ProgressReporter> = match args.quiet {
        true => Box::new(NoProgress),
        false => Box::new(ingest_progress_bar(total)),
    };
    progress.set_total(total);

    let result = pipeline
        .run(&mut store, &source, BufReader::new(file), progress.as_mut())
        .await;

    match result {
        Ok(summary) => {
            store.close().await?;
            println!("committed {}, skipped {}", summary.committed, summary.skipped);

            if summary.skipped > 0 {
                println!("skipped records are logged in {}", args.error_log.display());
            }

            match summary.interrupted {
                true => {
                    println!(
                        "interrupted: input committed up to line {}, rerun with --resume to continue",
                        summary.last_committed_line,
                    );
                    Ok(ExitCode::from(INTERRUPTED_EXIT_CODE))
                },
                false => Ok(ExitCode::SUCCESS),
            }
        },
        Err(error) => {
            eprintln!("ingestion failed: {error}");

            if let Some(line) = error.last_committed_line() {
                eprintln!("input committed up to line {line}, rerun with --resume to continue");
            }

            if let Err(close_error) = store.close().await {
                warn!(error = %close_error, "failed to close the move tree");
            }
            Ok(ExitCode::FAILURE)
        },
    }
}

fn count_lines(path: &Path) -> Result<u64> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let lines = BufReader::new(file)
        .split(b'\n')
        .try_fold(0u64, |count, line| line.map(|_| count + 1))
        .with_context(|| format!("failed to read {}", path.display()))?;

    Ok(lines)
}
