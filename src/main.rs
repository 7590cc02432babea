use std::fs::File;
use std::io;
use std::io::BufReader;
use std::process::ExitCode;
use anyhow::{Context, Result};
use clap::Parser;
use itertools::Itertools;
use movetree::args::{QueryArgs, QueryCommand};
use movetree::logging::init_tracing;
use movetree::query::batch::query_batch;
use movetree::query::stats::Stats;
use movetree::query::QueryOutcome;
use movetree::store::TreeReader;

// Distinct from the failure code, so scripts can branch on "never observed".
const NOT_FOUND_EXIT_CODE: u8 = 2;

fn main() -> Result<ExitCode> {
    init_tracing();
    let args = QueryArgs::parse();

    let tokio_runtime = tokio::runtime::Runtime::new().context("failed to create tokio runtime")?;
    tokio_runtime.block_on(run(args))
}

async fn run(args: QueryArgs) -> Result<ExitCode> {
    let reader = TreeReader::open(&args.db_path).await
        .with_context(|| format!("failed to open move tree at {}", args.db_path.display()))?;

    let exit_code = match args.command {
        QueryCommand::Query { moves, json } => {
            let outcome = reader.query(&moves).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            } else {
                print_outcome(&moves, &outcome);
            }

            match outcome {
                QueryOutcome::Found(_) => ExitCode::SUCCESS,
                QueryOutcome::NotFound { .. } => ExitCode::from(NOT_FOUND_EXIT_CODE),
            }
        },
        QueryCommand::QueryFile { input, output } => {
            let file = File::open(&input)
                .with_context(|| format!("failed to open {}", input.display()))?;

            let (queried, found) = match output {
                Some(path) => {
                    let mut writer = csv::Writer::from_path(&path)
                        .with_context(|| format!("failed to create {}", path.display()))?;
                    query_batch(&reader, BufReader::new(file), &mut writer).await?
                },
                None => {
                    let mut writer = csv::Writer::from_writer(io::stdout());
                    query_batch(&reader, BufReader::new(file), &mut writer).await?
                },
            };

            eprintln!("{found} of {queried} sequences found");
            ExitCode::SUCCESS
        },
        QueryCommand::Progression { moves } => {
            let progression = reader.progression(&moves).await?;

            for ply in progression.plies.iter() {
                println!(
                    "{:>3}. {:<8} games {:>8}  white {:>6.2}%  black {:>6.2}%  draw {:>6.2}%",
                    ply.ply,
                    ply.mv,
                    ply.stats.total,
                    ply.stats.white_win_rate * 100.0,
                    ply.stats.black_win_rate * 100.0,
                    ply.stats.draw_rate * 100.0,
                );
            }

            match progression.missing {
                Some((ply, mv)) => {
                    println!("Move not found: `{mv}` at ply {ply}");
                    ExitCode::from(NOT_FOUND_EXIT_CODE)
                },
                None => ExitCode::SUCCESS,
            }
        },
        QueryCommand::Continuations { moves } => {
            match reader.continuations(&moves).await? {
                Some(continuations) => {
                    for continuation in continuations.iter() {
                        println!(
                            "{:<8} games {:>8}  white {:>6.2}%  black {:>6.2}%  draw {:>6.2}%",
                            continuation.mv,
                            continuation.stats.total,
                            continuation.stats.white_win_rate * 100.0,
                            continuation.stats.black_win_rate * 100.0,
                            continuation.stats.draw_rate * 100.0,
                        );
                    }
                    ExitCode::SUCCESS
                },
                None => {
                    println!("Sequence not found: {}", moves.iter().join(" "));
                    ExitCode::from(NOT_FOUND_EXIT_CODE)
                },
            }
        },
        QueryCommand::Summary => {
            let summary = reader.summary().await?;
            println!("nodes: {}", summary.nodes);
            print_stats(&summary.games);
            ExitCode::SUCCESS
        },
    };

    reader.close().await;
    Ok(exit_code)
}

fn print_outcome(moves: &[String], outcome: &QueryOutcome) {
    let sequence = moves.iter().join(" ");

    match outcome {
        QueryOutcome::Found(stats) => {
            println!("Statistics for {sequence}:");
            print_stats(stats);
        },
        QueryOutcome::NotFound { ply, mv } => {
            println!("Sequence not found: {sequence} (`{mv}` at ply {ply} was never observed)");
        },
    }
}

fn print_stats(stats: &Stats) {
    println!("total_games: {}", stats.total);
    println!("white_win_rate: {:.2}% ({})", stats.white_win_rate * 100.0, stats.white_wins);
    println!("black_win_rate: {:.2}% ({})", stats.black_win_rate * 100.0, stats.black_wins);
    println!("draw_rate: {:.2}% ({})", stats.draw_rate * 100.0, stats.draws);
    println!("unfinished_rate: {:.2}% ({})", stats.unfinished_rate * 100.0, stats.unfinished);
}
