use std::num::NonZeroUsize;
use std::path::PathBuf;
use clap::{Parser, Subcommand};
use crate::ingest::IngestConfig;
use crate::ingest::error_log::DEFAULT_ERROR_LOG_PATH;
use crate::store::DEFAULT_DB_PATH;

#[derive(Parser, Debug)]
#[command(author, version)]
#[command(about = "Ingests games into the move tree, one game per line: moves followed by a result tag.")]
pub struct IngestArgs {
    /// The file of games to ingest.
    pub input: PathBuf,

    /// The path of the DB to write to. Created if it doesn't exist.
    #[arg(short, long = "db", env = "MOVETREE_DB", default_value = DEFAULT_DB_PATH)]
    pub db_path: PathBuf,

    /// How many records are committed per transaction.
    #[arg(short, long, env = "MOVETREE_BATCH_SIZE", default_value = "1000")]
    pub batch_size: NonZeroUsize,

    /// Skipped records are appended here.
    #[arg(short, long, default_value = DEFAULT_ERROR_LOG_PATH)]
    pub error_log: PathBuf,

    /// Replays every game on a board and rejects illegal SAN moves.
    #[arg(long, default_value_t = false)]
    pub validate_moves: bool,

    /// Continues the latest unfinished run over the same input.
    #[arg(long, default_value_t = false)]
    pub resume: bool,

    /// Disables the progress bar.
    #[arg(short, long, default_value_t = false)]
    pub quiet: bool,
}

impl IngestArgs {
    pub fn ingest_config(&self) -> IngestConfig {
        IngestConfig {
            batch_size: self.batch_size,
            validate_moves: self.validate_moves,
            resume: self.resume,
            error_log: self.error_log.clone(),
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version)]
#[command(about = "Looks up outcome statistics of move sequences in the move tree.")]
pub struct QueryArgs {
    /// The path of the DB to read from.
    #[arg(short, long = "db", global = true, env = "MOVETREE_DB", default_value = DEFAULT_DB_PATH)]
    pub db_path: PathBuf,

    #[command(subcommand)]
    pub command: QueryCommand,
}

#[derive(Subcommand, Debug)]
pub enum QueryCommand {
    /// Statistics of the games that reached a move sequence.
    Query {
        moves: Vec<String>,

        /// Prints the result as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Resolves a file of move sequences (one per line) into CSV.
    QueryFile {
        input: PathBuf,

        /// Where to write the CSV. Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Statistics after every ply of a move sequence.
    Progression {
        moves: Vec<String>,
    },
    /// The observed next moves after a sequence, most played first.
    Continuations {
        moves: Vec<String>,
    },
    /// Node and game counts of the whole tree.
    Summary,
}
