use std::fs::OpenOptions;
use std::io;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::fmt::Display;

pub const DEFAULT_ERROR_LOG_PATH: &str = "error_log.txt";

/// Append-only log of the records the pipeline skipped.
///
/// Entries are held back until the batch they belong to commits, so the file never
/// mentions a record whose batch was lost.
#[derive(Debug)]
pub struct ErrorLog {
    path: PathBuf,
    pending: Vec<String>,
}

impl ErrorLog {
    pub fn new(path: impl Into<PathBuf>) -> ErrorLog {
        ErrorLog {
            path: path.into(),
            pending: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&mut self, line_number: u64, raw: &str, error: &impl Display) {
        self.pending.push(format_entry(line_number, raw, error));
    }

    /// Appends the held back entries. The file is created if needed and never truncated.
    pub fn flush(&mut self) -> io::Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut writer = BufWriter::new(file);

        for entry in self.pending.iter() {
            writeln!(writer, "{entry}")?;
        }
        writer.flush()?;

        self.pending.clear();
        Ok(())
    }

    /// Forgets entries of a batch that never committed.
    pub fn discard(&mut self) {
        self.pending.clear();
    }
}

pub fn format_entry(line_number: u64, raw: &str, error: &impl Display) -> String {
    format!("line {line_number}: {raw}. Error: {error}")
}
