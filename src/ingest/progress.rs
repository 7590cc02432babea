use indicatif::{ProgressBar, ProgressStyle};

/// Receives the "records processed / total" signal of a run. Purely observational.
pub trait ProgressReporter {
    fn set_total(&mut self, total: u64);

    /// `processed` only ever grows during a run.
    fn advance(&mut self, processed: u64);

    fn finish(&mut self, committed: u64, skipped: u64);
}

#[derive(Copy, Clone, Debug, Default)]
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn set_total(&mut self, _total: u64) {}

    fn advance(&mut self, _processed: u64) {}

    fn finish(&mut self, _committed: u64, _skipped: u64) {}
}

// Redrawing on every line slows down large inputs.
const REDRAW_EVERY: u64 = 1000;

impl ProgressReporter for ProgressBar {
    fn set_total(&mut self, total: u64) {
        self.set_length(total);
    }

    fn advance(&mut self, processed: u64) {
        if processed % REDRAW_EVERY == 0 || Some(processed) == self.length() {
            self.set_position(processed);
        }
    }

    fn finish(&mut self, committed: u64, skipped: u64) {
        self.finish_with_message(format!("committed {committed}, skipped {skipped}"));
    }
}

pub fn ingest_progress_bar(total: u64) -> ProgressBar {
    let bar = ProgressBar::new(total);

    if let Ok(style) = ProgressStyle::default_bar()
        .template("Processing games [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
    {
        bar.set_style(style.progress_chars("##-"));
    }

    bar
}
