use serde::Serialize;
use crate::store::rows::{Counters, Outcome};

/// Aggregate statistics at one node. A node that exists but saw no games has a total of 0
/// and all rates at 0.
#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct Stats {
    pub white_wins: u64,
    pub black_wins: u64,
    pub draws: u64,
    pub unfinished: u64,
    pub total: u64,
    pub white_win_rate: f64,
    pub black_win_rate: f64,
    pub draw_rate: f64,
    pub unfinished_rate: f64,
}

impl Stats {
    pub fn rate(&self, outcome: Outcome) -> f64 {
        match outcome {
            Outcome::WhiteWin => self.white_win_rate,
            Outcome::BlackWin => self.black_win_rate,
            Outcome::Draw => self.draw_rate,
            Outcome::Unfinished => self.unfinished_rate,
        }
    }
}

impl From<Counters> for Stats {
    fn from(counters: Counters) -> Self {
        let total = counters.total();
        let rate = |count: u64| match total {
            0 => 0.0,
            _ => count as f64 / total as f64,
        };

        Stats {
            white_wins: counters.white_wins,
            black_wins: counters.black_wins,
            draws: counters.draws,
            unfinished: counters.unfinished,
            total,
            white_win_rate: rate(counters.white_wins),
            black_win_rate: rate(counters.black_wins),
            draw_rate: rate(counters.draws),
            unfinished_rate: rate(counters.unfinished),
        }
    }
}
