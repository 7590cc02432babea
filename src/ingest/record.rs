use std::fmt::{Display, Formatter};
use std::str::FromStr;
use itertools::Itertools;
use thiserror::Error;
use crate::store::rows::Outcome;

/// One game of the input stream: its moves in order, and how it ended.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GameRecord {
    pub moves: Vec<String>,
    pub outcome: Outcome,
}

#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum ParseError {
    #[error("Invalid game line format: expected at least one move followed by a result")]
    TooFewTokens,
    #[error("Invalid result: {0}")]
    UnknownResult(String),
    #[error("Line is not valid UTF-8")]
    InvalidEncoding,
    #[error("Illegal move `{mv}` at ply {ply}")]
    IllegalMove {
        ply: usize,
        mv: String,
    },
}

impl Display for GameRecord {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.moves.iter().join(" "), self.outcome)
    }
}

impl FromStr for GameRecord {
    type Err = ParseError;

    /// Whitespace separated move tokens, the last token being one of the result tags.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut tokens = s.split_whitespace().collect::<Vec<_>>();

        if tokens.len() < 2 {
            return Err(ParseError::TooFewTokens);
        }

        let result = tokens.pop().ok_or(ParseError::TooFewTokens)?;
        let outcome = Outcome::from_tag(result)
            .ok_or_else(|| ParseError::UnknownResult(result.to_string()))?;

        Ok(GameRecord {
            moves: tokens.into_iter().map(|x| x.to_string()).collect(),
            outcome,
        })
    }
}

impl GameRecord {
    pub fn from_bytes(line: &[u8]) -> Result<GameRecord, ParseError> {
        let line = std::str::from_utf8(line).map_err(|_| ParseError::InvalidEncoding)?;
        GameRecord::from_str(line)
    }
}
