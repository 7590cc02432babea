use chess::{Board, ChessMove};
use crate::ingest::record::ParseError;

/// Replays SAN moves from the initial position, rejecting any move that isn't legal where
/// it is played.
#[derive(Clone, Debug, Default)]
pub struct BoardReplay {
    board: Board,
    ply: usize,
}

impl BoardReplay {
    pub fn play(&mut self, mv: &str) -> Result<(), ParseError> {
        self.ply += 1;

        let illegal = || ParseError::IllegalMove {
            ply: self.ply,
            mv: mv.to_string(),
        };

        // annotations and check markers aren't part of the move itself, and the board only
        // reads promotions written without `=` (`e8Q`, not `e8=Q`)
        let san = mv
            .trim_end_matches(|c| matches!(c, '+' | '#' | '!' | '?'))
            .replace('=', "");
        let chess_move = ChessMove::from_san(&self.board, &san).map_err(|_| illegal())?;

        if !self.board.legal(chess_move) {
            return Err(illegal());
        }

        self.board = self.board.make_move_new(chess_move);
        Ok(())
    }
}
