//! Position snapshots produced by replaying a game.

use shakmaty::{fen::Fen, Chess, Color, EnPassantMode, Move, Position};

/// Board state after one half-move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionSnapshot {
    /// 0-based half-move index (0 = position after the first move).
    pub ply: usize,
    /// Full FEN including move counters.
    pub fen: String,
    pub side_to_move: Color,
}

impl PositionSnapshot {
    fn capture(ply: usize, board: &Chess) -> Self {
        Self {
            ply,
            fen: Fen::from_position(board, EnPassantMode::Legal).to_string(),
            side_to_move: board.turn(),
        }
    }

    pub fn is_white_to_move(&self) -> bool {
        self.side_to_move == Color::White
    }

    /// Transposition-invariant lookup key (no move counters).
    pub fn structural_key(&self) -> String {
        structural_key(&self.fen)
    }
}

/// Strips move counters from a FEN, keeping placement + side + castling + ep.
pub fn structural_key(fen: &str) -> String {
    fen.split_whitespace().take(4).collect::<Vec<_>>().join(" ")
}

/// Lazy replay over a validated move list.
pub struct Positions<'a> {
    board: Chess,
    moves: std::slice::Iter<'a, Move>,
    ply: usize,
}

impl<'a> Positions<'a> {
    pub(crate) fn new(start: Chess, moves: &'a [Move]) -> Self {
        Self {
            board: start,
            moves: moves.iter(),
            ply: 0,
        }
    }
}

impl Iterator for Positions<'_> {
    type Item = PositionSnapshot;

    fn next(&mut self) -> Option<PositionSnapshot> {
        let mv = self.moves.next()?;
        // Moves were validated when the game was parsed, so this only fails
        // if the list was built from a different start position.
        self.board = self.board.clone().play(mv.clone()).ok()?;

        let snapshot = PositionSnapshot::capture(self.ply, &self.board);
        self.ply += 1;
        Some(snapshot)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.moves.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pgn::GameText;

    #[test]
    fn test_one_snapshot_per_half_move() {
        let game = GameText::parse("1. e4 e5 2. Nf3 Nc6 *").unwrap();
        let snapshots: Vec<_> = game.positions().collect();

        assert_eq!(snapshots.len(), 4);
        assert_eq!(
            snapshots.iter().map(|s| s.ply).collect::<Vec<_>>(),
            vec![0, 1, 2, 3]
        );
        assert_eq!(
            snapshots[0].fen,
            "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1"
        );
        assert_eq!(snapshots[0].side_to_move, Color::Black);
        assert!(snapshots[1].is_white_to_move());
    }

    #[test]
    fn test_replay_is_restartable() {
        let game = GameText::parse("1. d4 d5 2. c4 e6 *").unwrap();
        let first: Vec<_> = game.positions().collect();
        let second: Vec<_> = game.positions().collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_structural_key_drops_counters() {
        let key = structural_key("rnbqkbnr/pppp1ppp/8/4p3/4P3/8/PPPP1PPP/RNBQKBNR w KQkq - 0 2");
        assert_eq!(key, "rnbqkbnr/pppp1ppp/8/4p3/4P3/8/PPPP1PPP/RNBQKBNR w KQkq -");
    }

    #[test]
    fn test_en_passant_square_only_when_capturable() {
        // After 1. e4 no black pawn can take on e3.
        let game = GameText::parse("1. e4 *").unwrap();
        let snapshot = game.positions().next().unwrap();
        assert!(snapshot.structural_key().ends_with(" -"));

        // After 1. e4 d5 2. e5 f5 white can capture exf6.
        let game = GameText::parse("1. e4 d5 2. e5 f5 *").unwrap();
        let last = game.positions().last().unwrap();
        assert!(last.structural_key().ends_with(" f6"));
    }
}
