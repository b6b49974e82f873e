//! Move text replay: validates PGN movetext by playing it on a board.
//!
//! Tokenizing is left to `pgn-reader` and legality to `shakmaty`; this module
//! only keeps the ordered move list and the start position so the game can be
//! replayed again later.

use std::ops::ControlFlow;

use pgn_reader::{RawTag, Reader, SanPlus, Skip, Visitor};
use shakmaty::{fen::Fen, CastlingMode, Chess, Move, Position};

use crate::positions::Positions;

/// Why a piece of move text could not be replayed.
#[derive(Debug, thiserror::Error)]
pub enum GameTextError {
    #[error("Move text contains no moves")]
    Empty,

    #[error("Illegal move {san} at half-move {ply}")]
    IllegalMove { ply: usize, san: String },

    #[error("Invalid FEN tag: {0}")]
    InvalidFen(String),

    #[error("Failed to read move text: {0}")]
    Io(#[from] std::io::Error),
}

/// A validated game: start position plus the legal moves played from it.
#[derive(Debug, Clone)]
pub struct GameText {
    start: Chess,
    moves: Vec<Move>,
}

impl GameText {
    /// Replay the first game found in `text`.
    ///
    /// Tag pairs are optional. A `[FEN "..."]` tag selects the start position;
    /// comments, NAGs and variations are ignored.
    pub fn parse(text: &str) -> Result<Self, GameTextError> {
        let mut reader = Reader::new(text.as_bytes());
        let mut replay = Replay;

        let game = match reader.read_game(&mut replay)? {
            Some(result) => result?,
            None => return Err(GameTextError::Empty),
        };

        if game.moves.is_empty() {
            return Err(GameTextError::Empty);
        }
        Ok(game)
    }

    pub fn start(&self) -> &Chess {
        &self.start
    }

    /// Number of half-moves in the game.
    pub fn len(&self) -> usize {
        self.moves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }

    /// Lazily replay the game, yielding the position after every half-move.
    ///
    /// Each call starts over from the initial position.
    pub fn positions(&self) -> Positions<'_> {
        Positions::new(self.start.clone(), &self.moves)
    }
}

/// Build a start position from a FEN tag value.
fn start_position(fen: &str) -> Result<Chess, GameTextError> {
    let fen: Fen = fen
        .trim()
        .parse()
        .map_err(|e| GameTextError::InvalidFen(format!("{fen}: {e}")))?;
    fen.into_position::<Chess>(CastlingMode::Standard)
        .map_err(|e| GameTextError::InvalidFen(e.to_string()))
}

#[derive(Default)]
struct ReplayTags {
    fen: Option<String>,
}

struct ReplayState {
    start: Chess,
    board: Chess,
    moves: Vec<Move>,
}

/// Visitor that plays every mainline SAN and stops at the first illegal one.
struct Replay;

impl Visitor for Replay {
    type Tags = ReplayTags;
    type Movetext = ReplayState;
    type Output = Result<GameText, GameTextError>;

    fn begin_tags(&mut self) -> ControlFlow<Self::Output, ReplayTags> {
        ControlFlow::Continue(ReplayTags::default())
    }

    fn tag(
        &mut self,
        tags: &mut ReplayTags,
        name: &[u8],
        value: RawTag<'_>,
    ) -> ControlFlow<Self::Output> {
        if name == b"FEN" {
            tags.fen = Some(value.decode_utf8_lossy().into_owned());
        }
        ControlFlow::Continue(())
    }

    fn begin_movetext(&mut self, tags: ReplayTags) -> ControlFlow<Self::Output, ReplayState> {
        let start = match tags.fen.as_deref() {
            Some(fen) => match start_position(fen) {
                Ok(position) => position,
                Err(e) => return ControlFlow::Break(Err(e)),
            },
            None => Chess::default(),
        };

        ControlFlow::Continue(ReplayState {
            board: start.clone(),
            start,
            moves: Vec::new(),
        })
    }

    fn san(&mut self, state: &mut ReplayState, san_plus: SanPlus) -> ControlFlow<Self::Output> {
        let ply = state.moves.len();
        let illegal = || GameTextError::IllegalMove {
            ply,
            san: san_plus.to_string(),
        };

        let mv = match san_plus.san.to_move(&state.board) {
            Ok(mv) => mv,
            Err(_) => return ControlFlow::Break(Err(illegal())),
        };

        match state.board.clone().play(mv.clone()) {
            Ok(next) => {
                state.board = next;
                state.moves.push(mv);
                ControlFlow::Continue(())
            }
            Err(_) => ControlFlow::Break(Err(illegal())),
        }
    }

    fn begin_variation(&mut self, _state: &mut ReplayState) -> ControlFlow<Self::Output, Skip> {
        ControlFlow::Continue(Skip(true)) // mainline only
    }

    fn end_game(&mut self, state: ReplayState) -> Self::Output {
        Ok(GameText {
            start: state.start,
            moves: state.moves,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_movetext() {
        let game = GameText::parse("1. e4 e5 2. Nf3 Nc6 3. Bb5 a6 *").unwrap();
        assert_eq!(game.len(), 6);
    }

    #[test]
    fn test_parse_with_headers_and_comments() {
        let pgn = r#"[White "Player1"]
[Black "Player2"]
[Result "1-0"]

1. e4 {best by test} e5 2. Nf3 (2. f4 exf4) Nc6 1-0"#;

        let game = GameText::parse(pgn).unwrap();
        assert_eq!(game.len(), 4);
    }

    #[test]
    fn test_nested_variations_stay_off_the_mainline() {
        let annotated =
            GameText::parse("1. e4 e5 2. Nf3 (2. Nc3 Nf6 (2... Nc6 3. f4)) Nc6 3. Bb5 $1 a6 *")
                .unwrap();
        let plain = GameText::parse("1. e4 e5 2. Nf3 Nc6 3. Bb5 a6 *").unwrap();

        assert_eq!(annotated.len(), 6);
        let fens = |game: &GameText| game.positions().map(|p| p.fen).collect::<Vec<_>>();
        assert_eq!(fens(&annotated), fens(&plain));
    }

    #[test]
    fn test_illegal_move_reports_ply() {
        let err = GameText::parse("1. e4 e5 2. Ke3 *").unwrap_err();
        match err {
            GameTextError::IllegalMove { ply, san } => {
                assert_eq!(ply, 2);
                assert_eq!(san, "Ke3");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_empty_movetext_is_rejected() {
        assert!(matches!(GameText::parse("*"), Err(GameTextError::Empty)));
        assert!(matches!(GameText::parse(""), Err(GameTextError::Empty)));
    }

    #[test]
    fn test_fen_tag_sets_start_position() {
        let pgn = r#"[SetUp "1"]
[FEN "4k3/8/8/8/8/8/4P3/4K3 w - - 0 1"]

1. e4 Kd7 *"#;

        let game = GameText::parse(pgn).unwrap();
        assert_eq!(game.len(), 2);
        let last = game.positions().last().unwrap();
        assert_eq!(last.fen, "8/3k4/8/8/4P3/8/8/4K3 w - - 1 2");
    }

    #[test]
    fn test_invalid_fen_tag() {
        let pgn = r#"[FEN "not a fen"]

1. e4 *"#;
        assert!(matches!(
            GameText::parse(pgn),
            Err(GameTextError::InvalidFen(_))
        ));
    }
}
