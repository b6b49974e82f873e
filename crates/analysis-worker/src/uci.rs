//! UCI line protocol: commands, `info`/`bestmove` parsing and score normalization.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub const UCI: &str = "uci";
pub const UCI_OK: &str = "uciok";
pub const IS_READY: &str = "isready";
pub const READY_OK: &str = "readyok";
pub const QUIT: &str = "quit";

pub fn set_option_command(name: &str, value: impl fmt::Display) -> String {
    format!("setoption name {name} value {value}")
}

pub fn position_command(fen: &str) -> String {
    format!("position fen {fen}")
}

pub fn go_depth_command(depth: u32) -> String {
    format!("go depth {depth}")
}

/// Score as reported by the engine, relative to the side to move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawScore {
    Cp(i32),
    Mate(i32),
}

/// Score from white's perspective.
///
/// Text form: centipawns as pawns with up to two decimals (`0.29`, `-1.5`, `3`)
/// or a mate distance (`M2`, `M-3`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Score {
    Centipawns(i32),
    Mate(i32),
}

impl Score {
    /// Flip an engine score to white's point of view.
    pub fn normalize(raw: RawScore, white_to_move: bool) -> Self {
        let sign = if white_to_move { 1 } else { -1 };
        match raw {
            RawScore::Cp(cp) => Score::Centipawns(cp * sign),
            RawScore::Mate(n) => Score::Mate(n * sign),
        }
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Score::Mate(n) => write!(f, "M{n}"),
            Score::Centipawns(cp) => {
                let sign = if cp < 0 { "-" } else { "" };
                let abs = cp.unsigned_abs();
                let (pawns, hundredths) = (abs / 100, abs % 100);
                match hundredths {
                    0 => write!(f, "{sign}{pawns}"),
                    h if h % 10 == 0 => write!(f, "{sign}{pawns}.{}", h / 10),
                    h => write!(f, "{sign}{pawns}.{h:02}"),
                }
            }
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("Invalid score: {0:?}")]
pub struct ScoreParseError(String);

impl FromStr for Score {
    type Err = ScoreParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ScoreParseError(s.to_string());
        let s = s.trim();

        if let Some(mate) = s.strip_prefix('M') {
            return mate.parse().map(Score::Mate).map_err(|_| invalid());
        }

        let (negative, digits) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let (whole, frac) = digits.split_once('.').unwrap_or((digits, ""));
        if whole.is_empty() || !whole.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        if !frac.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }

        let pawns: i32 = whole.parse().map_err(|_| invalid())?;
        let hundredths: i32 = match frac.len() {
            0 => 0,
            1 => frac.parse::<i32>().map_err(|_| invalid())? * 10,
            2 => frac.parse().map_err(|_| invalid())?,
            _ => return Err(invalid()),
        };

        let cp = pawns
            .checked_mul(100)
            .and_then(|v| v.checked_add(hundredths))
            .ok_or_else(invalid)?;
        Ok(Score::Centipawns(if negative { -cp } else { cp }))
    }
}

impl Serialize for Score {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Score {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// One scored `info` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoLine {
    pub depth: u32,
    pub multipv: u32,
    pub score: RawScore,
    pub pv: Vec<String>,
}

/// Parse an `info` line carrying a depth and a score.
///
/// The pv may be empty: a mated or stalemated side gets `info depth 0 score mate 0`.
/// Progress lines (`currmove`, `hashfull`, `string`) return `None`.
pub fn parse_info(line: &str) -> Option<InfoLine> {
    let mut tokens = line.split_whitespace();
    if tokens.next()? != "info" {
        return None;
    }

    let mut depth = None;
    let mut multipv = 1;
    let mut score = None;
    let mut pv = Vec::new();

    while let Some(token) = tokens.next() {
        match token {
            "depth" => depth = tokens.next().and_then(|v| v.parse().ok()),
            "multipv" => multipv = tokens.next().and_then(|v| v.parse().ok()).unwrap_or(1),
            "score" => {
                score = match (tokens.next(), tokens.next().and_then(|v| v.parse().ok())) {
                    (Some("cp"), Some(v)) => Some(RawScore::Cp(v)),
                    (Some("mate"), Some(v)) => Some(RawScore::Mate(v)),
                    _ => None,
                };
            }
            "pv" => {
                // pv runs to the end of the line unless a trailing keyword follows
                pv.extend(
                    tokens
                        .by_ref()
                        .take_while(|t| !t.starts_with("bmc") && *t != "string")
                        .map(String::from),
                );
            }
            "string" => break,
            _ => {}
        }
    }

    Some(InfoLine {
        depth: depth?,
        multipv,
        score: score?,
        pv,
    })
}

/// Final `bestmove` line. The move is kept verbatim, including `(none)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BestMove {
    pub best: Option<String>,
}

pub fn parse_bestmove(line: &str) -> Option<BestMove> {
    let mut tokens = line.split_whitespace();
    if tokens.next()? != "bestmove" {
        return None;
    }
    Some(BestMove {
        best: tokens.next().map(String::from),
    })
}

/// Result of searching one position, already normalized to white's view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineEvaluation {
    pub score: Score,
    pub best_move: String,
    pub pv: Vec<String>,
    pub depth: u32,
    /// Rank of the reported line (1 = best).
    pub multipv: u32,
}

/// Collects search output until the engine reports its best move.
#[derive(Debug, Default)]
pub struct SearchLines {
    latest: Option<InfoLine>,
}

impl SearchLines {
    /// Feed one output line; returns the best move once the search is over.
    pub fn feed(&mut self, line: &str) -> Option<BestMove> {
        let line = line.trim();
        if let Some(info) = parse_info(line) {
            if info.multipv == 1 {
                self.latest = Some(info);
            }
            return None;
        }
        parse_bestmove(line)
    }

    /// Combine the deepest primary line with the best move.
    ///
    /// `None` when the engine never reported a score.
    pub fn finish(self, best: BestMove, white_to_move: bool) -> Option<EngineEvaluation> {
        let info = self.latest?;
        let best_move = best
            .best
            .or_else(|| info.pv.first().cloned())
            .unwrap_or_else(|| "(none)".to_string());

        Some(EngineEvaluation {
            score: Score::normalize(info.score, white_to_move),
            best_move,
            pv: info.pv,
            depth: info.depth,
            multipv: info.multipv,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(lines: &[&str], white_to_move: bool) -> Option<EngineEvaluation> {
        let mut search = SearchLines::default();
        for line in lines {
            if let Some(best) = search.feed(line) {
                return search.finish(best, white_to_move);
            }
        }
        None
    }

    #[test]
    fn test_parse_info_line() {
        let info = parse_info(
            "info depth 20 seldepth 25 multipv 1 score cp 35 nodes 100000 nps 1200000 pv e2e4 e7e5 g1f3",
        )
        .unwrap();
        assert_eq!(info.depth, 20);
        assert_eq!(info.multipv, 1);
        assert_eq!(info.score, RawScore::Cp(35));
        assert_eq!(info.pv, vec!["e2e4", "e7e5", "g1f3"]);
    }

    #[test]
    fn test_parse_info_ignores_progress_lines() {
        assert!(parse_info("info depth 12 currmove e2e4 currmovenumber 1").is_none());
        assert!(parse_info("info string NNUE evaluation using nn-1111.nnue").is_none());
        assert!(parse_info("bestmove e2e4").is_none());
    }

    #[test]
    fn test_parse_info_bound_scores() {
        let info = parse_info("info depth 8 score cp -40 upperbound nodes 500 pv d7d5").unwrap();
        assert_eq!(info.score, RawScore::Cp(-40));
        let info = parse_info("info depth 30 score mate -3 pv h7h6 d1h5").unwrap();
        assert_eq!(info.score, RawScore::Mate(-3));
    }

    #[test]
    fn test_parse_bestmove() {
        let best = parse_bestmove("bestmove e2e4 ponder e7e5").unwrap();
        assert_eq!(best.best.as_deref(), Some("e2e4"));

        let none = parse_bestmove("bestmove (none)").unwrap();
        assert_eq!(none.best.as_deref(), Some("(none)"));
    }

    #[test]
    fn test_white_to_move_keeps_sign() {
        let eval = run(
            &[
                "info depth 1 seldepth 1 multipv 1 score cp 12 nodes 20 pv d2d4",
                "info depth 10 seldepth 14 multipv 1 score cp 29 nodes 9000 pv e2e4 e7e5",
                "bestmove e2e4 ponder e7e5",
            ],
            true,
        )
        .unwrap();
        assert_eq!(eval.score.to_string(), "0.29");
        assert_eq!(eval.best_move, "e2e4");
        assert_eq!(eval.depth, 10);
        assert_eq!(eval.multipv, 1);
        assert_eq!(eval.pv, vec!["e2e4", "e7e5"]);
    }

    #[test]
    fn test_black_to_move_flips_sign() {
        let eval = run(
            &["info depth 10 score cp 35 pv e7e5", "bestmove e7e5"],
            false,
        )
        .unwrap();
        assert_eq!(eval.score, Score::Centipawns(-35));
        assert_eq!(eval.score.to_string(), "-0.35");
    }

    #[test]
    fn test_mate_scores() {
        let eval = run(
            &["info depth 5 score mate 2 pv d1h5 g7g6 h5e5", "bestmove d1h5"],
            true,
        )
        .unwrap();
        assert_eq!(eval.score.to_string(), "M2");

        let eval = run(
            &["info depth 5 score mate 3 pv d8h4", "bestmove d8h4"],
            false,
        )
        .unwrap();
        assert_eq!(eval.score.to_string(), "M-3");
    }

    #[test]
    fn test_secondary_lines_do_not_override_primary() {
        let eval = run(
            &[
                "info depth 10 multipv 1 score cp 50 pv e2e4",
                "info depth 10 multipv 2 score cp -10 pv a2a3",
                "bestmove e2e4",
            ],
            true,
        )
        .unwrap();
        assert_eq!(eval.score, Score::Centipawns(50));
    }

    #[test]
    fn test_bestmove_without_score() {
        assert!(run(&["info string ready", "bestmove (none)"], true).is_none());
    }

    #[test]
    fn test_terminal_position_keeps_none_move() {
        let eval = run(&["info depth 0 score mate 0", "bestmove (none)"], false).unwrap();
        assert_eq!(eval.best_move, "(none)");
        assert_eq!(eval.score, Score::Mate(0));
    }

    #[test]
    fn test_score_text_form() {
        assert_eq!(Score::Centipawns(0).to_string(), "0");
        assert_eq!(Score::Centipawns(100).to_string(), "1");
        assert_eq!(Score::Centipawns(150).to_string(), "1.5");
        assert_eq!(Score::Centipawns(-5).to_string(), "-0.05");
        assert_eq!(Score::Centipawns(-1234).to_string(), "-12.34");
        assert_eq!(Score::Mate(-1).to_string(), "M-1");
    }

    #[test]
    fn test_score_parse() {
        assert_eq!("0.29".parse(), Ok(Score::Centipawns(29)));
        assert_eq!("-0.35".parse(), Ok(Score::Centipawns(-35)));
        assert_eq!("1.5".parse(), Ok(Score::Centipawns(150)));
        assert_eq!("3".parse(), Ok(Score::Centipawns(300)));
        assert_eq!("M-3".parse(), Ok(Score::Mate(-3)));
        assert!("0.123".parse::<Score>().is_err());
        assert!("M".parse::<Score>().is_err());
        assert!("abc".parse::<Score>().is_err());
    }

    #[test]
    fn test_score_serializes_as_text() {
        let json = serde_json::to_string(&vec![Score::Centipawns(29), Score::Mate(-2)]).unwrap();
        assert_eq!(json, r#"["0.29","M-2"]"#);
        let back: Vec<Score> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, vec![Score::Centipawns(29), Score::Mate(-2)]);
    }
}
