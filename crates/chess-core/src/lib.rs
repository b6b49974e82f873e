//! Chess primitives shared by the analysis worker and the import path:
//! move-text replay, position snapshots, and opening classification.

pub mod openings;
pub mod pgn;
pub mod positions;

pub use openings::{OpeningBook, OpeningDetector, OpeningEntry, OpeningMatch, TranslationTables};
pub use pgn::{GameText, GameTextError};
pub use positions::{structural_key, PositionSnapshot, Positions};
