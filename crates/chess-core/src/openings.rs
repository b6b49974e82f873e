//! Opening classification against a static corpus.
//!
//! The corpus maps structural keys (first four FEN fields) to ECO code and
//! English name. It is loaded once at startup and handed to the detector; the
//! matched name is localized through a root-name table and a structural-term
//! table shipped in the same file.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::pgn::GameText;

/// Half-moves scanned from the start of the game.
pub const MAX_HALFMOVES: usize = 40;

/// Default path to the corpus file.
pub const OPENINGS_FILE_PATH: &str = "data/openings.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpeningEntry {
    pub eco: String,
    pub name: String,
}

/// A corpus hit for a concrete game.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpeningMatch {
    /// 0-based half-move index where the entry was found.
    pub ply: usize,
    pub eco: String,
    pub name: String,
}

#[derive(Debug, thiserror::Error)]
pub enum CorpusError {
    #[error("Failed to read opening corpus: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid opening corpus JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// On-disk translation tables.
///
/// `structural_terms` keeps file order (serde_json `preserve_order`): terms
/// are tried in that order and the first hit wins.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranslationFile {
    #[serde(default)]
    pub root_names: BTreeMap<String, String>,
    #[serde(default)]
    pub structural_terms: serde_json::Map<String, JsonValue>,
}

/// On-disk corpus layout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorpusFile {
    pub openings: BTreeMap<String, OpeningEntry>,
    #[serde(default)]
    pub translations: TranslationFile,
}

/// Localization tables for opening names.
#[derive(Debug, Clone, Default)]
pub struct TranslationTables {
    root_names: HashMap<String, String>,
    structural_terms: Vec<(String, String)>,
}

impl TranslationTables {
    pub fn new(root_names: HashMap<String, String>, structural_terms: Vec<(String, String)>) -> Self {
        Self {
            root_names,
            structural_terms,
        }
    }

    fn from_file(file: TranslationFile) -> Self {
        let structural_terms = file
            .structural_terms
            .into_iter()
            .filter_map(|(term, localized)| match localized {
                JsonValue::String(localized) => Some((term, localized)),
                other => {
                    warn!(term = %term, value = %other, "Skipping non-string structural term");
                    None
                }
            })
            .collect();

        Self {
            root_names: file.root_names.into_iter().collect(),
            structural_terms,
        }
    }

    /// Localize a corpus name of the shape `Root[: Variant[, Sub...]]` or `Root, Variant`.
    pub fn localize(&self, name: &str) -> String {
        let (mut root, mut variant) = match name.split_once(": ") {
            Some((root, variant)) => (root, Some(variant)),
            None => (name, None),
        };

        if variant.is_none() && !self.root_names.contains_key(root) {
            if let Some((head, tail)) = root.split_once(", ") {
                if self.root_names.contains_key(head) {
                    root = head;
                    variant = Some(tail);
                }
            }
        }

        let localized_root = match self.root_names.get(root) {
            Some(localized) => localized.clone(),
            None => self.substitute_terms(root),
        };

        match variant {
            None => localized_root,
            Some(variant) => {
                let parts: Vec<String> = variant
                    .split(", ")
                    .map(|part| self.substitute_terms(part))
                    .collect();
                format!("{localized_root}, {}", parts.join(", "))
            }
        }
    }

    /// Put the first known term (in table order) first, followed by what remains.
    fn substitute_terms(&self, text: &str) -> String {
        for (term, localized) in &self.structural_terms {
            if text.contains(term.as_str()) {
                let stripped = text.replace(term.as_str(), "");
                let remainder = stripped.trim();
                if remainder.is_empty() {
                    return localized.clone();
                }
                return format!("{localized} {remainder}");
            }
        }
        text.to_string()
    }
}

/// The opening corpus plus its translation tables. Immutable once built.
#[derive(Debug, Clone, Default)]
pub struct OpeningBook {
    openings: HashMap<String, OpeningEntry>,
    translations: TranslationTables,
}

impl OpeningBook {
    pub fn new(openings: HashMap<String, OpeningEntry>, translations: TranslationTables) -> Self {
        Self {
            openings,
            translations,
        }
    }

    pub fn from_corpus(corpus: CorpusFile) -> Self {
        Self {
            openings: corpus.openings.into_iter().collect(),
            translations: TranslationTables::from_file(corpus.translations),
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, CorpusError> {
        let corpus: CorpusFile = serde_json::from_str(json)?;
        Ok(Self::from_corpus(corpus))
    }

    /// Load the corpus from a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, CorpusError> {
        let data = fs::read_to_string(path)?;
        Self::from_json_str(&data)
    }

    pub fn len(&self) -> usize {
        self.openings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.openings.is_empty()
    }

    pub fn lookup(&self, key: &str) -> Option<&OpeningEntry> {
        self.openings.get(key)
    }

    pub fn translations(&self) -> &TranslationTables {
        &self.translations
    }
}

/// Best-effort opening classifier for imported games.
#[derive(Debug, Clone)]
pub struct OpeningDetector {
    book: Arc<OpeningBook>,
}

impl OpeningDetector {
    pub fn new(book: Arc<OpeningBook>) -> Self {
        Self { book }
    }

    /// Localized name of the deepest corpus entry reached, if any.
    ///
    /// Never fails: unreplayable move text simply has no opening.
    pub fn detect(&self, move_text: &str) -> Option<String> {
        let found = self.detect_entry(move_text)?;
        Some(self.book.translations().localize(&found.name))
    }

    /// Raw corpus hit (English name and ECO code) for the given move text.
    pub fn detect_entry(&self, move_text: &str) -> Option<OpeningMatch> {
        match GameText::parse(move_text) {
            Ok(game) => self.detect_in(&game),
            Err(e) => {
                debug!(error = %e, "Move text did not replay, no opening");
                None
            }
        }
    }

    /// Scan the first `MAX_HALFMOVES` positions of an already parsed game.
    ///
    /// Every hit replaces the previous one, so the entry found at the largest
    /// half-move index is reported.
    pub fn detect_in(&self, game: &GameText) -> Option<OpeningMatch> {
        let mut deepest = None;

        for snapshot in game.positions().take(MAX_HALFMOVES) {
            if let Some(entry) = self.book.lookup(&snapshot.structural_key()) {
                deepest = Some(OpeningMatch {
                    ply: snapshot.ply,
                    eco: entry.eco.clone(),
                    name: entry.name.clone(),
                });
            }
        }

        deepest
    }
}
