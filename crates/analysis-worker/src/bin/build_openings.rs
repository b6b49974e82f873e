//! Build the opening corpus from lichess chess-openings TSV files.
//!
//! Each TSV row is `eco<TAB>name<TAB>pgn`. The row's line is replayed and the
//! final position's structural key becomes the corpus key. Translation tables
//! are merged in from a separate JSON file.
//!
//! Usage:
//!   cargo run --release --bin build-openings -- <tsv_dir> [--translations data/translations.json] [--out data/openings.json]

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::time::Instant;

use anyhow::Context;
use chess_core::openings::{CorpusFile, OpeningEntry, TranslationFile, OPENINGS_FILE_PATH};
use chess_core::GameText;

const DEFAULT_TRANSLATIONS_PATH: &str = "data/translations.json";

/// Structural key of the position at the end of `pgn`.
fn line_key(pgn: &str) -> anyhow::Result<String> {
    let game = GameText::parse(pgn)?;
    let last = game
        .positions()
        .last()
        .context("line has no positions")?;
    Ok(last.structural_key())
}

/// Parse one TSV file, skipping the header row.
///
/// Rows that fail to replay are reported and skipped. Later rows replace
/// earlier ones with the same key.
fn collect_openings(tsv: &str, openings: &mut BTreeMap<String, OpeningEntry>) -> (usize, usize) {
    let mut loaded = 0;
    let mut skipped = 0;

    for line in tsv.lines().skip(1) {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let mut parts = line.split('\t');
        let (Some(eco), Some(name), Some(pgn)) = (parts.next(), parts.next(), parts.next()) else {
            skipped += 1;
            continue;
        };

        match line_key(pgn) {
            Ok(key) => {
                openings.insert(
                    key,
                    OpeningEntry {
                        eco: eco.to_string(),
                        name: name.to_string(),
                    },
                );
                loaded += 1;
            }
            Err(e) => {
                eprintln!("  Skipping '{name}': {e}");
                skipped += 1;
            }
        }
    }

    (loaded, skipped)
}

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        eprintln!(
            "Usage: {} <tsv_dir> [--translations PATH] [--out PATH]",
            args[0]
        );
        std::process::exit(1);
    }

    let tsv_dir = &args[1];
    let mut translations_path = DEFAULT_TRANSLATIONS_PATH.to_string();
    let mut out_path = OPENINGS_FILE_PATH.to_string();

    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "--translations" => {
                if let Some(path) = args.get(i + 1) {
                    translations_path = path.clone();
                }
                i += 2;
            }
            "--out" => {
                if let Some(path) = args.get(i + 1) {
                    out_path = path.clone();
                }
                i += 2;
            }
            _ => i += 1,
        }
    }

    let pattern = format!("{tsv_dir}/*.tsv");
    let mut tsv_files: Vec<_> = glob::glob(&pattern)?.filter_map(|p| p.ok()).collect();
    tsv_files.sort();

    if tsv_files.is_empty() {
        eprintln!("No TSV files found in {tsv_dir}");
        std::process::exit(1);
    }

    println!("Building opening corpus from {} TSV files", tsv_files.len());
    let start = Instant::now();

    let mut openings = BTreeMap::new();
    for path in &tsv_files {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let (loaded, skipped) = collect_openings(&content, &mut openings);
        println!("  {}: {loaded} lines, {skipped} skipped", path.display());
    }

    let translations: TranslationFile = serde_json::from_str(
        &fs::read_to_string(&translations_path)
            .with_context(|| format!("Failed to read {translations_path}"))?,
    )
    .with_context(|| format!("Invalid translations file {translations_path}"))?;

    let corpus = CorpusFile {
        openings,
        translations,
    };
    fs::write(&out_path, serde_json::to_string_pretty(&corpus)?)
        .with_context(|| format!("Failed to write {out_path}"))?;

    println!(
        "Wrote {} positions to {out_path} in {:.1}s",
        corpus.openings.len(),
        start.elapsed().as_secs_f64()
    );
    Ok(())
}
