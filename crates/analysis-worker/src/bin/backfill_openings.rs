//! Detect and store opening names for existing games.
//!
//! Only games without an opening name are processed unless `--force` is given.
//! Games whose opening cannot be detected are left unchanged.
//!
//! Usage:
//!   cargo run -p analysis-worker --bin backfill-openings [-- --force]
//!
//! Set DATABASE_URL (with LOCAL_DEV=1) or DB_SECRET_ARN; OPENINGS_PATH
//! overrides the corpus location.

use std::sync::Arc;

use analysis_worker::config::{database_url, openings_path};
use analysis_worker::db;
use chess_core::{OpeningBook, OpeningDetector};
use tracing::info;

const PROGRESS_EVERY: usize = 100;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();
    let _ = dotenvy::dotenv();

    let force = std::env::args().any(|a| a == "--force");
    let corpus_path = openings_path();

    let book = OpeningBook::load(&corpus_path)?;
    info!(path = %corpus_path, positions = book.len(), "Opening corpus loaded");
    let detector = OpeningDetector::new(Arc::new(book));

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(2)
        .connect(&database_url().await?)
        .await?;

    let games = db::fetch_games_for_opening_backfill(&pool, force).await?;
    println!("Found {} games to check (force={force})", games.len());

    let mut updated = 0usize;
    for (done, (game_id, pgn)) in games.iter().enumerate() {
        if let Some(name) = detector.detect(pgn) {
            db::set_opening_name(&pool, *game_id, Some(&name)).await?;
            updated += 1;
        }

        if (done + 1) % PROGRESS_EVERY == 0 {
            println!("  {} games processed...", done + 1);
        }
    }

    println!("{updated} openings detected in {} games", games.len());
    Ok(())
}
