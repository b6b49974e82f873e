#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use analysis_worker::db::AnalysisRepository;
use analysis_worker::error::PublishError;
use analysis_worker::publisher::{AnalysisEvent, EventPublisher};
use analysis_worker::{AnalysisJob, EngineOptions, WorkerError};
use chess_core::{GameText, OpeningBook, OpeningDetector, PositionSnapshot};
use tempfile::TempDir;

/// Fixture corpus with a few dozen well-known lines and the French tables.
pub fn fixture_path() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/openings.json")
}

pub fn detector() -> OpeningDetector {
    let book = OpeningBook::load(fixture_path()).expect("fixture corpus should load");
    OpeningDetector::new(Arc::new(book))
}

/// Position after the last move of `move_text`.
pub fn last_position(move_text: &str) -> PositionSnapshot {
    GameText::parse(move_text)
        .expect("valid move text")
        .positions()
        .last()
        .expect("at least one move")
}

/// `go` handler answering with a fixed scored line.
pub const GO_CP_29: &str =
    r#"echo "info depth 10 seldepth 14 multipv 1 score cp 29 nodes 9000 pv e2e4 e7e5"; echo "bestmove e2e4 ponder e7e5""#;

/// `go` handler reporting mate in two for the side to move.
pub const GO_MATE_2: &str =
    r#"echo "info depth 5 seldepth 5 multipv 1 score mate 2 pv d1h5 g7g6 h5e5"; echo "bestmove d1h5""#;

/// `go` handler that never answers.
pub const GO_SILENT: &str = ":";

/// `go` handler that exits mid-search.
pub const GO_CRASH: &str = "exit 3";

/// Write a `/bin/sh` UCI engine whose `go` branch runs `go_handler`.
///
/// The script is run through `/bin/sh` rather than executed directly so a
/// freshly written file is never exec'd.
pub fn fake_engine(dir: &TempDir, go_handler: &str) -> EngineOptions {
    let script = format!(
        r#"while IFS= read -r line; do
  case "$line" in
    uci) echo "id name FakeFish"; echo "uciok" ;;
    isready) echo "readyok" ;;
    "go "*) {go_handler} ;;
    quit) exit 0 ;;
  esac
done
"#
    );
    script_engine(dir, "engine.sh", &script)
}

/// Engine whose first process hangs on `go` and whose later processes answer.
pub fn hangs_once_engine(dir: &TempDir) -> EngineOptions {
    let marker = dir.path().join("searched-once");
    let handler = format!(
        r#"if [ -f "{marker}" ]; then {GO_CP_29}; else touch "{marker}"; fi"#,
        marker = marker.display()
    );
    fake_engine(dir, &handler)
}

/// Engine whose first process exits before the handshake; later ones answer.
pub fn fails_first_start_engine(dir: &TempDir) -> EngineOptions {
    let marker = dir.path().join("started-once");
    let options = fake_engine(dir, GO_CP_29);
    let body = std::fs::read_to_string(&options.args[0]).expect("read fake engine");
    let script = format!(
        r#"if [ ! -f "{marker}" ]; then touch "{marker}"; exit 1; fi
{body}"#,
        marker = marker.display()
    );
    script_engine(dir, "flaky.sh", &script)
}

/// Engine that never finishes the UCI handshake.
pub fn mute_engine(dir: &TempDir) -> EngineOptions {
    script_engine(dir, "mute.sh", "while IFS= read -r line; do :; done\n")
}

fn script_engine(dir: &TempDir, name: &str, script: &str) -> EngineOptions {
    let path = dir.path().join(name);
    std::fs::write(&path, script).expect("write fake engine");

    EngineOptions {
        path: "/bin/sh".to_string(),
        args: vec![path.display().to_string()],
        threads: 1,
        hash_mb: 16,
        startup_timeout: Duration::from_secs(2),
        search_timeout: Duration::from_millis(400),
    }
}

/// Game store backed by a map; records every job write.
#[derive(Default)]
pub struct MemoryRepository {
    pub games: Mutex<Vec<(i64, String)>>,
    pub writes: Mutex<Vec<AnalysisJob>>,
}

impl MemoryRepository {
    pub fn with_game(game_id: i64, move_text: &str) -> Self {
        let repo = Self::default();
        repo.games
            .lock()
            .unwrap()
            .push((game_id, move_text.to_string()));
        repo
    }

    /// Latest persisted version of each job, newest job first.
    pub fn latest_jobs(&self) -> Vec<AnalysisJob> {
        let writes = self.writes.lock().unwrap();
        let mut latest: Vec<AnalysisJob> = Vec::new();
        for job in writes.iter() {
            match latest.iter_mut().find(|j| j.id == job.id) {
                Some(existing) => *existing = job.clone(),
                None => latest.push(job.clone()),
            }
        }
        latest.reverse();
        latest
    }
}

impl AnalysisRepository for MemoryRepository {
    async fn fetch_move_text(&self, game_id: i64) -> Result<Option<String>, WorkerError> {
        let games = self.games.lock().unwrap();
        Ok(games
            .iter()
            .find(|(id, _)| *id == game_id)
            .map(|(_, text)| text.clone()))
    }

    async fn insert_job(&self, job: &AnalysisJob) -> Result<i64, WorkerError> {
        let mut writes = self.writes.lock().unwrap();
        let id = writes.iter().map(|j| j.id).max().unwrap_or(0) + 1;
        let mut stored = job.clone();
        stored.id = id;
        writes.push(stored);
        Ok(id)
    }

    async fn update_job(&self, job: &AnalysisJob) -> Result<(), WorkerError> {
        self.writes.lock().unwrap().push(job.clone());
        Ok(())
    }
}

/// Publisher that keeps every event it is given.
#[derive(Default)]
pub struct RecordingPublisher {
    pub events: Mutex<Vec<(i64, AnalysisEvent)>>,
}

impl EventPublisher for RecordingPublisher {
    async fn publish(&self, game_id: i64, event: &AnalysisEvent) -> Result<(), PublishError> {
        self.events.lock().unwrap().push((game_id, event.clone()));
        Ok(())
    }
}
