//! Per-game analysis: replay the game, evaluate every position, record the job.

use chess_core::GameText;
use tracing::{debug, error, info, warn};

use crate::db::AnalysisRepository;
use crate::error::{EngineError, WorkerError};
use crate::job::{AnalysisJob, BestMoves, Evaluation};
use crate::publisher::{AnalysisEvent, EventPublisher};
use crate::stockfish::{AnalysisEngine, EngineLauncher};

/// Drives one analysis job from request to terminal state.
pub struct Orchestrator<R, P, L> {
    repo: R,
    publisher: P,
    launcher: L,
}

impl<R, P, L> Orchestrator<R, P, L>
where
    R: AnalysisRepository,
    P: EventPublisher,
    L: EngineLauncher,
{
    pub fn new(repo: R, publisher: P, launcher: L) -> Self {
        Self {
            repo,
            publisher,
            launcher,
        }
    }

    pub fn repo(&self) -> &R {
        &self.repo
    }

    /// Analyze a game and return the job in its terminal state.
    ///
    /// A missing game is an error and creates no job. Engine and game-text
    /// failures end in a `failed` job instead of an error. The terminal state
    /// is persisted before the update is published; a publish failure is only
    /// logged.
    pub async fn begin(&self, game_id: i64, depth: u32) -> Result<AnalysisJob, WorkerError> {
        let move_text = self
            .repo
            .fetch_move_text(game_id)
            .await?
            .ok_or(WorkerError::GameNotFound(game_id))?;

        let mut job = AnalysisJob::new(game_id, depth);
        job.start()?;
        job.id = self.repo.insert_job(&job).await?;
        info!(game_id, job_id = job.id, depth, "Analysis started");

        match self.evaluate(&move_text, depth).await {
            Ok((evaluation, best_moves)) => {
                info!(game_id, job_id = job.id, positions = evaluation.len(), "Analysis complete");
                job.complete(evaluation, best_moves)?;
            }
            Err(e) => {
                error!(game_id, job_id = job.id, error = %e, "Analysis failed");
                job.fail()?;
            }
        }

        self.repo.update_job(&job).await?;
        self.publish(&job).await;
        Ok(job)
    }

    async fn evaluate(&self, move_text: &str, depth: u32) -> Result<(Evaluation, BestMoves), WorkerError> {
        let game = GameText::parse(move_text)?;
        let mut engine = self.launcher.launch().await?;
        let result = evaluate_positions(&mut engine, &game, depth).await;
        engine.shutdown().await;
        Ok(result?)
    }

    async fn publish(&self, job: &AnalysisJob) {
        let event = AnalysisEvent::from(job);
        if let Err(e) = self.publisher.publish(job.game_id, &event).await {
            warn!(game_id = job.game_id, job_id = job.id, error = %e, "Failed to publish analysis update");
        }
    }
}

/// Search every position of `game` in order. Stops at the first failure.
async fn evaluate_positions<E: AnalysisEngine>(
    engine: &mut E,
    game: &GameText,
    depth: u32,
) -> Result<(Evaluation, BestMoves), EngineError> {
    let mut evaluation = Evaluation::new();
    let mut best_moves = BestMoves::new();

    for position in game.positions() {
        let result = engine.search(&position, depth).await?;
        debug!(ply = position.ply, score = %result.score, best_move = %result.best_move, "Position evaluated");
        evaluation.insert(position.ply, result.score);
        best_moves.insert(position.ply, result.best_move);
    }

    Ok((evaluation, best_moves))
}
