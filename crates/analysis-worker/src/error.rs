//! Worker error types

use std::time::Duration;

use chess_core::openings::CorpusError;
use chess_core::GameTextError;
use thiserror::Error;

use crate::job::JobStatus;
use crate::stockfish::EngineState;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    Config(&'static str),

    #[error("SQS error: {0}")]
    Sqs(String),

    #[error("Secrets Manager error: {0}")]
    SecretsManager(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Invalid game text: {0}")]
    InvalidGameText(#[from] GameTextError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Analysis error: {0}")]
    Analysis(String),

    #[error("Game not found: {0}")]
    GameNotFound(i64),

    #[error("Opening corpus error: {0}")]
    Corpus(#[from] CorpusError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failures of the external engine process.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Engine failed to start: {0}")]
    StartupFailure(String),

    #[error("Engine search exceeded its {0:?} budget")]
    Timeout(Duration),

    #[error("Engine exited unexpectedly: {0}")]
    Crashed(String),

    #[error("Engine protocol error: {0}")]
    Protocol(String),

    #[error("Engine not ready for a search (state {0:?})")]
    NotReady(EngineState),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum JobError {
    #[error("Invalid job transition {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("Unknown job status: {0}")]
    UnknownStatus(String),

    #[error("Evaluation has {evaluation} entries but best moves has {best_moves}")]
    LengthMismatch { evaluation: usize, best_moves: usize },

    #[error("Job {0} has results that do not match its status")]
    Inconsistent(i64),
}

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Hub rejected update with status {0}")]
    Rejected(u16),

    #[error("Failed to sign publisher token: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
