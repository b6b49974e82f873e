pub mod analyzer;
pub mod config;
pub mod db;
pub mod error;
pub mod job;
pub mod publisher;
pub mod sqs;
pub mod stockfish;
pub mod uci;

pub use analyzer::Orchestrator;
pub use error::{EngineError, JobError, PublishError, WorkerError};
pub use job::{AnalysisJob, AnalysisJobView, JobStatus};
pub use stockfish::{EngineClient, EngineOptions, EngineState, StockfishLauncher};
pub use uci::{EngineEvaluation, Score};
