//! Analysis job lifecycle and its read model.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::JobError;
use crate::uci::Score;

/// Score per half-move index.
pub type Evaluation = BTreeMap<usize, Score>;

/// Best move (UCI notation) per half-move index.
pub type BestMoves = BTreeMap<usize, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(JobError::UnknownStatus(other.to_string())),
        }
    }
}

/// One request to analyze one game at one depth.
///
/// Status only moves forward: pending -> running -> completed | failed.
/// Evaluation and best moves exist exactly when the job is completed and
/// always cover the same half-moves.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisJob {
    /// Row id; 0 until the job is first persisted.
    pub id: i64,
    pub game_id: i64,
    pub depth: u32,
    pub created_at: DateTime<Utc>,
    status: JobStatus,
    evaluation: Option<Evaluation>,
    best_moves: Option<BestMoves>,
}

impl AnalysisJob {
    pub fn new(game_id: i64, depth: u32) -> Self {
        Self {
            id: 0,
            game_id,
            depth,
            created_at: Utc::now(),
            status: JobStatus::Pending,
            evaluation: None,
            best_moves: None,
        }
    }

    /// Rebuild a job from storage, rejecting rows that break the result invariant.
    pub fn restore(
        id: i64,
        game_id: i64,
        depth: u32,
        created_at: DateTime<Utc>,
        status: JobStatus,
        evaluation: Option<Evaluation>,
        best_moves: Option<BestMoves>,
    ) -> Result<Self, JobError> {
        match (&status, &evaluation, &best_moves) {
            (JobStatus::Completed, Some(e), Some(b)) if e.len() == b.len() => {}
            (JobStatus::Completed, _, _) => return Err(JobError::Inconsistent(id)),
            (_, None, None) => {}
            _ => return Err(JobError::Inconsistent(id)),
        }

        Ok(Self {
            id,
            game_id,
            depth,
            created_at,
            status,
            evaluation,
            best_moves,
        })
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn evaluation(&self) -> Option<&Evaluation> {
        self.evaluation.as_ref()
    }

    pub fn best_moves(&self) -> Option<&BestMoves> {
        self.best_moves.as_ref()
    }

    pub fn start(&mut self) -> Result<(), JobError> {
        self.transition(JobStatus::Pending, JobStatus::Running)
    }

    /// Attach results and mark the job completed.
    pub fn complete(&mut self, evaluation: Evaluation, best_moves: BestMoves) -> Result<(), JobError> {
        if evaluation.len() != best_moves.len() {
            return Err(JobError::LengthMismatch {
                evaluation: evaluation.len(),
                best_moves: best_moves.len(),
            });
        }
        self.transition(JobStatus::Running, JobStatus::Completed)?;
        self.evaluation = Some(evaluation);
        self.best_moves = Some(best_moves);
        Ok(())
    }

    /// Mark the job failed. Partial results are never kept.
    pub fn fail(&mut self) -> Result<(), JobError> {
        self.transition(JobStatus::Running, JobStatus::Failed)?;
        self.evaluation = None;
        self.best_moves = None;
        Ok(())
    }

    fn transition(&mut self, from: JobStatus, to: JobStatus) -> Result<(), JobError> {
        if self.status != from {
            return Err(JobError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }
}

/// Job as returned to API clients, newest first per game.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisJobView {
    pub id: i64,
    pub depth: u32,
    pub status: JobStatus,
    pub evaluation: Option<Evaluation>,
    pub best_moves: Option<BestMoves>,
    pub created_at: DateTime<Utc>,
}

impl From<&AnalysisJob> for AnalysisJobView {
    fn from(job: &AnalysisJob) -> Self {
        Self {
            id: job.id,
            depth: job.depth,
            status: job.status,
            evaluation: job.evaluation.clone(),
            best_moves: job.best_moves.clone(),
            created_at: job.created_at,
        }
    }
}
