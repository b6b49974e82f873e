//! Stockfish engine client over the UCI protocol (async I/O)
//!
//! A background task forwards engine stdout line by line into a channel so
//! every read can be bounded by a deadline. A search that overruns its budget,
//! or an engine that dies mid-search, gets the process killed and one retry
//! on a fresh process.

use std::future::Future;
use std::process::Stdio;
use std::time::Duration;

use chess_core::PositionSnapshot;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::uci::{self, EngineEvaluation, SearchLines};

/// Lines buffered between the stdout reader and the client.
const LINE_BUFFER: usize = 256;

/// How long `quit` may take before the process is killed.
const QUIT_GRACE: Duration = Duration::from_secs(2);

/// Engine process settings.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub path: String,
    pub args: Vec<String>,
    pub threads: u32,
    pub hash_mb: u32,
    pub startup_timeout: Duration,
    pub search_timeout: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            path: "/usr/local/bin/stockfish".to_string(),
            args: Vec::new(),
            threads: 1,
            hash_mb: 256,
            startup_timeout: Duration::from_secs(10),
            search_timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    NotStarted,
    Handshaking,
    Idle,
    Searching,
    Crashed,
    TimedOut,
    Terminated,
}

/// Something that can evaluate positions one at a time.
pub trait AnalysisEngine: Send {
    fn search(
        &mut self,
        position: &PositionSnapshot,
        depth: u32,
    ) -> impl Future<Output = Result<EngineEvaluation, EngineError>> + Send;

    /// Release the engine. Safe to call more than once.
    fn shutdown(&mut self) -> impl Future<Output = ()> + Send;
}

/// Creates a ready engine for one analysis job.
pub trait EngineLauncher: Send + Sync {
    type Engine: AnalysisEngine;

    fn launch(&self) -> impl Future<Output = Result<Self::Engine, EngineError>> + Send;
}

/// A running engine process and its line channel.
struct UciProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    lines: mpsc::Receiver<String>,
    reader: JoinHandle<()>,
}

impl UciProcess {
    fn spawn(options: &EngineOptions) -> Result<Self, EngineError> {
        let mut child = Command::new(&options.path)
            .args(&options.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                EngineError::StartupFailure(format!("Failed to spawn {}: {e}", options.path))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EngineError::StartupFailure("stdin not captured".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::StartupFailure("stdout not captured".into()))?;

        let (tx, rx) = mpsc::channel(LINE_BUFFER);
        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if tx.send(line).await.is_err() {
                    break;
                }
            }
        });

        Ok(Self {
            child,
            stdin: Some(stdin),
            lines: rx,
            reader,
        })
    }

    async fn send(&mut self, cmd: &str) -> Result<(), EngineError> {
        debug!(cmd, "SF <");
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| EngineError::Crashed("stdin already closed".into()))?;
        stdin
            .write_all(format!("{cmd}\n").as_bytes())
            .await
            .map_err(|e| EngineError::Crashed(format!("Failed to write to engine: {e}")))?;
        stdin
            .flush()
            .await
            .map_err(|e| EngineError::Crashed(format!("Failed to flush stdin: {e}")))?;
        Ok(())
    }

    /// Next stdout line, or `Timeout(budget)` once the deadline passes.
    async fn next_line(&mut self, deadline: Instant, budget: Duration) -> Result<String, EngineError> {
        match timeout_at(deadline, self.lines.recv()).await {
            Ok(Some(line)) => {
                debug!(line = line.trim(), "SF >");
                Ok(line)
            }
            Ok(None) => Err(EngineError::Crashed("engine closed its output".into())),
            Err(_) => Err(EngineError::Timeout(budget)),
        }
    }

    async fn wait_for(
        &mut self,
        expected: &str,
        deadline: Instant,
        budget: Duration,
    ) -> Result<(), EngineError> {
        loop {
            if self.next_line(deadline, budget).await?.trim() == expected {
                return Ok(());
            }
        }
    }

    async fn kill(&mut self) {
        let _ = self.child.start_kill();
        let _ = self.child.wait().await;
        self.reader.abort();
    }

    /// Ask the engine to exit, falling back to a kill.
    async fn quit(&mut self) {
        let _ = self.send(uci::QUIT).await;
        self.stdin.take();
        if timeout(QUIT_GRACE, self.child.wait()).await.is_err() {
            warn!("Engine ignored quit, killing it");
            self.kill().await;
        }
        self.reader.abort();
    }
}

impl Drop for UciProcess {
    fn drop(&mut self) {
        // Best-effort synchronous kill in drop
        let _ = self.child.start_kill();
        self.reader.abort();
    }
}

/// One engine process with a lifecycle state and a single retry on failure.
pub struct EngineClient {
    options: EngineOptions,
    state: EngineState,
    process: Option<UciProcess>,
}

impl EngineClient {
    pub fn new(options: EngineOptions) -> Self {
        Self {
            options,
            state: EngineState::NotStarted,
            process: None,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Spawn the engine and complete the UCI handshake, retrying once.
    pub async fn start(&mut self) -> Result<(), EngineError> {
        match self.state {
            EngineState::Idle => return Ok(()),
            EngineState::Searching | EngineState::Handshaking => {
                return Err(EngineError::NotReady(self.state))
            }
            _ => {}
        }

        match self.relaunch().await {
            Ok(()) => Ok(()),
            Err(first) => {
                warn!(error = %first, "Engine failed to start, retrying with a fresh process");
                self.relaunch().await
            }
        }
    }

    /// Evaluate one position.
    ///
    /// A timeout or crash kills the process; the search is then retried once
    /// on a fresh engine before the error is returned.
    pub async fn search(
        &mut self,
        position: &PositionSnapshot,
        depth: u32,
    ) -> Result<EngineEvaluation, EngineError> {
        if self.state != EngineState::Idle {
            return Err(EngineError::NotReady(self.state));
        }

        match self.search_once(position, depth).await {
            Err(err @ (EngineError::Timeout(_) | EngineError::Crashed(_))) => {
                warn!(ply = position.ply, error = %err, "Search failed, retrying on a fresh engine");
                self.relaunch().await?;
                self.search_once(position, depth).await
            }
            result => result,
        }
    }

    /// Stop the engine process. Idempotent.
    pub async fn shutdown(&mut self) {
        if let Some(mut process) = self.process.take() {
            process.quit().await;
            info!("Engine shut down");
        }
        self.state = EngineState::Terminated;
    }

    async fn relaunch(&mut self) -> Result<(), EngineError> {
        if let Some(mut old) = self.process.take() {
            old.kill().await;
        }

        self.state = EngineState::Handshaking;
        match handshake(&self.options).await {
            Ok(process) => {
                self.process = Some(process);
                self.state = EngineState::Idle;
                info!(path = %self.options.path, "Engine ready");
                Ok(())
            }
            Err(e) => {
                self.state = EngineState::Crashed;
                Err(match e {
                    EngineError::StartupFailure(_) => e,
                    other => EngineError::StartupFailure(other.to_string()),
                })
            }
        }
    }

    async fn search_once(
        &mut self,
        position: &PositionSnapshot,
        depth: u32,
    ) -> Result<EngineEvaluation, EngineError> {
        let budget = self.options.search_timeout;
        let process = self
            .process
            .as_mut()
            .ok_or(EngineError::NotReady(self.state))?;

        self.state = EngineState::Searching;
        let result = run_search(process, position, depth, budget).await;

        self.state = match &result {
            Ok(_) | Err(EngineError::Protocol(_)) => EngineState::Idle,
            Err(EngineError::Timeout(_)) => EngineState::TimedOut,
            Err(_) => EngineState::Crashed,
        };
        if matches!(self.state, EngineState::TimedOut | EngineState::Crashed) {
            if let Some(mut process) = self.process.take() {
                process.kill().await;
            }
        }
        result
    }
}

/// Spawn a process and bring it to `readyok` within the startup budget.
async fn handshake(options: &EngineOptions) -> Result<UciProcess, EngineError> {
    let budget = options.startup_timeout;
    let deadline = Instant::now() + budget;
    let mut process = UciProcess::spawn(options)?;

    process.send(uci::UCI).await?;
    process.wait_for(uci::UCI_OK, deadline, budget).await?;

    process
        .send(&uci::set_option_command("Threads", options.threads))
        .await?;
    process
        .send(&uci::set_option_command("Hash", options.hash_mb))
        .await?;
    process.send(uci::IS_READY).await?;
    process.wait_for(uci::READY_OK, deadline, budget).await?;

    Ok(process)
}

async fn run_search(
    process: &mut UciProcess,
    position: &PositionSnapshot,
    depth: u32,
    budget: Duration,
) -> Result<EngineEvaluation, EngineError> {
    let deadline = Instant::now() + budget;
    process.send(&uci::position_command(&position.fen)).await?;
    process.send(&uci::go_depth_command(depth)).await?;

    let mut lines = SearchLines::default();
    loop {
        let line = process.next_line(deadline, budget).await?;
        if let Some(best) = lines.feed(&line) {
            return lines
                .finish(best, position.is_white_to_move())
                .ok_or_else(|| {
                    EngineError::Protocol(format!(
                        "bestmove without a score at ply {}",
                        position.ply
                    ))
                });
        }
    }
}

impl AnalysisEngine for EngineClient {
    async fn search(
        &mut self,
        position: &PositionSnapshot,
        depth: u32,
    ) -> Result<EngineEvaluation, EngineError> {
        EngineClient::search(self, position, depth).await
    }

    async fn shutdown(&mut self) {
        EngineClient::shutdown(self).await
    }
}

/// Launches Stockfish processes with fixed options.
#[derive(Debug, Clone)]
pub struct StockfishLauncher {
    options: EngineOptions,
}

impl StockfishLauncher {
    pub fn new(options: EngineOptions) -> Self {
        Self { options }
    }
}

impl EngineLauncher for StockfishLauncher {
    type Engine = EngineClient;

    async fn launch(&self) -> Result<EngineClient, EngineError> {
        let mut engine = EngineClient::new(self.options.clone());
        engine.start().await?;
        Ok(engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_search_before_start_is_rejected() {
        let mut engine = EngineClient::new(EngineOptions::default());
        let snapshot = PositionSnapshot {
            ply: 0,
            fen: "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1".to_string(),
            side_to_move: shakmaty::Color::Black,
        };
        let err = engine.search(&snapshot, 10).await.unwrap_err();
        assert!(matches!(err, EngineError::NotReady(EngineState::NotStarted)));
    }

    #[tokio::test]
    async fn test_missing_binary_fails_startup() {
        let mut engine = EngineClient::new(EngineOptions {
            path: "/nonexistent/stockfish".to_string(),
            ..EngineOptions::default()
        });
        let err = engine.start().await.unwrap_err();
        assert!(matches!(err, EngineError::StartupFailure(_)));
        assert_eq!(engine.state(), EngineState::Crashed);
    }

    #[tokio::test]
    async fn test_shutdown_without_start() {
        let mut engine = EngineClient::new(EngineOptions::default());
        engine.shutdown().await;
        engine.shutdown().await;
        assert_eq!(engine.state(), EngineState::Terminated);
    }
}
