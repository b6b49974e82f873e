//! Analysis worker
//!
//! Consumes game analysis requests from SQS, evaluates every position with
//! Stockfish and records one analysis job per request.

use std::sync::Arc;
use std::time::Duration;

use analysis_worker::config::WorkerConfig;
use analysis_worker::db::{self, PgAnalysisRepository};
use analysis_worker::job::{AnalysisJobView, JobStatus};
use analysis_worker::publisher::HubPublisher;
use analysis_worker::sqs::{AnalysisRequest, SqsClient, SqsMessage, SQS_BATCH_LIMIT};
use analysis_worker::stockfish::StockfishLauncher;
use analysis_worker::{Orchestrator, WorkerError};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{error, info, warn};

type WorkerOrchestrator = Orchestrator<PgAnalysisRepository, HubPublisher, StockfishLauncher>;

/// Parse --test-games 123,456,789 from CLI args
fn parse_test_games() -> Option<Vec<i64>> {
    let args: Vec<String> = std::env::args().collect();
    let pos = args.iter().position(|a| a == "--test-games")?;
    let ids: Vec<i64> = args
        .get(pos + 1)?
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect();
    (!ids.is_empty()).then_some(ids)
}

fn build_orchestrator(config: &WorkerConfig, pool: PgPool) -> Result<WorkerOrchestrator, WorkerError> {
    let publisher = HubPublisher::from_settings(
        config.mercure_hub_url.as_deref(),
        config.mercure_jwt_secret.as_deref(),
    )
    .map_err(|e| WorkerError::Analysis(format!("Failed to build hub publisher: {e}")))?;

    Ok(Orchestrator::new(
        PgAnalysisRepository::new(pool),
        publisher,
        StockfishLauncher::new(config.engine.clone()),
    ))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    // Load .env file for local dev
    let _ = dotenvy::dotenv();

    if let Some(game_ids) = parse_test_games() {
        return run_test_games(&game_ids).await;
    }

    // Load config (fetches DB URL from Secrets Manager in prod)
    let config = WorkerConfig::load().await?;
    info!(
        stockfish_path = %config.engine.path,
        default_depth = config.default_depth,
        concurrency = config.worker_concurrency,
        hub = config.mercure_hub_url.as_deref().unwrap_or("none"),
        "Worker config loaded"
    );

    // One connection per in-flight job plus headroom
    let pool_size = (config.worker_concurrency + 2) as u32;
    let pool = PgPoolOptions::new()
        .max_connections(pool_size)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(300))
        .connect(&config.database_url)
        .await?;
    db::run_migrations(&pool).await?;
    info!(pool_size, "Database connection pool established");

    let orchestrator = Arc::new(build_orchestrator(&config, pool)?);
    let sqs = SqsClient::new(&config.queue).await;
    info!(queue_url = %sqs.queue_url(), "SQS client ready");

    let semaphore = Arc::new(Semaphore::new(config.worker_concurrency));
    let mut empty_receives = 0;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    info!("Starting main loop");

    loop {
        // Claim workers before receiving so no message waits unheartbeated
        let mut permits = tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown signal received, waiting for in-flight jobs");
                break;
            }
            permits = claim_workers(&semaphore, SQS_BATCH_LIMIT) => permits?,
        };

        let messages = tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown signal received, waiting for in-flight jobs");
                break;
            }
            result = sqs.receive_messages(permits.len()) => result,
        };

        let messages = match messages {
            Ok(messages) => messages,
            Err(e) => {
                error!(error = %e, "Failed to receive messages");
                tokio::time::sleep(Duration::from_secs(5)).await;
                continue;
            }
        };

        if messages.is_empty() {
            empty_receives += 1;
            if config.max_empty_receives > 0 && empty_receives >= config.max_empty_receives {
                info!("No messages after {} polls, exiting", config.max_empty_receives);
                break;
            }
            continue;
        }
        empty_receives = 0;

        for msg in messages {
            let Some(request) = AnalysisRequest::parse(&msg.body) else {
                warn!(body = %msg.body, "Malformed analysis request, deleting message");
                let _ = sqs.delete_message(&msg.receipt_handle).await;
                continue;
            };

            let Some(permit) = permits.pop() else {
                warn!("Received more messages than requested, leaving the rest");
                break;
            };
            let orchestrator = orchestrator.clone();
            let sqs = sqs.clone();
            let depth = request.depth_or(config.default_depth);

            tokio::spawn(async move {
                let _permit = permit; // Hold until done
                handle_message(&orchestrator, &sqs, msg, request.game_id, depth).await;
            });
        }
    }

    // Acquire all permits = wait for all tasks to complete
    let _ = semaphore
        .acquire_many(config.worker_concurrency as u32)
        .await;
    info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for one free worker, then take up to `limit` that are free right now.
async fn claim_workers(
    semaphore: &Arc<Semaphore>,
    limit: usize,
) -> Result<Vec<OwnedSemaphorePermit>, tokio::sync::AcquireError> {
    let mut permits = vec![semaphore.clone().acquire_owned().await?];
    while permits.len() < limit {
        match semaphore.clone().try_acquire_owned() {
            Ok(permit) => permits.push(permit),
            Err(_) => break,
        }
    }
    Ok(permits)
}

/// Run one job and settle its message.
///
/// The message is deleted once a terminal state is recorded or the game does
/// not exist. Anything else leaves it for redelivery after the visibility timeout.
async fn handle_message(
    orchestrator: &WorkerOrchestrator,
    sqs: &SqsClient,
    msg: SqsMessage,
    game_id: i64,
    depth: u32,
) {
    let heartbeat = sqs.keep_hidden(msg.receipt_handle.clone());
    let outcome = orchestrator.begin(game_id, depth).await;
    drop(heartbeat);

    match outcome {
        Ok(job) => {
            info!(game_id, job_id = job.id, status = %job.status(), "Job recorded");
            if let Err(e) = sqs.delete_message(&msg.receipt_handle).await {
                warn!(game_id, error = %e, "Failed to delete message");
            }
        }
        Err(WorkerError::GameNotFound(_)) => {
            warn!(game_id, "Game not found, deleting message");
            let _ = sqs.delete_message(&msg.receipt_handle).await;
        }
        Err(e) => {
            error!(game_id, error = %e, "Job could not be recorded, leaving message for retry");
        }
    }
}

/// Resolves on SIGTERM (spot interruption) or Ctrl-C.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// --test-games mode: analyze specific game IDs locally, skip SQS, print the jobs.
async fn run_test_games(game_ids: &[i64]) -> anyhow::Result<()> {
    // Force local dev mode so config doesn't need AWS secrets
    std::env::set_var("LOCAL_DEV", "1");
    std::env::set_var("SQS_QUEUE_URL", "unused");

    let config = WorkerConfig::load().await?;
    info!(stockfish_path = %config.engine.path, "Test mode config loaded");

    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&config.database_url)
        .await?;
    db::run_migrations(&pool).await?;

    let orchestrator = build_orchestrator(&config, pool.clone())?;
    let mut completed = 0u32;
    let mut failed = 0u32;

    for &game_id in game_ids {
        println!("\n{}", "=".repeat(60));
        println!("Analyzing game_id={game_id} at depth {}...", config.default_depth);

        match orchestrator.begin(game_id, config.default_depth).await {
            Ok(job) if job.status() == JobStatus::Completed => completed += 1,
            Ok(_) => failed += 1,
            Err(e) => {
                println!("  ERROR: {e}");
                failed += 1;
                continue;
            }
        }

        let jobs: Vec<AnalysisJobView> = db::list_jobs_for_game(&pool, game_id)
            .await?
            .iter()
            .map(AnalysisJobView::from)
            .collect();
        println!("{}", serde_json::to_string_pretty(&jobs)?);
    }

    println!("\n{}", "=".repeat(60));
    println!(
        "Results: {completed} completed, {failed} failed out of {} games",
        game_ids.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_claim_takes_only_free_workers() {
        let semaphore = Arc::new(Semaphore::new(3));
        let busy = semaphore.clone().acquire_owned().await.unwrap();

        let permits = claim_workers(&semaphore, SQS_BATCH_LIMIT).await.unwrap();
        assert_eq!(permits.len(), 2);
        assert_eq!(semaphore.available_permits(), 0);

        drop(permits);
        drop(busy);
        let permits = claim_workers(&semaphore, 2).await.unwrap();
        assert_eq!(permits.len(), 2);
    }

    #[tokio::test]
    async fn test_claim_waits_while_every_worker_is_busy() {
        let semaphore = Arc::new(Semaphore::new(1));
        let busy = semaphore.clone().acquire_owned().await.unwrap();

        let pending =
            tokio::time::timeout(Duration::from_millis(50), claim_workers(&semaphore, 10)).await;
        assert!(pending.is_err());

        drop(busy);
        let permits = claim_workers(&semaphore, 10).await.unwrap();
        assert_eq!(permits.len(), 1);
    }
}
