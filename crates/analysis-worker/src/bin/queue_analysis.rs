//! Queue analysis requests for one or more games.
//!
//! Usage:
//!   cargo run -p analysis-worker --bin queue-analysis -- 12,13,14 [--depth 30]
//!
//! Reads SQS_QUEUE_URL (and SQS_ENDPOINT_URL for LocalStack) from the
//! environment or a .env file.

use analysis_worker::config::QueueSettings;
use analysis_worker::sqs::{AnalysisRequest, SqsClient};
use anyhow::{bail, Context};
use tracing::info;

/// Depth used by interactive requests when none is given.
const DISPATCH_DEFAULT_DEPTH: u32 = 30;

fn parse_args(args: &[String]) -> anyhow::Result<(Vec<i64>, u32)> {
    let mut game_ids = Vec::new();
    let mut depth = DISPATCH_DEFAULT_DEPTH;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "--depth" {
            let value = iter.next().context("--depth needs a value")?;
            depth = value
                .parse()
                .with_context(|| format!("invalid depth {value:?}"))?;
            if depth == 0 {
                bail!("depth must be positive");
            }
        } else {
            for id in arg.split(',').filter(|s| !s.trim().is_empty()) {
                game_ids.push(
                    id.trim()
                        .parse()
                        .with_context(|| format!("invalid game id {id:?}"))?,
                );
            }
        }
    }

    if game_ids.is_empty() {
        bail!("usage: queue-analysis <game_id>[,<game_id>...] [--depth N]");
    }
    Ok((game_ids, depth))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();
    let _ = dotenvy::dotenv();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (game_ids, depth) = parse_args(&args)?;

    let settings = QueueSettings::from_env()?;
    let sqs = SqsClient::new(&settings).await;

    let requests: Vec<AnalysisRequest> = game_ids
        .iter()
        .map(|&game_id| AnalysisRequest {
            game_id,
            depth: Some(depth),
        })
        .collect();

    let queued = if let [request] = requests.as_slice() {
        sqs.send_request(request).await?;
        1
    } else {
        sqs.send_requests(&requests).await?
    };

    info!(queued, requested = requests.len(), depth, "Analysis requests queued");
    println!("Queued {queued}/{} analysis requests at depth {depth}", requests.len());
    Ok(())
}
