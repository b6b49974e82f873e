//! Worker configuration from environment variables and AWS Secrets Manager

use std::env;
use std::str::FromStr;
use std::time::Duration;

use aws_sdk_secretsmanager::Client as SecretsClient;
use chess_core::openings::OPENINGS_FILE_PATH;
use tracing::info;

use crate::error::WorkerError;
use crate::stockfish::EngineOptions;

/// Depth used when a request carries none.
pub const DEFAULT_DEPTH: u32 = 20;

/// Where analysis requests are queued.
#[derive(Clone, Debug)]
pub struct QueueSettings {
    /// SQS queue URL for analysis jobs
    pub queue_url: String,

    /// Custom SQS endpoint URL (for LocalStack)
    pub endpoint_url: Option<String>,

    /// SQS visibility timeout in seconds
    pub visibility_timeout_secs: u32,
}

impl QueueSettings {
    pub fn from_env() -> Result<Self, WorkerError> {
        let queue_url =
            env::var("SQS_QUEUE_URL").map_err(|_| WorkerError::Config("SQS_QUEUE_URL not set"))?;

        Ok(Self {
            queue_url,
            endpoint_url: env::var("SQS_ENDPOINT_URL").ok(),
            visibility_timeout_secs: env_or("VISIBILITY_TIMEOUT_SECS", 300),
        })
    }
}

#[derive(Clone, Debug)]
pub struct WorkerConfig {
    /// Database connection URL (fetched from Secrets Manager in prod)
    pub database_url: String,

    pub queue: QueueSettings,

    /// Engine binary, resources and time budgets
    pub engine: EngineOptions,

    /// Search depth for requests that do not name one
    pub default_depth: u32,

    /// Jobs analyzed at the same time (one engine process each)
    pub worker_concurrency: usize,

    /// Consecutive empty SQS receives before exiting (0 = never exit)
    pub max_empty_receives: u32,

    /// Mercure hub endpoint; updates are only logged when unset
    pub mercure_hub_url: Option<String>,

    /// Secret used to sign the hub publisher JWT
    pub mercure_jwt_secret: Option<String>,
}

impl WorkerConfig {
    /// Load configuration from environment variables.
    /// In production, fetches DATABASE_URL from AWS Secrets Manager.
    pub async fn load() -> Result<Self, WorkerError> {
        let queue = QueueSettings::from_env()?;

        let engine = EngineOptions {
            path: env::var("STOCKFISH_PATH")
                .unwrap_or_else(|_| "/usr/local/bin/stockfish".to_string()),
            args: Vec::new(),
            threads: env_or("ENGINE_THREADS", 1),
            hash_mb: env_or("ENGINE_HASH_MB", 256),
            startup_timeout: Duration::from_secs(env_or("ENGINE_STARTUP_TIMEOUT_SECS", 10)),
            search_timeout: Duration::from_secs(env_or("ENGINE_SEARCH_TIMEOUT_SECS", 120)),
        };

        let worker_concurrency = env_or("WORKER_CONCURRENCY", num_cpus::get()).max(1);

        let database_url = database_url().await?;

        Ok(Self {
            database_url,
            queue,
            engine,
            default_depth: env_or("DEFAULT_DEPTH", DEFAULT_DEPTH),
            worker_concurrency,
            max_empty_receives: env_or("MAX_EMPTY_RECEIVES", 5),
            mercure_hub_url: non_empty_var("MERCURE_HUB_URL"),
            mercure_jwt_secret: non_empty_var("MERCURE_JWT_SECRET"),
        })
    }
}

/// Determine the database URL: the environment in local dev, Secrets Manager otherwise.
pub async fn database_url() -> Result<String, WorkerError> {
    if env::var("LOCAL_DEV").is_ok() {
        // Local development: use DATABASE_URL directly
        info!("Local dev mode: using DATABASE_URL from environment");
        env::var("DATABASE_URL")
            .map_err(|_| WorkerError::Config("DATABASE_URL not set (LOCAL_DEV mode)"))
    } else {
        // Production: fetch from Secrets Manager
        let secret_arn =
            env::var("DB_SECRET_ARN").map_err(|_| WorkerError::Config("DB_SECRET_ARN not set"))?;

        info!(secret_arn = %secret_arn, "Fetching database URL from Secrets Manager");
        fetch_database_url_from_secrets(&secret_arn).await
    }
}

/// Opening corpus location: `OPENINGS_PATH`, else the generated default.
pub fn openings_path() -> String {
    non_empty_var("OPENINGS_PATH").unwrap_or_else(|| OPENINGS_FILE_PATH.to_string())
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Fetch database URL from AWS Secrets Manager
async fn fetch_database_url_from_secrets(secret_arn: &str) -> Result<String, WorkerError> {
    let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let client = SecretsClient::new(&config);

    let response = client
        .get_secret_value()
        .secret_id(secret_arn)
        .send()
        .await
        .map_err(|e| WorkerError::SecretsManager(e.to_string()))?;

    let secret = response
        .secret_string()
        .ok_or_else(|| WorkerError::SecretsManager("Secret has no string value".into()))?;

    database_url_from_secret(secret)
}

/// Accepts a plain connection string, a JSON object with a `url` field,
/// or the RDS-style JSON object with separate connection fields.
fn database_url_from_secret(secret: &str) -> Result<String, WorkerError> {
    if secret.starts_with("postgresql://") || secret.starts_with("postgres://") {
        return Ok(secret.to_string());
    }

    let secret: serde_json::Value = serde_json::from_str(secret)
        .map_err(|e| WorkerError::SecretsManager(format!("Failed to parse secret JSON: {e}")))?;

    if let Some(url) = secret.get("url").or(secret.get("DATABASE_URL")) {
        return url
            .as_str()
            .map(String::from)
            .ok_or_else(|| WorkerError::SecretsManager("Database URL is not a string".into()));
    }

    let field = |names: &[&str]| -> Result<String, WorkerError> {
        names
            .iter()
            .find_map(|name| secret.get(*name).and_then(|v| v.as_str()))
            .map(String::from)
            .ok_or_else(|| WorkerError::SecretsManager(format!("Missing '{}' in secret", names[0])))
    };

    let host = field(&["host"])?;
    let username = field(&["username"])?;
    let password = field(&["password"])?;
    let database = field(&["dbname", "database"])?;
    let port = secret.get("port").and_then(|v| v.as_u64()).unwrap_or(5432);

    Ok(format!("postgresql://{username}:{password}@{host}:{port}/{database}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openings_path_override() {
        env::remove_var("OPENINGS_PATH");
        assert_eq!(openings_path(), "data/openings.json");
        env::set_var("OPENINGS_PATH", "/srv/corpus/openings.json");
        assert_eq!(openings_path(), "/srv/corpus/openings.json");
        env::set_var("OPENINGS_PATH", "  ");
        assert_eq!(openings_path(), OPENINGS_FILE_PATH);
        env::remove_var("OPENINGS_PATH");
    }

    #[test]
    fn test_env_or_falls_back_on_garbage() {
        env::set_var("ANALYSIS_TEST_DEPTH_GARBAGE", "deep");
        assert_eq!(env_or("ANALYSIS_TEST_DEPTH_GARBAGE", 20u32), 20);
        env::set_var("ANALYSIS_TEST_DEPTH_SET", " 24 ");
        assert_eq!(env_or("ANALYSIS_TEST_DEPTH_SET", 20u32), 24);
        assert_eq!(env_or("ANALYSIS_TEST_DEPTH_UNSET", 20u32), 20);
    }

    #[test]
    fn test_secret_formats() {
        assert_eq!(
            database_url_from_secret("postgres://u:p@db/games").unwrap(),
            "postgres://u:p@db/games"
        );
        assert_eq!(
            database_url_from_secret(r#"{"url": "postgresql://u:p@db/games"}"#).unwrap(),
            "postgresql://u:p@db/games"
        );
        assert_eq!(
            database_url_from_secret(
                r#"{"host": "db", "username": "u", "password": "p", "database": "games"}"#
            )
            .unwrap(),
            "postgresql://u:p@db:5432/games"
        );
        assert!(database_url_from_secret(r#"{"host": "db"}"#).is_err());
    }

    #[test]
    fn test_blank_hub_url_is_unset() {
        env::set_var("ANALYSIS_TEST_HUB_BLANK", "  ");
        assert_eq!(non_empty_var("ANALYSIS_TEST_HUB_BLANK"), None);
    }
}
