//! Push notifications for finished analysis jobs (Mercure hub)

use std::future::Future;
use std::time::Duration;

use jsonwebtoken::{encode, EncodingKey, Header};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::PublishError;
use crate::job::{AnalysisJob, BestMoves, Evaluation, JobStatus};

const HUB_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Hub topic for one game's analysis updates.
pub fn topic(game_id: i64) -> String {
    format!("game/{game_id}/analysis")
}

/// Update pushed to subscribers when a job reaches a terminal state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisEvent {
    pub analysis_id: i64,
    pub status: JobStatus,
    pub evaluation: Option<Evaluation>,
    pub best_moves: Option<BestMoves>,
}

impl From<&AnalysisJob> for AnalysisEvent {
    fn from(job: &AnalysisJob) -> Self {
        Self {
            analysis_id: job.id,
            status: job.status(),
            evaluation: job.evaluation().cloned(),
            best_moves: job.best_moves().cloned(),
        }
    }
}

pub trait EventPublisher: Send + Sync {
    fn publish(
        &self,
        game_id: i64,
        event: &AnalysisEvent,
    ) -> impl Future<Output = Result<(), PublishError>> + Send;
}

#[derive(Debug, Serialize)]
struct MercureClaims {
    mercure: MercureGrant,
}

#[derive(Debug, Serialize)]
struct MercureGrant {
    publish: Vec<String>,
}

/// Sign a publisher JWT allowed to publish on every topic.
pub fn publisher_token(secret: &str) -> Result<String, jsonwebtoken::errors::Error> {
    let claims = MercureClaims {
        mercure: MercureGrant {
            publish: vec!["*".to_string()],
        },
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

/// Posts form-encoded updates to a Mercure hub.
#[derive(Clone)]
pub struct MercurePublisher {
    client: reqwest::Client,
    hub_url: String,
    token: Option<String>,
}

impl MercurePublisher {
    pub fn new(hub_url: &str, jwt_secret: Option<&str>) -> Result<Self, PublishError> {
        let token = jwt_secret.map(publisher_token).transpose()?;
        let client = reqwest::Client::builder()
            .timeout(HUB_REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            hub_url: hub_url.to_string(),
            token,
        })
    }
}

impl EventPublisher for MercurePublisher {
    async fn publish(&self, game_id: i64, event: &AnalysisEvent) -> Result<(), PublishError> {
        let data = serde_json::to_string(event)?;
        let topic = topic(game_id);

        let mut request = self
            .client
            .post(&self.hub_url)
            .form(&[("topic", topic.as_str()), ("data", data.as_str())]);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PublishError::Rejected(status.as_u16()));
        }

        debug!(topic = %topic, "Published analysis update");
        Ok(())
    }
}

/// Hub publisher, or a log line when no hub is configured.
#[derive(Clone)]
pub enum HubPublisher {
    Mercure(MercurePublisher),
    LogOnly,
}

impl HubPublisher {
    pub fn from_settings(hub_url: Option<&str>, jwt_secret: Option<&str>) -> Result<Self, PublishError> {
        match hub_url {
            Some(url) => Ok(HubPublisher::Mercure(MercurePublisher::new(url, jwt_secret)?)),
            None => Ok(HubPublisher::LogOnly),
        }
    }
}

impl EventPublisher for HubPublisher {
    async fn publish(&self, game_id: i64, event: &AnalysisEvent) -> Result<(), PublishError> {
        match self {
            HubPublisher::Mercure(hub) => hub.publish(game_id, event).await,
            HubPublisher::LogOnly => {
                info!(
                    topic = %topic(game_id),
                    analysis_id = event.analysis_id,
                    status = %event.status,
                    "No hub configured, analysis update not pushed"
                );
                Ok(())
            }
        }
    }
}
