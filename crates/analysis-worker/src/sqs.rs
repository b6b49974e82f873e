//! SQS client wrapper for the analysis request queue
//!
//! The worker receives, heartbeats and deletes messages; the dispatcher side
//! (`send_request`/`send_requests`) queues new analysis requests.

use std::time::Duration;

use aws_sdk_sqs::types::SendMessageBatchRequestEntry;
use aws_sdk_sqs::Client;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::QueueSettings;
use crate::error::WorkerError;

/// SQS caps batch sends and receives at 10 messages.
pub const SQS_BATCH_LIMIT: usize = 10;

/// A message received from SQS
#[derive(Debug, Clone)]
pub struct SqsMessage {
    pub body: String,
    /// Receipt handle for deletion/visibility extension
    pub receipt_handle: String,
}

/// Request to analyze one game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRequest {
    pub game_id: i64,
    pub depth: Option<u32>,
}

impl AnalysisRequest {
    /// Parse a message body: `{"gameId": 1, "depth": 20}` or a bare game id.
    pub fn parse(body: &str) -> Option<Self> {
        let body = body.trim();
        if let Ok(game_id) = body.parse::<i64>() {
            return Some(Self {
                game_id,
                depth: None,
            });
        }
        serde_json::from_str(body).ok()
    }

    pub fn depth_or(&self, default_depth: u32) -> u32 {
        match self.depth {
            Some(depth) if depth > 0 => depth,
            _ => default_depth,
        }
    }
}

/// SQS client for receiving and queueing analysis requests
#[derive(Clone)]
pub struct SqsClient {
    client: Client,
    queue_url: String,
    visibility_timeout: i32,
}

impl SqsClient {
    pub async fn new(settings: &QueueSettings) -> Self {
        let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;

        // For LocalStack/local dev, use custom endpoint
        let client = if let Some(endpoint) = &settings.endpoint_url {
            let sqs_config = aws_sdk_sqs::config::Builder::from(&aws_config)
                .endpoint_url(endpoint)
                .build();
            Client::from_conf(sqs_config)
        } else {
            Client::new(&aws_config)
        };

        Self {
            client,
            queue_url: settings.queue_url.clone(),
            visibility_timeout: settings.visibility_timeout_secs as i32,
        }
    }

    pub fn queue_url(&self) -> &str {
        &self.queue_url
    }

    /// Receive up to `max` messages with long polling.
    pub async fn receive_messages(&self, max: usize) -> Result<Vec<SqsMessage>, WorkerError> {
        let response = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(max.clamp(1, SQS_BATCH_LIMIT) as i32)
            .wait_time_seconds(20) // Long polling
            .visibility_timeout(self.visibility_timeout)
            .send()
            .await
            .map_err(|e| WorkerError::Sqs(format!("Failed to receive messages: {e}")))?;

        let messages: Vec<_> = response
            .messages()
            .iter()
            .filter_map(|msg| {
                Some(SqsMessage {
                    body: msg.body()?.to_string(),
                    receipt_handle: msg.receipt_handle()?.to_string(),
                })
            })
            .collect();

        debug!(count = messages.len(), "Received messages");
        Ok(messages)
    }

    /// Delete a message from the queue once its outcome is recorded.
    pub async fn delete_message(&self, receipt_handle: &str) -> Result<(), WorkerError> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| WorkerError::Sqs(format!("Failed to delete message: {e}")))?;

        debug!("Deleted message");
        Ok(())
    }

    /// Extend visibility timeout for a message (for long-running analysis)
    pub async fn extend_visibility(&self, receipt_handle: &str) -> Result<(), WorkerError> {
        self.client
            .change_message_visibility()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .visibility_timeout(self.visibility_timeout)
            .send()
            .await
            .map_err(|e| WorkerError::Sqs(format!("Failed to extend visibility: {e}")))?;

        debug!(timeout_seconds = self.visibility_timeout, "Extended visibility");
        Ok(())
    }

    /// Keep a message hidden while its job runs.
    ///
    /// The extension loop stops when the returned guard is dropped, including
    /// when the task holding it unwinds.
    pub fn keep_hidden(&self, receipt_handle: String) -> Heartbeat {
        let sqs = self.clone();
        let period = Duration::from_secs((self.visibility_timeout.max(2) / 2) as u64);

        Heartbeat::new(tokio::spawn(async move {
            loop {
                tokio::time::sleep(period).await;
                if let Err(e) = sqs.extend_visibility(&receipt_handle).await {
                    warn!(error = %e, "Visibility heartbeat failed");
                }
            }
        }))
    }

    /// Queue a single analysis request.
    pub async fn send_request(&self, request: &AnalysisRequest) -> Result<(), WorkerError> {
        self.client
            .send_message()
            .queue_url(&self.queue_url)
            .message_body(serde_json::to_string(request)?)
            .send()
            .await
            .map_err(|e| WorkerError::Sqs(format!("Failed to send SQS message: {e}")))?;

        Ok(())
    }

    /// Queue many requests in batches; returns how many SQS accepted.
    pub async fn send_requests(&self, requests: &[AnalysisRequest]) -> Result<usize, WorkerError> {
        let mut total_queued = 0;

        for chunk in requests.chunks(SQS_BATCH_LIMIT) {
            let entries = chunk
                .iter()
                .enumerate()
                .map(|(i, request)| {
                    SendMessageBatchRequestEntry::builder()
                        .id(i.to_string())
                        .message_body(serde_json::to_string(request)?)
                        .build()
                        .map_err(|e| WorkerError::Sqs(format!("Invalid batch entry: {e}")))
                })
                .collect::<Result<Vec<_>, WorkerError>>()?;

            let result = self
                .client
                .send_message_batch()
                .queue_url(&self.queue_url)
                .set_entries(Some(entries))
                .send()
                .await
                .map_err(|e| WorkerError::Sqs(format!("Failed to send SQS batch: {e}")))?;

            total_queued += result.successful().len();

            if !result.failed().is_empty() {
                warn!(failed = ?result.failed(), "Some messages failed to queue");
            }
        }

        Ok(total_queued)
    }
}

/// Background visibility extension; aborted on drop.
#[derive(Debug)]
pub struct Heartbeat(JoinHandle<()>);

impl Heartbeat {
    pub fn new(task: JoinHandle<()>) -> Self {
        Self(task)
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json_request() {
        let request = AnalysisRequest::parse(r#"{"gameId": 42, "depth": 18}"#).unwrap();
        assert_eq!(request.game_id, 42);
        assert_eq!(request.depth_or(20), 18);
    }

    #[test]
    fn test_parse_bare_game_id() {
        let request = AnalysisRequest::parse(" 1234\n").unwrap();
        assert_eq!(request.game_id, 1234);
        assert_eq!(request.depth_or(20), 20);
    }

    #[test]
    fn test_missing_or_zero_depth_uses_default() {
        let request = AnalysisRequest::parse(r#"{"gameId": 7}"#).unwrap();
        assert_eq!(request.depth_or(20), 20);
        let request = AnalysisRequest::parse(r#"{"gameId": 7, "depth": 0}"#).unwrap();
        assert_eq!(request.depth_or(20), 20);
    }

    #[test]
    fn test_malformed_bodies() {
        assert!(AnalysisRequest::parse("game 42").is_none());
        assert!(AnalysisRequest::parse(r#"{"depth": 20}"#).is_none());
        assert!(AnalysisRequest::parse("").is_none());
    }

    #[test]
    fn test_request_wire_format() {
        let request = AnalysisRequest {
            game_id: 3,
            depth: Some(30),
        };
        assert_eq!(
            serde_json::to_string(&request).unwrap(),
            r#"{"gameId":3,"depth":30}"#
        );
    }

    #[tokio::test]
    async fn test_heartbeat_stops_when_dropped() {
        let (alive, stopped) = tokio::sync::oneshot::channel::<()>();
        let heartbeat = Heartbeat::new(tokio::spawn(async move {
            let _alive = alive;
            std::future::pending::<()>().await;
        }));

        drop(heartbeat);
        assert!(stopped.await.is_err());
    }

    #[tokio::test]
    async fn test_heartbeat_stops_when_owner_panics() {
        let (alive, stopped) = tokio::sync::oneshot::channel::<()>();
        let owner = tokio::spawn(async move {
            let _heartbeat = Heartbeat::new(tokio::spawn(async move {
                let _alive = alive;
                std::future::pending::<()>().await;
            }));
            panic!("job blew up");
        });

        assert!(owner.await.unwrap_err().is_panic());
        assert!(stopped.await.is_err());
    }
}
