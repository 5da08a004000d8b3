//! Generation task endpoints.
//!
//! Request bodies and most results are passed through as JSON; only the
//! task acknowledgement is typed because stream subscriptions need its id.
//! Batch retries answer with a finite event-stream body, decoded into a
//! [`RetryBatch`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::api::client::{ApiClient, ApiError, ApiRequest};
use crate::stream::proto::ServerEvent;
use crate::stream::sse::SseDecoder;

const RETRY_START_EVENT: &str = "retry_start";
const RETRY_FINISH_EVENT: &str = "retry_finish";

/// Acknowledgement of an accepted asynchronous task (HTTP 202).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskAccepted {
    pub success: bool,
    pub task_id: String,
    #[serde(default)]
    pub status: Option<String>,
}

/// Closing tally of a batch retry.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetrySummary {
    pub success: bool,
    #[serde(default)]
    pub total: u32,
    #[serde(default)]
    pub completed: u32,
    #[serde(default)]
    pub failed: u32,
}

/// Events of a batch retry in arrival order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RetryBatch {
    /// Pages retried, from `retry_start`.
    pub total: Option<u32>,
    /// `complete` and `error` page events.
    pub pages: Vec<ServerEvent>,
    /// `None` when the body ended without `retry_finish`.
    pub summary: Option<RetrySummary>,
}

impl RetryBatch {
    pub fn is_complete(&self) -> bool {
        self.summary.is_some()
    }
}

#[derive(Clone)]
pub struct TasksApi {
    api: ApiClient,
}

impl TasksApi {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    /// Queues an outline generation task.
    pub async fn create_outline(&self, body: &Value) -> Result<TaskAccepted, ApiError> {
        accepted(self.api.post_json("/outline", body).await?)
    }

    pub async fn outline_status(&self, task_id: &str) -> Result<Value, ApiError> {
        self.api.get_json(&format!("/outline/{task_id}")).await
    }

    /// Queues image generation for a set of outline pages. Progress is then
    /// followed with a stream session on the returned task id.
    pub async fn start_image_generation(&self, body: &Value) -> Result<TaskAccepted, ApiError> {
        accepted(self.api.post_json("/generate", body).await?)
    }

    pub async fn image_task(&self, task_id: &str) -> Result<Value, ApiError> {
        self.api.get_json(&format!("/generate/{task_id}")).await
    }

    pub async fn task_status(&self, task_id: &str) -> Result<Value, ApiError> {
        self.api.get_json(&format!("/task/{task_id}")).await
    }

    /// Retries one failed page (`task_id`, `page`, optional `use_reference`).
    pub async fn retry_image(&self, body: &Value) -> Result<Value, ApiError> {
        self.api.post_json("/retry", body).await
    }

    /// Generates a fresh candidate for a page, even one that succeeded.
    pub async fn regenerate_image(&self, body: &Value) -> Result<Value, ApiError> {
        self.api.post_json("/regenerate", body).await
    }

    /// Retries every listed page (`task_id`, `pages`). The server streams the
    /// results in the response body and closes it when the batch is done.
    pub async fn retry_failed(&self, body: &Value) -> Result<RetryBatch, ApiError> {
        let response = self
            .api
            .send(ApiRequest::post("/retry-failed").with_json(body)?)
            .await?;
        decode_retry_batch(response.body())
    }
}

fn decode_retry_batch(body: &str) -> Result<RetryBatch, ApiError> {
    let mut decoder = SseDecoder::new();
    let mut events = decoder.feed(body.as_bytes());
    // A body without a trailing blank line still completes its last event.
    events.extend(decoder.feed(b"\n\n"));

    let mut batch = RetryBatch::default();
    for event in events {
        match event.event.as_str() {
            RETRY_START_EVENT => {
                let start: Value = serde_json::from_str(&event.data)
                    .map_err(|err| ApiError::Parse(err.to_string()))?;
                batch.total = start["total"].as_u64().and_then(|n| u32::try_from(n).ok());
            }
            RETRY_FINISH_EVENT => {
                batch.summary = Some(
                    serde_json::from_str(&event.data)
                        .map_err(|err| ApiError::Parse(err.to_string()))?,
                );
            }
            _ => match ServerEvent::from_sse(&event) {
                Ok(Some(page)) => batch.pages.push(page),
                Ok(None) => debug!(event = "retry_event_ignored", name = %event.event),
                Err(err) => return Err(ApiError::Parse(err.to_string())),
            },
        }
    }
    Ok(batch)
}

fn accepted(ack: TaskAccepted) -> Result<TaskAccepted, ApiError> {
    if !ack.success || ack.task_id.is_empty() {
        return Err(ApiError::Rejected(format!(
            "task was not accepted (task_id={:?})",
            ack.task_id
        )));
    }
    Ok(ack)
}
