use serde::{Deserialize, Serialize};

use crate::stream::sse::SseEvent;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PageStatus {
    Generating,
    Done,
    Error,
    /// Batch markers and statuses added server-side later.
    #[serde(other)]
    Other,
}

/// Per-page update carried by `progress`, `complete` and `error` events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PageEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
    pub status: PageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

/// Terminal summary of a generation task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FinishEvent {
    pub success: bool,
    pub task_id: String,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed: Option<u32>,
    #[serde(default)]
    pub failed_indices: Vec<u32>,
}

/// Named payload event pushed by the task stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Progress(PageEvent),
    Complete(PageEvent),
    /// Domain-level page failure, distinct from a transport error.
    Error(PageEvent),
    Finish(FinishEvent),
}

impl ServerEvent {
    /// Maps a raw SSE event onto a payload event.
    ///
    /// Returns `Ok(None)` for unknown event names and for `error` events
    /// without a body.
    pub fn from_sse(event: &SseEvent) -> Result<Option<Self>, serde_json::Error> {
        let parsed = match event.event.as_str() {
            "progress" => Self::Progress(serde_json::from_str(&event.data)?),
            "complete" => Self::Complete(serde_json::from_str(&event.data)?),
            "error" if event.data.trim().is_empty() => return Ok(None),
            "error" => Self::Error(serde_json::from_str(&event.data)?),
            "finish" => Self::Finish(serde_json::from_str(&event.data)?),
            _ => return Ok(None),
        };
        Ok(Some(parsed))
    }

    pub fn is_finish(&self) -> bool {
        matches!(self, Self::Finish(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_event_from_backend_payload() {
        let raw = SseEvent::new(
            "progress",
            r#"{"index":0,"status":"generating","message":"cover","current":1,"total":6,"phase":"cover"}"#,
        );
        let Some(ServerEvent::Progress(page)) = ServerEvent::from_sse(&raw).expect("parse") else {
            panic!("expected progress event");
        };
        assert_eq!(page.index, Some(0));
        assert_eq!(page.status, PageStatus::Generating);
        assert_eq!(page.total, Some(6));
        assert_eq!(page.phase.as_deref(), Some("cover"));
    }

    #[test]
    fn batch_start_status_maps_to_other() {
        let raw = SseEvent::new(
            "progress",
            r#"{"status":"batch_start","current":1,"total":6,"phase":"content"}"#,
        );
        let Some(ServerEvent::Progress(page)) = ServerEvent::from_sse(&raw).expect("parse") else {
            panic!("expected progress event");
        };
        assert_eq!(page.status, PageStatus::Other);
        assert_eq!(page.index, None);
    }

    #[test]
    fn complete_event_carries_candidates() {
        let raw = SseEvent::new(
            "complete",
            r#"{"index":2,"status":"done","image_url":"/api/images/a.png","candidates":["/api/images/b.png"],"phase":"content"}"#,
        );
        let Some(ServerEvent::Complete(page)) = ServerEvent::from_sse(&raw).expect("parse") else {
            panic!("expected complete event");
        };
        assert_eq!(page.image_url.as_deref(), Some("/api/images/a.png"));
        assert_eq!(page.candidates, vec!["/api/images/b.png".to_string()]);
    }

    #[test]
    fn error_event_requires_body() {
        let empty = SseEvent::new("error", "  ");
        assert_eq!(ServerEvent::from_sse(&empty).expect("parse"), None);

        let with_body = SseEvent::new(
            "error",
            r#"{"index":3,"status":"error","message":"quota","retryable":true}"#,
        );
        let Some(ServerEvent::Error(page)) = ServerEvent::from_sse(&with_body).expect("parse")
        else {
            panic!("expected error event");
        };
        assert_eq!(page.retryable, Some(true));
    }

    #[test]
    fn finish_event_summary() {
        let raw = SseEvent::new(
            "finish",
            r#"{"success":false,"task_id":"t1","images":["a.png"],"total":2,"completed":1,"failed":1,"failed_indices":[1]}"#,
        );
        let event = ServerEvent::from_sse(&raw).expect("parse").expect("finish");
        assert!(event.is_finish());
        let ServerEvent::Finish(finish) = event else {
            unreachable!();
        };
        assert_eq!(finish.failed_indices, vec![1]);
        assert_eq!(finish.images, vec!["a.png".to_string()]);
    }

    #[test]
    fn unknown_event_names_are_skipped() {
        let raw = SseEvent::new("message", "{}");
        assert_eq!(ServerEvent::from_sse(&raw).expect("parse"), None);
    }

    #[test]
    fn malformed_payload_is_an_error() {
        let raw = SseEvent::new("progress", "not json");
        assert!(ServerEvent::from_sse(&raw).is_err());
    }
}
