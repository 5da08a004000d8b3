//! `text/event-stream` framing.
//!
//! Incremental decoder: feed it body chunks as they arrive and collect the
//! events completed by each chunk. Line terminators may be split across
//! chunks.

use std::mem;
use std::time::Duration;

const DEFAULT_EVENT: &str = "message";
const BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// One dispatched server-sent event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SseEvent {
    /// Event name; `message` when the server sent none.
    pub event: String,
    pub data: String,
    /// Last event id in effect when this event was dispatched.
    pub id: Option<String>,
}

impl SseEvent {
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            data: data.into(),
            id: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    line: Vec<u8>,
    skip_lf: bool,
    started: bool,
    event: String,
    data: String,
    last_event_id: Option<String>,
    retry: Option<Duration>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes a body chunk and returns the events it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        let mut events = Vec::new();
        let head;
        let bytes = if self.started {
            chunk
        } else {
            // Bytes are held until they can no longer be a partial BOM.
            self.line.extend_from_slice(chunk);
            if self.line.len() < BOM.len() && BOM.starts_with(&self.line) {
                return events;
            }
            self.started = true;
            head = mem::take(&mut self.line);
            head.strip_prefix(BOM).unwrap_or(&head[..])
        };

        for &byte in bytes {
            if self.skip_lf {
                self.skip_lf = false;
                if byte == b'\n' {
                    continue;
                }
            }
            match byte {
                b'\n' => self.finish_line(&mut events),
                b'\r' => {
                    self.finish_line(&mut events);
                    self.skip_lf = true;
                }
                other => self.line.push(other),
            }
        }

        events
    }

    /// Drops partial state from a broken connection. The last event id and
    /// retry hint survive so the next connection can resume.
    pub fn reset_connection(&mut self) {
        self.line.clear();
        self.skip_lf = false;
        self.started = false;
        self.event.clear();
        self.data.clear();
    }

    pub fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }

    /// Reconnect delay requested by the server with a `retry:` field.
    pub fn retry(&self) -> Option<Duration> {
        self.retry
    }

    fn finish_line(&mut self, events: &mut Vec<SseEvent>) {
        let raw = mem::take(&mut self.line);
        let line = String::from_utf8_lossy(&raw);

        if line.is_empty() {
            if let Some(event) = self.dispatch() {
                events.push(event);
            }
            return;
        }
        if line.starts_with(':') {
            return;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (&*line, ""),
        };

        match field {
            "event" => self.event = value.to_string(),
            "data" => {
                self.data.push_str(value);
                self.data.push('\n');
            }
            "id" if !value.contains('\0') => {
                self.last_event_id = (!value.is_empty()).then(|| value.to_string());
            }
            "retry" => {
                if !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit()) {
                    if let Ok(millis) = value.parse::<u64>() {
                        self.retry = Some(Duration::from_millis(millis));
                    }
                }
            }
            _ => {}
        }
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = mem::take(&mut self.event);
        let mut data = mem::take(&mut self.data);
        if data.is_empty() {
            return None;
        }
        if data.ends_with('\n') {
            data.pop();
        }

        Some(SseEvent {
            event: if event.is_empty() {
                DEFAULT_EVENT.to_string()
            } else {
                event
            },
            data,
            id: self.last_event_id.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{SseDecoder, SseEvent};

    #[test]
    fn decodes_named_event() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b"event: progress\ndata: {\"index\":0}\n\n");
        assert_eq!(events, vec![SseEvent::new("progress", "{\"index\":0}")]);
    }

    #[test]
    fn unnamed_event_defaults_to_message() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b"data: hello\n\n");
        assert_eq!(events[0].event, "message");
    }

    #[test]
    fn multi_line_data_is_joined() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b"data: first\ndata:second\ndata:  third\n\n");
        assert_eq!(events[0].data, "first\nsecond\n third");
    }

    #[test]
    fn crlf_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"event: finish\r").is_empty());
        assert!(decoder.feed(b"\ndata: {}\r").is_empty());
        let events = decoder.feed(b"\n\r\n");
        assert_eq!(events, vec![SseEvent::new("finish", "{}")]);
    }

    #[test]
    fn bare_cr_terminates_lines() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b"event: complete\rdata: x\r\r");
        assert_eq!(events, vec![SseEvent::new("complete", "x")]);
    }

    #[test]
    fn comments_and_unknown_fields_are_ignored() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b": keep-alive\nfoo: bar\ndata: ok\n\n");
        assert_eq!(events, vec![SseEvent::new("message", "ok")]);
    }

    #[test]
    fn event_without_data_is_not_dispatched() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"event: error\n\n").is_empty());
        let events = decoder.feed(b"data: later\n\n");
        assert_eq!(events[0].event, "message");
    }

    #[test]
    fn id_and_retry_persist() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b"id: 7\nretry: 2500\ndata: a\n\ndata: b\n\n");
        assert_eq!(events[0].id.as_deref(), Some("7"));
        assert_eq!(events[1].id.as_deref(), Some("7"));
        assert_eq!(decoder.retry(), Some(Duration::from_millis(2500)));

        decoder.feed(b"retry: soon\n");
        assert_eq!(decoder.retry(), Some(Duration::from_millis(2500)));
    }

    #[test]
    fn reset_keeps_resume_state() {
        let mut decoder = SseDecoder::new();
        decoder.feed(b"id: 3\ndata: done\n\nevent: progress\ndata: partial");
        decoder.reset_connection();
        assert_eq!(decoder.last_event_id(), Some("3"));

        let events = decoder.feed(b"data: fresh\n\n");
        assert_eq!(events, vec![SseEvent {
            event: "message".to_string(),
            data: "fresh".to_string(),
            id: Some("3".to_string()),
        }]);
    }

    #[test]
    fn leading_bom_is_skipped() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b"\xEF\xBB\xBFdata: x\n\n");
        assert_eq!(events, vec![SseEvent::new("message", "x")]);
    }

    #[test]
    fn bom_split_across_chunks_is_skipped() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"\xEF").is_empty());
        assert!(decoder.feed(b"\xBB").is_empty());
        let events = decoder.feed(b"\xBFdata: x\n\n");
        assert_eq!(events, vec![SseEvent::new("message", "x")]);
    }

    #[test]
    fn short_first_chunk_without_bom_is_kept() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"d").is_empty());
        assert!(decoder.feed(b"a").is_empty());
        let events = decoder.feed(b"ta: y\n\n");
        assert_eq!(events, vec![SseEvent::new("message", "y")]);
    }

    #[test]
    fn utf8_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        let text = "data: 封面\n\n".as_bytes();
        let (head, tail) = text.split_at(8);
        assert!(decoder.feed(head).is_empty());
        let events = decoder.feed(tail);
        assert_eq!(events[0].data, "封面");
    }
}
