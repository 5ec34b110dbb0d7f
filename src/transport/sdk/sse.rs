//! SSE (Server-Sent Events) stream decoder for vendor LLM APIs.
//!
//! Handles the `data: ` prefix, `[DONE]` termination, line buffering
//! across TCP chunk boundaries, empty keep-alive lines, and `event:`
//! names (the Anthropic stream dispatches on them).

use serde_json::Value;

/// One decoded SSE event: the optional `event:` name and the parsed
/// `data:` JSON payload.
#[derive(Debug, Clone)]
pub struct SseEvent {
    /// The `event:` line preceding the data, if any.
    pub event: Option<String>,
    /// The parsed JSON payload of the `data:` line.
    pub data: Value,
}

/// Buffered SSE decoder.
///
/// # Example
///
/// ```
/// use pynector::transport::sdk::sse::SseDecoder;
///
/// let mut decoder = SseDecoder::new();
/// let events = decoder.decode(b"data: {\"x\":1}\n\ndata: [DONE]\n\n");
/// assert_eq!(events.len(), 1);
/// assert_eq!(events[0].data["x"], 1);
/// ```
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: String,
    current_event: Option<String>,
}

impl SseDecoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes and return any complete events.
    ///
    /// `event:` lines set the name attached to subsequent `data:` lines
    /// in the same block; a blank line ends the block. The `[DONE]`
    /// terminator is swallowed.
    pub fn decode(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        let text = String::from_utf8_lossy(chunk);
        self.buffer.push_str(&text);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            self.consume_line(line.trim(), &mut events);
        }
        events
    }

    /// Flush any trailing buffered line after the stream ends.
    pub fn flush(&mut self) -> Vec<SseEvent> {
        let remaining = std::mem::take(&mut self.buffer);
        let mut events = Vec::new();
        for line in remaining.lines() {
            self.consume_line(line.trim(), &mut events);
        }
        self.current_event = None;
        events
    }

    fn consume_line(&mut self, line: &str, events: &mut Vec<SseEvent>) {
        if line.is_empty() {
            self.current_event = None;
            return;
        }
        if let Some(name) = line.strip_prefix("event:") {
            self.current_event = Some(name.trim().to_string());
            return;
        }
        if let Some(data) = line
            .strip_prefix("data: ")
            .or_else(|| line.strip_prefix("data:"))
        {
            let data = data.trim();
            if data == "[DONE]" {
                return;
            }
            if let Ok(value) = serde_json::from_str::<Value>(data) {
                events.push(SseEvent {
                    event: self.current_event.clone(),
                    data: value,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_decode() {
        let mut decoder = SseDecoder::new();
        let events = decoder.decode(b"data: {\"choices\":[{\"delta\":{\"content\":\"Hello\"}}]}\n\n");
        assert_eq!(events.len(), 1);
        assert!(events[0].data["choices"][0]["delta"]["content"].is_string());
        assert!(events[0].event.is_none());
    }

    #[test]
    fn test_done_swallowed() {
        let mut decoder = SseDecoder::new();
        let events = decoder.decode(b"data: {\"x\":1}\n\ndata: [DONE]\n\n");
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_event_names_attached() {
        let mut decoder = SseDecoder::new();
        let events = decoder.decode(
            b"event: content_block_delta\ndata: {\"delta\":{\"type\":\"text_delta\",\"text\":\"Hi\"}}\n\n",
        );
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.as_deref(), Some("content_block_delta"));
        assert_eq!(events[0].data["delta"]["text"], "Hi");
    }

    #[test]
    fn test_event_name_cleared_at_block_end() {
        let mut decoder = SseDecoder::new();
        let events = decoder.decode(b"event: ping\ndata: {\"a\":1}\n\ndata: {\"b\":2}\n\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event.as_deref(), Some("ping"));
        assert!(events[1].event.is_none());
    }

    #[test]
    fn test_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.decode(b"data: {\"cho").is_empty());
        let events = decoder.decode(b"ices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\n");
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_keep_alive_lines_ignored() {
        let mut decoder = SseDecoder::new();
        let events = decoder.decode(b"\n\n\ndata: {\"x\":1}\n\n\n\n");
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_multiple_events() {
        let mut decoder = SseDecoder::new();
        let events = decoder.decode(b"data: {\"a\":1}\n\ndata: {\"a\":2}\n\ndata: {\"a\":3}\n\n");
        assert_eq!(events.len(), 3);
    }

    #[test]
    fn test_flush_trailing_line() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.decode(b"data: {\"done\":true}").is_empty());
        let events = decoder.flush();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data["done"], true);
    }

    #[test]
    fn test_flush_empty() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.flush().is_empty());
    }
}
