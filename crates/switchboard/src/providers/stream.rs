//! Record framing shared by the streaming adapters.
//!
//! Upstream streams are newline-delimited records. TCP chunk boundaries do not
//! line up with record boundaries, so bytes are buffered until a full line is
//! available, and only complete lines are handed to the vendor decoder.
//! Lines may carry an SSE `data:` prefix or be bare JSON.

use std::mem;
use std::time::Duration;

use async_stream::try_stream;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::time::timeout;
use tracing::{debug, warn};

use super::base::EventStream;
use crate::errors::GatewayError;
use crate::models::completion::StreamEvent;

/// Why a single record could not be used
#[derive(Debug)]
pub enum RecordError {
    /// The record is unreadable; it is logged and skipped
    Malformed(String),
    /// The upstream reported a failure inside the stream; the turn aborts
    Fatal(GatewayError),
}

impl From<serde_json::Error> for RecordError {
    fn from(err: serde_json::Error) -> Self {
        RecordError::Malformed(err.to_string())
    }
}

/// Vendor specific interpretation of stream records
pub trait RecordDecoder: Send + 'static {
    /// Decode one record payload (prefix already stripped) into canonical events.
    /// A terminal event ends the stream; anything after it is dropped.
    fn decode(&mut self, payload: &str) -> Result<Vec<StreamEvent>, RecordError>;

    /// Terminal event to synthesize when the upstream closes without sending one
    fn finish(&mut self) -> StreamEvent;

    /// Whether the upstream already signalled the end of the answer and only
    /// trailing metadata may still arrive
    fn is_finishing(&self) -> bool {
        false
    }
}

/// How long to wait for trailing records once the decoder is finishing
pub const FINISH_GRACE: Duration = Duration::from_millis(500);

/// Accumulates raw bytes and hands out complete lines
#[derive(Debug, Default)]
pub struct LineBuffer {
    buffer: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed. A trailing partial
    /// line stays buffered for the next call.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buffer[start..].iter().position(|b| *b == b'\n') {
            let end = start + offset;
            lines.push(decode_line(&self.buffer[start..end]));
            start = end + 1;
        }
        self.buffer.drain(..start);
        lines
    }

    /// Return whatever is left once the byte stream has ended
    pub fn flush(&mut self) -> Option<String> {
        let rest = mem::take(&mut self.buffer);
        if rest.iter().all(u8::is_ascii_whitespace) {
            None
        } else {
            Some(decode_line(&rest))
        }
    }
}

fn decode_line(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_end_matches('\r')
        .to_string()
}

/// Extract the payload of a record line, or `None` for lines that carry no
/// payload (blank separators, comments, `event:`/`id:`/`retry:` fields).
pub fn record_payload(line: &str) -> Option<&str> {
    let line = line.trim();
    if line.is_empty() || line.starts_with(':') {
        return None;
    }
    if let Some(data) = line.strip_prefix("data:") {
        let data = data.trim();
        return if data.is_empty() { None } else { Some(data) };
    }
    if line.starts_with("event:") || line.starts_with("id:") || line.starts_with("retry:") {
        return None;
    }
    Some(line)
}

/// Turn an upstream byte stream into canonical events.
///
/// Guarantees at most one terminal event. Malformed records are skipped; a
/// stream that yields no usable record at all fails with a protocol error.
/// Each chunk read is bounded by `read_timeout`. Once the decoder reports it
/// is finishing, an idle upstream ends the stream after [`FINISH_GRACE`]
/// instead of failing it.
pub fn decode_stream<S, D>(
    byte_stream: S,
    mut decoder: D,
    read_timeout: Duration,
    provider: &'static str,
) -> EventStream
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static,
    D: RecordDecoder,
{
    Box::pin(try_stream! {
        let mut byte_stream = Box::pin(byte_stream);
        let mut lines = LineBuffer::new();
        let mut parsed = 0usize;
        let mut terminated = false;

        'read: loop {
            let wait = if decoder.is_finishing() {
                read_timeout.min(FINISH_GRACE)
            } else {
                read_timeout
            };
            let chunk = match timeout(wait, byte_stream.next()).await {
                Ok(Some(chunk)) => Some(chunk.map_err(GatewayError::from)?),
                Ok(None) => None,
                Err(_) if decoder.is_finishing() => {
                    debug!(provider, "upstream idle after finish reason, closing stream");
                    break 'read;
                }
                Err(_) => {
                    Err::<(), _>(GatewayError::UpstreamTimeout(format!(
                        "{} stream idle for {:?}",
                        provider, read_timeout
                    )))?;
                    None
                }
            };

            let records = match &chunk {
                Some(bytes) => lines.feed(bytes),
                None => lines.flush().into_iter().collect(),
            };

            for record in records {
                let Some(payload) = record_payload(&record) else {
                    continue;
                };
                match decoder.decode(payload) {
                    Ok(events) => {
                        parsed += 1;
                        for event in events {
                            let done = event.is_complete;
                            yield event;
                            if done {
                                terminated = true;
                                break 'read;
                            }
                        }
                    }
                    Err(RecordError::Malformed(reason)) => {
                        warn!(provider, %reason, "skipping malformed stream record");
                        debug!(provider, record = %payload, "malformed record payload");
                    }
                    Err(RecordError::Fatal(err)) => {
                        Err::<(), _>(err)?;
                    }
                }
            }

            if chunk.is_none() {
                break;
            }
        }

        if !terminated {
            if parsed == 0 {
                Err::<(), _>(GatewayError::Protocol(format!(
                    "{} stream ended without any parseable records",
                    provider
                )))?;
            }
            if !decoder.is_finishing() {
                warn!(provider, "stream ended without a terminal record");
            }
            yield decoder.finish();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[test]
    fn test_line_buffer_holds_partial_lines() {
        let mut buffer = LineBuffer::new();
        assert!(buffer.feed(b"data: {\"a\":").is_empty());
        let lines = buffer.feed(b"1}\r\ndata: {\"b\":2}\n\ndata: {\"c\"");
        assert_eq!(lines, vec!["data: {\"a\":1}", "data: {\"b\":2}", ""]);
        assert_eq!(buffer.flush().as_deref(), Some("data: {\"c\""));
        assert_eq!(buffer.flush(), None);
    }

    #[test]
    fn test_line_buffer_keeps_split_utf8() {
        let mut buffer = LineBuffer::new();
        let text = "data: héllo\n".as_bytes();
        // split inside the two-byte 'é'
        assert!(buffer.feed(&text[..8]).is_empty());
        assert_eq!(buffer.feed(&text[8..]), vec!["data: héllo"]);
    }

    #[test]
    fn test_record_payload() {
        assert_eq!(record_payload("data: {\"x\":1}"), Some("{\"x\":1}"));
        assert_eq!(record_payload("data:[DONE]"), Some("[DONE]"));
        assert_eq!(record_payload("{\"bare\":true}"), Some("{\"bare\":true}"));
        assert_eq!(record_payload("event: message_start"), None);
        assert_eq!(record_payload(": keep-alive"), None);
        assert_eq!(record_payload("data: "), None);
        assert_eq!(record_payload("   "), None);
    }

    /// Emits each record's text as a delta; "end" is terminal, "reason"
    /// marks the answer as finished without ending the stream
    #[derive(Default)]
    struct TextDecoder {
        reason: Option<String>,
    }

    impl RecordDecoder for TextDecoder {
        fn decode(&mut self, payload: &str) -> Result<Vec<StreamEvent>, RecordError> {
            let value: serde_json::Value = serde_json::from_str(payload)?;
            if let Some(reason) = value["reason"].as_str() {
                self.reason = Some(reason.to_string());
                return Ok(Vec::new());
            }
            if value["end"].as_bool() == Some(true) {
                return Ok(vec![StreamEvent::terminal("t", Some("stop".into()))]);
            }
            if let Some(message) = value["fail"].as_str() {
                return Err(RecordError::Fatal(GatewayError::Protocol(message.into())));
            }
            Ok(vec![StreamEvent::delta("t", value["text"].as_str().unwrap_or(""))])
        }

        fn finish(&mut self) -> StreamEvent {
            StreamEvent::terminal("t", self.reason.take())
        }

        fn is_finishing(&self) -> bool {
            self.reason.is_some()
        }
    }

    fn chunks(parts: &[&'static str]) -> impl Stream<Item = Result<Bytes, reqwest::Error>> {
        stream::iter(
            parts
                .iter()
                .map(|p| Ok(Bytes::from_static(p.as_bytes())))
                .collect::<Vec<_>>(),
        )
    }

    async fn collect(parts: &[&'static str]) -> Vec<Result<StreamEvent, GatewayError>> {
        decode_stream(chunks(parts), TextDecoder::default(), Duration::from_secs(1), "test")
            .collect()
            .await
    }

    #[tokio::test]
    async fn test_decode_stream_skips_malformed_records() {
        let events = collect(&[
            "data: {\"text\":\"Hel\"}\n",
            "data: not json\n",
            "data: {\"te",
            "xt\":\"lo\"}\n",
            "data: {\"end\":true}\n",
            "data: {\"text\":\"ignored\"}\n",
        ])
        .await;

        let events: Vec<StreamEvent> = events.into_iter().map(Result::unwrap).collect();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].content_delta.as_deref(), Some("Hel"));
        assert_eq!(events[1].content_delta.as_deref(), Some("lo"));
        assert!(events[2].is_complete);
    }

    #[tokio::test]
    async fn test_decode_stream_without_records_is_protocol_error() {
        let events = collect(&[": ping\n", "data: garbage\n"]).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Err(GatewayError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_decode_stream_synthesizes_terminal() {
        let events = collect(&["data: {\"text\":\"a\"}"]).await;
        assert_eq!(events.len(), 2);
        let last = events[1].as_ref().unwrap();
        assert!(last.is_complete);
        assert_eq!(last.finish_reason, None);
    }

    #[tokio::test]
    async fn test_decode_stream_fatal_record_aborts() {
        let events = collect(&["data: {\"text\":\"a\"}\n", "data: {\"fail\":\"boom\"}\n"]).await;
        assert_eq!(events.len(), 2);
        assert!(events[0].is_ok());
        assert_eq!(events[1], Err(GatewayError::Protocol("boom".into())));
    }

    #[tokio::test]
    async fn test_idle_upstream_times_out() {
        let parts = chunks(&["data: {\"text\":\"a\"}\n"]).chain(stream::pending());
        let events: Vec<_> = decode_stream(
            parts,
            TextDecoder::default(),
            Duration::from_millis(50),
            "test",
        )
        .collect()
        .await;

        assert_eq!(events.len(), 2);
        assert!(events[0].is_ok());
        assert!(matches!(events[1], Err(GatewayError::UpstreamTimeout(_))));
    }

    #[tokio::test]
    async fn test_idle_upstream_after_finish_reason_completes() {
        let parts = chunks(&[
            "data: {\"text\":\"a\"}\n",
            "data: {\"reason\":\"stop\"}\n",
        ])
        .chain(stream::pending());
        let events: Vec<_> = decode_stream(
            parts,
            TextDecoder::default(),
            Duration::from_millis(50),
            "test",
        )
        .collect()
        .await;

        assert_eq!(events.len(), 2);
        let last = events[1].as_ref().unwrap();
        assert!(last.is_complete);
        assert_eq!(last.finish_reason.as_deref(), Some("stop"));
    }
}
