use std::pin::Pin;
use std::task::{Context, Poll};

use futures::stream::Stream;

use tradegraph_core::error::{Result, TradegraphError};

/// Parse a raw SSE byte stream into individual events.
/// SSE format: `event: <type>\ndata: <json>\n\n`
///
/// Bytes are buffered until a block boundary, so multi-byte characters split
/// across network chunks decode correctly.
#[derive(Default)]
pub struct SseParser {
    buffer: Vec<u8>,
}

/// A parsed SSE event.
#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    pub event_type: Option<String>,
    pub data: String,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes into the parser and extract complete events.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend(chunk.iter().filter(|b| **b != b'\r'));
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let block: Vec<u8> = self.buffer.drain(..pos + 2).collect();
            let block = String::from_utf8_lossy(&block[..pos]);

            let mut event_type = None;
            let mut data_lines = Vec::new();

            for line in block.lines() {
                if let Some(val) = line.strip_prefix("event:") {
                    event_type = Some(val.trim_start().to_string());
                } else if let Some(val) = line.strip_prefix("data:") {
                    data_lines.push(val.strip_prefix(' ').unwrap_or(val).to_string());
                }
            }

            if !data_lines.is_empty() {
                events.push(SseEvent {
                    event_type,
                    data: data_lines.join("\n"),
                });
            }
        }

        events
    }
}

/// A stream of SSE events from raw bytes.
///
/// Transport errors end the stream with `LlmStream`.
pub struct SseStream<S> {
    inner: S,
    parser: SseParser,
    pending: std::collections::VecDeque<SseEvent>,
    done: bool,
}

impl<S> SseStream<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            parser: SseParser::new(),
            pending: Default::default(),
            done: false,
        }
    }
}

impl<S, E> Stream for SseStream<S>
where
    S: Stream<Item = std::result::Result<bytes::Bytes, E>> + Unpin,
    E: std::fmt::Display,
{
    type Item = Result<SseEvent>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if let Some(event) = this.pending.pop_front() {
                return Poll::Ready(Some(Ok(event)));
            }
            if this.done {
                return Poll::Ready(None);
            }

            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    this.pending.extend(this.parser.feed(&bytes));
                }
                Poll::Ready(Some(Err(e))) => {
                    this.done = true;
                    return Poll::Ready(Some(Err(TradegraphError::LlmStream(e.to_string()))));
                }
                Poll::Ready(None) => {
                    this.done = true;
                    // A final block without a trailing blank line still counts.
                    this.pending.extend(this.parser.feed(b"\n\n"));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::stream::{self, StreamExt};

    use super::*;

    #[test]
    fn test_sse_parser_basic() {
        let mut parser = SseParser::new();
        let events = parser.feed(b"event: message_start\ndata: {\"type\":\"message_start\"}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type.as_deref(), Some("message_start"));
        assert_eq!(events[0].data, "{\"type\":\"message_start\"}");
    }

    #[test]
    fn test_sse_parser_multiple_events() {
        let mut parser = SseParser::new();
        let events = parser.feed(b"data: {\"x\":1}\r\n\r\ndata:{\"x\":2}\n\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].data, "{\"x\":2}");
    }

    #[test]
    fn test_sse_parser_chunked_utf8() {
        let mut parser = SseParser::new();
        let text = "data: caf\u{e9}\n\n".as_bytes();
        // Split inside the two-byte é.
        let split = text.len() - 3;
        assert!(parser.feed(&text[..split]).is_empty());
        let events = parser.feed(&text[split..]);
        assert_eq!(events[0].data, "caf\u{e9}");
    }

    #[tokio::test]
    async fn test_stream_error_surfaces() {
        let chunks: Vec<std::result::Result<bytes::Bytes, String>> = vec![
            Ok(bytes::Bytes::from_static(b"data: a\n\n")),
            Err("connection reset".into()),
        ];
        let events: Vec<_> = SseStream::new(stream::iter(chunks)).collect().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].as_ref().unwrap().data, "a");
        assert!(matches!(events[1], Err(TradegraphError::LlmStream(_))));
    }

    #[tokio::test]
    async fn test_unterminated_final_block() {
        let chunks: Vec<std::result::Result<bytes::Bytes, String>> =
            vec![Ok(bytes::Bytes::from_static(b"data: [DONE]"))];
        let events: Vec<_> = SseStream::new(stream::iter(chunks)).collect().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].as_ref().unwrap().data, "[DONE]");
    }
}
