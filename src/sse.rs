//! SSE (Server-Sent Events) frame decoding.
//!
//! Turns a raw byte stream into a lazy sequence of [`SseFrame`]s. Lines are
//! only decoded once complete, so a multi-byte UTF-8 character split across
//! network reads sits in the byte buffer until its line is whole. Dropping
//! the stream drops the underlying response body, which is the release path
//! for early abandonment by the consumer.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::BytesMut;
use futures_util::stream::Stream;

use crate::error::CoreResult;

/// One decoded SSE frame: event name, newline-joined data, optional id.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

/// A boxed stream of decoded frames.
pub type FrameStream = Pin<Box<dyn Stream<Item = CoreResult<SseFrame>> + Send>>;

/// Byte source feeding the decoder. Transport errors are mapped into the
/// crate taxonomy before they reach this stage.
pub type ByteSource = Pin<Box<dyn Stream<Item = CoreResult<bytes::Bytes>> + Send>>;

/// Streaming SSE decoder over a byte source.
///
/// Frames are flushed on a blank line, but only when at least one `data:`
/// line accumulated since the last flush; blank lines that would flush
/// nothing are ignored. A partial frame still holding data when the source
/// ends is flushed as a final frame.
pub struct SseDecoder {
    inner: ByteSource,
    buf: BytesMut,
    event: Option<String>,
    data_lines: Vec<String>,
    id: Option<String>,
    finished: bool,
}

impl SseDecoder {
    pub fn new(inner: ByteSource) -> Self {
        Self {
            inner,
            buf: BytesMut::new(),
            event: None,
            data_lines: Vec::new(),
            id: None,
            finished: false,
        }
    }

    pub fn boxed(self) -> FrameStream {
        Box::pin(self)
    }

    /// Extract the next complete line from the buffer, stripping the
    /// trailing `\n` and an optional `\r` before it.
    fn take_line(&mut self) -> Option<String> {
        let idx = self.buf.iter().position(|&b| b == b'\n')?;
        let mut line = self.buf.split_to(idx + 1);
        line.truncate(idx);
        if line.last() == Some(&b'\r') {
            line.truncate(line.len() - 1);
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// Apply one line to the accumulation state. Returns a frame when the
    /// line completes one.
    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.flush();
        }
        if line.starts_with(':') {
            // comment line
            return None;
        }
        let Some((field, rest)) = line.split_once(':') else {
            // no colon: malformed, ignored
            return None;
        };
        let value = rest.strip_prefix(' ').unwrap_or(rest);
        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data_lines.push(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            // recognized but unused: this client never reconnects
            "retry" => {}
            _ => {}
        }
        None
    }

    /// Emit the accumulated frame if any `data:` line was seen, resetting
    /// the accumulation state either way it fires.
    fn flush(&mut self) -> Option<SseFrame> {
        if self.data_lines.is_empty() {
            return None;
        }
        let frame = SseFrame {
            event: self.event.take(),
            data: self.data_lines.join("\n"),
            id: self.id.take(),
        };
        self.data_lines.clear();
        Some(frame)
    }
}

impl Stream for SseDecoder {
    type Item = CoreResult<SseFrame>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }
        loop {
            // Drain every complete line already buffered.
            while let Some(line) = self.take_line() {
                if let Some(frame) = self.process_line(&line) {
                    return Poll::Ready(Some(Ok(frame)));
                }
            }

            match self.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    self.buf.extend_from_slice(&chunk);
                    continue;
                }
                Poll::Ready(Some(Err(e))) => {
                    self.finished = true;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    self.finished = true;
                    // A trailing line without a final newline still counts.
                    if !self.buf.is_empty() {
                        let tail = String::from_utf8_lossy(&self.buf).into_owned();
                        self.buf.clear();
                        let tail = tail.strip_suffix('\r').unwrap_or(&tail).to_string();
                        if let Some(frame) = self.process_line(&tail) {
                            return Poll::Ready(Some(Ok(frame)));
                        }
                    }
                    return match self.flush() {
                        Some(frame) => Poll::Ready(Some(Ok(frame))),
                        None => Poll::Ready(None),
                    };
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    fn source(chunks: Vec<Vec<u8>>) -> ByteSource {
        Box::pin(futures::stream::iter(
            chunks
                .into_iter()
                .map(|c| Ok(bytes::Bytes::from(c)))
                .collect::<Vec<CoreResult<bytes::Bytes>>>(),
        ))
    }

    async fn decode(chunks: Vec<&str>) -> Vec<SseFrame> {
        let src = source(chunks.into_iter().map(|c| c.as_bytes().to_vec()).collect());
        SseDecoder::new(src)
            .map(|r| r.expect("frame"))
            .collect()
            .await
    }

    #[tokio::test]
    async fn one_frame_per_block() {
        let frames = decode(vec![
            "event: message\ndata: hello\nid: 1\n\n",
            "data: world\n\n",
        ])
        .await;
        assert_eq!(frames.len(), 2);
        assert_eq!(
            frames[0],
            SseFrame {
                event: Some("message".into()),
                data: "hello".into(),
                id: Some("1".into()),
            }
        );
        assert_eq!(frames[1].event, None);
        assert_eq!(frames[1].data, "world");
    }

    #[tokio::test]
    async fn multiple_data_lines_join_with_newline() {
        let frames = decode(vec!["data: first\ndata: second\ndata: third\n\n"]).await;
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "first\nsecond\nthird");
    }

    #[tokio::test]
    async fn blank_lines_without_data_flush_nothing() {
        let frames = decode(vec!["\n\n\ndata: a\n\n\n\n"]).await;
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "a");
    }

    #[tokio::test]
    async fn comments_retry_and_malformed_lines_ignored() {
        let frames = decode(vec![
            ": keep-alive\nretry: 3000\nnonsense without colon\ndata: x\n\n",
        ])
        .await;
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "x");
        assert_eq!(frames[0].event, None);
    }

    #[tokio::test]
    async fn crlf_line_endings_stripped() {
        let frames = decode(vec!["data: a\r\ndata: b\r\n\r\n"]).await;
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "a\nb");
    }

    #[tokio::test]
    async fn colon_space_stripping_is_single_space_only() {
        let frames = decode(vec!["data:no-space\n\ndata:  two spaces\n\n"]).await;
        assert_eq!(frames[0].data, "no-space");
        assert_eq!(frames[1].data, " two spaces");
    }

    #[tokio::test]
    async fn multibyte_char_split_across_reads() {
        // "é" is 0xC3 0xA9; split between the two bytes.
        let mut first = b"data: h".to_vec();
        first.push(0xC3);
        let mut second = vec![0xA9];
        second.extend_from_slice(b"llo\n\n");
        let src = source(vec![first, second]);
        let frames: Vec<SseFrame> = SseDecoder::new(src).map(|r| r.unwrap()).collect().await;
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "héllo");
    }

    #[tokio::test]
    async fn frame_split_across_reads() {
        let frames = decode(vec!["data: hel", "lo\n", "\ndata: bye\n\n"]).await;
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].data, "hello");
        assert_eq!(frames[1].data, "bye");
    }

    #[tokio::test]
    async fn pending_data_flushed_at_end_of_stream() {
        let frames = decode(vec!["data: tail"]).await;
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "tail");
    }

    #[tokio::test]
    async fn event_only_block_produces_no_frame() {
        let frames = decode(vec!["event: ping\n\n"]).await;
        assert!(frames.is_empty());
    }

    #[tokio::test]
    async fn source_error_propagates() {
        let items: Vec<CoreResult<bytes::Bytes>> = vec![
            Ok(bytes::Bytes::from_static(b"data: a\n\n")),
            Err(crate::error::AiStreamError::NetworkOrTimeout {
                message: "connection reset".into(),
            }),
        ];
        let mut dec = SseDecoder::new(Box::pin(futures::stream::iter(items)));
        let first = dec.next().await.unwrap().unwrap();
        assert_eq!(first.data, "a");
        let err = dec.next().await.unwrap().unwrap_err();
        assert!(err.is_retryable());
        assert!(dec.next().await.is_none());
    }
}
