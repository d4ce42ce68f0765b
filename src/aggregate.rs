//! Delta aggregation.
//!
//! Consumes decoded SSE frames from a successful streaming response and
//! reconstructs the complete assistant message: text deltas are appended in
//! arrival order, tool-call argument fragments are concatenated per call,
//! and the finish reason is last-writer-wins. An in-band error frame or a
//! malformed payload fails the stream immediately; the half-built aggregate
//! is never returned as if complete.

use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::stream::Stream;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{AiStreamError, CoreResult};
use crate::model::{Completion, ToolArguments, ToolCall, Usage};
use crate::sse::{FrameStream, SseFrame};
use crate::stream::{CompletionStream, StreamEvent};

/// Literal frame data marking end of stream, sent in place of JSON.
pub const DONE_SENTINEL: &str = "[DONE]";

// ---- Wire structs (chunk payload) ----

#[derive(Deserialize)]
struct ChunkPayload {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Delta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCallFragment>,
}

#[derive(Deserialize)]
struct ToolCallFragment {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    index: u32,
    #[serde(default)]
    function: Option<FunctionFragment>,
}

#[derive(Deserialize)]
struct FunctionFragment {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

/// Tagged view of one frame's payload. Decoded with explicit presence
/// checks so unexpected shapes degrade to `Unknown` instead of failing.
enum FramePayload {
    Chunk(ChunkPayload),
    Error { message: String },
    Done,
    Malformed,
    Unknown,
}

fn decode_payload(frame: &SseFrame) -> FramePayload {
    if let Some(event) = frame.event.as_deref() {
        if event.eq_ignore_ascii_case("error") {
            return FramePayload::Error {
                message: error_message(&frame.data),
            };
        }
        if event.eq_ignore_ascii_case("done") {
            return FramePayload::Done;
        }
    }
    if frame.data.trim() == DONE_SENTINEL {
        return FramePayload::Done;
    }
    let Ok(value) = serde_json::from_str::<Value>(&frame.data) else {
        return FramePayload::Malformed;
    };
    if value.get("error").is_some() {
        return FramePayload::Error {
            message: error_message(&frame.data),
        };
    }
    if value.get("choices").is_some() {
        return match serde_json::from_value::<ChunkPayload>(value) {
            Ok(chunk) => FramePayload::Chunk(chunk),
            Err(_) => FramePayload::Unknown,
        };
    }
    FramePayload::Unknown
}

/// Best-effort message extraction from an error payload; falls back to the
/// raw data when it is not the usual `{"error":{"message":...}}` shape.
fn error_message(data: &str) -> String {
    serde_json::from_str::<Value>(data)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| data.to_string())
}

/// What applying one frame tells the driving loop to do.
#[derive(Debug)]
pub enum Step {
    /// Keep consuming; the frame contributed these text deltas (possibly none).
    Deltas(Vec<String>),
    /// The stream signalled completion; stop consuming frames.
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ToolKey {
    Id(String),
    Index(u32),
}

#[derive(Debug, Default)]
struct ToolCallBuilder {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

/// Owned accumulation state for one stream. Frames go in via
/// [`apply`](Aggregator::apply); the reconstructed [`Completion`] comes out
/// of [`finish`](Aggregator::finish) once the stream has closed.
#[derive(Debug, Default)]
pub struct Aggregator {
    closed: bool,
    content: String,
    // arrival order matters for the finalized tool-call sequence
    tools: Vec<(ToolKey, ToolCallBuilder)>,
    finish_reason: Option<String>,
    usage: Option<Usage>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one frame into the aggregate.
    ///
    /// Terminal failures (error frame, malformed payload) are returned as
    /// errors and the aggregator must not be fed further frames; the caller
    /// discards it rather than finalizing.
    pub fn apply(&mut self, frame: &SseFrame) -> CoreResult<Step> {
        if self.closed {
            return Ok(Step::Done);
        }
        match decode_payload(frame) {
            FramePayload::Done => {
                self.closed = true;
                Ok(Step::Done)
            }
            FramePayload::Error { message } => Err(AiStreamError::StreamProtocol {
                message,
                data: frame.data.clone(),
            }),
            FramePayload::Malformed => Err(AiStreamError::StreamProtocol {
                message: "malformed frame payload".into(),
                data: frame.data.clone(),
            }),
            FramePayload::Unknown => Ok(Step::Deltas(Vec::new())),
            FramePayload::Chunk(chunk) => {
                let mut deltas = Vec::new();
                for choice in chunk.choices {
                    if let Some(text) = choice.delta.content
                        && !text.is_empty()
                    {
                        self.content.push_str(&text);
                        deltas.push(text);
                    }
                    for fragment in choice.delta.tool_calls {
                        self.apply_tool_fragment(fragment);
                    }
                    if let Some(reason) = choice.finish_reason {
                        // last writer wins
                        self.finish_reason = Some(reason);
                    }
                }
                if let Some(usage) = chunk.usage {
                    self.usage = Some(usage);
                }
                Ok(Step::Deltas(deltas))
            }
        }
    }

    fn apply_tool_fragment(&mut self, fragment: ToolCallFragment) {
        let builder = self.builder_for(fragment.id, fragment.index);
        if let Some(function) = fragment.function {
            if let Some(name) = function.name {
                builder.name = Some(name);
            }
            if let Some(args) = function.arguments {
                builder.arguments.push_str(&args);
            }
        }
    }

    /// Locate (or create) the buffer a fragment belongs to: keyed by `id`
    /// when present, else by `index`. An `id` arriving for a call so far
    /// known only by index upgrades that buffer's key.
    fn builder_for(&mut self, id: Option<String>, index: u32) -> &mut ToolCallBuilder {
        let key = match id {
            Some(id) => {
                let id_key = ToolKey::Id(id.clone());
                let known = self.tools.iter().any(|(k, _)| *k == id_key);
                if !known
                    && let Some(entry) = self
                        .tools
                        .iter_mut()
                        .find(|(k, _)| *k == ToolKey::Index(index))
                {
                    entry.0 = id_key.clone();
                    entry.1.id = Some(id);
                }
                id_key
            }
            None => ToolKey::Index(index),
        };
        if let Some(pos) = self.tools.iter().position(|(k, _)| *k == key) {
            return &mut self.tools[pos].1;
        }
        let mut builder = ToolCallBuilder::default();
        if let ToolKey::Id(id) = &key {
            builder.id = Some(id.clone());
        }
        self.tools.push((key, builder));
        let last = self.tools.len() - 1;
        &mut self.tools[last].1
    }

    /// Finalize the aggregate. Tool buffers without a name or without any
    /// argument bytes are incomplete and dropped; argument strings that are
    /// not valid JSON are preserved raw.
    pub fn finish(self) -> Completion {
        let mut tool_calls = Vec::new();
        for (key, builder) in self.tools {
            let Some(name) = builder.name else { continue };
            if name.is_empty() || builder.arguments.is_empty() {
                continue;
            }
            let id = builder.id.unwrap_or_else(|| match &key {
                ToolKey::Id(id) => id.clone(),
                ToolKey::Index(i) => format!("call-{i}"),
            });
            tool_calls.push(ToolCall {
                id,
                name,
                arguments: ToolArguments::from_concatenated(builder.arguments),
            });
        }
        tracing::debug!(
            content_len = self.content.len(),
            tool_calls = tool_calls.len(),
            finish_reason = self.finish_reason.as_deref().unwrap_or("none"),
            "stream aggregation finished"
        );
        Completion {
            content: self.content,
            tool_calls,
            finish_reason: self.finish_reason,
            usage: self.usage,
        }
    }
}

/// Drive a frame stream through an [`Aggregator`], yielding incremental
/// events and a single terminal `Final`. Natural end-of-frames counts as
/// completion; a failed frame ends the stream with its error and the
/// partial aggregate is dropped.
pub struct CompletionEvents {
    frames: FrameStream,
    agg: Option<Aggregator>,
    pending: VecDeque<String>,
    finished: bool,
}

impl CompletionEvents {
    pub fn new(frames: FrameStream) -> Self {
        Self {
            frames,
            agg: Some(Aggregator::new()),
            pending: VecDeque::new(),
            finished: false,
        }
    }

    pub fn boxed(self) -> CompletionStream {
        Box::pin(self)
    }

    fn finalize(&mut self) -> Option<StreamEvent> {
        self.finished = true;
        self.agg.take().map(|agg| StreamEvent::Final(agg.finish()))
    }
}

impl Stream for CompletionEvents {
    type Item = CoreResult<StreamEvent>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if let Some(text) = this.pending.pop_front() {
                return Poll::Ready(Some(Ok(StreamEvent::ContentDelta(text))));
            }
            if this.finished {
                return Poll::Ready(None);
            }
            match this.frames.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(frame))) => {
                    let Some(agg) = this.agg.as_mut() else {
                        this.finished = true;
                        return Poll::Ready(None);
                    };
                    match agg.apply(&frame) {
                        Ok(Step::Deltas(deltas)) => {
                            this.pending.extend(deltas);
                            continue;
                        }
                        Ok(Step::Done) => {
                            return match this.finalize() {
                                Some(ev) => Poll::Ready(Some(Ok(ev))),
                                None => Poll::Ready(None),
                            };
                        }
                        Err(e) => {
                            // discard the half-built aggregate
                            this.agg = None;
                            this.finished = true;
                            return Poll::Ready(Some(Err(e)));
                        }
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    this.agg = None;
                    this.finished = true;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    // graceful end-of-stream is equivalent to an explicit done
                    return match this.finalize() {
                        Some(ev) => Poll::Ready(Some(Ok(ev))),
                        None => Poll::Ready(None),
                    };
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
