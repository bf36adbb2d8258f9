//! Server-sent-event decoding for streamed chat completions.
//!
//! Bytes arrive in arbitrary chunks. [`SseDecoder`] buffers them into lines,
//! [`decode_frame`] turns each `data:` payload into [`StreamDelta`]s, and
//! [`DeltaStream`] runs that pipeline on a worker task that owns the
//! connection and feeds a bounded channel.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::textutil::safe_prefix_by_bytes;
use crate::types::{ChatChunk, Usage};

/// Raw response body as produced by the transport.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, ApiError>> + Send>>;

/// Deltas buffered between the decoder worker and the turn controller.
const DELTA_CHANNEL_CAPACITY: usize = 64;

/// Longest frame excerpt kept in a [`StreamDelta::Malformed`].
const MALFORMED_EXCERPT_BYTES: usize = 200;

// ---------------------------------------------------------------------------
// Deltas
// ---------------------------------------------------------------------------

/// Why the model stopped generating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    ToolCalls,
    Length,
    Other(String),
}

impl FinishReason {
    pub fn from_wire(reason: &str) -> Self {
        match reason {
            "stop" => Self::Stop,
            // `function_call` is the pre-tools spelling some gateways still send.
            "tool_calls" | "function_call" => Self::ToolCalls,
            "length" => Self::Length,
            other => Self::Other(other.to_string()),
        }
    }
}

/// One tool-call fragment as it appeared on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ToolCallDelta {
    /// Index of the choice that carried the fragment.
    pub choice: u32,
    /// Position of the fragment inside its frame's `tool_calls` array.
    pub position: u32,
    /// Provider-assigned call index, when sent.
    pub index: Option<u32>,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: Option<String>,
}

impl ToolCallDelta {
    /// Slot address within the turn: the provider index when present, else the
    /// fragment position.
    pub fn slot_key(&self) -> (u32, u32) {
        (self.choice, self.index.unwrap_or(self.position))
    }
}

/// An incremental event decoded from the response stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamDelta {
    /// Assistant text fragment.
    Text(String),
    /// Tool-call fragment.
    ToolCall(ToolCallDelta),
    /// Terminal reason for a choice.
    Finished(FinishReason),
    /// Token usage statistics.
    Usage(Usage),
    /// A frame that could not be decoded; the stream continues.
    Malformed { frame: String, error: String },
    /// The connection failed; no further deltas follow.
    TransportError(String),
}

// ---------------------------------------------------------------------------
// Line decoder
// ---------------------------------------------------------------------------

/// A complete SSE payload line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseFrame {
    Data(String),
    /// The `[DONE]` terminator.
    Done,
}

/// Incremental SSE line decoder.
///
/// Partial lines (including split multi-byte characters) stay buffered until
/// their newline arrives. Everything after `[DONE]` is ignored.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    /// Leading bytes of `buffer` already known to hold no newline.
    scanned: usize,
    done: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once the `[DONE]` terminator has been seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed raw bytes, returning every frame completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseFrame> {
        if self.done {
            return Vec::new();
        }
        self.buffer.extend_from_slice(bytes);

        let mut frames = Vec::new();
        let mut start = 0;
        let mut search_from = self.scanned;
        while let Some(offset) = self.buffer[search_from..].iter().position(|b| *b == b'\n') {
            let end = search_from + offset;
            if let Some(frame) = parse_line(&self.buffer[start..end]) {
                let is_done = frame == SseFrame::Done;
                frames.push(frame);
                if is_done {
                    self.done = true;
                    self.buffer.clear();
                    self.scanned = 0;
                    return frames;
                }
            }
            start = end + 1;
            search_from = start;
        }
        self.buffer.drain(..start);
        self.scanned = self.buffer.len();
        frames
    }

    /// Flush a trailing line that never received its newline.
    pub fn finish(&mut self) -> Vec<SseFrame> {
        if self.done {
            return Vec::new();
        }
        let rest = std::mem::take(&mut self.buffer);
        self.scanned = 0;
        let frame = parse_line(&rest);
        if frame == Some(SseFrame::Done) {
            self.done = true;
        }
        frame.into_iter().collect()
    }
}

fn parse_line(raw: &[u8]) -> Option<SseFrame> {
    let line = String::from_utf8_lossy(raw);
    let line = line.trim();
    // Blank keep-alives and `:` comments carry nothing.
    if line.is_empty() || line.starts_with(':') {
        return None;
    }
    let payload = line.strip_prefix("data:")?.trim_start();
    if payload == "[DONE]" {
        return Some(SseFrame::Done);
    }
    Some(SseFrame::Data(payload.to_string()))
}

// ---------------------------------------------------------------------------
// Frame decoding
// ---------------------------------------------------------------------------

/// Decode one `data:` payload into deltas.
///
/// A payload that is not a valid chunk yields a single
/// [`StreamDelta::Malformed`] rather than an error.
pub fn decode_frame(data: &str) -> Vec<StreamDelta> {
    let chunk: ChatChunk = match serde_json::from_str(data) {
        Ok(chunk) => chunk,
        Err(e) => {
            warn!(error = %e, frame_len = data.len(), "skipping malformed stream frame");
            return vec![StreamDelta::Malformed {
                frame: safe_prefix_by_bytes(data, MALFORMED_EXCERPT_BYTES).to_string(),
                error: e.to_string(),
            }];
        }
    };

    let mut deltas = Vec::new();
    for choice in chunk.choices {
        if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
            deltas.push(StreamDelta::Text(text));
        }
        for (position, call) in choice.delta.tool_calls.unwrap_or_default().into_iter().enumerate() {
            let (name, arguments) = match call.function {
                Some(function) => (function.name, function.arguments),
                None => (None, None),
            };
            deltas.push(StreamDelta::ToolCall(ToolCallDelta {
                choice: choice.index,
                position: position as u32,
                index: call.index,
                id: call.id.filter(|id| !id.is_empty()),
                name: name.filter(|n| !n.is_empty()),
                arguments,
            }));
        }
        if let Some(reason) = choice.finish_reason.filter(|r| !r.is_empty()) {
            deltas.push(StreamDelta::Finished(FinishReason::from_wire(&reason)));
        }
    }
    if let Some(usage) = chunk.usage {
        deltas.push(StreamDelta::Usage(usage));
    }
    deltas
}

// ---------------------------------------------------------------------------
// Delta stream
// ---------------------------------------------------------------------------

/// Lazily decoded deltas for one response.
///
/// The worker task owns the byte stream, so the connection is released when
/// the worker ends: on `[DONE]`, body exhaustion, a transport error, or when
/// this handle is dropped (which aborts the worker).
pub struct DeltaStream {
    rx: mpsc::Receiver<StreamDelta>,
    worker: Option<JoinHandle<()>>,
}

impl DeltaStream {
    /// Start decoding `bytes` on a worker task.
    ///
    /// With `idle_timeout`, a gap longer than the limit between body chunks
    /// ends the stream with [`StreamDelta::TransportError`].
    pub fn spawn(bytes: ByteStream, idle_timeout: Option<Duration>) -> Self {
        let (tx, rx) = mpsc::channel(DELTA_CHANNEL_CAPACITY);
        let worker = tokio::spawn(pump(bytes, tx, idle_timeout));
        Self {
            rx,
            worker: Some(worker),
        }
    }

    /// A stream that replays already-decoded deltas.
    pub fn from_deltas(deltas: Vec<StreamDelta>) -> Self {
        let (tx, rx) = mpsc::channel(deltas.len().max(1));
        for delta in deltas {
            // Capacity covers every delta.
            let _ = tx.try_send(delta);
        }
        Self { rx, worker: None }
    }
}

impl Stream for DeltaStream {
    type Item = StreamDelta;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<StreamDelta>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for DeltaStream {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}

async fn pump(mut bytes: ByteStream, tx: mpsc::Sender<StreamDelta>, idle_timeout: Option<Duration>) {
    let mut decoder = SseDecoder::new();
    let mut frames_seen = 0usize;
    loop {
        let next = match idle_timeout {
            Some(limit) => match tokio::time::timeout(limit, bytes.next()).await {
                Ok(next) => next,
                Err(_) => {
                    warn!(idle_secs = limit.as_secs(), "response stream went idle");
                    let _ = tx
                        .send(StreamDelta::TransportError(format!(
                            "no data received for {}s",
                            limit.as_secs()
                        )))
                        .await;
                    return;
                }
            },
            None => bytes.next().await,
        };

        let (frames, body_ended) = match next {
            Some(Ok(chunk)) => (decoder.push(&chunk), false),
            Some(Err(e)) => {
                warn!(error = %e, "response stream failed");
                let _ = tx.send(StreamDelta::TransportError(e.to_string())).await;
                return;
            }
            None => (decoder.finish(), true),
        };
        frames_seen += frames.len();
        if !forward(frames, &tx).await {
            debug!("delta consumer went away; stopping decoder");
            return;
        }
        if body_ended || decoder.is_done() {
            debug!(frames = frames_seen, done = decoder.is_done(), "response stream ended");
            return;
        }
    }
}

/// Send every delta decoded from `frames`; false when the receiver is gone.
async fn forward(frames: Vec<SseFrame>, tx: &mpsc::Sender<StreamDelta>) -> bool {
    for frame in frames {
        let SseFrame::Data(data) = frame else {
            break;
        };
        for delta in decode_frame(&data) {
            if tx.send(delta).await.is_err() {
                return false;
            }
        }
    }
    true
}
