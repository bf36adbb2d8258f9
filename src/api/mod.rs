//! Transport for OpenAI-compatible streaming chat completions.
//!
//! - `stream`: SSE line decoding and the per-response [`DeltaStream`]
//! - `client`: HTTP dispatch and bearer auth

use crate::error::ApiError;
use crate::types::ChatRequest;
use async_trait::async_trait;

mod client;
pub mod stream;

pub use client::ApiClient;
pub use stream::{ByteStream, DeltaStream, FinishReason, StreamDelta, ToolCallDelta};

/// Minimal model API interface used by the turn controller.
///
/// Tests provide scripted streams without network calls while the production
/// path uses [`ApiClient`].
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Dispatch `request` and return its decoded delta stream.
    ///
    /// Errors here are dispatch failures; failures after the stream starts
    /// arrive as [`StreamDelta::TransportError`].
    async fn stream_chat(&self, request: &ChatRequest) -> Result<DeltaStream, ApiError>;
}
