//! Crude token estimation and usage accounting.
//!
//! Exact counts come from the trailing `usage` frame of a stream when the
//! provider sends one. Compaction decisions use a fixed-ratio estimate
//! instead: text length plus serialized tool-call structures, divided by
//! [`CHARS_PER_TOKEN`].

use crate::types::{Message, Usage};

/// Characters assumed per token by the estimate.
pub const CHARS_PER_TOKEN: usize = 4;

/// Characters a message contributes to the estimate.
fn message_chars(message: &Message) -> usize {
    let mut chars = message.content.as_ref().map_or(0, String::len);
    if let Some(calls) = &message.tool_calls {
        chars += serde_json::to_string(calls).map_or(0, |json| json.len());
    }
    chars
}

/// Estimate the token footprint of one message.
pub fn estimate_message(message: &Message) -> usize {
    message_chars(message) / CHARS_PER_TOKEN
}

/// Estimate the token footprint of a whole history.
///
/// Characters are summed before dividing so short messages still count.
pub fn estimate_messages(messages: &[Message]) -> usize {
    messages.iter().map(message_chars).sum::<usize>() / CHARS_PER_TOKEN
}

/// Tracks token usage across a conversation session.
#[derive(Debug, Clone, Default)]
pub struct TokenTracker {
    /// Configured context budget in tokens.
    pub context_limit: usize,
    /// Running total of prompt tokens sent.
    pub total_prompt_tokens: u64,
    /// Running total of completion tokens received.
    pub total_completion_tokens: u64,
    /// Prompt tokens in the most recent request.
    pub last_prompt_tokens: u64,
    /// Completion tokens in the most recent response.
    pub last_completion_tokens: u64,
}

impl TokenTracker {
    pub fn new(context_limit: usize) -> Self {
        Self {
            context_limit,
            ..Self::default()
        }
    }

    /// Record counts from a stream's usage frame.
    pub fn record(&mut self, usage: &Usage) {
        self.last_prompt_tokens = usage.prompt_tokens;
        self.last_completion_tokens = usage.completion_tokens;
        self.total_prompt_tokens = self.total_prompt_tokens.saturating_add(usage.prompt_tokens);
        self.total_completion_tokens = self
            .total_completion_tokens
            .saturating_add(usage.completion_tokens);
    }

    /// Fraction of the context budget the estimate says these messages use.
    pub fn usage_fraction(&self, messages: &[Message]) -> f64 {
        if self.context_limit == 0 {
            return 0.0;
        }
        estimate_messages(messages) as f64 / self.context_limit as f64
    }

    /// Total tokens consumed across the entire session.
    pub fn session_total(&self) -> u64 {
        self.total_prompt_tokens
            .saturating_add(self.total_completion_tokens)
    }
}
