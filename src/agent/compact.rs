//! Context compaction.
//!
//! Compaction is lossy: older turns are replaced by a synthesized system
//! summary, and only a recent tail is kept verbatim. Every [`Compactor`]
//! keeps message 0 byte-identical.

use std::fmt;
use std::str::FromStr;

use crate::textutil::truncate_with_suffix_by_chars;
use crate::tokens::estimate_messages;
use crate::types::{Message, Role};

/// First line of every synthesized summary message.
pub const SUMMARY_HEADER: &str = "Previous conversation summary:";
/// User messages quoted in a summary.
const SUMMARY_USER_EXCERPTS: usize = 3;
/// Characters kept per quoted user message.
const SUMMARY_EXCERPT_CHARS: usize = 100;
/// Histories this short are never compacted.
const MIN_COMPACTABLE_MESSAGES: usize = 3;

/// Compaction limits, fixed for a session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Budget {
    pub max_messages: usize,
    pub max_tokens: usize,
    pub compaction_ratio: f64,
    pub auto_compact: bool,
}

impl Budget {
    /// Estimated-token level above which compaction triggers.
    pub fn token_threshold(&self) -> usize {
        (self.max_tokens as f64 * self.compaction_ratio) as usize
    }

    /// True when either limit is exceeded, regardless of `auto_compact`.
    pub fn is_exceeded(&self, messages: &[Message]) -> bool {
        estimate_messages(messages) > self.token_threshold() || messages.len() > self.max_messages
    }
}

/// Shrinks a history. Implementations must keep message 0 unchanged.
pub trait Compactor: Send + Sync {
    fn compact(&self, messages: &[Message], budget: &Budget) -> Vec<Message>;
}

/// What a compaction pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionReport {
    pub messages_before: usize,
    pub messages_after: usize,
    pub tokens_before: usize,
    pub tokens_after: usize,
}

impl CompactionReport {
    fn measure(before: &[Message], after: &[Message]) -> Self {
        Self {
            messages_before: before.len(),
            messages_after: after.len(),
            tokens_before: estimate_messages(before),
            tokens_after: estimate_messages(after),
        }
    }
}

/// True when auto-compaction is on and the budget is exceeded.
pub fn needs_compaction(messages: &[Message], budget: &Budget) -> bool {
    budget.auto_compact && budget.is_exceeded(messages)
}

/// Compact only when [`needs_compaction`] says so.
pub fn compact_if_needed(
    messages: &[Message],
    budget: &Budget,
    compactor: &dyn Compactor,
) -> Option<(Vec<Message>, CompactionReport)> {
    if !needs_compaction(messages, budget) {
        return None;
    }
    Some(compact_now(messages, budget, compactor))
}

/// Compact unconditionally (the `/compact` command).
pub fn compact_now(
    messages: &[Message],
    budget: &Budget,
    compactor: &dyn Compactor,
) -> (Vec<Message>, CompactionReport) {
    let compacted = compactor.compact(messages, budget);
    let report = CompactionReport::measure(messages, &compacted);
    (compacted, report)
}

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

/// Summarize the older half, keep a recent tail.
///
/// The tail starts at the later of the midpoint and `len - max_messages/2`;
/// tool-role messages in it are dropped.
#[derive(Debug, Default, Clone, Copy)]
pub struct SummaryCompactor;

impl Compactor for SummaryCompactor {
    fn compact(&self, messages: &[Message], budget: &Budget) -> Vec<Message> {
        if messages.len() <= MIN_COMPACTABLE_MESSAGES {
            return messages.to_vec();
        }
        let len = messages.len();
        let midpoint = len / 2;

        let mut compacted = vec![messages[0].clone()];
        if let Some(summary) = summarize(&messages[1..midpoint]) {
            compacted.push(summary);
        }
        let tail_start = midpoint.max(len.saturating_sub(budget.max_messages / 2));
        compacted.extend(
            messages[tail_start..]
                .iter()
                .filter(|m| m.role != Role::Tool)
                .cloned(),
        );
        compacted
    }
}

/// Keep message 0 and the last few messages only.
#[derive(Debug, Clone, Copy)]
pub struct RecentCompactor {
    pub keep: usize,
}

impl Default for RecentCompactor {
    fn default() -> Self {
        Self { keep: 4 }
    }
}

impl Compactor for RecentCompactor {
    fn compact(&self, messages: &[Message], _budget: &Budget) -> Vec<Message> {
        if messages.len() <= self.keep + 1 {
            return messages.to_vec();
        }
        let mut compacted = vec![messages[0].clone()];
        compacted.extend_from_slice(&messages[messages.len() - self.keep..]);
        compacted
    }
}

/// Keep tool exchanges, messages mentioning errors, and a recent window.
#[derive(Debug, Clone, Copy)]
pub struct SalientCompactor {
    pub recent: usize,
}

impl Default for SalientCompactor {
    fn default() -> Self {
        Self { recent: 10 }
    }
}

impl Compactor for SalientCompactor {
    fn compact(&self, messages: &[Message], _budget: &Budget) -> Vec<Message> {
        let Some(first) = messages.first() else {
            return Vec::new();
        };
        let recent_start = messages.len().saturating_sub(self.recent);
        let mut compacted = vec![first.clone()];
        let mut i = 1;
        while i < messages.len() {
            let message = &messages[i];
            if message.has_tool_calls() {
                compacted.push(message.clone());
                // Keep the results that answer this message's calls.
                while messages.get(i + 1).is_some_and(|m| m.role == Role::Tool) {
                    i += 1;
                    compacted.push(messages[i].clone());
                }
            } else if i >= recent_start || is_salient(message) {
                compacted.push(message.clone());
            }
            i += 1;
        }
        compacted
    }
}

fn is_salient(message: &Message) -> bool {
    let lower = message.text().to_lowercase();
    lower.contains("error") || lower.contains("important")
}

/// Build the summary system message for `messages`, or `None` when empty.
fn summarize(messages: &[Message]) -> Option<Message> {
    if messages.is_empty() {
        return None;
    }

    let mut summary = String::from(SUMMARY_HEADER);
    summary.push('\n');
    let mut users = 0usize;
    let mut assistants = 0usize;
    let mut tool_calls = 0usize;
    for message in messages {
        match message.role {
            Role::User => {
                users += 1;
                if users <= SUMMARY_USER_EXCERPTS {
                    let excerpt =
                        truncate_with_suffix_by_chars(message.text(), SUMMARY_EXCERPT_CHARS, "...");
                    summary.push_str(&format!("- User: {excerpt}\n"));
                }
            }
            Role::Assistant => {
                assistants += 1;
                tool_calls += message.tool_calls.as_ref().map_or(0, Vec::len);
            }
            Role::System | Role::Tool => {}
        }
    }
    summary.push_str(&format!(
        "\nSummary statistics:\n- {users} user messages, {assistants} assistant responses, {tool_calls} tool calls executed"
    ));
    Some(Message::system(summary))
}

/// Named compaction strategy selectable from `/compact <name>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompactionStrategy {
    #[default]
    Summary,
    Recent,
    Salient,
}

impl CompactionStrategy {
    pub fn compactor(self) -> Box<dyn Compactor> {
        match self {
            Self::Summary => Box::new(SummaryCompactor),
            Self::Recent => Box::new(RecentCompactor::default()),
            Self::Salient => Box::new(SalientCompactor::default()),
        }
    }
}

impl FromStr for CompactionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "summary" | "default" => Ok(Self::Summary),
            "recent" | "aggressive" => Ok(Self::Recent),
            "salient" | "smart" => Ok(Self::Salient),
            other => Err(format!(
                "unknown compaction strategy `{other}` (expected summary, recent or salient)"
            )),
        }
    }
}

impl fmt::Display for CompactionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Summary => "summary",
            Self::Recent => "recent",
            Self::Salient => "salient",
        };
        f.write_str(name)
    }
}
