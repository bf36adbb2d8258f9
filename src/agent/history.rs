//! Conversation history and pre-send normalization.
//!
//! Element 0 is always the system preamble. It cannot be mutated through
//! this type and is restored if a replacement history arrives without it.

use std::collections::HashSet;

use tracing::debug;

use crate::types::{Message, Role};

/// Ordered conversation sent with every request.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationHistory {
    messages: Vec<Message>,
}

impl ConversationHistory {
    /// Start a history holding only the preamble.
    pub fn new(preamble: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::system(preamble)],
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Always false: the preamble is never removed.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn preamble(&self) -> &Message {
        &self.messages[0]
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Append a message, returning its index.
    pub fn push(&mut self, message: Message) -> usize {
        self.messages.push(message);
        self.messages.len() - 1
    }

    /// Mutable access to any message except the preamble.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut Message> {
        if index == 0 {
            return None;
        }
        self.messages.get_mut(index)
    }

    /// Drop everything but the preamble.
    pub fn reset(&mut self) {
        self.messages.truncate(1);
    }

    /// Swap in a rewritten history (compaction), keeping the preamble first.
    pub fn replace(&mut self, mut messages: Vec<Message>) {
        let preamble = self.messages[0].clone();
        if messages.first() != Some(&preamble) {
            messages.insert(0, preamble);
        }
        self.messages = messages;
    }

    /// Text of the tool result answering `call_id`.
    pub fn tool_result(&self, call_id: &str) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Tool && m.tool_call_id.as_deref() == Some(call_id))
            .map(Message::text)
    }

    /// Normalize history before it is sent.
    ///
    /// Assistant tool calls that never received a tool result are stripped,
    /// tool results that answer no remaining call are dropped, and assistant
    /// messages left with neither text nor calls are removed. Returns how many
    /// messages were removed.
    pub fn sanitize(&mut self) -> usize {
        let answered: HashSet<String> = self
            .messages
            .iter()
            .filter(|m| m.role == Role::Tool)
            .filter_map(|m| m.tool_call_id.clone())
            .collect();

        let mut stripped_calls = 0usize;
        for message in self.messages.iter_mut().skip(1) {
            if message.role != Role::Assistant {
                continue;
            }
            if let Some(calls) = message.tool_calls.as_mut() {
                let before = calls.len();
                calls.retain(|call| answered.contains(&call.id));
                stripped_calls += before - calls.len();
                if calls.is_empty() {
                    message.tool_calls = None;
                }
            }
        }

        let declared: HashSet<String> = self
            .messages
            .iter()
            .filter_map(|m| m.tool_calls.as_ref())
            .flatten()
            .map(|call| call.id.clone())
            .collect();

        let before = self.messages.len();
        let mut index = 0usize;
        self.messages.retain(|message| {
            let keep = index == 0 || should_keep_message(message, &declared);
            index += 1;
            keep
        });
        let removed = before - self.messages.len();
        if removed > 0 || stripped_calls > 0 {
            debug!(removed, stripped_calls, "sanitized conversation history");
        }
        removed
    }
}

/// Decide whether a message should stay in history.
fn should_keep_message(message: &Message, declared: &HashSet<String>) -> bool {
    match message.role {
        Role::System | Role::User => true,
        Role::Assistant => !message.text().trim().is_empty() || message.has_tool_calls(),
        Role::Tool => message
            .tool_call_id
            .as_ref()
            .is_some_and(|id| declared.contains(id)),
    }
}
