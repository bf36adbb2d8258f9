//! Tool-call assembly from streamed fragments.
//!
//! Only the first fragment of a call normally carries its id and name; later
//! fragments carry argument text addressed by slot (choice index plus the
//! provider's call index, or the fragment position when no index is sent).
//! Calls are kept in the order their slots were first declared.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::api::ToolCallDelta;
use crate::types::ToolCall;

/// Arguments used when a call finished without any argument text.
pub const EMPTY_ARGUMENTS: &str = "{}";

#[derive(Debug, Clone)]
struct PendingCall {
    id: String,
    name: String,
    arguments: String,
}

impl PendingCall {
    /// Still accumulating: arguments do not yet form a complete JSON value.
    fn is_open(&self) -> bool {
        let trimmed = self.arguments.trim();
        trimmed.is_empty() || serde_json::from_str::<serde_json::Value>(trimmed).is_err()
    }

    fn absorb(&mut self, delta: &ToolCallDelta) {
        if self.name.is_empty() {
            if let Some(name) = &delta.name {
                self.name = name.clone();
            }
        }
        if let Some(arguments) = &delta.arguments {
            self.arguments.push_str(arguments);
        }
    }
}

/// Accumulates one turn's tool-call fragments.
#[derive(Debug, Default)]
pub struct ToolCallAssembler {
    /// Declared calls in first-seen order.
    calls: Vec<PendingCall>,
    /// Slot key to position in `calls`.
    slots: HashMap<(u32, u32), usize>,
    dropped: usize,
    /// Scopes synthesized ids to one request of the session.
    request_seq: u64,
}

impl ToolCallAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assembler for the `request_seq`-th request of a session, so ids it
    /// has to invent never repeat across turns.
    pub fn for_request(request_seq: u64) -> Self {
        Self {
            request_seq,
            ..Self::default()
        }
    }

    /// Number of calls declared so far.
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Fragments that could not be attributed to any call.
    pub fn dropped_fragments(&self) -> usize {
        self.dropped
    }

    /// Fold one fragment into the accumulated state.
    pub fn push(&mut self, delta: &ToolCallDelta) {
        let key = delta.slot_key();
        let bound = self.slots.get(&key).copied();

        match (&delta.id, bound) {
            (Some(id), None) => {
                if let Some(existing) = self.calls.iter().position(|c| &c.id == id) {
                    // Same call resurfacing under a different slot.
                    self.slots.insert(key, existing);
                    self.calls[existing].absorb(delta);
                } else {
                    self.declare(key, id.clone(), delta);
                }
            }
            (Some(id), Some(slot)) => {
                if &self.calls[slot].id == id {
                    self.calls[slot].absorb(delta);
                } else if let Some(target) = self.open_match(slot, delta.name.as_deref()) {
                    debug!(slot = ?key, kept = %self.calls[target].id, ignored = %id, "merging fragment with conflicting id");
                    self.calls[target].absorb(delta);
                } else {
                    self.declare(key, id.clone(), delta);
                }
            }
            (None, Some(slot)) => self.calls[slot].absorb(delta),
            (None, None) => {
                let by_name = delta
                    .name
                    .as_deref()
                    .and_then(|name| self.calls.iter().position(|c| c.name == name));
                match (by_name, &delta.name) {
                    (Some(target), _) => {
                        self.slots.insert(key, target);
                        self.calls[target].absorb(delta);
                    }
                    (None, Some(_)) => {
                        let id = self.synthesize_id();
                        self.declare(key, id, delta);
                    }
                    (None, None) => {
                        self.dropped += 1;
                        warn!(slot = ?key, "dropping tool-call fragment for an undeclared slot");
                    }
                }
            }
        }
    }

    /// Finalize into complete calls, in declaration order.
    pub fn finish(self) -> Vec<ToolCall> {
        self.calls
            .into_iter()
            .map(|call| {
                let arguments = if call.arguments.trim().is_empty() {
                    EMPTY_ARGUMENTS.to_string()
                } else {
                    call.arguments
                };
                ToolCall::new(call.id, call.name, arguments)
            })
            .collect()
    }

    fn declare(&mut self, key: (u32, u32), id: String, delta: &ToolCallDelta) {
        let mut call = PendingCall {
            id,
            name: String::new(),
            arguments: String::new(),
        };
        call.absorb(delta);
        self.slots.insert(key, self.calls.len());
        self.calls.push(call);
    }

    /// Id for a named call the provider sent without one. Skips ids already
    /// declared in this turn.
    fn synthesize_id(&self) -> String {
        let mut n = self.calls.len();
        loop {
            let id = format!("call_{}_{n}", self.request_seq);
            if !self.calls.iter().any(|c| c.id == id) {
                return id;
            }
            n += 1;
        }
    }

    /// An open call a conflicting-id fragment should continue, if any.
    fn open_match(&self, slot: usize, name: Option<&str>) -> Option<usize> {
        let matches = |call: &PendingCall| {
            call.is_open() && name.map_or(true, |n| call.name.is_empty() || call.name == n)
        };
        if matches(&self.calls[slot]) {
            return Some(slot);
        }
        let name = name?;
        self.calls
            .iter()
            .position(|call| call.is_open() && call.name == name)
    }
}
