//! Approval gate for pending tool calls.
//!
//! The gate is a pure decision over one batch: if every call is allow-listed
//! the batch runs unattended, otherwise the whole batch waits on a single
//! accept/reject decision from an [`Approver`].

use std::collections::HashSet;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::types::ToolCall;

/// Tool calls from one finished turn awaiting a decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingApprovalSet {
    calls: Vec<ToolCall>,
}

impl PendingApprovalSet {
    pub fn new(calls: Vec<ToolCall>) -> Self {
        Self { calls }
    }

    pub fn calls(&self) -> &[ToolCall] {
        &self.calls
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn into_calls(self) -> Vec<ToolCall> {
        self.calls
    }
}

/// Outcome of inspecting a batch against the allow-list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    AutoApproved,
    /// At least one call is not allow-listed; `unlisted` names them in order.
    NeedsApproval { unlisted: Vec<String> },
}

/// Allow-list check for a whole batch.
#[derive(Debug, Clone, Default)]
pub struct ApprovalGate {
    allow_list: HashSet<String>,
}

impl ApprovalGate {
    pub fn new<I, S>(allow_list: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allow_list: allow_list.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_allowed(&self, tool_name: &str) -> bool {
        self.allow_list.contains(tool_name)
    }

    pub fn inspect(&self, pending: &PendingApprovalSet) -> GateDecision {
        let mut unlisted: Vec<String> = Vec::new();
        for call in pending.calls() {
            let name = call.name();
            if !self.is_allowed(name) && !unlisted.iter().any(|n| n == name) {
                unlisted.push(name.to_string());
            }
        }
        if unlisted.is_empty() {
            GateDecision::AutoApproved
        } else {
            GateDecision::NeedsApproval { unlisted }
        }
    }
}

/// One human decision covering the entire batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalDecision {
    Accept,
    Reject,
}

/// Source of batch approval decisions.
#[async_trait]
pub trait Approver: Send + Sync {
    async fn decide(&self, pending: &PendingApprovalSet) -> ApprovalDecision;
}

/// Approver that returns a fixed decision. Useful for scripts and tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedApprover(pub ApprovalDecision);

#[async_trait]
impl Approver for FixedApprover {
    async fn decide(&self, _pending: &PendingApprovalSet) -> ApprovalDecision {
        self.0
    }
}

/// Approval request forwarded to the foreground UI.
#[derive(Debug)]
pub struct ApprovalRequest {
    pending: PendingApprovalSet,
    response: oneshot::Sender<ApprovalDecision>,
}

impl ApprovalRequest {
    pub fn pending(&self) -> &PendingApprovalSet {
        &self.pending
    }

    pub fn approve(self) {
        let _ = self.response.send(ApprovalDecision::Accept);
    }

    pub fn deny(self) {
        let _ = self.response.send(ApprovalDecision::Reject);
    }
}

/// Channel-backed [`Approver`] whose decisions come from another task.
///
/// A closed channel or a request dropped without an answer counts as a
/// rejection.
#[derive(Clone, Debug)]
pub struct ApprovalBroker {
    tx: mpsc::UnboundedSender<ApprovalRequest>,
}

impl ApprovalBroker {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ApprovalRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Approver for ApprovalBroker {
    async fn decide(&self, pending: &PendingApprovalSet) -> ApprovalDecision {
        let (response_tx, response_rx) = oneshot::channel();
        let request = ApprovalRequest {
            pending: pending.clone(),
            response: response_tx,
        };
        if self.tx.send(request).is_err() {
            warn!("approval UI is unavailable; rejecting batch");
            return ApprovalDecision::Reject;
        }
        match response_rx.await {
            Ok(decision) => {
                debug!(?decision, calls = pending.len(), "approval resolved");
                decision
            }
            Err(_) => {
                warn!("approval request dropped before resolution; rejecting batch");
                ApprovalDecision::Reject
            }
        }
    }
}
