//! Agent event plumbing.
//!
//! The turn controller reports progress through one channel of
//! [`AgentEvent`]s; every presentation mode consumes the same stream.

use tokio::sync::mpsc;

use super::compact::CompactionReport;
use super::TurnStatus;
use crate::types::{ToolCall, Usage};

/// Presentation-facing event emitted while a turn runs.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// Assistant text grew. `text` is the full content so far.
    PartialText { delta: String, text: String },
    /// A model response finished streaming.
    TurnFinished {
        status: TurnStatus,
        content: String,
    },
    /// A batch contains calls outside the allow-list.
    ApprovalNeeded { calls: Vec<ToolCall> },
    ToolStarted { call: ToolCall },
    ToolOutput {
        call_id: String,
        name: String,
        output: String,
        is_error: bool,
    },
    Usage {
        usage: Usage,
        session_total: u64,
    },
    ContextCompacted(CompactionReport),
    Warning { message: String },
    Error { message: String },
}

/// Optional sender side of the event channel.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<AgentEvent>>,
}

impl EventSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<AgentEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// Sink that discards everything.
    pub fn none() -> Self {
        Self::default()
    }

    /// Deliver an event. Returns false when nobody is listening.
    pub fn emit(&self, event: AgentEvent) -> bool {
        self.tx.as_ref().is_some_and(|tx| tx.send(event).is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_sink_drops_events() {
        assert!(!EventSink::none().emit(AgentEvent::Warning {
            message: "x".into()
        }));
    }

    #[tokio::test]
    async fn channel_sink_delivers_in_order() {
        let (sink, mut rx) = EventSink::channel();
        assert!(sink.emit(AgentEvent::Warning { message: "a".into() }));
        assert!(sink.emit(AgentEvent::Error { message: "b".into() }));
        assert_eq!(rx.recv().await, Some(AgentEvent::Warning { message: "a".into() }));
        assert_eq!(rx.recv().await, Some(AgentEvent::Error { message: "b".into() }));
    }

    #[test]
    fn closed_receiver_reports_false() {
        let (sink, rx) = EventSink::channel();
        drop(rx);
        assert!(!sink.emit(AgentEvent::Warning { message: "x".into() }));
    }
}
