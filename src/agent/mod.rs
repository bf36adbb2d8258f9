//! Core agentic loop.
//!
//! The [`Agent`] drives the conversation: it streams a response for the
//! current history, assembles any tool calls the model requested, routes them
//! through the approval gate, executes them one at a time, and re-submits the
//! results until the model answers without tools (or the iteration cap is
//! reached).

pub mod approval;
pub mod assembler;
pub mod compact;
pub mod events;
pub mod fallback;
pub mod history;

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::api::{ApiClient, DeltaStream, FinishReason, ModelClient, StreamDelta};
use crate::config::Config;
use crate::error::{AgentError, ApiError};
use crate::tokens::TokenTracker;
use crate::tools::ToolRegistry;
use crate::types::{ChatRequest, Message, Role, StreamOptions, ToolCall};

use approval::{ApprovalDecision, ApprovalGate, Approver, GateDecision, PendingApprovalSet};
use assembler::ToolCallAssembler;
use compact::{Budget, CompactionReport, CompactionStrategy, Compactor, SummaryCompactor};
use events::{AgentEvent, EventSink};
use history::ConversationHistory;

/// Tool-result text recorded for calls skipped by cancellation.
pub const CANCELLED_BY_USER: &str = "operation cancelled by user";

/// How a call to [`Agent::send`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStatus {
    /// The model finished with a terminal reason and requested no tools.
    Completed,
    /// The stream closed without a terminal reason. Any tool fragments it
    /// carried were not executed.
    Incomplete,
    /// A tool batch was denied; the model was not contacted again.
    Rejected,
    /// The caller's cancellation signal fired.
    Cancelled,
}

/// Result of one user turn, including all tool continuations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    pub status: TurnStatus,
    /// Text of the last assistant response.
    pub content: String,
    /// Model requests made for this turn.
    pub iterations: usize,
}

/// State of the turn controller between model requests.
#[derive(Debug)]
enum TurnState {
    Sending,
    AwaitingApproval(PendingApprovalSet),
    Executing(PendingApprovalSet),
    Done(TurnStatus),
}

/// Everything gathered while draining one response stream.
#[derive(Debug, Default)]
struct StreamedResponse {
    text: String,
    assembler: ToolCallAssembler,
    finish: Option<FinishReason>,
    /// History index of the in-progress assistant message, once created.
    message_index: Option<usize>,
    cancelled: bool,
}

/// The core agent that orchestrates the conversation and tool-use loop.
pub struct Agent {
    /// Model client implementation (HTTP client in prod, scripted in tests).
    client: Box<dyn ModelClient>,
    config: Config,
    tools: ToolRegistry,
    history: ConversationHistory,
    tracker: TokenTracker,
    gate: ApprovalGate,
    /// Decides batches the gate blocks. `None` rejects them.
    approver: Option<Arc<dyn Approver>>,
    compactor: Box<dyn Compactor>,
    budget: Budget,
    events: EventSink,
    /// Optional cancellation signal for the in-flight turn.
    cancellation_rx: Option<watch::Receiver<bool>>,
    /// Model requests made this session; seeds fallback call ids.
    request_seq: u64,
}

impl Agent {
    /// Create an agent talking to the configured HTTP endpoint.
    pub fn new(config: Config, tools: ToolRegistry) -> Result<Self, AgentError> {
        let client = Box::new(ApiClient::new(&config.api)?);
        Ok(Self::with_client(config, tools, client))
    }

    /// Create an agent with an explicit model client implementation.
    ///
    /// Used for deterministic testing and alternative backends.
    pub fn with_client(config: Config, tools: ToolRegistry, client: Box<dyn ModelClient>) -> Self {
        let history = ConversationHistory::new(config.agent.system_prompt.clone());
        let tracker = TokenTracker::new(config.context.max_tokens);
        let gate = ApprovalGate::new(config.tools.auto_approve.iter().cloned());
        let budget = config.context.budget();
        Self {
            client,
            config,
            tools,
            history,
            tracker,
            gate,
            approver: None,
            compactor: Box::new(SummaryCompactor),
            budget,
            events: EventSink::none(),
            cancellation_rx: None,
            request_seq: 0,
        }
    }

    pub fn set_approver(&mut self, approver: Option<Arc<dyn Approver>>) {
        self.approver = approver;
    }

    pub fn set_event_sink(&mut self, events: EventSink) {
        self.events = events;
    }

    /// Register a cancellation signal for in-flight turns.
    pub fn set_cancellation_receiver(&mut self, rx: Option<watch::Receiver<bool>>) {
        self.cancellation_rx = rx;
    }

    /// Replace the compactor used by automatic compaction.
    pub fn set_compactor(&mut self, compactor: Box<dyn Compactor>) {
        self.compactor = compactor;
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    pub fn tracker(&self) -> &TokenTracker {
        &self.tracker
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Drop the conversation back to the preamble and zero usage counters.
    pub fn reset(&mut self) {
        self.history.reset();
        self.tracker = TokenTracker::new(self.tracker.context_limit);
        info!("conversation reset");
    }

    /// Compact now with `strategy`, regardless of budget.
    pub fn compact_now(&mut self, strategy: CompactionStrategy) -> CompactionReport {
        let compactor = strategy.compactor();
        let (messages, report) =
            compact::compact_now(self.history.messages(), &self.budget, compactor.as_ref());
        self.history.replace(messages);
        info!(%strategy, before = report.messages_before, after = report.messages_after, "history compacted on request");
        self.events.emit(AgentEvent::ContextCompacted(report));
        report
    }

    fn cancellation_requested(&self) -> bool {
        self.cancellation_rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Send a user message and run the full agentic loop.
    ///
    /// Only transport failures and the iteration cap are errors. Tool
    /// failures become tool-result text, and partial assistant text from a
    /// failed stream stays in history.
    pub async fn send(&mut self, user_input: &str) -> Result<TurnOutcome, AgentError> {
        self.history.push(Message::user(user_input));

        let mut iterations = 0usize;
        let mut content = String::new();
        let mut state = TurnState::Sending;

        loop {
            state = match state {
                TurnState::Sending => {
                    if self.cancellation_requested() {
                        TurnState::Done(TurnStatus::Cancelled)
                    } else {
                        iterations += 1;
                        if iterations > self.config.agent.max_iterations {
                            let err = AgentError::MaxIterationsReached(self.config.agent.max_iterations);
                            self.events.emit(AgentEvent::Error {
                                message: err.to_string(),
                            });
                            return Err(err);
                        }
                        let response = self.request_response().await?;
                        content = response.text.clone();
                        self.finish_response(response)
                    }
                }
                TurnState::AwaitingApproval(pending) => self.await_approval(pending).await,
                TurnState::Executing(pending) => self.execute_batch(pending).await,
                TurnState::Done(status) => {
                    debug!(?status, iterations, "turn finished");
                    self.events.emit(AgentEvent::TurnFinished {
                        status,
                        content: content.clone(),
                    });
                    return Ok(TurnOutcome {
                        status,
                        content,
                        iterations,
                    });
                }
            };
        }
    }

    /// Compact and sanitize history, then stream one response.
    async fn request_response(&mut self) -> Result<StreamedResponse, AgentError> {
        self.maybe_compact();
        self.history.sanitize();
        self.request_seq += 1;

        let request = self.build_request();
        debug!(
            model = %request.model,
            messages = request.messages.len(),
            seq = self.request_seq,
            "sending completion request"
        );

        let mut cancel_rx = self.cancellation_rx.clone();
        let dispatched = match cancel_rx.as_mut() {
            Some(rx) => tokio::select! {
                _ = wait_for_cancellation(rx) => None,
                result = self.client.stream_chat(&request) => Some(result),
            },
            None => Some(self.client.stream_chat(&request).await),
        };
        let stream = match dispatched {
            None => {
                return Ok(StreamedResponse {
                    cancelled: true,
                    ..StreamedResponse::default()
                })
            }
            Some(Ok(stream)) => stream,
            Some(Err(err)) => {
                warn!(error = %err, "completion request failed");
                self.events.emit(AgentEvent::Error {
                    message: err.to_string(),
                });
                return Err(err.into());
            }
        };
        self.consume_stream(stream, cancel_rx).await
    }

    fn build_request(&self) -> ChatRequest {
        let tools = (!self.tools.is_empty()).then(|| self.tools.definitions());
        ChatRequest {
            model: self.config.api.model.clone(),
            messages: self.history.messages().to_vec(),
            tool_choice: tools.as_ref().map(|_| "auto".to_string()),
            tools,
            max_tokens: Some(self.config.api.max_tokens),
            temperature: Some(self.config.api.temperature),
            stream: true,
            stream_options: Some(StreamOptions {
                include_usage: true,
            }),
        }
    }

    fn maybe_compact(&mut self) {
        let compacted =
            compact::compact_if_needed(self.history.messages(), &self.budget, self.compactor.as_ref());
        if let Some((messages, report)) = compacted {
            self.history.replace(messages);
            info!(
                messages_before = report.messages_before,
                messages_after = report.messages_after,
                tokens_before = report.tokens_before,
                tokens_after = report.tokens_after,
                "auto-compacted conversation history"
            );
            self.events.emit(AgentEvent::ContextCompacted(report));
        }
    }

    /// Drain `stream`, keeping the in-progress assistant message current.
    async fn consume_stream(
        &mut self,
        mut stream: DeltaStream,
        mut cancel_rx: Option<watch::Receiver<bool>>,
    ) -> Result<StreamedResponse, AgentError> {
        let mut response = StreamedResponse {
            assembler: ToolCallAssembler::for_request(self.request_seq),
            ..StreamedResponse::default()
        };
        let mut malformed = 0usize;

        loop {
            let next = match cancel_rx.as_mut() {
                Some(rx) => tokio::select! {
                    _ = wait_for_cancellation(rx) => {
                        response.cancelled = true;
                        break;
                    }
                    next = stream.next() => next,
                },
                None => stream.next().await,
            };
            let Some(delta) = next else {
                break;
            };

            match delta {
                StreamDelta::Text(fragment) => {
                    if fragment.is_empty() {
                        continue;
                    }
                    response.text.push_str(&fragment);
                    self.update_assistant_text(&mut response);
                    self.events.emit(AgentEvent::PartialText {
                        delta: fragment,
                        text: response.text.clone(),
                    });
                }
                StreamDelta::ToolCall(fragment) => response.assembler.push(&fragment),
                StreamDelta::Finished(reason) => response.finish = Some(reason),
                StreamDelta::Usage(usage) => {
                    self.tracker.record(&usage);
                    self.events.emit(AgentEvent::Usage {
                        usage,
                        session_total: self.tracker.session_total(),
                    });
                }
                StreamDelta::Malformed { error, .. } => {
                    malformed += 1;
                    self.events.emit(AgentEvent::Warning {
                        message: format!("skipped malformed stream frame: {error}"),
                    });
                }
                StreamDelta::TransportError(message) => {
                    warn!(error = %message, partial_len = response.text.len(), "stream failed mid-response");
                    self.events.emit(AgentEvent::Error {
                        message: message.clone(),
                    });
                    return Err(ApiError::Stream(message).into());
                }
            }
        }

        // Dropping the stream releases the connection.
        drop(stream);
        debug!(
            text_len = response.text.len(),
            tool_calls = response.assembler.len(),
            dropped_fragments = response.assembler.dropped_fragments(),
            malformed,
            finish = ?response.finish,
            cancelled = response.cancelled,
            "stream drained"
        );
        Ok(response)
    }

    fn update_assistant_text(&mut self, response: &mut StreamedResponse) {
        match response.message_index.and_then(|i| self.history.get_mut(i)) {
            Some(message) => message.content = Some(response.text.clone()),
            None => {
                let index = self.history.push(Message::assistant(response.text.clone()));
                response.message_index = Some(index);
            }
        }
    }

    /// Classify a drained response and record its tool calls.
    fn finish_response(&mut self, response: StreamedResponse) -> TurnState {
        if response.cancelled {
            return TurnState::Done(TurnStatus::Cancelled);
        }
        if response.finish.is_none() {
            if !response.assembler.is_empty() {
                warn!(
                    tool_calls = response.assembler.len(),
                    "stream closed without a finish reason; not executing its tool calls"
                );
            }
            self.events.emit(AgentEvent::Warning {
                message: "response stream ended without a finish reason".into(),
            });
            return TurnState::Done(TurnStatus::Incomplete);
        }

        let mut calls = response.assembler.finish();
        if calls.is_empty() && fallback::contains_tool_markup(&response.text) {
            calls = fallback::parse_fallback_tool_calls(&response.text, self.request_seq);
            if !calls.is_empty() {
                info!(count = calls.len(), "recovered tool calls from text markup");
            }
        }
        if calls.is_empty() {
            return TurnState::Done(TurnStatus::Completed);
        }

        match response.message_index.and_then(|i| self.history.get_mut(i)) {
            Some(message) => message.tool_calls = Some(calls.clone()),
            None => {
                self.history.push(Message {
                    role: Role::Assistant,
                    content: None,
                    tool_calls: Some(calls.clone()),
                    tool_call_id: None,
                });
            }
        }
        TurnState::AwaitingApproval(PendingApprovalSet::new(calls))
    }

    async fn await_approval(&mut self, pending: PendingApprovalSet) -> TurnState {
        let unlisted = match self.gate.inspect(&pending) {
            GateDecision::AutoApproved => {
                debug!(calls = pending.len(), "tool batch auto-approved");
                return TurnState::Executing(pending);
            }
            GateDecision::NeedsApproval { unlisted } => unlisted,
        };
        info!(calls = pending.len(), unlisted = ?unlisted, "tool batch needs approval");
        self.events.emit(AgentEvent::ApprovalNeeded {
            calls: pending.calls().to_vec(),
        });

        let Some(approver) = self.approver.clone() else {
            info!("no approver configured; rejecting tool batch");
            return TurnState::Done(TurnStatus::Rejected);
        };
        let mut cancel_rx = self.cancellation_rx.clone();
        let decision = match cancel_rx.as_mut() {
            Some(rx) => tokio::select! {
                _ = wait_for_cancellation(rx) => return TurnState::Done(TurnStatus::Cancelled),
                decision = approver.decide(&pending) => decision,
            },
            None => approver.decide(&pending).await,
        };
        match decision {
            ApprovalDecision::Accept => TurnState::Executing(pending),
            ApprovalDecision::Reject => {
                info!(calls = pending.len(), "tool batch rejected");
                TurnState::Done(TurnStatus::Rejected)
            }
        }
    }

    /// Run approved calls in declaration order, appending each result as it lands.
    async fn execute_batch(&mut self, pending: PendingApprovalSet) -> TurnState {
        let mut cancelled = false;
        for call in pending.into_calls() {
            let (output, is_error) = if cancelled || self.cancellation_requested() {
                cancelled = true;
                (CANCELLED_BY_USER.to_string(), true)
            } else {
                self.events.emit(AgentEvent::ToolStarted { call: call.clone() });
                match self.run_tool(&call).await {
                    Some(result) => result,
                    None => {
                        cancelled = true;
                        (CANCELLED_BY_USER.to_string(), true)
                    }
                }
            };
            self.history.push(Message::tool_result(&call.id, &output));
            self.events.emit(AgentEvent::ToolOutput {
                call_id: call.id.clone(),
                name: call.name().to_string(),
                output,
                is_error,
            });
        }
        if cancelled {
            TurnState::Done(TurnStatus::Cancelled)
        } else {
            TurnState::Sending
        }
    }

    /// Execute one call. `None` means cancellation interrupted it.
    async fn run_tool(&self, call: &ToolCall) -> Option<(String, bool)> {
        let execution = self.tools.execute(call.name(), &call.function.arguments);
        let result = match self.cancellation_rx.clone() {
            Some(mut rx) => tokio::select! {
                // Dropping the execution future kills any child process.
                _ = wait_for_cancellation(&mut rx) => return None,
                result = execution => result,
            },
            None => execution.await,
        };
        Some(match result {
            Ok(output) => (output, false),
            Err(err) => {
                debug!(tool = call.name(), id = %call.id, error = %err, "tool returned an error result");
                (format!("Error: {err}"), true)
            }
        })
    }
}

/// Resolve once the cancellation flag is set. A dropped sender never cancels.
async fn wait_for_cancellation(cancel_rx: &mut watch::Receiver<bool>) {
    loop {
        if *cancel_rx.borrow_and_update() {
            return;
        }
        if cancel_rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ToolCallDelta;
    use crate::testsupport::TestTempDir;
    use crate::types::Usage;
    use approval::FixedApprover;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    /// Replays one scripted delta sequence per request and records requests.
    struct ScriptedClient {
        responses: StdMutex<VecDeque<Vec<StreamDelta>>>,
        requests: Arc<StdMutex<Vec<ChatRequest>>>,
    }

    impl ScriptedClient {
        fn new(responses: Vec<Vec<StreamDelta>>) -> (Self, Arc<StdMutex<Vec<ChatRequest>>>) {
            let requests = Arc::new(StdMutex::new(Vec::new()));
            (
                Self {
                    responses: StdMutex::new(responses.into()),
                    requests: Arc::clone(&requests),
                },
                requests,
            )
        }
    }

    #[async_trait]
    impl ModelClient for ScriptedClient {
        async fn stream_chat(&self, request: &ChatRequest) -> Result<DeltaStream, ApiError> {
            self.requests.lock().expect("lock").push(request.clone());
            let next = self.responses.lock().expect("lock").pop_front();
            match next {
                Some(deltas) => Ok(DeltaStream::from_deltas(deltas)),
                None => Err(ApiError::Stream("script exhausted".into())),
            }
        }
    }

    /// Never produces a delta.
    struct HangingClient;

    #[async_trait]
    impl ModelClient for HangingClient {
        async fn stream_chat(&self, _request: &ChatRequest) -> Result<DeltaStream, ApiError> {
            let bytes = futures::stream::pending::<Result<bytes::Bytes, ApiError>>();
            Ok(DeltaStream::spawn(Box::pin(bytes), None))
        }
    }

    fn text(s: &str) -> StreamDelta {
        StreamDelta::Text(s.into())
    }

    fn stop() -> StreamDelta {
        StreamDelta::Finished(FinishReason::Stop)
    }

    fn calls_finish() -> StreamDelta {
        StreamDelta::Finished(FinishReason::ToolCalls)
    }

    fn call(index: u32, id: &str, name: &str, args: &str) -> StreamDelta {
        StreamDelta::ToolCall(ToolCallDelta {
            index: Some(index),
            id: Some(id.into()),
            name: Some(name.into()),
            arguments: Some(args.into()),
            ..ToolCallDelta::default()
        })
    }

    fn args_fragment(index: u32, args: &str) -> StreamDelta {
        StreamDelta::ToolCall(ToolCallDelta {
            index: Some(index),
            arguments: Some(args.into()),
            ..ToolCallDelta::default()
        })
    }

    fn test_config() -> Config {
        let mut config = Config::default();
        config.api.api_key = "sk-test".into();
        config.agent.system_prompt = "sys".into();
        config
    }

    fn agent_with(
        config: Config,
        responses: Vec<Vec<StreamDelta>>,
    ) -> (Agent, Arc<StdMutex<Vec<ChatRequest>>>) {
        let tools = ToolRegistry::builtin(&config.tools);
        let (client, requests) = ScriptedClient::new(responses);
        (Agent::with_client(config, tools, Box::new(client)), requests)
    }

    fn drain(rx: &mut tokio::sync::mpsc::UnboundedReceiver<AgentEvent>) -> Vec<AgentEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    // Verifies streamed text assembles into one assistant message and Completed.
    #[tokio::test]
    async fn plain_response_completes() {
        let (mut agent, requests) = agent_with(test_config(), vec![vec![text("Hel"), text("lo"), stop()]]);
        let (sink, mut rx) = EventSink::channel();
        agent.set_event_sink(sink);

        let outcome = agent.send("hi").await.unwrap();
        assert_eq!(outcome.status, TurnStatus::Completed);
        assert_eq!(outcome.content, "Hello");
        assert_eq!(outcome.iterations, 1);

        let messages = agent.history().messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[2], Message::assistant("Hello"));

        let requests = requests.lock().unwrap();
        let request = &requests[0];
        assert!(request.stream);
        assert_eq!(request.stream_options, Some(StreamOptions { include_usage: true }));
        assert_eq!(request.tool_choice.as_deref(), Some("auto"));

        let partials: Vec<String> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                AgentEvent::PartialText { text, .. } => Some(text),
                _ => None,
            })
            .collect();
        assert_eq!(partials, vec!["Hel".to_string(), "Hello".to_string()]);
    }

    // Verifies a stream with no content and no calls completes with empty content.
    #[tokio::test]
    async fn empty_response_completes_cleanly() {
        let (mut agent, _) = agent_with(test_config(), vec![vec![stop()]]);
        let outcome = agent.send("hi").await.unwrap();
        assert_eq!(outcome.status, TurnStatus::Completed);
        assert_eq!(outcome.content, "");
        assert_eq!(agent.history().len(), 2);
    }

    // Verifies an allow-listed call runs, its result is appended, and the loop continues.
    #[tokio::test]
    async fn auto_approved_tool_round_trip() {
        let dir = TestTempDir::new("agent-read");
        let file = dir.write_text("notes.txt", "remember the milk");
        let args = serde_json::json!({ "path": file.display().to_string() }).to_string();
        let (head, tail) = args.split_at(5);

        let (mut agent, requests) = agent_with(
            test_config(),
            vec![
                vec![
                    call(0, "call_1", "read_file", head),
                    args_fragment(0, tail),
                    calls_finish(),
                ],
                vec![text("It says to buy milk."), stop()],
            ],
        );
        let outcome = agent.send("what's in notes?").await.unwrap();
        assert_eq!(outcome.status, TurnStatus::Completed);
        assert_eq!(outcome.iterations, 2);
        assert_eq!(agent.history().tool_result("call_1"), Some("remember the milk"));

        let requests = requests.lock().unwrap();
        let second = &requests[1].messages;
        assert_eq!(second[2].tool_calls.as_ref().unwrap()[0].function.arguments, args);
        assert_eq!(second[3].role, Role::Tool);
    }

    // Verifies a mixed batch blocks, and without an approver is rejected with no results.
    #[tokio::test]
    async fn unlisted_call_without_approver_is_rejected() {
        let (mut agent, requests) = agent_with(
            test_config(),
            vec![
                vec![
                    text("Let me check."),
                    call(0, "call_r", "read_file", r#"{"path":"x"}"#),
                    call(1, "call_x", "execute_command", r#"{"command":"ls"}"#),
                    calls_finish(),
                ],
                vec![text("ok"), stop()],
            ],
        );
        let (sink, mut rx) = EventSink::channel();
        agent.set_event_sink(sink);

        let outcome = agent.send("look around").await.unwrap();
        assert_eq!(outcome.status, TurnStatus::Rejected);
        assert_eq!(outcome.content, "Let me check.");
        assert!(agent.history().tool_result("call_r").is_none());
        assert!(drain(&mut rx)
            .iter()
            .any(|e| matches!(e, AgentEvent::ApprovalNeeded { calls } if calls.len() == 2)));

        // The next send strips the unanswered calls before dispatch.
        agent.send("never mind").await.unwrap();
        let requests = requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert!(requests[1].messages.iter().all(|m| !m.has_tool_calls()));
        assert_eq!(requests[1].messages[2].text(), "Let me check.");
    }

    fn unnamed_id_call(name: &str, args: &str) -> StreamDelta {
        StreamDelta::ToolCall(ToolCallDelta {
            index: Some(0),
            name: Some(name.into()),
            arguments: Some(args.into()),
            ..ToolCallDelta::default()
        })
    }

    // Verifies calls sent without ids get distinct ids per turn, so a
    // rejected call is not mistaken for an earlier answered one.
    #[tokio::test]
    async fn id_less_calls_stay_distinct_across_turns() {
        let (mut agent, requests) = agent_with(
            test_config(),
            vec![
                vec![unnamed_id_call("list_tools", "{}"), calls_finish()],
                vec![text("listed"), stop()],
                vec![
                    unnamed_id_call("execute_command", r#"{"command":"true"}"#),
                    calls_finish(),
                ],
                vec![text("ok"), stop()],
            ],
        );

        assert_eq!(agent.send("tools?").await.unwrap().status, TurnStatus::Completed);
        assert_eq!(agent.send("run it").await.unwrap().status, TurnStatus::Rejected);
        agent.send("never mind").await.unwrap();

        let requests = requests.lock().unwrap();
        assert_eq!(requests.len(), 4);
        let last = &requests[3].messages;
        let answered: std::collections::HashSet<&str> =
            last.iter().filter_map(|m| m.tool_call_id.as_deref()).collect();
        let declared: Vec<&ToolCall> = last.iter().filter_map(|m| m.tool_calls.as_ref()).flatten().collect();
        assert_eq!(declared.len(), 1);
        assert_eq!(declared[0].name(), "list_tools");
        assert!(declared.iter().all(|c| answered.contains(c.id.as_str())));
    }

    // Verifies an accepting approver lets a blocked batch execute.
    #[tokio::test]
    async fn approver_accept_executes_batch() {
        let (mut agent, _) = agent_with(
            test_config(),
            vec![
                vec![
                    call(0, "call_x", "execute_command", r#"{"command":"echo approved"}"#),
                    calls_finish(),
                ],
                vec![text("done"), stop()],
            ],
        );
        agent.set_approver(Some(Arc::new(FixedApprover(ApprovalDecision::Accept))));
        let outcome = agent.send("run it").await.unwrap();
        assert_eq!(outcome.status, TurnStatus::Completed);
        assert_eq!(agent.history().tool_result("call_x"), Some("approved\n"));
    }

    // Verifies a close without finish reason is Incomplete and calls are not executed.
    #[tokio::test]
    async fn silent_close_is_incomplete_and_skips_calls() {
        let dir = TestTempDir::new("agent-incomplete");
        let target = dir.child("never.txt");
        let args = serde_json::json!({ "path": target.display().to_string(), "content": "x" }).to_string();
        let mut config = test_config();
        config.tools.auto_approve.push("write_file".into());
        let (mut agent, _) = agent_with(
            config,
            vec![vec![text("writing"), call(0, "call_w", "write_file", &args)]],
        );
        let outcome = agent.send("write").await.unwrap();
        assert_eq!(outcome.status, TurnStatus::Incomplete);
        assert_eq!(outcome.content, "writing");
        assert!(!target.exists());
        assert!(!agent.history().messages()[2].has_tool_calls());
    }

    // Verifies pseudo-markup in text is recovered and executed when no structured calls arrive.
    #[tokio::test]
    async fn fallback_markup_executes_tool() {
        let (mut agent, _) = agent_with(
            test_config(),
            vec![
                vec![text("<function=list_tools></function>"), stop()],
                vec![text("Those are the tools."), stop()],
            ],
        );
        let outcome = agent.send("what tools?").await.unwrap();
        assert_eq!(outcome.status, TurnStatus::Completed);
        let assistant = &agent.history().messages()[2];
        let calls = assistant.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].name(), "list_tools");
        assert_eq!(calls[0].function.arguments, "{}");
        let result = agent.history().tool_result(&calls[0].id).unwrap();
        assert!(result.starts_with("Available Tools:"));
    }

    // Verifies a tool failure becomes result text and the loop continues.
    #[tokio::test]
    async fn tool_error_is_reported_as_result() {
        let dir = TestTempDir::new("agent-missing");
        let args = serde_json::json!({ "path": dir.child("missing.txt").display().to_string() }).to_string();
        let (mut agent, _) = agent_with(
            test_config(),
            vec![
                vec![
                    call(0, "call_1", "read_file", &args),
                    call(1, "call_2", "read_file", "{\"path\": 42}"),
                    calls_finish(),
                ],
                vec![text("that file is missing"), stop()],
            ],
        );
        let outcome = agent.send("read it").await.unwrap();
        assert_eq!(outcome.status, TurnStatus::Completed);
        assert!(agent.history().tool_result("call_1").unwrap().starts_with("Error: execution failed"));
        assert!(agent.history().tool_result("call_2").unwrap().starts_with("Error: invalid arguments"));
    }

    // Verifies a mid-stream transport failure errors while keeping partial text.
    #[tokio::test]
    async fn transport_error_keeps_partial_text() {
        let (mut agent, _) = agent_with(
            test_config(),
            vec![vec![text("partial answ"), StreamDelta::TransportError("connection reset".into())]],
        );
        let err = agent.send("hi").await.unwrap_err();
        assert!(matches!(err, AgentError::Api(ApiError::Stream(ref m)) if m == "connection reset"));
        assert_eq!(agent.history().last().unwrap().text(), "partial answ");
    }

    // Verifies a dispatch failure is session-visible.
    #[tokio::test]
    async fn dispatch_failure_is_error() {
        let (mut agent, _) = agent_with(test_config(), vec![]);
        assert!(matches!(agent.send("hi").await, Err(AgentError::Api(_))));
    }

    // Verifies a malformed frame warns without ending the turn.
    #[tokio::test]
    async fn malformed_frame_is_skipped() {
        let (mut agent, _) = agent_with(
            test_config(),
            vec![vec![
                text("a"),
                StreamDelta::Malformed {
                    frame: "{oops".into(),
                    error: "expected value".into(),
                },
                text("b"),
                stop(),
            ]],
        );
        let (sink, mut rx) = EventSink::channel();
        agent.set_event_sink(sink);
        let outcome = agent.send("hi").await.unwrap();
        assert_eq!(outcome.content, "ab");
        assert!(drain(&mut rx)
            .iter()
            .any(|e| matches!(e, AgentEvent::Warning { message } if message.contains("expected value"))));
    }

    // Verifies the continuation loop stops at max_iterations.
    #[tokio::test]
    async fn iteration_cap_is_enforced() {
        let mut config = test_config();
        config.agent.max_iterations = 2;
        let looping = || vec![call(0, "call_t", "list_tools", "{}"), calls_finish()];
        let (mut agent, requests) = agent_with(config, vec![looping(), looping(), looping()]);
        let err = agent.send("loop").await.unwrap_err();
        assert!(matches!(err, AgentError::MaxIterationsReached(2)));
        assert_eq!(requests.lock().unwrap().len(), 2);
    }

    // Verifies usage frames feed the tracker.
    #[tokio::test]
    async fn usage_is_recorded() {
        let usage = Usage {
            prompt_tokens: 12,
            completion_tokens: 3,
            total_tokens: 15,
        };
        let (mut agent, _) = agent_with(
            test_config(),
            vec![vec![text("x"), stop(), StreamDelta::Usage(usage)]],
        );
        agent.send("hi").await.unwrap();
        assert_eq!(agent.tracker().last_prompt_tokens, 12);
        assert_eq!(agent.tracker().session_total(), 15);
    }

    // Verifies a pre-set cancellation flag ends the turn without contacting the model.
    #[tokio::test]
    async fn cancelled_before_send() {
        let (mut agent, requests) = agent_with(test_config(), vec![vec![text("x"), stop()]]);
        let (_tx, rx) = watch::channel(true);
        agent.set_cancellation_receiver(Some(rx));
        let outcome = agent.send("hi").await.unwrap();
        assert_eq!(outcome.status, TurnStatus::Cancelled);
        assert!(requests.lock().unwrap().is_empty());
    }

    // Verifies cancellation interrupts a stalled stream.
    #[tokio::test]
    async fn cancellation_interrupts_stream() {
        let config = test_config();
        let tools = ToolRegistry::builtin(&config.tools);
        let mut agent = Agent::with_client(config, tools, Box::new(HangingClient));
        let (tx, rx) = watch::channel(false);
        agent.set_cancellation_receiver(Some(rx));
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = tx.send(true);
        });
        let outcome = tokio::time::timeout(Duration::from_secs(5), agent.send("hi"))
            .await
            .expect("send should return after cancellation")
            .unwrap();
        assert_eq!(outcome.status, TurnStatus::Cancelled);
    }

    // Verifies a dropped cancellation sender does not cancel turns.
    #[tokio::test]
    async fn dropped_cancel_sender_is_not_cancellation() {
        let (mut agent, _) = agent_with(test_config(), vec![vec![text("ok"), stop()]]);
        let (tx, rx) = watch::channel(false);
        drop(tx);
        agent.set_cancellation_receiver(Some(rx));
        let outcome = agent.send("hi").await.unwrap();
        assert_eq!(outcome.status, TurnStatus::Completed);
    }

    // Verifies auto-compaction runs before dispatch and keeps the preamble.
    #[tokio::test]
    async fn auto_compaction_runs_before_send() {
        let mut config = test_config();
        config.context.max_messages = 6;
        let responses = (0..5).map(|i| vec![text(&format!("answer {i}")), stop()]).collect();
        let (mut agent, requests) = agent_with(config, responses);
        let (sink, mut rx) = EventSink::channel();
        agent.set_event_sink(sink);
        for i in 0..5 {
            agent.send(&format!("question {i}")).await.unwrap();
        }
        let requests = requests.lock().unwrap();
        let last = requests.last().unwrap();
        assert!(last.messages.len() <= 6);
        assert_eq!(last.messages[0], Message::system("sys"));
        assert!(drain(&mut rx)
            .iter()
            .any(|e| matches!(e, AgentEvent::ContextCompacted(_))));
    }

    #[tokio::test]
    async fn reset_and_manual_compaction() {
        let responses = (0..6).map(|i| vec![text(&format!("a{i}")), stop()]).collect();
        let (mut agent, _) = agent_with(test_config(), responses);
        for i in 0..6 {
            agent.send(&format!("q{i}")).await.unwrap();
        }
        let report = agent.compact_now(CompactionStrategy::Recent);
        assert_eq!(report.messages_after, 5);
        assert_eq!(agent.history().preamble(), &Message::system("sys"));
        agent.reset();
        assert_eq!(agent.history().len(), 1);
        assert_eq!(agent.tracker().session_total(), 0);
    }
}
