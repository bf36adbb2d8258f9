//! Terminal presentation of agent events.
//!
//! Assistant text streams to stdout as it arrives; everything else
//! (tool activity, usage, warnings) goes to stderr so piped output stays
//! clean.

use std::io::Write;

use crossterm::style::{Color, Stylize};

use crate::agent::compact::CompactionReport;
use crate::agent::events::AgentEvent;
use crate::agent::TurnStatus;
use crate::textutil::truncate_with_suffix_by_chars;
use crate::types::{ToolCall, Usage};

const INDENT: &str = "  ";
const ARGS_PREVIEW_CHARS: usize = 80;
const RESULT_PREVIEW_CHARS: usize = 120;

/// Renders [`AgentEvent`]s to the terminal.
#[derive(Debug)]
pub struct Renderer {
    color: bool,
    show_usage: bool,
    /// False while a streamed assistant line is still open on stdout.
    at_line_start: bool,
}

impl Renderer {
    pub fn new(color: bool, show_usage: bool) -> Self {
        Self {
            color,
            show_usage,
            at_line_start: true,
        }
    }

    /// Dispatch one event to the matching print routine.
    pub fn handle(&mut self, event: &AgentEvent) {
        match event {
            AgentEvent::PartialText { delta, .. } => self.stream_text(delta),
            AgentEvent::TurnFinished { status, .. } => self.turn_finished(*status),
            AgentEvent::ApprovalNeeded { calls } => self.approval_needed(calls),
            AgentEvent::ToolStarted { call } => self.tool_call(call),
            AgentEvent::ToolOutput {
                output, is_error, ..
            } => self.tool_result(output, *is_error),
            AgentEvent::Usage {
                usage,
                session_total,
            } => {
                if self.show_usage {
                    self.token_usage(usage, *session_total);
                }
            }
            AgentEvent::ContextCompacted(report) => self.compacted(report),
            AgentEvent::Warning { message } => self.warn(message),
            AgentEvent::Error { message } => self.error(message),
        }
    }

    /// Print the input prompt indicator.
    pub fn prompt(&self) {
        if self.color {
            eprint!("{} ", ">".with(Color::Green).bold());
        } else {
            eprint!("> ");
        }
        let _ = std::io::stderr().flush();
    }

    pub fn header(&self, model: &str) {
        if self.color {
            eprintln!("{} {}", "turnwise".with(Color::Cyan).bold(), model.with(Color::DarkGrey));
        } else {
            eprintln!("turnwise ({model})");
        }
    }

    pub fn stream_text(&mut self, delta: &str) {
        if delta.is_empty() {
            return;
        }
        let mut stdout = std::io::stdout();
        let _ = stdout.write_all(delta.as_bytes());
        let _ = stdout.flush();
        self.at_line_start = delta.ends_with('\n');
    }

    /// Close an open streamed line so stderr output starts on its own row.
    fn break_line(&mut self) {
        if !self.at_line_start {
            println!();
            self.at_line_start = true;
        }
    }

    fn turn_finished(&mut self, status: TurnStatus) {
        self.break_line();
        match status {
            TurnStatus::Completed => {}
            TurnStatus::Incomplete => self.warn("response ended before the model finished"),
            TurnStatus::Rejected => self.warn("tool calls rejected"),
            TurnStatus::Cancelled => self.warn("cancelled"),
        }
    }

    fn approval_needed(&mut self, calls: &[ToolCall]) {
        self.break_line();
        self.section("approval required");
        for call in calls {
            self.tool_call(call);
        }
    }

    pub fn tool_call(&mut self, call: &ToolCall) {
        self.break_line();
        let preview = single_line_preview(&call.function.arguments, ARGS_PREVIEW_CHARS);
        if self.color {
            eprintln!(
                "{INDENT}{} {}({})",
                "▶".with(Color::Blue),
                call.name().with(Color::Yellow).bold(),
                preview.with(Color::DarkGrey),
            );
        } else {
            eprintln!("{INDENT}> {}({preview})", call.name());
        }
    }

    pub fn tool_result(&mut self, output: &str, is_error: bool) {
        self.break_line();
        let preview = single_line_preview(output, RESULT_PREVIEW_CHARS);
        if self.color {
            let glyph = if is_error {
                "←".with(Color::Red)
            } else {
                "←".with(Color::Green)
            };
            eprintln!("{INDENT}{glyph} {}", preview.with(Color::Grey));
        } else {
            eprintln!("{INDENT}< {preview}");
        }
    }

    pub fn token_usage(&mut self, usage: &Usage, session_total: u64) {
        self.break_line();
        let line = usage_line(usage, session_total);
        if self.color {
            eprintln!("{INDENT}{}", line.with(Color::DarkGrey));
        } else {
            eprintln!("{INDENT}{line}");
        }
    }

    fn compacted(&mut self, report: &CompactionReport) {
        self.break_line();
        let line = compaction_line(report);
        if self.color {
            eprintln!("{} {}", "•".with(Color::DarkGrey), line.with(Color::Grey));
        } else {
            eprintln!("{line}");
        }
    }

    pub fn section(&self, title: &str) {
        if self.color {
            eprintln!("{} {}", "•".with(Color::DarkGrey), title.with(Color::White).bold());
        } else {
            eprintln!("{title}:");
        }
    }

    /// Print a key/value line under a section.
    pub fn field(&self, key: &str, value: &str) {
        if self.color {
            eprintln!("{INDENT}{} {}", format!("{key}:").with(Color::DarkGrey), value);
        } else {
            eprintln!("{INDENT}{key}: {value}");
        }
    }

    pub fn warn(&mut self, msg: &str) {
        self.break_line();
        if self.color {
            eprintln!("{} {msg}", "warning:".with(Color::Yellow).bold());
        } else {
            eprintln!("warning: {msg}");
        }
    }

    pub fn error(&mut self, msg: &str) {
        self.break_line();
        if self.color {
            eprintln!("{} {msg}", "error:".with(Color::Red).bold());
        } else {
            eprintln!("error: {msg}");
        }
    }
}

/// Collapse whitespace runs and clip to `max_chars`.
fn single_line_preview(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate_with_suffix_by_chars(&flat, max_chars, "...")
}

fn usage_line(usage: &Usage, session_total: u64) -> String {
    format!(
        "tokens: prompt:{} completion:{} session:{session_total}",
        usage.prompt_tokens, usage.completion_tokens
    )
}

fn compaction_line(report: &CompactionReport) -> String {
    format!(
        "context compacted: {} -> {} messages (~{} -> ~{} tokens)",
        report.messages_before, report.messages_after, report.tokens_before, report.tokens_after
    )
}
