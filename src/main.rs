//! CLI entry point for turnwise.

mod cli;
mod commands;

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::{mpsc, watch};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use commands::{parse_slash_command, SlashCommandAction, SLASH_COMMANDS};
use turnwise::agent::approval::{ApprovalBroker, ApprovalRequest};
use turnwise::agent::compact::CompactionStrategy;
use turnwise::agent::events::{AgentEvent, EventSink};
use turnwise::agent::{Agent, TurnOutcome};
use turnwise::build_info;
use turnwise::config::{ensure_default_global_config, load_config, CliOverrides, Config};
use turnwise::error::AgentError;
use turnwise::render::Renderer;
use turnwise::textutil::mask_secret;
use turnwise::tools::ToolRegistry;

type InputLines = Lines<BufReader<Stdin>>;

/// Channels the foreground loop services while a turn runs.
struct Session {
    agent: Agent,
    renderer: Renderer,
    events: mpsc::UnboundedReceiver<AgentEvent>,
    approvals: mpsc::UnboundedReceiver<ApprovalRequest>,
    cancel: watch::Sender<bool>,
    input: InputLines,
    /// `AGENTS.md` attached to the preamble, if one was found.
    project_instructions: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let args = cli::Args::parse();

    if let Err(e) = init_tracing(args.log.as_deref()) {
        eprintln!("warning: failed to open log file: {e}");
    }

    if let Err(e) = ensure_default_global_config() {
        eprintln!("warning: failed to initialize default config: {e}");
    }

    let overrides = CliOverrides {
        model: args.model.clone(),
        base_url: args.base_url.clone(),
        no_color: args.no_color,
    };
    let config_path = args.config.as_deref().map(|p| p.to_string_lossy().into_owned());
    let config = match load_config(config_path.as_deref(), &overrides).and_then(|c| {
        c.validate()?;
        Ok(c)
    }) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };

    let mut session = match Session::start(config) {
        Ok(session) => session,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };

    if let Some(prompt) = args.prompt {
        let code = match session.run_turn(&prompt).await {
            Ok(_) => 0,
            Err(e) => {
                session.renderer.error(&e.to_string());
                1
            }
        };
        std::process::exit(code);
    }

    session.repl().await;
}

/// Route `tracing` output to stderr, or append to `log_path` when given.
fn init_tracing(log_path: Option<&Path>) -> std::io::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = match log_path {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
        }
        None => builder.with_writer(std::io::stderr).try_init(),
    };
    if let Err(err) = result {
        eprintln!("warning: tracing already initialized: {err}");
    }
    Ok(())
}

impl Session {
    fn start(mut config: Config) -> Result<Self, AgentError> {
        let project_instructions = match std::env::current_dir() {
            Ok(cwd) => config.load_project_instructions(&cwd),
            Err(e) => {
                warn!(error = %e, "cannot resolve working directory; skipping AGENTS.md");
                None
            }
        };
        let renderer = Renderer::new(config.display.color, config.display.show_usage);
        let tools = ToolRegistry::builtin(&config.tools);
        let mut agent = Agent::new(config, tools)?;

        let (sink, events) = EventSink::channel();
        let (broker, approvals) = ApprovalBroker::channel();
        let (cancel, cancel_rx) = watch::channel(false);
        agent.set_event_sink(sink);
        agent.set_approver(Some(Arc::new(broker)));
        agent.set_cancellation_receiver(Some(cancel_rx));

        Ok(Self {
            agent,
            renderer,
            events,
            approvals,
            cancel,
            input: BufReader::new(tokio::io::stdin()).lines(),
            project_instructions,
        })
    }

    /// Run one user turn while rendering events, answering approval
    /// prompts and forwarding Ctrl-C as cancellation.
    async fn run_turn(&mut self, prompt: &str) -> Result<TurnOutcome, AgentError> {
        self.cancel.send_replace(false);
        let Self {
            agent,
            renderer,
            events,
            approvals,
            cancel,
            input,
            ..
        } = self;

        let turn = agent.send(prompt);
        tokio::pin!(turn);
        let result = loop {
            tokio::select! {
                biased;
                Some(event) = events.recv() => renderer.handle(&event),
                Some(request) = approvals.recv() => {
                    while let Ok(event) = events.try_recv() {
                        renderer.handle(&event);
                    }
                    answer_approval(renderer, input, request).await;
                }
                _ = tokio::signal::ctrl_c() => {
                    cancel.send_replace(true);
                }
                result = &mut turn => break result,
            }
        };

        while let Ok(event) = events.try_recv() {
            renderer.handle(&event);
        }
        result
    }

    async fn repl(&mut self) {
        self.renderer
            .header(&format!("{} {}", self.agent.config().api.model, build_info::banner_line()));
        match &self.project_instructions {
            Some(path) => self.renderer.field("instructions", &path.display().to_string()),
            None => self
                .renderer
                .warn("no AGENTS.md found in the current or parent directories"),
        }
        eprintln!("Type /help for commands.");

        loop {
            self.renderer.prompt();
            let line = tokio::select! {
                line = self.input.next_line() => line,
                _ = tokio::signal::ctrl_c() => {
                    eprintln!();
                    break;
                }
            };
            let line = match line {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    self.renderer.error(&format!("failed to read input: {e}"));
                    break;
                }
            };
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            if let Some(action) = parse_slash_command(trimmed) {
                if !self.run_command(action) {
                    break;
                }
                continue;
            }

            if let Err(e) = self.run_turn(trimmed).await {
                self.renderer.error(&e.to_string());
            }
        }
    }

    /// Returns false when the REPL should exit.
    fn run_command(&mut self, action: SlashCommandAction) -> bool {
        match action {
            SlashCommandAction::Help => {
                self.renderer.section("commands");
                for cmd in SLASH_COMMANDS {
                    self.renderer.field(cmd.name, cmd.description);
                }
            }
            SlashCommandAction::Clear => {
                self.agent.reset();
                eprintln!("Conversation cleared.");
            }
            SlashCommandAction::Compact(strategy) => {
                match strategy.as_deref().unwrap_or("").parse::<CompactionStrategy>() {
                    Ok(strategy) => {
                        self.agent.compact_now(strategy);
                        while let Ok(event) = self.events.try_recv() {
                            self.renderer.handle(&event);
                        }
                    }
                    Err(e) => self.renderer.warn(&e),
                }
            }
            SlashCommandAction::Config => show_config(&self.renderer, self.agent.config()),
            SlashCommandAction::Quit => return false,
            SlashCommandAction::Unknown(name) => {
                self.renderer
                    .warn(&format!("unknown command {name}; type /help for a list"));
            }
        }
        true
    }
}

/// Ask on stderr and read one answer line; anything but yes denies.
async fn answer_approval(renderer: &mut Renderer, input: &mut InputLines, request: ApprovalRequest) {
    let count = request.pending().len();
    eprint!("Run {count} tool call(s)? [y/N] ");
    let answer = match input.next_line().await {
        Ok(Some(line)) => line,
        Ok(None) => String::new(),
        Err(e) => {
            renderer.error(&format!("failed to read approval: {e}"));
            String::new()
        }
    };
    if is_affirmative(&answer) {
        request.approve();
    } else {
        request.deny();
    }
}

fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

fn show_config(renderer: &Renderer, config: &Config) {
    renderer.section("api");
    renderer.field("base_url", &config.api.base_url);
    renderer.field("api_key", &mask_secret(&config.api.api_key));
    renderer.field("model", &config.api.model);
    renderer.field("max_tokens", &config.api.max_tokens.to_string());
    renderer.field("temperature", &config.api.temperature.to_string());
    renderer.field("timeout_secs", &config.api.timeout_secs.to_string());

    renderer.section("tools");
    renderer.field("auto_approve", &config.tools.auto_approve.join(", "));
    renderer.field("max_output_size", &config.tools.max_output_size.to_string());
    renderer.field(
        "command_timeout_secs",
        &config.tools.command_timeout_secs.to_string(),
    );
    renderer.field("file_ops_enabled", &config.tools.file_ops_enabled.to_string());
    renderer.field(
        "command_exec_enabled",
        &config.tools.command_exec_enabled.to_string(),
    );

    renderer.section("context");
    renderer.field("max_messages", &config.context.max_messages.to_string());
    renderer.field("max_tokens", &config.context.max_tokens.to_string());
    renderer.field("compaction_ratio", &config.context.compaction_ratio.to_string());
    renderer.field("auto_compact", &config.context.auto_compact.to_string());

    renderer.section("agent");
    renderer.field("max_iterations", &config.agent.max_iterations.to_string());

    renderer.section("display");
    renderer.field("color", &config.display.color.to_string());
    renderer.field("show_usage", &config.display.show_usage.to_string());
}
