//! Slash-command metadata and parsing for interactive mode.

/// Static slash command metadata shown by `/help`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlashCommand {
    pub name: &'static str,
    pub description: &'static str,
}

pub const SLASH_COMMANDS: [SlashCommand; 6] = [
    SlashCommand {
        name: "/help",
        description: "List available slash commands.",
    },
    SlashCommand {
        name: "/clear",
        description: "Clear the conversation, keeping the system prompt.",
    },
    SlashCommand {
        name: "/compact",
        description: "Compact history now: /compact [summary|recent|salient].",
    },
    SlashCommand {
        name: "/config",
        description: "Show the effective configuration.",
    },
    SlashCommand {
        name: "/exit",
        description: "Exit interactive mode.",
    },
    SlashCommand {
        name: "/quit",
        description: "Exit interactive mode.",
    },
];

/// Parsed slash command actions consumed by the REPL loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlashCommandAction {
    Help,
    Clear,
    Compact(Option<String>),
    Config,
    Quit,
    Unknown(String),
}

/// Parse a slash command from user input.
///
/// Returns `None` if the input is not a slash command.
pub fn parse_slash_command(input: &str) -> Option<SlashCommandAction> {
    let trimmed = input.trim();
    if !trimmed.starts_with('/') {
        return None;
    }

    let mut words = trimmed.split_whitespace();
    let token = words.next().unwrap_or("").to_ascii_lowercase();

    let action = match token.as_str() {
        "/" | "/help" => SlashCommandAction::Help,
        "/clear" => SlashCommandAction::Clear,
        "/compact" => SlashCommandAction::Compact(words.next().map(str::to_string)),
        "/config" => SlashCommandAction::Config,
        "/exit" | "/quit" => SlashCommandAction::Quit,
        other => SlashCommandAction::Unknown(other.to_string()),
    };

    Some(action)
}
