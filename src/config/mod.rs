//! Configuration loading and validation.
//!
//! Precedence (highest first): CLI flags, environment, `--config` file,
//! `./turnwise.toml`, `$XDG_CONFIG_HOME/turnwise/turnwise.toml`, built-in
//! defaults. Only one file is read: the first that exists in that order.

mod agents_md;
mod init;
mod loader;

pub use agents_md::{attach_project_instructions, find_agents_md, load_agents_md, AGENTS_FILE_NAME};
pub use init::{config_root_dir, default_global_config_path, ensure_default_global_config};
pub use loader::{load_config, CliOverrides};

use serde::Deserialize;

use crate::agent::compact::Budget;
use crate::error::ConfigError;

/// Tools that run without asking unless the user configures otherwise.
pub const DEFAULT_AUTO_APPROVE: &[&str] = &[
    "read_file",
    "list_directory",
    "list_tools",
    "git_ls_files",
    "git_grep",
];

/// Preamble placed at element 0 of every conversation.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are turnwise, an AI coding assistant. You help users with programming tasks by:
- Writing and editing code
- Running commands
- Explaining concepts
- Debugging issues
- Suggesting improvements

You have access to tools for file operations, command execution and repository search. Operations outside the pre-approved set are shown to the user for approval before they run.";

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

/// Fully resolved configuration.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub tools: ToolsConfig,
    pub context: ContextConfig,
    pub agent: AgentConfig,
    pub display: DisplayConfig,
}

/// `[api]`: where and how completions are requested.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Bounds dispatch and idle gaps in the response stream.
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "gpt-4-turbo-preview".to_string(),
            max_tokens: 4096,
            temperature: 0.7,
            timeout_secs: 60,
        }
    }
}

/// `[tools]`: approval allow-list and execution limits.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ToolsConfig {
    pub auto_approve: Vec<String>,
    /// Bytes of tool output kept before truncation.
    pub max_output_size: usize,
    pub command_timeout_secs: u64,
    pub file_ops_enabled: bool,
    pub command_exec_enabled: bool,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            auto_approve: DEFAULT_AUTO_APPROVE.iter().map(|s| s.to_string()).collect(),
            max_output_size: 50_000,
            command_timeout_secs: 600,
            file_ops_enabled: true,
            command_exec_enabled: true,
        }
    }
}

/// `[context]`: compaction budget.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ContextConfig {
    pub max_messages: usize,
    pub max_tokens: usize,
    pub compaction_ratio: f64,
    pub auto_compact: bool,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_messages: 50,
            max_tokens: 100_000,
            compaction_ratio: 0.5,
            auto_compact: true,
        }
    }
}

impl ContextConfig {
    pub fn budget(&self) -> Budget {
        Budget {
            max_messages: self.max_messages,
            max_tokens: self.max_tokens,
            compaction_ratio: self.compaction_ratio,
            auto_compact: self.auto_compact,
        }
    }
}

/// `[agent]`: conversation preamble and loop bound.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    pub system_prompt: String,
    pub max_iterations: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_iterations: 20,
        }
    }
}

/// `[display]`
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct DisplayConfig {
    pub color: bool,
    pub show_usage: bool,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            color: true,
            show_usage: false,
        }
    }
}

impl Config {
    /// Reject configurations that cannot start a session.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api.api_key.trim().is_empty() {
            return Err(ConfigError::Missing(
                "api.api_key (set TURNWISE_API_KEY or OPENAI_API_KEY)".to_string(),
            ));
        }
        if self.api.model.trim().is_empty() {
            return Err(ConfigError::Missing("api.model".to_string()));
        }
        if self.api.base_url.trim().is_empty() {
            return Err(ConfigError::Missing("api.base_url".to_string()));
        }
        if !(self.context.compaction_ratio > 0.0 && self.context.compaction_ratio <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "context.compaction_ratio must be in (0, 1], got {}",
                self.context.compaction_ratio
            )));
        }
        if self.agent.max_iterations == 0 {
            return Err(ConfigError::Invalid(
                "agent.max_iterations must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
