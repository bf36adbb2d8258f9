//! CLI argument parsing via clap.

use std::path::PathBuf;

use clap::Parser;

/// A streaming coding assistant for the terminal. Works with any
/// OpenAI-compatible API.
#[derive(Debug, Parser)]
#[command(name = "turnwise", version, long_version = turnwise::build_info::LONG_VERSION)]
pub struct Args {
    /// Prompt to send. If provided, runs in one-shot mode and exits.
    pub prompt: Option<String>,

    /// Path to config file (default: ./turnwise.toml or ~/.config/turnwise/turnwise.toml).
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Override model name.
    #[arg(short = 'm', long = "model")]
    pub model: Option<String>,

    /// Override API base URL.
    #[arg(long = "base-url")]
    pub base_url: Option<String>,

    /// Disable color output.
    #[arg(long = "no-color")]
    pub no_color: bool,

    /// Append diagnostic logs to this file instead of stderr.
    #[arg(long = "log", value_name = "PATH")]
    pub log: Option<PathBuf>,
}
