//! Turnwise: a streaming, tool-using chat agent for OpenAI-compatible APIs.
//!
//! The agent streams model output, assembles tool calls from partial
//! deltas, gates them behind an approval step, runs them and feeds the
//! results back until the model finishes. Conversation context is kept
//! within budget by pluggable compaction strategies.
//!
//! # Quick start
//!
//! ```no_run
//! use turnwise::agent::Agent;
//! use turnwise::config::{load_config, CliOverrides};
//! use turnwise::tools::ToolRegistry;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_config(None, &CliOverrides::default())?;
//! let tools = ToolRegistry::builtin(&config.tools);
//! let mut agent = Agent::new(config, tools)?;
//! let outcome = agent.send("Hello!").await?;
//! println!("{}", outcome.content);
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod api;
pub mod build_info;
pub mod config;
pub mod error;
pub mod render;
#[cfg(test)]
pub mod testsupport;
pub mod textutil;
pub mod tokens;
pub mod tools;
pub mod types;
