//! Shell command execution tool.
//!
//! Runs a command via `sh -c` and returns its combined output. A nonzero exit
//! is reported in the result text; only spawn failures and timeouts are
//! errors.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::process::run_process;
use super::{Tool, ToolContext, ToolGroup};
use crate::error::ToolError;
use crate::textutil::truncate_output;

/// Tool that runs shell commands.
pub struct ExecuteCommandTool;

#[derive(Debug, Deserialize)]
pub struct ExecuteCommandArgs {
    pub command: String,
    #[serde(default)]
    pub working_dir: Option<String>,
}

#[async_trait]
impl Tool for ExecuteCommandTool {
    type Args = ExecuteCommandArgs;

    fn name(&self) -> &'static str {
        "execute_command"
    }

    fn description(&self) -> &'static str {
        "Execute a shell command with `sh -c` and return its combined stdout and stderr."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                },
                "working_dir": {
                    "type": "string",
                    "description": "Working directory for the command (optional)"
                }
            },
            "required": ["command"]
        })
    }

    fn group(&self) -> ToolGroup {
        ToolGroup::CommandExec
    }

    async fn run(&self, args: ExecuteCommandArgs, context: &ToolContext) -> Result<String, ToolError> {
        if args.command.trim().is_empty() {
            return Err(ToolError::InvalidArguments("`command` is empty".into()));
        }
        let working_dir = match args.working_dir.as_deref().filter(|d| !d.trim().is_empty()) {
            Some(dir) => Some(context.resolve(dir)),
            None => context.working_dir.clone(),
        };
        info!(command = %args.command, working_dir = ?working_dir, "executing command by 'sh -c'");

        let output = run_process(
            "sh",
            &["-c".to_string(), args.command.clone()],
            working_dir.as_deref(),
            context.command_timeout,
        )
        .await?;

        let mut text = truncate_output(&output.combined(), context.max_output_size);
        if !output.success() {
            let status = output
                .exit_code
                .map_or_else(|| "terminated by signal".to_string(), |code| format!("exit status {code}"));
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&format!("[Command failed: {status}]"));
        }
        Ok(text)
    }
}
