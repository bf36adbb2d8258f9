//! Pluggable tool system.
//!
//! Tools are async trait objects that the model can invoke during the agentic
//! loop. Each tool declares a typed argument struct; the registry decodes the
//! model's JSON once at this boundary, so a malformed call never reaches the
//! tool body and instead comes back as [`ToolError::InvalidArguments`].

pub mod command;
pub mod files;
pub mod git;
pub mod list_tools;
pub mod process;

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info};

use crate::config::ToolsConfig;
use crate::error::ToolError;
use crate::types::{FunctionDefinition, ToolDefinition};

// ---------------------------------------------------------------------------
// Shared context
// ---------------------------------------------------------------------------

/// Settings every tool invocation sees.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolContext {
    pub max_output_size: usize,
    pub command_timeout: Duration,
    pub file_ops_enabled: bool,
    pub command_exec_enabled: bool,
    /// Directory relative paths and subprocesses resolve against. `None`
    /// means the process's current directory.
    pub working_dir: Option<PathBuf>,
}

impl ToolContext {
    pub fn from_config(config: &ToolsConfig) -> Self {
        Self {
            max_output_size: config.max_output_size,
            command_timeout: Duration::from_secs(config.command_timeout_secs),
            file_ops_enabled: config.file_ops_enabled,
            command_exec_enabled: config.command_exec_enabled,
            working_dir: None,
        }
    }

    /// Resolve a tool-supplied path against the working directory.
    pub fn resolve(&self, path: &str) -> PathBuf {
        let candidate = PathBuf::from(path);
        match &self.working_dir {
            Some(root) if candidate.is_relative() => root.join(candidate),
            _ => candidate,
        }
    }

    fn allows(&self, group: ToolGroup) -> bool {
        match group {
            ToolGroup::FileOps => self.file_ops_enabled,
            ToolGroup::CommandExec => self.command_exec_enabled,
            ToolGroup::ReadOnly => true,
        }
    }
}

impl Default for ToolContext {
    fn default() -> Self {
        Self::from_config(&ToolsConfig::default())
    }
}

/// Configuration switch a tool belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolGroup {
    /// Gated by `[tools] file_ops_enabled`.
    FileOps,
    /// Gated by `[tools] command_exec_enabled`.
    CommandExec,
    /// Always available.
    ReadOnly,
}

// ---------------------------------------------------------------------------
// Tool trait
// ---------------------------------------------------------------------------

/// A tool that can be invoked by the AI model.
///
/// Implement this trait to add custom tools and register instances with
/// [`ToolRegistry`] before creating the agent.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Decoded argument object. Missing optional fields should default.
    type Args: DeserializeOwned + Send;

    /// Unique name matching what the model will call.
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// JSON Schema of [`Self::Args`], published to the model.
    fn parameters(&self) -> Value;

    fn group(&self) -> ToolGroup {
        ToolGroup::ReadOnly
    }

    /// Run with already-validated arguments.
    async fn run(&self, args: Self::Args, context: &ToolContext) -> Result<String, ToolError>;
}

/// Object-safe view of a [`Tool`], used by the registry.
#[async_trait]
trait DynTool: Send + Sync {
    fn name(&self) -> &'static str;
    fn definition(&self) -> ToolDefinition;
    async fn invoke(&self, arguments: &str, context: &ToolContext) -> Result<String, ToolError>;
}

#[async_trait]
impl<T: Tool> DynTool for T {
    fn name(&self) -> &'static str {
        Tool::name(self)
    }

    fn definition(&self) -> ToolDefinition {
        definition_for(Tool::name(self), self.description(), self.parameters())
    }

    async fn invoke(&self, arguments: &str, context: &ToolContext) -> Result<String, ToolError> {
        if !context.allows(self.group()) {
            return Err(ToolError::Disabled(Tool::name(self).to_string()));
        }
        let args = parse_args::<T::Args>(arguments)?;
        self.run(args, context).await
    }
}

/// Decode a tool argument string. Blank input is treated as `{}`.
pub fn parse_args<A: DeserializeOwned>(arguments: &str) -> Result<A, ToolError> {
    let trimmed = arguments.trim();
    let source = if trimmed.is_empty() { "{}" } else { trimmed };
    serde_json::from_str(source).map_err(|e| ToolError::InvalidArguments(e.to_string()))
}

fn definition_for(name: &str, description: &str, parameters: Value) -> ToolDefinition {
    ToolDefinition {
        tool_type: "function".into(),
        function: FunctionDefinition {
            name: name.into(),
            description: description.into(),
            parameters,
        },
    }
}

// ---------------------------------------------------------------------------
// Tool registry
// ---------------------------------------------------------------------------

/// Registry of available tools.
///
/// The agent sends all registered tool definitions to the API, and dispatches
/// tool calls through this registry.
pub struct ToolRegistry {
    tools: Vec<Box<dyn DynTool>>,
    context: ToolContext,
}

impl ToolRegistry {
    pub fn new(context: ToolContext) -> Self {
        Self {
            tools: Vec::new(),
            context,
        }
    }

    /// Registry with every built-in tool, `list_tools` last.
    pub fn builtin(config: &ToolsConfig) -> Self {
        let mut registry = Self::new(ToolContext::from_config(config));
        registry.register(files::ReadFileTool);
        registry.register(files::WriteFileTool);
        registry.register(files::ListDirectoryTool);
        registry.register(command::ExecuteCommandTool);
        registry.register(git::GitGrepTool);
        registry.register(git::GitLsFilesTool);
        registry.register_catalog();
        registry
    }

    /// Register a tool. A tool with the same name replaces the earlier one.
    pub fn register(&mut self, tool: impl Tool + 'static) {
        let name = Tool::name(&tool);
        self.tools.retain(|t| t.name() != name);
        self.tools.push(Box::new(tool));
    }

    /// Register `list_tools` describing everything registered so far plus itself.
    pub fn register_catalog(&mut self) {
        let mut catalog = self.definitions();
        let placeholder = list_tools::ListToolsTool::new(Vec::new());
        catalog.push(DynTool::definition(&placeholder));
        self.register(list_tools::ListToolsTool::new(catalog));
    }

    /// Get tool definitions for the API request.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition()).collect()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn context(&self) -> &ToolContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut ToolContext {
        &mut self.context
    }

    /// Find a tool by name and execute it.
    pub async fn execute(&self, name: &str, arguments: &str) -> Result<String, ToolError> {
        let tool = self
            .tools
            .iter()
            .find(|t| t.name() == name)
            .ok_or_else(|| ToolError::ExecutionFailed(format!("unknown tool: {name}")))?;
        debug!(tool = name, arguments, "dispatching tool");
        let result = tool.invoke(arguments, &self.context).await;
        match &result {
            Ok(output) => info!(tool = name, output_len = output.len(), "tool completed"),
            Err(err) => info!(tool = name, error = %err, "tool failed"),
        }
        result
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// True if no tools are registered.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new(ToolContext::default())
    }
}
