//! `list_tools`: describes the registered tools to the model.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{Tool, ToolContext};
use crate::error::ToolError;
use crate::types::ToolDefinition;

/// Tool that reports every registered tool's name, description and parameters.
pub struct ListToolsTool {
    catalog: Vec<ToolDefinition>,
}

impl ListToolsTool {
    pub fn new(catalog: Vec<ToolDefinition>) -> Self {
        Self { catalog }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ListToolsArgs {
    /// `"json"` for machine-readable output; anything else is text.
    pub format: Option<String>,
}

/// One catalog row as published in JSON format.
#[derive(Debug, Serialize)]
struct ToolSummary<'a> {
    name: &'a str,
    description: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    parameters: Vec<ParameterSummary<'a>>,
}

#[derive(Debug, Serialize)]
struct ParameterSummary<'a> {
    name: &'a str,
    description: &'a str,
    required: bool,
}

fn summarize(definition: &ToolDefinition) -> ToolSummary<'_> {
    let function = &definition.function;
    let required: Vec<&str> = function.parameters["required"]
        .as_array()
        .map(|names| names.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    let parameters = function.parameters["properties"]
        .as_object()
        .map(|props| {
            props
                .iter()
                .map(|(name, schema)| ParameterSummary {
                    name,
                    description: schema["description"].as_str().unwrap_or(""),
                    required: required.contains(&name.as_str()),
                })
                .collect()
        })
        .unwrap_or_default();
    ToolSummary {
        name: &function.name,
        description: &function.description,
        parameters,
    }
}

fn format_text(summaries: &[ToolSummary<'_>]) -> String {
    let mut out = String::from("Available Tools:\n================\n\n");
    for (i, tool) in summaries.iter().enumerate() {
        out.push_str(&format!("{}. {}\n", i + 1, tool.name));
        out.push_str(&format!("   Description: {}\n", tool.description));
        if tool.parameters.is_empty() {
            out.push_str("   Parameters: None\n");
        } else {
            out.push_str("   Parameters:\n");
            for param in &tool.parameters {
                let required = if param.required { " (required)" } else { "" };
                out.push_str(&format!(
                    "     - {}: {}{required}\n",
                    param.name, param.description
                ));
            }
        }
        out.push('\n');
    }
    out
}

#[async_trait]
impl Tool for ListToolsTool {
    type Args = ListToolsArgs;

    fn name(&self) -> &'static str {
        "list_tools"
    }

    fn description(&self) -> &'static str {
        "List all available tools with their descriptions and parameters."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "format": {
                    "type": "string",
                    "enum": ["text", "json"],
                    "description": "Output format (default: text)"
                }
            }
        })
    }

    async fn run(&self, args: ListToolsArgs, _context: &ToolContext) -> Result<String, ToolError> {
        let summaries: Vec<ToolSummary<'_>> = self.catalog.iter().map(summarize).collect();
        if args.format.as_deref() == Some("json") {
            return serde_json::to_string_pretty(&summaries)
                .map_err(|e| ToolError::ExecutionFailed(format!("encoding tool list: {e}")));
        }
        Ok(format_text(&summaries))
    }
}
