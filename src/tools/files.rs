//! File tools.
//!
//! - `read_file`: reads a file's contents, truncated at the output limit.
//! - `write_file`: writes content to a file, creating parent directories.
//! - `list_directory`: one row per entry with kind, size and mtime.

use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::AsyncReadExt;

use super::{Tool, ToolContext, ToolGroup};
use crate::error::ToolError;
use crate::textutil::safe_prefix_by_bytes;

#[derive(Debug, Deserialize)]
pub struct PathArgs {
    pub path: String,
}

fn path_schema(description: &str) -> Value {
    json!({
        "type": "object",
        "properties": {
            "path": { "type": "string", "description": description }
        },
        "required": ["path"]
    })
}

fn io_failure(action: &str, path: &str, err: std::io::Error) -> ToolError {
    ToolError::ExecutionFailed(format!("{action} {path}: {err}"))
}

// ---------------------------------------------------------------------------
// ReadFile
// ---------------------------------------------------------------------------

/// Tool that reads the contents of a file.
pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    type Args = PathArgs;

    fn name(&self) -> &'static str {
        "read_file"
    }

    fn description(&self) -> &'static str {
        "Read the contents of a file at the given path."
    }

    fn parameters(&self) -> Value {
        path_schema("Path to the file to read")
    }

    fn group(&self) -> ToolGroup {
        ToolGroup::FileOps
    }

    async fn run(&self, args: PathArgs, context: &ToolContext) -> Result<String, ToolError> {
        let path = context.resolve(&args.path);
        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| io_failure("reading", &args.path, e))?;

        let limit = context.max_output_size;
        let mut buf = Vec::new();
        file.take(limit as u64 + 1)
            .read_to_end(&mut buf)
            .await
            .map_err(|e| io_failure("reading", &args.path, e))?;

        let truncated = buf.len() > limit;
        let text = String::from_utf8_lossy(&buf);
        if !truncated {
            return Ok(text.into_owned());
        }
        Ok(format!(
            "{}\n\n[File truncated at {limit} bytes]",
            safe_prefix_by_bytes(&text, limit)
        ))
    }
}

// ---------------------------------------------------------------------------
// WriteFile
// ---------------------------------------------------------------------------

/// Tool that writes content to a file.
pub struct WriteFileTool;

#[derive(Debug, Deserialize)]
pub struct WriteArgs {
    pub path: String,
    pub content: String,
}

#[async_trait]
impl Tool for WriteFileTool {
    type Args = WriteArgs;

    fn name(&self) -> &'static str {
        "write_file"
    }

    fn description(&self) -> &'static str {
        "Write content to a file at the given path. Creates the file and any missing parent directories, overwrites if it exists."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Path to the file to write" },
                "content": { "type": "string", "description": "Content to write to the file" }
            },
            "required": ["path", "content"]
        })
    }

    fn group(&self) -> ToolGroup {
        ToolGroup::FileOps
    }

    async fn run(&self, args: WriteArgs, context: &ToolContext) -> Result<String, ToolError> {
        let path = context.resolve(&args.path);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_failure("creating directory for", &args.path, e))?;
        }
        tokio::fs::write(&path, args.content.as_bytes())
            .await
            .map_err(|e| io_failure("writing", &args.path, e))?;
        Ok(format!(
            "Successfully wrote {} bytes to {}",
            args.content.len(),
            args.path
        ))
    }
}

// ---------------------------------------------------------------------------
// ListDirectory
// ---------------------------------------------------------------------------

/// Tool that lists a directory's entries.
pub struct ListDirectoryTool;

#[async_trait]
impl Tool for ListDirectoryTool {
    type Args = PathArgs;

    fn name(&self) -> &'static str {
        "list_directory"
    }

    fn description(&self) -> &'static str {
        "List the files and directories at the given path with their sizes and modification times."
    }

    fn parameters(&self) -> Value {
        path_schema("Directory path to list")
    }

    fn group(&self) -> ToolGroup {
        ToolGroup::FileOps
    }

    async fn run(&self, args: PathArgs, context: &ToolContext) -> Result<String, ToolError> {
        let path = context.resolve(&args.path);
        let mut entries = tokio::fs::read_dir(&path)
            .await
            .map_err(|e| io_failure("reading directory", &args.path, e))?;

        let mut rows = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_failure("reading directory", &args.path, e))?
        {
            // Entries that vanish mid-listing are skipped.
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            let kind = if metadata.is_dir() { "dir " } else { "file" };
            let modified = metadata
                .modified()
                .map(|t| DateTime::<Local>::from(t).format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|_| "-".to_string());
            rows.push((
                entry.file_name().to_string_lossy().into_owned(),
                kind,
                metadata.len(),
                modified,
            ));
        }
        rows.sort_by(|a, b| a.0.cmp(&b.0));

        let mut output = format!("Contents of {}:\n", args.path);
        for (name, kind, size, modified) in rows {
            output.push_str(&format!("  [{kind}] {name} ({size} bytes) {modified}\n"));
        }
        Ok(output)
    }
}
