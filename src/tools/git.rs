//! Repository search tools backed by the `git` binary.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::process::{run_process, ProcessOutput};
use super::{Tool, ToolContext};
use crate::error::ToolError;
use crate::textutil::truncate_output;

/// `git grep` exit status for "no lines selected".
const GREP_NO_MATCH: i32 = 1;
/// `git` exit status outside a work tree.
const NOT_A_REPOSITORY: i32 = 128;

async fn run_git(args: Vec<String>, context: &ToolContext) -> Result<ProcessOutput, ToolError> {
    info!(args = ?args, "executing git");
    run_process("git", &args, context.working_dir.as_deref(), context.command_timeout).await
}

fn failure(subcommand: &str, output: &ProcessOutput) -> ToolError {
    let detail = output.combined();
    let detail = detail.trim();
    let status = output
        .exit_code
        .map_or_else(|| "signal".to_string(), |code| code.to_string());
    if detail.is_empty() {
        ToolError::ExecutionFailed(format!("git {subcommand} exited with {status}"))
    } else {
        ToolError::ExecutionFailed(format!("git {subcommand} exited with {status}: {detail}"))
    }
}

// ---------------------------------------------------------------------------
// git grep
// ---------------------------------------------------------------------------

/// Tool that searches tracked files with `git grep`.
pub struct GitGrepTool;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct GitGrepArgs {
    pub pattern: String,
    pub path: Option<String>,
    pub case_insensitive: bool,
    pub line_number: bool,
    pub count: bool,
}

impl GitGrepArgs {
    fn to_argv(&self) -> Vec<String> {
        let mut argv = vec!["grep".to_string()];
        if self.case_insensitive {
            argv.push("-i".into());
        }
        if self.line_number {
            argv.push("-n".into());
        }
        if self.count {
            argv.push("-c".into());
        }
        argv.push("-e".into());
        argv.push(self.pattern.clone());
        if let Some(path) = self.path.as_deref().filter(|p| !p.is_empty()) {
            argv.push("--".into());
            argv.push(path.to_string());
        }
        argv
    }
}

#[async_trait]
impl Tool for GitGrepTool {
    type Args = GitGrepArgs;

    fn name(&self) -> &'static str {
        "git_grep"
    }

    fn description(&self) -> &'static str {
        "Search tracked files in the current git repository for a pattern using `git grep`."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": { "type": "string", "description": "The search pattern (basic regular expression)" },
                "path": { "type": "string", "description": "Limit the search to this path or pathspec" },
                "case_insensitive": { "type": "boolean", "description": "Ignore case differences" },
                "line_number": { "type": "boolean", "description": "Prefix matches with line numbers" },
                "count": { "type": "boolean", "description": "Show only the number of matching lines per file" }
            },
            "required": ["pattern"]
        })
    }

    async fn run(&self, args: GitGrepArgs, context: &ToolContext) -> Result<String, ToolError> {
        if args.pattern.is_empty() {
            return Err(ToolError::InvalidArguments("`pattern` is required".into()));
        }
        let output = run_git(args.to_argv(), context).await?;
        match output.exit_code {
            Some(0) => Ok(truncate_output(&output.stdout, context.max_output_size)),
            Some(GREP_NO_MATCH) => Ok("No matches found".to_string()),
            _ => Err(failure("grep", &output)),
        }
    }
}

// ---------------------------------------------------------------------------
// git ls-files
// ---------------------------------------------------------------------------

/// Tool that lists repository files with `git ls-files`.
pub struct GitLsFilesTool;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct GitLsFilesArgs {
    pub cached: bool,
    pub deleted: bool,
    pub modified: bool,
    pub others: bool,
    pub ignored: bool,
    pub stage: bool,
    pub unmerged: bool,
    pub killed: bool,
    pub exclude_standard: bool,
    pub full_name: bool,
    pub path: Option<String>,
}

impl GitLsFilesArgs {
    fn to_argv(&self) -> Vec<String> {
        let flags = [
            (self.cached, "--cached"),
            (self.deleted, "--deleted"),
            (self.modified, "--modified"),
            (self.others, "--others"),
            (self.ignored, "--ignored"),
            (self.stage, "--stage"),
            (self.unmerged, "--unmerged"),
            (self.killed, "--killed"),
            (self.exclude_standard, "--exclude-standard"),
            (self.full_name, "--full-name"),
        ];
        let mut argv = vec!["ls-files".to_string()];
        argv.extend(
            flags
                .iter()
                .filter(|(on, _)| *on)
                .map(|(_, flag)| flag.to_string()),
        );
        if let Some(path) = self.path.as_deref().filter(|p| !p.is_empty()) {
            argv.push("--".into());
            argv.push(path.to_string());
        }
        argv
    }
}

#[async_trait]
impl Tool for GitLsFilesTool {
    type Args = GitLsFilesArgs;

    fn name(&self) -> &'static str {
        "git_ls_files"
    }

    fn description(&self) -> &'static str {
        "List files known to git in the current repository using `git ls-files`."
    }

    fn parameters(&self) -> Value {
        let flag = |description: &str| json!({ "type": "boolean", "description": description });
        json!({
            "type": "object",
            "properties": {
                "cached": flag("Show cached files (default when no other filter is set)"),
                "deleted": flag("Show deleted files"),
                "modified": flag("Show modified files"),
                "others": flag("Show untracked files"),
                "ignored": flag("Show only ignored files"),
                "stage": flag("Show staged contents' mode bits, object name and stage number"),
                "unmerged": flag("Show unmerged files"),
                "killed": flag("Show files that would be overwritten by checkout"),
                "exclude_standard": flag("Apply the standard git exclusions"),
                "full_name": flag("Show paths relative to the repository root"),
                "path": { "type": "string", "description": "Limit output to this path or pathspec" }
            }
        })
    }

    async fn run(&self, args: GitLsFilesArgs, context: &ToolContext) -> Result<String, ToolError> {
        let output = run_git(args.to_argv(), context).await?;
        match output.exit_code {
            Some(0) if output.stdout.trim().is_empty() => Ok("No files found".to_string()),
            Some(0) => Ok(truncate_output(&output.stdout, context.max_output_size)),
            Some(NOT_A_REPOSITORY) => Err(ToolError::ExecutionFailed(
                "not in a git repository".to_string(),
            )),
            _ => Err(failure("ls-files", &output)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testsupport::TestTempDir;
    use std::process::Command;

    /// Initialize a repository with one committed-to-index file, or `None`
    /// when git is unavailable.
    fn repo_fixture(name: &str) -> Option<TestTempDir> {
        let dir = TestTempDir::new(name);
        let ok = Command::new("git")
            .args(["init", "-q"])
            .current_dir(dir.path())
            .status()
            .map(|s| s.success())
            .unwrap_or(false);
        if !ok {
            return None;
        }
        dir.write_text("src/lib.rs", "fn alpha() {}\nfn Beta() {}\n");
        Command::new("git")
            .args(["add", "."])
            .current_dir(dir.path())
            .status()
            .ok()?;
        Some(dir)
    }

    fn context_in(dir: &TestTempDir) -> ToolContext {
        ToolContext {
            working_dir: Some(dir.path().to_path_buf()),
            ..ToolContext::default()
        }
    }

    #[test]
    fn grep_argv_orders_flags_pattern_and_path() {
        let args = GitGrepArgs {
            pattern: "-x".into(),
            path: Some("src".into()),
            case_insensitive: true,
            line_number: true,
            count: false,
        };
        assert_eq!(args.to_argv(), vec!["grep", "-i", "-n", "-e", "-x", "--", "src"]);
    }

    #[test]
    fn ls_files_argv_includes_only_set_flags() {
        let args = GitLsFilesArgs {
            others: true,
            exclude_standard: true,
            ..GitLsFilesArgs::default()
        };
        assert_eq!(args.to_argv(), vec!["ls-files", "--others", "--exclude-standard"]);
    }

    #[tokio::test]
    async fn grep_finds_matches_and_reports_none() {
        let Some(dir) = repo_fixture("git-grep") else {
            return;
        };
        let ctx = context_in(&dir);
        let hit = GitGrepTool
            .run(
                GitGrepArgs {
                    pattern: "beta".into(),
                    case_insensitive: true,
                    line_number: true,
                    ..GitGrepArgs::default()
                },
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(hit.trim(), "src/lib.rs:2:fn Beta() {}");

        let miss = GitGrepTool
            .run(
                GitGrepArgs {
                    pattern: "gamma".into(),
                    ..GitGrepArgs::default()
                },
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(miss, "No matches found");
    }

    #[tokio::test]
    async fn ls_files_lists_indexed_files() {
        let Some(dir) = repo_fixture("git-ls") else {
            return;
        };
        let out = GitLsFilesTool
            .run(GitLsFilesArgs::default(), &context_in(&dir))
            .await
            .unwrap();
        assert_eq!(out.trim(), "src/lib.rs");

        let empty = GitLsFilesTool
            .run(
                GitLsFilesArgs {
                    deleted: true,
                    ..GitLsFilesArgs::default()
                },
                &context_in(&dir),
            )
            .await
            .unwrap();
        assert_eq!(empty, "No files found");
    }

    #[tokio::test]
    async fn empty_pattern_is_invalid() {
        let err = GitGrepTool
            .run(GitGrepArgs::default(), &ToolContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
