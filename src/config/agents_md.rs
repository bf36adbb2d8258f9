//! Project instructions from `AGENTS.md`.
//!
//! The nearest `AGENTS.md` in the working directory or any parent is
//! attached to the system preamble at session start.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use super::Config;

pub const AGENTS_FILE_NAME: &str = "AGENTS.md";

/// Path of the nearest `AGENTS.md` at or above `start`.
pub fn find_agents_md(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(AGENTS_FILE_NAME))
        .find(|candidate| candidate.is_file())
}

/// Project instructions found from `start`, with the file they came from.
///
/// Only the nearest file is read. An unreadable or blank file yields `None`.
pub fn load_agents_md(start: &Path) -> Option<(PathBuf, String)> {
    let path = find_agents_md(start)?;
    match std::fs::read_to_string(&path) {
        Ok(content) if content.trim().is_empty() => {
            info!(path = %path.display(), "AGENTS.md is empty; ignoring");
            None
        }
        Ok(content) => {
            info!(path = %path.display(), bytes = content.len(), "loaded AGENTS.md");
            Some((path, content))
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read AGENTS.md");
            None
        }
    }
}

/// `system_prompt` with project instructions appended.
pub fn attach_project_instructions(system_prompt: &str, instructions: &str) -> String {
    format!("{}\n\n{}", system_prompt.trim_end(), instructions.trim())
}

impl Config {
    /// Attach the nearest `AGENTS.md` at or above `start` to the system
    /// prompt. Returns the file used, if any.
    pub fn load_project_instructions(&mut self, start: &Path) -> Option<PathBuf> {
        let (path, content) = load_agents_md(start)?;
        self.agent.system_prompt =
            attach_project_instructions(&self.agent.system_prompt, &content);
        Some(path)
    }
}
