//! Regex search over file contents.

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use sleuth_core::error::ToolError;
use sleuth_core::tool::{ParamType, Tool, ToolResult, ToolSpecification};
use std::sync::Arc;
use tracing::debug;

use crate::args::{compile_patterns, reasoning, string_list, REASONING_DESCRIPTION};
use crate::project::ProjectRoot;

pub const NAME: &str = "searchSubstrings";

/// Lines listed per file before the rest are counted instead.
const MAX_LINES_PER_FILE: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
struct FileHit {
    path: String,
    lines: Vec<usize>,
}

impl FileHit {
    fn render(&self) -> String {
        let shown: Vec<String> = self
            .lines
            .iter()
            .take(MAX_LINES_PER_FILE)
            .map(usize::to_string)
            .collect();
        let hidden = self.lines.len().saturating_sub(MAX_LINES_PER_FILE);
        if hidden > 0 {
            format!("{} (lines {}, +{hidden} more)", self.path, shown.join(", "))
        } else {
            format!("{} (lines {})", self.path, shown.join(", "))
        }
    }
}

fn scan(project: &ProjectRoot, patterns: &[Regex]) -> Vec<FileHit> {
    project
        .files()
        .into_iter()
        .filter_map(|path| {
            let text = project.read_text(&path)?;
            let lines: Vec<usize> = text
                .lines()
                .enumerate()
                .filter(|(_, line)| patterns.iter().any(|p| p.is_match(line)))
                .map(|(i, _)| i + 1)
                .collect();
            (!lines.is_empty()).then_some(FileHit { path, lines })
        })
        .collect()
}

pub struct SearchSubstringsTool {
    project: Arc<ProjectRoot>,
}

impl SearchSubstringsTool {
    pub fn new(project: Arc<ProjectRoot>) -> Self {
        Self { project }
    }
}

#[async_trait]
impl Tool for SearchSubstringsTool {
    fn name(&self) -> &str {
        NAME
    }

    fn specification(&self) -> ToolSpecification {
        ToolSpecification::new(
            NAME,
            "Returns file names, with matching line numbers, whose text contents match regular expression patterns.\n\
             This is slower than searchSymbols but can find references to external dependencies and comment strings.",
        )
        .param(
            "patterns",
            ParamType::string_array(),
            "Regex patterns to search for within file contents. No implicit anchors or case insensitivity are added.",
        )
        .param("reasoning", ParamType::String, REASONING_DESCRIPTION)
    }

    async fn execute(&self, arguments: Value) -> Result<ToolResult, ToolError> {
        let patterns = string_list(&arguments, "patterns");
        if patterns.is_empty() {
            return Ok(ToolResult::empty("Cannot search substrings: patterns list is empty"));
        }
        if reasoning(&arguments).trim().is_empty() {
            return Ok(ToolResult::empty(
                "Cannot search substrings: missing or empty reasoning parameter",
            ));
        }
        let compiled = compile_patterns(&patterns)?;
        if compiled.is_empty() {
            return Ok(ToolResult::empty("No valid patterns provided"));
        }

        debug!(?patterns, "Searching file contents");
        let project = Arc::clone(&self.project);
        let hits = tokio::task::spawn_blocking(move || scan(&project, &compiled))
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: NAME.into(),
                reason: e.to_string(),
            })?;

        if hits.is_empty() {
            return Ok(ToolResult::empty(format!(
                "No files found with content matching patterns: {}",
                patterns.join(", ")
            )));
        }
        let listing: Vec<String> = hits.iter().map(FileHit::render).collect();
        Ok(ToolResult::ok(format!(
            "Files with content matching patterns:\n{}",
            listing.join("\n")
        )))
    }
}
