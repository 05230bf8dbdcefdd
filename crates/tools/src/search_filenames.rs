//! Regex search over project-relative file paths.

use async_trait::async_trait;
use serde_json::Value;
use sleuth_core::error::ToolError;
use sleuth_core::tool::{ParamType, Tool, ToolResult, ToolSpecification};
use std::sync::Arc;
use tracing::debug;

use crate::args::{compile_patterns, reasoning, string_list, REASONING_DESCRIPTION};
use crate::project::ProjectRoot;

pub const NAME: &str = "searchFilenames";

pub struct SearchFilenamesTool {
    project: Arc<ProjectRoot>,
}

impl SearchFilenamesTool {
    pub fn new(project: Arc<ProjectRoot>) -> Self {
        Self { project }
    }
}

#[async_trait]
impl Tool for SearchFilenamesTool {
    fn name(&self) -> &str {
        NAME
    }

    fn specification(&self) -> ToolSpecification {
        ToolSpecification::new(
            NAME,
            "Returns filenames (relative to the project root) that match the given regular expression patterns.\n\
             Use this to find configuration files, test data, or source files when you know part of their name.",
        )
        .param(
            "patterns",
            ParamType::string_array(),
            "Regex patterns to match against filenames.",
        )
        .param("reasoning", ParamType::String, REASONING_DESCRIPTION)
    }

    async fn execute(&self, arguments: Value) -> Result<ToolResult, ToolError> {
        let patterns = string_list(&arguments, "patterns");
        if patterns.is_empty() {
            return Ok(ToolResult::empty("Cannot search filenames: patterns list is empty"));
        }
        if reasoning(&arguments).trim().is_empty() {
            return Ok(ToolResult::empty(
                "Cannot search filenames: missing or empty reasoning parameter",
            ));
        }
        let compiled = compile_patterns(&patterns)?;
        if compiled.is_empty() {
            return Ok(ToolResult::empty("No valid patterns provided"));
        }

        debug!(?patterns, "Searching filenames");
        let project = Arc::clone(&self.project);
        let matching = tokio::task::spawn_blocking(move || {
            project
                .files()
                .into_iter()
                .filter(|path| compiled.iter().any(|p| p.is_match(path)))
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| ToolError::ExecutionFailed {
            tool_name: NAME.into(),
            reason: e.to_string(),
        })?;

        if matching.is_empty() {
            return Ok(ToolResult::empty(format!(
                "No filenames found matching patterns: {}",
                patterns.join(", ")
            )));
        }
        Ok(ToolResult::ok(format!("Matching filenames: {}", matching.join(", "))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn matches_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("config")).unwrap();
        std::fs::write(dir.path().join("config/app.toml"), "").unwrap();
        std::fs::write(dir.path().join("config/app.yaml"), "").unwrap();
        std::fs::write(dir.path().join("README.md"), "").unwrap();
        let tool = SearchFilenamesTool::new(Arc::new(ProjectRoot::new(dir.path())));

        let result = tool
            .execute(json!({"patterns": ["^config/.*\\.toml$", "README"], "reasoning": "configs"}))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.output, "Matching filenames: README.md, config/app.toml");

        let none = tool
            .execute(json!({"patterns": ["\\.json$"], "reasoning": "configs"}))
            .await
            .unwrap();
        assert!(!none.success);
        assert_eq!(none.output, "No filenames found matching patterns: \\.json$");
    }
}
