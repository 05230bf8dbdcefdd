//! Whole-file reads, confined to the project root.

use async_trait::async_trait;
use serde_json::Value;
use sleuth_core::error::ToolError;
use sleuth_core::tool::{ParamType, Tool, ToolResult, ToolSpecification};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::args::string_list;
use crate::project::{PathError, ProjectRoot};

pub const NAME: &str = "getFileContents";

pub struct GetFileContentsTool {
    project: Arc<ProjectRoot>,
}

impl GetFileContentsTool {
    pub fn new(project: Arc<ProjectRoot>) -> Self {
        Self { project }
    }
}

fn file_block(name: &str, body: &str) -> String {
    format!("<file name=\"{name}\">\n{body}\n</file>")
}

#[async_trait]
impl Tool for GetFileContentsTool {
    fn name(&self) -> &str {
        NAME
    }

    fn specification(&self) -> ToolSpecification {
        ToolSpecification::new(
            NAME,
            "Returns the full contents of the specified files. Use this after searchFilenames or searchSubstrings, \
             or when you need the content of a non-code file.\nThis can be expensive for large files.",
        )
        .param(
            "filenames",
            ParamType::string_array(),
            "List of filenames (relative to project root) to retrieve contents for.",
        )
    }

    async fn execute(&self, arguments: Value) -> Result<ToolResult, ToolError> {
        let mut filenames = string_list(&arguments, "filenames");
        if filenames.is_empty() {
            return Ok(ToolResult::empty("Cannot get file contents: filenames list is empty"));
        }
        let mut seen = std::collections::HashSet::new();
        filenames.retain(|f| seen.insert(f.clone()));
        debug!(?filenames, "Reading files");

        // Resolve everything first so an escaping path fails the whole call
        let mut resolved = Vec::with_capacity(filenames.len());
        for name in &filenames {
            match self.project.resolve(name) {
                Ok(path) => resolved.push((name, Some(path))),
                Err(PathError::NotFound { .. }) => resolved.push((name, None)),
                Err(e) => {
                    warn!(file = %name, error = %e, "Rejected file read");
                    return Err(ToolError::PermissionDenied {
                        tool_name: NAME.into(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        let mut blocks = Vec::with_capacity(resolved.len());
        let mut any_read = false;
        for (name, path) in resolved {
            let Some(path) = path else {
                blocks.push(file_block(name, "Error: File not found or not a regular file."));
                continue;
            };
            match tokio::fs::read_to_string(&path).await {
                Ok(content) => {
                    any_read = true;
                    blocks.push(file_block(name, &content));
                }
                Err(e) => blocks.push(file_block(name, &format!("Error reading file: {e}"))),
            }
        }

        let output = blocks.join("\n\n");
        Ok(if any_read {
            ToolResult::ok(output)
        } else {
            ToolResult::empty(output)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool() -> (tempfile::TempDir, GetFileContentsTool) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "remember the cache").unwrap();
        let project = Arc::new(ProjectRoot::new(dir.path()));
        (dir, GetFileContentsTool::new(project))
    }

    #[tokio::test]
    async fn reads_and_deduplicates() {
        let (_dir, tool) = tool();
        let result = tool
            .execute(json!({"filenames": ["notes.txt", "notes.txt", "gone.txt"]}))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(
            result.output,
            "<file name=\"notes.txt\">\nremember the cache\n</file>\n\n\
             <file name=\"gone.txt\">\nError: File not found or not a regular file.\n</file>"
        );
    }

    #[tokio::test]
    async fn only_missing_files_is_not_a_success() {
        let (_dir, tool) = tool();
        let result = tool.execute(json!({"filenames": ["gone.txt"]})).await.unwrap();
        assert!(!result.success);
    }

    #[tokio::test]
    async fn escaping_paths_are_rejected() {
        let (_dir, tool) = tool();
        let result = tool
            .execute(json!({"filenames": ["notes.txt", "../../etc/passwd"]}))
            .await;
        assert!(matches!(result, Err(ToolError::PermissionDenied { .. })));
    }

    #[tokio::test]
    async fn empty_list() {
        let (_dir, tool) = tool();
        let result = tool.execute(json!({"filenames": []})).await.unwrap();
        assert_eq!(result.output, "Cannot get file contents: filenames list is empty");
    }
}
