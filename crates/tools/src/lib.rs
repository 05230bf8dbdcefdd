//! Built-in tools for sleuth.
//!
//! The text-search family works on any project tree without a symbol
//! index: regex search over file contents and file paths, and whole-file
//! reads confined to the project root.

pub mod args;
pub mod file_contents;
pub mod project;
pub mod search_filenames;
pub mod search_substrings;

use sleuth_core::tool::ToolRegistry;
use std::path::PathBuf;
use std::sync::Arc;

pub use file_contents::GetFileContentsTool;
pub use project::{PathError, ProjectRoot};
pub use search_filenames::SearchFilenamesTool;
pub use search_substrings::SearchSubstringsTool;

/// A registry holding the text-search tools over `root`.
pub fn default_registry(root: impl Into<PathBuf>) -> ToolRegistry {
    let project = Arc::new(ProjectRoot::new(root));
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(SearchSubstringsTool::new(Arc::clone(&project))));
    registry.register(Arc::new(SearchFilenamesTool::new(Arc::clone(&project))));
    registry.register(Arc::new(GetFileContentsTool::new(project)));
    registry
}
