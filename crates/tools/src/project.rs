//! The project tree the text tools search, and path confinement to it.

use std::path::{Component, Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Error returned when a requested path cannot be used.
#[derive(Debug, thiserror::Error)]
pub enum PathError {
    #[error("Path traversal detected in '{path}'")]
    Traversal { path: String },

    #[error("Path '{path}' is outside the project root")]
    OutsideRoot { path: String },

    #[error("File not found: '{path}'")]
    NotFound { path: String },
}

/// Directories never searched.
const SKIPPED_DIRS: &[&str] = &["target", "node_modules", "build", "out", "dist"];

/// Bytes inspected when deciding whether a file is text.
const BINARY_SNIFF_LEN: usize = 8192;

#[derive(Debug, Clone)]
pub struct ProjectRoot {
    root: PathBuf,
    /// Files larger than this are skipped by content search
    max_file_size: u64,
    max_depth: usize,
}

impl ProjectRoot {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_file_size: 2 * 1024 * 1024,
            max_depth: 32,
        }
    }

    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Every file under the root as a sorted, `/`-separated relative path.
    ///
    /// Hidden directories and build output are skipped.
    pub fn files(&self) -> Vec<String> {
        let mut files: Vec<String> = WalkDir::new(&self.root)
            .max_depth(self.max_depth)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_skipped(e))
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| self.relative(e.path()))
            .collect();
        files.sort();
        files
    }

    fn relative(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<_> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(parts.join("/"))
    }

    /// Contents of a small text file; `None` for large, binary or unreadable files.
    pub fn read_text(&self, relative: &str) -> Option<String> {
        let path = self.root.join(relative);
        let size = std::fs::metadata(&path).ok()?.len();
        if size > self.max_file_size {
            return None;
        }
        let bytes = std::fs::read(&path).ok()?;
        if bytes.iter().take(BINARY_SNIFF_LEN).any(|b| *b == 0) {
            return None;
        }
        Some(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Resolve `requested` to an existing path inside the root.
    ///
    /// Rejects `..` components outright, then canonicalizes so symlinks
    /// cannot lead outside.
    pub fn resolve(&self, requested: &str) -> Result<PathBuf, PathError> {
        let candidate = Path::new(requested);
        if candidate.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(PathError::Traversal {
                path: requested.into(),
            });
        }

        let joined = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.root.join(candidate)
        };
        let root = self.root.canonicalize().map_err(|_| PathError::NotFound {
            path: self.root.display().to_string(),
        })?;
        let canonical = joined.canonicalize().map_err(|_| PathError::NotFound {
            path: requested.into(),
        })?;
        if !canonical.starts_with(&root) {
            return Err(PathError::OutsideRoot {
                path: requested.into(),
            });
        }
        Ok(canonical)
    }
}

fn is_skipped(entry: &DirEntry) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with('.') || SKIPPED_DIRS.contains(&name))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project() -> (tempfile::TempDir, ProjectRoot) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src/nested")).unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::create_dir_all(dir.path().join("target/debug")).unwrap();
        std::fs::write(dir.path().join("src/lib.rs"), "pub fn run() {}\n").unwrap();
        std::fs::write(dir.path().join("src/nested/deep.rs"), "struct Deep;\n").unwrap();
        std::fs::write(dir.path().join(".git/HEAD"), "ref: main\n").unwrap();
        std::fs::write(dir.path().join("target/debug/out.rs"), "junk\n").unwrap();
        std::fs::write(dir.path().join("blob.bin"), [0u8, 1, 2, 3]).unwrap();
        let project = ProjectRoot::new(dir.path());
        (dir, project)
    }

    #[test]
    fn lists_files_skipping_hidden_and_build_dirs() {
        let (_dir, project) = project();
        assert_eq!(project.files(), vec!["blob.bin", "src/lib.rs", "src/nested/deep.rs"]);
    }

    #[test]
    fn binary_and_large_files_are_not_text() {
        let (dir, project) = project();
        assert!(project.read_text("blob.bin").is_none());
        assert_eq!(project.read_text("src/lib.rs").as_deref(), Some("pub fn run() {}\n"));

        let tiny = ProjectRoot::new(dir.path()).with_max_file_size(4);
        assert!(tiny.read_text("src/lib.rs").is_none());
    }

    #[test]
    fn resolve_confines_to_root() {
        let (_dir, project) = project();
        assert!(project.resolve("src/lib.rs").is_ok());
        assert!(matches!(
            project.resolve("../outside.txt"),
            Err(PathError::Traversal { .. })
        ));
        assert!(matches!(
            project.resolve("src/../../etc/passwd"),
            Err(PathError::Traversal { .. })
        ));
        assert!(matches!(
            project.resolve("missing.rs"),
            Err(PathError::NotFound { .. })
        ));
    }

    #[test]
    fn absolute_paths_outside_root_are_rejected() {
        let (_dir, project) = project();
        let other = tempfile::tempdir().unwrap();
        let outside = other.path().join("secret.txt");
        std::fs::write(&outside, "secret").unwrap();
        let outside = outside.to_string_lossy().into_owned();

        assert!(matches!(
            project.resolve(&outside),
            Err(PathError::OutsideRoot { .. })
        ));
    }
}
