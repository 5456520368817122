//! Temporary output directories for benchmark results.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// A temporary results directory that is removed on drop.
#[derive(Debug)]
pub struct OutputDir {
    dir: TempDir,
}

impl OutputDir {
    /// Creates a fresh, empty directory.
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    /// The path of the directory.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Returns all files whose name starts with `prefix`, sorted by name.
    pub fn files(&self, prefix: &str) -> Vec<PathBuf> {
        let mut files: Vec<_> = fs::read_dir(self.path())
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.starts_with(prefix))
            })
            .collect();
        files.sort();
        files
    }

    /// Reads the single file starting with `prefix`, panicking if there is not exactly one.
    pub fn read_single(&self, prefix: &str) -> String {
        let files = self.files(prefix);
        assert_eq!(files.len(), 1, "expected one `{prefix}` file, got {files:?}");
        fs::read_to_string(&files[0]).unwrap()
    }
}

impl Default for OutputDir {
    fn default() -> Self {
        Self::new()
    }
}
