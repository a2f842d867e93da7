use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One file queued for analysis. Built by the scanner, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisTask {
    pub path: PathBuf,
    pub relative_path: String,
    pub size: u64,
    pub extension: String,
}

impl AnalysisTask {
    pub fn new(root: &Path, path: PathBuf, size: u64) -> Self {
        let relative_path = path
            .strip_prefix(root)
            .unwrap_or(&path)
            .to_string_lossy()
            .replace('\\', "/");
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        Self {
            path,
            relative_path,
            size,
            extension,
        }
    }

    /// Final path component, used by filename heuristics.
    pub fn file_name(&self) -> &str {
        self.relative_path
            .rsplit('/')
            .next()
            .unwrap_or(&self.relative_path)
    }
}
