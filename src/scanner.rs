use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, warn};

use crate::config::FileScanningConfig;
use crate::error::{AdvisorError, Result};
use crate::types::AnalysisTask;

#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    pub files: Vec<AnalysisTask>,
    pub skipped_oversized: usize,
    pub skipped_excluded: usize,
    pub duration_ms: u64,
}

impl ScanResult {
    pub fn total_skipped(&self) -> usize {
        self.skipped_oversized + self.skipped_excluded
    }
}

/// Gitignore-aware file discovery with include/exclude globs and a size ceiling.
pub struct RepositoryScanner {
    include: GlobSet,
    exclude: GlobSet,
    has_includes: bool,
    max_file_size: u64,
    follow_symlinks: bool,
    max_depth: Option<usize>,
}

impl RepositoryScanner {
    pub fn new(config: &FileScanningConfig) -> Result<Self> {
        Ok(Self {
            include: build_globset(&config.include_patterns)?,
            exclude: build_globset(&config.exclude_patterns)?,
            has_includes: !config.include_patterns.is_empty(),
            max_file_size: config.max_file_size,
            follow_symlinks: config.follow_symlinks,
            max_depth: config.max_depth,
        })
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    /// Walk `root` and return one task per eligible file, in walk order.
    pub fn scan(&self, root: &Path) -> Result<ScanResult> {
        if !root.is_dir() {
            return Err(AdvisorError::RootUnreadable {
                path: root.to_path_buf(),
                reason: "not a directory".to_string(),
            });
        }

        let start = Instant::now();
        let mut result = ScanResult::default();

        let mut builder = WalkBuilder::new(root);
        builder
            .hidden(true)
            .git_ignore(true)
            .git_exclude(true)
            .require_git(false)
            .follow_links(self.follow_symlinks)
            .max_depth(self.max_depth)
            .sort_by_file_path(|a, b| a.cmp(b));

        for entry in builder.build() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };

            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }

            let path = entry.path();
            let relative = path.strip_prefix(root).unwrap_or(path);
            if !self.is_selected(relative) {
                result.skipped_excluded += 1;
                continue;
            }

            let size = match entry.metadata() {
                Ok(metadata) => metadata.len(),
                Err(e) => {
                    warn!("Cannot stat {:?}: {}", path, e);
                    continue;
                }
            };

            if size > self.max_file_size {
                debug!("Skipping {:?}: {} bytes exceeds {}", relative, size, self.max_file_size);
                result.skipped_oversized += 1;
                continue;
            }

            result.files.push(AnalysisTask::new(root, path.to_path_buf(), size));
        }

        result.duration_ms = start.elapsed().as_millis() as u64;
        debug!(
            "Scanned {:?}: {} files, {} skipped in {}ms",
            root,
            result.files.len(),
            result.total_skipped(),
            result.duration_ms
        );
        Ok(result)
    }

    /// Build tasks for an explicit path list (e.g. files reported by git).
    /// Deleted, excluded or oversized paths are dropped.
    pub fn tasks_for_paths(&self, root: &Path, paths: &[PathBuf]) -> ScanResult {
        let start = Instant::now();
        let mut result = ScanResult::default();

        for path in paths {
            let absolute = if path.is_absolute() {
                path.clone()
            } else {
                root.join(path)
            };
            let relative = absolute.strip_prefix(root).unwrap_or(&absolute).to_path_buf();

            let metadata = match std::fs::metadata(&absolute) {
                Ok(m) if m.is_file() => m,
                _ => {
                    debug!("Skipping {:?}: not a readable file", relative);
                    continue;
                }
            };

            if !self.is_selected(&relative) {
                result.skipped_excluded += 1;
                continue;
            }
            if metadata.len() > self.max_file_size {
                result.skipped_oversized += 1;
                continue;
            }

            result.files.push(AnalysisTask::new(root, absolute, metadata.len()));
        }

        result.duration_ms = start.elapsed().as_millis() as u64;
        result
    }

    fn is_selected(&self, relative: &Path) -> bool {
        if self.exclude.is_match(relative) {
            return false;
        }
        if !self.has_includes {
            return true;
        }
        let file_name = relative.file_name().map(Path::new).unwrap_or(relative);
        self.include.is_match(relative) || self.include.is_match(file_name)
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &TempDir, relative: &str, content: &str) {
        let path = dir.path().join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn scanner_with(config: FileScanningConfig) -> RepositoryScanner {
        RepositoryScanner::new(&config).unwrap()
    }

    #[test]
    fn test_scan_finds_source_files() {
        let dir = TempDir::new().unwrap();
        write(&dir, "src/main.rs", "fn main() {}");
        write(&dir, "src/util.py", "def f(): pass");
        write(&dir, "README.md", "# readme");

        let result = scanner_with(FileScanningConfig::default()).scan(dir.path()).unwrap();
        let names: Vec<_> = result.files.iter().map(|f| f.relative_path.as_str()).collect();
        assert_eq!(names, vec!["src/main.rs", "src/util.py"]);
        assert_eq!(result.skipped_excluded, 1);
    }

    #[test]
    fn test_scan_respects_exclude_patterns() {
        let dir = TempDir::new().unwrap();
        write(&dir, "node_modules/lib/index.js", "module.exports = {}");
        write(&dir, "app/index.js", "console.log(1)");

        let result = scanner_with(FileScanningConfig::default()).scan(dir.path()).unwrap();
        assert_eq!(result.files.len(), 1);
        assert_eq!(result.files[0].relative_path, "app/index.js");
    }

    #[test]
    fn test_scan_skips_oversized() {
        let dir = TempDir::new().unwrap();
        write(&dir, "small.rs", "fn a() {}");
        write(&dir, "big.rs", &"x".repeat(2048));

        let config = FileScanningConfig {
            max_file_size: 1024,
            ..FileScanningConfig::default()
        };
        let result = scanner_with(config).scan(dir.path()).unwrap();
        assert_eq!(result.files.len(), 1);
        assert_eq!(result.skipped_oversized, 1);
    }

    #[test]
    fn test_scan_respects_gitignore() {
        let dir = TempDir::new().unwrap();
        write(&dir, ".gitignore", "generated/\n");
        write(&dir, "generated/out.rs", "fn g() {}");
        write(&dir, "lib.rs", "fn l() {}");

        let result = scanner_with(FileScanningConfig::default()).scan(dir.path()).unwrap();
        assert_eq!(result.files.len(), 1);
        assert_eq!(result.files[0].relative_path, "lib.rs");
    }

    #[test]
    fn test_scan_missing_root() {
        let scanner = scanner_with(FileScanningConfig::default());
        let result = scanner.scan(Path::new("/definitely/not/here"));
        assert!(matches!(result, Err(AdvisorError::RootUnreadable { .. })));
    }

    #[test]
    fn test_tasks_for_paths_drops_deleted_files() {
        let dir = TempDir::new().unwrap();
        write(&dir, "src/a.ts", "export const a = 1;");

        let scanner = scanner_with(FileScanningConfig::default());
        let result = scanner.tasks_for_paths(
            dir.path(),
            &[PathBuf::from("src/a.ts"), PathBuf::from("src/deleted.ts")],
        );
        assert_eq!(result.files.len(), 1);
        assert_eq!(result.files[0].relative_path, "src/a.ts");
        assert_eq!(result.files[0].extension, "ts");
    }

    #[test]
    fn test_invalid_pattern() {
        let config = FileScanningConfig {
            include_patterns: vec!["src/[".to_string()],
            ..FileScanningConfig::default()
        };
        assert!(matches!(RepositoryScanner::new(&config), Err(AdvisorError::Pattern(_))));
    }
}
