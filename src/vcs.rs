use async_trait::async_trait;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::debug;

use crate::error::{AdvisorError, Result};

/// A path reported as changed, relative to the directory that was queried.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ChangedFile {
    pub path: PathBuf,
}

#[async_trait]
pub trait VersionControl: Send + Sync {
    /// Modified, staged and untracked files under `cwd`.
    async fn changed_files(&self, cwd: &Path) -> Result<Vec<ChangedFile>>;

    /// Unified diff of the index against HEAD, paths relative to `cwd`.
    async fn staged_diff(&self, cwd: &Path) -> Result<String>;
}

/// Shells out to the `git` binary.
#[derive(Debug, Default, Clone)]
pub struct GitCli;

impl GitCli {
    pub fn new() -> Self {
        Self
    }

    async fn execute(&self, cwd: &Path, args: &[&str]) -> Result<GitOutput> {
        let output = Command::new("git")
            .args(args)
            .current_dir(cwd)
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("GCM_INTERACTIVE", "never")
            .output()
            .await
            .map_err(|e| AdvisorError::VersionControl(format!("failed to execute git: {}", e)))?;

        Ok(GitOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    async fn run(&self, cwd: &Path, args: &[&str]) -> Result<String> {
        let output = self.execute(cwd, args).await?;
        if output.success {
            Ok(output.stdout)
        } else {
            Err(AdvisorError::VersionControl(format!(
                "git {} failed: {}",
                args.join(" "),
                output.stderr.trim()
            )))
        }
    }
}

struct GitOutput {
    success: bool,
    stdout: String,
    stderr: String,
}

#[async_trait]
impl VersionControl for GitCli {
    async fn changed_files(&self, cwd: &Path) -> Result<Vec<ChangedFile>> {
        // A repository without commits has no HEAD; fall back to the index.
        let tracked = match self.execute(cwd, &["diff", "--name-only", "--relative", "HEAD"]).await? {
            output if output.success => output.stdout,
            _ => {
                debug!("No HEAD in {:?}, listing staged files instead", cwd);
                self.run(cwd, &["diff", "--name-only", "--relative", "--cached"]).await?
            }
        };
        let untracked = self
            .run(cwd, &["ls-files", "--others", "--exclude-standard"])
            .await?;

        let paths: BTreeSet<&str> = tracked
            .lines()
            .chain(untracked.lines())
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect();

        debug!("git reports {} changed file(s)", paths.len());
        Ok(paths
            .into_iter()
            .map(|p| ChangedFile { path: PathBuf::from(p) })
            .collect())
    }

    async fn staged_diff(&self, cwd: &Path) -> Result<String> {
        self.run(
            cwd,
            &["diff", "--cached", "--relative", "--no-color", "--no-ext-diff", "-U3"],
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::DiffSet;
    use std::fs;
    use tempfile::TempDir;

    fn git(dir: &Path, args: &[&str]) -> bool {
        std::process::Command::new("git")
            .args(args)
            .current_dir(dir)
            .env("GIT_AUTHOR_NAME", "test")
            .env("GIT_AUTHOR_EMAIL", "test@example.com")
            .env("GIT_COMMITTER_NAME", "test")
            .env("GIT_COMMITTER_EMAIL", "test@example.com")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn init_repo() -> Option<TempDir> {
        let dir = TempDir::new().unwrap();
        if !git(dir.path(), &["init", "-q"]) {
            return None;
        }
        fs::write(dir.path().join("a.rs"), "fn a() {}\n").unwrap();
        assert!(git(dir.path(), &["add", "."]));
        assert!(git(dir.path(), &["commit", "-q", "-m", "init"]));
        Some(dir)
    }

    #[tokio::test]
    async fn test_changed_and_staged() {
        let Some(dir) = init_repo() else {
            return;
        };
        fs::write(dir.path().join("a.rs"), "fn a() { let x = 1; }\n").unwrap();
        fs::write(dir.path().join("b.rs"), "fn b() {}\n").unwrap();
        assert!(git(dir.path(), &["add", "a.rs"]));

        let vcs = GitCli::new();
        let changed = vcs.changed_files(dir.path()).await.unwrap();
        let paths: Vec<_> = changed.iter().map(|c| c.path.to_string_lossy().to_string()).collect();
        assert_eq!(paths, vec!["a.rs", "b.rs"]);

        let diff = vcs.staged_diff(dir.path()).await.unwrap();
        let set = DiffSet::parse(&diff);
        assert_eq!(set.paths(), vec!["a.rs"]);
        assert_eq!(set.diff_for("a.rs").unwrap().changed_line_count(), 2);
    }

    #[tokio::test]
    async fn test_outside_repository_fails() {
        let dir = TempDir::new().unwrap();
        let result = GitCli::new().staged_diff(dir.path()).await;
        assert!(matches!(result, Err(AdvisorError::VersionControl(_))));
    }
}
