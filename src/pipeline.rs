//! Run orchestration.
//!
//! Order of work for one run: pre-flight checks, file selection, project
//! context, cache pre-pass (hits are settled here and never scheduled),
//! prioritization, scheduling with write-through caching, then a single cache
//! save and result assembly.

use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::backend::{Backend, Message};
use crate::config::AdvisorConfig;
use crate::context::{self, ProjectContext};
use crate::cost::{estimate_output_tokens, estimate_tokens, CostTracker};
use crate::diff::{DiffSet, DifferentialAnalyzer};
use crate::error::{AdvisorError, BackendError, Result};
use crate::prioritizer::{prioritize, AffinityTable};
use crate::prompt::{build_messages, parse_suggestions, PromptMode, PROMPT_VERSION};
use crate::report;
use crate::scanner::{RepositoryScanner, ScanResult};
use crate::scheduler::{RetryPolicy, Scheduler, TaskCompletion, TaskOutcome, WorkOutput};
use crate::storage::{CacheKey, CacheStore};
use crate::types::{
    silent_observer, AnalysisMode, AnalysisResult, AnalysisSummary, AnalysisTask, ProgressObserver,
    ProgressPhase, ProgressSnapshot, RunMetadata, Suggestion,
};
use crate::vcs::VersionControl;

#[derive(Clone)]
pub struct RunOptions {
    pub mode: AnalysisMode,
    /// Overrides the configured or provider-default limit.
    pub concurrency: Option<usize>,
    pub use_cache: bool,
    pub observer: ProgressObserver,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            mode: AnalysisMode::Full,
            concurrency: None,
            use_cache: true,
            observer: silent_observer(),
        }
    }
}

/// Prompt and cache bookkeeping for one file that missed the cache.
struct PreparedFile {
    content_hash: String,
    messages: Vec<Message>,
    mode: PromptMode,
    /// Input tokens a diff prompt avoids; credited only once the call succeeds.
    diff_savings: u64,
}

pub struct AnalysisPipeline {
    config: AdvisorConfig,
    backend: Arc<dyn Backend>,
    vcs: Option<Arc<dyn VersionControl>>,
}

impl AnalysisPipeline {
    pub fn new(config: AdvisorConfig, backend: Arc<dyn Backend>) -> Self {
        Self {
            config,
            backend,
            vcs: None,
        }
    }

    pub fn with_version_control(mut self, vcs: Arc<dyn VersionControl>) -> Self {
        self.vcs = Some(vcs);
        self
    }

    pub fn config(&self) -> &AdvisorConfig {
        &self.config
    }

    pub async fn run_analysis(&self, root: &Path, options: RunOptions) -> Result<AnalysisResult> {
        let started = Instant::now();
        let observer = Arc::clone(&options.observer);

        // Pre-flight: everything that may stop the run happens before scheduling.
        let root = preflight_root(root).map_err(|e| preflight_failed(root, e))?;
        let limit = options
            .concurrency
            .unwrap_or_else(|| self.config.scheduler.effective_concurrency(self.backend.kind()));
        let scheduler = Scheduler::new(limit)
            .map_err(|e| preflight_failed(&root, e))?
            .with_retry_policy(RetryPolicy::from_config(&self.config.scheduler))
            .with_observer(Arc::clone(&observer));

        observer(&ProgressSnapshot::new(ProgressPhase::Scanning, 0, 0));
        let (scan, diffs) = self
            .select_files(&root, options.mode)
            .await
            .map_err(|e| preflight_failed(&root, e))?;
        info!(
            "Selected {} file(s) in {} mode ({} skipped)",
            scan.files.len(),
            options.mode,
            scan.total_skipped()
        );

        let project = context::detect(&root);
        let fingerprint = context::hash_context(&project);
        let backend_id = self.backend.id();
        let key = CacheKey {
            backend: &backend_id,
            prompt_version: PROMPT_VERSION,
            prompt_mode: PromptMode::Full,
            context_fingerprint: &fingerprint,
        };

        let cache_enabled = options.use_cache && self.config.cache.enabled;
        let state_dir = self.config.cache.dir_for(&root);
        let mut cache = if cache_enabled {
            CacheStore::load(&state_dir).await
        } else {
            CacheStore::default()
        };

        let mut summary = AnalysisSummary {
            files_total: scan.files.len() + scan.total_skipped(),
            files_skipped: scan.total_skipped(),
            ..AnalysisSummary::default()
        };
        let mut cost = CostTracker::new(backend_id.provider.clone(), backend_id.model.clone());
        let mut suggestions: Vec<Suggestion> = Vec::new();
        let analyzer = DifferentialAnalyzer::new(&self.config.diff);

        // Cache pre-pass.
        let mut pending: Vec<AnalysisTask> = Vec::new();
        let mut prepared: HashMap<String, PreparedFile> = HashMap::new();
        for task in scan.files {
            let bytes = match tokio::fs::read(&task.path).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("Skipping unreadable {}: {}", task.relative_path, e);
                    summary.files_skipped += 1;
                    continue;
                }
            };
            // The prompt mode is decided up front: it is part of the cache key.
            let diff = diffs
                .diff_for(&task.relative_path)
                .filter(|diff| analyzer.should_use_diff(diff, bytes.len(), options.mode));
            let (mode, diff_text, diff_savings) = match diff {
                Some(diff) => (
                    PromptMode::Diff,
                    Some(diff.to_prompt_text()),
                    analyzer.estimated_savings(diff, bytes.len()),
                ),
                None => (PromptMode::Full, None, 0),
            };
            let content_hash = match &diff_text {
                Some(text) => CacheStore::diff_hash(&bytes, text),
                None => CacheStore::content_hash(&bytes),
            };

            if cache_enabled {
                if let Some(entry) = cache.lookup(&task.relative_path, &content_hash, &key.with_mode(mode)) {
                    debug!("Cache hit: {}", task.relative_path);
                    summary.cache_hits += 1;
                    let saved = entry.token_count.unwrap_or_else(|| {
                        let input = estimate_tokens(bytes.len());
                        input + estimate_output_tokens(input)
                    });
                    cost.record_saved(saved);
                    suggestions.extend(entry.suggestions.iter().cloned());
                    continue;
                }
            }

            let content = match String::from_utf8(bytes) {
                Ok(content) => content,
                Err(_) => {
                    debug!("Skipping non-UTF-8 file {}", task.relative_path);
                    summary.files_skipped += 1;
                    continue;
                }
            };
            if mode == PromptMode::Diff {
                summary.diff_mode_files += 1;
            }

            let messages = build_messages(&task, &project, mode, &content, diff_text.as_deref());
            prepared.insert(
                task.relative_path.clone(),
                PreparedFile {
                    content_hash,
                    messages,
                    mode,
                    diff_savings,
                },
            );
            pending.push(task);
        }

        info!(
            "{} cache hit(s), {} file(s) to analyze ({} in diff mode)",
            summary.cache_hits,
            pending.len(),
            summary.diff_mode_files
        );

        let ordered = prioritize(pending, &backend_id, self.affinity());
        let prepared = Arc::new(prepared);
        let scheduler = scheduler.with_already_completed(summary.cache_hits);

        let work = {
            let backend = Arc::clone(&self.backend);
            let prepared = Arc::clone(&prepared);
            let model = backend_id.model.clone();
            move |task: AnalysisTask| {
                let backend = Arc::clone(&backend);
                let prepared = Arc::clone(&prepared);
                let model = model.clone();
                async move { analyze_file(backend.as_ref(), &model, &task, &prepared).await }
            }
        };

        let on_complete = |completion: &TaskCompletion| {
            let TaskOutcome::Completed(output) = &completion.outcome else {
                return;
            };
            cost.record_call(output.input_tokens, output.output_tokens);
            let Some(file) = prepared.get(&completion.task.relative_path) else {
                return;
            };
            if file.mode == PromptMode::Diff {
                debug!("{} analyzed from its diff", completion.task.relative_path);
                cost.record_diff_savings(file.diff_savings);
            }
            if output.malformed {
                debug!("Not caching malformed response for {}", completion.task.relative_path);
                return;
            }
            if cache_enabled {
                cache.put(
                    completion.task.relative_path.clone(),
                    file.content_hash.clone(),
                    output.suggestions.clone(),
                    &key.with_mode(file.mode),
                    Some(output.input_tokens + output.output_tokens),
                );
            }
        };

        let outcome = scheduler.run(ordered, work, on_complete).await;

        if cache_enabled {
            if let Err(e) = cache.save(&state_dir).await {
                warn!("Failed to save cache to {:?}: {}", state_dir, e);
            }
        }

        observer(&ProgressSnapshot::new(
            ProgressPhase::Generating,
            summary.cache_hits + outcome.completed,
            summary.cache_hits + outcome.completed,
        ));

        suggestions.extend(outcome.suggestions);
        sort_suggestions(&mut suggestions);

        summary.files_analyzed = summary.cache_hits + outcome.succeeded;
        summary.files_failed = outcome.failures.len();
        summary.auth_failures = outcome
            .failures
            .iter()
            .filter(|f| f.kind.is_user_actionable())
            .count();
        summary.record_suggestions(&suggestions);
        summary.tokens_used = cost.tokens_used;
        summary.tokens_saved = cost.tokens_saved;
        summary.cost_estimate = cost.cost_used;
        summary.cost_saved = cost.cost_saved;
        summary.duration_ms = started.elapsed().as_millis() as u64;

        let result = AnalysisResult {
            summary,
            suggestions,
            failures: outcome.failures,
            metadata: RunMetadata {
                run_id: uuid::Uuid::new_v4().to_string(),
                timestamp: Utc::now(),
                backend: backend_id.clone(),
                mode: options.mode,
                prompt_version: PROMPT_VERSION.to_string(),
                project_type: project.project_type.clone(),
                framework: project.framework.clone(),
            },
        };

        if self.config.output.write_report {
            let path = state_dir.join(&self.config.output.report_file);
            if let Err(e) = report::write_report(&path, &result).await {
                warn!("Failed to write report to {:?}: {}", path, e);
            }
        }

        let total = result.summary.files_analyzed + result.summary.files_failed;
        observer(&ProgressSnapshot::new(ProgressPhase::Complete, total, total));
        info!(
            "Analysis complete: {} analyzed, {} failed, {} suggestion(s) in {}ms",
            result.summary.files_analyzed,
            result.summary.files_failed,
            result.summary.total_suggestions,
            result.summary.duration_ms
        );
        Ok(result)
    }

    fn affinity(&self) -> &AffinityTable {
        self.config.affinity.as_ref().unwrap_or(&DEFAULT_AFFINITY)
    }

    /// Files to analyze and, for diff-capable modes, the staged diff.
    async fn select_files(&self, root: &Path, mode: AnalysisMode) -> Result<(ScanResult, DiffSet)> {
        let scanner = RepositoryScanner::new(&self.config.scanning)?;
        if mode == AnalysisMode::Full {
            return Ok((scanner.scan(root)?, DiffSet::default()));
        }

        let vcs = self.vcs.as_ref().ok_or_else(|| {
            AdvisorError::VersionControl(format!("{} mode requires a version control adapter", mode))
        })?;
        let diffs = DiffSet::parse(&vcs.staged_diff(root).await?);

        let paths: Vec<PathBuf> = match mode {
            AnalysisMode::Staged => diffs.paths().into_iter().map(PathBuf::from).collect(),
            _ => vcs
                .changed_files(root)
                .await?
                .into_iter()
                .map(|changed| changed.path)
                .collect(),
        };
        Ok((scanner.tasks_for_paths(root, &paths), diffs))
    }
}

static DEFAULT_AFFINITY: once_cell::sync::Lazy<AffinityTable> = once_cell::sync::Lazy::new(AffinityTable::default);

fn preflight_failed(root: &Path, e: AdvisorError) -> AdvisorError {
    error!("Pre-flight check failed for {}: {}", root.display(), e);
    e
}

fn preflight_root(root: &Path) -> Result<PathBuf> {
    let canonical = root.canonicalize().map_err(|e| AdvisorError::RootUnreadable {
        path: root.to_path_buf(),
        reason: e.to_string(),
    })?;
    if !canonical.is_dir() {
        return Err(AdvisorError::RootUnreadable {
            path: root.to_path_buf(),
            reason: "not a directory".to_string(),
        });
    }
    std::fs::read_dir(&canonical).map_err(|e| AdvisorError::RootUnreadable {
        path: root.to_path_buf(),
        reason: e.to_string(),
    })?;
    Ok(canonical)
}

/// One backend call for one prepared file.
async fn analyze_file(
    backend: &dyn Backend,
    model: &str,
    task: &AnalysisTask,
    prepared: &HashMap<String, PreparedFile>,
) -> std::result::Result<WorkOutput, BackendError> {
    let file = prepared
        .get(&task.relative_path)
        .ok_or_else(|| BackendError::Other(format!("no prompt prepared for {}", task.relative_path)))?;

    let timeout = backend.timeout();
    let reply = match tokio::time::timeout(timeout, backend.send(model, &file.messages)).await {
        Ok(reply) => reply?,
        Err(_) => return Err(BackendError::Timeout(timeout)),
    };

    let parsed = parse_suggestions(&reply.text, &task.relative_path);
    let (input_tokens, output_tokens) = match reply.usage {
        Some(usage) => (usage.input_tokens, usage.output_tokens),
        None => {
            let prompt_len: usize = file.messages.iter().map(|m| m.content.len()).sum();
            let input = estimate_tokens(prompt_len);
            (input, estimate_tokens(reply.text.len()).max(estimate_output_tokens(input)))
        }
    };

    Ok(WorkOutput {
        suggestions: parsed.suggestions,
        input_tokens,
        output_tokens,
        malformed: parsed.malformed,
    })
}

/// Severity descending, then file, then first line (suggestions without a
/// line range last within a file).
pub fn sort_suggestions(suggestions: &mut [Suggestion]) {
    suggestions.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then_with(|| a.file.cmp(&b.file))
            .then_with(|| {
                let line = |s: &Suggestion| s.line_range.map(|r| r.start).unwrap_or(u32::MAX);
                line(a).cmp(&line(b))
            })
    });
}

/// The context a run would use for `root`, without analyzing anything.
pub fn describe_project(root: &Path) -> (ProjectContext, String) {
    let project = context::detect(root);
    let fingerprint = context::hash_context(&project);
    (project, fingerprint)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendReply, MockBackend};
    use crate::types::{BackendId, BackendKind, Severity, SuggestionCategory};
    use std::time::Duration;
    use tempfile::TempDir;

    fn mock_backend(reply: &'static str) -> MockBackend {
        let mut mock = MockBackend::new();
        mock.expect_id().returning(|| BackendId::new("mock", "m1"));
        mock.expect_kind().returning(|| BackendKind::Remote);
        mock.expect_timeout().returning(|| Duration::from_secs(5));
        mock.expect_send().returning(move |_, _| {
            Ok(BackendReply {
                text: reply.to_string(),
                usage: None,
            })
        });
        mock
    }

    #[test]
    fn test_sort_suggestions() {
        let mut suggestions = vec![
            Suggestion::new("b.rs", SuggestionCategory::Bug, Severity::Low, "1"),
            Suggestion::new("a.rs", SuggestionCategory::Bug, Severity::High, "2").with_lines(9, 9),
            Suggestion::new("a.rs", SuggestionCategory::Bug, Severity::High, "3").with_lines(2, 4),
            Suggestion::new("a.rs", SuggestionCategory::Bug, Severity::High, "4"),
            Suggestion::new("a.rs", SuggestionCategory::Bug, Severity::Medium, "5"),
        ];
        sort_suggestions(&mut suggestions);
        let titles: Vec<_> = suggestions.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["3", "2", "4", "5", "1"]);
    }

    #[tokio::test]
    async fn test_missing_root_is_preflight_error() {
        let pipeline = AnalysisPipeline::new(AdvisorConfig::default(), Arc::new(mock_backend("[]")));
        let result = pipeline
            .run_analysis(Path::new("/no/such/root"), RunOptions::default())
            .await;
        assert!(matches!(result, Err(AdvisorError::RootUnreadable { .. })));
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CapturedLogs {
        type Writer = CapturedLogs;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[tokio::test]
    async fn test_preflight_failure_is_logged_as_error() {
        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::ERROR)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let pipeline = AnalysisPipeline::new(AdvisorConfig::default(), Arc::new(mock_backend("[]")));
        let result = pipeline
            .run_analysis(Path::new("/no/such/root"), RunOptions::default())
            .await;
        assert!(result.is_err());

        let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("ERROR"));
        assert!(output.contains("Pre-flight check failed for /no/such/root"));
    }

    #[tokio::test]
    async fn test_invalid_concurrency_is_preflight_error() {
        let dir = TempDir::new().unwrap();
        let pipeline = AnalysisPipeline::new(AdvisorConfig::default(), Arc::new(mock_backend("[]")));
        let options = RunOptions {
            concurrency: Some(0),
            ..RunOptions::default()
        };
        let result = pipeline.run_analysis(dir.path(), options).await;
        assert!(matches!(result, Err(AdvisorError::InvalidConcurrency(0))));
    }

    #[tokio::test]
    async fn test_staged_mode_without_vcs_fails() {
        let dir = TempDir::new().unwrap();
        let pipeline = AnalysisPipeline::new(AdvisorConfig::default(), Arc::new(mock_backend("[]")));
        let options = RunOptions {
            mode: AnalysisMode::Staged,
            ..RunOptions::default()
        };
        let result = pipeline.run_analysis(dir.path(), options).await;
        assert!(matches!(result, Err(AdvisorError::VersionControl(_))));
    }

    #[tokio::test]
    async fn test_malformed_reply_is_not_cached() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("main.rs"), "fn main() {}\n").unwrap();

        let pipeline = AnalysisPipeline::new(AdvisorConfig::default(), Arc::new(mock_backend("not json")));
        let result = pipeline.run_analysis(dir.path(), RunOptions::default()).await.unwrap();
        assert_eq!(result.summary.files_analyzed, 1);
        assert_eq!(result.summary.total_suggestions, 0);

        let cache = CacheStore::load(&dir.path().join(".codeadvisor")).await;
        assert!(cache.is_empty());
    }
}
