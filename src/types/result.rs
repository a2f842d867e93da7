use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::run::{AnalysisMode, BackendId};
use super::suggestion::{Severity, Suggestion, SuggestionCategory};

/// Why a file ended a run without suggestions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Auth,
    Quota,
    RateLimited,
    PayloadTooLarge,
    TokenLimit,
    Network,
    Timeout,
    Panicked,
    Other,
}

impl FailureKind {
    /// Failures the user has to fix (credentials, billing) rather than wait out.
    pub fn is_user_actionable(&self) -> bool {
        matches!(self, FailureKind::Auth | FailureKind::Quota)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FailureKind::Auth => "authentication",
            FailureKind::Quota => "quota",
            FailureKind::RateLimited => "rate limited",
            FailureKind::PayloadTooLarge => "payload too large",
            FailureKind::TokenLimit => "token limit",
            FailureKind::Network => "network",
            FailureKind::Timeout => "timeout",
            FailureKind::Panicked => "panicked",
            FailureKind::Other => "other",
        };
        write!(f, "{}", label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileFailure {
    pub file: String,
    pub kind: FailureKind,
    pub message: String,
    pub attempts: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSummary {
    pub files_total: usize,
    pub files_analyzed: usize,
    pub files_skipped: usize,
    pub files_failed: usize,
    pub auth_failures: usize,
    pub total_suggestions: usize,
    pub by_category: BTreeMap<SuggestionCategory, usize>,
    pub by_severity: BTreeMap<Severity, usize>,
    pub duration_ms: u64,
    pub cache_hits: usize,
    pub diff_mode_files: usize,
    pub tokens_used: u64,
    pub tokens_saved: u64,
    pub cost_estimate: f64,
    pub cost_saved: f64,
}

impl AnalysisSummary {
    /// Rebuild the histograms from the final suggestion list.
    pub fn record_suggestions(&mut self, suggestions: &[Suggestion]) {
        self.total_suggestions = suggestions.len();
        self.by_category.clear();
        self.by_severity.clear();
        for suggestion in suggestions {
            *self.by_category.entry(suggestion.category).or_insert(0) += 1;
            *self.by_severity.entry(suggestion.severity).or_insert(0) += 1;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub run_id: String,
    pub timestamp: DateTime<Utc>,
    pub backend: BackendId,
    pub mode: AnalysisMode,
    pub prompt_version: String,
    pub project_type: String,
    pub framework: Option<String>,
}

/// Terminal artifact of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub summary: AnalysisSummary,
    pub suggestions: Vec<Suggestion>,
    pub failures: Vec<FileFailure>,
    pub metadata: RunMetadata,
}

impl AnalysisResult {
    pub fn suggestions_for(&self, file: &str) -> Vec<&Suggestion> {
        self.suggestions.iter().filter(|s| s.file == file).collect()
    }

    pub fn has_user_actionable_failures(&self) -> bool {
        self.failures.iter().any(|f| f.kind.is_user_actionable())
    }
}
