use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which files a run covers and whether diff-only prompts are allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisMode {
    /// Every file the scanner finds, always analyzed in full.
    #[default]
    Full,
    /// Files reported as changed by version control.
    Incremental,
    /// Files in the staged diff.
    Staged,
}

impl AnalysisMode {
    pub fn allows_diff(&self) -> bool {
        matches!(self, AnalysisMode::Incremental | AnalysisMode::Staged)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisMode::Full => "full",
            AnalysisMode::Incremental => "incremental",
            AnalysisMode::Staged => "staged",
        }
    }
}

impl fmt::Display for AnalysisMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AnalysisMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "full" => Ok(AnalysisMode::Full),
            "incremental" | "changed" => Ok(AnalysisMode::Incremental),
            "staged" => Ok(AnalysisMode::Staged),
            other => Err(format!("unknown analysis mode: {}", other)),
        }
    }
}

/// Provider plus model. Part of every cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BackendId {
    pub provider: String,
    pub model: String,
}

impl BackendId {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider, self.model)
    }
}

/// Local backends run on the user's machine and tolerate more concurrency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Local,
    Remote,
}
