//! Unified diff parsing and diff-mode selection.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::config::DiffConfig;
use crate::cost::estimate_tokens;
use crate::types::AnalysisMode;

static HUNK_HEADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@").expect("hunk header regex is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffLineKind {
    Added,
    Removed,
    Context,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffLine {
    pub kind: DiffLineKind,
    pub content: String,
    /// Line number in the old file; `None` for added lines.
    pub old_line: Option<u32>,
    /// Line number in the new file; `None` for removed lines.
    pub new_line: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineSpan {
    pub start: u32,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hunk {
    pub old_range: LineSpan,
    pub new_range: LineSpan,
    pub lines: Vec<DiffLine>,
}

impl Hunk {
    pub fn header(&self) -> String {
        format!(
            "@@ -{},{} +{},{} @@",
            self.old_range.start, self.old_range.count, self.new_range.start, self.new_range.count
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDiff {
    pub path: String,
    pub hunks: Vec<Hunk>,
}

impl FileDiff {
    pub fn added_lines(&self) -> usize {
        self.count_kind(DiffLineKind::Added)
    }

    pub fn removed_lines(&self) -> usize {
        self.count_kind(DiffLineKind::Removed)
    }

    pub fn changed_line_count(&self) -> usize {
        self.added_lines() + self.removed_lines()
    }

    fn count_kind(&self, kind: DiffLineKind) -> usize {
        self.hunks
            .iter()
            .flat_map(|h| h.lines.iter())
            .filter(|l| l.kind == kind)
            .count()
    }

    /// Render the diff the way it is sent to a backend.
    pub fn to_prompt_text(&self) -> String {
        let mut out = format!("--- a/{}\n+++ b/{}\n", self.path, self.path);
        for hunk in &self.hunks {
            out.push_str(&hunk.header());
            out.push('\n');
            for line in &hunk.lines {
                let marker = match line.kind {
                    DiffLineKind::Added => '+',
                    DiffLineKind::Removed => '-',
                    DiffLineKind::Context => ' ',
                };
                out.push(marker);
                out.push_str(&line.content);
                out.push('\n');
            }
        }
        out
    }
}

/// Parse a (possibly multi-file) unified diff. Unparseable fragments are
/// skipped rather than reported.
pub fn parse_unified_diff(text: &str) -> Vec<FileDiff> {
    let mut files: Vec<FileDiff> = Vec::new();
    let mut current: Option<FileDiff> = None;
    let mut old_path: Option<String> = None;
    let mut old_line = 0u32;
    let mut new_line = 0u32;
    // Lines still owed to the open hunk, per its header. Header-looking lines
    // inside a hunk body ("--- x" as a removed "-- x") are content.
    let mut old_remaining = 0u32;
    let mut new_remaining = 0u32;

    for raw in text.lines() {
        if old_remaining == 0 && new_remaining == 0 {
            if raw.starts_with("diff --git ") {
                files.extend(current.take());
                old_path = None;
            } else if let Some(rest) = raw.strip_prefix("--- ") {
                files.extend(current.take());
                old_path = strip_diff_prefix(rest);
            } else if let Some(rest) = raw.strip_prefix("+++ ") {
                files.extend(current.take());
                current = strip_diff_prefix(rest)
                    .or_else(|| old_path.clone())
                    .map(|path| FileDiff {
                        path,
                        hunks: Vec::new(),
                    });
            } else if let Some(caps) = HUNK_HEADER.captures(raw) {
                let Some(file) = current.as_mut() else {
                    continue;
                };
                let number = |i: usize, default: u32| {
                    caps.get(i)
                        .and_then(|m| m.as_str().parse::<u32>().ok())
                        .unwrap_or(default)
                };
                let old_range = LineSpan {
                    start: number(1, 0),
                    count: number(2, 1),
                };
                let new_range = LineSpan {
                    start: number(3, 0),
                    count: number(4, 1),
                };
                old_line = old_range.start;
                new_line = new_range.start;
                old_remaining = old_range.count;
                new_remaining = new_range.count;
                file.hunks.push(Hunk {
                    old_range,
                    new_range,
                    lines: Vec::new(),
                });
            }
            // Anything else between hunks (index lines, mode changes,
            // "\ No newline at end of file") carries no content.
            continue;
        }

        let Some(hunk) = current.as_mut().and_then(|f| f.hunks.last_mut()) else {
            old_remaining = 0;
            new_remaining = 0;
            continue;
        };

        if raw.starts_with('\\') {
            continue;
        }

        let line = match raw.chars().next() {
            Some('+') => {
                let line = DiffLine {
                    kind: DiffLineKind::Added,
                    content: raw[1..].to_string(),
                    old_line: None,
                    new_line: Some(new_line),
                };
                new_line += 1;
                new_remaining = new_remaining.saturating_sub(1);
                line
            }
            Some('-') => {
                let line = DiffLine {
                    kind: DiffLineKind::Removed,
                    content: raw[1..].to_string(),
                    old_line: Some(old_line),
                    new_line: None,
                };
                old_line += 1;
                old_remaining = old_remaining.saturating_sub(1);
                line
            }
            Some(' ') | None => {
                let line = DiffLine {
                    kind: DiffLineKind::Context,
                    content: raw.get(1..).unwrap_or_default().to_string(),
                    old_line: Some(old_line),
                    new_line: Some(new_line),
                };
                old_line += 1;
                new_line += 1;
                old_remaining = old_remaining.saturating_sub(1);
                new_remaining = new_remaining.saturating_sub(1);
                line
            }
            Some(_) => {
                // Truncated hunk; resynchronise on the next header.
                old_remaining = 0;
                new_remaining = 0;
                continue;
            }
        };
        hunk.lines.push(line);
    }

    files.extend(current.take());
    files.retain(|f| !f.hunks.is_empty());
    files
}

fn strip_diff_prefix(raw: &str) -> Option<String> {
    // Timestamps after a tab are emitted by plain `diff -u`.
    let path = raw.split('\t').next().unwrap_or(raw).trim();
    if path == "/dev/null" {
        return None;
    }
    let path = path
        .strip_prefix("a/")
        .or_else(|| path.strip_prefix("b/"))
        .unwrap_or(path);
    Some(path.to_string())
}

/// Parsed diffs for one run, indexed by repository-relative path.
#[derive(Debug, Clone, Default)]
pub struct DiffSet {
    files: HashMap<String, FileDiff>,
}

impl DiffSet {
    pub fn parse(text: &str) -> Self {
        let files = parse_unified_diff(text)
            .into_iter()
            .map(|diff| (diff.path.clone(), diff))
            .collect();
        Self { files }
    }

    pub fn diff_for(&self, path: &str) -> Option<&FileDiff> {
        self.files.get(path)
    }

    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.files.keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Decides per file whether a diff-only prompt is worth it.
#[derive(Debug, Clone)]
pub struct DifferentialAnalyzer {
    max_changed_lines: usize,
    min_token_savings: u64,
}

impl Default for DifferentialAnalyzer {
    fn default() -> Self {
        Self::new(&DiffConfig::default())
    }
}

impl DifferentialAnalyzer {
    pub fn new(config: &DiffConfig) -> Self {
        Self {
            max_changed_lines: config.max_changed_lines,
            min_token_savings: config.min_token_savings,
        }
    }

    /// Estimated tokens saved by sending the diff instead of the whole file.
    pub fn estimated_savings(&self, diff: &FileDiff, full_len: usize) -> u64 {
        let full_tokens = estimate_tokens(full_len);
        let diff_tokens = estimate_tokens(diff.to_prompt_text().len());
        full_tokens.saturating_sub(diff_tokens)
    }

    /// Large diffs lose too much surrounding context, so they fall back to a
    /// full-file prompt even when the savings would be large.
    pub fn should_use_diff(&self, diff: &FileDiff, full_len: usize, mode: AnalysisMode) -> bool {
        if !mode.allows_diff() {
            return false;
        }
        if diff.changed_line_count() > self.max_changed_lines {
            return false;
        }
        self.estimated_savings(diff, full_len) > self.min_token_savings
    }
}
