use colored::*;
use std::fmt::Write as _;

use crate::storage::CacheStats;
use crate::types::{AnalysisResult, Severity, Suggestion};

pub struct OutputFormatter {
    colors_enabled: bool,
}

impl OutputFormatter {
    pub fn new(colors_enabled: bool) -> Self {
        Self { colors_enabled }
    }

    fn severity_label(&self, severity: Severity) -> String {
        let label = format!("{:<6}", severity.as_str().to_uppercase());
        if !self.colors_enabled {
            return label;
        }
        match severity {
            Severity::High => label.red().bold().to_string(),
            Severity::Medium => label.yellow().to_string(),
            Severity::Low => label.dimmed().to_string(),
        }
    }

    pub fn format_suggestion(&self, suggestion: &Suggestion) -> String {
        let location = match suggestion.line_range {
            Some(range) if range.start == range.end => format!("{}:{}", suggestion.file, range.start),
            Some(range) => format!("{}:{}-{}", suggestion.file, range.start, range.end),
            None => suggestion.file.clone(),
        };
        let mut out = format!(
            "{} [{}] {}\n    {}",
            self.severity_label(suggestion.severity),
            suggestion.category,
            suggestion.title.bold(),
            location.dimmed()
        );
        if !suggestion.description.is_empty() {
            let _ = write!(out, "\n    {}", suggestion.description);
        }
        if !suggestion.recommendation.is_empty() {
            let _ = write!(out, "\n    {} {}", "→".green(), suggestion.recommendation);
        }
        out
    }

    pub fn format_suggestions(&self, suggestions: &[Suggestion], limit: Option<usize>) -> String {
        if suggestions.is_empty() {
            return "No suggestions. Nice work.".green().to_string();
        }
        let shown = limit.unwrap_or(suggestions.len()).min(suggestions.len());
        let mut out = suggestions[..shown]
            .iter()
            .map(|s| self.format_suggestion(s))
            .collect::<Vec<_>>()
            .join("\n\n");
        if shown < suggestions.len() {
            let _ = write!(
                out,
                "\n\n{}",
                format!("... {} more in the report", suggestions.len() - shown).dimmed()
            );
        }
        out
    }

    pub fn format_analysis_summary(&self, result: &AnalysisResult) -> String {
        let s = &result.summary;
        let mut out = String::new();
        let _ = writeln!(out, "{}", "Summary".bold());
        let _ = writeln!(out, "  Files analyzed:   {}", s.files_analyzed);
        let _ = writeln!(out, "  Files skipped:    {}", s.files_skipped);
        if s.files_failed > 0 {
            let _ = writeln!(out, "  Files failed:     {}", s.files_failed.to_string().red());
        } else {
            let _ = writeln!(out, "  Files failed:     0");
        }
        let _ = writeln!(out, "  Cache hits:       {}", s.cache_hits);
        if s.diff_mode_files > 0 {
            let _ = writeln!(out, "  Diff-only files:  {}", s.diff_mode_files);
        }
        let _ = writeln!(out, "  Suggestions:      {}", s.total_suggestions);
        for (category, count) in &s.by_category {
            let _ = writeln!(out, "    {:<16} {}", category.as_str(), count);
        }
        let _ = writeln!(
            out,
            "  Tokens:           {} used, {} saved",
            s.tokens_used, s.tokens_saved
        );
        let _ = writeln!(
            out,
            "  Estimated cost:   ${:.4} (saved ${:.4})",
            s.cost_estimate, s.cost_saved
        );
        let _ = write!(
            out,
            "  Duration:         {:.1}s  [{} via {}]",
            s.duration_ms as f64 / 1000.0,
            result.metadata.mode,
            result.metadata.backend
        );
        out
    }

    pub fn format_failures(&self, result: &AnalysisResult) -> String {
        result
            .failures
            .iter()
            .map(|f| {
                format!(
                    "  {} {} ({}, {} attempt(s)): {}",
                    "✗".red(),
                    f.file,
                    f.kind,
                    f.attempts,
                    f.message
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn format_cache_stats(&self, stats: &CacheStats) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "  Entries:      {}", stats.entries);
        let _ = writeln!(out, "  Suggestions:  {}", stats.total_suggestions);
        let _ = writeln!(out, "  Tokens:       {}", stats.total_tokens);
        if let (Some(oldest), Some(newest)) = (stats.oldest, stats.newest) {
            let _ = writeln!(out, "  Oldest:       {}", oldest.format("%Y-%m-%d %H:%M"));
            let _ = write!(out, "  Newest:       {}", newest.format("%Y-%m-%d %H:%M"));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SuggestionCategory;

    #[test]
    fn test_format_suggestion_plain() {
        colored::control::set_override(false);
        let formatter = OutputFormatter::new(false);
        let suggestion = Suggestion::new("src/a.rs", SuggestionCategory::Bug, Severity::High, "Overflow")
            .with_description("u32 addition can wrap")
            .with_recommendation("use checked_add")
            .with_lines(4, 4);
        let text = formatter.format_suggestion(&suggestion);
        assert!(text.contains("HIGH"));
        assert!(text.contains("src/a.rs:4"));
        assert!(text.contains("use checked_add"));
    }

    #[test]
    fn test_format_suggestions_limit() {
        colored::control::set_override(false);
        let formatter = OutputFormatter::new(false);
        let suggestions: Vec<_> = (0..5)
            .map(|i| Suggestion::new("a.rs", SuggestionCategory::Testing, Severity::Low, format!("s{}", i)))
            .collect();
        let text = formatter.format_suggestions(&suggestions, Some(2));
        assert!(text.contains("3 more"));
    }
}
