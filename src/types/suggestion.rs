use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SuggestionCategory {
    Bug,
    Security,
    Performance,
    Maintainability,
    Readability,
    BestPractice,
    Testing,
    Documentation,
}

impl SuggestionCategory {
    pub fn all() -> &'static [SuggestionCategory] {
        &[
            SuggestionCategory::Bug,
            SuggestionCategory::Security,
            SuggestionCategory::Performance,
            SuggestionCategory::Maintainability,
            SuggestionCategory::Readability,
            SuggestionCategory::BestPractice,
            SuggestionCategory::Testing,
            SuggestionCategory::Documentation,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SuggestionCategory::Bug => "bug",
            SuggestionCategory::Security => "security",
            SuggestionCategory::Performance => "performance",
            SuggestionCategory::Maintainability => "maintainability",
            SuggestionCategory::Readability => "readability",
            SuggestionCategory::BestPractice => "best-practice",
            SuggestionCategory::Testing => "testing",
            SuggestionCategory::Documentation => "documentation",
        }
    }
}

impl fmt::Display for SuggestionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineRange {
    pub start: u32,
    pub end: u32,
}

/// An improvement suggestion for a single file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub file: String,
    pub category: SuggestionCategory,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub recommendation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_before: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_after: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_range: Option<LineRange>,
}

impl Suggestion {
    pub fn new(
        file: impl Into<String>,
        category: SuggestionCategory,
        severity: Severity,
        title: impl Into<String>,
    ) -> Self {
        Self {
            file: file.into(),
            category,
            severity,
            title: title.into(),
            description: String::new(),
            recommendation: String::new(),
            code_before: None,
            code_after: None,
            line_range: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_recommendation(mut self, recommendation: impl Into<String>) -> Self {
        self.recommendation = recommendation.into();
        self
    }

    pub fn with_lines(mut self, start: u32, end: u32) -> Self {
        self.line_range = Some(LineRange { start, end });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_serde_names() {
        let json = serde_json::to_string(&SuggestionCategory::BestPractice).unwrap();
        assert_eq!(json, "\"best-practice\"");

        let parsed: SuggestionCategory = serde_json::from_str("\"security\"").unwrap();
        assert_eq!(parsed, SuggestionCategory::Security);

        for category in SuggestionCategory::all() {
            let encoded = serde_json::to_string(category).unwrap();
            assert_eq!(encoded.trim_matches('"'), category.as_str());
        }
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
        assert_eq!(Severity::High.to_string(), "high");
    }

    #[test]
    fn test_suggestion_builder() {
        let suggestion = Suggestion::new("src/lib.rs", SuggestionCategory::Bug, Severity::High, "Off by one")
            .with_description("Loop skips the last element")
            .with_recommendation("Use an inclusive range")
            .with_lines(10, 12);

        assert_eq!(suggestion.file, "src/lib.rs");
        assert_eq!(suggestion.line_range, Some(LineRange { start: 10, end: 12 }));
        assert!(suggestion.code_before.is_none());

        let json = serde_json::to_value(&suggestion).unwrap();
        assert!(json.get("code_before").is_none());
        assert_eq!(json["severity"], "high");
    }
}
