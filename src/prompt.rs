//! Prompt construction and response validation.
//!
//! Changing anything that affects what the model is asked must bump
//! [`PROMPT_VERSION`], which is part of every cache key.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::backend::Message;
use crate::context::ProjectContext;
use crate::types::{AnalysisTask, LineRange, Severity, Suggestion, SuggestionCategory};

pub const PROMPT_VERSION: &str = "2024.11-r3";

/// What the model was shown: the whole file, or only its staged diff.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptMode {
    #[default]
    Full,
    Diff,
}

const RESPONSE_SCHEMA: &str = r#"Respond with JSON only, no prose, in exactly this shape:
{"suggestions": [{
  "category": "bug" | "security" | "performance" | "maintainability" | "readability" | "best-practice" | "testing" | "documentation",
  "severity": "low" | "medium" | "high",
  "title": "short summary",
  "description": "what is wrong and why it matters",
  "recommendation": "what to change",
  "code_before": "optional snippet",
  "code_after": "optional snippet",
  "line_start": 1,
  "line_end": 1
}]}
Return {"suggestions": []} when nothing is worth changing."#;

pub fn build_messages(
    task: &AnalysisTask,
    context: &ProjectContext,
    mode: PromptMode,
    content: &str,
    diff_text: Option<&str>,
) -> Vec<Message> {
    let system = format!(
        "You are a senior engineer reviewing code in a {} project.\n\
         Report concrete, actionable improvements only. Skip style nits a formatter would fix.\n\n\
         {}",
        context.describe(),
        RESPONSE_SCHEMA
    );

    let user = match (mode, diff_text) {
        (PromptMode::Diff, Some(diff)) => format!(
            "Review only the changes in this diff of `{}`. Line numbers refer to the new file.\n\n```diff\n{}\n```",
            task.relative_path, diff
        ),
        _ => format!(
            "Review the file `{}`.\n\n```{}\n{}\n```",
            task.relative_path, task.extension, content
        ),
    };

    vec![Message::system(system), Message::user(user)]
}

/// Validated model output for one file.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParsedSuggestions {
    pub suggestions: Vec<Suggestion>,
    /// The payload failed validation and was discarded whole.
    pub malformed: bool,
}

impl ParsedSuggestions {
    fn malformed() -> Self {
        Self {
            suggestions: Vec::new(),
            malformed: true,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSuggestion {
    category: SuggestionCategory,
    severity: Severity,
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    recommendation: String,
    #[serde(default)]
    code_before: Option<String>,
    #[serde(default)]
    code_after: Option<String>,
    #[serde(default)]
    line_start: Option<u32>,
    #[serde(default)]
    line_end: Option<u32>,
}

/// Parse and validate a model reply. Any schema violation discards the
/// whole payload.
pub fn parse_suggestions(text: &str, file: &str) -> ParsedSuggestions {
    let body = strip_code_fence(text.trim());

    let value: Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(e) => {
            warn!("{}: response is not valid JSON: {}", file, e);
            return ParsedSuggestions::malformed();
        }
    };

    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut object) => match object.remove("suggestions") {
            Some(Value::Array(items)) => items,
            _ => {
                warn!("{}: response object has no suggestions array", file);
                return ParsedSuggestions::malformed();
            }
        },
        _ => {
            warn!("{}: response is neither an array nor an object", file);
            return ParsedSuggestions::malformed();
        }
    };

    let mut suggestions = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        let raw: RawSuggestion = match serde_json::from_value(item) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("{}: suggestion {} violates schema: {}", file, index, e);
                return ParsedSuggestions::malformed();
            }
        };
        if raw.title.trim().is_empty() {
            warn!("{}: suggestion {} has an empty title", file, index);
            return ParsedSuggestions::malformed();
        }

        let line_range = match (raw.line_start, raw.line_end) {
            (Some(start), Some(end)) if start <= end => Some(LineRange { start, end }),
            (Some(start), None) => Some(LineRange { start, end: start }),
            (Some(_), Some(_)) => {
                warn!("{}: suggestion {} has an inverted line range", file, index);
                return ParsedSuggestions::malformed();
            }
            _ => None,
        };

        suggestions.push(Suggestion {
            file: file.to_string(),
            category: raw.category,
            severity: raw.severity,
            title: raw.title.trim().to_string(),
            description: raw.description,
            recommendation: raw.recommendation,
            code_before: raw.code_before.filter(|s| !s.is_empty()),
            code_after: raw.code_after.filter(|s| !s.is_empty()),
            line_range,
        });
    }

    debug!("{}: {} suggestion(s) parsed", file, suggestions.len());
    ParsedSuggestions {
        suggestions,
        malformed: false,
    }
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the info string (e.g. "json") on the opening fence line.
    let rest = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}
