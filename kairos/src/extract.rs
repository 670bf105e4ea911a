//! Pulls a short task description out of free-form narration.

use regex::{Regex, RegexBuilder};
use std::sync::OnceLock;

const INDICATORS: &[&str] = &[
    "work on",
    "working on",
    "focus on",
    "focusing on",
    "task is",
    "project is",
];

const WHOLE_INPUT_LIMIT: usize = 100;

fn indicator_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        INDICATORS
            .iter()
            .filter_map(|indicator| {
                RegexBuilder::new(&regex::escape(indicator))
                    .case_insensitive(true)
                    .build()
                    .ok()
            })
            .collect()
    })
}

/// Text after the first indicator phrase of the first sentence containing
/// one; else the first sentence; else the whole input when it is short.
pub fn extract_task_from_conversation(text: &str) -> String {
    let sentences: Vec<&str> = text
        .split(|c: char| matches!(c, '.' | '!' | '?'))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();

    for sentence in &sentences {
        for pattern in indicator_patterns() {
            if let Some(found) = pattern.find(sentence) {
                let task = sentence[found.end()..].trim();
                if !task.is_empty() {
                    return task.to_string();
                }
            }
        }
    }

    if let Some(first) = sentences.first() {
        return first.to_string();
    }

    let trimmed = text.trim();
    if trimmed.chars().count() < WHOLE_INPUT_LIMIT {
        trimmed.to_string()
    } else {
        String::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn takes_text_after_indicator() {
        assert_eq!(
            extract_task_from_conversation("I'm working on the quarterly report. It's due Friday."),
            "the quarterly report"
        );
    }

    #[test]
    fn indicator_match_ignores_case() {
        assert_eq!(
            extract_task_from_conversation("Today. My TASK IS Refactoring the parser!"),
            "Refactoring the parser"
        );
    }

    #[test]
    fn first_sentence_when_no_indicator() {
        assert_eq!(
            extract_task_from_conversation("Writing tests for the billing service. Then lunch."),
            "Writing tests for the billing service"
        );
    }

    #[test]
    fn indicator_at_sentence_end_is_skipped() {
        assert_eq!(
            extract_task_from_conversation("What should I focus on? Maybe the focus on docs."),
            "docs"
        );
    }

    #[test]
    fn blank_input_yields_empty() {
        assert_eq!(extract_task_from_conversation(""), "");
        assert_eq!(extract_task_from_conversation("   \n"), "");
    }
}
