//! Row layout of the mirror worksheet: one row per question/answer pair.

use std::collections::BTreeMap;

/// Header written when the worksheet tab is created
pub const HEADER_ROW: [&str; 4] = ["username", "question", "answer", "created_at"];

/// Display labels for raw answer values (`yes` -> `Да`)
#[derive(Debug, Clone, Default)]
pub struct AnswerLabels {
    labels: BTreeMap<String, String>,
}

impl AnswerLabels {
    #[must_use]
    pub fn new(labels: BTreeMap<String, String>) -> Self {
        Self { labels }
    }

    /// Mapped label, or the raw value when no label is configured
    #[must_use]
    pub fn display<'a>(&'a self, raw: &'a str) -> &'a str {
        self.labels.get(raw).map_or(raw, String::as_str)
    }
}

#[must_use]
pub fn header_row() -> Vec<String> {
    HEADER_ROW.iter().map(ToString::to_string).collect()
}

/// Diagnostic row appended by the connectivity probe
#[must_use]
pub fn probe_row(timestamp: &str) -> Vec<String> {
    vec![
        "debug".to_string(),
        "ping".to_string(),
        "ok".to_string(),
        timestamp.to_string(),
    ]
}

/// One worksheet row for an answer
#[must_use]
pub fn answer_row(
    username: &str,
    question: &str,
    answer: &str,
    created_at: &str,
    labels: &AnswerLabels,
) -> Vec<String> {
    vec![
        username.to_string(),
        question.to_string(),
        labels.display(answer).to_string(),
        created_at.to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_answer_row_columns() {
        let row = answer_row("alice", "q1", "yes", "2025-01-01 10:00:00", &AnswerLabels::default());
        assert_eq!(row, vec!["alice", "q1", "yes", "2025-01-01 10:00:00"]);
        assert_eq!(row.len(), HEADER_ROW.len());
    }

    #[test]
    fn test_probe_row_matches_header_width() {
        let row = probe_row("2025-01-01 00:00:00");
        assert_eq!(row[0], "debug");
        assert_eq!(row.len(), HEADER_ROW.len());
    }

    #[test]
    fn test_labels_translate_known_values_only() {
        let labels = AnswerLabels::new(BTreeMap::from([
            ("yes".to_string(), "Да".to_string()),
            ("no".to_string(), "Нет".to_string()),
        ]));
        assert_eq!(labels.display("yes"), "Да");
        assert_eq!(labels.display("free text"), "free text");

        let row = answer_row("bob", "q2", "no", "ts", &labels);
        assert_eq!(row[2], "Нет");
    }
}
