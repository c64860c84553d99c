use std::fmt;

use serde_json::Value;

/// Data-quality problems in a stored row's `sentence_patterns`.
#[derive(Debug, Clone, PartialEq)]
pub enum PatternIssue {
    MissingTimestamp { index: usize },
    InvalidTimestamp { index: usize, value: Value },
}

impl fmt::Display for PatternIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatternIssue::MissingTimestamp { index } => {
                write!(f, "pattern {} has no timestamp", index + 1)
            }
            PatternIssue::InvalidTimestamp { index, value } => {
                write!(f, "pattern {} has a non-integer timestamp: {value}", index + 1)
            }
        }
    }
}

/// Check every sentence pattern of a raw task row for a usable timestamp
/// (a non-negative integer number of seconds).
pub fn audit_patterns(row: &Value) -> Vec<PatternIssue> {
    let Some(patterns) = row.get("sentence_patterns").and_then(Value::as_array) else {
        return Vec::new();
    };

    patterns
        .iter()
        .enumerate()
        .filter_map(|(index, pattern)| match pattern.get("timestamp") {
            None | Some(Value::Null) => Some(PatternIssue::MissingTimestamp { index }),
            Some(value) if value.as_u64().is_some() => None,
            Some(value) => Some(PatternIssue::InvalidTimestamp {
                index,
                value: value.clone(),
            }),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn clean_row_has_no_issues() {
        let row = json!({
            "sentence_patterns": [
                {"structure": "a", "timestamp": 0},
                {"structure": "b", "timestamp": 125},
            ]
        });
        assert!(audit_patterns(&row).is_empty());
    }

    #[test]
    fn flags_missing_and_invalid_timestamps() {
        let row = json!({
            "sentence_patterns": [
                {"structure": "a"},
                {"structure": "b", "timestamp": "02:05"},
                {"structure": "c", "timestamp": -3},
                {"structure": "d", "timestamp": 12.5},
                {"structure": "e", "timestamp": null},
                {"structure": "f", "timestamp": 7},
            ]
        });

        assert_eq!(
            audit_patterns(&row),
            vec![
                PatternIssue::MissingTimestamp { index: 0 },
                PatternIssue::InvalidTimestamp { index: 1, value: json!("02:05") },
                PatternIssue::InvalidTimestamp { index: 2, value: json!(-3) },
                PatternIssue::InvalidTimestamp { index: 3, value: json!(12.5) },
                PatternIssue::MissingTimestamp { index: 4 },
            ]
        );
    }

    #[test]
    fn row_without_patterns_is_skipped() {
        assert!(audit_patterns(&json!({"video_id": "abc"})).is_empty());
        assert!(audit_patterns(&json!({"sentence_patterns": null})).is_empty());
    }

    #[test]
    fn issues_are_numbered_from_one() {
        assert_eq!(
            PatternIssue::MissingTimestamp { index: 0 }.to_string(),
            "pattern 1 has no timestamp"
        );
    }
}
