use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Columns the worker needs to drive a task through its lifecycle.
///
/// Polling only selects these so that rows with analysis data written by
/// older versions never break the queue loop.
pub const POLL_COLUMNS: [&str; 4] = ["video_id", "status", "title", "processing_error"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Error,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Error => "error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub video_id: String,
    pub status: TaskStatus,
    /// Left out of the payload when unknown so an upsert never clears it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub category: Vec<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub vocabulary: Vec<VocabEntry>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub sentence_patterns: Vec<PatternEntry>,
    #[serde(default)]
    pub processing_error: Option<String>,
}

impl Task {
    pub fn pending(video_id: impl Into<String>) -> Self {
        Self {
            video_id: video_id.into(),
            status: TaskStatus::Pending,
            title: None,
            category: Vec::new(),
            vocabulary: Vec::new(),
            sentence_patterns: Vec::new(),
            processing_error: None,
        }
    }

    pub fn completed(video_id: impl Into<String>, title: Option<String>, analysis: AnalysisResult) -> Self {
        Self {
            video_id: video_id.into(),
            status: TaskStatus::Completed,
            title,
            category: analysis.category,
            vocabulary: analysis.vocabulary,
            sentence_patterns: analysis.sentence_patterns,
            processing_error: None,
        }
    }
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VocabEntry {
    pub word: String,
    pub phonetic: String,
    pub definition: String,
    pub definition_zh: String,
    pub example: String,
    pub example_zh: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternEntry {
    pub structure: String,
    pub usage: String,
    pub example: String,
    /// Seconds into the video where the pattern is spoken.
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub category: Vec<String>,
    pub vocabulary: Vec<VocabEntry>,
    pub sentence_patterns: Vec<PatternEntry>,
}

/// Partial row update. Unset fields are left untouched by the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TaskUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vocabulary: Option<Vec<VocabEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sentence_patterns: Option<Vec<PatternEntry>>,
    /// `Some(None)` clears the column.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_error: Option<Option<String>>,
}

impl TaskUpdate {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn with_title(mut self, title: Option<String>) -> Self {
        self.title = title;
        self
    }

    pub fn completed(analysis: AnalysisResult) -> Self {
        Self {
            status: Some(TaskStatus::Completed),
            category: Some(analysis.category),
            vocabulary: Some(analysis.vocabulary),
            sentence_patterns: Some(analysis.sentence_patterns),
            processing_error: Some(None),
            ..Self::default()
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: Some(TaskStatus::Error),
            processing_error: Some(Some(message.into())),
            ..Self::default()
        }
    }

    pub fn without_error_column(mut self) -> Self {
        self.processing_error = None;
        self
    }
}

/// One caption line: whole seconds from the start of the video plus its text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptionLine {
    pub offset: u64,
    pub text: String,
}

impl CaptionLine {
    pub fn new(offset: u64, text: impl Into<String>) -> Self {
        Self {
            offset,
            text: text.into(),
        }
    }
}

impl fmt::Display for CaptionLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.offset, self.text)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn task_tolerates_null_and_missing_arrays() {
        let task: Task = serde_json::from_value(json!({
            "video_id": "abc",
            "status": "pending",
            "category": null,
        }))
        .unwrap();

        assert_eq!(task, Task::pending("abc"));
    }

    #[test]
    fn completed_update_clears_error_column() {
        let analysis = AnalysisResult {
            category: vec!["生活 (Daily)".into()],
            vocabulary: vec![],
            sentence_patterns: vec![],
        };

        let value = serde_json::to_value(TaskUpdate::completed(analysis)).unwrap();

        assert_eq!(
            value,
            json!({
                "status": "completed",
                "category": ["生活 (Daily)"],
                "vocabulary": [],
                "sentence_patterns": [],
                "processing_error": null,
            })
        );
    }

    #[test]
    fn unknown_title_is_not_serialized() {
        let value = serde_json::to_value(Task::pending("abc")).unwrap();
        assert!(value.get("title").is_none());

        let mut titled = Task::pending("abc");
        titled.title = Some("Kept".into());
        assert_eq!(serde_json::to_value(titled).unwrap()["title"], "Kept");
    }

    #[test]
    fn status_update_only_serializes_status() {
        let value = serde_json::to_value(TaskUpdate::status(TaskStatus::Processing).with_title(None)).unwrap();
        assert_eq!(value, json!({ "status": "processing" }));
    }

    #[test]
    fn caption_line_renders_pipe_format() {
        assert_eq!(CaptionLine::new(42, "hi there").to_string(), "42|hi there");
    }
}
