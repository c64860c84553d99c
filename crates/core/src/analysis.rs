use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;

use crate::{
    config::AnalyzerConfig,
    credentials::{CredentialError, CredentialPool},
    retry::{RetryAction, Retryable},
    types::AnalysisResult,
};

/// Only the head of a transcript is sent to the model.
pub const MAX_TRANSCRIPT_CHARS: usize = 6000;

pub const CATEGORY_TAGS: [&str; 6] = [
    "社交 (Social)",
    "職場 (Work)",
    "旅遊 (Travel)",
    "生活 (Daily)",
    "文化 (Culture)",
    "學術 (Academic)",
];

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Missing credential: {0}")]
    MissingCredential(#[from] CredentialError),

    #[error("Quota exhausted (HTTP {status}): {message}")]
    QuotaExhausted { status: u16, message: String },

    #[error("Service unavailable (HTTP {status}): {message}")]
    Unavailable { status: u16, message: String },

    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid API response: {0}")]
    EmptyResponse(serde_json::Value),

    #[error("Failed to parse analysis JSON: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl Retryable for AnalysisError {
    fn retry_action(&self) -> RetryAction {
        match self {
            AnalysisError::QuotaExhausted { .. } => RetryAction::RotateAndRetry,
            AnalysisError::Unavailable { .. } => RetryAction::DelayAndRetry,
            _ => RetryAction::Abort,
        }
    }
}

/// A backend that turns a transcript into vocabulary, categories and
/// sentence patterns. Implementations make exactly one request per call.
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(&mut self, transcript: &str) -> Result<AnalysisResult, AnalysisError>;

    /// Switch to the next credential after a quota error.
    fn rotate_credential(&mut self);
}

/// Gemini `generateContent` client with key rotation.
pub struct GeminiAnalyzer {
    http: reqwest::Client,
    config: AnalyzerConfig,
    pool: CredentialPool,
}

impl GeminiAnalyzer {
    pub fn new(http: reqwest::Client, config: AnalyzerConfig) -> Self {
        let pool = CredentialPool::from_list(&config.api_keys);
        Self { http, config, pool }
    }

    pub fn pool(&self) -> &CredentialPool {
        &self.pool
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.api_base.trim_end_matches('/'),
            self.config.model
        )
    }
}

#[async_trait]
impl Analyzer for GeminiAnalyzer {
    async fn analyze(&mut self, transcript: &str) -> Result<AnalysisResult, AnalysisError> {
        let api_key = self.pool.active()?;
        let prompt = build_prompt(transcript);

        let response = self
            .http
            .post(self.endpoint())
            .header("Content-Type", "application/json")
            .header("x-goog-api-key", api_key)
            .json(&serde_json::json!({
                "contents": [
                    {
                        "parts": [{ "text": prompt }],
                    },
                ],
                "generationConfig": {
                    "temperature": 0.3,
                    "responseMimeType": "application/json",
                },
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_failure(status, &body));
        }

        let response = response.json::<serde_json::Value>().await?;

        let content = response["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .ok_or_else(|| AnalysisError::EmptyResponse(response.clone()))?;

        parse_analysis(content)
    }

    fn rotate_credential(&mut self) {
        self.pool.rotate();
    }
}

/// Map a non-success response onto the error kinds the retry loop cares about.
pub fn classify_failure(status: StatusCode, body: &str) -> AnalysisError {
    let parsed: Option<serde_json::Value> = serde_json::from_str(body).ok();
    let api_status = parsed
        .as_ref()
        .and_then(|v| v["error"]["status"].as_str())
        .unwrap_or_default();
    let message = parsed
        .as_ref()
        .and_then(|v| v["error"]["message"].as_str())
        .map(str::to_string)
        .unwrap_or_else(|| body.trim().to_string());
    let code = status.as_u16();

    if status == StatusCode::TOO_MANY_REQUESTS || api_status == "RESOURCE_EXHAUSTED" {
        AnalysisError::QuotaExhausted {
            status: code,
            message,
        }
    } else if status == StatusCode::SERVICE_UNAVAILABLE || api_status == "UNAVAILABLE" {
        AnalysisError::Unavailable {
            status: code,
            message,
        }
    } else {
        AnalysisError::Api {
            status: code,
            message,
        }
    }
}

/// Parse the model's reply, tolerating a surrounding markdown code fence.
pub fn parse_analysis(raw: &str) -> Result<AnalysisResult, AnalysisError> {
    Ok(serde_json::from_str(strip_code_fence(raw))?)
}

/// The text between the first and last fence. A bare JSON object is
/// returned untouched so that fences inside its strings survive.
pub fn strip_code_fence(raw: &str) -> &str {
    const FENCE: &str = "```";

    let trimmed = raw.trim();
    if trimmed.starts_with('{') {
        return trimmed;
    }
    let Some(open) = trimmed.find(FENCE) else {
        return trimmed;
    };

    let rest = &trimmed[open + FENCE.len()..];
    let body = match rest.rfind(FENCE) {
        Some(close) => &rest[..close],
        None => rest,
    };
    // info string, e.g. "json"
    body.trim_start_matches(|c: char| c.is_ascii_alphanumeric())
        .trim()
}

/// First `max_chars` characters of `text`, never splitting a code point.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

pub fn build_prompt(transcript: &str) -> String {
    let tags = CATEGORY_TAGS
        .iter()
        .map(|tag| format!("\"{tag}\""))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        r#"You are an experienced English teacher. The transcript below comes from a video, one line per caption in the format "seconds|English text".

TASKS:
1. Pick the 1-2 tags from this list that best describe the video: [{tags}]
2. Select exactly 8 core vocabulary words (moderate difficulty, practical first).
3. Select exactly 6 common sentence patterns and give the exact second in the video where each pattern is spoken.
4. Every explanation and example must come with a Traditional Chinese translation.

You MUST output ONLY valid JSON matching this exact structure (keep the English field names):
{{
  "category": ["tag1", "tag2"],
  "vocabulary": [
    {{
      "word": "English word",
      "phonetic": "KK phonetic symbols",
      "definition": "English definition",
      "definition_zh": "Traditional Chinese definition",
      "example": "English example sentence",
      "example_zh": "Traditional Chinese translation of the example"
    }}
  ],
  "sentence_patterns": [
    {{
      "structure": "Pattern structure",
      "usage": "How the pattern is used",
      "example": "Example sentence",
      "timestamp": 120
    }}
  ]
}}

"timestamp" is an integer number of seconds taken from the transcript line where the pattern occurs.

Transcript (first {max} characters):
{body}"#,
        max = MAX_TRANSCRIPT_CHARS,
        body = truncate_chars(transcript, MAX_TRANSCRIPT_CHARS),
    )
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::types::PatternEntry;

    const REPLY: &str = r#"{
        "category": ["生活 (Daily)"],
        "vocabulary": [
            {"word": "grab", "phonetic": "/ɡræb/", "definition": "to take quickly", "definition_zh": "抓取", "example": "Let's grab a coffee.", "example_zh": "我們去喝杯咖啡吧。"}
        ],
        "sentence_patterns": [
            {"structure": "I'm about to + V", "usage": "something will happen soon", "example": "I'm about to leave.", "timestamp": 42}
        ]
    }"#;

    #[test]
    fn parses_plain_reply() {
        let result = parse_analysis(REPLY).unwrap();
        assert_eq!(result.category, vec!["生活 (Daily)".to_string()]);
        assert_eq!(result.vocabulary[0].word, "grab");
        assert_eq!(
            result.sentence_patterns,
            vec![PatternEntry {
                structure: "I'm about to + V".into(),
                usage: "something will happen soon".into(),
                example: "I'm about to leave.".into(),
                timestamp: 42,
            }]
        );
    }

    #[test]
    fn parses_fenced_reply() {
        let fenced = format!("```json\n{REPLY}\n```\n");
        assert_eq!(parse_analysis(&fenced).unwrap(), parse_analysis(REPLY).unwrap());

        let bare_fence = format!("```{REPLY}```");
        assert_eq!(parse_analysis(&bare_fence).unwrap(), parse_analysis(REPLY).unwrap());
    }

    #[test]
    fn parses_fenced_reply_with_chatter_around_it() {
        let chatty = format!("Here is the analysis:\n```json\n{REPLY}\n```\nHope this helps!");
        assert_eq!(parse_analysis(&chatty).unwrap(), parse_analysis(REPLY).unwrap());

        let unclosed = format!("```json\n{REPLY}");
        assert_eq!(parse_analysis(&unclosed).unwrap(), parse_analysis(REPLY).unwrap());
    }

    #[test]
    fn fence_inside_a_bare_object_is_kept() {
        let raw = r#"{"note": "use ``` for code"}"#;
        assert_eq!(strip_code_fence(raw), raw);
    }

    #[test]
    fn string_timestamp_is_a_hard_error() {
        let reply = REPLY.replace("\"timestamp\": 42", "\"timestamp\": \"00:42\"");
        let err = parse_analysis(&reply).unwrap_err();
        assert!(matches!(err, AnalysisError::Malformed(_)));
        assert_eq!(err.retry_action(), RetryAction::Abort);
    }

    #[test]
    fn garbage_reply_is_malformed() {
        assert!(matches!(
            parse_analysis("Sorry, I can't help with that."),
            Err(AnalysisError::Malformed(_))
        ));
    }

    #[test]
    fn truncation_counts_characters() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");

        let long = "字".repeat(MAX_TRANSCRIPT_CHARS + 50);
        let prompt = build_prompt(&long);
        assert_eq!(prompt.matches('字').count(), MAX_TRANSCRIPT_CHARS);
    }

    #[test]
    fn prompt_lists_closed_tag_vocabulary() {
        let prompt = build_prompt("1|hello");
        for tag in CATEGORY_TAGS {
            assert!(prompt.contains(tag));
        }
        assert!(prompt.ends_with("1|hello"));
    }

    #[test]
    fn classifies_quota_by_status_and_body() {
        let by_status = classify_failure(StatusCode::TOO_MANY_REQUESTS, "slow down");
        assert!(matches!(by_status, AnalysisError::QuotaExhausted { status: 429, .. }));

        let body = r#"{"error": {"code": 400, "message": "quota", "status": "RESOURCE_EXHAUSTED"}}"#;
        let by_body = classify_failure(StatusCode::BAD_REQUEST, body);
        assert_eq!(by_body.retry_action(), RetryAction::RotateAndRetry);
        assert_eq!(by_body.to_string(), "Quota exhausted (HTTP 400): quota");
    }

    #[test]
    fn classifies_unavailable_and_other() {
        let unavailable = classify_failure(StatusCode::SERVICE_UNAVAILABLE, "");
        assert_eq!(unavailable.retry_action(), RetryAction::DelayAndRetry);

        let denied = classify_failure(
            StatusCode::FORBIDDEN,
            r#"{"error": {"message": "API key not valid", "status": "PERMISSION_DENIED"}}"#,
        );
        assert!(matches!(denied, AnalysisError::Api { status: 403, .. }));
        assert_eq!(denied.retry_action(), RetryAction::Abort);
    }

    #[test]
    fn missing_credential_aborts() {
        let err = AnalysisError::from(CredentialError::EmptyPool);
        assert_eq!(err.retry_action(), RetryAction::Abort);
    }

    #[tokio::test]
    async fn empty_pool_fails_without_a_request() {
        let config = AnalyzerConfig {
            api_keys: String::new(),
            model: "gemini-2.0-flash".into(),
            api_base: "http://127.0.0.1:9".into(),
        };
        let mut analyzer = GeminiAnalyzer::new(reqwest::Client::new(), config);

        let err = analyzer.analyze("1|hello").await.unwrap_err();
        assert!(matches!(err, AnalysisError::MissingCredential(CredentialError::EmptyPool)));

        analyzer.rotate_credential();
        assert!(analyzer.pool().is_empty());
    }
}
