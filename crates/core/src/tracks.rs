//! Caption tracks published on the YouTube watch page.
//!
//! The page embeds the player response, whose `captionTracks` list holds one
//! entry per language with a URL to a timed-text XML document.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use crate::{
    captions::clean_line,
    transcript::{CaptionSource, SourceError, SourceOutcome},
    types::CaptionLine,
};

const CAPTION_TRACKS_MARKER: &str = "\"captionTracks\":";

/// Manually created tracks in these languages win, in this order.
const PREFERRED_LANGUAGES: [&str; 3] = ["en", "en-US", "en-GB"];

static TEXT_ELEMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<text\b([^>]*)>(.*?)</text>").expect("text element regex is valid")
});

static START_ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\bstart="([0-9]+(?:\.[0-9]+)?)""#).expect("start attribute regex is valid")
});

pub fn watch_url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={video_id}")
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptionTrack {
    pub base_url: String,
    pub language_code: String,
    /// `"asr"` for automatic speech recognition tracks.
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub name: Option<TrackName>,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackName {
    #[serde(default)]
    pub simple_text: Option<String>,
    #[serde(default)]
    pub runs: Vec<TextRun>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TextRun {
    pub text: String,
}

impl CaptionTrack {
    pub fn is_generated(&self) -> bool {
        self.kind.as_deref() == Some("asr")
    }

    pub fn display_name(&self) -> String {
        let Some(name) = &self.name else {
            return self.language_code.clone();
        };

        match &name.simple_text {
            Some(text) => text.clone(),
            None => name.runs.iter().map(|run| run.text.as_str()).collect(),
        }
    }
}

fn is_english(code: &str) -> bool {
    code == "en" || code.starts_with("en-")
}

/// Pull the caption track list out of a watch page. `None` when the page
/// carries no captions at all (disabled, private, or a consent wall).
pub fn extract_caption_tracks(html: &str) -> Option<Vec<CaptionTrack>> {
    let start = html.find(CAPTION_TRACKS_MARKER)? + CAPTION_TRACKS_MARKER.len();

    serde_json::Deserializer::from_str(&html[start..])
        .into_iter::<Vec<CaptionTrack>>()
        .next()?
        .ok()
}

/// Manual English (generic before regional), then auto-generated English,
/// then whatever comes first.
pub fn select_track(tracks: &[CaptionTrack]) -> Option<&CaptionTrack> {
    let manual = || tracks.iter().filter(|track| !track.is_generated());
    let generated = || tracks.iter().filter(|track| track.is_generated());

    PREFERRED_LANGUAGES
        .iter()
        .find_map(|lang| manual().find(|track| track.language_code == *lang))
        .or_else(|| manual().find(|track| is_english(&track.language_code)))
        .or_else(|| generated().find(|track| track.language_code == "en"))
        .or_else(|| generated().find(|track| is_english(&track.language_code)))
        .or_else(|| tracks.first())
}

/// Parse a timed-text document into caption lines. Entry text is often
/// escaped twice and may contain hard line breaks.
pub fn parse_timed_text(xml: &str) -> Vec<CaptionLine> {
    TEXT_ELEMENT
        .captures_iter(xml)
        .filter_map(|caps| {
            let start: f64 = START_ATTR.captures(&caps[1])?[1].parse().ok()?;
            let unescaped = html_escape::decode_html_entities(&caps[2]).replace('\n', " ");
            let text = clean_line(&unescaped);

            (!text.is_empty()).then(|| CaptionLine::new(start.trunc() as u64, text))
        })
        .collect()
}

/// First strategy: read the published caption tracks directly.
pub struct TrackApiSource {
    http: reqwest::Client,
}

impl TrackApiSource {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    pub async fn list_tracks(&self, video_id: &str) -> Result<Vec<CaptionTrack>, SourceError> {
        let html = self
            .http
            .get(watch_url(video_id))
            .header("Accept-Language", "en-US,en;q=0.9")
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        Ok(extract_caption_tracks(&html).unwrap_or_default())
    }

    pub async fn fetch_lines(&self, video_id: &str) -> Result<Vec<CaptionLine>, SourceError> {
        let tracks = self.list_tracks(video_id).await?;
        let Some(track) = select_track(&tracks) else {
            return Ok(Vec::new());
        };

        debug!(
            video_id,
            language = %track.language_code,
            generated = track.is_generated(),
            "selected caption track"
        );

        let xml = self
            .http
            .get(&track.base_url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        Ok(parse_timed_text(&xml))
    }
}

#[async_trait]
impl CaptionSource for TrackApiSource {
    fn name(&self) -> &'static str {
        "track-api"
    }

    async fn fetch(&self, video_id: &str) -> SourceOutcome {
        match self.fetch_lines(video_id).await {
            Ok(lines) if lines.is_empty() => SourceOutcome::Empty,
            Ok(lines) => SourceOutcome::Found(lines),
            Err(err) => SourceOutcome::Failed(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn track(code: &str, generated: bool) -> CaptionTrack {
        CaptionTrack {
            base_url: format!("https://example.test/{code}"),
            language_code: code.to_string(),
            kind: generated.then(|| "asr".to_string()),
            name: None,
        }
    }

    #[test]
    fn extracts_tracks_from_player_response() {
        let html = r#"<script>var ytInitialPlayerResponse = {"captions":{"playerCaptionsTracklistRenderer":{"captionTracks":[{"baseUrl":"https://www.youtube.com/api/timedtext?v=abc&lang=en","name":{"simpleText":"English"},"languageCode":"en","isTranslatable":true},{"baseUrl":"https://www.youtube.com/api/timedtext?v=abc&kind=asr&lang=en","name":{"runs":[{"text":"English (auto-generated)"}]},"languageCode":"en","kind":"asr"}],"audioTracks":[]}}};</script>"#;

        let tracks = extract_caption_tracks(html).unwrap();

        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].base_url, "https://www.youtube.com/api/timedtext?v=abc&lang=en");
        assert_eq!(tracks[0].display_name(), "English");
        assert!(tracks[1].is_generated());
        assert_eq!(tracks[1].display_name(), "English (auto-generated)");
    }

    #[test]
    fn page_without_captions_has_no_tracks() {
        assert_eq!(extract_caption_tracks("<html><body>nothing</body></html>"), None);
    }

    #[test]
    fn prefers_generic_manual_english() {
        let tracks = [track("en-GB", false), track("en", true), track("en", false)];
        assert_eq!(select_track(&tracks), Some(&tracks[2]));
    }

    #[test]
    fn regional_manual_beats_generated() {
        let tracks = [track("en", true), track("en-GB", false), track("en-US", false)];
        assert_eq!(select_track(&tracks), Some(&tracks[2]));
    }

    #[test]
    fn falls_back_to_generated_english_then_anything() {
        let tracks = [track("fr", false), track("en", true)];
        assert_eq!(select_track(&tracks), Some(&tracks[1]));

        let tracks = [track("ja", true), track("fr", false)];
        assert_eq!(select_track(&tracks), Some(&tracks[0]));

        assert_eq!(select_track(&[]), None);
    }

    #[test]
    fn parses_timed_text_entries() {
        let xml = r#"<?xml version="1.0" encoding="utf-8" ?><transcript><text start="0.35" dur="2.1">Hey guys,
welcome back</text><text start="2.9" dur="1.5">it&amp;#39;s &lt;b&gt;great&lt;/b&gt;</text><text start="4.0" dur="1.0">   </text><text start="61.99" dur="1.0">one more</text></transcript>"#;

        let lines = parse_timed_text(xml);

        assert_eq!(
            lines,
            vec![
                CaptionLine::new(0, "Hey guys, welcome back"),
                CaptionLine::new(2, "it's great"),
                CaptionLine::new(61, "one more"),
            ]
        );
    }
}
