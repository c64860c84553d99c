use std::fmt;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    captions::format_lines,
    tracks::TrackApiSource,
    types::CaptionLine,
    ytdlp::{YtDlp, YtDlpSource},
};

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("yt-dlp failed for {video_id}: {reason}")]
    YtDlp { video_id: String, reason: String },
}

/// Result of one acquisition strategy.
#[derive(Debug)]
pub enum SourceOutcome {
    Found(Vec<CaptionLine>),
    Empty,
    Failed(SourceError),
}

#[async_trait]
pub trait CaptionSource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fetch(&self, video_id: &str) -> SourceOutcome;
}

/// A normalized transcript, rendered as `offset|text` lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcript {
    lines: Vec<CaptionLine>,
}

impl Transcript {
    pub fn new(lines: Vec<CaptionLine>) -> Self {
        Self { lines }
    }

    pub fn lines(&self) -> &[CaptionLine] {
        &self.lines
    }

    pub fn render(&self) -> String {
        format_lines(&self.lines)
    }
}

impl fmt::Display for Transcript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Tries each source in order and returns the first non-empty transcript.
/// A failing source is logged and skipped; nothing is raised to the caller.
pub struct TranscriptAcquirer {
    sources: Vec<Box<dyn CaptionSource>>,
}

impl TranscriptAcquirer {
    pub fn new(sources: Vec<Box<dyn CaptionSource>>) -> Self {
        Self { sources }
    }

    /// Published caption tracks first, yt-dlp subtitle download second.
    pub fn youtube(http: reqwest::Client, ytdlp: YtDlp) -> Self {
        Self::new(vec![
            Box::new(TrackApiSource::new(http)),
            Box::new(YtDlpSource::new(ytdlp)),
        ])
    }

    pub async fn fetch_transcript(&self, video_id: &str) -> Option<Transcript> {
        for source in &self.sources {
            match source.fetch(video_id).await {
                SourceOutcome::Found(lines) => {
                    info!(video_id, source = source.name(), lines = lines.len(), "transcript acquired");
                    return Some(Transcript::new(lines));
                }
                SourceOutcome::Empty => {
                    info!(video_id, source = source.name(), "no captions from source");
                }
                SourceOutcome::Failed(err) => {
                    warn!(video_id, source = source.name(), error = %err, "caption source failed, trying next");
                }
            }
        }

        None
    }
}
