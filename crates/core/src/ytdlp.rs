use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use async_trait::async_trait;
use tokio::{fs, process::Command};
use tracing::{debug, warn};

use crate::{
    captions::parse_with_offsets,
    tracks::watch_url,
    transcript::{CaptionSource, SourceError, SourceOutcome},
    worker::TitleLookup,
};

const SOCKET_TIMEOUT: Duration = Duration::from_secs(30);

pub fn get_root_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("tubelex")
}

/// Where downloaded subtitle files live until they have been read.
pub fn get_subtitle_dir() -> PathBuf {
    get_root_cache_dir().join("subtitles")
}

/// Thin wrapper around the `yt-dlp` binary.
#[derive(Debug, Clone)]
pub struct YtDlp {
    program: PathBuf,
    scratch_dir: PathBuf,
}

impl Default for YtDlp {
    fn default() -> Self {
        Self::new(get_subtitle_dir())
    }
}

impl YtDlp {
    pub fn new(scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: PathBuf::from("yt-dlp"),
            scratch_dir: scratch_dir.into(),
        }
    }

    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Video title without downloading anything.
    pub async fn lookup_title(&self, video_id: &str) -> Result<Option<String>, SourceError> {
        let output = Command::new(&self.program)
            .arg(watch_url(video_id))
            .arg("--skip-download")
            .arg("--no-warnings")
            .arg("--quiet")
            .arg("--no-check-certificates")
            .arg("--socket-timeout")
            .arg(SOCKET_TIMEOUT.as_secs().to_string())
            .arg("--print")
            .arg("title")
            .output()
            .await?;

        if !output.status.success() {
            return Err(SourceError::YtDlp {
                video_id: video_id.to_string(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let title = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok((!title.is_empty()).then_some(title))
    }

    /// Download English subtitles (manual or automatic) as WebVTT and return
    /// the file contents. `Ok(None)` when yt-dlp produced no subtitle file.
    pub async fn download_subtitles(&self, video_id: &str) -> Result<Option<String>, SourceError> {
        let scratch = SubtitleScratch::new(&self.scratch_dir, video_id)?;

        let output = Command::new(&self.program)
            .arg(watch_url(video_id))
            .arg("--skip-download")
            .arg("--write-subs")
            .arg("--write-auto-subs")
            .arg("--sub-langs")
            .arg("en.*,en")
            .arg("--sub-format")
            .arg("vtt")
            .arg("--no-warnings")
            .arg("--quiet")
            .arg("--socket-timeout")
            .arg(SOCKET_TIMEOUT.as_secs().to_string())
            .arg("-o")
            .arg(scratch.output_template())
            .output()
            .await?;

        let Some(path) = scratch.find_subtitle() else {
            if !output.status.success() {
                return Err(SourceError::YtDlp {
                    video_id: video_id.to_string(),
                    reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                });
            }
            return Ok(None);
        };

        debug!(video_id, path = %path.display(), "reading downloaded subtitles");
        let payload = fs::read_to_string(&path).await?;
        Ok(Some(payload))
    }
}

#[async_trait]
impl TitleLookup for YtDlp {
    async fn lookup_title(&self, video_id: &str) -> Result<Option<String>, SourceError> {
        YtDlp::lookup_title(self, video_id).await
    }
}

/// Subtitle files for one video inside the scratch directory.
///
/// Leftovers from earlier runs are removed when the scratch is created, and
/// everything it matches is removed again when it is dropped.
pub struct SubtitleScratch {
    dir: PathBuf,
    prefix: String,
}

impl SubtitleScratch {
    pub fn new(dir: &Path, video_id: &str) -> std::io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let scratch = Self {
            dir: dir.to_path_buf(),
            prefix: format!("temp_{video_id}"),
        };
        scratch.clear();
        Ok(scratch)
    }

    /// yt-dlp appends `.<lang>.vtt` to this.
    pub fn output_template(&self) -> PathBuf {
        self.dir.join(&self.prefix)
    }

    /// Downloaded `.vtt` files, plain `en` first.
    pub fn find_subtitle(&self) -> Option<PathBuf> {
        let mut found: Vec<PathBuf> = self
            .matching_files()
            .into_iter()
            .filter(|path| path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("vtt")))
            .collect();

        let plain = format!("{}.en.vtt", self.prefix);
        found.sort_by_key(|path| {
            let is_plain = path.file_name().is_some_and(|name| name.to_string_lossy() == plain);
            (!is_plain, path.clone())
        });
        found.into_iter().next()
    }

    fn matching_files(&self) -> Vec<PathBuf> {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return Vec::new();
        };

        let own_prefix = format!("{}.", self.prefix);
        entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .is_some_and(|name| name.to_string_lossy().starts_with(&own_prefix))
            })
            .collect()
    }

    fn clear(&self) {
        for path in self.matching_files() {
            if let Err(err) = std::fs::remove_file(&path) {
                warn!(path = %path.display(), error = %err, "could not remove subtitle file");
            }
        }
    }
}

impl Drop for SubtitleScratch {
    fn drop(&mut self) {
        self.clear();
    }
}

/// Second strategy: let yt-dlp fetch the subtitle file and parse it.
pub struct YtDlpSource {
    ytdlp: YtDlp,
}

impl YtDlpSource {
    pub fn new(ytdlp: YtDlp) -> Self {
        Self { ytdlp }
    }
}

#[async_trait]
impl CaptionSource for YtDlpSource {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    async fn fetch(&self, video_id: &str) -> SourceOutcome {
        match self.ytdlp.download_subtitles(video_id).await {
            Ok(Some(payload)) => {
                let lines = parse_with_offsets(&payload);
                if lines.is_empty() {
                    SourceOutcome::Empty
                } else {
                    SourceOutcome::Found(lines)
                }
            }
            Ok(None) => SourceOutcome::Empty,
            Err(err) => SourceOutcome::Failed(err),
        }
    }
}
