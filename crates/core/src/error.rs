use thiserror::Error;

use crate::{analysis::AnalysisError, store::StoreError};

#[derive(Error, Debug)]
pub enum TubelexError {
    #[error("No captions found for {video_id} (track API and yt-dlp both came back empty)")]
    NoCaptions { video_id: String },

    #[error("Analysis failed for {video_id} after {attempts} attempt(s): {source}")]
    AnalysisFailed {
        video_id: String,
        attempts: u32,
        #[source]
        source: AnalysisError,
    },

    #[error("Task store error: {0}")]
    StoreError(#[from] StoreError),

    #[error("Missing configuration: {env_var} environment variable is not set")]
    MissingEnv { env_var: &'static str },
}

pub type Result<T> = std::result::Result<T, TubelexError>;
