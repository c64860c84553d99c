pub mod analysis;
pub mod audit;
pub mod captions;
pub mod config;
pub mod credentials;
pub mod error;
pub mod retry;
pub mod store;
pub mod tracks;
pub mod transcript;
pub mod types;
pub mod worker;
pub mod ytdlp;

pub use analysis::{AnalysisError, Analyzer, GeminiAnalyzer};
pub use audit::{PatternIssue, audit_patterns};
pub use captions::{clean_text, parse_with_offsets};
pub use config::{AnalyzerConfig, StoreConfig};
pub use credentials::{CredentialError, CredentialPool};
pub use error::{Result, TubelexError};
pub use retry::RetryPolicy;
pub use store::{MemoryTaskStore, RestTaskStore, StoreError, TaskStore};
pub use tracks::{CaptionTrack, TrackApiSource};
pub use transcript::{CaptionSource, SourceError, SourceOutcome, Transcript, TranscriptAcquirer};
pub use types::{AnalysisResult, CaptionLine, PatternEntry, Task, TaskStatus, TaskUpdate, VocabEntry};
pub use worker::{InFlight, QueueWorker, RunMode, RunSummary, StopReason, TitleLookup, WorkerConfig};
pub use ytdlp::YtDlp;
