//! Queue worker: drains `pending` rows one at a time.
//!
//! Each task moves `pending -> processing -> completed | error`. Tasks are
//! handled strictly sequentially; the only suspension points are the store,
//! the caption sources, the analyzer and the explicit sleeps.
//!
//! Running two workers against the same task table or the same API keys is
//! not safe. Nothing claims a row atomically, so both workers can pick the
//! same pending task, and each rotates its own copy of the key pool. Use an
//! external lock if more than one worker has to run.

use std::{
    collections::HashSet,
    fmt,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::{
    analysis::Analyzer,
    error::{Result, TubelexError},
    retry::{RetryPolicy, RetryStep},
    store::TaskStore,
    transcript::{SourceError, TranscriptAcquirer},
    types::{AnalysisResult, Task, TaskStatus, TaskUpdate},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Poll forever, sleeping while the queue is empty.
    Continuous,
    /// Stop once the queue is empty or the time budget is spent.
    Batch,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub mode: RunMode,
    /// Checked at the top of each iteration in batch mode.
    pub max_runtime: Option<Duration>,
    pub idle_poll: Duration,
    pub task_pacing: Duration,
    pub retry: RetryPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            mode: RunMode::Continuous,
            max_runtime: None,
            idle_poll: Duration::from_secs(10),
            task_pacing: Duration::from_secs(2),
            retry: RetryPolicy::default(),
        }
    }
}

impl WorkerConfig {
    pub fn batch(max_runtime: Duration) -> Self {
        Self {
            mode: RunMode::Batch,
            max_runtime: Some(max_runtime),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    QueueEmpty,
    TimeLimit,
    /// The store handed back a video already attempted in this run, which
    /// means status updates are not sticking.
    RepeatedTask(String),
    PollFailed,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::QueueEmpty => f.write_str("queue empty"),
            StopReason::TimeLimit => f.write_str("time limit reached"),
            StopReason::RepeatedTask(video_id) => write!(f, "task {video_id} was handed out twice"),
            StopReason::PollFailed => f.write_str("polling the task store failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub polled: usize,
    pub completed: usize,
    pub failed: usize,
    pub stop: StopReason,
}

/// The video a worker is currently processing, readable while `run` holds
/// the worker. Used to report which row an interrupted run left behind.
#[derive(Debug, Clone, Default)]
pub struct InFlight(Arc<Mutex<Option<String>>>);

impl InFlight {
    pub fn current(&self) -> Option<String> {
        self.0.lock().ok().and_then(|video_id| video_id.clone())
    }

    fn set(&self, video_id: Option<&str>) {
        if let Ok(mut current) = self.0.lock() {
            *current = video_id.map(str::to_string);
        }
    }
}

/// Best-effort video title lookup.
#[async_trait]
pub trait TitleLookup: Send + Sync {
    async fn lookup_title(&self, video_id: &str) -> std::result::Result<Option<String>, SourceError>;
}

pub struct QueueWorker {
    store: Arc<dyn TaskStore>,
    acquirer: TranscriptAcquirer,
    analyzer: Box<dyn Analyzer>,
    titles: Box<dyn TitleLookup>,
    config: WorkerConfig,
    in_flight: InFlight,
}

impl QueueWorker {
    pub fn new(
        store: Arc<dyn TaskStore>,
        acquirer: TranscriptAcquirer,
        analyzer: Box<dyn Analyzer>,
        titles: Box<dyn TitleLookup>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            store,
            acquirer,
            analyzer,
            titles,
            config,
            in_flight: InFlight::default(),
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn in_flight(&self) -> InFlight {
        self.in_flight.clone()
    }

    pub async fn run(&mut self) -> RunSummary {
        let started = Instant::now();
        let mut attempted: HashSet<String> = HashSet::new();
        let (mut polled, mut completed, mut failed) = (0, 0, 0);

        info!(mode = ?self.config.mode, max_runtime = ?self.config.max_runtime, "worker started");

        let stop = loop {
            if self.out_of_time(started) {
                info!(elapsed_secs = started.elapsed().as_secs(), "time budget spent");
                break StopReason::TimeLimit;
            }

            let task = match self.store.next_pending().await {
                Ok(Some(task)) => task,
                Ok(None) => {
                    if self.config.mode == RunMode::Batch {
                        break StopReason::QueueEmpty;
                    }
                    debug!(idle_secs = self.config.idle_poll.as_secs(), "queue empty, waiting");
                    sleep(self.config.idle_poll).await;
                    continue;
                }
                Err(err) => {
                    error!(error = %err, "failed to poll task store");
                    if self.config.mode == RunMode::Batch {
                        break StopReason::PollFailed;
                    }
                    sleep(self.config.idle_poll).await;
                    continue;
                }
            };
            polled += 1;

            if !attempted.insert(task.video_id.clone()) {
                error!(video_id = %task.video_id, "task came back as pending after being attempted, stopping");
                break StopReason::RepeatedTask(task.video_id);
            }

            info!(video_id = %task.video_id, "processing task");
            self.in_flight.set(Some(&task.video_id));
            match self.process_task(&task).await {
                Ok(()) => {
                    completed += 1;
                    info!(video_id = %task.video_id, "task completed");
                }
                Err(err) => {
                    failed += 1;
                    warn!(video_id = %task.video_id, error = %err, "task failed");
                    self.record_failure(&task.video_id, &err).await;
                }
            }
            self.in_flight.set(None);

            sleep(self.config.task_pacing).await;
        };

        let summary = RunSummary {
            polled,
            completed,
            failed,
            stop,
        };
        info!(
            polled = summary.polled,
            completed = summary.completed,
            failed = summary.failed,
            stop = %summary.stop,
            "worker stopped"
        );
        summary
    }

    fn out_of_time(&self, started: Instant) -> bool {
        self.config.mode == RunMode::Batch
            && self
                .config
                .max_runtime
                .is_some_and(|limit| started.elapsed() >= limit)
    }

    /// Drive one pending task to `completed`. Any error leaves the failure
    /// to be recorded by the caller.
    pub async fn process_task(&mut self, task: &Task) -> Result<()> {
        let video_id = task.video_id.as_str();

        let title = self.fetch_title(video_id).await;
        self.mark_processing(video_id, title).await?;

        let analysis = self.transcribe_and_analyze(video_id).await?;
        self.mark_completed(video_id, analysis).await
    }

    /// Acquire and analyse one video outside the queue, then upsert the
    /// completed row whatever state it was in before.
    pub async fn process_video(&mut self, video_id: &str) -> Result<Task> {
        let title = self.fetch_title(video_id).await;
        let analysis = self.transcribe_and_analyze(video_id).await?;

        let task = Task::completed(video_id, title, analysis);
        self.store.upsert(&task).await?;
        info!(video_id, "video processed and stored");
        Ok(task)
    }

    async fn transcribe_and_analyze(&mut self, video_id: &str) -> Result<AnalysisResult> {
        let transcript = self
            .acquirer
            .fetch_transcript(video_id)
            .await
            .ok_or_else(|| TubelexError::NoCaptions {
                video_id: video_id.to_string(),
            })?;

        self.analyze_with_retry(video_id, &transcript.render()).await
    }

    async fn fetch_title(&self, video_id: &str) -> Option<String> {
        match self.titles.lookup_title(video_id).await {
            Ok(title) => title,
            Err(err) => {
                warn!(video_id, error = %err, "could not look up title");
                None
            }
        }
    }

    async fn mark_processing(&self, video_id: &str, title: Option<String>) -> Result<()> {
        let has_title = title.is_some();
        let update = TaskUpdate::status(TaskStatus::Processing).with_title(title);

        match self.store.update(video_id, &update).await {
            Ok(()) => Ok(()),
            Err(err) if has_title => {
                warn!(video_id, error = %err, "processing update with title failed, retrying without it");
                self.store
                    .update(video_id, &TaskUpdate::status(TaskStatus::Processing))
                    .await?;
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }

    pub async fn analyze_with_retry(&mut self, video_id: &str, transcript: &str) -> Result<AnalysisResult> {
        let mut attempt = 0;

        loop {
            attempt += 1;
            let err = match self.analyzer.analyze(transcript).await {
                Ok(analysis) => return Ok(analysis),
                Err(err) => err,
            };

            match self.config.retry.next_step(attempt, &err) {
                RetryStep::Rotate(delay) => {
                    warn!(video_id, attempt, error = %err, "quota exhausted, switching API key");
                    self.analyzer.rotate_credential();
                    sleep(delay).await;
                }
                RetryStep::Wait(delay) => {
                    warn!(video_id, attempt, delay_secs = delay.as_secs(), error = %err, "model unavailable, backing off");
                    sleep(delay).await;
                }
                RetryStep::GiveUp => {
                    return Err(TubelexError::AnalysisFailed {
                        video_id: video_id.to_string(),
                        attempts: attempt,
                        source: err,
                    });
                }
            }
        }
    }

    async fn mark_completed(&self, video_id: &str, analysis: AnalysisResult) -> Result<()> {
        let update = TaskUpdate::completed(analysis);

        let written = self.store.update(video_id, &update).await;
        if let Err(err) = written {
            warn!(video_id, error = %err, "completed update failed, retrying without processing_error");
            self.store
                .update(video_id, &update.without_error_column())
                .await?;
        }
        Ok(())
    }

    /// Persistence problems here are logged only; the run goes on.
    async fn record_failure(&self, video_id: &str, failure: &TubelexError) {
        let update = TaskUpdate::failed(failure.to_string());
        let Err(err) = self.store.update(video_id, &update).await else {
            return;
        };

        warn!(video_id, error = %err, "error update failed, retrying with status only");
        if let Err(err) = self
            .store
            .update(video_id, &TaskUpdate::status(TaskStatus::Error))
            .await
        {
            error!(video_id, error = %err, "could not mark task as failed");
        }
    }
}
