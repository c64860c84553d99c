use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;
use tubelex_core::{
    AnalyzerConfig, GeminiAnalyzer, QueueWorker, RestTaskStore, StopReason, StoreConfig,
    TaskStore, TrackApiSource, TranscriptAcquirer, WorkerConfig, YtDlp, audit_patterns,
    config::{REQUEST_TIMEOUT, http_client},
};

const DEFAULT_MAX_RUNTIME_MINS: u64 = 50;

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs < 60.0 {
        format!("{:.1}s", secs)
    } else {
        format!("{:.0}m {:.0}s", (secs / 60.0).floor(), secs % 60.0)
    }
}

#[derive(Parser)]
#[command(name = "tubelex")]
#[command(about = "Turn YouTube captions into vocabulary study notes")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Process pending tasks from the task table
    Run {
        /// Exit when the queue is empty or the time budget is spent
        #[arg(long)]
        batch: bool,

        /// Time budget in minutes for batch mode
        #[arg(long, default_value_t = DEFAULT_MAX_RUNTIME_MINS)]
        max_runtime_mins: u64,
    },

    /// Analyse one video now and upsert it, whatever its queue state
    Process { video_id: String },

    /// Print the transcript that would be sent for analysis
    Transcript { video_id: String },

    /// List the caption tracks published for a video
    Tracks { video_id: String },

    /// Show stored sentence patterns and flag timestamp problems
    Inspect { video_id: String },
}

fn create_spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ")
            .template("{spinner:.cyan} {msg}")
            .expect("spinner template is valid"),
    );
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn banner(subtitle: &str) {
    eprintln!(
        "\n{}  {}\n",
        style("tubelex").cyan().bold(),
        style(subtitle).dim()
    );
}

fn build_worker(http: &reqwest::Client, config: WorkerConfig) -> Result<QueueWorker> {
    let store_config = StoreConfig::from_env()?;
    let store: Arc<dyn TaskStore> = Arc::new(RestTaskStore::new(http.clone(), store_config));
    let analyzer = GeminiAnalyzer::new(http.clone(), AnalyzerConfig::from_env());
    let ytdlp = YtDlp::default();

    Ok(QueueWorker::new(
        store,
        TranscriptAcquirer::youtube(http.clone(), ytdlp.clone()),
        Box::new(analyzer),
        Box::new(ytdlp),
        config,
    ))
}

async fn run_queue(http: &reqwest::Client, batch: bool, max_runtime_mins: u64) -> Result<()> {
    let config = if batch {
        WorkerConfig::batch(Duration::from_secs(max_runtime_mins * 60))
    } else {
        WorkerConfig::default()
    };
    let mut worker = build_worker(http, config)?;

    banner(if batch { "Batch worker" } else { "Queue worker" });
    let started = Instant::now();

    let in_flight = worker.in_flight();
    let summary = tokio::select! {
        summary = worker.run() => summary,
        _ = tokio::signal::ctrl_c() => {
            match in_flight.current() {
                Some(video_id) => eprintln!(
                    "{} Interrupted while processing {}; its row may be left as processing",
                    style("!").yellow().bold(),
                    style(video_id).bold()
                ),
                None => eprintln!("{} Interrupted", style("!").yellow().bold()),
            }
            return Ok(());
        }
    };

    eprintln!("{}", style("─".repeat(60)).dim());
    eprintln!(
        "{} {} completed, {} failed, {} polled {}",
        style("✓").green().bold(),
        summary.completed,
        summary.failed,
        summary.polled,
        style(format!("[{}]", format_duration(started.elapsed()))).dim()
    );
    eprintln!("  {} {}", style("Stopped:").dim(), summary.stop);

    match summary.stop {
        StopReason::RepeatedTask(_) | StopReason::PollFailed => bail!("worker stopped: {}", summary.stop),
        StopReason::QueueEmpty | StopReason::TimeLimit => Ok(()),
    }
}

async fn process_one(http: &reqwest::Client, video_id: &str) -> Result<()> {
    let mut worker = build_worker(http, WorkerConfig::default())?;
    banner("Force process");

    let started = Instant::now();
    let spinner = create_spinner(&format!("Processing {video_id}..."));
    let task = match worker.process_video(video_id).await {
        Ok(task) => task,
        Err(err) => {
            spinner.finish_and_clear();
            return Err(err).with_context(|| format!("failed to process {video_id}"));
        }
    };
    spinner.finish_with_message(format!(
        "{} Stored: {} {}",
        style("✓").green().bold(),
        style(task.title.as_deref().unwrap_or(video_id)).dim(),
        style(format!("[{}]", format_duration(started.elapsed()))).dim()
    ));

    println!("{}", serde_json::to_string_pretty(&task)?);
    Ok(())
}

async fn print_transcript(http: &reqwest::Client, video_id: &str) -> Result<()> {
    let acquirer = TranscriptAcquirer::youtube(http.clone(), YtDlp::default());

    let spinner = create_spinner("Fetching captions...");
    let transcript = acquirer.fetch_transcript(video_id).await;
    spinner.finish_and_clear();

    let Some(transcript) = transcript else {
        bail!("no captions found for {video_id}");
    };

    eprintln!(
        "{} {} lines",
        style("✓").green().bold(),
        transcript.lines().len()
    );
    println!("{transcript}");
    Ok(())
}

async fn print_tracks(http: &reqwest::Client, video_id: &str) -> Result<()> {
    let source = TrackApiSource::new(http.clone());

    let spinner = create_spinner("Reading watch page...");
    let tracks = source.list_tracks(video_id).await;
    spinner.finish_and_clear();
    let tracks = tracks.with_context(|| format!("failed to list tracks for {video_id}"))?;

    if tracks.is_empty() {
        eprintln!("{} No caption tracks published", style("!").yellow().bold());
        return Ok(());
    }

    for track in &tracks {
        println!(
            "{:<8} {:<40} {}",
            track.language_code,
            track.display_name(),
            if track.is_generated() {
                style("auto-generated").dim()
            } else {
                style("manual").green()
            }
        );
    }
    Ok(())
}

async fn inspect(http: &reqwest::Client, video_id: &str) -> Result<()> {
    let store = RestTaskStore::new(http.clone(), StoreConfig::from_env()?);
    let Some(row) = store.get(video_id).await? else {
        bail!("video {video_id} not found");
    };

    let patterns = row["sentence_patterns"].as_array().map(Vec::as_slice).unwrap_or_default();
    println!(
        "{} {} ({} patterns)",
        style(video_id).cyan().bold(),
        row["status"].as_str().unwrap_or("?"),
        patterns.len()
    );
    for (i, pattern) in patterns.iter().enumerate() {
        let structure: String = pattern["structure"]
            .as_str()
            .unwrap_or_default()
            .chars()
            .take(40)
            .collect();
        println!("  {:>2}. {:<40} {}", i + 1, structure, pattern["timestamp"]);
    }

    let issues = audit_patterns(&row);
    if issues.is_empty() {
        println!("{} All timestamps valid", style("✓").green().bold());
    } else {
        for issue in &issues {
            println!("{} {issue}", style("✗").red().bold());
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional; real environment variables take precedence.
    dotenv::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let http = http_client(REQUEST_TIMEOUT).context("failed to build HTTP client")?;

    match cli.command {
        Command::Run {
            batch,
            max_runtime_mins,
        } => run_queue(&http, batch, max_runtime_mins).await,
        Command::Process { video_id } => process_one(&http, &video_id).await,
        Command::Transcript { video_id } => print_transcript(&http, &video_id).await,
        Command::Tracks { video_id } => print_tracks(&http, &video_id).await,
        Command::Inspect { video_id } => inspect(&http, &video_id).await,
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_defaults_to_fifty_minute_budget() {
        let cli = Cli::try_parse_from(["tubelex", "run", "--batch"]).unwrap();
        match cli.command {
            Command::Run {
                batch,
                max_runtime_mins,
            } => {
                assert!(batch);
                assert_eq!(max_runtime_mins, 50);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn durations_are_human_readable() {
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.5s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 5s");
    }
}
