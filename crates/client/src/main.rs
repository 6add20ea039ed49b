// crates/client/src/main.rs
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use noisescope_client::image::{decode_data_url, encode_subject_image};
use noisescope_client::logging::{init_tracing, DEFAULT_FILTER};
use noisescope_client::{
    ClientConfig, HttpSubjectDirectory, RunMode, SessionCoordinator, SessionState, SubjectDirectory,
    ViewUpdate,
};
use noisescope_core::{
    timeline_key, FileTimelineStore, JobSpec, ScheduleKind, TimelineStore, COSINE_METRIC,
};

#[derive(Parser)]
#[command(name = "noisescope", version, about = "Stream diffusion runs and keep per-subject timelines")]
struct Cli {
    /// Worker base URL (overrides NOISESCOPE_WORKER_URL).
    #[arg(long, global = true)]
    worker_url: Option<String>,

    /// Timeline cache directory (overrides NOISESCOPE_CACHE_DIR).
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Stream a run from step 0, replacing the subject's history.
    Run(JobArgs),
    /// Stream a run appended after the subject's existing history.
    Continue(JobArgs),
    /// Single request, final image only.
    Fast {
        #[command(flatten)]
        job: JobArgs,
        /// Write the returned image here.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Print the stored timeline of a subject.
    History { subject: String },
    /// Delete the stored timeline of a subject.
    Evict { subject: String },
    /// List subjects known to the worker.
    Subjects,
    /// Upload an image and print its subject id.
    Upload { file: PathBuf },
}

#[derive(Args)]
struct JobArgs {
    /// Source image.
    image: PathBuf,
    /// Subject id the timeline is stored under. Omit for an unsaved subject.
    #[arg(long)]
    subject: Option<String>,
    #[arg(long, default_value_t = 500)]
    steps: u32,
    #[arg(long, default_value = "linear")]
    schedule: ScheduleKind,
    #[arg(long)]
    beta_start: Option<f64>,
    #[arg(long)]
    beta_end: Option<f64>,
    #[arg(long)]
    seed: Option<u64>,
}

impl JobArgs {
    fn spec(&self, payload: String, config: &ClientConfig) -> JobSpec {
        JobSpec::new(payload, self.steps)
            .with_schedule(self.schedule)
            .with_bounds(self.beta_start, self.beta_end)
            .with_seed(self.seed.unwrap_or(config.seed))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing(DEFAULT_FILTER);
    let cli = Cli::parse();

    let mut config = ClientConfig::default();
    if let Some(url) = cli.worker_url {
        config.worker_url = url;
    }
    if let Some(dir) = cli.cache_dir {
        config.cache_dir = Some(dir);
    }

    match cli.command {
        Command::Run(job) => stream(&config, &job, false).await,
        Command::Continue(job) => stream(&config, &job, true).await,
        Command::Fast { job, out } => fast(&config, &job, out.as_deref()).await,
        Command::History { subject } => history(&config, &subject).await,
        Command::Evict { subject } => evict(&config, &subject).await,
        Command::Subjects => subjects(&config).await,
        Command::Upload { file } => upload(&config, &file).await,
    }
}

fn read_image(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(encode_subject_image(&bytes)?)
}

fn timeline_store(config: &ClientConfig) -> Result<FileTimelineStore> {
    match &config.cache_dir {
        Some(dir) => Ok(FileTimelineStore::new(dir)),
        None => Ok(FileTimelineStore::open_default()?),
    }
}

async fn stream(config: &ClientConfig, job: &JobArgs, append: bool) -> Result<()> {
    let payload = read_image(&job.image)?;
    let spec = job.spec(payload.clone(), config);
    let steps = spec.total_steps;

    let mut coordinator = SessionCoordinator::from_config(config);
    coordinator
        .switch_subject(job.subject.clone(), Some(payload.clone()), Some(payload))
        .await;
    let history = coordinator.timeline().len();

    let started = Instant::now();
    if append {
        coordinator.continue_run(spec)?;
    } else {
        coordinator
            .run_diffusion(job.subject.as_deref(), spec, RunMode::Streamed)
            .await?;
    }

    let pb = ProgressBar::new(u64::from(steps));
    pb.set_style(
        ProgressStyle::default_bar()
            .template("  {spinner} [{bar:30}] {pos}/{len} {msg}")?
            .progress_chars("=> "),
    );

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    while coordinator.session_state().is_live() {
        tokio::select! {
            _ = &mut ctrl_c => {
                coordinator.cancel_run();
            }
            update = coordinator.next_update() => match update {
                Some(ViewUpdate::Progress { fraction, .. }) => {
                    pb.set_position((fraction * f64::from(steps)).round() as u64);
                }
                Some(ViewUpdate::FrameMerged { global_step, .. }) => {
                    pb.set_message(format!("frame {global_step}"));
                }
                Some(_) => {}
                None => break,
            },
        }
    }
    pb.finish_and_clear();

    let state = coordinator.session_state();
    let frames = coordinator.timeline().len();
    let error = coordinator.view().stream_error.clone();
    coordinator.shutdown().await;

    match state {
        SessionState::Done => eprintln!(
            "  \u{2713} {} frames on the timeline ({} new) in {:.1}s",
            frames,
            frames.saturating_sub(if append { history } else { 0 }),
            started.elapsed().as_secs_f64()
        ),
        SessionState::Canceled => eprintln!("  \u{2717} canceled, kept {frames} frames"),
        _ => {
            let detail = error.unwrap_or_else(|| state.label().to_string());
            anyhow::bail!("run did not finish: {detail}");
        }
    }
    Ok(())
}

async fn fast(config: &ClientConfig, job: &JobArgs, out: Option<&Path>) -> Result<()> {
    let payload = read_image(&job.image)?;
    let spec = job.spec(payload.clone(), config);

    let mut coordinator = SessionCoordinator::from_config(config);
    coordinator
        .switch_subject(job.subject.clone(), Some(payload.clone()), Some(payload))
        .await;
    coordinator
        .run_diffusion(job.subject.as_deref(), spec, RunMode::SingleShot)
        .await?;

    let view = coordinator.view().clone();
    coordinator.shutdown().await;

    let step = view.current_step.unwrap_or_default();
    match (out, view.preview.as_deref().and_then(decode_data_url)) {
        (Some(path), Some(bytes)) => {
            std::fs::write(path, &bytes).with_context(|| format!("writing {}", path.display()))?;
            eprintln!("  \u{2713} step {step} written to {}", path.display());
        }
        (Some(_), None) => anyhow::bail!("worker returned an image that is not base64 data"),
        (None, _) => eprintln!("  \u{2713} step {step} complete"),
    }
    Ok(())
}

async fn history(config: &ClientConfig, subject: &str) -> Result<()> {
    let store = timeline_store(config)?;
    let Some(frames) = store.get(&timeline_key(subject)).await? else {
        eprintln!("  no timeline for {subject}");
        return Ok(());
    };
    println!("{:>8} {:>8} {:>10} {:>10}", "global", "local", "cosine", "beta");
    for frame in &frames {
        let cosine = frame
            .metric(COSINE_METRIC)
            .map(|v| format!("{v:.4}"))
            .unwrap_or_else(|| "-".into());
        let beta = frame
            .schedule_value
            .map(|v| format!("{v:.5}"))
            .unwrap_or_else(|| "-".into());
        println!(
            "{:>8} {:>8} {:>10} {:>10}",
            frame.global_step, frame.local_step, cosine, beta
        );
    }
    eprintln!("  {} frames", frames.len());
    Ok(())
}

async fn evict(config: &ClientConfig, subject: &str) -> Result<()> {
    let store = timeline_store(config)?;
    store.delete(&timeline_key(subject)).await?;
    eprintln!("  \u{2713} evicted {subject}");
    Ok(())
}

async fn subjects(config: &ClientConfig) -> Result<()> {
    let directory = HttpSubjectDirectory::new(config);
    for record in directory.list().await? {
        println!(
            "{}\t{}",
            record.id,
            record.filename.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

async fn upload(config: &ClientConfig, file: &Path) -> Result<()> {
    let bytes = std::fs::read(file).with_context(|| format!("reading {}", file.display()))?;
    let filename = file
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload");

    let directory: Arc<dyn SubjectDirectory> = Arc::new(HttpSubjectDirectory::new(config));
    let mut coordinator = SessionCoordinator::new(
        config,
        Arc::new(timeline_store(config)?),
        directory,
    );
    let record = coordinator.upload_subject(bytes, filename).await?;
    coordinator.shutdown().await;
    println!("{}", record.id);
    Ok(())
}
