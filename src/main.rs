use std::time::Instant;

use clap::{Parser, ValueEnum};
use serde::Serialize;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use mm_sched::config::{SchedulerConfig, WorkerConfig};
use mm_sched::device::{OpenMode, SessionFile};
use mm_sched::engine::EngineClass;
use mm_sched::node::Node;
use mm_sched::scheduler::{JobKind, JobStatus, Priority, SessionSnapshot};
use mm_sched::shutdown::install_shutdown_handler;
use mm_sched::wire::{ReadFrame, WriteFrame};

#[derive(Parser, Debug)]
#[command(name = "mm-sched")]
#[command(version)]
#[command(about = "Cross-session job scheduler for shared multimedia engines")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Output format
    #[arg(long, short = 'o', global = true, default_value = "table")]
    output: OutputFormat,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run a three-session interlock chain and show how it resolves
    Demo(EngineArgs),

    /// Drive synthetic sessions until a job count is reached or a signal arrives
    Load(LoadArgs),
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

// =============================================================================
// Arguments
// =============================================================================

#[derive(Parser, Debug, Clone)]
struct EngineArgs {
    /// Number of engine classes to simulate (classes 1..=N)
    #[arg(long, default_value = "2")]
    classes: u8,

    /// Jobs each engine runs concurrently
    #[arg(long, default_value = "1")]
    concurrency: usize,

    /// Minimum simulated job latency in milliseconds
    #[arg(long, default_value = "5")]
    latency_min_ms: u64,

    /// Maximum simulated job latency in milliseconds
    #[arg(long, default_value = "20")]
    latency_max_ms: u64,
}

#[derive(Parser, Debug)]
struct LoadArgs {
    #[command(flatten)]
    engine: EngineArgs,

    /// Number of client sessions
    #[arg(long, default_value = "4")]
    sessions: usize,

    /// Total jobs to submit across all sessions
    #[arg(long, default_value = "1000")]
    jobs: usize,

    /// Jobs written between two fsyncs
    #[arg(long, default_value = "16")]
    batch: usize,

    /// Interlock each session behind the previous one before starting
    #[arg(long)]
    chain: bool,

    /// Upper bound on live jobs
    #[arg(long, default_value = "10000")]
    max_jobs: usize,
}

impl EngineArgs {
    fn node(&self, config: SchedulerConfig) -> Node {
        let worker = WorkerConfig::new(self.concurrency)
            .with_latency(self.latency_min_ms, self.latency_max_ms);
        Node::new(config, worker, &self.engine_classes())
    }

    fn engine_classes(&self) -> Vec<EngineClass> {
        (1..=self.classes.max(1)).map(EngineClass).collect()
    }
}

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct DemoResult {
    id: u32,
    status: String,
    payload: String,
}

#[derive(Serialize)]
struct DemoSession {
    name: String,
    opened_priority: i32,
    effective_priority: i32,
    held_jobs: usize,
    results: Vec<DemoResult>,
}

#[derive(Serialize)]
struct DemoOutput {
    sessions: Vec<DemoSession>,
    elapsed_ms: u128,
}

#[derive(Debug, Default, Serialize)]
struct SessionTotals {
    submitted: usize,
    completed: usize,
    aborted: usize,
}

#[derive(Serialize)]
struct LoadOutput {
    sessions: usize,
    submitted: usize,
    completed: usize,
    aborted: usize,
    interrupted: bool,
    elapsed_ms: u128,
    jobs_per_sec: f64,
}

// =============================================================================
// Helper Functions
// =============================================================================

fn held_jobs(snapshot: &SessionSnapshot) -> usize {
    snapshot
        .pending
        .iter()
        .filter(|job| !job.kind.is_placeholder() && !job.forwarded)
        .count()
}

fn frame(class: EngineClass, id: u32, payload: &[u8]) -> Vec<u8> {
    WriteFrame {
        kind: JobKind::new(class, 1),
        id,
        payload: payload.to_vec(),
    }
    .encode()
}

/// Read every result currently queued on a session.
async fn drain_results(file: &SessionFile) -> mm_sched::error::Result<Vec<ReadFrame>> {
    let mut frames = Vec::new();
    loop {
        let bytes = file.read().await?;
        match ReadFrame::decode(&bytes) {
            Some(frame) => frames.push(frame),
            None => return Ok(frames),
        }
    }
}

// =============================================================================
// Demo
// =============================================================================

async fn run_demo(args: EngineArgs, output: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    let node = args.node(SchedulerConfig::default());
    let running = node.start(CancellationToken::new())?;
    let device = running.device();
    let class = EngineClass(1);
    let started = Instant::now();

    let opened = [("s1", Priority(100)), ("s2", Priority::NORMAL), ("s3", Priority(2))];
    let mut files = Vec::new();
    for (_, priority) in &opened {
        files.push(device.open(*priority, OpenMode::ReadWrite).await?);
    }

    // s1 runs first, s2 waits for s1, s3 waits for s2.
    files[0].write(&frame(class, 1, b"A")).await?;
    files[1].interlock_after(&files[0]).await?;
    files[1].write(&frame(class, 2, b"B")).await?;
    files[2].interlock_after(&files[1]).await?;
    files[2].write(&frame(class, 3, b"C")).await?;

    let mut snapshots = Vec::new();
    for file in &files {
        snapshots.push(file.snapshot().await?);
    }

    let status = files[2].fsync().await?;
    tracing::info!(status = %status, "Last session in the chain drained");

    let mut sessions = Vec::new();
    for (((name, priority), file), snapshot) in opened.iter().zip(&files).zip(&snapshots) {
        let results = drain_results(file)
            .await?
            .into_iter()
            .map(|frame| DemoResult {
                id: frame.id,
                status: frame.status.to_string(),
                payload: String::from_utf8_lossy(&frame.payload).into_owned(),
            })
            .collect();
        sessions.push(DemoSession {
            name: name.to_string(),
            opened_priority: priority.0,
            effective_priority: snapshot.priority.0,
            held_jobs: held_jobs(snapshot),
            results,
        });
    }
    for file in files {
        file.release().await?;
    }
    running.stop().await;

    let report = DemoOutput {
        sessions,
        elapsed_ms: started.elapsed().as_millis(),
    };
    match output {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Table => {
            println!(
                "{:<8} {:>10} {:>10} {:>6}  RESULTS",
                "SESSION", "OPENED", "EFFECTIVE", "HELD"
            );
            for session in &report.sessions {
                let results: Vec<String> = session
                    .results
                    .iter()
                    .map(|r| format!("#{} {} {:?}", r.id, r.status, r.payload))
                    .collect();
                println!(
                    "{:<8} {:>10} {:>10} {:>6}  {}",
                    session.name,
                    session.opened_priority,
                    session.effective_priority,
                    session.held_jobs,
                    results.join(", ")
                );
            }
            println!();
            println!("Elapsed: {} ms", report.elapsed_ms);
        }
    }
    Ok(())
}

// =============================================================================
// Load
// =============================================================================

async fn drive_session(
    file: SessionFile,
    jobs: usize,
    batch: usize,
    classes: u8,
    stop: CancellationToken,
) -> mm_sched::error::Result<SessionTotals> {
    let mut totals = SessionTotals::default();
    let mut next_id: u32 = 1;

    while totals.submitted < jobs && !stop.is_cancelled() {
        let count = batch.min(jobs - totals.submitted);
        for _ in 0..count {
            let class = EngineClass(1 + (next_id % u32::from(classes)) as u8);
            if file.write(&frame(class, next_id, &next_id.to_le_bytes())).await?.is_some() {
                totals.submitted += 1;
            }
            next_id = next_id.wrapping_add(1).max(1);
        }

        tokio::select! {
            status = file.fsync() => {
                let status = status?;
                tracing::debug!(session = %file.id(), status = %status, "Batch drained");
            }
            _ = stop.cancelled() => break,
        }

        for frame in drain_results(&file).await? {
            match frame.status {
                JobStatus::Complete => totals.completed += 1,
                JobStatus::Aborted => totals.aborted += 1,
                _ => {}
            }
        }
    }

    let summary = file.release().await?;
    totals.aborted += summary.aborted + summary.discarded;
    Ok(totals)
}

async fn run_load(args: LoadArgs, output: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    let stop = install_shutdown_handler();
    let config = SchedulerConfig::default().with_max_jobs(args.max_jobs);
    let node = args.engine.node(config);
    let running = node.start(CancellationToken::new())?;
    let device = running.device();

    let sessions = args.sessions.max(1);
    let mut files = Vec::with_capacity(sessions);
    for _ in 0..sessions {
        files.push(device.open_default(OpenMode::ReadWrite).await?);
    }
    if args.chain {
        for pair in files.windows(2) {
            pair[1].interlock_after(&pair[0]).await?;
        }
    }

    let per_session = args.jobs.div_ceil(sessions);
    let classes = args.engine.classes.max(1);
    let started = Instant::now();
    let mut drivers = JoinSet::new();
    for file in files {
        drivers.spawn(drive_session(
            file,
            per_session,
            args.batch.max(1),
            classes,
            stop.clone(),
        ));
    }

    let mut totals = SessionTotals::default();
    while let Some(joined) = drivers.join_next().await {
        let session = joined??;
        totals.submitted += session.submitted;
        totals.completed += session.completed;
        totals.aborted += session.aborted;
    }
    let elapsed = started.elapsed();
    running.stop().await;

    let report = LoadOutput {
        sessions,
        submitted: totals.submitted,
        completed: totals.completed,
        aborted: totals.aborted,
        interrupted: stop.is_cancelled(),
        elapsed_ms: elapsed.as_millis(),
        jobs_per_sec: totals.completed as f64 / elapsed.as_secs_f64().max(f64::EPSILON),
    };
    match output {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Table => {
            println!("Sessions:    {}", report.sessions);
            println!("Submitted:   {}", report.submitted);
            println!("Completed:   {}", report.completed);
            println!("Aborted:     {}", report.aborted);
            if report.interrupted {
                println!("Interrupted: yes");
            }
            println!("Elapsed:     {} ms", report.elapsed_ms);
            println!("Throughput:  {:.1} jobs/s", report.jobs_per_sec);
        }
    }
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match args.command {
        Commands::Demo(engine) => run_demo(engine, &args.output).await?,
        Commands::Load(load) => run_load(load, &args.output).await?,
    }

    Ok(())
}
