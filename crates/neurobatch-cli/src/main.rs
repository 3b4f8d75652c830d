//! `neurobatch` CLI
//!
//! Batch runner for per-subject neuroimaging pipelines: discovers subjects
//! under a data root, builds one job per subject (or per table, for the
//! stats pipeline), and executes the batch with a bounded level of
//! concurrency. Exits non-zero when any job in the batch failed.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::info;

use neurobatch_cli::pipelines::{atlas, dtifit, fmriprep, recon, register, stats};
use neurobatch_core::{config, tracing_init};
use neurobatch_engine::{BatchReport, Dispatcher};

#[derive(Parser, Debug)]
#[command(name = "neurobatch")]
#[command(version, about = "Bounded-concurrency batch runner for neuroimaging pipelines")]
struct Cli {
    /// Maximum number of concurrently running jobs
    #[arg(short = 'j', long, global = true, env = "NEUROBATCH_MAX_JOBS")]
    jobs: Option<usize>,

    /// Directory for per-job log files (default: <data-dir>/logs/<pipeline>)
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Per-job wall-clock limit in seconds
    #[arg(long, global = true, env = "NEUROBATCH_TIMEOUT_SECS")]
    timeout_secs: Option<u64>,

    /// Emit structured JSON log lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    pipeline: Pipeline,
}

#[derive(Subcommand, Debug)]
enum Pipeline {
    /// FreeSurfer cortical reconstruction for incomplete subjects
    Recon(recon::ReconArgs),
    /// FSL diffusion tensor fitting per subject
    Dtifit(dtifit::DtifitArgs),
    /// FA/MD erosion and registration to standard space
    Register(register::RegisterArgs),
    /// Atlas parcellation and anatomical statistics
    Atlas(atlas::AtlasArgs),
    /// Aggregate FreeSurfer stats into study-level tables
    Stats(stats::StatsArgs),
    /// Resting-state preprocessing via fmriprep in Docker
    Fmriprep(fmriprep::FmriprepArgs),
}

impl Pipeline {
    const fn name(&self) -> &'static str {
        match self {
            Self::Recon(_) => "recon",
            Self::Dtifit(_) => "dtifit",
            Self::Register(_) => "register",
            Self::Atlas(_) => "atlas",
            Self::Stats(_) => "stats",
            Self::Fmriprep(_) => "fmriprep",
        }
    }

    fn data_dir(&self) -> &Path {
        match self {
            Self::Recon(args) => &args.data_dir,
            Self::Dtifit(args) => &args.data_dir,
            Self::Register(args) => &args.data_dir,
            Self::Atlas(args) => &args.data_dir,
            Self::Stats(args) => &args.data_dir,
            Self::Fmriprep(args) => &args.data_dir,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let cwd = std::env::current_dir().ok();
    let config = config::load_config(cwd.as_deref())?;
    tracing_init::init_tracing("neurobatch=info", cli.log_json || config.batch.log_json);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pipeline = cli.pipeline.name(),
        "Starting neurobatch"
    );

    let log_dir = cli.log_dir.clone().unwrap_or_else(|| {
        cli.pipeline
            .data_dir()
            .join("logs")
            .join(cli.pipeline.name())
    });

    let jobs = match &cli.pipeline {
        Pipeline::Recon(args) => recon::build_jobs(args, &log_dir)?,
        Pipeline::Dtifit(args) => dtifit::build_jobs(args, &log_dir)?,
        Pipeline::Register(args) => register::build_jobs(args, &config.tools, &log_dir)?,
        Pipeline::Atlas(args) => atlas::build_jobs(args, &log_dir)?,
        Pipeline::Stats(args) => stats::build_jobs(args, &log_dir)?,
        Pipeline::Fmriprep(args) => fmriprep::build_jobs(args, &config.tools, &log_dir)?,
    };
    info!(jobs = jobs.len(), log_dir = %log_dir.display(), "Job set built");

    let mut dispatcher = Dispatcher::new(cli.jobs.unwrap_or(config.batch.max_jobs));
    if let Some(secs) = cli.timeout_secs.or(config.batch.timeout_secs) {
        dispatcher = dispatcher.with_timeout(Duration::from_secs(secs));
    }

    let report = dispatcher.run_all(jobs).await;
    print_summary(&report);

    Ok(if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// The summary is the program's primary output; diagnostics stay on the
/// tracing stream (stderr).
#[allow(clippy::print_stdout)]
fn print_summary(report: &BatchReport) {
    print!("{}", report.render());
}
