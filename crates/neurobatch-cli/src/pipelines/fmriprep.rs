//! Resting-state preprocessing via fmriprep in Docker.
//!
//! One container per BIDS subject. The container only sees the dataset
//! read-only and its own derivatives root; the participant label scopes the
//! run to a single subject so containers never race on shared outputs.

use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::info;

use neurobatch_core::config::ToolConfig;
use neurobatch_core::subjects::scan_subjects;
use neurobatch_core::{Job, Step};

use super::{log_path, path_arg};

#[derive(clap::Args, Debug)]
pub struct FmriprepArgs {
    /// BIDS dataset root; sub-* subdirectories are subjects
    #[arg(long)]
    pub data_dir: PathBuf,

    /// Derivatives output root
    #[arg(long)]
    pub out_dir: PathBuf,

    /// FreeSurfer license file mounted into the container
    #[arg(long)]
    pub fs_license: Option<PathBuf>,

    /// Docker image (default from settings)
    #[arg(long)]
    pub image: Option<String>,

    /// Skip subjects that already have an fmriprep report in the output root
    #[arg(long)]
    pub skip_existing: bool,
}

pub fn build_jobs(args: &FmriprepArgs, tools: &ToolConfig, log_dir: &Path) -> Result<Vec<Job>> {
    let image = args
        .image
        .clone()
        .unwrap_or_else(|| tools.fmriprep_image.clone());

    let mut jobs = Vec::new();
    for subject in scan_subjects(&args.data_dir)? {
        // BIDS: anything that isn't sub-* (derivatives/, code/, ...) is not
        // a participant.
        let Some(label) = subject.id.strip_prefix("sub-") else {
            continue;
        };
        if args.skip_existing && args.out_dir.join(format!("{}.html", subject.id)).exists() {
            info!(subject = %subject.id, "fmriprep report already present, skipping");
            continue;
        }

        jobs.push(
            Job::new(&subject.id, log_path(log_dir, &subject.id)).step(container_step(
                &image,
                &args.data_dir,
                &args.out_dir,
                args.fs_license.as_deref(),
                label,
            )),
        );
    }
    Ok(jobs)
}

fn container_step(
    image: &str,
    bids_dir: &Path,
    out_dir: &Path,
    fs_license: Option<&Path>,
    label: &str,
) -> Step {
    let mut step = Step::new("docker")
        .args(["run", "--rm"])
        .arg("-v")
        .arg(format!("{}:/data:ro", path_arg(bids_dir)))
        .arg("-v")
        .arg(format!("{}:/out", path_arg(out_dir)));
    if let Some(license) = fs_license {
        step = step
            .arg("-v")
            .arg(format!("{}:/opt/freesurfer/license.txt:ro", path_arg(license)));
    }
    step.arg(image)
        .args(["/data", "/out", "participant"])
        .args(["--participant-label", label])
}
