//! FreeSurfer cortical reconstruction (`recon-all`).
//!
//! A subject counts as complete when `fs/scripts/recon-all.done` exists or
//! the recon-all log ends in FreeSurfer's success sentinel. Incomplete
//! subjects get any stale partial `fs/` directory removed before rerunning,
//! since recon-all refuses to resume into one.

use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::{info, warn};

use neurobatch_core::subjects::{Subject, scan_sessions, scan_subjects};
use neurobatch_core::{Job, Step};

use super::{log_path, path_arg};

/// Line FreeSurfer appends to `recon-all.log` on success.
const LOG_SENTINEL: &str = "finished without error";

#[derive(clap::Args, Debug)]
pub struct ReconArgs {
    /// Data root; immediate subdirectories are subjects
    #[arg(long)]
    pub data_dir: PathBuf,

    /// Treat the layout as sub_*/ses-* and reconstruct each session
    #[arg(long)]
    pub sessions: bool,
}

/// Whether recon-all already finished for this subject directory.
pub fn is_complete(subject_dir: &Path) -> bool {
    let scripts = subject_dir.join("fs").join("scripts");
    if scripts.join("recon-all.done").exists() {
        return true;
    }
    match std::fs::read_to_string(scripts.join("recon-all.log")) {
        Ok(content) => content.contains(LOG_SENTINEL),
        Err(_) => false,
    }
}

pub fn build_jobs(args: &ReconArgs, log_dir: &Path) -> Result<Vec<Job>> {
    let units = if args.sessions {
        scan_sessions(&args.data_dir)?
    } else {
        scan_subjects(&args.data_dir)?
    };

    let anat_input = if args.sessions {
        "anat/data.nii.gz"
    } else {
        "t1/T1_unbiased.nii.gz"
    };

    let mut jobs = Vec::new();
    for unit in units {
        if is_complete(&unit.path) {
            info!(subject = %unit.id, "recon-all already complete, skipping");
            continue;
        }
        if !unit.has_inputs(&[anat_input]) {
            continue;
        }
        if !remove_stale_output(&unit) {
            continue;
        }

        jobs.push(
            Job::new(&unit.id, log_path(log_dir, &unit.id)).step(
                Step::new("recon-all")
                    .args(["-all", "-s", "fs"])
                    .arg("-i")
                    .arg(path_arg(&unit.path.join(anat_input)))
                    .arg("-sd")
                    .arg(path_arg(&unit.path)),
            ),
        );
    }

    if jobs.is_empty() {
        info!("No incomplete recon-all subjects found");
    }
    Ok(jobs)
}

/// Remove a leftover partial `fs/` directory. Failure to clear it means the
/// rerun would die immediately, so the subject is skipped instead.
fn remove_stale_output(unit: &Subject) -> bool {
    let fs_dir = unit.path.join("fs");
    if !fs_dir.exists() {
        return true;
    }
    match std::fs::remove_dir_all(&fs_dir) {
        Ok(()) => {
            info!(subject = %unit.id, "Removed stale partial fs directory");
            true
        }
        Err(e) => {
            warn!(
                subject = %unit.id,
                error = %e,
                "Failed to remove stale fs directory, skipping subject"
            );
            false
        }
    }
}
