//! FSL diffusion tensor fitting (`dtifit`).
//!
//! One invocation per subject over the distortion-corrected DWI series,
//! writing the tensor maps into `dwi/dtifit/`.

use std::path::{Path, PathBuf};

use anyhow::Result;

use neurobatch_core::subjects::scan_subjects;
use neurobatch_core::{Job, Step};

use super::{ensure_output_dir, log_path, path_arg};

/// Inputs every subject must provide, relative to its directory.
const REQUIRED_INPUTS: [&str; 4] = [
    "dwi/data_ud.nii.gz",
    "dwi/raw/b0_brain_mask.nii.gz",
    "dwi/bvecs",
    "dwi/bvals",
];

#[derive(clap::Args, Debug)]
pub struct DtifitArgs {
    /// Data root; immediate subdirectories are subjects
    #[arg(long)]
    pub data_dir: PathBuf,
}

pub fn build_jobs(args: &DtifitArgs, log_dir: &Path) -> Result<Vec<Job>> {
    let mut jobs = Vec::new();
    for subject in scan_subjects(&args.data_dir)? {
        if !subject.has_inputs(&REQUIRED_INPUTS) {
            continue;
        }

        let dwi = subject.path.join("dwi");
        let out_dir = dwi.join("dtifit");
        if !ensure_output_dir(&subject.id, &out_dir) {
            continue;
        }

        jobs.push(
            Job::new(&subject.id, log_path(log_dir, &subject.id)).step(
                Step::new("dtifit")
                    .arg(format!("--data={}", path_arg(&dwi.join("data_ud.nii.gz"))))
                    .arg(format!("--out={}", path_arg(&out_dir.join("dti"))))
                    .arg(format!(
                        "--mask={}",
                        path_arg(&dwi.join("raw").join("b0_brain_mask.nii.gz"))
                    ))
                    .arg(format!("--bvecs={}", path_arg(&dwi.join("bvecs"))))
                    .arg(format!("--bvals={}", path_arg(&dwi.join("bvals"))))
                    .arg("--save_tensor"),
            ),
        );
    }
    Ok(jobs)
}
