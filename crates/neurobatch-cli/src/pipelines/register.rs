//! FA/MD registration to standard space (TBSS pre-stage).
//!
//! Per subject: erode and crop the FA map one voxel off each edge (the crop
//! bounds come from the image header via `fslval`), binarise it into a
//! registration weight mask, run linear (`flirt`) then non-linear (`fnirt`)
//! registration against the FMRIB58 template, and push the MD map through
//! the resulting warp with `applywarp`. Stale outputs from a previous run
//! are deleted before the job is built so every run starts clean.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use tracing::{info, warn};

use neurobatch_core::config::ToolConfig;
use neurobatch_core::subjects::scan_subjects;
use neurobatch_core::{Job, Step};

use super::{ensure_output_dir, log_path, path_arg};

/// Output basename for the FA map in template space.
const OUT_FA: &str = "FA_in_MNI";
/// Output basename for the warped MD map.
const OUT_MD: &str = "MD_in_MNI";

const REQUIRED_INPUTS: [&str; 2] = ["dwi/dtifit/dti_FA.nii.gz", "dwi/dtifit/dti_MD.nii.gz"];

#[derive(clap::Args, Debug)]
pub struct RegisterArgs {
    /// Data root; immediate subdirectories are subjects
    #[arg(long)]
    pub data_dir: PathBuf,

    /// Register the raw FA map instead of the eroded one
    #[arg(long)]
    pub no_erode: bool,

    /// Reference FA template (default: $FSLDIR/data/standard/FMRIB58_FA_1mm)
    #[arg(long)]
    pub ref_fa: Option<PathBuf>,

    /// FNIRT configuration file
    #[arg(long, default_value = "FA_2_FMRIB58_1mm.cnf")]
    pub fnirt_config: String,
}

pub fn build_jobs(args: &RegisterArgs, tools: &ToolConfig, log_dir: &Path) -> Result<Vec<Job>> {
    let ref_fa = resolve_ref_fa(args, tools)?;

    let mut jobs = Vec::new();
    for subject in scan_subjects(&args.data_dir)? {
        if !subject.has_inputs(&REQUIRED_INPUTS) {
            continue;
        }

        let dwi = subject.path.join("dwi");
        let tmp_dir = dwi.join("dtifit").join("reg_temp");
        if !ensure_output_dir(&subject.id, &tmp_dir) {
            continue;
        }
        clear_stale_outputs(&dwi);

        let dims = if args.no_erode {
            None
        } else {
            match eroded_roi_bounds(&dwi.join("dtifit").join("dti_FA.nii.gz")) {
                Ok(dims) => Some(dims),
                Err(e) => {
                    warn!(
                        subject = %subject.id,
                        error = %e,
                        "Failed to read FA dimensions, skipping subject"
                    );
                    continue;
                }
            }
        };

        let mut job = Job::new(&subject.id, log_path(log_dir, &subject.id));
        for step in subject_steps(&dwi, &ref_fa, &args.fnirt_config, dims) {
            job = job.step(step);
        }
        jobs.push(job);
    }
    Ok(jobs)
}

fn resolve_ref_fa(args: &RegisterArgs, tools: &ToolConfig) -> Result<PathBuf> {
    if let Some(path) = &args.ref_fa {
        return Ok(path.clone());
    }
    tools
        .reference_fa()
        .ok_or_else(|| anyhow!("No reference FA template: pass --ref-fa or set FSLDIR"))
}

/// The full step sequence for one subject. `dims` carries the crop bounds
/// when erosion is enabled; `None` copies the raw FA map instead.
fn subject_steps(
    dwi: &Path,
    ref_fa: &Path,
    fnirt_config: &str,
    dims: Option<(u64, u64, u64)>,
) -> Vec<Step> {
    let dti = dwi.join("dtifit");
    let tmp = dti.join("reg_temp");
    let fa_in = dti.join("dti_FA.nii.gz");
    let md_in = dti.join("dti_MD.nii.gz");
    let fa_ero = tmp.join("FA_ero.nii.gz");
    let fa_mask = tmp.join("FA_ero_mask.nii.gz");
    let affine = tmp.join("fa2mni_affine.mat");
    let fa_lin = tmp.join("FA_lin.nii.gz");
    let warp = tmp.join("FA_to_MNI_warp.nii.gz");
    let fnirt_log = tmp.join("fnirt.log");
    let out_fa = dwi.join(format!("{OUT_FA}.nii.gz"));
    let out_md = dwi.join(format!("{OUT_MD}.nii.gz"));

    let mut steps = Vec::new();

    // (1) erode + crop, or plain copy when erosion is disabled
    if let Some((dimx, dimy, dimz)) = dims {
        steps.push(
            Step::new("fslmaths")
                .arg(path_arg(&fa_in))
                .args(["-min", "1", "-ero", "-roi", "1"])
                .arg(dimx.to_string())
                .arg("1")
                .arg(dimy.to_string())
                .arg("1")
                .arg(dimz.to_string())
                .args(["0", "1"])
                .arg(path_arg(&fa_ero)),
        );
    } else {
        steps.push(Step::new("cp").arg(path_arg(&fa_in)).arg(path_arg(&fa_ero)));
    }
    steps.push(
        Step::new("fslmaths")
            .arg(path_arg(&fa_ero))
            .arg("-bin")
            .arg(path_arg(&fa_mask)),
    );

    // (2) linear + non-linear registration
    steps.push(
        Step::new("flirt")
            .arg("-in")
            .arg(path_arg(&fa_ero))
            .arg("-ref")
            .arg(path_arg(ref_fa))
            .arg("-omat")
            .arg(path_arg(&affine))
            .arg("-out")
            .arg(path_arg(&fa_lin))
            .args(["-interp", "trilinear"])
            .args(["-dof", "12"])
            .arg("-inweight")
            .arg(path_arg(&fa_mask)),
    );
    steps.push(
        Step::new("fnirt")
            .arg(format!("--in={}", path_arg(&fa_ero)))
            .arg(format!("--ref={}", path_arg(ref_fa)))
            .arg(format!("--aff={}", path_arg(&affine)))
            .arg(format!("--cout={}", path_arg(&warp)))
            .arg(format!("--iout={}", path_arg(&out_fa)))
            .arg(format!("--config={fnirt_config}"))
            .arg(format!("--logout={}", path_arg(&fnirt_log))),
    );

    // (3) carry MD through the same warp
    steps.push(
        Step::new("applywarp")
            .arg(format!("--in={}", path_arg(&md_in)))
            .arg(format!("--ref={}", path_arg(ref_fa)))
            .arg(format!("--warp={}", path_arg(&warp)))
            .arg(format!("--out={}", path_arg(&out_md)))
            .arg("--abs")
            .arg("--interp=trilinear"),
    );

    steps
}

/// Remove result and intermediate files left over from a previous run.
fn clear_stale_outputs(dwi: &Path) {
    let tmp = dwi.join("dtifit").join("reg_temp");
    let stale = [
        dwi.join(format!("{OUT_FA}.nii.gz")),
        dwi.join(format!("{OUT_MD}.nii.gz")),
        tmp.join("FA_ero.nii.gz"),
        tmp.join("FA_ero_mask.nii.gz"),
        tmp.join("fa2mni_affine.mat"),
        tmp.join("FA_lin.nii.gz"),
        tmp.join("FA_to_MNI_warp.nii.gz"),
        tmp.join("fnirt.log"),
    ];
    for path in stale {
        if !path.is_file() {
            continue;
        }
        match std::fs::remove_file(&path) {
            Ok(()) => info!(path = %path.display(), "Removed stale output"),
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove stale output"),
        }
    }
}

/// Crop bounds for a one-voxel erosion, read from the image header.
fn eroded_roi_bounds(fa: &Path) -> Result<(u64, u64, u64)> {
    Ok((
        fslval(fa, "dim1")?.saturating_sub(2),
        fslval(fa, "dim2")?.saturating_sub(2),
        fslval(fa, "dim3")?.saturating_sub(2),
    ))
}

fn fslval(image: &Path, field: &str) -> Result<u64> {
    let output = std::process::Command::new("fslval")
        .arg(image)
        .arg(field)
        .output()
        .with_context(|| format!("Failed to run fslval on {}", image.display()))?;
    if !output.status.success() {
        bail!("fslval {} {field} exited non-zero", image.display());
    }
    let text = String::from_utf8_lossy(&output.stdout);
    text.trim()
        .parse()
        .with_context(|| format!("Unexpected fslval output: {text:?}"))
}
