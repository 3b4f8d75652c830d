//! Per-stage job builders.
//!
//! A pipeline never executes anything itself: it scans the data root,
//! filters out subjects whose required inputs are missing (skip with a
//! warning, never fatal to the batch), and emits fully-built jobs with
//! structured argument lists. Anything that would prevent a job from even
//! starting is caught here, before the job can occupy a dispatcher slot.

use std::path::{Path, PathBuf};

use tracing::warn;

pub mod atlas;
pub mod dtifit;
pub mod fmriprep;
pub mod recon;
pub mod register;
pub mod stats;

/// Log file for one job, keyed by its id.
pub(crate) fn log_path(log_dir: &Path, id: &str) -> PathBuf {
    log_dir.join(format!("{id}.log"))
}

/// Create a job's output directory. Failure skips the subject with a
/// warning; the rest of the batch keeps going.
pub(crate) fn ensure_output_dir(subject: &str, dir: &Path) -> bool {
    match std::fs::create_dir_all(dir) {
        Ok(()) => true,
        Err(e) => {
            warn!(
                subject,
                dir = %dir.display(),
                error = %e,
                "Failed to create output directory, skipping subject"
            );
            false
        }
    }
}

/// Path rendered for an external command's argument list.
pub(crate) fn path_arg(path: &Path) -> String {
    path.display().to_string()
}
