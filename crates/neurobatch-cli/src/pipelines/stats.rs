//! Aggregate FreeSurfer statistics into study-level tables.
//!
//! Unlike the per-subject pipelines, the batch here is the cross product of
//! parcellation x hemisphere x measurement: each job is one
//! `aparcstats2table` invocation over every subject at once, plus one
//! `asegstats2table` job per subcortical segmentation. Job identity is the
//! table name.

use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::warn;

use neurobatch_core::subjects::scan_subjects;
use neurobatch_core::{Job, Step};

use super::{log_path, path_arg};

const HEMISPHERES: [&str; 2] = ["lh", "rh"];
const MEASUREMENTS: [&str; 7] = [
    "area", "volume", "thickness", "meancurv", "gauscurv", "foldind", "curvind",
];
const PARCELLATIONS: [&str; 4] = ["aparc", "BN_Atlas", "Schaefer200", "hcp-mmp-b"];

/// Subcortical segmentations: (table name, stats file, output directory).
const SUBCORTICAL: [(&str, &str, &str); 2] = [
    ("aseg", "aseg.stats", "aparc"),
    ("BN_Atlas_subcortex", "BN_Atlas_subcortex.stats", "BN_Atlas"),
];

#[derive(clap::Args, Debug)]
pub struct StatsArgs {
    /// Data root; immediate subdirectories are subjects
    #[arg(long)]
    pub data_dir: PathBuf,

    /// Output directory for the aggregated tables
    #[arg(long)]
    pub out_dir: PathBuf,
}

pub fn build_jobs(args: &StatsArgs, log_dir: &Path) -> Result<Vec<Job>> {
    let subjects: Vec<_> = scan_subjects(&args.data_dir)?
        .into_iter()
        .filter(|s| {
            let has_fs = s.path.join("FreeSurfer").is_dir();
            if !has_fs {
                warn!(subject = %s.id, "No FreeSurfer reconstruction, excluded from tables");
            }
            has_fs
        })
        .collect();

    if subjects.is_empty() {
        warn!("No subjects with FreeSurfer reconstructions found");
        return Ok(Vec::new());
    }

    // The subjects file and per-parcellation directories are batch-level
    // artifacts; failing to set them up fails the whole batch.
    std::fs::create_dir_all(&args.out_dir)
        .with_context(|| format!("Failed to create {}", args.out_dir.display()))?;
    let subjects_file = write_subjects_file(&args.out_dir, &subjects)?;
    for parc in PARCELLATIONS {
        std::fs::create_dir_all(args.out_dir.join(parc))
            .with_context(|| format!("Failed to create {}", args.out_dir.join(parc).display()))?;
    }

    let mut jobs = Vec::new();
    for hemi in HEMISPHERES {
        for meas in MEASUREMENTS {
            for parc in PARCELLATIONS {
                let table = format!("{hemi}.{parc}.{meas}");
                let table_file = args.out_dir.join(parc).join(format!("{table}.csv"));
                jobs.push(
                    Job::new(&table, log_path(log_dir, &table)).step(
                        Step::new("aparcstats2table")
                            .arg(format!("--subjectsfile={}", path_arg(&subjects_file)))
                            .arg(format!("--hemi={hemi}"))
                            .arg(format!("--meas={meas}"))
                            .arg(format!("--parc={parc}"))
                            .arg(format!("--tablefile={}", path_arg(&table_file)))
                            .arg("--delimiter=comma")
                            .arg("--skip"),
                    ),
                );
            }
        }
    }

    for (name, stats_file, out_subdir) in SUBCORTICAL {
        let table = format!("{name}.volume");
        let table_file = args.out_dir.join(out_subdir).join(format!("{table}.csv"));
        jobs.push(
            Job::new(&table, log_path(log_dir, &table)).step(
                Step::new("asegstats2table")
                    .arg(format!("--subjectsfile={}", path_arg(&subjects_file)))
                    .arg("--meas=volume")
                    .arg(format!("--statsfile={stats_file}"))
                    .arg(format!("--tablefile={}", path_arg(&table_file)))
                    .arg("--delimiter=comma")
                    .arg("--skip"),
            ),
        );
    }

    Ok(jobs)
}

/// Write one FreeSurfer directory path per line, the format the
/// `*stats2table` tools accept via `--subjectsfile`.
fn write_subjects_file(
    out_dir: &Path,
    subjects: &[neurobatch_core::Subject],
) -> Result<PathBuf> {
    let path = out_dir.join("subj_path.txt");
    let mut file = std::fs::File::create(&path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    for subject in subjects {
        writeln!(file, "{}", subject.path.join("FreeSurfer").display())
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }
    Ok(path)
}
