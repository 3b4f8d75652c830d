//! Atlas parcellation and anatomical statistics (FreeSurfer).
//!
//! Per subject, against its `FreeSurfer/` reconstruction: Brainnetome
//! surface parcellation (`mris_ca_label`) for both hemispheres, subcortical
//! volume parcellation (`mri_ca_label`), then the matching surface and
//! volume statistics. Optionally resamples the HCP-MMP1 annotation from
//! fsaverage first. FreeSurfer tools resolve the subject name relative to
//! `SUBJECTS_DIR`, so every step carries it in its environment.

use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::warn;

use neurobatch_core::subjects::scan_subjects;
use neurobatch_core::{Job, Step};

use super::{ensure_output_dir, log_path, path_arg};

/// Subject name as FreeSurfer sees it: the reconstruction lives in
/// `<SUBJECTS_DIR>/FreeSurfer`.
const FS_SUBJECT: &str = "FreeSurfer";

#[derive(clap::Args, Debug)]
pub struct AtlasArgs {
    /// Data root; immediate subdirectories are subjects
    #[arg(long)]
    pub data_dir: PathBuf,

    /// Directory holding the atlas resources (LUT, GCA, GCS, annot files)
    #[arg(long)]
    pub atlas_dir: PathBuf,

    /// Also resample the HCP-MMP1 annotation from fsaverage
    #[arg(long)]
    pub hcp_mmp1: bool,
}

pub fn build_jobs(args: &AtlasArgs, log_dir: &Path) -> Result<Vec<Job>> {
    let mut jobs = Vec::new();
    for subject in scan_subjects(&args.data_dir)? {
        let fs_dir = subject.path.join(FS_SUBJECT);
        if !fs_dir.is_dir() {
            warn!(subject = %subject.id, "No FreeSurfer reconstruction, skipping subject");
            continue;
        }
        if !ensure_output_dir(&subject.id, &fs_dir.join("label"))
            || !ensure_output_dir(&subject.id, &fs_dir.join("stats"))
        {
            continue;
        }

        let mut job = Job::new(&subject.id, log_path(log_dir, &subject.id));
        for step in subject_steps(&subject.path, &args.atlas_dir, args.hcp_mmp1) {
            job = job.step(step);
        }
        jobs.push(job);
    }
    Ok(jobs)
}

/// The full parcellation + stats sequence for one subject.
///
/// `subjects_dir` is the subject's own directory: its `FreeSurfer/` child is
/// the reconstruction, so `SUBJECTS_DIR=<subjects_dir>` makes the
/// FreeSurfer subject name simply [`FS_SUBJECT`].
fn subject_steps(subjects_dir: &Path, atlas_dir: &Path, hcp_mmp1: bool) -> Vec<Step> {
    let fs = subjects_dir.join(FS_SUBJECT);
    let label = fs.join("label");
    let surf = fs.join("surf");
    let mri = fs.join("mri");
    let stats = fs.join("stats");
    let lut = atlas_dir.join("BN_Atlas_246_LUT.txt");

    let env_step = |program: &str| {
        Step::new(program).env("SUBJECTS_DIR", path_arg(subjects_dir))
    };

    let mut steps = Vec::new();

    if hcp_mmp1 {
        for hemi in ["lh", "rh"] {
            steps.push(
                env_step("mri_surf2surf")
                    .args(["--srcsubject", "fsaverage", "--trgsubject", FS_SUBJECT])
                    .args(["--hemi", hemi])
                    .arg("--sval-annot")
                    .arg(path_arg(&atlas_dir.join(format!("{hemi}.HCP-MMP1.annot"))))
                    .arg("--tval")
                    .arg(path_arg(&label.join(format!("{hemi}.HCP-MMP1.annot")))),
            );
        }
    }

    // Surface parcellation, both hemispheres
    for hemi in ["lh", "rh"] {
        steps.push(
            env_step("mris_ca_label")
                .arg("-l")
                .arg(path_arg(&label.join(format!("{hemi}.cortex.label"))))
                .arg(FS_SUBJECT)
                .arg(hemi)
                .arg(path_arg(&surf.join(format!("{hemi}.sphere.reg"))))
                .arg(path_arg(&atlas_dir.join(format!("{hemi}.BN_Atlas.gcs"))))
                .arg(path_arg(&label.join(format!("{hemi}.BN_Atlas.annot")))),
        );
    }

    // Subcortical (volume) parcellation
    steps.push(
        env_step("mri_ca_label")
            .arg(path_arg(&mri.join("brain.mgz")))
            .arg(path_arg(&mri.join("transforms").join("talairach.m3z")))
            .arg(path_arg(&atlas_dir.join("BN_Atlas_subcortex.gca")))
            .arg(path_arg(&mri.join("BN_Atlas_subcortex.mgz"))),
    );

    // Surface stats, both hemispheres
    for hemi in ["lh", "rh"] {
        steps.push(
            env_step("mris_anatomical_stats")
                .args(["-mgz", "-cortex"])
                .arg(path_arg(&label.join(format!("{hemi}.cortex.label"))))
                .arg("-f")
                .arg(path_arg(&stats.join(format!("{hemi}.BN_Atlas.stats"))))
                .arg("-b")
                .arg("-a")
                .arg(path_arg(&label.join(format!("{hemi}.BN_Atlas.annot"))))
                .arg("-c")
                .arg(path_arg(&lut))
                .arg(FS_SUBJECT)
                .arg(hemi)
                .arg("white"),
        );
    }

    // Volume stats
    steps.push(
        env_step("mri_segstats")
            .arg("--seg")
            .arg(path_arg(&mri.join("BN_Atlas_subcortex.mgz")))
            .arg("--ctab")
            .arg(path_arg(&lut))
            .args(["--excludeid", "0"])
            .arg("--sum")
            .arg(path_arg(&stats.join("BN_Atlas_subcortex.stats"))),
    );

    if hcp_mmp1 {
        for hemi in ["lh", "rh"] {
            steps.push(
                env_step("mris_anatomical_stats")
                    .arg("-a")
                    .arg(path_arg(&label.join(format!("{hemi}.HCP-MMP1.annot"))))
                    .arg("-f")
                    .arg(path_arg(&stats.join(format!("{hemi}.HCP-MMP1.stats"))))
                    .arg(FS_SUBJECT)
                    .arg(hemi),
            );
        }
    }

    steps
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_subject(root: &Path, id: &str) -> PathBuf {
        let subj = root.join(id);
        std::fs::create_dir_all(subj.join("FreeSurfer").join("surf")).unwrap();
        std::fs::create_dir_all(subj.join("FreeSurfer").join("mri")).unwrap();
        subj
    }

    #[test]
    fn brainnetome_sequence_has_six_steps() {
        let steps = subject_steps(Path::new("/data/1000037"), Path::new("/code"), false);
        let programs: Vec<&str> = steps.iter().map(|s| s.program.as_str()).collect();
        assert_eq!(
            programs,
            vec![
                "mris_ca_label",
                "mris_ca_label",
                "mri_ca_label",
                "mris_anatomical_stats",
                "mris_anatomical_stats",
                "mri_segstats",
            ]
        );
    }

    #[test]
    fn every_step_carries_subjects_dir() {
        let steps = subject_steps(Path::new("/data/1000037"), Path::new("/code"), true);
        for step in &steps {
            assert_eq!(
                step.envs,
                vec![("SUBJECTS_DIR".to_string(), "/data/1000037".to_string())],
                "missing SUBJECTS_DIR on {}",
                step.program
            );
        }
    }

    #[test]
    fn surface_parcellation_args_match_freesurfer_conventions() {
        let steps = subject_steps(Path::new("/data/1000037"), Path::new("/code"), false);
        assert_eq!(
            steps[0].args,
            vec![
                "-l",
                "/data/1000037/FreeSurfer/label/lh.cortex.label",
                "FreeSurfer",
                "lh",
                "/data/1000037/FreeSurfer/surf/lh.sphere.reg",
                "/code/lh.BN_Atlas.gcs",
                "/data/1000037/FreeSurfer/label/lh.BN_Atlas.annot",
            ]
        );
    }

    #[test]
    fn hcp_mmp1_adds_resampling_and_stats() {
        let without = subject_steps(Path::new("/d/s"), Path::new("/code"), false);
        let with = subject_steps(Path::new("/d/s"), Path::new("/code"), true);
        assert_eq!(with.len(), without.len() + 4);

        assert_eq!(with[0].program, "mri_surf2surf");
        assert!(with[0].args.contains(&"--sval-annot".to_string()));
        assert!(with[0].args.contains(&"/code/lh.HCP-MMP1.annot".to_string()));

        let last = &with[with.len() - 1];
        assert_eq!(last.program, "mris_anatomical_stats");
        assert!(last.args.contains(&"/d/s/FreeSurfer/stats/rh.HCP-MMP1.stats".to_string()));
    }

    #[test]
    fn subjects_without_reconstruction_are_skipped() {
        let dir = TempDir::new().unwrap();
        make_subject(dir.path(), "1000037");
        std::fs::create_dir_all(dir.path().join("1000043")).unwrap(); // no FreeSurfer

        let args = AtlasArgs {
            data_dir: dir.path().to_path_buf(),
            atlas_dir: PathBuf::from("/code"),
            hcp_mmp1: false,
        };
        let jobs = build_jobs(&args, &dir.path().join("logs")).unwrap();
        let ids: Vec<&str> = jobs.iter().map(|j| j.subject.as_str()).collect();
        assert_eq!(ids, vec!["1000037"]);
    }

    #[test]
    fn label_and_stats_dirs_are_created() {
        let dir = TempDir::new().unwrap();
        let subj = make_subject(dir.path(), "1000037");

        let args = AtlasArgs {
            data_dir: dir.path().to_path_buf(),
            atlas_dir: PathBuf::from("/code"),
            hcp_mmp1: false,
        };
        let jobs = build_jobs(&args, &dir.path().join("logs")).unwrap();
        assert_eq!(jobs.len(), 1);
        assert!(subj.join("FreeSurfer/label").is_dir());
        assert!(subj.join("FreeSurfer/stats").is_dir());
    }
}
