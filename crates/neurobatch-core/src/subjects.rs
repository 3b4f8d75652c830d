//! Subject discovery.
//!
//! A data root holds one directory per subject. Discovery returns the
//! immediate subdirectories sorted by name; ordering is for stable logs
//! only and carries no scheduling meaning. Session-nested layouts
//! (`sub_*/ses-*`) flatten each session into its own unit of work.

use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::{Error, Result};

/// One independently-processed unit of input data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    /// Identity, derived from the directory name. Used to key log files
    /// and report entries, so it never contains a path separator.
    pub id: String,
    /// Absolute or caller-relative path to the subject directory.
    pub path: PathBuf,
}

impl Subject {
    /// Whether every listed input exists, relative to the subject directory.
    /// Missing inputs are logged so the skip is visible in batch output.
    pub fn has_inputs(&self, required: &[&str]) -> bool {
        for rel in required {
            let path = self.path.join(rel);
            if !path.exists() {
                warn!(subject = %self.id, input = %rel, "Missing required input, skipping subject");
                return false;
            }
        }
        true
    }
}

/// Scan `root` for immediate subdirectories, one subject each.
pub fn scan_subjects(root: &Path) -> Result<Vec<Subject>> {
    if !root.is_dir() {
        return Err(Error::NotADirectory(root.to_path_buf()));
    }

    let mut subjects = Vec::new();
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let Ok(id) = entry.file_name().into_string() else {
            warn!(path = %entry.path().display(), "Skipping non-UTF-8 directory name");
            continue;
        };
        subjects.push(Subject {
            id,
            path: entry.path(),
        });
    }

    subjects.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(subjects)
}

/// Scan a session-nested layout: `root/sub_*/ses-*`, one unit per session.
///
/// The unit id is `<subject>-<session>` so per-session log files don't
/// collide across subjects.
pub fn scan_sessions(root: &Path) -> Result<Vec<Subject>> {
    let mut sessions = Vec::new();
    for subject in scan_subjects(root)? {
        if !subject.id.starts_with("sub_") {
            continue;
        }
        for session in scan_subjects(&subject.path)? {
            if !session.id.starts_with("ses-") {
                continue;
            }
            sessions.push(Subject {
                id: format!("{}-{}", subject.id, session.id),
                path: session.path,
            });
        }
    }

    sessions.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(sessions)
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn scan_returns_sorted_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub02")).unwrap();
        std::fs::create_dir(dir.path().join("sub01")).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not a subject").unwrap();

        let subjects = scan_subjects(dir.path()).unwrap();
        let ids: Vec<&str> = subjects.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["sub01", "sub02"]);
    }

    #[test]
    fn scan_empty_root_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(scan_subjects(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn scan_missing_root_is_an_error() {
        let result = scan_subjects(Path::new("/nonexistent/data/root"));
        assert!(matches!(result, Err(Error::NotADirectory(_))));
    }

    #[test]
    fn has_inputs_checks_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let subj = dir.path().join("sub01");
        std::fs::create_dir_all(subj.join("dwi")).unwrap();
        std::fs::write(subj.join("dwi").join("bvals"), "0 1000").unwrap();

        let subject = Subject {
            id: "sub01".to_string(),
            path: subj,
        };
        assert!(subject.has_inputs(&["dwi/bvals"]));
        assert!(!subject.has_inputs(&["dwi/bvals", "dwi/bvecs"]));
    }

    #[test]
    fn sessions_flatten_two_level_layout() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sub_01").join("ses-1")).unwrap();
        std::fs::create_dir_all(dir.path().join("sub_01").join("ses-2")).unwrap();
        std::fs::create_dir_all(dir.path().join("sub_02").join("ses-1")).unwrap();
        // Ignored: wrong prefixes
        std::fs::create_dir_all(dir.path().join("controls").join("ses-1")).unwrap();
        std::fs::create_dir_all(dir.path().join("sub_03").join("anat")).unwrap();

        let sessions = scan_sessions(dir.path()).unwrap();
        let ids: Vec<&str> = sessions.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["sub_01-ses-1", "sub_01-ses-2", "sub_02-ses-1"]);
        assert!(sessions[0].path.ends_with("sub_01/ses-1"));
    }
}
