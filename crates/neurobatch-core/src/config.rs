//! Configuration resolution for neurobatch.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/neurobatch/settings.json)
//! 3. Project config (.neurobatch/settings.json)
//! 4. Environment variables
//! 5. CLI arguments (highest priority, applied by the CLI crate)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Complete neurobatch configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub tools: ToolConfig,
}

/// Batch-execution configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Maximum number of concurrently running jobs.
    pub max_jobs: usize,
    /// Optional per-job wall-clock limit in seconds (None = no limit).
    pub timeout_secs: Option<u64>,
    /// Emit structured JSON log lines.
    pub log_json: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_jobs: 4,
            timeout_secs: None,
            log_json: false,
        }
    }
}

/// Locations of the external neuroimaging toolchains.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    /// FSL installation root ($FSLDIR).
    pub fsl_dir: Option<PathBuf>,
    /// FreeSurfer installation root ($FREESURFER_HOME).
    pub freesurfer_home: Option<PathBuf>,
    /// Docker image used by the fmriprep pipeline.
    pub fmriprep_image: String,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            fsl_dir: None,
            freesurfer_home: None,
            fmriprep_image: "nipreps/fmriprep:23.2.1".to_string(),
        }
    }
}

impl ToolConfig {
    /// Standard-space FA template shipped with FSL, used as the registration
    /// reference by the TBSS pipeline.
    pub fn reference_fa(&self) -> Option<PathBuf> {
        self.fsl_dir
            .as_ref()
            .map(|d| d.join("data").join("standard").join("FMRIB58_FA_1mm"))
    }
}

/// Load configuration with hierarchical resolution.
pub fn load_config(project_dir: Option<&Path>) -> Result<Config> {
    let mut config = Config::default();

    // Load global config
    if let Some(global_path) = global_config_path()
        && global_path.exists()
    {
        let global = load_config_file(&global_path)?;
        merge_config(&mut config, global);
    }

    // Load project config
    if let Some(dir) = project_dir {
        let project_path = dir.join(".neurobatch").join("settings.json");
        if project_path.exists() {
            let project = load_config_file(&project_path)?;
            merge_config(&mut config, project);
        }
    }

    // Apply environment overrides
    apply_env_overrides(&mut config);

    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .ok()
            .map(|h| PathBuf::from(h).join(".neurobatch").join("settings.json"))
    }
    #[cfg(target_os = "macos")]
    {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join("Library/Application Support/neurobatch/settings.json"))
    }
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| std::env::var("HOME").ok().map(|h| PathBuf::from(h).join(".config")))
            .map(|p| p.join("neurobatch").join("settings.json"))
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
    {
        None
    }
}

fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

fn merge_config(base: &mut Config, overlay: Config) {
    base.batch = overlay.batch;

    // Merge tool config field-by-field so a project file can override just
    // one toolchain location.
    if overlay.tools.fsl_dir.is_some() {
        base.tools.fsl_dir = overlay.tools.fsl_dir;
    }
    if overlay.tools.freesurfer_home.is_some() {
        base.tools.freesurfer_home = overlay.tools.freesurfer_home;
    }
    base.tools.fmriprep_image = overlay.tools.fmriprep_image;
}

fn apply_env_overrides(config: &mut Config) {
    if let Ok(val) = std::env::var("NEUROBATCH_MAX_JOBS")
        && let Ok(n) = val.parse()
    {
        config.batch.max_jobs = n;
    }
    if let Ok(val) = std::env::var("NEUROBATCH_TIMEOUT_SECS")
        && let Ok(n) = val.parse()
    {
        config.batch.timeout_secs = Some(n);
    }
    if let Ok(val) = std::env::var("NEUROBATCH_FMRIPREP_IMAGE") {
        config.tools.fmriprep_image = val;
    }
    if let Ok(val) = std::env::var("FSLDIR") {
        config.tools.fsl_dir = Some(PathBuf::from(val));
    }
    if let Ok(val) = std::env::var("FREESURFER_HOME") {
        config.tools.freesurfer_home = Some(PathBuf::from(val));
    }
}
