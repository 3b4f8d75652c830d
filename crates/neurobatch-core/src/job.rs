//! The Job/Step data model handed to the dispatcher.
//!
//! A [`Job`] is one subject's worth of work: an ordered list of external
//! commands ([`Step`]s) that run sequentially, sharing one log file. Jobs
//! are immutable once built; all path plumbing happens in the pipeline
//! builders, never inside the dispatcher.

use std::fmt;
use std::path::PathBuf;

/// One external command invocation: program, argument list and any extra
/// environment variables. Arguments stay a structured list end to end —
/// nothing is ever joined into a shell string for execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub program: String,
    pub args: Vec<String>,
    pub envs: Vec<(String, String)>,
}

impl Step {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }
}

impl fmt::Display for Step {
    /// Space-joined command line, echoed into job logs before execution.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// One unit of batch work: a subject id, the steps to run for it, and the
/// file its combined stdout/stderr is captured to.
#[derive(Debug, Clone)]
pub struct Job {
    pub subject: String,
    pub steps: Vec<Step>,
    pub log_path: PathBuf,
}

impl Job {
    pub fn new(subject: impl Into<String>, log_path: impl Into<PathBuf>) -> Self {
        Self {
            subject: subject.into(),
            steps: Vec::new(),
            log_path: log_path.into(),
        }
    }

    #[must_use]
    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }
}
