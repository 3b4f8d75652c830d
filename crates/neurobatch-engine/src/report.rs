//! Batch outcome aggregation.
//!
//! Every job ends in exactly one [`JobStatus`]; the [`BatchReport`] collects
//! them after the join-all barrier and renders the user-facing summary. The
//! report is also how failures reach the process exit code: callers check
//! [`BatchReport::is_success`] after `run_all` returns.

use std::fmt::Write as _;
use std::time::Duration;

/// Terminal state of a single job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    /// All steps exited zero.
    Completed,
    /// A step exited non-zero or could not be started.
    Failed {
        reason: String,
    },
    /// The job exceeded the configured per-job time limit and was terminated.
    TimedOut,
}

/// Result of one job after it reached a terminal state.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub subject: String,
    pub status: JobStatus,
    pub duration: Duration,
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Completed
    }
}

/// Aggregated result of a whole batch.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub total: usize,
    pub completed: usize,
    pub outcomes: Vec<JobOutcome>,
    /// Highest number of simultaneously running jobs observed by the pool.
    pub peak_active: usize,
    pub duration: Duration,
}

impl BatchReport {
    /// Report for an empty job set.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_outcomes(outcomes: Vec<JobOutcome>, peak_active: usize, duration: Duration) -> Self {
        let total = outcomes.len();
        let completed = outcomes.iter().filter(|o| o.is_success()).count();
        Self {
            total,
            completed,
            outcomes,
            peak_active,
            duration,
        }
    }

    /// Whether every job in the batch completed successfully.
    pub fn is_success(&self) -> bool {
        self.completed == self.total
    }

    /// Jobs that did not complete, in launch order.
    pub fn failures(&self) -> impl Iterator<Item = &JobOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }

    /// Human-readable summary printed when the batch finishes.
    pub fn render(&self) -> String {
        let mut out = String::new();
        if self.total == 0 {
            out.push_str("No jobs to run.\n");
            return out;
        }

        let _ = writeln!(
            out,
            "Batch complete: {}/{} succeeded in {:.1}s (peak concurrency {})",
            self.completed,
            self.total,
            self.duration.as_secs_f64(),
            self.peak_active,
        );

        if !self.is_success() {
            out.push_str("Failed subjects:\n");
            for outcome in self.failures() {
                match &outcome.status {
                    JobStatus::Failed { reason } => {
                        let _ = writeln!(out, "  {}: {reason}", outcome.subject);
                    }
                    JobStatus::TimedOut => {
                        let _ = writeln!(
                            out,
                            "  {}: timed out after {:.1}s",
                            outcome.subject,
                            outcome.duration.as_secs_f64()
                        );
                    }
                    JobStatus::Completed => {}
                }
            }
        }
        out
    }
}
