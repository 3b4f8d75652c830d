//! Bounded concurrent batch dispatcher.
//!
//! [`Dispatcher`] is the completion barrier around a batch:
//! - spawns one task per job; each task holds a [`WorkerPool`] permit from
//!   before its first child process starts until its last one exits
//! - redirects each job's combined stdout/stderr to its own log file,
//!   echoing every command line before it runs
//! - enforces the optional per-job timeout (SIGTERM -> 5 s grace -> SIGKILL)
//! - joins every task handle before returning, so a job's terminal state is
//!   tracked explicitly rather than inferred from process-table liveness
//!
//! A failing job never cancels its siblings; failures surface in the
//! [`BatchReport`] after the barrier.

use std::io::Write as _;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tracing::{error, info, warn};

use neurobatch_core::{Job, Step};

use crate::pool::WorkerPool;
use crate::report::{BatchReport, JobOutcome, JobStatus};

/// Grace period after SIGTERM before SIGKILL.
const GRACE_PERIOD_SECS: u64 = 5;

/// Executes a batch of independent jobs with bounded concurrency.
pub struct Dispatcher {
    pool: Arc<WorkerPool>,
    timeout: Option<Duration>,
}

impl Dispatcher {
    /// Create a dispatcher with the given slot count (0 falls back to the
    /// pool default).
    pub fn new(max_jobs: usize) -> Self {
        Self {
            pool: Arc::new(WorkerPool::new(max_jobs)),
            timeout: None,
        }
    }

    /// Set a per-job wall-clock limit covering all of a job's steps.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The underlying worker pool.
    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Run every job to a terminal state and aggregate the outcomes.
    ///
    /// Launches each job exactly once and returns only after all launched
    /// jobs have terminated. At every instant the number of running jobs is
    /// bounded by the pool's slot count.
    pub async fn run_all(&self, jobs: Vec<Job>) -> BatchReport {
        let batch_start = Instant::now();
        if jobs.is_empty() {
            info!("No jobs to execute in batch");
            return BatchReport::empty();
        }

        let total = jobs.len();
        info!(
            total_jobs = total,
            max_jobs = self.pool.max_jobs(),
            timeout = ?self.timeout,
            "Starting batch"
        );

        let mut tasks = Vec::with_capacity(total);
        for job in jobs {
            let pool = Arc::clone(&self.pool);
            let timeout = self.timeout;
            let subject = job.subject.clone();

            let task = tokio::spawn(async move {
                let permit = match pool.acquire().await {
                    Ok(permit) => permit,
                    Err(e) => {
                        return JobOutcome {
                            subject: job.subject,
                            status: JobStatus::Failed {
                                reason: e.to_string(),
                            },
                            duration: Duration::ZERO,
                        };
                    }
                };
                pool.register(&job.subject).await;
                info!(subject = %job.subject, "Job started");

                let outcome = run_job(&job, timeout).await;

                pool.unregister(&job.subject).await;
                drop(permit);

                match &outcome.status {
                    JobStatus::Completed => {
                        info!(subject = %outcome.subject, duration = ?outcome.duration, "Job completed");
                    }
                    JobStatus::Failed { reason } => {
                        warn!(subject = %outcome.subject, reason = %reason, "Job failed");
                    }
                    JobStatus::TimedOut => {
                        warn!(subject = %outcome.subject, duration = ?outcome.duration, "Job timed out");
                    }
                }
                outcome
            });
            tasks.push((subject, task));
        }

        // Join-all barrier: every job's terminal state flows back through
        // its own task handle.
        let mut outcomes = Vec::with_capacity(total);
        for (subject, task) in tasks {
            match task.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    error!(subject = %subject, error = %e, "Job task join error");
                    outcomes.push(JobOutcome {
                        subject,
                        status: JobStatus::Failed {
                            reason: format!("Task join error: {e}"),
                        },
                        duration: Duration::ZERO,
                    });
                }
            }
        }

        BatchReport::from_outcomes(outcomes, self.pool.peak_active(), batch_start.elapsed())
    }
}

/// Run one job's steps sequentially, sharing a log file and time budget.
async fn run_job(job: &Job, timeout: Option<Duration>) -> JobOutcome {
    let start = Instant::now();
    let deadline = timeout.map(|t| start + t);

    let mut log = match open_log(&job.log_path) {
        Ok(file) => file,
        Err(e) => {
            return JobOutcome {
                subject: job.subject.clone(),
                status: JobStatus::Failed {
                    reason: format!("Failed to create log file {}: {e}", job.log_path.display()),
                },
                duration: start.elapsed(),
            };
        }
    };

    let mut status = JobStatus::Completed;
    for step in &job.steps {
        let _ = writeln!(log, "[CMD]: {step}");
        let _ = log.flush();

        match run_step(step, &log, deadline).await {
            StepOutcome::Success => {}
            StepOutcome::Failed(reason) => {
                status = JobStatus::Failed { reason };
                break;
            }
            StepOutcome::TimedOut => {
                status = JobStatus::TimedOut;
                break;
            }
        }
    }

    match &status {
        JobStatus::Completed => {
            let _ = writeln!(log, "[DONE]");
        }
        JobStatus::Failed { reason } => {
            let _ = writeln!(log, "[FAIL] {reason}");
        }
        JobStatus::TimedOut => {
            let _ = writeln!(log, "[TIMEOUT]");
        }
    }

    JobOutcome {
        subject: job.subject.clone(),
        status,
        duration: start.elapsed(),
    }
}

/// Terminal state of a single step.
enum StepOutcome {
    Success,
    Failed(String),
    TimedOut,
}

/// Spawn one external command with its output redirected to the job log,
/// and wait for it within whatever remains of the job's time budget.
async fn run_step(step: &Step, log: &std::fs::File, deadline: Option<Instant>) -> StepOutcome {
    let (stdout, stderr) = match (log.try_clone(), log.try_clone()) {
        (Ok(out), Ok(err)) => (out, err),
        (Err(e), _) | (_, Err(e)) => {
            return StepOutcome::Failed(format!("Failed to clone log handle: {e}"));
        }
    };

    let mut cmd = Command::new(&step.program);
    cmd.args(&step.args)
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr));
    for (key, value) in &step.envs {
        cmd.env(key, value);
    }

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => return StepOutcome::Failed(format!("Failed to start {}: {e}", step.program)),
    };

    if let Some(deadline) = deadline {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match tokio::time::timeout(remaining, child.wait()).await {
            Ok(Ok(exit)) if exit.success() => StepOutcome::Success,
            Ok(Ok(exit)) => StepOutcome::Failed(exit_detail(&step.program, exit)),
            Ok(Err(e)) => {
                StepOutcome::Failed(format!("Process wait error for {}: {e}", step.program))
            }
            Err(_) => {
                terminate_process(&mut child).await;
                StepOutcome::TimedOut
            }
        }
    } else {
        match child.wait().await {
            Ok(exit) if exit.success() => StepOutcome::Success,
            Ok(exit) => StepOutcome::Failed(exit_detail(&step.program, exit)),
            Err(e) => StepOutcome::Failed(format!("Process wait error for {}: {e}", step.program)),
        }
    }
}

fn exit_detail(program: &str, exit: std::process::ExitStatus) -> String {
    exit.code().map_or_else(
        || format!("{program} terminated by signal"),
        |code| format!("{program} exited with code {code}"),
    )
}

fn open_log(path: &Path) -> std::io::Result<std::fs::File> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::File::create(path)
}

/// Terminate a process: SIGTERM, wait grace period, then SIGKILL.
async fn terminate_process(child: &mut tokio::process::Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            #[allow(unsafe_code, clippy::cast_possible_wrap)]
            let ret = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
            if ret != 0 {
                let err = std::io::Error::last_os_error();
                warn!(pid, error = %err, "Failed to send SIGTERM");
            }
        }
    }

    if tokio::time::timeout(Duration::from_secs(GRACE_PERIOD_SECS), child.wait())
        .await
        .is_err()
    {
        warn!("Grace period expired, sending SIGKILL");
        let _ = child.kill().await;
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sh(cmdline: &str) -> Step {
        Step::new("sh").args(["-c", cmdline])
    }

    fn job(dir: &TempDir, subject: &str, steps: Vec<Step>) -> Job {
        let mut job = Job::new(subject, dir.path().join(format!("{subject}.log")));
        for step in steps {
            job = job.step(step);
        }
        job
    }

    #[tokio::test]
    async fn empty_batch_returns_immediately() {
        let report = Dispatcher::new(2).run_all(Vec::new()).await;
        assert_eq!(report.total, 0);
        assert!(report.is_success());
    }

    #[tokio::test]
    async fn all_jobs_complete_with_bounded_concurrency() {
        let dir = TempDir::new().unwrap();
        let jobs: Vec<Job> = ["a", "b", "c", "d", "e"]
            .iter()
            .map(|s| job(&dir, s, vec![sh("sleep 0.2")]))
            .collect();

        let dispatcher = Dispatcher::new(2);
        let report = dispatcher.run_all(jobs).await;

        assert_eq!(report.total, 5);
        assert_eq!(report.completed, 5);
        assert!(report.is_success());
        assert!(
            report.peak_active <= 2,
            "peak {} exceeded slot count",
            report.peak_active
        );
    }

    #[tokio::test]
    async fn slots_exceeding_jobs_allow_full_parallelism() {
        let dir = TempDir::new().unwrap();
        let jobs: Vec<Job> = ["a", "b", "c"]
            .iter()
            .map(|s| job(&dir, s, vec![sh("sleep 0.4")]))
            .collect();

        let report = Dispatcher::new(8).run_all(jobs).await;
        assert_eq!(report.completed, 3);
        assert_eq!(report.peak_active, 3);
    }

    #[tokio::test]
    async fn failing_job_does_not_cancel_siblings() {
        let dir = TempDir::new().unwrap();
        let jobs = vec![
            job(&dir, "a", vec![sh("true")]),
            job(&dir, "b", vec![sh("exit 3")]),
            job(&dir, "c", vec![sh("true")]),
        ];

        let report = Dispatcher::new(2).run_all(jobs).await;
        assert_eq!(report.total, 3);
        assert_eq!(report.completed, 2);

        let failures: Vec<&JobOutcome> = report.failures().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].subject, "b");
        match &failures[0].status {
            JobStatus::Failed { reason } => {
                assert!(reason.contains("exited with code 3"), "reason: {reason}");
            }
            other => panic!("Expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unstartable_command_is_reported_not_hung() {
        let dir = TempDir::new().unwrap();
        let jobs = vec![
            job(&dir, "bad", vec![Step::new("/nonexistent/neuro-tool")]),
            job(&dir, "good", vec![sh("true")]),
        ];

        let report = Dispatcher::new(1).run_all(jobs).await;
        assert_eq!(report.completed, 1);

        let failures: Vec<&JobOutcome> = report.failures().collect();
        assert_eq!(failures[0].subject, "bad");
        match &failures[0].status {
            JobStatus::Failed { reason } => {
                assert!(reason.contains("Failed to start"), "reason: {reason}");
            }
            other => panic!("Expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn later_steps_are_skipped_after_a_failure() {
        let dir = TempDir::new().unwrap();
        let jobs = vec![job(
            &dir,
            "multi",
            vec![sh("echo first-step"), sh("exit 1"), sh("echo never-runs")],
        )];

        let report = Dispatcher::new(1).run_all(jobs).await;
        assert_eq!(report.completed, 0);

        let log = std::fs::read_to_string(dir.path().join("multi.log")).unwrap();
        assert!(log.contains("[CMD]: sh -c echo first-step"));
        assert!(log.contains("first-step"));
        assert!(log.contains("[FAIL]"));
        assert!(!log.contains("never-runs"));
    }

    #[tokio::test]
    async fn per_job_timeout_terminates_hung_job() {
        let dir = TempDir::new().unwrap();
        let jobs = vec![job(&dir, "hung", vec![sh("sleep 30")])];

        let started = Instant::now();
        let report = Dispatcher::new(1)
            .with_timeout(Duration::from_millis(200))
            .run_all(jobs)
            .await;

        assert_eq!(report.completed, 0);
        let failures: Vec<&JobOutcome> = report.failures().collect();
        assert_eq!(failures[0].status, JobStatus::TimedOut);
        assert!(
            started.elapsed() < Duration::from_secs(10),
            "timeout did not interrupt the hung job"
        );

        let log = std::fs::read_to_string(dir.path().join("hung.log")).unwrap();
        assert!(log.contains("[TIMEOUT]"));
    }

    #[tokio::test]
    async fn timeout_budget_spans_all_steps() {
        let dir = TempDir::new().unwrap();
        let jobs = vec![job(
            &dir,
            "budget",
            vec![sh("sleep 0.3"), sh("sleep 30")],
        )];

        let report = Dispatcher::new(1)
            .with_timeout(Duration::from_millis(500))
            .run_all(jobs)
            .await;

        let failures: Vec<&JobOutcome> = report.failures().collect();
        assert_eq!(failures[0].status, JobStatus::TimedOut);
    }

    #[tokio::test]
    async fn log_captures_stdout_and_stderr() {
        let dir = TempDir::new().unwrap();
        let jobs = vec![job(
            &dir,
            "sub01",
            vec![sh("echo to-stdout; echo to-stderr 1>&2")],
        )];

        let report = Dispatcher::new(1).run_all(jobs).await;
        assert!(report.is_success());

        let log = std::fs::read_to_string(dir.path().join("sub01.log")).unwrap();
        assert!(log.contains("[CMD]: sh -c"));
        assert!(log.contains("to-stdout"));
        assert!(log.contains("to-stderr"));
        assert!(log.contains("[DONE]"));
    }

    #[tokio::test]
    async fn log_directory_is_created_when_missing() {
        let dir = TempDir::new().unwrap();
        let log_path = dir.path().join("logs").join("nested").join("sub01.log");
        let jobs = vec![Job::new("sub01", log_path.clone()).step(sh("true"))];

        let report = Dispatcher::new(1).run_all(jobs).await;
        assert!(report.is_success());
        assert!(log_path.exists());
    }
}
