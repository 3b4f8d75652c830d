//! `neurobatch` Execution Engine
//!
//! Runs a batch of independent per-subject jobs with a bounded level of
//! concurrency. The engine owns no pipeline knowledge: it takes fully-built
//! [`neurobatch_core::Job`]s, executes their steps as child processes with
//! per-job log capture, and aggregates the outcomes into a batch report.

pub mod dispatcher;
pub mod pool;
pub mod report;

pub use dispatcher::Dispatcher;
pub use pool::WorkerPool;
pub use report::{BatchReport, JobOutcome, JobStatus};
