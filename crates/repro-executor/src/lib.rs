//! # repro-executor
//!
//! Running formulas for Repro.
//!
//! An [`Executor`] turns a validated formula into a live [`Job`]: it builds
//! the job filesystem, runs the entrypoint, streams its output, commits the
//! outputs and tears everything down again.

pub mod executor;
pub mod host;
pub mod job;
pub mod mock;

pub use executor::{get, Executor, EXECUTORS};
pub use host::HostExecutor;
pub use job::{job_channel, Completion, Job, JobId, JobOutput, JobSink, OutputEvent, StreamKind};
pub use mock::MockExecutor;
