//! # repro-scheduler
//!
//! Job scheduling for Repro.
//!
//! A [`Scheduler`] accepts formulas, assigns each a [`JobId`] and dispatches
//! it to an executor on its own task. Callers get a [`JobFuture`] that always
//! resolves, even when the job cannot start.
//!
//! [`JobId`]: repro_executor::JobId

pub mod journal;
pub mod queue;
pub mod runner;
pub mod scheduler;
pub mod state;

pub use journal::Journal;
pub use queue::QueueScheduler;
pub use runner::run_formulae;
pub use scheduler::{default_span_factory, get, JobFuture, Scheduler, SpanFactory, SCHEDULERS};
pub use state::{transition, JobEvent, JobState};
