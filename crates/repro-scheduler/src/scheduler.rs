//! Scheduler abstraction

use repro_core::{ErrorKind, Formula, JobError, ReproConfig, ReproError, Result};
use repro_executor::{Executor, Job, JobId};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tracing::Span;

use crate::queue::QueueScheduler;
use crate::state::JobState;

/// Builds the tracing span each job runs under, from its id and sequence number
pub type SpanFactory = Arc<dyn Fn(JobId, u64) -> Span + Send + Sync>;

/// Span factory used when the caller has no preference
pub fn default_span_factory() -> SpanFactory {
    Arc::new(|id, seq| tracing::info_span!("job", id = %id, seq))
}

/// Queues formulas and dispatches them to an executor.
///
/// `configure` and `start` are called once, before the scheduler is shared;
/// `schedule` may then be called from any number of tasks at once.
pub trait Scheduler: Send + Sync {
    /// Name used to select this scheduler
    fn name(&self) -> &str;

    /// Bind the executor. `expected_jobs` is a capacity hint, not a limit.
    fn configure(
        &mut self,
        executor: Arc<dyn Executor>,
        expected_jobs: usize,
        spans: SpanFactory,
    ) -> Result<()>;

    /// Begin dispatching queued jobs
    fn start(&mut self) -> Result<()>;

    /// Enqueue a formula and return immediately.
    ///
    /// The formula is validated here; a malformed formula is rejected before
    /// any job exists.
    fn schedule(&self, formula: Formula) -> Result<(JobId, JobFuture)>;

    /// Current lifecycle state of a job submitted to this scheduler
    fn state(&self, id: JobId) -> Option<JobState>;
}

/// Resolves to the [`Job`] once its execution has begun.
///
/// Always resolves: if the scheduler loses the job before it starts, the
/// result is a job that failed with an internal error.
#[derive(Debug)]
pub struct JobFuture {
    id: JobId,
    rx: oneshot::Receiver<Job>,
}

impl JobFuture {
    pub(crate) fn new(id: JobId, rx: oneshot::Receiver<Job>) -> Self {
        Self { id, rx }
    }

    pub fn id(&self) -> JobId {
        self.id
    }
}

impl Future for JobFuture {
    type Output = Job;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Job> {
        let id = self.id;
        Pin::new(&mut self.rx).poll(cx).map(|received| {
            received.unwrap_or_else(|_| {
                Job::failed(
                    id,
                    JobError::new(ErrorKind::Internal, "scheduler dropped the job before it started"),
                )
            })
        })
    }
}

/// Names of the built-in schedulers
pub const SCHEDULERS: &[&str] = &["linear", "pool"];

/// Look up a scheduler by name
pub fn get(name: &str, config: &ReproConfig) -> Result<Box<dyn Scheduler>> {
    match name {
        "linear" => Ok(Box::new(QueueScheduler::linear())),
        "pool" => Ok(Box::new(QueueScheduler::pool(
            config.effective_concurrency(),
        ))),
        other => Err(ReproError::UnknownType {
            registry: "scheduler",
            name: other.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_future_resolves_when_sender_dropped() {
        let (tx, rx) = oneshot::channel();
        let id = JobId::new();
        let future = JobFuture::new(id, rx);
        assert_eq!(future.id(), id);
        drop(tx);

        let job = future.await;
        assert_eq!(job.id(), id);
        let result = job.wait().await;
        assert_eq!(result.error.unwrap().kind, ErrorKind::Internal);
    }

    #[test]
    fn test_registry() {
        let config = ReproConfig {
            concurrency: Some(3),
            ..Default::default()
        };
        assert_eq!(get("linear", &config).unwrap().name(), "linear");
        assert_eq!(get("pool", &config).unwrap().name(), "pool");

        let err = get("cluster", &config).err().unwrap();
        assert!(matches!(
            err,
            ReproError::UnknownType { registry: "scheduler", .. }
        ));
    }
}
