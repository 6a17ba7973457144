//! Scripted executor for tests

use async_trait::async_trait;
use chrono::Utc;
use repro_core::{ContentHash, ErrorKind, Formula, JobError, JobResult, Output};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::executor::Executor;
use crate::job::{job_channel, Job, JobId, StreamKind};

/// Mock executor: no processes, no filesystem.
///
/// Every run exits with the scripted code after the scripted delay. Output
/// hashes are derived from the formula, so identical formulas commit
/// identical outputs.
#[derive(Clone, Default)]
pub struct MockExecutor {
    exit_code: i32,
    launch_failure: Option<String>,
    delay: Duration,
    runs: Arc<AtomicUsize>,
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_exit_code(mut self, exit_code: i32) -> Self {
        self.exit_code = exit_code;
        self
    }

    /// Every run fails to launch with `message`
    pub fn failing_launch(mut self, message: impl Into<String>) -> Self {
        self.launch_failure = Some(message.into());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Number of runs requested so far
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    /// Highest number of jobs that were running at the same time
    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Executor for MockExecutor {
    fn name(&self) -> &str {
        "mock"
    }

    async fn run(&self, id: JobId, formula: Formula) -> Job {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.launch_failure {
            return Job::failed(id, JobError::new(ErrorKind::Execution, message.clone()));
        }

        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);

        let (job, sink) = job_channel(id);
        let this = self.clone();
        tokio::spawn(async move {
            let started_at = Utc::now();
            sink.emit(StreamKind::Stdout, format!("mock run {}\n", id).into_bytes());
            if !this.delay.is_zero() {
                tokio::time::sleep(this.delay).await;
            }

            let setup = formula.setup_hash();
            let outputs: BTreeMap<String, Output> = formula
                .outputs
                .iter()
                .map(|spec| {
                    let hash = ContentHash::new(format!("{}-{}", setup, spec.location));
                    (spec.location.clone(), Output::committed(spec.clone(), hash))
                })
                .collect();

            this.active.fetch_sub(1, Ordering::SeqCst);
            sink.finish(JobResult {
                exit_code: this.exit_code,
                error: None,
                outputs,
                started_at: Some(started_at),
                finished_at: Some(Utc::now()),
            });
        });
        job
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use repro_core::OutputSpec;

    #[tokio::test]
    async fn test_mock_exit_code() {
        let executor = MockExecutor::new().with_exit_code(3);
        let mut formula = Formula::default();
        formula.outputs.push(OutputSpec::new("dir", "/out"));

        let mut job = executor.run(JobId::new(), formula.clone()).await;
        let output = job.take_output().unwrap().collect().await;
        assert!(String::from_utf8(output).unwrap().starts_with("mock run"));

        let result = job.wait().await;
        assert_eq!(result.exit_code, 3);
        assert!(result.error.is_none());

        let again = executor.run(JobId::new(), formula).await.wait().await;
        assert_eq!(result.outputs, again.outputs);
        assert_eq!(executor.runs(), 2);
    }

    #[tokio::test]
    async fn test_mock_launch_failure() {
        let executor = MockExecutor::new().failing_launch("no sandbox");
        let result = executor.run(JobId::new(), Formula::default()).await.wait().await;
        let error = result.error.unwrap();
        assert_eq!(error.kind, ErrorKind::Execution);
        assert_eq!(error.message(), "no sandbox");
    }
}
