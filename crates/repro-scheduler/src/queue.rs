//! FIFO queue scheduler with a bounded number of execution slots
//!
//! `linear` runs one job at a time; `pool` runs up to N at once. Jobs leave
//! the queue in submission order either way. Only the most recently completed
//! jobs keep a queryable state; older ones are forgotten.

use repro_core::{validate, Formula, ReproError, Result};
use repro_executor::{Executor, Job, JobId};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot, Semaphore};
use tracing::{debug, info, warn, Instrument};

use crate::scheduler::{JobFuture, Scheduler, SpanFactory};
use crate::state::{transition, JobEvent, JobState};

/// Completed jobs whose state stays queryable by default
pub const DEFAULT_RETENTION: usize = 1024;

type States = Arc<Mutex<JobTable>>;

/// Live job states plus a bounded window of completed ones
#[derive(Debug, Default)]
struct JobTable {
    states: HashMap<JobId, JobState>,
    completed: VecDeque<JobId>,
    retention: usize,
}

impl JobTable {
    fn new(retention: usize) -> Self {
        Self {
            retention,
            ..Default::default()
        }
    }

    fn advance(&mut self, id: JobId, event: JobEvent) {
        let Some(state) = self.states.get_mut(&id) else {
            return;
        };
        let was_completed = *state == JobState::Completed;
        *state = transition(*state, event);
        if !was_completed && *state == JobState::Completed {
            self.completed.push_back(id);
            while self.completed.len() > self.retention {
                if let Some(old) = self.completed.pop_front() {
                    self.states.remove(&old);
                }
            }
        }
    }
}

struct Submission {
    id: JobId,
    seq: u64,
    formula: Formula,
    reply: oneshot::Sender<Job>,
}

/// Bound executor plus the submission queue feeding it
struct Binding {
    executor: Arc<dyn Executor>,
    spans: SpanFactory,
    tx: mpsc::UnboundedSender<Submission>,
    rx: Option<mpsc::UnboundedReceiver<Submission>>,
}

/// Queue-backed scheduler
pub struct QueueScheduler {
    name: &'static str,
    concurrency: usize,
    binding: Option<Binding>,
    next_seq: AtomicU64,
    states: States,
}

impl QueueScheduler {
    /// One job at a time, in submission order
    pub fn linear() -> Self {
        Self::with_concurrency("linear", 1)
    }

    /// Up to `concurrency` jobs at a time
    pub fn pool(concurrency: usize) -> Self {
        Self::with_concurrency("pool", concurrency)
    }

    fn with_concurrency(name: &'static str, concurrency: usize) -> Self {
        Self {
            name,
            concurrency: concurrency.max(1),
            binding: None,
            next_seq: AtomicU64::new(0),
            states: Arc::new(Mutex::new(JobTable::new(DEFAULT_RETENTION))),
        }
    }

    /// Keep the state of at most `retention` completed jobs
    pub fn with_retention(self, retention: usize) -> Self {
        lock(&self.states).retention = retention;
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }
}

impl Scheduler for QueueScheduler {
    fn name(&self) -> &str {
        self.name
    }

    fn configure(
        &mut self,
        executor: Arc<dyn Executor>,
        expected_jobs: usize,
        spans: SpanFactory,
    ) -> Result<()> {
        if matches!(&self.binding, Some(binding) if binding.rx.is_none()) {
            return Err(ReproError::Scheduler(
                "cannot reconfigure a started scheduler".to_string(),
            ));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.binding = Some(Binding {
            executor,
            spans,
            tx,
            rx: Some(rx),
        });
        lock(&self.states).states.reserve(expected_jobs);
        debug!(
            "Configured {} scheduler for {} jobs, {} at a time",
            self.name, expected_jobs, self.concurrency
        );
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        let binding = self
            .binding
            .as_mut()
            .ok_or_else(|| ReproError::Scheduler("scheduler is not configured".to_string()))?;
        let rx = binding
            .rx
            .take()
            .ok_or_else(|| ReproError::Scheduler("scheduler already started".to_string()))?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            ReproError::Scheduler(format!("scheduler needs a tokio runtime: {}", e))
        })?;

        runtime.spawn(dispatch(
            rx,
            binding.executor.clone(),
            binding.spans.clone(),
            self.states.clone(),
            self.concurrency,
        ));
        info!("{} scheduler started", self.name);
        Ok(())
    }

    fn schedule(&self, formula: Formula) -> Result<(JobId, JobFuture)> {
        let binding = self
            .binding
            .as_ref()
            .ok_or_else(|| ReproError::Scheduler("scheduler is not configured".to_string()))?;
        let formula = validate(formula)?;

        let id = JobId::new();
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let (reply, rx) = oneshot::channel();

        lock(&self.states).states.insert(id, JobState::Queued);
        binding
            .tx
            .send(Submission {
                id,
                seq,
                formula,
                reply,
            })
            .map_err(|_| {
                lock(&self.states).states.remove(&id);
                ReproError::Scheduler("scheduler is no longer accepting jobs".to_string())
            })?;

        debug!("Queued job {} as #{}", id, seq);
        Ok((id, JobFuture::new(id, rx)))
    }

    fn state(&self, id: JobId) -> Option<JobState> {
        lock(&self.states).states.get(&id).copied()
    }
}

/// Hand queued jobs to the executor as slots free up
async fn dispatch(
    mut rx: mpsc::UnboundedReceiver<Submission>,
    executor: Arc<dyn Executor>,
    spans: SpanFactory,
    states: States,
    concurrency: usize,
) {
    let slots = Arc::new(Semaphore::new(concurrency));

    while let Some(submission) = rx.recv().await {
        let Ok(permit) = slots.clone().acquire_owned().await else {
            warn!("Execution slots closed; dropping queued jobs");
            break;
        };

        let executor = executor.clone();
        let states = states.clone();
        let span = spans(submission.id, submission.seq);
        tokio::spawn(
            async move {
                let Submission {
                    id, formula, reply, ..
                } = submission;
                advance(&states, id, JobEvent::Dispatched);

                let job = executor.run(id, formula).await;
                advance(&states, id, JobEvent::Launched);

                let completion = job.completion();
                if reply.send(job).is_err() {
                    debug!("Nobody is waiting for job {}", id);
                }

                // the slot stays taken until the job is fully done
                let result = completion.wait().await;
                advance(&states, id, JobEvent::Finished);
                debug!("Job {} released its slot (exit code {})", id, result.exit_code);
                drop(permit);
            }
            .instrument(span),
        );
    }
    debug!("Dispatcher drained");
}

fn advance(states: &States, id: JobId, event: JobEvent) {
    lock(states).advance(id, event);
}

fn lock(states: &States) -> std::sync::MutexGuard<'_, JobTable> {
    states.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finish(table: &mut JobTable, id: JobId) {
        table.states.insert(id, JobState::Queued);
        for event in [JobEvent::Dispatched, JobEvent::Launched, JobEvent::Finished] {
            table.advance(id, event);
        }
    }

    #[test]
    fn test_table_forgets_oldest_completed() {
        let mut table = JobTable::new(2);
        let ids: Vec<JobId> = (0..3).map(|_| JobId::new()).collect();
        let running = JobId::new();
        table.states.insert(running, JobState::Queued);

        for id in &ids {
            finish(&mut table, *id);
        }
        assert!(!table.states.contains_key(&ids[0]));
        assert_eq!(table.states.get(&ids[2]), Some(&JobState::Completed));
        assert_eq!(table.states.get(&running), Some(&JobState::Queued));

        // a repeated finish is not counted twice
        table.advance(ids[2], JobEvent::Finished);
        assert_eq!(table.completed.len(), 2);
        assert!(table.states.contains_key(&ids[1]));
    }
}
