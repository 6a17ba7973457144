//! Run a batch of formulas to completion

use futures::future::{join_all, ready, BoxFuture, FutureExt};
use repro_core::{validate, Formula, JobResult, Result};
use repro_executor::{Executor, JobId};
use std::sync::Arc;
use tracing::{info, warn};

use crate::journal::Journal;
use crate::scheduler::{default_span_factory, JobFuture, Scheduler};

/// Configure `scheduler` for exactly `formulas.len()` jobs, run them all and
/// return their results in submission order.
///
/// Every formula is validated before anything runs, so a malformed batch
/// fails as a whole. A job the scheduler refuses later is journaled and
/// reported as failed in its slot while the rest still run to completion.
///
/// Lifecycle lines and each job's output go to `journal` as they happen.
pub async fn run_formulae(
    scheduler: &mut dyn Scheduler,
    executor: Arc<dyn Executor>,
    journal: &Journal,
    formulas: Vec<Formula>,
) -> Result<Vec<JobResult>> {
    let formulas = formulas
        .into_iter()
        .map(validate)
        .collect::<Result<Vec<_>>>()?;

    scheduler.configure(executor, formulas.len(), default_span_factory())?;
    scheduler.start()?;

    let mut followers: Vec<BoxFuture<'static, JobResult>> = Vec::with_capacity(formulas.len());
    for (x, formula) in formulas.into_iter().enumerate() {
        let n = x + 1;
        match scheduler.schedule(formula) {
            Ok((id, future)) => {
                journal.queued(n, id);
                followers.push(follow(journal.clone(), n, id, future).boxed());
            }
            Err(e) => {
                warn!("Scheduler refused job {}: {}", n, e);
                journal.rejected(n, &e.to_string());
                followers.push(ready(JobResult::failed(e)).boxed());
            }
        }
    }

    let results = join_all(followers).await;
    info!("{} jobs done", results.len());
    Ok(results)
}

async fn follow(journal: Journal, n: usize, id: JobId, future: JobFuture) -> JobResult {
    let mut job = future.await;
    journal.starting(n, id);

    if let Some(mut output) = job.take_output() {
        while let Some(chunk) = output.read_chunk().await {
            journal.output(&chunk);
        }
    }

    let result = job.wait().await;
    match &result.error {
        Some(error) => journal.failed(n, id, error.message()),
        None => journal.finished(n, id, &result),
    }
    result
}
