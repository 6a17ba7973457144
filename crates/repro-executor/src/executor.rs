//! Executor abstraction

use async_trait::async_trait;
use repro_core::{Formula, ReproConfig, ReproError, Result};
use std::sync::Arc;

use crate::host::HostExecutor;
use crate::job::{Job, JobId};

/// Runs validated formulas.
///
/// `run` returns once execution has begun (the filesystem is being assembled
/// or the process has launched). Work that cannot even start still yields a
/// [`Job`], whose result carries the error.
///
/// Every implementation must build the job filesystem, launch the
/// entrypoint with the formula's env inside it, stream output, commit each
/// output through its transmat and tear the filesystem down on every exit
/// path.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Name used to select this executor
    fn name(&self) -> &str;

    /// Start running `formula` as job `id`
    async fn run(&self, id: JobId, formula: Formula) -> Job;
}

/// Names of the built-in executors
pub const EXECUTORS: &[&str] = &["host"];

/// Look up an executor by name
pub fn get(name: &str, config: &ReproConfig) -> Result<Arc<dyn Executor>> {
    match name {
        "host" => Ok(Arc::new(HostExecutor::new(config)?)),
        other => Err(ReproError::UnknownType {
            registry: "executor",
            name: other.to_string(),
        }),
    }
}
