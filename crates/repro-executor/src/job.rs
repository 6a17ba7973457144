//! Live job handles
//!
//! A [`Job`] is the running counterpart of a formula: it streams the task's
//! output while it runs and resolves to exactly one [`JobResult`]. The
//! executor drives it through the paired [`JobSink`].

use repro_core::{ErrorKind, JobError, JobResult};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

/// Identifier assigned to a job at submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| format!("Invalid job id {}: {}", s, e))
    }
}

/// Which process stream a chunk of output came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdout => write!(f, "stdout"),
            Self::Stderr => write!(f, "stderr"),
        }
    }
}

/// One chunk of captured output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputEvent {
    pub stream: StreamKind,
    pub data: Vec<u8>,
}

/// Live output of a running job.
///
/// Chunks arrive in the order they were captured. How stdout and stderr
/// interleave is not guaranteed to be identical between runs.
#[derive(Debug)]
pub struct JobOutput {
    events: mpsc::UnboundedReceiver<OutputEvent>,
}

impl JobOutput {
    /// Next tagged chunk, or `None` once the job's output is closed
    pub async fn next_event(&mut self) -> Option<OutputEvent> {
        self.events.recv().await
    }

    /// Next chunk of the combined stream, or `None` once closed
    pub async fn read_chunk(&mut self) -> Option<Vec<u8>> {
        self.next_event().await.map(|event| event.data)
    }

    /// Drain the combined stream into `writer`, returning the bytes copied
    pub async fn copy_to<W: std::io::Write>(&mut self, writer: &mut W) -> std::io::Result<u64> {
        let mut copied = 0u64;
        while let Some(chunk) = self.read_chunk().await {
            writer.write_all(&chunk)?;
            copied += chunk.len() as u64;
        }
        writer.flush()?;
        Ok(copied)
    }

    /// Drain the combined stream into memory
    pub async fn collect(mut self) -> Vec<u8> {
        let mut all = Vec::new();
        while let Some(chunk) = self.read_chunk().await {
            all.extend_from_slice(&chunk);
        }
        all
    }
}

/// Handle to a started job.
///
/// Output is buffered without bound until it is read. A holder that has no
/// use for the live stream should call [`Job::discard_output`]; the `$stdio`
/// output keeps a full copy either way.
#[derive(Debug)]
pub struct Job {
    id: JobId,
    output: Option<JobOutput>,
    result: watch::Receiver<Option<JobResult>>,
}

/// Waits for a job's result without owning the job
#[derive(Debug, Clone)]
pub struct Completion {
    result: watch::Receiver<Option<JobResult>>,
}

impl Completion {
    /// Block until the job's result is known.
    ///
    /// If the job's driver vanished without reporting, a failed result is
    /// returned rather than waiting forever.
    pub async fn wait(&self) -> JobResult {
        let mut rx = self.result.clone();
        let outcome = rx.wait_for(Option::is_some).await.map(|r| r.clone());
        match outcome {
            Ok(Some(result)) => result,
            _ => JobResult::failed(JobError::new(
                ErrorKind::Internal,
                "job runner exited without reporting a result",
            )),
        }
    }

    /// The result, if the job has finished
    pub fn poll(&self) -> Option<JobResult> {
        self.result.borrow().clone()
    }
}

impl Job {
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Take the live output stream. Only the first caller gets it.
    pub fn take_output(&mut self) -> Option<JobOutput> {
        self.output.take()
    }

    /// Stop buffering live output; later chunks are dropped at the sink
    pub fn discard_output(&mut self) {
        self.output = None;
    }

    /// Wait for the job to finish
    pub async fn wait(&self) -> JobResult {
        self.completion().wait().await
    }

    /// The result, if the job has finished
    pub fn poll(&self) -> Option<JobResult> {
        self.completion().poll()
    }

    pub fn completion(&self) -> Completion {
        Completion {
            result: self.result.clone(),
        }
    }

    /// A job that failed before it could start
    pub fn failed(id: JobId, error: impl Into<JobError>) -> Self {
        let (job, sink) = job_channel(id);
        sink.finish(JobResult::failed(error));
        job
    }
}

/// Executor side of a job: feeds output and reports the result
#[derive(Debug)]
pub struct JobSink {
    id: JobId,
    events: mpsc::UnboundedSender<OutputEvent>,
    result: watch::Sender<Option<JobResult>>,
}

impl JobSink {
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Forward captured output. Dropped silently if nobody is listening.
    pub fn emit(&self, stream: StreamKind, data: Vec<u8>) {
        let _ = self.events.send(OutputEvent { stream, data });
    }

    /// Close the output stream and publish the result
    pub fn finish(self, result: JobResult) {
        let Self { events, result: tx, .. } = self;
        drop(events);
        tx.send_replace(Some(result));
    }
}

/// Create a connected job handle and sink
pub fn job_channel(id: JobId) -> (Job, JobSink) {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (result_tx, result_rx) = watch::channel(None);

    let job = Job {
        id,
        output: Some(JobOutput { events: events_rx }),
        result: result_rx,
    };
    let sink = JobSink {
        id,
        events: events_tx,
        result: result_tx,
    };
    (job, sink)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn ok_result(code: i32) -> JobResult {
        JobResult {
            exit_code: code,
            error: None,
            outputs: BTreeMap::new(),
            started_at: None,
            finished_at: None,
        }
    }

    #[tokio::test]
    async fn test_output_then_result() {
        let (mut job, sink) = job_channel(JobId::new());
        let mut output = job.take_output().unwrap();
        assert!(job.take_output().is_none());

        sink.emit(StreamKind::Stdout, b"hello ".to_vec());
        sink.emit(StreamKind::Stderr, b"world".to_vec());
        assert!(job.poll().is_none());
        sink.finish(ok_result(0));

        let first = output.next_event().await.unwrap();
        assert_eq!(first.stream, StreamKind::Stdout);
        assert_eq!(output.collect().await, b"world");
        assert_eq!(job.wait().await.exit_code, 0);
        assert_eq!(job.poll().unwrap().exit_code, 0);
    }

    #[tokio::test]
    async fn test_dropped_sink_does_not_hang() {
        let (job, sink) = job_channel(JobId::new());
        drop(sink);
        let result = job.wait().await;
        assert_eq!(result.error.unwrap().kind, ErrorKind::Internal);
    }

    #[tokio::test]
    async fn test_failed_job() {
        let mut job = Job::failed(
            JobId::new(),
            JobError::new(ErrorKind::Execution, "no such file"),
        );
        assert!(job.take_output().unwrap().read_chunk().await.is_none());
        let result = job.wait().await;
        assert_eq!(result.exit_code, -1);
        assert_eq!(result.error.unwrap().message(), "no such file");
    }

    #[tokio::test]
    async fn test_completion_shared_between_waiters() {
        let (job, sink) = job_channel(JobId::new());
        let waiter = job.completion();
        let handle = tokio::spawn(async move { waiter.wait().await.exit_code });
        sink.finish(ok_result(7));
        assert_eq!(handle.await.unwrap(), 7);
        assert_eq!(job.wait().await.exit_code, 7);
    }

    #[tokio::test]
    async fn test_discarded_output_is_not_buffered() {
        let (mut job, sink) = job_channel(JobId::new());
        sink.emit(StreamKind::Stdout, b"early".to_vec());
        job.discard_output();
        assert!(sink.events.is_closed());

        sink.emit(StreamKind::Stdout, vec![0u8; 1 << 20]);
        sink.finish(ok_result(0));
        assert!(job.take_output().is_none());
        assert_eq!(job.wait().await.exit_code, 0);
    }

    #[tokio::test]
    async fn test_undrained_output_does_not_block_completion() {
        let (job, sink) = job_channel(JobId::new());
        for _ in 0..64 {
            sink.emit(StreamKind::Stderr, vec![b'x'; 4096]);
        }
        sink.finish(ok_result(2));
        assert_eq!(job.wait().await.exit_code, 2);
    }

    #[tokio::test]
    async fn test_copy_to_writer() {
        let (mut job, sink) = job_channel(JobId::new());
        sink.emit(StreamKind::Stdout, b"abc".to_vec());
        sink.finish(ok_result(0));

        let mut buf = Vec::new();
        let copied = job.take_output().unwrap().copy_to(&mut buf).await.unwrap();
        assert_eq!(copied, 3);
        assert_eq!(buf, b"abc");
    }

    #[test]
    fn test_job_id_parse() {
        let id = JobId::new();
        assert_eq!(id.to_string().parse::<JobId>().unwrap(), id);
        assert!("nope".parse::<JobId>().is_err());
    }
}
