//! Per-job lifecycle state machine
//!
//! Pure transitions with no I/O:
//! `Queued -> Started -> Streaming -> Completed`.
//!
//! - A job may complete from any state (a launch failure completes a job
//!   that never streamed)
//! - `Completed` is terminal and absorbs every event
//! - Out-of-order events leave the state unchanged; they never panic

/// Where a job is in its life
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    /// Accepted, waiting for an execution slot
    Queued,
    /// Handed to the executor
    Started,
    /// Running; output is available
    Streaming,
    /// Result delivered
    Completed,
}

/// Things that happen to a job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobEvent {
    /// An execution slot was assigned
    Dispatched,
    /// The executor handed back a live job
    Launched,
    /// The job's result is known
    Finished,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Started => write!(f, "started"),
            Self::Streaming => write!(f, "streaming"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

/// Pure state transition function
pub fn transition(state: JobState, event: JobEvent) -> JobState {
    match (state, event) {
        (JobState::Completed, _) => JobState::Completed,
        (_, JobEvent::Finished) => JobState::Completed,
        (JobState::Queued, JobEvent::Dispatched) => JobState::Started,
        (JobState::Started, JobEvent::Launched) => JobState::Streaming,
        (state, _) => state,
    }
}
