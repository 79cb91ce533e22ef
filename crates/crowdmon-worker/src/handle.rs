//! Shared per-job state: the job record and its cancellation flag.

use std::sync::RwLock;
use tokio::sync::watch;

use crowdmon_models::{AnalysisJob, JobState};

/// Result of a cancel request on an existing job.
///
/// Both variants acknowledge the request; cancelling a finished job is a
/// reported no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The job is stopping (or was already stopping).
    Acknowledged(JobState),
    /// Nothing to do; the job had already finished.
    AlreadyTerminal(JobState),
}

impl CancelOutcome {
    pub fn state(&self) -> JobState {
        match self {
            CancelOutcome::Acknowledged(state) | CancelOutcome::AlreadyTerminal(state) => *state,
        }
    }

    pub fn is_acknowledged(&self) -> bool {
        matches!(
            self,
            CancelOutcome::Acknowledged(_) | CancelOutcome::AlreadyTerminal(_)
        )
    }

    pub fn is_already_terminal(&self) -> bool {
        matches!(self, CancelOutcome::AlreadyTerminal(_))
    }
}

/// Job record plus the sender half of the job's cancel flag.
///
/// The record is only mutated through the orchestrator and the job's worker.
#[derive(Debug)]
pub(crate) struct JobHandle {
    record: RwLock<AnalysisJob>,
    cancel: watch::Sender<bool>,
}

impl JobHandle {
    pub(crate) fn new(job: AnalysisJob) -> (Self, watch::Receiver<bool>) {
        let (cancel, cancelled) = watch::channel(false);
        let handle = Self {
            record: RwLock::new(job),
            cancel,
        };
        (handle, cancelled)
    }

    pub(crate) fn snapshot(&self) -> AnalysisJob {
        self.record
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut AnalysisJob) -> R) -> R {
        let mut job = self
            .record
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut job)
    }

    pub(crate) fn request_stop(&self) -> CancelOutcome {
        let outcome = self.update(|job| {
            if job.is_terminal() {
                return CancelOutcome::AlreadyTerminal(job.state);
            }
            job.request_stop();
            CancelOutcome::Acknowledged(job.state)
        });
        if !outcome.is_already_terminal() {
            self.cancel.send_replace(true);
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crowdmon_models::{ErrorKind, MediaKind};

    #[test]
    fn test_request_stop_running_job() {
        let mut job = AnalysisJob::new("a.mp4", MediaKind::Video, Some(10));
        job.start();
        let (handle, cancelled) = JobHandle::new(job);

        assert_eq!(
            handle.request_stop(),
            CancelOutcome::Acknowledged(JobState::Stopping)
        );
        assert!(*cancelled.borrow());
        // Second request is acknowledged again without changing anything.
        assert_eq!(
            handle.request_stop(),
            CancelOutcome::Acknowledged(JobState::Stopping)
        );
    }

    #[test]
    fn test_request_stop_terminal_job() {
        let (handle, cancelled) = JobHandle::new(AnalysisJob::new("a.png", MediaKind::Image, Some(1)));
        handle.update(|job| job.fail(ErrorKind::DecodeFailure, "bad"));

        let outcome = handle.request_stop();
        assert_eq!(outcome, CancelOutcome::AlreadyTerminal(JobState::Failed));
        assert!(outcome.is_acknowledged());
        assert!(!*cancelled.borrow());
    }
}
