//! Worker error types.

use std::time::Duration;
use thiserror::Error;

use crowdmon_media::{DetectorError, MediaError};
use crowdmon_models::{ErrorKind, JobId};

pub type WorkerResult<T> = Result<T, WorkerError>;
pub type StoreResult<T> = Result<T, StoreError>;

/// Result store invariant violations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("Frame {index} already stored for job {job_id}")]
    DuplicateIndex { job_id: JobId, index: u64 },

    #[error(
        "Frame {index} (t={timestamp}) arrived after frame {last_index} (t={last_timestamp}) for job {job_id}"
    )]
    OutOfOrder {
        job_id: JobId,
        index: u64,
        timestamp: f64,
        last_index: u64,
        last_timestamp: f64,
    },
}

/// Reasons a submission is refused. Returned synchronously, never published.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("Invalid asset: {0}")]
    InvalidAsset(String),

    #[error("Capacity exceeded: {limit} job(s) already active")]
    CapacityExceeded { limit: usize },

    #[error("Not ready: {0}")]
    NotReady(String),
}

impl SubmitError {
    pub fn invalid_asset(msg: impl Into<String>) -> Self {
        Self::InvalidAsset(msg.into())
    }

    pub fn not_ready(msg: impl Into<String>) -> Self {
        Self::NotReady(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SubmitError::InvalidAsset(_) => ErrorKind::InvalidAsset,
            SubmitError::CapacityExceeded { .. } => ErrorKind::CapacityExceeded,
            SubmitError::NotReady(_) => ErrorKind::NotReady,
        }
    }
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Decode failed: {0}")]
    Decode(#[source] MediaError),

    #[error("Output failed: {0}")]
    Output(#[source] MediaError),

    #[error("Capability failed: {0}")]
    Capability(#[from] DetectorError),

    #[error("Capability call on frame {index} exceeded {timeout:?}")]
    CapabilityTimeout { index: u64, timeout: Duration },

    #[error("Capability task aborted on frame {index}: {message}")]
    CapabilityAborted { index: u64, message: String },

    #[error("Result store rejected frame: {0}")]
    Store(#[from] StoreError),

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Capability initialization failed: {0}")]
    Initialization(String),
}

impl WorkerError {
    pub fn decode(err: MediaError) -> Self {
        Self::Decode(err)
    }

    pub fn output(err: MediaError) -> Self {
        Self::Output(err)
    }

    pub fn initialization(msg: impl Into<String>) -> Self {
        Self::Initialization(msg.into())
    }

    /// Error kind reported in `JobFailed`.
    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkerError::Decode(_) | WorkerError::Output(_) => ErrorKind::DecodeFailure,
            WorkerError::Capability(_)
            | WorkerError::CapabilityTimeout { .. }
            | WorkerError::CapabilityAborted { .. }
            | WorkerError::Initialization(_) => ErrorKind::CapabilityFailure,
            WorkerError::Store(_) => ErrorKind::DuplicateIndex,
            // Only returned to callers, never published.
            WorkerError::JobNotFound(_) => ErrorKind::InvalidAsset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            WorkerError::decode(MediaError::decode_failed(3, "truncated")).kind(),
            ErrorKind::DecodeFailure
        );
        assert_eq!(
            WorkerError::output(MediaError::encode_failed("pipe closed")).kind(),
            ErrorKind::DecodeFailure
        );
        assert_eq!(
            WorkerError::from(DetectorError::failed("persons", 2, "boom")).kind(),
            ErrorKind::CapabilityFailure
        );
        let dup = StoreError::DuplicateIndex {
            job_id: JobId::from_string("j"),
            index: 1,
        };
        assert_eq!(WorkerError::from(dup).kind(), ErrorKind::DuplicateIndex);
        assert_eq!(
            SubmitError::CapacityExceeded { limit: 1 }.kind(),
            ErrorKind::CapacityExceeded
        );
    }
}
