//! Analysis job definitions and lifecycle.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Highest percent a job may report before it reaches COMPLETED.
pub const MAX_RUNNING_PERCENT: u8 = 99;

/// Unique identifier for an analysis job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of media an asset holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MediaKind {
    /// A single still image
    Image,
    /// A video stream
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "image" => Ok(MediaKind::Image),
            "video" => Ok(MediaKind::Video),
            other => Err(format!("unknown media kind: {other}")),
        }
    }
}

/// Lifecycle state of an analysis job.
///
/// ```text
/// QUEUED -> RUNNING -> COMPLETED
///    |         |----> FAILED
///    |         '----> STOPPING -> STOPPED
///    '--------------> STOPPING
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// Accepted, worker not started yet
    #[default]
    Queued,
    /// Frames are being processed
    Running,
    /// Stop requested, in-flight frame finishing
    Stopping,
    /// Every frame processed
    Completed,
    /// Stopped by request
    Stopped,
    /// Ended with an error
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "QUEUED",
            JobState::Running => "RUNNING",
            JobState::Stopping => "STOPPING",
            JobState::Completed => "COMPLETED",
            JobState::Stopped => "STOPPED",
            JobState::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Stopped | JobState::Failed
        )
    }

    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Queued, Running)
                | (Queued, Stopping)
                | (Queued, Failed)
                | (Running, Stopping)
                | (Running, Completed)
                | (Running, Failed)
                | (Stopping, Stopped)
                | (Stopping, Failed)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Machine-readable error categories shared by the API and the event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Asset could not be opened or has an unsupported format
    InvalidAsset,
    /// Another job already holds the only slot
    CapacityExceeded,
    /// A frame could not be decoded mid-stream, or output could not be written
    DecodeFailure,
    /// A detection capability raised an error or timed out
    CapabilityFailure,
    /// A result was stored twice or out of order
    DuplicateIndex,
    /// Detection capabilities are not loaded
    NotReady,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidAsset => "INVALID_ASSET",
            ErrorKind::CapacityExceeded => "CAPACITY_EXCEEDED",
            ErrorKind::DecodeFailure => "DECODE_FAILURE",
            ErrorKind::CapabilityFailure => "CAPABILITY_FAILURE",
            ErrorKind::DuplicateIndex => "DUPLICATE_INDEX",
            ErrorKind::NotReady => "NOT_READY",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error recorded on a failed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct JobError {
    pub kind: ErrorKind,
    pub message: String,
}

/// One submitted asset and its processing lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisJob {
    /// Unique job ID
    pub id: JobId,

    /// Handle of the submitted asset
    pub asset_ref: String,

    /// Image or video
    pub kind: MediaKind,

    /// Current lifecycle state
    #[serde(default)]
    pub state: JobState,

    /// Frame estimate; unknown for streams without a frame count
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_units: Option<u64>,

    /// Frames fully processed so far
    #[serde(default)]
    pub processed_units: u64,

    /// Progress (0-100), never decreasing
    #[serde(default)]
    pub percent: u8,

    /// Annotated output, present once completed with output enabled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_ref: Option<String>,

    /// Set when the job failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,

    /// Set when the job was stopped
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,

    pub created_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl AnalysisJob {
    /// Create a new queued job.
    pub fn new(asset_ref: impl Into<String>, kind: MediaKind, total_units: Option<u64>) -> Self {
        Self {
            id: JobId::new(),
            asset_ref: asset_ref.into(),
            kind,
            state: JobState::Queued,
            total_units,
            processed_units: 0,
            percent: 0,
            output_ref: None,
            error: None,
            stop_reason: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    fn transition(&mut self, next: JobState) -> bool {
        if !self.state.can_transition_to(next) {
            return false;
        }
        self.state = next;
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        true
    }

    /// QUEUED -> RUNNING. Returns false if a stop already arrived.
    pub fn start(&mut self) -> bool {
        let started = self.transition(JobState::Running);
        if started {
            self.started_at = Some(Utc::now());
        }
        started
    }

    /// Move to STOPPING. Returns false if the job is terminal or already stopping.
    pub fn request_stop(&mut self) -> bool {
        self.transition(JobState::Stopping)
    }

    /// Count one processed frame and return the new percent.
    ///
    /// `estimate` is the source's current frame estimate. When it is unknown
    /// or already exceeded, the total is re-based to `processed + 1`. The
    /// percent stays at or below 99 until completion and never decreases.
    pub fn record_frame(&mut self, estimate: Option<u64>) -> u8 {
        self.processed_units += 1;
        let processed = self.processed_units;

        let total = match estimate {
            Some(total) if total >= processed => total,
            _ => processed + 1,
        };
        self.total_units = Some(total);

        let raw = (processed.saturating_mul(100) / total).min(MAX_RUNNING_PERCENT as u64) as u8;
        self.percent = self.percent.max(raw);
        self.percent
    }

    /// RUNNING -> COMPLETED.
    pub fn complete(&mut self, output_ref: Option<String>) -> bool {
        let done = self.transition(JobState::Completed);
        if done {
            self.total_units = Some(self.processed_units);
            self.percent = 100;
            self.output_ref = output_ref;
        }
        done
    }

    /// STOPPING -> STOPPED.
    pub fn stop(&mut self, reason: impl Into<String>) -> bool {
        let done = self.transition(JobState::Stopped);
        if done {
            self.stop_reason = Some(reason.into());
        }
        done
    }

    /// Any non-terminal state -> FAILED.
    pub fn fail(&mut self, kind: ErrorKind, message: impl Into<String>) -> bool {
        let done = self.transition(JobState::Failed);
        if done {
            self.error = Some(JobError {
                kind,
                message: message.into(),
            });
        }
        done
    }
}
