//! Event stream and client command schemas.
//!
//! Events are tagged by a snake_case `type` field with camelCase payload
//! fields, e.g. `{"type":"job_progress","jobId":"..","percent":40,..}`.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::detection::DetectionSet;
use crate::job::{ErrorKind, JobId};

/// Readiness of the detection capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SystemPhase {
    Loading,
    Ready,
    Error,
}

impl SystemPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemPhase::Loading => "LOADING",
            SystemPhase::Ready => "READY",
            SystemPhase::Error => "ERROR",
        }
    }
}

/// Event published to observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Event {
    /// Capability readiness changed
    SystemStatus { phase: SystemPhase, message: String },

    /// Capability loading progress (0-100)
    LoadingProgress { percent: u8, message: String },

    /// A frame finished processing
    JobProgress {
        job_id: JobId,
        percent: u8,
        message: String,
        frame_index: u64,
    },

    /// Detections for one frame
    DetectionUpdate {
        job_id: JobId,
        frame_index: u64,
        timestamp: f64,
        last_activity_text: String,
        #[serde(flatten)]
        detections: DetectionSet,
    },

    /// Every frame processed
    JobCompleted {
        job_id: JobId,
        #[serde(rename = "totalFrames", alias = "totalUnits")]
        total_units: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output_ref: Option<String>,
    },

    /// Stopped by request
    JobStopped { job_id: JobId, reason: String },

    /// Ended with an error
    JobFailed {
        job_id: JobId,
        error_kind: ErrorKind,
        message: String,
    },

    /// Reply to a client command
    CommandAck {
        command: CommandKind,
        accepted: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        job_id: Option<JobId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

impl Event {
    pub fn system_status(phase: SystemPhase, message: impl Into<String>) -> Self {
        Event::SystemStatus {
            phase,
            message: message.into(),
        }
    }

    pub fn loading_progress(percent: u8, message: impl Into<String>) -> Self {
        Event::LoadingProgress {
            percent: percent.min(100),
            message: message.into(),
        }
    }

    pub fn job_progress(
        job_id: JobId,
        percent: u8,
        message: impl Into<String>,
        frame_index: u64,
    ) -> Self {
        Event::JobProgress {
            job_id,
            percent: percent.min(100),
            message: message.into(),
            frame_index,
        }
    }

    pub fn detection_update(
        job_id: JobId,
        frame_index: u64,
        timestamp: f64,
        detections: DetectionSet,
    ) -> Self {
        Event::DetectionUpdate {
            job_id,
            frame_index,
            timestamp,
            last_activity_text: detections.activity_text(),
            detections,
        }
    }

    pub fn job_completed(job_id: JobId, total_units: u64, output_ref: Option<String>) -> Self {
        Event::JobCompleted {
            job_id,
            total_units,
            output_ref,
        }
    }

    pub fn job_stopped(job_id: JobId, reason: impl Into<String>) -> Self {
        Event::JobStopped {
            job_id,
            reason: reason.into(),
        }
    }

    pub fn job_failed(job_id: JobId, error_kind: ErrorKind, message: impl Into<String>) -> Self {
        Event::JobFailed {
            job_id,
            error_kind,
            message: message.into(),
        }
    }

    pub fn command_ack(
        command: CommandKind,
        accepted: bool,
        job_id: Option<JobId>,
        reason: Option<String>,
    ) -> Self {
        Event::CommandAck {
            command,
            accepted,
            job_id,
            reason,
        }
    }

    /// Wire name of the event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Event::SystemStatus { .. } => "system_status",
            Event::LoadingProgress { .. } => "loading_progress",
            Event::JobProgress { .. } => "job_progress",
            Event::DetectionUpdate { .. } => "detection_update",
            Event::JobCompleted { .. } => "job_completed",
            Event::JobStopped { .. } => "job_stopped",
            Event::JobFailed { .. } => "job_failed",
            Event::CommandAck { .. } => "command_ack",
        }
    }

    /// Job this event belongs to; `None` for system-wide events.
    pub fn job_id(&self) -> Option<&JobId> {
        match self {
            Event::JobProgress { job_id, .. }
            | Event::DetectionUpdate { job_id, .. }
            | Event::JobCompleted { job_id, .. }
            | Event::JobStopped { job_id, .. }
            | Event::JobFailed { job_id, .. } => Some(job_id),
            Event::SystemStatus { .. } | Event::LoadingProgress { .. } | Event::CommandAck { .. } => {
                None
            }
        }
    }

    /// Whether this is the last event a job will ever produce.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Event::JobCompleted { .. } | Event::JobStopped { .. } | Event::JobFailed { .. }
        )
    }
}

/// Command names, echoed back in [`Event::CommandAck`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    StartJob,
    StopJob,
    WatchJob,
    WatchAll,
}

/// Command sent by a client over the event channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientCommand {
    /// Submit a previously uploaded asset
    StartJob {
        asset_ref: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        kind: Option<String>,
    },
    /// Request a running job to stop
    StopJob { job_id: JobId },
    /// Narrow this connection to the given job
    WatchJob { job_id: JobId },
    /// Receive events for every job
    WatchAll,
}

impl ClientCommand {
    pub fn kind(&self) -> CommandKind {
        match self {
            ClientCommand::StartJob { .. } => CommandKind::StartJob,
            ClientCommand::StopJob { .. } => CommandKind::StopJob,
            ClientCommand::WatchJob { .. } => CommandKind::WatchJob,
            ClientCommand::WatchAll => CommandKind::WatchAll,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crowd::CrowdThresholds;
    use crate::detection::{BoundingBox, Detection};

    #[test]
    fn test_job_progress_serialization() {
        let event = Event::job_progress(JobId::from_string("j1"), 150, "Processing", 3);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "job_progress");
        assert_eq!(json["jobId"], "j1");
        assert_eq!(json["percent"], 100);
        assert_eq!(json["frameIndex"], 3);
    }

    #[test]
    fn test_detection_update_flattens_set() {
        let set = DetectionSet::assemble(
            vec![Detection::person(BoundingBox::new(0.0, 0.0, 10.0, 10.0), 0.9)],
            Some((100, 100)),
            &CrowdThresholds::default(),
        );
        let event = Event::detection_update(JobId::from_string("j1"), 0, 0.0, set.clone());
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "detection_update");
        assert_eq!(json["personCount"], 1);
        assert_eq!(json["crowdDensityLevel"], "LOW");
        assert_eq!(
            json["lastActivityText"],
            "1 person(s) detected - faces not clearly visible"
        );

        let back: Event = serde_json::from_value(json).unwrap();
        match back {
            Event::DetectionUpdate { detections, .. } => assert_eq!(detections.person_count, 1),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_terminal_events() {
        let id = JobId::from_string("j1");
        let completed = Event::job_completed(id.clone(), 10, None);
        let json = serde_json::to_value(&completed).unwrap();
        assert_eq!(json["totalFrames"], 10);
        assert!(completed.is_terminal());

        let failed = Event::job_failed(id.clone(), ErrorKind::DecodeFailure, "bad frame");
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["errorKind"], "DECODE_FAILURE");
        assert!(failed.is_terminal());

        assert!(!Event::job_progress(id, 10, "", 0).is_terminal());
    }

    #[test]
    fn test_job_scoping() {
        assert!(Event::system_status(SystemPhase::Ready, "ok").job_id().is_none());
        let id = JobId::from_string("j2");
        assert_eq!(Event::job_stopped(id.clone(), "stopped").job_id(), Some(&id));
    }

    #[test]
    fn test_client_command_parsing() {
        let cmd: ClientCommand =
            serde_json::from_str(r#"{"type":"start_job","assetRef":"abc.mp4"}"#).unwrap();
        assert_eq!(
            cmd,
            ClientCommand::StartJob {
                asset_ref: "abc.mp4".to_string(),
                kind: None
            }
        );

        let cmd: ClientCommand =
            serde_json::from_str(r#"{"type":"stop_job","jobId":"j1"}"#).unwrap();
        assert_eq!(cmd.kind(), CommandKind::StopJob);

        let cmd: ClientCommand = serde_json::from_str(r#"{"type":"watch_all"}"#).unwrap();
        assert_eq!(cmd, ClientCommand::WatchAll);

        assert!(serde_json::from_str::<ClientCommand>(r#"{"type":"reboot"}"#).is_err());
    }
}
