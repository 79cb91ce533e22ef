//! Shared data models for the crowd monitor.
//!
//! This crate provides Serde-serializable types for:
//! - Analysis jobs and their lifecycle
//! - Detections, density and alert levels
//! - Crowd thresholds and derived insights
//! - Event stream and client command schemas
//! - Timestamped results and playback lookup

pub mod crowd;
pub mod detection;
pub mod events;
pub mod job;
pub mod timeline;

// Re-export common types
pub use crowd::{
    BehaviorFlag, CrowdInsights, CrowdThresholds, EngagementLevel, FlowPattern, RiskLevel,
};
pub use detection::{
    AlertLevel, BoundingBox, CrowdDensityLevel, Detection, DetectionCategory, DetectionSet,
};
pub use events::{ClientCommand, CommandKind, Event, SystemPhase};
pub use job::{AnalysisJob, ErrorKind, JobError, JobId, JobState, MediaKind, MAX_RUNNING_PERCENT};
pub use timeline::{nearest_index, PlaybackTimeline, TimedDetection};
