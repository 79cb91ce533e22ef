//! Worker configuration.

use std::path::PathBuf;
use std::time::Duration;

use crowdmon_events::DEFAULT_EVENT_BUFFER;
use crowdmon_media::SourceOptions;
use crowdmon_models::CrowdThresholds;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Jobs allowed to run at once (admission gate size)
    pub max_active_jobs: usize,
    /// Per-observer event buffer
    pub event_buffer_capacity: usize,
    /// How long results of a finished job stay readable
    pub result_retention: Duration,
    /// How often the retention sweeper runs
    pub retention_sweep_interval: Duration,
    /// Upper bound on one capability call. `None` waits indefinitely.
    pub capability_timeout: Option<Duration>,
    /// Decoding limits
    pub source: SourceOptions,
    /// Write annotated images/videos
    pub annotate_output: bool,
    /// Where annotated output goes
    pub output_dir: PathBuf,
    /// Density and alert thresholds
    pub thresholds: CrowdThresholds,
    /// Recorded detections to replay instead of a live model
    pub replay_path: Option<PathBuf>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_active_jobs: 1,
            event_buffer_capacity: DEFAULT_EVENT_BUFFER,
            result_retention: Duration::from_secs(600), // 10 minutes
            retention_sweep_interval: Duration::from_secs(60),
            capability_timeout: None,
            source: SourceOptions::default(),
            annotate_output: true,
            output_dir: PathBuf::from("processed"),
            thresholds: CrowdThresholds::default(),
            replay_path: None,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_active_jobs: std::env::var("MAX_ACTIVE_JOBS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.max_active_jobs),
            event_buffer_capacity: std::env::var("EVENT_BUFFER_CAPACITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.event_buffer_capacity),
            result_retention: Duration::from_secs(
                std::env::var("RESULT_RETENTION_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(600),
            ),
            retention_sweep_interval: Duration::from_secs(
                std::env::var("RETENTION_SWEEP_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .filter(|n: &u64| *n > 0)
                    .unwrap_or(60),
            ),
            capability_timeout: std::env::var("WORKER_CAPABILITY_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            source: SourceOptions {
                max_width: std::env::var("MAX_FRAME_WIDTH")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.source.max_width),
                max_height: std::env::var("MAX_FRAME_HEIGHT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.source.max_height),
                sample_fps: std::env::var("WORKER_SAMPLE_FPS")
                    .ok()
                    .and_then(|s| s.parse::<f64>().ok())
                    .filter(|fps| *fps > 0.0),
            },
            annotate_output: std::env::var("ANNOTATE_OUTPUT")
                .map(|v| !matches!(v.to_lowercase().as_str(), "0" | "false" | "no" | "off"))
                .unwrap_or(true),
            output_dir: std::env::var("OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            thresholds: CrowdThresholds::from_env(),
            replay_path: std::env::var("DETECTOR_REPLAY_PATH")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.max_active_jobs, 1);
        assert_eq!(config.event_buffer_capacity, 256);
        assert_eq!(config.result_retention, Duration::from_secs(600));
        assert!(config.capability_timeout.is_none());
        assert!(config.annotate_output);
    }
}
