//! Detection capabilities.
//!
//! A capability maps one frame to a list of categorized boxes. Capabilities
//! are synchronous and CPU-bound; callers run them off the async runtime.

mod replay;

pub use replay::ReplayDetector;

use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::debug;

use crowdmon_models::Detection;

use crate::frame::Frame;

/// Errors raised by a detection capability.
#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("{capability} failed to load: {message}")]
    Unavailable { capability: String, message: String },

    #[error("{capability} failed on frame {index}: {message}")]
    Failed {
        capability: String,
        index: u64,
        message: String,
    },
}

impl DetectorError {
    pub fn unavailable(capability: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unavailable {
            capability: capability.into(),
            message: message.into(),
        }
    }

    pub fn failed(capability: impl Into<String>, index: u64, message: impl Into<String>) -> Self {
        Self::Failed {
            capability: capability.into(),
            index,
            message: message.into(),
        }
    }
}

/// A pluggable object detector.
pub trait Detector: Send + Sync {
    /// Short name used in logs and loading messages.
    fn name(&self) -> &str;

    /// Load weights or other resources. Called once before any `detect`.
    fn warm_up(&self) -> Result<(), DetectorError> {
        Ok(())
    }

    /// Detect objects in one frame.
    fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, DetectorError>;
}

/// Ordered set of capabilities applied to every frame.
#[derive(Clone, Default)]
pub struct DetectorRegistry {
    detectors: Vec<Arc<dyn Detector>>,
}

impl DetectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, detector: impl Detector + 'static) -> Self {
        self.register(Arc::new(detector));
        self
    }

    pub fn register(&mut self, detector: Arc<dyn Detector>) {
        self.detectors.push(detector);
    }

    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.detectors.iter().map(|d| d.name().to_string()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Detector>> {
        self.detectors.iter()
    }

    /// Run every capability on the frame and concatenate their output in
    /// registration order. The first failure aborts the frame.
    pub fn detect_all(&self, frame: &Frame) -> Result<Vec<Detection>, DetectorError> {
        let mut all = Vec::new();
        for detector in &self.detectors {
            let started = Instant::now();
            let found = detector.detect(frame)?;
            let elapsed = started.elapsed();

            metrics::histogram!(
                "crowdmon_capability_duration_seconds",
                "capability" => detector.name().to_string()
            )
            .record(elapsed.as_secs_f64());
            debug!(
                capability = detector.name(),
                frame = frame.index,
                found = found.len(),
                elapsed_ms = elapsed.as_millis() as u64,
                "Capability finished"
            );
            all.extend(found);
        }
        Ok(all)
    }
}

impl std::fmt::Debug for DetectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectorRegistry")
            .field("detectors", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crowdmon_models::BoundingBox;

    struct Fixed {
        name: &'static str,
        detections: Vec<Detection>,
    }

    impl Detector for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        fn detect(&self, _frame: &Frame) -> Result<Vec<Detection>, DetectorError> {
            Ok(self.detections.clone())
        }
    }

    struct Broken;

    impl Detector for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, DetectorError> {
            Err(DetectorError::failed(self.name(), frame.index, "boom"))
        }
    }

    fn frame() -> Frame {
        Frame::filled(7, 0.0, 4, 4, [0, 0, 0])
    }

    #[test]
    fn test_detect_all_concatenates_in_order() {
        let bbox = BoundingBox::new(0.0, 0.0, 1.0, 1.0);
        let registry = DetectorRegistry::new()
            .with(Fixed {
                name: "persons",
                detections: vec![Detection::person(bbox, 0.9)],
            })
            .with(Fixed {
                name: "faces",
                detections: vec![Detection::face(bbox, 0.8), Detection::face(bbox, 0.7)],
            });

        assert_eq!(registry.names(), vec!["persons", "faces"]);
        let found = registry.detect_all(&frame()).unwrap();
        assert_eq!(found.len(), 3);
        assert!(found[0].category.is_person());
        assert_eq!(found[2].confidence, 0.7);
    }

    #[test]
    fn test_detect_all_propagates_failure() {
        let registry = DetectorRegistry::new().with(Broken);
        let err = registry.detect_all(&frame()).unwrap_err();
        assert_eq!(err.to_string(), "broken failed on frame 7: boom");
    }

    #[test]
    fn test_empty_registry() {
        let registry = DetectorRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.detect_all(&frame()).unwrap().is_empty());
    }
}
