use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::info;

use crowdmon_models::Detection;

use super::{Detector, DetectorError};
use crate::frame::Frame;

/// Replays precomputed detections keyed by frame index.
///
/// The fixture is a JSON list of `{"frameIndex": n, "detections": [...]}`
/// entries. Frames without an entry produce no detections.
#[derive(Debug)]
pub struct ReplayDetector {
    name: String,
    path: Option<PathBuf>,
    frames: std::sync::RwLock<HashMap<u64, Vec<Detection>>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReplayEntry {
    frame_index: u64,
    #[serde(default)]
    detections: Vec<Detection>,
}

impl ReplayDetector {
    /// Lazily load fixtures from `path` on warm-up.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self {
            name: "replay".to_string(),
            path: Some(path.into()),
            frames: Default::default(),
        }
    }

    /// Detector with fixtures already in memory.
    pub fn from_frames(frames: HashMap<u64, Vec<Detection>>) -> Self {
        Self {
            name: "replay".to_string(),
            path: None,
            frames: std::sync::RwLock::new(frames),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn load(&self, path: &Path) -> Result<HashMap<u64, Vec<Detection>>, DetectorError> {
        let raw = std::fs::read(path).map_err(|e| {
            DetectorError::unavailable(&self.name, format!("{}: {}", path.display(), e))
        })?;
        let entries: Vec<ReplayEntry> = serde_json::from_slice(&raw)
            .map_err(|e| DetectorError::unavailable(&self.name, e.to_string()))?;

        let mut frames = HashMap::with_capacity(entries.len());
        for entry in entries {
            frames
                .entry(entry.frame_index)
                .or_insert_with(Vec::new)
                .extend(entry.detections);
        }
        Ok(frames)
    }
}

impl Detector for ReplayDetector {
    fn name(&self) -> &str {
        &self.name
    }

    fn warm_up(&self) -> Result<(), DetectorError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let loaded = self.load(path)?;
        info!(
            capability = %self.name,
            frames = loaded.len(),
            path = %path.display(),
            "Loaded replay detections"
        );
        let mut frames = self
            .frames
            .write()
            .map_err(|_| DetectorError::unavailable(&self.name, "fixture lock poisoned"))?;
        *frames = loaded;
        Ok(())
    }

    fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, DetectorError> {
        let frames = self
            .frames
            .read()
            .map_err(|_| DetectorError::failed(&self.name, frame.index, "fixture lock poisoned"))?;
        Ok(frames.get(&frame.index).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crowdmon_models::BoundingBox;

    #[test]
    fn test_replay_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("detections.json");
        std::fs::write(
            &path,
            r#"[
                {"frameIndex": 0, "detections": [
                    {"boundingBox": {"x1": 1, "y1": 2, "x2": 30, "y2": 40}, "confidence": 0.9, "category": "person"}
                ]},
                {"frameIndex": 2, "detections": [
                    {"boundingBox": {"x1": 5, "y1": 5, "x2": 9, "y2": 9}, "confidence": 0.6, "category": "face"}
                ]}
            ]"#,
        )
        .unwrap();

        let detector = ReplayDetector::from_path(&path);
        detector.warm_up().unwrap();

        let first = detector.detect(&Frame::filled(0, 0.0, 2, 2, [0; 3])).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].bounding_box.y2, 40.0);

        assert!(detector.detect(&Frame::filled(1, 0.1, 2, 2, [0; 3])).unwrap().is_empty());
        assert!(detector.detect(&Frame::filled(2, 0.2, 2, 2, [0; 3])).unwrap()[0]
            .category
            .is_face());
    }

    #[test]
    fn test_replay_missing_file() {
        let detector = ReplayDetector::from_path("/nonexistent/replay.json");
        assert!(matches!(
            detector.warm_up(),
            Err(DetectorError::Unavailable { .. })
        ));
    }

    #[test]
    fn test_replay_from_frames() {
        let mut frames = HashMap::new();
        frames.insert(
            3,
            vec![Detection::person(BoundingBox::new(0.0, 0.0, 1.0, 1.0), 0.5)],
        );
        let detector = ReplayDetector::from_frames(frames).with_name("scripted");
        assert_eq!(detector.name(), "scripted");
        detector.warm_up().unwrap();
        assert_eq!(detector.detect(&Frame::filled(3, 0.0, 1, 1, [0; 3])).unwrap().len(), 1);
    }
}
