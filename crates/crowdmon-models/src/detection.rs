//! Per-frame detection results.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::crowd::{CrowdInsights, CrowdThresholds};

/// Axis-aligned box in pixel coordinates, `(x1, y1)` top-left, `(x2, y2)` bottom-right.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BoundingBox {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self {
            x1: x1.min(x2),
            y1: y1.min(y2),
            x2: x1.max(x2),
            y2: y1.max(y2),
        }
    }

    pub fn width(&self) -> f64 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f64 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    pub fn center(&self) -> (f64, f64) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    /// Clamp to a frame of the given size.
    pub fn clamp_to(&self, width: u32, height: u32) -> Self {
        let (w, h) = (width as f64, height as f64);
        Self {
            x1: self.x1.clamp(0.0, w),
            y1: self.y1.clamp(0.0, h),
            x2: self.x2.clamp(0.0, w),
            y2: self.y2.clamp(0.0, h),
        }
    }
}

/// Category label attached to a detection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct DetectionCategory(pub String);

impl DetectionCategory {
    pub const PERSON: &'static str = "person";
    pub const FACE: &'static str = "face";

    pub fn person() -> Self {
        Self(Self::PERSON.to_string())
    }

    pub fn face() -> Self {
        Self(Self::FACE.to_string())
    }

    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_person(&self) -> bool {
        self.0 == Self::PERSON
    }

    pub fn is_face(&self) -> bool {
        self.0 == Self::FACE
    }
}

impl fmt::Display for DetectionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single detected object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Detection {
    pub bounding_box: BoundingBox,
    /// Confidence in [0, 1]
    pub confidence: f32,
    pub category: DetectionCategory,
}

impl Detection {
    pub fn new(category: DetectionCategory, bounding_box: BoundingBox, confidence: f32) -> Self {
        Self {
            bounding_box,
            confidence: confidence.clamp(0.0, 1.0),
            category,
        }
    }

    pub fn person(bounding_box: BoundingBox, confidence: f32) -> Self {
        Self::new(DetectionCategory::person(), bounding_box, confidence)
    }

    pub fn face(bounding_box: BoundingBox, confidence: f32) -> Self {
        Self::new(DetectionCategory::face(), bounding_box, confidence)
    }
}

/// Coarse crowd-size bucket derived from the person count.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema, Default,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CrowdDensityLevel {
    #[default]
    Empty,
    Low,
    Medium,
    High,
    Critical,
}

impl CrowdDensityLevel {
    /// Bucket a person count. Boundaries are inclusive upper bounds.
    pub fn from_count(persons: u32, thresholds: &CrowdThresholds) -> Self {
        match persons {
            0 => CrowdDensityLevel::Empty,
            n if n <= thresholds.density_low => CrowdDensityLevel::Low,
            n if n <= thresholds.density_medium => CrowdDensityLevel::Medium,
            n if n <= thresholds.density_high => CrowdDensityLevel::High,
            _ => CrowdDensityLevel::Critical,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CrowdDensityLevel::Empty => "EMPTY",
            CrowdDensityLevel::Low => "LOW",
            CrowdDensityLevel::Medium => "MEDIUM",
            CrowdDensityLevel::High => "HIGH",
            CrowdDensityLevel::Critical => "CRITICAL",
        }
    }
}

/// Operator-facing alert level.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema, Default,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertLevel {
    #[default]
    Normal,
    Caution,
    Alert,
}

impl AlertLevel {
    /// Derive from the weighted detection score, escalating to ALERT whenever
    /// density is CRITICAL.
    pub fn derive(
        persons: u32,
        faces: u32,
        density: CrowdDensityLevel,
        thresholds: &CrowdThresholds,
    ) -> Self {
        if density == CrowdDensityLevel::Critical {
            return AlertLevel::Alert;
        }
        let weight = persons as f64 + thresholds.face_weight * faces as f64;
        if weight <= thresholds.alert_caution {
            AlertLevel::Normal
        } else if weight <= thresholds.alert_alert {
            AlertLevel::Caution
        } else {
            AlertLevel::Alert
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Normal => "NORMAL",
            AlertLevel::Caution => "CAUTION",
            AlertLevel::Alert => "ALERT",
        }
    }
}

/// All detections for one frame plus the metrics derived from them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct DetectionSet {
    pub person_detections: Vec<Detection>,
    pub face_detections: Vec<Detection>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub other_detections: Vec<Detection>,
    pub person_count: u32,
    pub face_count: u32,
    pub crowd_density_level: CrowdDensityLevel,
    pub alert_level: AlertLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insights: Option<CrowdInsights>,
}

impl DetectionSet {
    /// Group raw capability output by category and derive the crowd metrics.
    ///
    /// Order within each category follows capability output order. Insights
    /// need the frame dimensions and are skipped without them.
    pub fn assemble(
        detections: Vec<Detection>,
        frame_size: Option<(u32, u32)>,
        thresholds: &CrowdThresholds,
    ) -> Self {
        let mut set = DetectionSet::default();
        for detection in detections {
            if detection.category.is_person() {
                set.person_detections.push(detection);
            } else if detection.category.is_face() {
                set.face_detections.push(detection);
            } else {
                set.other_detections.push(detection);
            }
        }

        set.person_count = set.person_detections.len() as u32;
        set.face_count = set.face_detections.len() as u32;
        set.crowd_density_level = CrowdDensityLevel::from_count(set.person_count, thresholds);
        set.alert_level = AlertLevel::derive(
            set.person_count,
            set.face_count,
            set.crowd_density_level,
            thresholds,
        );
        set.insights = frame_size
            .filter(|(w, h)| *w > 0 && *h > 0)
            .map(|(w, h)| CrowdInsights::analyze(&set, w, h, thresholds));
        set
    }

    pub fn is_empty(&self) -> bool {
        self.person_detections.is_empty()
            && self.face_detections.is_empty()
            && self.other_detections.is_empty()
    }

    /// Iterate every detection regardless of category.
    pub fn iter(&self) -> impl Iterator<Item = &Detection> {
        self.person_detections
            .iter()
            .chain(self.face_detections.iter())
            .chain(self.other_detections.iter())
    }

    /// Short human-readable summary of the frame.
    pub fn activity_text(&self) -> String {
        match (self.person_count, self.face_count) {
            (0, 0) => "No detections - area appears empty".to_string(),
            (0, f) => format!("{f} face(s) detected - partial person visibility"),
            (p, 0) => format!("{p} person(s) detected - faces not clearly visible"),
            (p, f) => format!("{p} person(s), {f} face(s) detected - good visibility"),
        }
    }
}
