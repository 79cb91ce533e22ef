//! Crowd metric thresholds and per-frame crowd insights.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::detection::{CrowdDensityLevel, Detection, DetectionSet};

/// Configurable boundaries for density, alert and insight derivation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CrowdThresholds {
    /// Inclusive upper bound for LOW density
    pub density_low: u32,
    /// Inclusive upper bound for MEDIUM density
    pub density_medium: u32,
    /// Inclusive upper bound for HIGH density
    pub density_high: u32,
    /// Weighted score at or below which alert stays NORMAL
    pub alert_caution: f64,
    /// Weighted score at or below which alert stays CAUTION
    pub alert_alert: f64,
    /// Weight of a face relative to a person in the alert score
    pub face_weight: f64,
    /// Center distance, as a fraction of the shorter frame side, that counts as close
    pub proximity: f64,
}

impl Default for CrowdThresholds {
    fn default() -> Self {
        Self {
            density_low: 2,
            density_medium: 5,
            density_high: 10,
            alert_caution: 3.0,
            alert_alert: 6.0,
            face_weight: 0.3,
            proximity: 0.15,
        }
    }
}

impl CrowdThresholds {
    /// Load thresholds from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let thresholds = Self {
            density_low: env_or("DENSITY_LOW", defaults.density_low),
            density_medium: env_or("DENSITY_MEDIUM", defaults.density_medium),
            density_high: env_or("DENSITY_HIGH", defaults.density_high),
            alert_caution: env_or("ALERT_CAUTION", defaults.alert_caution),
            alert_alert: env_or("ALERT_ALERT", defaults.alert_alert),
            face_weight: env_or("FACE_WEIGHT", defaults.face_weight),
            proximity: env_or("PROXIMITY_THRESHOLD", defaults.proximity),
        };
        if thresholds.is_valid() {
            thresholds
        } else {
            defaults
        }
    }

    /// Bounds must be ordered for the bucketing to make sense.
    pub fn is_valid(&self) -> bool {
        self.density_low <= self.density_medium
            && self.density_medium <= self.density_high
            && self.alert_caution <= self.alert_alert
            && self.face_weight >= 0.0
            && self.proximity > 0.0
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// How engaged (face-visible) the detected people are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngagementLevel {
    Low,
    Medium,
    High,
}

/// Where people are in the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowPattern {
    /// Most people sit in the interior of the frame
    Stationary,
    /// Most people are near the frame edges, entering or leaving
    Transitional,
}

/// Overall risk bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// Behavioral observations attached to a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum BehaviorFlag {
    EmptyScene,
    ModerateTraffic,
    BusyPeriod,
    Overcrowded,
    CloseInteractions,
    GroupFormation,
    HighEngagement,
    LowVisibility,
    HighTrafficFlow,
    StationaryCrowd,
    AttentionRequired,
}

/// Derived crowd analytics for one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CrowdInsights {
    /// 0.0 (empty) to 1.0 (critical)
    pub congestion_score: f64,
    /// Person pairs whose centers are within the proximity threshold
    pub close_interactions: u32,
    pub engagement: EngagementLevel,
    pub flow_pattern: FlowPattern,
    /// Share of the frame covered by person boxes, capped at 1.0
    pub occupancy_rate: f64,
    pub risk_score: f64,
    pub risk_level: RiskLevel,
    pub behavior_flags: Vec<BehaviorFlag>,
    /// Mean confidence of person detections, 0 when there are none
    pub avg_person_confidence: f32,
    pub avg_face_confidence: f32,
}

/// Fraction of each frame side treated as the edge band.
const EDGE_MARGIN: f64 = 0.2;

impl CrowdInsights {
    pub fn analyze(set: &DetectionSet, width: u32, height: u32, thresholds: &CrowdThresholds) -> Self {
        let persons = set.person_count;
        let faces = set.face_count;
        let mut flags = Vec::new();

        let congestion_score = match set.crowd_density_level {
            CrowdDensityLevel::Empty => {
                flags.push(BehaviorFlag::EmptyScene);
                0.0
            }
            CrowdDensityLevel::Low => 0.2,
            CrowdDensityLevel::Medium => {
                flags.push(BehaviorFlag::ModerateTraffic);
                0.5
            }
            CrowdDensityLevel::High => {
                flags.push(BehaviorFlag::BusyPeriod);
                0.8
            }
            CrowdDensityLevel::Critical => {
                flags.push(BehaviorFlag::Overcrowded);
                1.0
            }
        };

        let centers: Vec<(f64, f64)> = set
            .person_detections
            .iter()
            .map(|d| d.bounding_box.center())
            .collect();

        let scale = width.min(height) as f64;
        let mut close_interactions = 0u32;
        for (i, a) in centers.iter().enumerate() {
            for b in &centers[i + 1..] {
                let distance = ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt() / scale;
                if distance < thresholds.proximity {
                    close_interactions += 1;
                }
            }
        }
        if close_interactions > 0 {
            flags.push(BehaviorFlag::CloseInteractions);
            if close_interactions as f64 >= persons as f64 / 2.0 {
                flags.push(BehaviorFlag::GroupFormation);
            }
        }

        let engagement = if persons == 0 {
            EngagementLevel::Low
        } else {
            let ratio = faces as f64 / persons as f64;
            if ratio >= 0.8 {
                flags.push(BehaviorFlag::HighEngagement);
                EngagementLevel::High
            } else if ratio >= 0.5 {
                EngagementLevel::Medium
            } else {
                flags.push(BehaviorFlag::LowVisibility);
                EngagementLevel::Low
            }
        };

        let (w, h) = (width as f64, height as f64);
        let edge = centers
            .iter()
            .filter(|(x, y)| {
                *x < w * EDGE_MARGIN
                    || *x > w * (1.0 - EDGE_MARGIN)
                    || *y < h * EDGE_MARGIN
                    || *y > h * (1.0 - EDGE_MARGIN)
            })
            .count();
        let interior = centers.len() - edge;
        let flow_pattern = if edge > interior {
            flags.push(BehaviorFlag::HighTrafficFlow);
            FlowPattern::Transitional
        } else {
            if !centers.is_empty() {
                flags.push(BehaviorFlag::StationaryCrowd);
            }
            FlowPattern::Stationary
        };

        let covered: f64 = set
            .person_detections
            .iter()
            .map(|d| d.bounding_box.clamp_to(width, height).area())
            .sum();
        let occupancy_rate = (covered / (w * h)).min(1.0);

        let mut risk_score = 0.0;
        if congestion_score > 0.8 {
            risk_score += 0.3;
        }
        if close_interactions as f64 > persons as f64 * 0.5 {
            risk_score += 0.2;
        }
        if engagement == EngagementLevel::Low && persons > 3 {
            risk_score += 0.2;
        }
        let risk_level = if risk_score > 0.6 {
            flags.push(BehaviorFlag::AttentionRequired);
            RiskLevel::High
        } else if risk_score > 0.3 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        };

        Self {
            congestion_score,
            close_interactions,
            engagement,
            flow_pattern,
            occupancy_rate,
            risk_score,
            risk_level,
            behavior_flags: flags,
            avg_person_confidence: mean_confidence(&set.person_detections),
            avg_face_confidence: mean_confidence(&set.face_detections),
        }
    }

    pub fn has_flag(&self, flag: BehaviorFlag) -> bool {
        self.behavior_flags.contains(&flag)
    }
}

fn mean_confidence(detections: &[Detection]) -> f32 {
    if detections.is_empty() {
        return 0.0;
    }
    detections.iter().map(|d| d.confidence).sum::<f32>() / detections.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::BoundingBox;

    fn person(cx: f64, cy: f64) -> Detection {
        Detection::person(BoundingBox::new(cx - 5.0, cy - 5.0, cx + 5.0, cy + 5.0), 0.9)
    }

    fn face(cx: f64, cy: f64) -> Detection {
        Detection::face(BoundingBox::new(cx - 2.0, cy - 2.0, cx + 2.0, cy + 2.0), 0.9)
    }

    fn insights(detections: Vec<Detection>) -> CrowdInsights {
        DetectionSet::assemble(detections, Some((100, 100)), &CrowdThresholds::default())
            .insights
            .unwrap()
    }

    #[test]
    fn test_empty_frame_insights() {
        let i = insights(Vec::new());
        assert_eq!(i.congestion_score, 0.0);
        assert_eq!(i.occupancy_rate, 0.0);
        assert_eq!(i.risk_level, RiskLevel::Low);
        assert_eq!(i.behavior_flags, vec![BehaviorFlag::EmptyScene]);
        assert_eq!(i.avg_person_confidence, 0.0);
    }

    #[test]
    fn test_close_interactions_and_group_formation() {
        // Two people 5px apart in a 100px frame: 0.05 < 0.15.
        let i = insights(vec![person(50.0, 50.0), person(55.0, 50.0)]);
        assert_eq!(i.close_interactions, 1);
        assert!(i.has_flag(BehaviorFlag::CloseInteractions));
        assert!(i.has_flag(BehaviorFlag::GroupFormation));
        assert!(i.has_flag(BehaviorFlag::StationaryCrowd));
    }

    #[test]
    fn test_engagement_levels() {
        let high = insights(vec![person(50.0, 50.0), face(50.0, 45.0)]);
        assert_eq!(high.engagement, EngagementLevel::High);
        assert!((high.avg_person_confidence - 0.9).abs() < 1e-6);
        assert!((high.avg_face_confidence - 0.9).abs() < 1e-6);
        assert!(high.has_flag(BehaviorFlag::HighEngagement));

        let medium = insights(vec![person(30.0, 50.0), person(70.0, 50.0), face(30.0, 45.0)]);
        assert_eq!(medium.engagement, EngagementLevel::Medium);

        let low = insights(vec![person(30.0, 50.0), person(70.0, 50.0)]);
        assert_eq!(low.engagement, EngagementLevel::Low);
        assert!(low.has_flag(BehaviorFlag::LowVisibility));
    }

    #[test]
    fn test_transitional_flow() {
        let i = insights(vec![person(5.0, 50.0), person(95.0, 50.0), person(50.0, 50.0)]);
        assert_eq!(i.flow_pattern, FlowPattern::Transitional);
        assert!(i.has_flag(BehaviorFlag::HighTrafficFlow));
    }

    #[test]
    fn test_occupancy_is_capped() {
        let giant = Detection::person(BoundingBox::new(-50.0, -50.0, 500.0, 500.0), 0.9);
        let i = insights(vec![giant.clone(), giant]);
        assert_eq!(i.occupancy_rate, 1.0);
    }

    #[test]
    fn test_high_risk_crowd() {
        // 12 people packed together with no faces: critical, close, low engagement.
        let people: Vec<Detection> = (0..12).map(|n| person(40.0 + n as f64, 50.0)).collect();
        let i = insights(people);
        assert_eq!(i.congestion_score, 1.0);
        assert!((i.risk_score - 0.7).abs() < 1e-9);
        assert_eq!(i.risk_level, RiskLevel::High);
        assert!(i.has_flag(BehaviorFlag::Overcrowded));
        assert!(i.has_flag(BehaviorFlag::AttentionRequired));
    }

    #[test]
    fn test_thresholds_validation() {
        assert!(CrowdThresholds::default().is_valid());
        let bad = CrowdThresholds {
            density_low: 8,
            density_medium: 5,
            ..CrowdThresholds::default()
        };
        assert!(!bad.is_valid());
    }
}
