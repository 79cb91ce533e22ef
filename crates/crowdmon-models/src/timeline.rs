//! Timestamped detection results and playback lookup.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::detection::DetectionSet;
use crate::events::Event;
use crate::job::JobId;

/// Detections for one frame, positioned on the media timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TimedDetection {
    pub frame_index: u64,
    pub timestamp: f64,
    pub last_activity_text: String,
    pub detections: DetectionSet,
}

impl TimedDetection {
    pub fn new(frame_index: u64, timestamp: f64, detections: DetectionSet) -> Self {
        Self {
            frame_index,
            timestamp,
            last_activity_text: detections.activity_text(),
            detections,
        }
    }
}

/// Index of the entry whose timestamp is closest to `query`.
///
/// Timestamps must be non-decreasing. Ties resolve to the lowest index,
/// both between neighbours and among entries sharing a timestamp.
/// Queries before the first or after the last entry clamp to that entry.
pub fn nearest_index<T>(entries: &[T], query: f64, timestamp_of: impl Fn(&T) -> f64) -> Option<usize> {
    if entries.is_empty() || query.is_nan() {
        return None;
    }

    let upper = entries.partition_point(|entry| timestamp_of(entry) < query);
    let closest = if upper == 0 {
        0
    } else if upper == entries.len() {
        entries.len() - 1
    } else {
        let before = query - timestamp_of(&entries[upper - 1]);
        let after = timestamp_of(&entries[upper]) - query;
        if after < before {
            upper
        } else {
            upper - 1
        }
    };

    // Step back to the first entry with the same timestamp.
    let stamp = timestamp_of(&entries[closest]);
    Some(entries[..closest].partition_point(|entry| timestamp_of(entry) < stamp))
}

/// Client-side cache of one job's detections for synchronized playback.
#[derive(Debug, Clone, Default)]
pub struct PlaybackTimeline {
    job_id: Option<JobId>,
    entries: Vec<TimedDetection>,
}

impl PlaybackTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Timeline bound to a single job; events for other jobs are ignored.
    pub fn for_job(job_id: JobId) -> Self {
        Self {
            job_id: Some(job_id),
            entries: Vec::new(),
        }
    }

    /// Seed from a stored result list, e.g. after a late join.
    pub fn with_entries(job_id: JobId, entries: Vec<TimedDetection>) -> Self {
        let mut timeline = Self::for_job(job_id);
        for entry in entries {
            timeline.insert(entry);
        }
        timeline
    }

    pub fn job_id(&self) -> Option<&JobId> {
        self.job_id.as_ref()
    }

    /// Drop cached entries and follow a different job.
    pub fn reset(&mut self, job_id: JobId) {
        self.job_id = Some(job_id);
        self.entries.clear();
    }

    /// Add an entry, keeping frame order. A repeated frame index replaces
    /// the earlier entry.
    pub fn insert(&mut self, entry: TimedDetection) {
        match self.entries.last() {
            Some(last) if last.frame_index < entry.frame_index => self.entries.push(entry),
            None => self.entries.push(entry),
            Some(_) => {
                match self
                    .entries
                    .binary_search_by_key(&entry.frame_index, |e| e.frame_index)
                {
                    Ok(pos) => self.entries[pos] = entry,
                    Err(pos) => self.entries.insert(pos, entry),
                }
            }
        }
    }

    /// Feed a stream event. Returns true if the timeline changed.
    pub fn apply(&mut self, event: &Event) -> bool {
        let Event::DetectionUpdate {
            job_id,
            frame_index,
            timestamp,
            last_activity_text,
            detections,
        } = event
        else {
            return false;
        };

        match &self.job_id {
            Some(current) if current != job_id => return false,
            Some(_) => {}
            None => self.job_id = Some(job_id.clone()),
        }

        self.insert(TimedDetection {
            frame_index: *frame_index,
            timestamp: *timestamp,
            last_activity_text: last_activity_text.clone(),
            detections: detections.clone(),
        });
        true
    }

    /// Detections to draw at playback position `t` seconds.
    pub fn at(&self, t: f64) -> Option<&TimedDetection> {
        nearest_index(&self.entries, t, |e| e.timestamp).map(|i| &self.entries[i])
    }

    pub fn entries(&self) -> &[TimedDetection] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
