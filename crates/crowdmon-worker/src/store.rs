//! In-memory detection result store.
//!
//! Per job, entries are kept sorted by frame index with non-decreasing
//! timestamps, so `nearest` is a binary search. Sets are shared behind `Arc`
//! and an append is a single push under the write lock, so readers never
//! observe a half-written entry.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crowdmon_models::{nearest_index, DetectionSet, JobId, TimedDetection};

use crate::error::{StoreError, StoreResult};

type Entries = Vec<Arc<TimedDetection>>;

#[derive(Debug, Default)]
pub struct DetectionStore {
    jobs: RwLock<HashMap<JobId, Entries>>,
}

impl DetectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<JobId, Entries>> {
        self.jobs.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<JobId, Entries>> {
        self.jobs.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record the detections for one frame.
    pub fn append(
        &self,
        job_id: &JobId,
        frame_index: u64,
        timestamp: f64,
        detections: DetectionSet,
    ) -> StoreResult<Arc<TimedDetection>> {
        let mut jobs = self.write();
        let entries = jobs.entry(job_id.clone()).or_default();

        if let Some(last) = entries.last() {
            if frame_index <= last.frame_index {
                let exists = entries
                    .binary_search_by_key(&frame_index, |e| e.frame_index)
                    .is_ok();
                if exists {
                    return Err(StoreError::DuplicateIndex {
                        job_id: job_id.clone(),
                        index: frame_index,
                    });
                }
            }
            if frame_index < last.frame_index || timestamp < last.timestamp {
                return Err(StoreError::OutOfOrder {
                    job_id: job_id.clone(),
                    index: frame_index,
                    timestamp,
                    last_index: last.frame_index,
                    last_timestamp: last.timestamp,
                });
            }
        }

        let entry = Arc::new(TimedDetection::new(frame_index, timestamp, detections));
        entries.push(Arc::clone(&entry));
        Ok(entry)
    }

    /// Entry whose timestamp is closest to `t`; ties go to the lower index.
    pub fn nearest(&self, job_id: &JobId, t: f64) -> Option<Arc<TimedDetection>> {
        let jobs = self.read();
        let entries = jobs.get(job_id)?;
        nearest_index(entries, t, |e| e.timestamp).map(|i| Arc::clone(&entries[i]))
    }

    /// Snapshot of every entry for a job, in frame order.
    pub fn entries(&self, job_id: &JobId) -> Vec<Arc<TimedDetection>> {
        self.read().get(job_id).cloned().unwrap_or_default()
    }

    pub fn len(&self, job_id: &JobId) -> usize {
        self.read().get(job_id).map(Vec::len).unwrap_or(0)
    }

    /// Number of jobs with stored results.
    pub fn job_count(&self) -> usize {
        self.read().len()
    }

    /// Drop a job's results. Returns whether anything was stored.
    pub fn discard(&self, job_id: &JobId) -> bool {
        self.write().remove(job_id).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crowdmon_models::CrowdThresholds;

    fn empty_set() -> DetectionSet {
        DetectionSet::assemble(Vec::new(), None, &CrowdThresholds::default())
    }

    fn store_with(job: &JobId, timestamps: &[f64]) -> DetectionStore {
        let store = DetectionStore::new();
        for (i, ts) in timestamps.iter().enumerate() {
            store.append(job, i as u64, *ts, empty_set()).unwrap();
        }
        store
    }

    #[test]
    fn test_nearest_match() {
        let job = JobId::from_string("j1");
        let store = store_with(&job, &[0.0, 0.5, 1.0, 2.0]);

        assert_eq!(store.nearest(&job, 0.9).unwrap().timestamp, 1.0);
        // Equidistant between 0.5 and 1.0: lower index wins
        assert_eq!(store.nearest(&job, 0.75).unwrap().timestamp, 0.5);
        assert_eq!(store.nearest(&job, -3.0).unwrap().frame_index, 0);
        assert_eq!(store.nearest(&job, 99.0).unwrap().frame_index, 3);
    }

    #[test]
    fn test_nearest_repeated_timestamps_pick_lowest_index() {
        let job = JobId::from_string("j1");
        // Frames 1 and 2 share a timestamp, as with a repeated decoder pts.
        let store = store_with(&job, &[0.0, 1.0, 1.0]);

        assert_eq!(store.nearest(&job, 1.0).unwrap().frame_index, 1);
        assert_eq!(store.nearest(&job, 1.3).unwrap().frame_index, 1);
        assert_eq!(store.nearest(&job, 5.0).unwrap().frame_index, 1);
    }

    #[test]
    fn test_nearest_empty_is_absent() {
        let store = DetectionStore::new();
        assert!(store.nearest(&JobId::from_string("none"), 1.0).is_none());
    }

    #[test]
    fn test_duplicate_index_rejected() {
        let job = JobId::from_string("j1");
        let store = store_with(&job, &[0.0, 0.5]);

        let err = store.append(&job, 1, 0.5, empty_set()).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateIndex { index: 1, .. }));
        let err = store.append(&job, 0, 0.0, empty_set()).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateIndex { index: 0, .. }));
        assert_eq!(store.len(&job), 2);
    }

    #[test]
    fn test_out_of_order_rejected() {
        let job = JobId::from_string("j1");
        let store = DetectionStore::new();
        store.append(&job, 0, 0.0, empty_set()).unwrap();
        store.append(&job, 5, 1.0, empty_set()).unwrap();

        let err = store.append(&job, 3, 0.5, empty_set()).unwrap_err();
        assert!(matches!(err, StoreError::OutOfOrder { index: 3, last_index: 5, .. }));

        let err = store.append(&job, 6, 0.9, empty_set()).unwrap_err();
        assert!(matches!(err, StoreError::OutOfOrder { index: 6, .. }));

        // Gaps are fine.
        store.append(&job, 9, 1.0, empty_set()).unwrap();
        assert_eq!(store.len(&job), 3);
    }

    #[test]
    fn test_jobs_are_independent() {
        let a = JobId::from_string("a");
        let b = JobId::from_string("b");
        let store = store_with(&a, &[0.0, 1.0]);
        store.append(&b, 0, 0.0, empty_set()).unwrap();

        assert_eq!(store.job_count(), 2);
        assert!(store.discard(&a));
        assert!(!store.discard(&a));
        assert!(store.entries(&a).is_empty());
        assert_eq!(store.entries(&b).len(), 1);
    }
}
