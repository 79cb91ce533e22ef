//! End-to-end pipeline tests: orchestrator, worker, store and broadcaster
//! wired together over in-memory frame sources.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crowdmon_events::{Subscription, SubscriptionFilter};
use crowdmon_media::{
    Detector, DetectorError, DetectorRegistry, Frame, FrameSource, MediaError, MediaResult,
    MemoryFrameSource, ReplayDetector, SourceOpener,
};
use crowdmon_models::{
    BoundingBox, CrowdDensityLevel, Detection, ErrorKind, Event, JobId, JobState, MediaKind,
};
use crowdmon_worker::{CancelOutcome, Orchestrator, SubmitError, WorkerConfig, WorkerError};

/// Serves pre-registered in-memory sources by asset reference.
#[derive(Default)]
struct ScriptedOpener {
    sources: Mutex<HashMap<String, MemoryFrameSource>>,
}

impl ScriptedOpener {
    fn with(self, asset_ref: &str, source: MemoryFrameSource) -> Self {
        self.sources
            .lock()
            .unwrap()
            .insert(asset_ref.to_string(), source);
        self
    }
}

#[async_trait]
impl SourceOpener for ScriptedOpener {
    async fn open(&self, asset_ref: &str, _kind: MediaKind) -> MediaResult<Box<dyn FrameSource>> {
        self.sources
            .lock()
            .unwrap()
            .remove(asset_ref)
            .map(|source| Box::new(source) as Box<dyn FrameSource>)
            .ok_or_else(|| MediaError::FileNotFound(asset_ref.into()))
    }
}

/// Sleeps on every frame; optionally fails or panics on one of them.
struct Scripted {
    delay: Duration,
    fail_on: Option<u64>,
    panic_on: Option<u64>,
}

impl Scripted {
    fn slow(delay: Duration) -> Self {
        Self {
            delay,
            fail_on: None,
            panic_on: None,
        }
    }
}

impl Detector for Scripted {
    fn name(&self) -> &str {
        "scripted"
    }

    fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, DetectorError> {
        std::thread::sleep(self.delay);
        if self.panic_on == Some(frame.index) {
            panic!("capability crashed");
        }
        if self.fail_on == Some(frame.index) {
            return Err(DetectorError::failed("scripted", frame.index, "model error"));
        }
        Ok(Vec::new())
    }
}

fn test_config() -> WorkerConfig {
    WorkerConfig {
        annotate_output: false,
        ..WorkerConfig::default()
    }
}

async fn ready(config: WorkerConfig, detectors: DetectorRegistry, opener: ScriptedOpener) -> Orchestrator {
    let orch = Orchestrator::new(config, detectors, Arc::new(opener));
    orch.initialize().await.unwrap();
    orch
}

/// Job events up to and including the terminal one.
async fn run_to_end(sub: &mut Subscription, job_id: &JobId) -> Vec<Event> {
    tokio::time::timeout(Duration::from_secs(10), async {
        let mut seen = Vec::new();
        while let Some(event) = sub.recv().await {
            if event.job_id() != Some(job_id) {
                continue;
            }
            let terminal = event.is_terminal();
            seen.push((*event).clone());
            if terminal {
                break;
            }
        }
        seen
    })
    .await
    .expect("job did not reach a terminal state")
}

fn progress_percents(events: &[Event]) -> Vec<u8> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::JobProgress { percent, .. } => Some(*percent),
            _ => None,
        })
        .collect()
}

fn two_people() -> Vec<Detection> {
    vec![
        Detection::person(BoundingBox::new(10.0, 10.0, 60.0, 150.0), 0.91),
        Detection::person(BoundingBox::new(300.0, 40.0, 360.0, 200.0), 0.87),
    ]
}

#[tokio::test]
async fn test_ten_frame_scenario() {
    let fixtures: HashMap<u64, Vec<Detection>> = (0..5).map(|i| (i, two_people())).collect();
    let orch = ready(
        test_config(),
        DetectorRegistry::new().with(ReplayDetector::from_frames(fixtures)),
        ScriptedOpener::default().with("walkway.mp4", MemoryFrameSource::uniform(10, 10.0, 640, 480)),
    )
    .await;

    let mut sub = orch.subscribe(SubscriptionFilter::All);
    let job_id = orch.submit("walkway.mp4", MediaKind::Video).await.unwrap();
    let events = run_to_end(&mut sub, &job_id).await;

    let densities: Vec<(u64, CrowdDensityLevel)> = events
        .iter()
        .filter_map(|e| match e {
            Event::DetectionUpdate {
                frame_index,
                detections,
                ..
            } => Some((*frame_index, detections.crowd_density_level)),
            _ => None,
        })
        .collect();
    assert_eq!(densities.len(), 10);
    for (index, level) in &densities {
        let expected = if *index < 5 {
            CrowdDensityLevel::Low
        } else {
            CrowdDensityLevel::Empty
        };
        assert_eq!(*level, expected, "frame {index}");
    }

    let percents = progress_percents(&events);
    assert!(percents.windows(2).all(|w| w[0] <= w[1]), "{percents:?}");
    assert_eq!(percents.last(), Some(&100));
    assert!(percents[..percents.len() - 1].iter().all(|p| *p <= 99));

    // Each frame's progress precedes its detection update.
    let first_progress = events
        .iter()
        .position(|e| matches!(e, Event::JobProgress { frame_index: 0, .. }))
        .unwrap();
    let first_update = events
        .iter()
        .position(|e| matches!(e, Event::DetectionUpdate { frame_index: 0, .. }))
        .unwrap();
    assert!(first_progress < first_update);

    match events.last() {
        Some(Event::JobCompleted { total_units, .. }) => assert_eq!(*total_units, 10),
        other => panic!("expected JobCompleted, got {other:?}"),
    }
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);

    let job = orch.status(&job_id).unwrap();
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.percent, 100);
    assert_eq!(orch.results(&job_id).unwrap().len(), 10);
    let at = orch.nearest(&job_id, 0.42).unwrap().unwrap();
    assert_eq!(at.frame_index, 4);
    assert_eq!(at.detections.person_count, 2);
}

#[tokio::test]
async fn test_still_image_emits_single_update() {
    let orch = ready(
        test_config(),
        DetectorRegistry::new().with(ReplayDetector::from_frames(HashMap::from([(0, two_people())]))),
        ScriptedOpener::default().with(
            "plaza.png",
            MemoryFrameSource::new(vec![Frame::filled(0, 0.0, 640, 480, [0, 0, 0])]),
        ),
    )
    .await;

    let mut sub = orch.subscribe(SubscriptionFilter::All);
    let job_id = orch.submit("plaza.png", MediaKind::Image).await.unwrap();
    assert_eq!(orch.status(&job_id).unwrap().total_units, Some(1));

    let events = run_to_end(&mut sub, &job_id).await;
    let updates = events
        .iter()
        .filter(|e| matches!(e, Event::DetectionUpdate { .. }))
        .count();
    assert_eq!(updates, 1);
    assert!(matches!(
        events.last(),
        Some(Event::JobCompleted { total_units: 1, .. })
    ));
}

#[tokio::test]
async fn test_unknown_total_stays_below_complete() {
    let orch = ready(
        test_config(),
        DetectorRegistry::new(),
        ScriptedOpener::default().with(
            "stream.mp4",
            MemoryFrameSource::uniform(6, 5.0, 32, 32).with_total(None),
        ),
    )
    .await;

    let mut sub = orch.subscribe(SubscriptionFilter::All);
    let job_id = orch.submit("stream.mp4", MediaKind::Video).await.unwrap();
    let percents = progress_percents(&run_to_end(&mut sub, &job_id).await);

    assert_eq!(percents.len(), 7);
    assert!(percents[..6].iter().all(|p| *p <= 99));
    assert!(percents.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(percents[6], 100);
}

#[tokio::test]
async fn test_single_flight_admission() {
    let orch = ready(
        test_config(),
        DetectorRegistry::new().with(Scripted::slow(Duration::from_millis(20))),
        ScriptedOpener::default()
            .with("first.mp4", MemoryFrameSource::uniform(100, 25.0, 32, 32))
            .with("second.mp4", MemoryFrameSource::uniform(2, 25.0, 32, 32))
            .with("third.mp4", MemoryFrameSource::uniform(2, 25.0, 32, 32)),
    )
    .await;

    let mut sub = orch.subscribe(SubscriptionFilter::All);
    let first = orch.submit("first.mp4", MediaKind::Video).await.unwrap();

    let err = orch.submit("second.mp4", MediaKind::Video).await.unwrap_err();
    assert!(matches!(err, SubmitError::CapacityExceeded { limit: 1 }));
    assert_eq!(err.kind(), ErrorKind::CapacityExceeded);
    assert_eq!(orch.active_jobs(), 1);

    orch.cancel(&first).unwrap();
    run_to_end(&mut sub, &first).await;

    // The slot is free as soon as the terminal event is out.
    assert_eq!(orch.active_jobs(), 0);
    orch.submit("third.mp4", MediaKind::Video).await.unwrap();
}

#[tokio::test]
async fn test_cancel_bound_and_idempotence() {
    let orch = ready(
        test_config(),
        DetectorRegistry::new().with(Scripted::slow(Duration::from_millis(15))),
        ScriptedOpener::default().with("long.mp4", MemoryFrameSource::uniform(200, 25.0, 32, 32)),
    )
    .await;

    let mut sub = orch.subscribe(SubscriptionFilter::All);
    let job_id = orch.submit("long.mp4", MediaKind::Video).await.unwrap();

    // Let a few frames through.
    loop {
        let event = sub.recv().await.unwrap();
        if matches!(*event, Event::JobProgress { frame_index, .. } if frame_index >= 2) {
            break;
        }
    }

    let processed_at_cancel = orch.status(&job_id).unwrap().processed_units;
    let first = orch.cancel(&job_id).unwrap();
    let second = orch.cancel(&job_id).unwrap();
    assert!(first.is_acknowledged());
    assert!(second.is_acknowledged());

    let events = run_to_end(&mut sub, &job_id).await;
    let stopped: Vec<&Event> = events
        .iter()
        .filter(|e| matches!(e, Event::JobStopped { .. }))
        .collect();
    assert_eq!(stopped.len(), 1);
    match stopped[0] {
        Event::JobStopped { reason, .. } => assert_eq!(reason, "stopped by request"),
        _ => unreachable!(),
    }
    assert!(!events
        .iter()
        .any(|e| matches!(e, Event::JobCompleted { .. } | Event::JobFailed { .. })));

    let job = orch.status(&job_id).unwrap();
    assert_eq!(job.state, JobState::Stopped);
    assert!(job.processed_units <= processed_at_cancel + 1);
    assert!(job.percent < 100);
    // Partial results stay readable.
    assert_eq!(orch.results(&job_id).unwrap().len() as u64, job.processed_units);

    // Cancelling again after the stop took effect is still acknowledged.
    let again = orch.cancel(&job_id).unwrap();
    assert_eq!(again, CancelOutcome::AlreadyTerminal(JobState::Stopped));
    assert!(again.is_acknowledged());
}

#[tokio::test]
async fn test_cancel_while_queued() {
    let orch = ready(
        test_config(),
        DetectorRegistry::new(),
        ScriptedOpener::default().with("queued.mp4", MemoryFrameSource::uniform(5, 25.0, 32, 32)),
    )
    .await;

    let mut sub = orch.subscribe(SubscriptionFilter::All);
    let job_id = orch.submit("queued.mp4", MediaKind::Video).await.unwrap();
    // The worker task has not been polled yet on this single-threaded runtime.
    assert_eq!(orch.status(&job_id).unwrap().state, JobState::Queued);
    assert_eq!(
        orch.cancel(&job_id).unwrap(),
        CancelOutcome::Acknowledged(JobState::Stopping)
    );

    let events = run_to_end(&mut sub, &job_id).await;
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], Event::JobStopped { .. }));
    assert_eq!(orch.status(&job_id).unwrap().processed_units, 0);
}

#[tokio::test]
async fn test_decode_failure_keeps_partial_results() {
    let orch = ready(
        test_config(),
        DetectorRegistry::new(),
        ScriptedOpener::default().with(
            "corrupt.mp4",
            MemoryFrameSource::uniform(6, 25.0, 32, 32).fail_at(3, "corrupt packet"),
        ),
    )
    .await;

    let mut sub = orch.subscribe(SubscriptionFilter::All);
    let job_id = orch.submit("corrupt.mp4", MediaKind::Video).await.unwrap();
    let events = run_to_end(&mut sub, &job_id).await;

    match events.last() {
        Some(Event::JobFailed {
            error_kind,
            message,
            ..
        }) => {
            assert_eq!(*error_kind, ErrorKind::DecodeFailure);
            assert!(message.contains("corrupt packet"), "{message}");
        }
        other => panic!("expected JobFailed, got {other:?}"),
    }

    let job = orch.status(&job_id).unwrap();
    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.processed_units, 3);
    assert_eq!(job.percent, 50);
    assert_eq!(orch.results(&job_id).unwrap().len(), 3);
}

#[tokio::test]
async fn test_capability_failure() {
    let orch = ready(
        test_config(),
        DetectorRegistry::new().with(Scripted {
            delay: Duration::ZERO,
            fail_on: Some(1),
            panic_on: None,
        }),
        ScriptedOpener::default().with("a.mp4", MemoryFrameSource::uniform(4, 25.0, 32, 32)),
    )
    .await;

    let mut sub = orch.subscribe(SubscriptionFilter::All);
    let job_id = orch.submit("a.mp4", MediaKind::Video).await.unwrap();
    let events = run_to_end(&mut sub, &job_id).await;

    assert!(matches!(
        events.last(),
        Some(Event::JobFailed {
            error_kind: ErrorKind::CapabilityFailure,
            ..
        })
    ));
    assert_eq!(orch.results(&job_id).unwrap().len(), 1);
}

#[tokio::test]
async fn test_capability_panic_fails_job_only() {
    let orch = ready(
        test_config(),
        DetectorRegistry::new().with(Scripted {
            delay: Duration::ZERO,
            fail_on: None,
            panic_on: Some(0),
        }),
        ScriptedOpener::default()
            .with("a.mp4", MemoryFrameSource::uniform(2, 25.0, 32, 32))
            .with("b.png", MemoryFrameSource::new(Vec::new())),
    )
    .await;

    let mut sub = orch.subscribe(SubscriptionFilter::All);
    let job_id = orch.submit("a.mp4", MediaKind::Video).await.unwrap();
    let events = run_to_end(&mut sub, &job_id).await;
    assert!(matches!(
        events.last(),
        Some(Event::JobFailed {
            error_kind: ErrorKind::CapabilityFailure,
            ..
        })
    ));

    // The orchestrator keeps accepting work.
    orch.submit("b.png", MediaKind::Image).await.unwrap();
}

#[tokio::test]
async fn test_capability_timeout() {
    let config = WorkerConfig {
        capability_timeout: Some(Duration::from_millis(20)),
        ..test_config()
    };
    let orch = ready(
        config,
        DetectorRegistry::new().with(Scripted::slow(Duration::from_millis(300))),
        ScriptedOpener::default().with("slow.mp4", MemoryFrameSource::uniform(3, 25.0, 32, 32)),
    )
    .await;

    let mut sub = orch.subscribe(SubscriptionFilter::All);
    let job_id = orch.submit("slow.mp4", MediaKind::Video).await.unwrap();
    let events = run_to_end(&mut sub, &job_id).await;

    assert!(matches!(
        events.last(),
        Some(Event::JobFailed {
            error_kind: ErrorKind::CapabilityFailure,
            ..
        })
    ));
    assert_eq!(orch.status(&job_id).unwrap().processed_units, 0);
}

#[tokio::test]
async fn test_submit_before_initialize_is_not_ready() {
    let orch = Orchestrator::new(
        test_config(),
        DetectorRegistry::new(),
        Arc::new(ScriptedOpener::default().with("a.png", MemoryFrameSource::uniform(1, 1.0, 8, 8))),
    );
    let err = orch.submit("a.png", MediaKind::Image).await.unwrap_err();
    assert!(matches!(err, SubmitError::NotReady(_)));
    assert_eq!(err.kind(), ErrorKind::NotReady);
}

#[tokio::test]
async fn test_unopenable_asset_is_invalid() {
    let orch = ready(test_config(), DetectorRegistry::new(), ScriptedOpener::default()).await;
    let err = orch.submit("missing.mp4", MediaKind::Video).await.unwrap_err();
    assert!(matches!(err, SubmitError::InvalidAsset(_)));
    assert_eq!(orch.active_jobs(), 0);
    assert!(orch.list().is_empty());
}

#[tokio::test]
async fn test_annotated_image_output() {
    let dir = tempfile::tempdir().unwrap();
    let config = WorkerConfig {
        annotate_output: true,
        output_dir: dir.path().to_path_buf(),
        ..WorkerConfig::default()
    };
    let orch = ready(
        config,
        DetectorRegistry::new().with(ReplayDetector::from_frames(HashMap::from([(0, two_people())]))),
        ScriptedOpener::default().with(
            "plaza.png",
            MemoryFrameSource::new(vec![Frame::filled(0, 0.0, 640, 480, [20, 20, 20])]),
        ),
    )
    .await;

    let mut sub = orch.subscribe(SubscriptionFilter::All);
    let job_id = orch.submit("plaza.png", MediaKind::Image).await.unwrap();
    let events = run_to_end(&mut sub, &job_id).await;

    let expected = format!("{}_annotated.png", job_id);
    match events.last() {
        Some(Event::JobCompleted { output_ref, .. }) => {
            assert_eq!(output_ref.as_deref(), Some(expected.as_str()))
        }
        other => panic!("expected JobCompleted, got {other:?}"),
    }
    assert!(dir.path().join(&expected).is_file());
    assert_eq!(
        orch.status(&job_id).unwrap().output_ref.as_deref(),
        Some(expected.as_str())
    );
}

#[tokio::test]
async fn test_failed_job_leaves_no_output() {
    let dir = tempfile::tempdir().unwrap();
    let config = WorkerConfig {
        annotate_output: true,
        output_dir: dir.path().to_path_buf(),
        ..WorkerConfig::default()
    };
    let orch = ready(
        config,
        DetectorRegistry::new(),
        ScriptedOpener::default().with(
            "broken.png",
            MemoryFrameSource::new(vec![Frame::filled(0, 0.0, 16, 16, [0, 0, 0])]).fail_at(0, "bad"),
        ),
    )
    .await;

    let mut sub = orch.subscribe(SubscriptionFilter::All);
    let job_id = orch.submit("broken.png", MediaKind::Image).await.unwrap();
    run_to_end(&mut sub, &job_id).await;

    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_retention_sweep_discards_finished_jobs() {
    let config = WorkerConfig {
        result_retention: Duration::ZERO,
        ..test_config()
    };
    let orch = ready(
        config,
        DetectorRegistry::new(),
        ScriptedOpener::default().with("a.mp4", MemoryFrameSource::uniform(2, 25.0, 8, 8)),
    )
    .await;

    let mut sub = orch.subscribe(SubscriptionFilter::All);
    let job_id = orch.submit("a.mp4", MediaKind::Video).await.unwrap();
    run_to_end(&mut sub, &job_id).await;

    let removed = orch.sweep_expired(chrono::Utc::now() + chrono::Duration::seconds(1));
    assert_eq!(removed, 1);
    assert!(matches!(orch.status(&job_id), Err(WorkerError::JobNotFound(_))));
    assert!(orch.store().entries(&job_id).is_empty());
}
