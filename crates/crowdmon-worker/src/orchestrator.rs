//! Job orchestrator.
//!
//! Owns the job table, the admission gate and the capability registry.
//! Submissions are admitted with a non-blocking `try_acquire_owned`; the
//! permit moves into the job's worker task and is released when the job
//! turns terminal.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tokio::sync::{Mutex, Semaphore};
use tracing::{info, warn};

use crowdmon_events::{EventBroadcaster, Subscription, SubscriptionFilter};
use crowdmon_media::{DetectorRegistry, FileSourceOpener, ReplayDetector, SourceOpener};
use crowdmon_models::{AnalysisJob, JobId, MediaKind, SystemPhase, TimedDetection};

use crate::config::WorkerConfig;
use crate::error::{SubmitError, WorkerError, WorkerResult};
use crate::handle::{CancelOutcome, JobHandle};
use crate::logging::JobLogger;
use crate::metrics;
use crate::processor::{FrameWorker, WorkerContext};
use crate::store::DetectionStore;

/// Capability warm-up state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Loading,
    Ready,
    Failed(String),
}

impl Readiness {
    pub fn phase(&self) -> SystemPhase {
        match self {
            Readiness::Loading => SystemPhase::Loading,
            Readiness::Ready => SystemPhase::Ready,
            Readiness::Failed(_) => SystemPhase::Error,
        }
    }
}

/// Cheaply cloneable handle to the orchestrator.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    config: WorkerConfig,
    opener: Arc<dyn SourceOpener>,
    ctx: Arc<WorkerContext>,
    jobs: RwLock<HashMap<JobId, Arc<JobHandle>>>,
    readiness: RwLock<Readiness>,
    init_lock: Mutex<()>,
}

impl Orchestrator {
    pub fn new(
        config: WorkerConfig,
        detectors: DetectorRegistry,
        opener: Arc<dyn SourceOpener>,
    ) -> Self {
        let max_active_jobs = config.max_active_jobs.max(1);
        let ctx = WorkerContext {
            detectors: Arc::new(detectors),
            store: Arc::new(DetectionStore::new()),
            events: Arc::new(EventBroadcaster::new(config.event_buffer_capacity)),
            admission: Arc::new(Semaphore::new(max_active_jobs)),
            max_active_jobs,
            thresholds: config.thresholds.clone(),
            capability_timeout: config.capability_timeout,
            output_dir: config
                .annotate_output
                .then(|| config.output_dir.clone()),
        };
        Self {
            inner: Arc::new(Inner {
                config,
                opener,
                ctx: Arc::new(ctx),
                jobs: RwLock::new(HashMap::new()),
                readiness: RwLock::new(Readiness::Loading),
                init_lock: Mutex::new(()),
            }),
        }
    }

    /// Orchestrator reading assets from disk, relative references resolved
    /// against `asset_dir`.
    pub fn from_config(config: WorkerConfig, asset_dir: impl Into<PathBuf>) -> Self {
        let opener = FileSourceOpener::new(config.source.clone()).with_base_dir(asset_dir);
        let detectors = default_detectors(&config);
        Self::new(config, detectors, Arc::new(opener))
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.inner.config
    }

    pub fn events(&self) -> Arc<EventBroadcaster> {
        Arc::clone(&self.inner.ctx.events)
    }

    pub fn subscribe(&self, filter: SubscriptionFilter) -> Subscription {
        self.inner.ctx.events.subscribe(filter)
    }

    pub fn store(&self) -> Arc<DetectionStore> {
        Arc::clone(&self.inner.ctx.store)
    }

    pub fn readiness(&self) -> Readiness {
        self.inner
            .readiness
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn set_readiness(&self, readiness: Readiness) {
        *self
            .inner
            .readiness
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = readiness;
    }

    /// Names of the registered capabilities, in order.
    pub fn capabilities(&self) -> Vec<String> {
        self.inner.ctx.detectors.names()
    }

    /// Jobs currently holding an admission permit.
    pub fn active_jobs(&self) -> usize {
        let ctx = &self.inner.ctx;
        ctx.max_active_jobs
            .saturating_sub(ctx.admission.available_permits())
    }

    /// Warm up every capability in registration order.
    ///
    /// Publishes `LOADING`, one loading-progress event per capability, then
    /// `READY` or `ERROR`. Calling again after success is a no-op; after a
    /// failure it retries.
    pub async fn initialize(&self) -> WorkerResult<()> {
        let _guard = self.inner.init_lock.lock().await;
        if self.readiness() == Readiness::Ready {
            return Ok(());
        }

        let logger = JobLogger::from_string("system", "initialize");
        let events = &self.inner.ctx.events;
        let detectors = &self.inner.ctx.detectors;
        let total = detectors.len();

        self.set_readiness(Readiness::Loading);
        events.system_status(SystemPhase::Loading, "Loading detection capabilities...");
        logger.log_start(&format!("warming up {} capabilities", total));

        for (i, detector) in detectors.iter().enumerate() {
            let percent = (i * 100 / total) as u8;
            events.loading_progress(
                percent,
                format!("Loading {} ({}/{})", detector.name(), i + 1, total),
            );

            let name = detector.name().to_string();
            let detector = Arc::clone(detector);
            let result = match tokio::task::spawn_blocking(move || detector.warm_up()).await {
                Ok(result) => result.map_err(|e| e.to_string()),
                Err(e) => Err(format!("{name} warm-up task aborted: {e}")),
            };
            if let Err(message) = result {
                logger.log_error(&message);
                self.set_readiness(Readiness::Failed(message.clone()));
                events.system_status(SystemPhase::Error, message.clone());
                return Err(WorkerError::initialization(message));
            }
            logger.log_progress(&format!("{name} ready"));
        }

        events.loading_progress(100, "All detection capabilities loaded");
        self.set_readiness(Readiness::Ready);
        events.system_status(
            SystemPhase::Ready,
            format!("Ready with {} detection capabilities", total),
        );
        logger.log_completion("capabilities ready");
        Ok(())
    }

    fn ensure_ready(&self) -> Result<(), SubmitError> {
        match self.readiness() {
            Readiness::Ready => Ok(()),
            Readiness::Loading => Err(SubmitError::not_ready(
                "Detection capabilities are still loading",
            )),
            Readiness::Failed(message) => Err(SubmitError::not_ready(format!(
                "Detection capabilities failed to load: {message}"
            ))),
        }
    }

    /// Admit a job and spawn its worker.
    pub async fn submit(&self, asset_ref: &str, kind: MediaKind) -> Result<JobId, SubmitError> {
        let result = self.try_submit(asset_ref, kind).await;
        if let Err(e) = &result {
            metrics::record_job_rejected(e.kind().as_str());
            info!(asset_ref, error = %e, "Submission rejected");
        }
        result
    }

    async fn try_submit(&self, asset_ref: &str, kind: MediaKind) -> Result<JobId, SubmitError> {
        self.ensure_ready()?;

        let ctx = &self.inner.ctx;
        let permit = Arc::clone(&ctx.admission)
            .try_acquire_owned()
            .map_err(|_| SubmitError::CapacityExceeded {
                limit: ctx.max_active_jobs,
            })?;

        // The permit is dropped on any early return below.
        let source = self
            .inner
            .opener
            .open(asset_ref, kind)
            .await
            .map_err(|e| SubmitError::invalid_asset(e.to_string()))?;

        let job = AnalysisJob::new(asset_ref, kind, source.total_frames());
        let job_id = job.id.clone();
        let (handle, cancelled) = JobHandle::new(job);
        let handle = Arc::new(handle);

        self.inner
            .jobs
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(job_id.clone(), Arc::clone(&handle));

        metrics::record_job_submitted(kind.as_str());
        ctx.report_active_jobs();
        info!(job_id = %job_id, asset_ref, kind = kind.as_str(), "Job accepted");

        let worker = FrameWorker::new(handle, source, cancelled, Arc::clone(ctx));
        tokio::spawn(worker.run(permit));
        Ok(job_id)
    }

    fn handle(&self, job_id: &JobId) -> WorkerResult<Arc<JobHandle>> {
        self.inner
            .jobs
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(job_id)
            .cloned()
            .ok_or_else(|| WorkerError::JobNotFound(job_id.clone()))
    }

    /// Ask a job to stop at the next frame boundary.
    pub fn cancel(&self, job_id: &JobId) -> WorkerResult<CancelOutcome> {
        let outcome = self.handle(job_id)?.request_stop();
        info!(job_id = %job_id, state = outcome.state().as_str(), "Cancel requested");
        Ok(outcome)
    }

    pub fn status(&self, job_id: &JobId) -> WorkerResult<AnalysisJob> {
        Ok(self.handle(job_id)?.snapshot())
    }

    /// All known jobs, newest first.
    pub fn list(&self) -> Vec<AnalysisJob> {
        let mut jobs: Vec<AnalysisJob> = self
            .inner
            .jobs
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .map(|handle| handle.snapshot())
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        jobs
    }

    pub fn results(&self, job_id: &JobId) -> WorkerResult<Vec<Arc<TimedDetection>>> {
        self.handle(job_id)?;
        Ok(self.inner.ctx.store.entries(job_id))
    }

    pub fn nearest(&self, job_id: &JobId, t: f64) -> WorkerResult<Option<Arc<TimedDetection>>> {
        self.handle(job_id)?;
        Ok(self.inner.ctx.store.nearest(job_id, t))
    }

    /// Forget terminal jobs whose retention period has passed. Returns the
    /// number of jobs removed.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let Ok(retention) = chrono::Duration::from_std(self.inner.config.result_retention) else {
            return 0;
        };

        let mut jobs = self
            .inner
            .jobs
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let expired: Vec<JobId> = jobs
            .iter()
            .filter_map(|(id, handle)| {
                let job = handle.snapshot();
                let finished = job.finished_at.filter(|_| job.is_terminal())?;
                (now.signed_duration_since(finished) >= retention).then(|| id.clone())
            })
            .collect();

        for job_id in &expired {
            jobs.remove(job_id);
            self.inner.ctx.store.discard(job_id);
        }
        if !expired.is_empty() {
            metrics::record_results_expired(expired.len());
        }
        expired.len()
    }
}

/// Capabilities selected by configuration.
pub fn default_detectors(config: &WorkerConfig) -> DetectorRegistry {
    let mut registry = DetectorRegistry::new();
    match &config.replay_path {
        Some(path) => registry.register(Arc::new(ReplayDetector::from_path(path))),
        None => warn!("No detection capability configured; every frame will report an empty scene"),
    }
    registry
}
