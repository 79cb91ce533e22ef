//! Frame processing worker.
//!
//! One worker task per accepted job. It pulls frames from the source, runs
//! every capability on the blocking pool, assembles the detection set,
//! appends it to the result store and publishes progress. The cancel flag is
//! checked once per frame boundary, so at most one frame is processed after
//! a stop request.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, Instrument};

use crowdmon_events::EventBroadcaster;
use crowdmon_media::{output_file_name, AnnotatedOutput, DetectorRegistry, Frame, FrameSource};
use crowdmon_models::{
    CrowdThresholds, Detection, DetectionSet, Event, JobId, JobState, MediaKind,
};

use crate::error::{WorkerError, WorkerResult};
use crate::handle::JobHandle;
use crate::logging::JobLogger;
use crate::metrics;
use crate::store::DetectionStore;

pub(crate) const STOP_REASON: &str = "stopped by request";

/// Everything a worker shares with the orchestrator.
pub(crate) struct WorkerContext {
    pub detectors: Arc<DetectorRegistry>,
    pub store: Arc<DetectionStore>,
    pub events: Arc<EventBroadcaster>,
    pub admission: Arc<Semaphore>,
    pub max_active_jobs: usize,
    pub thresholds: CrowdThresholds,
    pub capability_timeout: Option<Duration>,
    /// `None` disables annotated output
    pub output_dir: Option<PathBuf>,
}

impl WorkerContext {
    pub(crate) fn report_active_jobs(&self) {
        let active = self
            .max_active_jobs
            .saturating_sub(self.admission.available_permits());
        metrics::set_active_jobs(active);
    }
}

pub(crate) struct FrameWorker {
    job_id: JobId,
    kind: MediaKind,
    handle: Arc<JobHandle>,
    source: Box<dyn FrameSource>,
    cancelled: watch::Receiver<bool>,
    ctx: Arc<WorkerContext>,
    logger: JobLogger,
    last_index: Option<u64>,
}

impl FrameWorker {
    pub(crate) fn new(
        handle: Arc<JobHandle>,
        source: Box<dyn FrameSource>,
        cancelled: watch::Receiver<bool>,
        ctx: Arc<WorkerContext>,
    ) -> Self {
        let job = handle.snapshot();
        Self {
            logger: JobLogger::new(&job.id, "frame_analysis"),
            job_id: job.id,
            kind: job.kind,
            handle,
            source,
            cancelled,
            ctx,
            last_index: None,
        }
    }

    /// Drive the job to a terminal state. The permit is released after the
    /// record turns terminal and before the terminal event goes out.
    pub(crate) async fn run(self, permit: OwnedSemaphorePermit) {
        let span = self.logger.create_span();
        self.execute(permit).instrument(span).await
    }

    async fn execute(mut self, permit: OwnedSemaphorePermit) {
        let mut output = self.create_output();
        let result = self.process_frames(&mut output).await;

        let events = match result {
            Ok(()) if self.stop_requested() => self.finish_stopped(output).await,
            Ok(()) => self.finish_completed(output).await,
            Err(err) => self.finish_failed(err, output).await,
        };

        drop(permit);
        self.ctx.report_active_jobs();
        for event in events {
            self.ctx.events.publish(event);
        }
    }

    fn stop_requested(&self) -> bool {
        *self.cancelled.borrow() || self.handle.snapshot().state == JobState::Stopping
    }

    fn create_output(&self) -> Option<AnnotatedOutput> {
        let dir = self.ctx.output_dir.as_ref()?;
        let path = dir.join(output_file_name(self.job_id.as_str(), self.kind));
        Some(AnnotatedOutput::new(self.kind, path, self.source.frame_rate()))
    }

    async fn process_frames(&mut self, output: &mut Option<AnnotatedOutput>) -> WorkerResult<()> {
        if !self.handle.update(|job| job.start()) {
            debug!("Stop requested before the first frame");
            return Ok(());
        }
        self.logger.log_start(&format!(
            "{} analysis with {} capabilities",
            self.kind.as_str(),
            self.ctx.detectors.len()
        ));

        if let Some(dir) = &self.ctx.output_dir {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| WorkerError::output(e.into()))?;
        }

        loop {
            if *self.cancelled.borrow() {
                self.logger.log_progress("stop requested, no further frames");
                break;
            }

            let started = Instant::now();
            let Some(frame) = self.source.next_frame().await.map_err(WorkerError::decode)? else {
                break;
            };
            let (frame, found) = Self::detect(Arc::clone(&self.ctx), frame).await?;
            let set = DetectionSet::assemble(
                found,
                Some((frame.width, frame.height)),
                &self.ctx.thresholds,
            );

            if let Some(output) = output.as_mut() {
                output
                    .write_frame(&frame, &set)
                    .await
                    .map_err(WorkerError::output)?;
            }

            let entry = self
                .ctx
                .store
                .append(&self.job_id, frame.index, frame.timestamp_seconds, set)
                .map_err(|e| {
                    error!(job_id = %self.job_id, error = %e, "Result store invariant violated");
                    WorkerError::from(e)
                })?;
            self.last_index = Some(frame.index);

            let estimate = self.source.total_frames();
            let (percent, processed, total) = self.handle.update(|job| {
                let percent = job.record_frame(estimate);
                (percent, job.processed_units, job.total_units.unwrap_or(job.processed_units))
            });

            self.ctx.events.publish(Event::job_progress(
                self.job_id.clone(),
                percent,
                format!("Processing frame {}/{}", processed, total),
                frame.index,
            ));
            self.ctx.events.publish(Event::detection_update(
                self.job_id.clone(),
                entry.frame_index,
                entry.timestamp,
                entry.detections.clone(),
            ));

            metrics::record_frame(self.kind.as_str(), started.elapsed().as_secs_f64());
            debug!(
                frame = frame.index,
                persons = entry.detections.person_count,
                faces = entry.detections.face_count,
                percent,
                "Frame processed"
            );
        }
        Ok(())
    }

    /// Run every capability on the blocking pool.
    ///
    /// Takes the context by value so the worker future stays `Send` while
    /// the call is pending.
    async fn detect(ctx: Arc<WorkerContext>, frame: Frame) -> WorkerResult<(Frame, Vec<Detection>)> {
        let index = frame.index;
        let detectors = Arc::clone(&ctx.detectors);
        let task = tokio::task::spawn_blocking(move || {
            let found = detectors.detect_all(&frame);
            (frame, found)
        });

        let joined = match ctx.capability_timeout {
            // A timed-out call keeps its blocking thread; only the result is abandoned.
            Some(timeout) => tokio::time::timeout(timeout, task)
                .await
                .map_err(|_| WorkerError::CapabilityTimeout { index, timeout })?,
            None => task.await,
        };
        let (frame, found) = joined.map_err(|e| WorkerError::CapabilityAborted {
            index,
            message: e.to_string(),
        })?;
        Ok((frame, found?))
    }

    async fn finish_completed(&mut self, output: Option<AnnotatedOutput>) -> Vec<Event> {
        let written = match output {
            Some(output) => match output.finish().await {
                Ok(path) => path,
                Err(e) => return self.finish_failed(WorkerError::output(e), None).await,
            },
            None => None,
        };
        let output_ref = written
            .as_ref()
            .and_then(|path| path.file_name())
            .map(|name| name.to_string_lossy().to_string());

        let completed = self.handle.update(|job| job.complete(output_ref.clone()));
        if !completed {
            // A stop arrived after the last frame.
            if let Some(path) = written {
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    self.logger
                        .log_warning(&format!("failed to remove output {}: {}", path.display(), e));
                }
            }
            return self.finish_stopped(None).await;
        }

        let job = self.handle.snapshot();
        let total = job.processed_units;
        metrics::record_job_completed(self.kind.as_str());
        self.logger.log_completion(&format!(
            "{} frame(s) analysed{}",
            total,
            output_ref
                .as_deref()
                .map(|r| format!(", output {r}"))
                .unwrap_or_default()
        ));

        vec![
            Event::job_progress(
                self.job_id.clone(),
                100,
                "Analysis complete",
                self.last_index.unwrap_or(0),
            ),
            Event::job_completed(self.job_id.clone(), total, output_ref),
        ]
    }

    async fn finish_stopped(&mut self, output: Option<AnnotatedOutput>) -> Vec<Event> {
        if let Some(output) = output {
            output.abort().await;
        }
        self.handle.update(|job| job.stop(STOP_REASON));
        let processed = self.handle.snapshot().processed_units;

        metrics::record_job_stopped(self.kind.as_str());
        self.logger
            .log_completion(&format!("stopped by request after {} frame(s)", processed));
        vec![Event::job_stopped(self.job_id.clone(), STOP_REASON)]
    }

    async fn finish_failed(
        &mut self,
        err: WorkerError,
        output: Option<AnnotatedOutput>,
    ) -> Vec<Event> {
        if let Some(output) = output {
            output.abort().await;
        }
        let kind = err.kind();
        let message = err.to_string();
        self.handle.update(|job| job.fail(kind, message.clone()));

        metrics::record_job_failed(self.kind.as_str(), kind.as_str());
        self.logger.log_error(&message);
        vec![Event::job_failed(self.job_id.clone(), kind, message)]
    }
}
