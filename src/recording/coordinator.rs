/*!
 * ============================================================================
 * RECORDING COORDINATOR
 * ============================================================================
 *
 * PURPOSE: Admission gate + per-job state machine
 *
 * STATES:
 *   Queued -> CheckingDependencies -> StartingDisplay -> LaunchingBrowser
 *          -> Recording -> Uploading -> Completed
 *   any stage -> Failed
 *
 * ADMISSION:
 * - One permit; submit() fails with Busy while any job is running
 * - The permit moves into the job task and is released only after the
 *   terminal state is stored
 *
 * CLEANUP:
 * - Capture, browser, display are released through JobResources::release
 *   on every path, success included, before the job becomes terminal
 * - Partial or empty artifacts are deleted, never uploaded
 * - A panic inside the stages still ends the job as Failed
 *
 * ============================================================================
 */

use crate::config::RecorderConfig;
use crate::error::RecorderError;
use crate::recording::backend::{CaptureControl, DisplayControl, RecorderBackend, SlideDeck};
use crate::recording::capture::{EncoderProgress, ProgressCallback};
use crate::recording::scheduler::TimingScheduler;
use crate::recording::status::StatusStore;
use crate::recording::storage;
use crate::recording::types::{
    JobSnapshot, JobState, PublishedArtifact, RecordingJob, RecordingRequest, SubmitResponse,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

// =============================================================================
// Job resources
// =============================================================================

/**
 * Everything a running job has acquired
 * release() tears down in reverse acquisition order and is idempotent
 */
#[derive(Default)]
pub struct JobResources {
    pub display: Option<Box<dyn DisplayControl>>,
    pub browser: Option<Box<dyn SlideDeck>>,
    pub capture: Option<Box<dyn CaptureControl>>,
}

impl JobResources {
    pub async fn release(&mut self) {
        if let Some(mut capture) = self.capture.take() {
            if !capture.stop().await {
                log::warn!("[CAPTURE] Encoder did not stop gracefully during cleanup");
            }
        }
        if let Some(mut browser) = self.browser.take() {
            browser.close().await;
        }
        if let Some(mut display) = self.display.take() {
            display.stop().await;
        }
    }
}

// =============================================================================
// Coordinator
// =============================================================================

#[derive(Clone)]
pub struct RecordingCoordinator {
    config: Arc<RecorderConfig>,
    backend: Arc<dyn RecorderBackend>,
    status: Arc<StatusStore>,
    slot: Arc<Semaphore>,
}

impl RecordingCoordinator {
    pub fn new(config: RecorderConfig, backend: Arc<dyn RecorderBackend>) -> Self {
        let retention = Duration::from_secs(config.status_retention_seconds);
        Self {
            config: Arc::new(config),
            backend,
            status: Arc::new(StatusStore::new(retention)),
            slot: Arc::new(Semaphore::new(1)),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.slot.available_permits() == 0
    }

    pub fn status(&self, job_id: &str) -> Result<JobSnapshot, RecorderError> {
        self.status.get(job_id)
    }

    pub fn list(&self) -> Vec<JobSnapshot> {
        self.status.list()
    }

    // last timing + trailing hold + display settle + page settle
    pub fn estimate_duration_seconds(&self, request: &RecordingRequest) -> f64 {
        let fixed_ms = self.config.schedule.trailing_hold_ms
            + self.config.display.settle_ms
            + self.config.browser.page_settle_ms;
        request.last_timing() + fixed_ms as f64 / 1000.0
    }

    /**
     * Validate, take the admission slot, and start the job in the background
     * Returns immediately; poll status() for progress
     */
    pub async fn submit(&self, request: RecordingRequest) -> Result<SubmitResponse, RecorderError> {
        request.validate()?;

        let max_seconds = self.config.schedule.max_recording_seconds;
        if request.last_timing() > max_seconds as f64 {
            return Err(RecorderError::InvalidRequest {
                message: format!(
                    "last timing {}s exceeds the {}s recording limit",
                    request.last_timing(),
                    max_seconds
                ),
            });
        }

        let permit = Arc::clone(&self.slot)
            .try_acquire_owned()
            .map_err(|_| RecorderError::Busy {
                active_job_id: self.status.active_job_id(),
            })?;

        let job_id = uuid::Uuid::new_v4().to_string();
        let estimated_duration_seconds = self.estimate_duration_seconds(&request);

        self.status.put(RecordingJob::new(job_id.clone(), request.clone()));
        log::info!(
            "Admitted job {} for {} ({} slide advance(s), ~{:.1}s)",
            job_id,
            request.source_url,
            request.timings.len(),
            estimated_duration_seconds
        );

        let run = JobRun {
            job_id: job_id.clone(),
            request,
            config: Arc::clone(&self.config),
            backend: Arc::clone(&self.backend),
            status: Arc::clone(&self.status),
        };
        tokio::spawn(run.run(permit));

        Ok(SubmitResponse {
            job_id,
            status: "started".to_string(),
            estimated_duration_seconds,
        })
    }

    /// Poll until the job is terminal
    pub async fn wait_until_finished(
        &self,
        job_id: &str,
        poll_interval: Duration,
    ) -> Result<JobSnapshot, RecorderError> {
        loop {
            let snapshot = self.status.get(job_id)?;
            if snapshot.state.is_terminal() {
                return Ok(snapshot);
            }
            tokio::time::sleep(poll_interval).await;
        }
    }
}

// =============================================================================
// Job execution
// =============================================================================

// State owned by one background job task
struct JobRun {
    job_id: String,
    request: RecordingRequest,
    config: Arc<RecorderConfig>,
    backend: Arc<dyn RecorderBackend>,
    status: Arc<StatusStore>,
}

impl JobRun {
    async fn run(self, permit: OwnedSemaphorePermit) {
        let job_id = self.job_id.clone();
        let status = Arc::clone(&self.status);
        let output_path = storage::artifact_path(&self.config.storage.output_dir, &self.job_id);

        // A panicking stage still has to end in a terminal state
        let outcome = match tokio::spawn(async move { self.execute().await }).await {
            Ok(outcome) => outcome,
            Err(e) => {
                storage::discard_artifact(&output_path);
                Err(RecorderError::Process {
                    message: format!("recording task aborted: {}", e),
                })
            }
        };

        let stored = match outcome {
            Ok(artifact) => {
                let stored = status.update(&job_id, |job| job.complete(&artifact));
                log::info!("Job {} completed: {}", job_id, artifact.url);
                stored
            }
            Err(e) => {
                let stored = status.update(&job_id, |job| job.fail(&e));
                log::error!("Job {} failed: {}", job_id, e);
                stored
            }
        };
        if let Err(e) = stored {
            log::warn!("Final status update for job {} failed: {}", job_id, e);
        }

        // Slot frees only once the terminal state is visible
        drop(permit);
    }

    fn update<F: FnOnce(&mut RecordingJob)>(&self, mutator: F) {
        if let Err(e) = self.status.update(&self.job_id, mutator) {
            log::warn!("Status update for job {} failed: {}", self.job_id, e);
        }
    }

    fn enter(&self, state: JobState) {
        log::info!("Job {} -> {}", self.job_id, state.stage_name());
        self.update(|job| job.advance_to(state));
    }

    async fn execute(&self) -> Result<PublishedArtifact, RecorderError> {
        let output_path = storage::artifact_path(&self.config.storage.output_dir, &self.job_id);

        let mut resources = JobResources::default();
        let recorded = self.record(&mut resources, &output_path).await;
        resources.release().await;

        if let Err(e) = recorded {
            storage::discard_artifact(&output_path);
            return Err(e);
        }

        match storage::artifact_size(&output_path) {
            Some(size) if size > 0 => {
                log::info!("Job {} recorded {} bytes to {:?}", self.job_id, size, output_path);
            }
            _ => {
                storage::discard_artifact(&output_path);
                return Err(RecorderError::EncoderEmptyOutput {
                    path: output_path.display().to_string(),
                });
            }
        }

        self.enter(JobState::Uploading);
        match self.backend.publish(&output_path, &self.job_id).await {
            Ok(artifact) => Ok(artifact),
            Err(e) => {
                storage::discard_artifact(&output_path);
                Err(e)
            }
        }
    }

    /**
     * Acquire display, browser and encoder in order and run the schedule
     * Every acquired resource is parked in `resources` before it is used
     */
    async fn record(
        &self,
        resources: &mut JobResources,
        output_path: &Path,
    ) -> Result<(), RecorderError> {
        self.enter(JobState::CheckingDependencies);
        let missing = self.backend.missing_dependencies();
        if !missing.is_empty() {
            return Err(RecorderError::DependencyMissing { missing });
        }
        storage::ensure_output_dir(&self.config.storage.output_dir)?;

        self.enter(JobState::StartingDisplay);
        let resolution = self.config.display.resolution();
        let display = resources.display.insert(self.backend.display());
        let binding = display.start(resolution).await?;

        self.enter(JobState::LaunchingBrowser);
        let deck = resources
            .browser
            .insert(self.backend.launch_browser(&binding, resolution).await?);
        deck.navigate(&self.request.source_url).await?;
        deck.prime_for_capture().await;

        self.enter(JobState::Recording);
        let capture = resources.capture.insert(self.backend.capture());
        capture
            .start(&binding, resolution, output_path, Some(self.progress_callback()))
            .await?;

        let scheduler = TimingScheduler::new(Duration::from_millis(self.config.schedule.trailing_hold_ms));
        let status = Arc::clone(&self.status);
        let job_id = self.job_id.clone();
        scheduler
            .run(&self.request.timings, &mut **deck, move |advanced| {
                let _ = status.update(&job_id, |job| job.progress.slides_advanced = advanced);
            })
            .await?;

        capture.stop().await;
        Ok(())
    }

    fn progress_callback(&self) -> ProgressCallback {
        let status = Arc::clone(&self.status);
        let job_id = self.job_id.clone();
        Arc::new(move |progress: EncoderProgress| {
            let _ = status.update(&job_id, |job| {
                job.progress.frames = Some(progress.frames);
                job.progress.encoded_time = Some(progress.time.clone());
            });
        })
    }
}
