/*!
 * ============================================================================
 * RECORDER BACKEND
 * ============================================================================
 *
 * PURPOSE: The component seams the coordinator drives
 *
 * TRAITS:
 * - DisplayControl: start/stop the virtual display
 * - SlideDeck: navigate, prime, advance, close
 * - CaptureControl: start/stop the encoder
 * - RecorderBackend: factory for the above + dependency check + upload
 *
 * SystemBackend wires the real Xvfb / Chrome / ffmpeg / object store
 * components. Tests substitute their own backend.
 *
 * ============================================================================
 */

use crate::config::RecorderConfig;
use crate::error::RecorderError;
use crate::recording::browser::BrowserSession;
use crate::recording::capture::{CaptureProcess, ProgressCallback};
use crate::recording::dependencies::DependencyChecker;
use crate::recording::display::DisplayManager;
use crate::recording::types::{PublishedArtifact, Resolution};
use crate::recording::upload::UploadPipeline;
use async_trait::async_trait;
use std::path::Path;

#[async_trait]
pub trait DisplayControl: Send {
    /// Returns the display binding (":99") on success
    async fn start(&mut self, resolution: Resolution) -> Result<String, RecorderError>;

    /// Idempotent, never fails
    async fn stop(&mut self);
}

#[async_trait]
pub trait SlideDeck: Send {
    async fn navigate(&mut self, url: &str) -> Result<(), RecorderError>;

    /// Best-effort, never fails
    async fn prime_for_capture(&mut self);

    async fn advance_slide(&mut self) -> Result<(), RecorderError>;

    /// Idempotent, never fails
    async fn close(&mut self);
}

#[async_trait]
pub trait CaptureControl: Send {
    async fn start(
        &mut self,
        display_binding: &str,
        resolution: Resolution,
        output_path: &Path,
        on_progress: Option<ProgressCallback>,
    ) -> Result<(), RecorderError>;

    /// Idempotent; false when the encoder had to be killed
    async fn stop(&mut self) -> bool;
}

#[async_trait]
pub trait RecorderBackend: Send + Sync {
    /// Names of missing executables (empty = ready)
    fn missing_dependencies(&self) -> Vec<String>;

    fn display(&self) -> Box<dyn DisplayControl>;

    async fn launch_browser(
        &self,
        display_binding: &str,
        resolution: Resolution,
    ) -> Result<Box<dyn SlideDeck>, RecorderError>;

    fn capture(&self) -> Box<dyn CaptureControl>;

    async fn publish(
        &self,
        local_path: &Path,
        job_id: &str,
    ) -> Result<PublishedArtifact, RecorderError>;
}

// =============================================================================
// Real components
// =============================================================================

#[async_trait]
impl DisplayControl for DisplayManager {
    async fn start(&mut self, resolution: Resolution) -> Result<String, RecorderError> {
        DisplayManager::start(self, resolution).await
    }

    async fn stop(&mut self) {
        DisplayManager::stop(self).await
    }
}

#[async_trait]
impl SlideDeck for BrowserSession {
    async fn navigate(&mut self, url: &str) -> Result<(), RecorderError> {
        BrowserSession::navigate(self, url).await
    }

    async fn prime_for_capture(&mut self) {
        BrowserSession::prime_for_capture(self).await
    }

    async fn advance_slide(&mut self) -> Result<(), RecorderError> {
        BrowserSession::advance_slide(self).await
    }

    async fn close(&mut self) {
        BrowserSession::close(self).await
    }
}

#[async_trait]
impl CaptureControl for CaptureProcess {
    async fn start(
        &mut self,
        display_binding: &str,
        resolution: Resolution,
        output_path: &Path,
        on_progress: Option<ProgressCallback>,
    ) -> Result<(), RecorderError> {
        CaptureProcess::start(self, display_binding, resolution, output_path, on_progress).await
    }

    async fn stop(&mut self) -> bool {
        CaptureProcess::stop(self).await
    }
}

/**
 * Xvfb + Chrome + ffmpeg + object store
 */
pub struct SystemBackend {
    config: RecorderConfig,
    checker: DependencyChecker,
    uploader: UploadPipeline,
}

impl SystemBackend {
    pub fn new(config: RecorderConfig) -> Result<Self, RecorderError> {
        let checker = DependencyChecker::from_config(&config);
        let uploader = UploadPipeline::from_config(&config.upload)?;
        Ok(Self {
            config,
            checker,
            uploader,
        })
    }
}

#[async_trait]
impl RecorderBackend for SystemBackend {
    fn missing_dependencies(&self) -> Vec<String> {
        self.checker.check()
    }

    fn display(&self) -> Box<dyn DisplayControl> {
        Box::new(DisplayManager::new(self.config.display.clone()))
    }

    async fn launch_browser(
        &self,
        display_binding: &str,
        resolution: Resolution,
    ) -> Result<Box<dyn SlideDeck>, RecorderError> {
        let executable = self.checker.resolve_browser().ok_or_else(|| RecorderError::DependencyMissing {
            missing: vec![format!(
                "{} (or {})",
                self.config.browser.binary, self.config.browser.fallback_binary
            )],
        })?;

        let session =
            BrowserSession::launch(&executable, display_binding, resolution, &self.config.browser).await?;
        Ok(Box::new(session))
    }

    fn capture(&self) -> Box<dyn CaptureControl> {
        Box::new(CaptureProcess::new(self.config.capture.clone()))
    }

    async fn publish(
        &self,
        local_path: &Path,
        job_id: &str,
    ) -> Result<PublishedArtifact, RecorderError> {
        self.uploader.publish(local_path, job_id).await
    }
}
