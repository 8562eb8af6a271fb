/*!
 * ============================================================================
 * CAPTURE MODULE
 * ============================================================================
 *
 * PURPOSE: ffmpeg x11grab supervision for the virtual display
 *
 * ENCODING:
 * - x11grab at a fixed frame rate, cursor hidden
 * - libx264, constant rate factor, yuv420p
 * - scale filter forcing even dimensions
 * - +faststart so the MP4 is streamable
 * - -y: overwrite any existing output
 *
 * STOP: SIGINT lets ffmpeg finalize the container; after the grace period
 * the process is killed and the handle released anyway.
 *
 * ============================================================================
 */

use crate::config::CaptureConfig;
use crate::error::RecorderError;
use crate::recording::process::{ManagedProcess, StderrHandler};
use crate::recording::types::Resolution;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use sysinfo::Signal;
use tokio::process::Command;
use tokio::time::sleep;

// How long the encoder must survive after spawn to count as started
const STARTUP_CHECK: Duration = Duration::from_millis(500);

static PROGRESS_RE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"frame=\s*(\d+).*?time=\s*(\S+)").ok());

/// Frame/time marker parsed from the encoder's stderr
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderProgress {
    pub frames: u64,
    pub time: String,
}

pub type ProgressCallback = Arc<dyn Fn(EncoderProgress) + Send + Sync>;

// Parse "frame=  120 fps= 30 q=28.0 size=  512kB time=00:00:04.00 ..."
pub fn parse_progress(line: &str) -> Option<EncoderProgress> {
    let re = PROGRESS_RE.as_ref()?;
    let caps = re.captures(line)?;
    let frames = caps.get(1)?.as_str().parse().ok()?;
    let time = caps.get(2)?.as_str().to_string();
    Some(EncoderProgress { frames, time })
}

pub fn ffmpeg_args(
    config: &CaptureConfig,
    display_binding: &str,
    resolution: Resolution,
    output_path: &Path,
) -> Vec<String> {
    vec![
        "-y".to_string(),
        "-f".to_string(),
        "x11grab".to_string(),
        "-video_size".to_string(),
        resolution.as_size_arg(),
        "-framerate".to_string(),
        config.framerate.to_string(),
        "-draw_mouse".to_string(),
        "0".to_string(),
        "-i".to_string(),
        format!("{}.0", display_binding),
        "-vf".to_string(),
        "scale=trunc(iw/2)*2:trunc(ih/2)*2".to_string(),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-preset".to_string(),
        config.preset.clone(),
        "-crf".to_string(),
        config.crf.to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-movflags".to_string(),
        "+faststart".to_string(),
        output_path.to_string_lossy().to_string(),
    ]
}

pub struct CaptureProcess {
    config: CaptureConfig,
    process: Option<ManagedProcess>,
    output_path: Option<PathBuf>,
}

impl CaptureProcess {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            process: None,
            output_path: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.process.is_some()
    }

    pub fn output_path(&self) -> Option<&Path> {
        self.output_path.as_deref()
    }

    /**
     * Spawn the encoder against `display_binding`
     * `on_progress` is for observability only
     */
    pub async fn start(
        &mut self,
        display_binding: &str,
        resolution: Resolution,
        output_path: &Path,
        on_progress: Option<ProgressCallback>,
    ) -> Result<(), RecorderError> {
        if self.process.is_some() {
            return Err(RecorderError::EncoderSpawn {
                message: "encoder already running".to_string(),
            });
        }

        let args = ffmpeg_args(&self.config, display_binding, resolution, output_path);
        log::info!(
            "[CAPTURE] Spawning {}: {} @ {} fps, CRF {}, preset {} -> {:?}",
            self.config.encoder_binary,
            resolution.as_size_arg(),
            self.config.framerate,
            self.config.crf,
            self.config.preset,
            output_path
        );

        let mut cmd = Command::new(&self.config.encoder_binary);
        cmd.args(&args);

        let handler: Option<StderrHandler> = on_progress.map(|callback| {
            let handler: StderrHandler = Arc::new(move |line: &str| {
                if let Some(progress) = parse_progress(line) {
                    callback(progress);
                }
            });
            handler
        });

        let mut process = ManagedProcess::spawn(&self.config.encoder_binary, cmd, handler)
            .map_err(|e| RecorderError::EncoderSpawn {
                message: format!("{}: {}", self.config.encoder_binary, e),
            })?;

        // Bad arguments or an unreachable display make ffmpeg exit at once
        sleep(STARTUP_CHECK).await;
        if !process.is_running() {
            let status = process.wait_timeout(Duration::from_millis(100)).await;
            return Err(RecorderError::EncoderSpawn {
                message: format!(
                    "{} exited immediately ({})",
                    self.config.encoder_binary,
                    status.map(|s| s.to_string()).unwrap_or_else(|| "unknown status".to_string())
                ),
            });
        }

        self.process = Some(process);
        self.output_path = Some(output_path.to_path_buf());
        Ok(())
    }

    /**
     * SIGINT, wait up to the grace period, then kill
     * Idempotent; returns false when the encoder had to be killed
     */
    pub async fn stop(&mut self) -> bool {
        let Some(mut process) = self.process.take() else {
            return true;
        };

        let grace = Duration::from_millis(self.config.stop_grace_ms);
        log::info!("[CAPTURE] Stopping encoder (grace {:?})", grace);

        let graceful = process.shutdown(Signal::Interrupt, grace).await;
        if !graceful {
            log::warn!(
                "[CAPTURE] Encoder killed after grace period, {:?} may be truncated",
                self.output_path
            );
        }
        graceful
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_progress_line() {
        let line = "frame=  120 fps= 30 q=28.0 size=     512kB time=00:00:04.00 bitrate=1048.6kbits/s speed=1.0x";
        let progress = parse_progress(line).unwrap();
        assert_eq!(progress.frames, 120);
        assert_eq!(progress.time, "00:00:04.00");
    }

    #[test]
    fn test_parse_progress_ignores_other_lines() {
        assert!(parse_progress("Input #0, x11grab, from ':99.0':").is_none());
        assert!(parse_progress("").is_none());
    }

    #[test]
    fn test_ffmpeg_args() {
        let config = CaptureConfig::default();
        let args = ffmpeg_args(
            &config,
            ":99",
            Resolution {
                width: 1366,
                height: 768,
            },
            Path::new("/tmp/out.mp4"),
        );

        assert_eq!(args[0], "-y");
        let pos = |flag: &str| args.iter().position(|a| a == flag).unwrap();
        assert_eq!(args[pos("-f") + 1], "x11grab");
        assert_eq!(args[pos("-i") + 1], ":99.0");
        assert_eq!(args[pos("-video_size") + 1], "1366x768");
        assert_eq!(args[pos("-crf") + 1], "23");
        assert_eq!(args[pos("-vf") + 1], "scale=trunc(iw/2)*2:trunc(ih/2)*2");
        assert_eq!(args[pos("-movflags") + 1], "+faststart");
        assert!(!args.contains(&"-b:v".to_string()));
        assert_eq!(args.last().unwrap(), "/tmp/out.mp4");
    }

    #[tokio::test]
    async fn test_stop_without_start_is_noop() {
        let mut capture = CaptureProcess::new(CaptureConfig::default());
        assert!(capture.stop().await);
        assert!(capture.stop().await);
        assert!(!capture.is_active());
    }

    #[tokio::test]
    async fn test_start_reports_missing_encoder() {
        let mut capture = CaptureProcess::new(CaptureConfig {
            encoder_binary: "no-such-encoder-xyz".to_string(),
            ..CaptureConfig::default()
        });
        let err = capture
            .start(
                ":99",
                Resolution {
                    width: 640,
                    height: 480,
                },
                Path::new("/tmp/never.mp4"),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RecorderError::EncoderSpawn { .. }));
        assert!(!capture.is_active());
    }
}
