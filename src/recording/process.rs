/*!
 * ============================================================================
 * MANAGED PROCESS MODULE
 * ============================================================================
 *
 * PURPOSE: Supervised child process handle used for the display server,
 *          window manager, browser and encoder
 *
 * FUNCTIONALITY:
 * - Spawn with stderr forwarded line by line to a handler (and the log)
 * - Liveness check without blocking
 * - Signal delivery (SIGTERM / SIGINT) via the process table
 * - Bounded wait for exit, then forced kill
 *
 * The child is spawned with kill_on_drop so a dropped handle never
 * leaves an orphan behind.
 *
 * ============================================================================
 */

use crate::error::RecorderError;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use sysinfo::{Pid, Signal, System};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};

/// Receives each stderr line (split on `\n` or `\r`)
pub type StderrHandler = Arc<dyn Fn(&str) + Send + Sync>;

pub struct ManagedProcess {
    name: String,
    child: Option<Child>,
    pid: Option<u32>,
}

impl ManagedProcess {
    /**
     * Spawn a command with stdout discarded and stderr piped to a reader task
     */
    pub fn spawn(
        name: &str,
        mut cmd: Command,
        on_stderr: Option<StderrHandler>,
    ) -> Result<Self, std::io::Error> {
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn()?;
        let pid = child.id();

        if let Some(mut stderr) = child.stderr.take() {
            let label = name.to_string();
            tokio::spawn(async move {
                let mut splitter = LineSplitter::default();
                let mut buf = [0u8; 4096];
                loop {
                    match stderr.read(&mut buf).await {
                        Ok(0) => break,
                        Ok(n) => {
                            for line in splitter.push(&buf[..n]) {
                                log::debug!("{} stderr: {}", label, line);
                                if let Some(handler) = &on_stderr {
                                    handler(&line);
                                }
                            }
                        }
                        Err(e) => {
                            log::warn!("Error reading {} stderr: {}", label, e);
                            break;
                        }
                    }
                }
                if let Some(line) = splitter.finish() {
                    log::debug!("{} stderr: {}", label, line);
                    if let Some(handler) = &on_stderr {
                        handler(&line);
                    }
                }
            });
        }

        log::info!("{} spawned (PID: {:?})", name, pid);

        Ok(Self {
            name: name.to_string(),
            child: Some(child),
            pid,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    // True while the child has not exited
    pub fn is_running(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Deliver a signal through the process table
    pub fn signal(&mut self, signal: Signal) -> Result<(), RecorderError> {
        if !self.is_running() {
            return Err(RecorderError::Process {
                message: format!("{} is not running", self.name),
            });
        }

        let pid = self.pid.ok_or_else(|| RecorderError::Process {
            message: format!("{} has no PID", self.name),
        })?;

        let sysinfo_pid = Pid::from_u32(pid);
        let mut system = System::new();
        system.refresh_process(sysinfo_pid);

        match system.process(sysinfo_pid).and_then(|p| p.kill_with(signal)) {
            Some(true) => {
                log::debug!("Sent {:?} to {} (PID: {})", signal, self.name, pid);
                Ok(())
            }
            Some(false) => Err(RecorderError::Process {
                message: format!("Failed to send {:?} to {} (PID: {})", signal, self.name, pid),
            }),
            None => Err(RecorderError::Process {
                message: format!("{:?} unsupported or {} (PID: {}) already gone", signal, self.name, pid),
            }),
        }
    }

    /// Wait for exit up to `timeout`; None if still running
    pub async fn wait_timeout(&mut self, timeout: Duration) -> Option<ExitStatus> {
        let child = self.child.as_mut()?;
        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(e)) => {
                log::warn!("Failed waiting on {}: {}", self.name, e);
                None
            }
            Err(_) => None,
        }
    }

    /**
     * Send `signal`, wait up to `grace`, then force kill
     * Idempotent: the handle is released after the first call
     * Returns true when the process exited within the grace period
     */
    pub async fn shutdown(&mut self, signal: Signal, grace: Duration) -> bool {
        if self.child.is_none() {
            return true;
        }

        if !self.is_running() {
            self.child = None;
            return true;
        }

        if let Err(e) = self.signal(signal) {
            log::warn!("{}", e);
        }

        let graceful = match self.wait_timeout(grace).await {
            Some(status) => {
                log::info!("{} exited with {}", self.name, status);
                true
            }
            None => {
                log::warn!(
                    "{} did not exit within {:?}, killing",
                    self.name,
                    grace
                );
                self.kill().await;
                false
            }
        };

        self.child = None;
        graceful
    }

    /// SIGTERM with a grace period
    pub async fn terminate(&mut self, grace: Duration) -> bool {
        self.shutdown(Signal::Term, grace).await
    }

    pub async fn kill(&mut self) {
        if let Some(child) = self.child.as_mut() {
            if let Err(e) = child.start_kill() {
                log::debug!("Kill {} failed: {}", self.name, e);
            }
            // Reap so the pid is not left as a zombie
            let _ = tokio::time::timeout(Duration::from_secs(2), child.wait()).await;
        }
        self.child = None;
    }
}

// =============================================================================
// Stderr line splitting
// =============================================================================

/// Splits a byte stream into lines on `\n` or `\r` (ffmpeg rewrites its
/// progress line with carriage returns)
#[derive(Debug, Default)]
pub struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &b in bytes {
            if b == b'\n' || b == b'\r' {
                if !self.pending.is_empty() {
                    lines.push(String::from_utf8_lossy(&self.pending).trim().to_string());
                    self.pending.clear();
                }
            } else {
                self.pending.push(b);
            }
        }
        lines.retain(|l| !l.is_empty());
        lines
    }

    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let line = String::from_utf8_lossy(&self.pending).trim().to_string();
        self.pending.clear();
        if line.is_empty() { None } else { Some(line) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_line_splitter_handles_carriage_returns() {
        let mut splitter = LineSplitter::default();
        let lines = splitter.push(b"frame=  10 fps=30\rframe=  20 fps=30\rpart");
        assert_eq!(lines, vec!["frame=  10 fps=30", "frame=  20 fps=30"]);

        let lines = splitter.push(b"ial\n\n");
        assert_eq!(lines, vec!["partial"]);
        assert!(splitter.finish().is_none());
    }

    #[test]
    fn test_line_splitter_flushes_tail() {
        let mut splitter = LineSplitter::default();
        assert!(splitter.push(b"no newline").is_empty());
        assert_eq!(splitter.finish().as_deref(), Some("no newline"));
    }

    #[tokio::test]
    async fn test_stderr_lines_reach_handler() {
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler: StderrHandler = Arc::new(move |line: &str| {
            sink.lock().unwrap().push(line.to_string());
        });

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("echo first >&2; echo second >&2");
        let mut process = ManagedProcess::spawn("sh", cmd, Some(handler)).unwrap();

        let status = process.wait_timeout(Duration::from_secs(5)).await;
        assert!(status.is_some());

        // Reader task may lag the exit slightly
        for _ in 0..50 {
            if seen.lock().unwrap().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_terminate_is_idempotent() {
        let mut cmd = Command::new("sleep");
        cmd.arg("30");
        let mut process = ManagedProcess::spawn("sleep", cmd, None).unwrap();
        assert!(process.is_running());

        assert!(process.terminate(Duration::from_secs(5)).await);
        assert!(!process.is_running());

        // Second call on a released handle is a no-op
        assert!(process.terminate(Duration::from_secs(5)).await);
    }
}
