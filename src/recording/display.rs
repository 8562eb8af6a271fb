/*!
 * ============================================================================
 * VIRTUAL DISPLAY MODULE
 * ============================================================================
 *
 * PURPOSE: Start/stop the off-screen X server the browser renders into
 *
 * LIFECYCLE: Idle -> Starting -> Running -> Stopping -> Idle
 *
 * START:
 * 1. Reclaim a stale server still bound to the display number
 * 2. Spawn Xvfb with GLX / RANDR / RENDER enabled
 * 3. Wait the settle delay, then poll for the X socket
 * 4. Start the first available window manager (optional)
 *
 * STOP is idempotent and never fails.
 *
 * ============================================================================
 */

use crate::config::DisplayConfig;
use crate::error::RecorderError;
use crate::recording::dependencies::resolve;
use crate::recording::process::ManagedProcess;
use crate::recording::types::Resolution;
use std::path::PathBuf;
use std::time::Duration;
use sysinfo::{Signal, System};
use tokio::process::Command;
use tokio::time::{Instant, sleep};

const STOP_GRACE: Duration = Duration::from_secs(3);
const LIVENESS_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayState {
    Idle,
    Starting,
    Running,
    Stopping,
}

/// A running display server plus its optional window manager
pub struct DisplaySession {
    server: ManagedProcess,
    window_manager: Option<ManagedProcess>,
    pub resolution: Resolution,
    pub binding: String,
}

pub struct DisplayManager {
    config: DisplayConfig,
    state: DisplayState,
    session: Option<DisplaySession>,
}

impl DisplayManager {
    pub fn new(config: DisplayConfig) -> Self {
        Self {
            config,
            state: DisplayState::Idle,
            session: None,
        }
    }

    pub fn state(&self) -> DisplayState {
        self.state
    }

    /// X display binding (":99") for child processes
    pub fn binding(&self) -> String {
        self.config.binding()
    }

    /**
     * Start the display server at the requested resolution
     * Fails with DisplayStartError if the server dies or never becomes live
     */
    pub async fn start(&mut self, resolution: Resolution) -> Result<String, RecorderError> {
        if self.session.is_some() {
            return Err(RecorderError::DisplayStart {
                message: format!("display {} already running", self.binding()),
            });
        }

        self.state = DisplayState::Starting;
        match self.start_inner(resolution).await {
            Ok(session) => {
                let binding = session.binding.clone();
                self.session = Some(session);
                self.state = DisplayState::Running;
                Ok(binding)
            }
            Err(e) => {
                self.state = DisplayState::Idle;
                Err(e)
            }
        }
    }

    async fn start_inner(&self, resolution: Resolution) -> Result<DisplaySession, RecorderError> {
        let binding = self.binding();

        let reclaimed = reclaim_stale_display(&self.config.server_binary, &binding);
        if reclaimed > 0 {
            log::warn!("Terminated {} stale display server(s) on {}", reclaimed, binding);
            // Let the old server release the socket
            sleep(Duration::from_millis(500)).await;
        }
        remove_lock_file(self.config.display_number);

        let mut cmd = Command::new(&self.config.server_binary);
        cmd.args(xvfb_args(&binding, resolution, self.config.depth));

        let mut server = ManagedProcess::spawn(&self.config.server_binary, cmd, None).map_err(|e| {
            RecorderError::DisplayStart {
                message: format!("Failed to spawn {}: {}", self.config.server_binary, e),
            }
        })?;

        sleep(Duration::from_millis(self.config.settle_ms)).await;

        let socket = socket_path(self.config.display_number);
        let deadline = Instant::now() + Duration::from_millis(self.config.liveness_timeout_ms);
        loop {
            if !server.is_running() {
                server.kill().await;
                return Err(RecorderError::DisplayStart {
                    message: format!("{} exited during startup", self.config.server_binary),
                });
            }
            if socket.exists() {
                break;
            }
            if Instant::now() >= deadline {
                server.terminate(STOP_GRACE).await;
                return Err(RecorderError::DisplayStart {
                    message: format!(
                        "{} not live after {}ms (no socket at {:?})",
                        binding, self.config.liveness_timeout_ms, socket
                    ),
                });
            }
            sleep(LIVENESS_POLL).await;
        }

        log::info!("Display {} running at {}", binding, resolution.as_size_arg());

        let window_manager = self.start_window_manager(&binding);

        Ok(DisplaySession {
            server,
            window_manager,
            resolution,
            binding,
        })
    }

    // Absence of a window manager is only a warning
    fn start_window_manager(&self, binding: &str) -> Option<ManagedProcess> {
        for name in &self.config.window_managers {
            if resolve(name).is_none() {
                continue;
            }
            let mut cmd = Command::new(name);
            cmd.env("DISPLAY", binding);
            match ManagedProcess::spawn(name, cmd, None) {
                Ok(process) => return Some(process),
                Err(e) => log::warn!("Failed to start window manager {}: {}", name, e),
            }
        }

        log::warn!(
            "No window manager available ({:?}), continuing without one",
            self.config.window_managers
        );
        None
    }

    /// Window manager first, then the server. Never fails.
    pub async fn stop(&mut self) {
        let Some(mut session) = self.session.take() else {
            self.state = DisplayState::Idle;
            return;
        };

        self.state = DisplayState::Stopping;

        if let Some(wm) = session.window_manager.as_mut() {
            wm.terminate(STOP_GRACE).await;
        }
        session.server.terminate(STOP_GRACE).await;
        remove_lock_file(self.config.display_number);

        log::info!("Display {} stopped", session.binding);
        self.state = DisplayState::Idle;
    }
}

// =============================================================================
// Helpers
// =============================================================================

pub fn xvfb_args(binding: &str, resolution: Resolution, depth: u8) -> Vec<String> {
    vec![
        binding.to_string(),
        "-screen".to_string(),
        "0".to_string(),
        format!("{}x{}", resolution.as_size_arg(), depth),
        "-ac".to_string(),
        "+extension".to_string(),
        "GLX".to_string(),
        "+extension".to_string(),
        "RANDR".to_string(),
        "+extension".to_string(),
        "RENDER".to_string(),
        "-noreset".to_string(),
    ]
}

fn socket_path(display_number: u32) -> PathBuf {
    PathBuf::from(format!("/tmp/.X11-unix/X{}", display_number))
}

fn lock_path(display_number: u32) -> PathBuf {
    PathBuf::from(format!("/tmp/.X{}-lock", display_number))
}

fn remove_lock_file(display_number: u32) {
    let path = lock_path(display_number);
    if path.exists() {
        if let Err(e) = std::fs::remove_file(&path) {
            log::warn!("Failed to remove display lock {:?}: {}", path, e);
        }
    }
}

/**
 * Terminate any display server process already bound to `binding`
 * Returns the number of processes signalled
 */
fn reclaim_stale_display(server_binary: &str, binding: &str) -> usize {
    let server_name = std::path::Path::new(server_binary)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| server_binary.to_string());

    let mut system = System::new();
    system.refresh_processes();

    let mut count = 0;
    for (pid, process) in system.processes() {
        if !process.name().starts_with(&server_name) {
            continue;
        }
        if !process.cmd().iter().any(|arg| arg == binding) {
            continue;
        }

        log::warn!("Found stale display server {} (PID: {}) on {}", process.name(), pid, binding);
        match process.kill_with(Signal::Term) {
            Some(true) => count += 1,
            _ => {
                if process.kill() {
                    count += 1;
                }
            }
        }
    }

    count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xvfb_args_include_extensions_and_screen() {
        let args = xvfb_args(
            ":99",
            Resolution {
                width: 1280,
                height: 720,
            },
            24,
        );
        assert_eq!(args[0], ":99");
        assert!(args.contains(&"1280x720x24".to_string()));
        for ext in ["GLX", "RANDR", "RENDER"] {
            assert!(args.contains(&ext.to_string()));
        }
        assert!(args.contains(&"-noreset".to_string()));
    }

    #[tokio::test]
    async fn test_stop_on_idle_manager_is_noop() {
        let mut manager = DisplayManager::new(DisplayConfig::default());
        manager.stop().await;
        manager.stop().await;
        assert_eq!(manager.state(), DisplayState::Idle);
    }

    #[tokio::test]
    async fn test_start_fails_when_server_missing() {
        let config = DisplayConfig {
            server_binary: "no-such-display-server-xyz".to_string(),
            display_number: 187,
            settle_ms: 0,
            ..DisplayConfig::default()
        };
        let mut manager = DisplayManager::new(config);
        let err = manager
            .start(Resolution {
                width: 640,
                height: 480,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, RecorderError::DisplayStart { .. }));
        assert_eq!(manager.state(), DisplayState::Idle);
    }

    #[tokio::test]
    async fn test_start_fails_when_server_exits_early() {
        // `false` exits immediately, standing in for a crashing server
        let config = DisplayConfig {
            server_binary: "false".to_string(),
            display_number: 188,
            settle_ms: 50,
            liveness_timeout_ms: 500,
            window_managers: Vec::new(),
            ..DisplayConfig::default()
        };
        let mut manager = DisplayManager::new(config);
        let err = manager
            .start(Resolution {
                width: 640,
                height: 480,
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("exited during startup"));
        manager.stop().await;
    }
}
