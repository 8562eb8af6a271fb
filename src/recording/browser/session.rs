/*!
 * ============================================================================
 * BROWSER SESSION
 * ============================================================================
 *
 * PURPOSE: Drive one Chrome instance on the virtual display
 *
 * FLOW:
 * 1. launch: throwaway profile, remote debugging port, DISPLAY binding,
 *    automation markers hidden before any page script runs
 * 2. navigate: ordered load-strategy ladder, then page settle, then
 *    sign-in redirect detection
 * 3. prime_for_capture: dismiss overlays, enter presentation mode
 * 4. advance_slide: one key press + slide settle
 * 5. close: idempotent teardown of socket, process and profile
 *
 * ============================================================================
 */

use super::cdp::{CdpClient, CdpEvent};
use super::keys;
use crate::config::{BrowserConfig, NavigationStep};
use crate::error::RecorderError;
use crate::recording::process::ManagedProcess;
use crate::recording::types::{LoadStrategy, Resolution};
use async_trait::async_trait;
use regex::Regex;
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tokio::time::{Instant, sleep};

const CLOSE_GRACE: Duration = Duration::from_secs(5);
const TARGET_POLL: Duration = Duration::from_millis(250);
const KEY_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);
const PRIME_KEY_GAP: Duration = Duration::from_millis(500);

// Installed before any document script: hides the usual automation markers
const STEALTH_SCRIPT: &str = r#"
Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
window.chrome = window.chrome || { runtime: {} };
Object.defineProperty(navigator, 'languages', { get: () => ['en-US', 'en'] });
Object.defineProperty(navigator, 'plugins', { get: () => [1, 2, 3, 4, 5] });
const originalQuery = window.navigator.permissions && window.navigator.permissions.query;
if (originalQuery) {
  window.navigator.permissions.query = (parameters) =>
    parameters.name === 'notifications'
      ? Promise.resolve({ state: Notification.permission })
      : originalQuery(parameters);
}
"#;

// =============================================================================
// Navigation ladder
// =============================================================================

/**
 * A page that can be loaded with a given completion strategy
 */
#[async_trait]
pub trait PageLoader: Send {
    async fn load(
        &mut self,
        url: &str,
        strategy: LoadStrategy,
        timeout: Duration,
    ) -> Result<(), RecorderError>;
}

/**
 * Try each (strategy, timeout) step in order; first success wins
 * Exhaustion yields one NavigationError listing every attempt
 */
pub async fn run_navigation_ladder<P: PageLoader + ?Sized>(
    page: &mut P,
    url: &str,
    steps: &[NavigationStep],
) -> Result<LoadStrategy, RecorderError> {
    let mut attempts = Vec::with_capacity(steps.len());

    for step in steps {
        log::info!(
            "[BROWSER] Navigating to {} (strategy: {}, timeout: {}ms)",
            url,
            step.strategy.label(),
            step.timeout_ms
        );
        match page.load(url, step.strategy, step.timeout()).await {
            Ok(()) => return Ok(step.strategy),
            Err(e) => {
                log::warn!("[BROWSER] {} navigation failed: {}", step.strategy.label(), e);
                attempts.push(format!("{}: {}", step.strategy.label(), e));
            }
        }
    }

    Err(RecorderError::Navigation { attempts })
}

fn strategy_reached(strategy: LoadStrategy, event: &CdpEvent) -> bool {
    match strategy {
        LoadStrategy::ContentParsed => event.method == "Page.domContentEventFired",
        LoadStrategy::NetworkSettled => {
            event.method == "Page.lifecycleEvent"
                && event.params.get("name").and_then(Value::as_str) == Some("networkIdle")
        }
        LoadStrategy::LoadEvent => event.method == "Page.loadEventFired",
    }
}

#[async_trait]
impl PageLoader for CdpClient {
    async fn load(
        &mut self,
        url: &str,
        strategy: LoadStrategy,
        timeout: Duration,
    ) -> Result<(), RecorderError> {
        let deadline = Instant::now() + timeout;
        self.drain_events();

        let result = self
            .call_with_timeout("Page.navigate", json!({ "url": url }), timeout)
            .await?;

        if let Some(error_text) = result.get("errorText").and_then(Value::as_str) {
            if !error_text.is_empty() {
                return Err(RecorderError::Browser {
                    message: error_text.to_string(),
                });
            }
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        self.wait_for_event(|event| strategy_reached(strategy, event), remaining)
            .await
            .map(|_| ())
    }
}

// Sign-in redirect check against the post-navigation URL
pub fn is_auth_redirect(url: &str, patterns: &[Regex]) -> bool {
    patterns.iter().any(|p| p.is_match(url))
}

// =============================================================================
// Launch helpers
// =============================================================================

pub fn chrome_args(
    port: u16,
    profile_dir: &Path,
    resolution: Resolution,
    extra: &[String],
) -> Vec<String> {
    let mut args = vec![
        format!("--remote-debugging-port={}", port),
        format!("--user-data-dir={}", profile_dir.display()),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "--disable-blink-features=AutomationControlled".to_string(),
        "--disable-infobars".to_string(),
        format!("--window-size={},{}", resolution.width, resolution.height),
        "--window-position=0,0".to_string(),
        "--start-fullscreen".to_string(),
        "--autoplay-policy=no-user-gesture-required".to_string(),
        "--no-sandbox".to_string(),
        "--disable-dev-shm-usage".to_string(),
    ];
    args.extend(extra.iter().cloned());
    args.push("about:blank".to_string());
    args
}

// WebSocket URL of the first page target in a /json/list response
pub fn pick_page_target(targets: &[Value]) -> Option<String> {
    targets
        .iter()
        .filter(|t| t.get("type").and_then(Value::as_str) == Some("page"))
        .find_map(|t| t.get("webSocketDebuggerUrl").and_then(Value::as_str))
        .map(str::to_string)
}

/**
 * Commands sent once after attaching to the page
 * Only the Page domain is enabled; Runtime.evaluate works without
 * Runtime.enable, which would stream console events nobody reads
 */
pub fn startup_commands(resolution: Resolution) -> Vec<(&'static str, Value)> {
    vec![
        ("Page.enable", json!({})),
        (
            "Page.addScriptToEvaluateOnNewDocument",
            json!({ "source": STEALTH_SCRIPT }),
        ),
        (
            "Emulation.setDeviceMetricsOverride",
            json!({
                "width": resolution.width,
                "height": resolution.height,
                "deviceScaleFactor": 1,
                "mobile": false,
            }),
        ),
        ("Page.setLifecycleEventsEnabled", json!({ "enabled": true })),
    ]
}

fn free_port() -> Result<u16, RecorderError> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")
        .map_err(|e| RecorderError::io("Failed to reserve debugging port", e))?;
    let port = listener
        .local_addr()
        .map_err(|e| RecorderError::io("Failed to read debugging port", e))?
        .port();
    Ok(port)
}

// =============================================================================
// BrowserSession
// =============================================================================

pub struct BrowserSession {
    process: Option<ManagedProcess>,
    client: Option<CdpClient>,
    profile_dir: Option<PathBuf>,
    config: BrowserConfig,
    auth_patterns: Vec<Regex>,
}

impl BrowserSession {
    /**
     * Launch Chrome on `display_binding` and attach to its first page
     */
    pub async fn launch(
        executable: &Path,
        display_binding: &str,
        resolution: Resolution,
        config: &BrowserConfig,
    ) -> Result<Self, RecorderError> {
        let auth_patterns = config
            .auth_url_patterns
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| RecorderError::Config {
                message: format!("Invalid auth URL pattern: {}", e),
            })?;

        let profile_root = config.profile_root.clone().unwrap_or_else(std::env::temp_dir);
        let profile_dir = profile_root.join(format!("slide-recorder-profile-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&profile_dir)
            .map_err(|e| RecorderError::io("Failed to create browser profile", e))?;

        let mut session = Self {
            process: None,
            client: None,
            profile_dir: Some(profile_dir.clone()),
            config: config.clone(),
            auth_patterns,
        };

        // Anything that fails from here on must still tear down what started
        match session
            .start(executable, display_binding, resolution, &profile_dir)
            .await
        {
            Ok(()) => Ok(session),
            Err(e) => {
                session.close().await;
                Err(e)
            }
        }
    }

    async fn start(
        &mut self,
        executable: &Path,
        display_binding: &str,
        resolution: Resolution,
        profile_dir: &Path,
    ) -> Result<(), RecorderError> {
        let port = free_port()?;

        let mut cmd = Command::new(executable);
        cmd.args(chrome_args(port, profile_dir, resolution, &self.config.extra_args));
        cmd.env("DISPLAY", display_binding);

        let label = executable
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "browser".to_string());
        let process = ManagedProcess::spawn(&label, cmd, None).map_err(|e| RecorderError::Browser {
            message: format!("Failed to launch {:?}: {}", executable, e),
        })?;
        self.process = Some(process);

        let ws_url = self.discover_page_target(port).await?;
        let mut client = CdpClient::connect(&ws_url).await?;

        for (method, params) in startup_commands(resolution) {
            client.call(method, params).await?;
        }

        log::info!(
            "[BROWSER] {} ready on {} ({}), debugging port {}",
            label,
            display_binding,
            resolution.as_size_arg(),
            port
        );

        self.client = Some(client);
        Ok(())
    }

    async fn discover_page_target(&mut self, port: u16) -> Result<String, RecorderError> {
        let timeout = Duration::from_millis(self.config.launch_timeout_ms);
        let deadline = Instant::now() + timeout;
        let url = format!("http://127.0.0.1:{}/json/list", port);
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()
            .map_err(|e| RecorderError::Browser {
                message: format!("HTTP client: {}", e),
            })?;

        loop {
            let running = self.process.as_mut().is_some_and(|p| p.is_running());
            if !running {
                return Err(RecorderError::Browser {
                    message: "browser exited during startup".to_string(),
                });
            }

            if let Ok(response) = http.get(&url).send().await {
                if let Ok(targets) = response.json::<Vec<Value>>().await {
                    if let Some(ws_url) = pick_page_target(&targets) {
                        return Ok(ws_url);
                    }
                }
            }

            if Instant::now() >= deadline {
                return Err(RecorderError::Timeout {
                    operation: "browser DevTools endpoint".to_string(),
                    duration: timeout,
                });
            }
            sleep(TARGET_POLL).await;
        }
    }

    fn client(&mut self) -> Result<&mut CdpClient, RecorderError> {
        self.client.as_mut().ok_or_else(|| RecorderError::Browser {
            message: "browser session is closed".to_string(),
        })
    }

    /**
     * Navigate via the strategy ladder, settle, then reject sign-in redirects
     */
    pub async fn navigate(&mut self, url: &str) -> Result<(), RecorderError> {
        let steps = self.config.navigation.clone();
        let strategy = run_navigation_ladder(self.client()?, url, &steps).await?;
        log::info!("[BROWSER] Loaded {} via {}", url, strategy.label());

        sleep(Duration::from_millis(self.config.page_settle_ms)).await;

        let current = self.current_url().await?;
        if is_auth_redirect(&current, &self.auth_patterns) {
            log::error!("[BROWSER] Redirected to sign-in page: {}", current);
            return Err(RecorderError::AuthRequired { url: current });
        }

        Ok(())
    }

    pub async fn current_url(&mut self) -> Result<String, RecorderError> {
        let result = self
            .client()?
            .call(
                "Runtime.evaluate",
                json!({ "expression": "window.location.href", "returnByValue": true }),
            )
            .await?;

        result
            .pointer("/result/value")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| RecorderError::Browser {
                message: "could not read current URL".to_string(),
            })
    }

    pub async fn press_key(&mut self, name: &str) -> Result<(), RecorderError> {
        let key = keys::lookup(name).ok_or_else(|| RecorderError::Browser {
            message: format!("unsupported key '{}'", name),
        })?;

        let mut down = json!({
            "type": "keyDown",
            "key": key.key,
            "code": key.code,
            "windowsVirtualKeyCode": key.key_code,
            "nativeVirtualKeyCode": key.key_code,
        });
        if let Some(text) = key.text {
            down["text"] = json!(text);
        }
        let up = json!({
            "type": "keyUp",
            "key": key.key,
            "code": key.code,
            "windowsVirtualKeyCode": key.key_code,
            "nativeVirtualKeyCode": key.key_code,
        });

        let client = self.client()?;
        client
            .call_with_timeout("Input.dispatchKeyEvent", down, KEY_COMMAND_TIMEOUT)
            .await?;
        client
            .call_with_timeout("Input.dispatchKeyEvent", up, KEY_COMMAND_TIMEOUT)
            .await?;
        Ok(())
    }

    /// Best-effort: failures are logged, never returned
    pub async fn prime_for_capture(&mut self) {
        let dismiss = self.config.dismiss_key.clone();
        if let Err(e) = self.press_key(&dismiss).await {
            log::warn!("[BROWSER] Overlay dismissal failed: {}", e);
        }

        sleep(PRIME_KEY_GAP).await;

        let presentation = self.config.presentation_key.clone();
        if let Err(e) = self.press_key(&presentation).await {
            log::warn!("[BROWSER] Entering presentation mode failed: {}", e);
        }

        sleep(PRIME_KEY_GAP).await;
    }

    pub async fn advance_slide(&mut self) -> Result<(), RecorderError> {
        // Lifecycle events keep arriving during playback and nothing waits on them
        self.client()?.drain_events();

        let key = self.config.advance_key.clone();
        self.press_key(&key).await?;
        sleep(Duration::from_millis(self.config.slide_settle_ms)).await;
        Ok(())
    }

    /// Safe to call repeatedly
    pub async fn close(&mut self) {
        if let Some(mut client) = self.client.take() {
            let _ = client
                .call_with_timeout("Browser.close", json!({}), Duration::from_secs(2))
                .await;
            client.close().await;
        }

        if let Some(mut process) = self.process.take() {
            process.terminate(CLOSE_GRACE).await;
        }

        if let Some(dir) = self.profile_dir.take() {
            if let Err(e) = std::fs::remove_dir_all(&dir) {
                log::debug!("[BROWSER] Failed to remove profile {:?}: {}", dir, e);
            }
        }
    }
}
