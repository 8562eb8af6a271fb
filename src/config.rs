/*!
 * ============================================================================
 * RECORDER CONFIG MODULE
 * ============================================================================
 *
 * PURPOSE: Configuration schema and persistence for the slide recorder
 *
 * FUNCTIONALITY:
 * - Load/save configuration as JSON
 * - Default configuration when none exists (every field has a default)
 * - Environment overrides for object-store credentials
 * - Validation of encoder and browser settings
 *
 * FILE PATH: {config_dir}/slide-recorder/recorder_config.json
 *            (override with SLIDE_RECORDER_CONFIG)
 *
 * ============================================================================
 */

use crate::error::RecorderError;
use crate::recording::types::{LoadStrategy, Resolution};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// Valid encoder presets
pub const VALID_PRESETS: &[&str] = &[
    "ultrafast", "superfast", "veryfast", "faster", "fast", "medium", "slow", "slower", "veryslow",
];

// =============================================================================
// Schema
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecorderConfig {
    #[serde(default)]
    pub display: DisplayConfig,

    #[serde(default)]
    pub browser: BrowserConfig,

    #[serde(default)]
    pub capture: CaptureConfig,

    #[serde(default)]
    pub schedule: ScheduleConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub upload: UploadConfig,

    // How long finished jobs stay queryable (seconds)
    #[serde(default = "default_status_retention_seconds")]
    pub status_retention_seconds: u64,

    // Language runtime executable probed by the dependency checker
    #[serde(default)]
    pub runtime_binary: Option<String>,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            display: DisplayConfig::default(),
            browser: BrowserConfig::default(),
            capture: CaptureConfig::default(),
            schedule: ScheduleConfig::default(),
            storage: StorageConfig::default(),
            upload: UploadConfig::default(),
            status_retention_seconds: default_status_retention_seconds(),
            runtime_binary: None,
        }
    }
}

// Virtual display settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DisplayConfig {
    // X display number (":99")
    pub display_number: u32,

    pub width: u32,
    pub height: u32,

    // Color depth in bits
    pub depth: u8,

    // Display server executable
    pub server_binary: String,

    // Fixed wait after spawning the display server
    pub settle_ms: u64,

    // How long to wait for the display socket to appear
    pub liveness_timeout_ms: u64,

    // Interchangeable window managers, first available wins
    pub window_managers: Vec<String>,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            display_number: 99,
            width: 1920,
            height: 1080,
            depth: 24,
            server_binary: "Xvfb".to_string(),
            settle_ms: 1000,
            liveness_timeout_ms: 5000,
            window_managers: vec!["fluxbox".to_string(), "openbox".to_string()],
        }
    }
}

impl DisplayConfig {
    pub fn resolution(&self) -> Resolution {
        Resolution {
            width: self.width,
            height: self.height,
        }
    }

    pub fn binding(&self) -> String {
        format!(":{}", self.display_number)
    }
}

// One rung of the navigation fallback ladder
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NavigationStep {
    pub strategy: LoadStrategy,
    pub timeout_ms: u64,
}

impl NavigationStep {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

// Browser automation settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BrowserConfig {
    pub binary: String,
    pub fallback_binary: String,
    pub launch_timeout_ms: u64,

    // Tried in order, first success wins
    pub navigation: Vec<NavigationStep>,

    // Fixed wait after navigation for client-side rendering
    pub page_settle_ms: u64,

    // Fixed wait after each slide advance
    pub slide_settle_ms: u64,

    pub advance_key: String,
    pub dismiss_key: String,
    pub presentation_key: String,

    // Regexes matched against the post-navigation URL
    pub auth_url_patterns: Vec<String>,

    #[serde(default)]
    pub extra_args: Vec<String>,

    // Parent directory for throwaway browser profiles
    #[serde(default)]
    pub profile_root: Option<PathBuf>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            binary: "google-chrome".to_string(),
            fallback_binary: "chromium".to_string(),
            launch_timeout_ms: 15_000,
            navigation: vec![
                NavigationStep {
                    strategy: LoadStrategy::ContentParsed,
                    timeout_ms: 30_000,
                },
                NavigationStep {
                    strategy: LoadStrategy::NetworkSettled,
                    timeout_ms: 20_000,
                },
                NavigationStep {
                    strategy: LoadStrategy::LoadEvent,
                    timeout_ms: 15_000,
                },
            ],
            page_settle_ms: 3000,
            slide_settle_ms: 500,
            advance_key: "ArrowRight".to_string(),
            dismiss_key: "Escape".to_string(),
            presentation_key: "f".to_string(),
            auth_url_patterns: vec![
                r"accounts\.google\.com".to_string(),
                r"ServiceLogin".to_string(),
                r"/signin".to_string(),
                r"/login".to_string(),
                r"/oauth2?/".to_string(),
            ],
            extra_args: Vec::new(),
            profile_root: None,
        }
    }
}

// Encoder settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CaptureConfig {
    pub encoder_binary: String,
    pub framerate: u8,

    // Constant rate factor (0-51, lower = better quality)
    pub crf: u8,

    pub preset: String,

    // Grace period after the stop signal before the handle is abandoned
    pub stop_grace_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            encoder_binary: "ffmpeg".to_string(),
            framerate: 30,
            crf: 23,
            preset: "veryfast".to_string(),
            stop_grace_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScheduleConfig {
    // Hold after the last advance so the final slide lands on video
    pub trailing_hold_ms: u64,

    // Longest accepted timing list (last timing, seconds)
    pub max_recording_seconds: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            trailing_hold_ms: 3000,
            max_recording_seconds: 4 * 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    // Where encoded artifacts live until uploaded
    pub output_dir: PathBuf,

    pub stale_artifact_max_age_hours: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            output_dir: std::env::temp_dir().join("slide-recorder"),
            stale_artifact_max_age_hours: 24,
        }
    }
}

// Object store target for finished recordings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum UploadConfig {
    S3 {
        endpoint: Option<String>,
        bucket: String,
        #[serde(default = "default_region")]
        region: String,
        access_key_id: Option<String>,
        secret_access_key: Option<String>,
        #[serde(default)]
        allow_http: bool,
        public_base_url: Option<String>,
        #[serde(default = "default_key_prefix")]
        key_prefix: String,
    },
    Local {
        root: PathBuf,
        public_base_url: Option<String>,
        #[serde(default = "default_key_prefix")]
        key_prefix: String,
    },
}

impl Default for UploadConfig {
    fn default() -> Self {
        UploadConfig::S3 {
            endpoint: Some("http://127.0.0.1:9000".to_string()),
            bucket: "recordings".to_string(),
            region: default_region(),
            access_key_id: None,
            secret_access_key: None,
            allow_http: true,
            public_base_url: None,
            key_prefix: default_key_prefix(),
        }
    }
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_key_prefix() -> String {
    "recordings".to_string()
}

fn default_status_retention_seconds() -> u64 {
    3600
}

// =============================================================================
// Persistence
// =============================================================================

// Resolve the config file path
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = std::env::var("SLIDE_RECORDER_CONFIG") {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    dirs::config_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("slide-recorder")
        .join("recorder_config.json")
}

// Load configuration from disk
pub fn load_config(path: &Path) -> Result<RecorderConfig, RecorderError> {
    if !path.exists() {
        log::info!("No recorder config found at {:?}, using defaults", path);
        return Ok(RecorderConfig::default());
    }

    let contents = std::fs::read_to_string(path).map_err(|e| RecorderError::Config {
        message: format!("Failed to read config {:?}: {}", path, e),
    })?;

    let config: RecorderConfig = serde_json::from_str(&contents).map_err(|e| RecorderError::Config {
        message: format!("Failed to parse config {:?}: {}", path, e),
    })?;

    log::info!("Loaded recorder config from {:?}", path);
    Ok(config)
}

// Save configuration to disk
pub fn save_config(path: &Path, config: &RecorderConfig) -> Result<(), RecorderError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| RecorderError::Config {
            message: format!("Failed to create config dir: {}", e),
        })?;
    }

    let contents = serde_json::to_string_pretty(config).map_err(|e| RecorderError::Config {
        message: format!("Failed to serialize config: {}", e),
    })?;

    std::fs::write(path, contents).map_err(|e| RecorderError::Config {
        message: format!("Failed to write config: {}", e),
    })?;

    log::info!("Saved recorder config to {:?}", path);
    Ok(())
}

impl RecorderConfig {
    /**
     * Apply SLIDE_RECORDER_S3_* environment variables to the upload target
     * Credentials are usually injected this way rather than written to disk
     */
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|name| std::env::var(name).ok());
    }

    fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let UploadConfig::S3 {
            endpoint,
            bucket,
            access_key_id,
            secret_access_key,
            public_base_url,
            ..
        } = &mut self.upload
        {
            if let Some(v) = get("SLIDE_RECORDER_S3_ENDPOINT") {
                *endpoint = Some(v);
            }
            if let Some(v) = get("SLIDE_RECORDER_S3_BUCKET") {
                *bucket = v;
            }
            if let Some(v) = get("SLIDE_RECORDER_S3_ACCESS_KEY") {
                *access_key_id = Some(v);
            }
            if let Some(v) = get("SLIDE_RECORDER_S3_SECRET_KEY") {
                *secret_access_key = Some(v);
            }
            if let Some(v) = get("SLIDE_RECORDER_PUBLIC_BASE_URL") {
                *public_base_url = Some(v);
            }
        }

        if let Some(dir) = get("SLIDE_RECORDER_OUTPUT_DIR") {
            self.storage.output_dir = PathBuf::from(dir);
        }
    }

    // Validate settings before the coordinator accepts any job
    pub fn validate(&self) -> Result<(), RecorderError> {
        let invalid = |message: String| Err(RecorderError::Config { message });

        if self.capture.framerate < 1 || self.capture.framerate > 60 {
            return invalid("Framerate must be between 1 and 60".to_string());
        }

        if self.capture.crf > 51 {
            return invalid("CRF must be between 0 and 51".to_string());
        }

        if !VALID_PRESETS.contains(&self.capture.preset.as_str()) {
            return invalid(format!(
                "Invalid preset '{}'. Must be one of: {}",
                self.capture.preset,
                VALID_PRESETS.join(", ")
            ));
        }

        if self.display.width == 0 || self.display.height == 0 {
            return invalid("Display resolution must be non-zero".to_string());
        }

        if self.schedule.max_recording_seconds == 0 {
            return invalid("max_recording_seconds must be greater than 0".to_string());
        }

        if self.browser.navigation.is_empty() {
            return invalid("At least one navigation strategy is required".to_string());
        }

        for pattern in &self.browser.auth_url_patterns {
            if let Err(e) = Regex::new(pattern) {
                return invalid(format!("Invalid auth URL pattern '{}': {}", pattern, e));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_config_serialization() {
        let config = RecorderConfig::default();
        let json = serde_json::to_string_pretty(&config).unwrap();
        let parsed: RecorderConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let json = r#"{ "capture": { "framerate": 15 }, "display": { "display_number": 42 } }"#;
        let config: RecorderConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.capture.framerate, 15);
        assert_eq!(config.capture.crf, 23);
        assert_eq!(config.display.display_number, 42);
        assert_eq!(config.display.width, 1920);
        assert_eq!(config.browser.navigation.len(), 3);
        assert_eq!(config.status_retention_seconds, 3600);
        assert!(config.runtime_binary.is_none());
    }

    #[test]
    fn test_default_navigation_ladder_is_decreasing() {
        let config = RecorderConfig::default();
        let timeouts: Vec<u64> = config.browser.navigation.iter().map(|s| s.timeout_ms).collect();
        assert!(timeouts.windows(2).all(|w| w[0] > w[1]));
        assert_eq!(config.browser.navigation[0].strategy, LoadStrategy::ContentParsed);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = RecorderConfig::default();
        assert!(config.validate().is_ok());

        config.capture.crf = 60;
        assert!(config.validate().is_err());

        config = RecorderConfig::default();
        config.capture.preset = "warp".to_string();
        assert!(config.validate().is_err());

        config = RecorderConfig::default();
        config.schedule.max_recording_seconds = 0;
        assert!(config.validate().is_err());

        config = RecorderConfig::default();
        config.browser.navigation.clear();
        assert!(config.validate().is_err());

        config = RecorderConfig::default();
        config.browser.auth_url_patterns.push("(unclosed".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides_apply_to_s3_target() {
        let vars: HashMap<&str, &str> = [
            ("SLIDE_RECORDER_S3_BUCKET", "decks"),
            ("SLIDE_RECORDER_S3_ACCESS_KEY", "minio"),
            ("SLIDE_RECORDER_S3_SECRET_KEY", "minio123"),
            ("SLIDE_RECORDER_OUTPUT_DIR", "/var/tmp/rec"),
        ]
        .into_iter()
        .collect();

        let mut config = RecorderConfig::default();
        config.apply_overrides_from(|name| vars.get(name).map(|v| v.to_string()));

        match &config.upload {
            UploadConfig::S3 {
                bucket,
                access_key_id,
                secret_access_key,
                ..
            } => {
                assert_eq!(bucket, "decks");
                assert_eq!(access_key_id.as_deref(), Some("minio"));
                assert_eq!(secret_access_key.as_deref(), Some("minio123"));
            }
            other => panic!("unexpected upload config: {:?}", other),
        }
        assert_eq!(config.storage.output_dir, PathBuf::from("/var/tmp/rec"));
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("recorder_config.json");

        let mut config = RecorderConfig::default();
        config.capture.framerate = 24;
        save_config(&path, &config).unwrap();

        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded.capture.framerate, 24);
    }

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config, RecorderConfig::default());
    }
}
