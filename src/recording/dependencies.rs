/*!
 * ============================================================================
 * DEPENDENCY CHECK MODULE
 * ============================================================================
 *
 * PURPOSE: Verify required executables are resolvable before a job
 *          acquires any resource
 *
 * PROBES:
 * - Display server (Xvfb)
 * - Browser (primary name, then the fallback name)
 * - Encoder (ffmpeg)
 * - Language runtime (only when configured)
 *
 * ============================================================================
 */

use crate::config::RecorderConfig;
use std::path::PathBuf;

/**
 * Pure lookup of external executables on PATH
 */
#[derive(Debug, Clone)]
pub struct DependencyChecker {
    display_server: String,
    browser: String,
    browser_fallback: String,
    encoder: String,
    runtime: Option<String>,
}

impl DependencyChecker {
    pub fn from_config(config: &RecorderConfig) -> Self {
        Self {
            display_server: config.display.server_binary.clone(),
            browser: config.browser.binary.clone(),
            browser_fallback: config.browser.fallback_binary.clone(),
            encoder: config.capture.encoder_binary.clone(),
            runtime: config.runtime_binary.clone(),
        }
    }

    /// Names of required capabilities that could not be resolved (empty = all present)
    pub fn check(&self) -> Vec<String> {
        let mut missing = Vec::new();

        if resolve(&self.display_server).is_none() {
            missing.push(self.display_server.clone());
        }

        if self.resolve_browser().is_none() {
            missing.push(format!("{} (or {})", self.browser, self.browser_fallback));
        }

        if resolve(&self.encoder).is_none() {
            missing.push(self.encoder.clone());
        }

        if let Some(runtime) = &self.runtime {
            if resolve(runtime).is_none() {
                missing.push(runtime.clone());
            }
        }

        if missing.is_empty() {
            log::debug!("All recording dependencies resolved");
        } else {
            log::warn!("Missing recording dependencies: {:?}", missing);
        }

        missing
    }

    // Primary browser wins, fallback only when the primary is absent
    pub fn resolve_browser(&self) -> Option<PathBuf> {
        resolve(&self.browser).or_else(|| {
            let fallback = resolve(&self.browser_fallback);
            if fallback.is_some() {
                log::info!(
                    "[BROWSER] {} not found, using fallback {}",
                    self.browser,
                    self.browser_fallback
                );
            }
            fallback
        })
    }
}

// Resolve an executable name (or explicit path) to a full path
pub fn resolve(name: &str) -> Option<PathBuf> {
    which::which(name).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checker(browser: &str, fallback: &str) -> DependencyChecker {
        DependencyChecker {
            display_server: "sh".to_string(),
            browser: browser.to_string(),
            browser_fallback: fallback.to_string(),
            encoder: "sh".to_string(),
            runtime: None,
        }
    }

    #[test]
    fn test_all_present_reports_nothing_missing() {
        assert!(checker("sh", "sh").check().is_empty());
    }

    #[test]
    fn test_browser_fallback_is_used() {
        let c = checker("definitely-not-a-browser-xyz", "sh");
        assert!(c.check().is_empty());
        assert!(c.resolve_browser().is_some());
    }

    #[test]
    fn test_missing_executables_are_named() {
        let mut c = checker("no-browser-xyz", "no-fallback-xyz");
        c.encoder = "no-encoder-xyz".to_string();
        c.runtime = Some("no-runtime-xyz".to_string());

        let missing = c.check();
        assert_eq!(missing.len(), 3);
        assert!(missing[0].contains("no-browser-xyz"));
        assert!(missing[0].contains("no-fallback-xyz"));
        assert_eq!(missing[1], "no-encoder-xyz");
        assert_eq!(missing[2], "no-runtime-xyz");
    }
}
