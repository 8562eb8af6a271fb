/*!
 * ============================================================================
 * ERROR MODULE
 * ============================================================================
 *
 * PURPOSE: Error taxonomy for the recording pipeline
 *
 * Every stage of a recording job reports failures as a RecorderError. The
 * coordinator records `kind()` and the Display text on the failed job so a
 * status query always carries a human-readable message.
 *
 * ============================================================================
 */

use serde::{Deserialize, Serialize};
use std::time::Duration;

/**
 * Errors raised by the recording pipeline and its admission gate
 */
#[derive(Debug, Clone)]
pub enum RecorderError {
    /// Request rejected at admission (bad URL or timing list)
    InvalidRequest { message: String },

    /// Another job already holds the admission slot
    Busy { active_job_id: Option<String> },

    /// Unknown job id
    NotFound { job_id: String },

    /// Required executables are not resolvable on this host
    DependencyMissing { missing: Vec<String> },

    /// Virtual display failed to start or never became live
    DisplayStart { message: String },

    /// Every load strategy failed; one entry per attempt
    Navigation { attempts: Vec<String> },

    /// Target redirected to a sign-in page
    AuthRequired { url: String },

    /// Encoder process could not be spawned
    EncoderSpawn { message: String },

    /// Encoder exited but produced no usable output
    EncoderEmptyOutput { path: String },

    /// Object store upload failed
    Upload { message: String },

    /// DevTools protocol / browser process failure
    Browser { message: String },

    /// A DevTools command or wait ran past its deadline
    Timeout { operation: String, duration: Duration },

    /// Subprocess spawn or signal failure outside the encoder
    Process { message: String },

    /// Local filesystem failure
    Io { message: String },

    /// Invalid or unreadable configuration
    Config { message: String },
}

/**
 * Serializable error category recorded on failed jobs
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobErrorKind {
    InvalidRequestError,
    BusyError,
    NotFoundError,
    DependencyMissingError,
    DisplayStartError,
    NavigationError,
    AuthRequiredError,
    EncoderSpawnError,
    EncoderEmptyOutputError,
    UploadError,
    BrowserError,
    ProcessError,
    IoError,
    ConfigError,
}

impl RecorderError {
    pub fn kind(&self) -> JobErrorKind {
        match self {
            RecorderError::InvalidRequest { .. } => JobErrorKind::InvalidRequestError,
            RecorderError::Busy { .. } => JobErrorKind::BusyError,
            RecorderError::NotFound { .. } => JobErrorKind::NotFoundError,
            RecorderError::DependencyMissing { .. } => JobErrorKind::DependencyMissingError,
            RecorderError::DisplayStart { .. } => JobErrorKind::DisplayStartError,
            RecorderError::Navigation { .. } => JobErrorKind::NavigationError,
            RecorderError::AuthRequired { .. } => JobErrorKind::AuthRequiredError,
            RecorderError::EncoderSpawn { .. } => JobErrorKind::EncoderSpawnError,
            RecorderError::EncoderEmptyOutput { .. } => JobErrorKind::EncoderEmptyOutputError,
            RecorderError::Upload { .. } => JobErrorKind::UploadError,
            RecorderError::Browser { .. } | RecorderError::Timeout { .. } => {
                JobErrorKind::BrowserError
            }
            RecorderError::Process { .. } => JobErrorKind::ProcessError,
            RecorderError::Io { .. } => JobErrorKind::IoError,
            RecorderError::Config { .. } => JobErrorKind::ConfigError,
        }
    }

    pub fn io(context: &str, err: std::io::Error) -> Self {
        RecorderError::Io {
            message: format!("{}: {}", context, err),
        }
    }
}

impl std::fmt::Display for RecorderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecorderError::InvalidRequest { message } => {
                write!(f, "Invalid recording request: {}", message)
            }
            RecorderError::Busy { active_job_id } => match active_job_id {
                Some(id) => write!(f, "Recorder busy: job {} is still in progress", id),
                None => write!(f, "Recorder busy: a job is still in progress"),
            },
            RecorderError::NotFound { job_id } => write!(f, "Job not found: {}", job_id),
            RecorderError::DependencyMissing { missing } => {
                write!(f, "Missing required dependencies: {}", missing.join(", "))
            }
            RecorderError::DisplayStart { message } => {
                write!(f, "Virtual display failed to start: {}", message)
            }
            RecorderError::Navigation { attempts } => {
                write!(f, "Navigation failed after {} attempt(s): {}", attempts.len(), attempts.join("; "))
            }
            RecorderError::AuthRequired { url } => write!(
                f,
                "Presentation requires sign-in (redirected to {}); only publicly viewable decks can be recorded",
                url
            ),
            RecorderError::EncoderSpawn { message } => {
                write!(f, "Failed to start video encoder: {}", message)
            }
            RecorderError::EncoderEmptyOutput { path } => {
                write!(f, "Video encoder produced no output at {}", path)
            }
            RecorderError::Upload { message } => write!(f, "Upload failed: {}", message),
            RecorderError::Browser { message } => write!(f, "Browser error: {}", message),
            RecorderError::Timeout { operation, duration } => write!(
                f,
                "{} timed out after {:.1}s",
                operation,
                duration.as_secs_f64()
            ),
            RecorderError::Process { message } => write!(f, "Process error: {}", message),
            RecorderError::Io { message } => write!(f, "I/O error: {}", message),
            RecorderError::Config { message } => write!(f, "Configuration error: {}", message),
        }
    }
}

impl std::error::Error for RecorderError {}

impl From<object_store::Error> for RecorderError {
    fn from(err: object_store::Error) -> Self {
        RecorderError::Upload {
            message: err.to_string(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_mapping() {
        let auth = RecorderError::AuthRequired {
            url: "https://accounts.google.com/ServiceLogin".to_string(),
        };
        assert_eq!(auth.kind(), JobErrorKind::AuthRequiredError);

        let timeout = RecorderError::Timeout {
            operation: "Page.navigate".to_string(),
            duration: Duration::from_secs(5),
        };
        assert_eq!(timeout.kind(), JobErrorKind::BrowserError);
    }

    #[test]
    fn test_navigation_error_display_lists_attempts() {
        let err = RecorderError::Navigation {
            attempts: vec![
                "content-parsed: timed out".to_string(),
                "load-event: net::ERR_NAME_NOT_RESOLVED".to_string(),
            ],
        };
        let text = err.to_string();
        assert!(text.contains("2 attempt(s)"));
        assert!(text.contains("content-parsed: timed out"));
        assert!(text.contains("ERR_NAME_NOT_RESOLVED"));
    }

    #[test]
    fn test_busy_display_names_active_job() {
        let err = RecorderError::Busy {
            active_job_id: Some("abc".to_string()),
        };
        assert!(err.to_string().contains("abc"));
    }

    #[test]
    fn test_error_kind_serializes_as_name() {
        let json = serde_json::to_string(&JobErrorKind::EncoderEmptyOutputError).unwrap();
        assert_eq!(json, "\"EncoderEmptyOutputError\"");
    }
}
