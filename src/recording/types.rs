/*!
 * ============================================================================
 * RECORDING TYPES MODULE
 * ============================================================================
 *
 * PURPOSE: Data structures for slide-deck recording jobs
 *
 * TYPES:
 * - RecordingRequest: URL + ascending slide-advance timings (admission input)
 * - JobState: Coordinator state machine stages
 * - RecordingJob: Coordinator-owned job record
 * - JobSnapshot: Read-only copy served to status queries
 * - SubmitResponse: Admission acknowledgement
 * - ProgressMarker: Last encoder/scheduler progress for observability
 * - Resolution, LoadStrategy, PublishedArtifact: shared value types
 *
 * ============================================================================
 */

use crate::error::{JobErrorKind, RecorderError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Value Types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    // "1920x1080" form used by the display server and the encoder
    pub fn as_size_arg(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

/**
 * Page load completion strategies for the navigation fallback ladder
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoadStrategy {
    /// DOM parsed (DOMContentLoaded)
    ContentParsed,
    /// No network activity for a short window
    NetworkSettled,
    /// Window load event
    LoadEvent,
}

impl LoadStrategy {
    pub fn label(&self) -> &'static str {
        match self {
            LoadStrategy::ContentParsed => "content-parsed",
            LoadStrategy::NetworkSettled => "network-settled",
            LoadStrategy::LoadEvent => "load-event",
        }
    }
}

// Result of a successful upload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedArtifact {
    pub url: String,
    pub key: String,
    pub size_bytes: u64,
}

// =============================================================================
// Request / Response
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingRequest {
    #[serde(rename = "sourceURL", alias = "sourceUrl")]
    pub source_url: String,

    // Seconds from recording start, strictly ascending
    pub timings: Vec<f64>,
}

impl RecordingRequest {
    /**
     * Admission-time validation
     * Rejects anything the scheduler cannot turn into non-negative waits
     */
    pub fn validate(&self) -> Result<(), RecorderError> {
        let invalid = |message: String| Err(RecorderError::InvalidRequest { message });

        let url = self.source_url.trim();
        if url.is_empty() {
            return invalid("sourceURL must not be empty".to_string());
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return invalid(format!("sourceURL must be an http(s) URL, got '{}'", url));
        }

        if self.timings.is_empty() {
            return invalid("timings must contain at least one entry".to_string());
        }

        let mut previous = 0.0_f64;
        for (idx, &t) in self.timings.iter().enumerate() {
            if !t.is_finite() {
                return invalid(format!("timings[{}] is not a finite number", idx));
            }
            if t <= 0.0 {
                return invalid(format!("timings[{}] must be greater than 0 (got {})", idx, t));
            }
            if idx > 0 && t <= previous {
                return invalid(format!(
                    "timings must be strictly ascending (timings[{}]={} <= {})",
                    idx, t, previous
                ));
            }
            previous = t;
        }

        Ok(())
    }

    pub fn last_timing(&self) -> f64 {
        self.timings.last().copied().unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub job_id: String,
    pub status: String,
    pub estimated_duration_seconds: f64,
}

// =============================================================================
// Job State Machine
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Queued,
    CheckingDependencies,
    StartingDisplay,
    LaunchingBrowser,
    Recording,
    Uploading,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    pub fn stage_name(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::CheckingDependencies => "checking-dependencies",
            JobState::StartingDisplay => "starting-display",
            JobState::LaunchingBrowser => "launching-browser",
            JobState::Recording => "recording",
            JobState::Uploading => "uploading",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }
}

// Last observed progress, for status display only
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressMarker {
    // Encoder frame counter
    pub frames: Option<u64>,

    // Encoder timestamp ("00:00:04.10")
    pub encoded_time: Option<String>,

    pub slides_advanced: u32,
    pub slides_total: u32,
}

/**
 * A recording job as owned by the coordinator
 */
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingJob {
    pub id: String,
    pub request: RecordingRequest,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub last_update: DateTime<Utc>,

    // When the job entered a terminal state (drives eviction)
    pub finished_at: Option<DateTime<Utc>>,

    pub progress: ProgressMarker,
    pub error: Option<String>,
    pub error_kind: Option<JobErrorKind>,
    pub artifact_url: Option<String>,
    pub artifact_size_bytes: Option<u64>,
}

impl RecordingJob {
    pub fn new(id: String, request: RecordingRequest) -> Self {
        let now = Utc::now();
        let slides_total = request.timings.len() as u32;
        Self {
            id,
            request,
            state: JobState::Queued,
            created_at: now,
            last_update: now,
            finished_at: None,
            progress: ProgressMarker {
                slides_total,
                ..ProgressMarker::default()
            },
            error: None,
            error_kind: None,
            artifact_url: None,
            artifact_size_bytes: None,
        }
    }

    // Move to a non-terminal stage
    pub fn advance_to(&mut self, state: JobState) {
        self.state = state;
        self.last_update = Utc::now();
    }

    pub fn complete(&mut self, artifact: &PublishedArtifact) {
        let now = Utc::now();
        self.state = JobState::Completed;
        self.artifact_url = Some(artifact.url.clone());
        self.artifact_size_bytes = Some(artifact.size_bytes);
        self.error = None;
        self.error_kind = None;
        self.last_update = now;
        self.finished_at = Some(now);
    }

    pub fn fail(&mut self, error: &RecorderError) {
        let now = Utc::now();
        self.state = JobState::Failed;
        self.error = Some(error.to_string());
        self.error_kind = Some(error.kind());
        self.artifact_url = None;
        self.artifact_size_bytes = None;
        self.last_update = now;
        self.finished_at = Some(now);
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            job_id: self.id.clone(),
            source_url: self.request.source_url.clone(),
            state: self.state,
            stage: self.state.stage_name().to_string(),
            created_at: self.created_at,
            last_update: self.last_update,
            progress: if self.state.is_terminal() {
                None
            } else {
                Some(self.progress.clone())
            },
            error: self.error.clone(),
            error_kind: self.error_kind,
            artifact_url: self.artifact_url.clone(),
            artifact_size_bytes: self.artifact_size_bytes,
        }
    }
}

/**
 * Status query view of a job
 * A detached copy: the coordinator keeps mutating the backing job
 */
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub job_id: String,
    #[serde(rename = "sourceURL")]
    pub source_url: String,
    pub state: JobState,
    pub stage: String,
    pub created_at: DateTime<Utc>,
    pub last_update: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<ProgressMarker>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<JobErrorKind>,

    #[serde(rename = "artifactURL", skip_serializing_if = "Option::is_none")]
    pub artifact_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_size_bytes: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(timings: Vec<f64>) -> RecordingRequest {
        RecordingRequest {
            source_url: "https://docs.google.com/presentation/d/abc/present".to_string(),
            timings,
        }
    }

    #[test]
    fn test_validate_accepts_ascending_positive() {
        assert!(request(vec![3.0, 6.0, 9.0]).validate().is_ok());
        assert!(request(vec![0.5]).validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_timings() {
        for timings in [
            vec![],
            vec![0.0, 1.0],
            vec![-1.0],
            vec![3.0, 3.0],
            vec![5.0, 4.0],
            vec![1.0, f64::NAN],
            vec![1.0, f64::INFINITY],
        ] {
            let err = request(timings.clone()).validate().unwrap_err();
            assert_eq!(err.kind(), JobErrorKind::InvalidRequestError, "timings {:?}", timings);
        }
    }

    #[test]
    fn test_validate_rejects_bad_url() {
        let mut req = request(vec![1.0]);
        req.source_url = "   ".to_string();
        assert!(req.validate().is_err());

        req.source_url = "file:///etc/passwd".to_string();
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_request_wire_format() {
        let json = r#"{"sourceURL": "https://example.com/deck", "timings": [1.5, 3]}"#;
        let req: RecordingRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.source_url, "https://example.com/deck");
        assert_eq!(req.timings, vec![1.5, 3.0]);
    }

    #[test]
    fn test_completed_snapshot_has_artifact_and_no_error() {
        let mut job = RecordingJob::new("job-1".to_string(), request(vec![1.0]));
        job.fail(&RecorderError::Upload {
            message: "transient".to_string(),
        });
        job.complete(&PublishedArtifact {
            url: "http://store/recordings/job-1.mp4".to_string(),
            key: "recordings/job-1.mp4".to_string(),
            size_bytes: 42,
        });

        let snapshot = job.snapshot();
        assert_eq!(snapshot.state, JobState::Completed);
        assert!(snapshot.error.is_none());
        assert_eq!(snapshot.artifact_size_bytes, Some(42));

        let json = serde_json::to_value(&snapshot).unwrap();
        assert!(json.get("error").is_none());
        assert_eq!(json["artifactURL"], "http://store/recordings/job-1.mp4");
    }

    #[test]
    fn test_failed_snapshot_carries_message() {
        let mut job = RecordingJob::new("job-2".to_string(), request(vec![1.0]));
        job.advance_to(JobState::LaunchingBrowser);
        job.fail(&RecorderError::AuthRequired {
            url: "https://accounts.google.com/signin".to_string(),
        });

        let snapshot = job.snapshot();
        assert!(snapshot.state.is_terminal());
        assert_eq!(snapshot.error_kind, Some(JobErrorKind::AuthRequiredError));
        assert!(snapshot.error.unwrap().contains("sign-in"));
        assert!(snapshot.progress.is_none());
    }

    #[test]
    fn test_non_terminal_snapshot_has_stage_and_progress() {
        let mut job = RecordingJob::new("job-3".to_string(), request(vec![1.0, 2.0]));
        job.advance_to(JobState::Recording);
        job.progress.slides_advanced = 1;

        let snapshot = job.snapshot();
        assert_eq!(snapshot.stage, "recording");
        let progress = snapshot.progress.unwrap();
        assert_eq!(progress.slides_advanced, 1);
        assert_eq!(progress.slides_total, 2);
    }
}
