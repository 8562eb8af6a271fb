// Run one slide recording job from a request file and print the final status
//
// Usage: slide-recorder <request.json>
//   request.json: { "sourceURL": "https://...", "timings": [3, 6, 9] }

use slide_recorder::config::{default_config_path, load_config};
use slide_recorder::recording::backend::SystemBackend;
use slide_recorder::recording::storage::sweep_stale_artifacts;
use slide_recorder::recording::types::{JobState, RecordingRequest};
use slide_recorder::{RecorderError, RecordingCoordinator, init_logging};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

const STATUS_POLL: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    let Some(request_path) = std::env::args().nth(1).map(PathBuf::from) else {
        eprintln!("Usage: slide-recorder <request.json>");
        return ExitCode::from(2);
    };

    match run(request_path).await {
        Ok(JobState::Completed) => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(request_path: PathBuf) -> Result<JobState, RecorderError> {
    let mut config = load_config(&default_config_path())?;
    config.apply_env_overrides();
    config.validate()?;

    sweep_stale_artifacts(
        &config.storage.output_dir,
        Duration::from_secs(config.storage.stale_artifact_max_age_hours * 3600),
    );

    let contents = std::fs::read_to_string(&request_path)
        .map_err(|e| RecorderError::io(&format!("Failed to read {:?}", request_path), e))?;
    let request: RecordingRequest =
        serde_json::from_str(&contents).map_err(|e| RecorderError::InvalidRequest {
            message: format!("Failed to parse {:?}: {}", request_path, e),
        })?;

    let backend = SystemBackend::new(config.clone())?;
    let coordinator = RecordingCoordinator::new(config, Arc::new(backend));

    let response = coordinator.submit(request).await?;
    log::info!(
        "Recording job {} started (estimated {:.0}s)",
        response.job_id,
        response.estimated_duration_seconds
    );

    let snapshot = coordinator
        .wait_until_finished(&response.job_id, STATUS_POLL)
        .await?;

    let json = serde_json::to_string_pretty(&snapshot).map_err(|e| RecorderError::Io {
        message: format!("Failed to serialize status: {}", e),
    })?;
    println!("{}", json);

    Ok(snapshot.state)
}
