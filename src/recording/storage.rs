/*!
 * ============================================================================
 * ARTIFACT STORAGE MODULE
 * ============================================================================
 *
 * PURPOSE: Local MP4 files between encoding and upload
 *
 * FUNCTIONALITY:
 * - Output path per job
 * - Size check used before upload
 * - Deletion of partial / empty artifacts
 * - Sweep of stale artifacts left behind by failed deletions
 *
 * FILE STRUCTURE:
 * {output_dir}/
 * ├── 7f3c...e1.mp4   # in-flight or not yet removed
 * └── ...
 *
 * ============================================================================
 */

use crate::error::RecorderError;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use walkdir::WalkDir;

// Ensure the output directory exists
pub fn ensure_output_dir(dir: &Path) -> Result<(), RecorderError> {
    std::fs::create_dir_all(dir)
        .map_err(|e| RecorderError::io(&format!("Failed to create output directory {:?}", dir), e))
}

pub fn artifact_path(dir: &Path, job_id: &str) -> PathBuf {
    dir.join(format!("{}.mp4", job_id))
}

// Size of a local artifact, None if it does not exist
pub fn artifact_size(path: &Path) -> Option<u64> {
    std::fs::metadata(path).ok().filter(|m| m.is_file()).map(|m| m.len())
}

// Delete a partial or empty artifact; missing files are fine
pub fn discard_artifact(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => log::info!("Deleted artifact {:?}", path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => log::warn!("Failed to delete artifact {:?}: {}", path, e),
    }
}

/**
 * Remove .mp4 files older than `max_age` under `dir`
 * Returns (files deleted, bytes deleted)
 */
pub fn sweep_stale_artifacts(dir: &Path, max_age: Duration) -> (u32, u64) {
    if !dir.exists() {
        return (0, 0);
    }

    let cutoff = SystemTime::now()
        .checked_sub(max_age)
        .unwrap_or(SystemTime::UNIX_EPOCH);

    let mut files_deleted: u32 = 0;
    let mut bytes_deleted: u64 = 0;

    for entry in WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        if entry.path().extension().is_none_or(|ext| ext != "mp4") {
            continue;
        }
        let Ok(metadata) = entry.metadata() else {
            continue;
        };

        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        if modified >= cutoff {
            continue;
        }

        if let Err(e) = std::fs::remove_file(entry.path()) {
            log::warn!("Failed to delete stale artifact {:?}: {}", entry.path(), e);
        } else {
            files_deleted += 1;
            bytes_deleted += metadata.len();
        }
    }

    if files_deleted > 0 {
        log::info!(
            "Cleaned up {} stale artifact(s) ({} bytes) in {:?}",
            files_deleted,
            bytes_deleted,
            dir
        );
    }

    (files_deleted, bytes_deleted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_path() {
        let path = artifact_path(Path::new("/tmp/rec"), "abc");
        assert_eq!(path, PathBuf::from("/tmp/rec/abc.mp4"));
    }

    #[test]
    fn test_artifact_size_and_discard() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.mp4");
        assert!(artifact_size(&path).is_none());

        std::fs::write(&path, b"").unwrap();
        assert_eq!(artifact_size(&path), Some(0));

        discard_artifact(&path);
        assert!(!path.exists());

        // Second discard of a missing file is silent
        discard_artifact(&path);
    }

    #[test]
    fn test_sweep_only_removes_old_mp4() {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("old.mp4");
        let notes = dir.path().join("notes.txt");
        std::fs::write(&video, vec![0u8; 128]).unwrap();
        std::fs::write(&notes, b"keep").unwrap();

        // Nothing is older than a day yet
        assert_eq!(sweep_stale_artifacts(dir.path(), Duration::from_secs(86_400)), (0, 0));
        assert!(video.exists());

        // Zero max age makes every mp4 stale
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(sweep_stale_artifacts(dir.path(), Duration::ZERO), (1, 128));
        assert!(!video.exists());
        assert!(notes.exists());
    }

    #[test]
    fn test_sweep_missing_dir() {
        assert_eq!(
            sweep_stale_artifacts(Path::new("/nonexistent/slide-recorder"), Duration::ZERO),
            (0, 0)
        );
    }
}
