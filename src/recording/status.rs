/*!
 * ============================================================================
 * STATUS STORE
 * ============================================================================
 *
 * PURPOSE: In-memory job id -> job table behind status queries
 *
 * - Only the task running a job updates that job's entry
 * - Readers always get detached snapshots
 * - Terminal entries are evicted once older than the retention window
 *   (checked lazily on every access)
 *
 * ============================================================================
 */

use crate::error::RecorderError;
use crate::recording::types::{JobSnapshot, RecordingJob};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

pub struct StatusStore {
    jobs: RwLock<HashMap<String, RecordingJob>>,
    retention: Duration,
}

impl StatusStore {
    pub fn new(retention: Duration) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            retention,
        }
    }

    pub fn put(&self, job: RecordingJob) {
        self.evict_expired_at(Utc::now());
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        jobs.insert(job.id.clone(), job);
    }

    /// Apply `mutator` to the job and return the resulting snapshot
    pub fn update<F>(&self, id: &str, mutator: F) -> Result<JobSnapshot, RecorderError>
    where
        F: FnOnce(&mut RecordingJob),
    {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        let job = jobs.get_mut(id).ok_or_else(|| RecorderError::NotFound {
            job_id: id.to_string(),
        })?;
        mutator(job);
        Ok(job.snapshot())
    }

    pub fn get(&self, id: &str) -> Result<JobSnapshot, RecorderError> {
        self.evict_expired_at(Utc::now());
        let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
        jobs.get(id)
            .map(RecordingJob::snapshot)
            .ok_or_else(|| RecorderError::NotFound {
                job_id: id.to_string(),
            })
    }

    /// All current snapshots, oldest first
    pub fn list(&self) -> Vec<JobSnapshot> {
        self.evict_expired_at(Utc::now());
        let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
        let mut snapshots: Vec<JobSnapshot> = jobs.values().map(RecordingJob::snapshot).collect();
        snapshots.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.job_id.cmp(&b.job_id)));
        snapshots
    }

    // Id of the job still running, if any
    pub fn active_job_id(&self) -> Option<String> {
        let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
        jobs.values()
            .find(|job| !job.state.is_terminal())
            .map(|job| job.id.clone())
    }

    /// Drop terminal jobs that finished more than `retention` before `now`
    pub fn evict_expired_at(&self, now: DateTime<Utc>) -> usize {
        let retention = chrono::Duration::from_std(self.retention)
            .unwrap_or_else(|_| chrono::Duration::days(36_500));
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        let before = jobs.len();
        jobs.retain(|_, job| match job.finished_at {
            Some(finished) if job.state.is_terminal() => now.signed_duration_since(finished) <= retention,
            _ => true,
        });
        let evicted = before - jobs.len();
        if evicted > 0 {
            log::debug!("Evicted {} expired job(s) from status store", evicted);
        }
        evicted
    }
}
