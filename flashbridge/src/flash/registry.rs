//! Active job registry and bounded history.
//!
//! The registry exclusively owns all [`FlashJob`] records. Active jobs
//! live in a map keyed by job id; on reaching a terminal state a job is
//! retired into a bounded ring buffer of snapshots, newest last. One
//! mutex guards both structures so a retire is atomic.

use super::job::{FlashJob, JobId, JobSnapshot};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// Default capacity of the history ring buffer.
pub const DEFAULT_HISTORY_CAP: usize = 50;

#[derive(Debug, Default)]
struct RegistryInner {
    active: HashMap<JobId, FlashJob>,
    history: VecDeque<JobSnapshot>,
}

/// Owner of all flash job state.
#[derive(Debug)]
pub struct JobRegistry {
    inner: Mutex<RegistryInner>,
    history_cap: usize,
}

impl JobRegistry {
    pub fn new(history_cap: usize) -> Self {
        Self {
            inner: Mutex::new(RegistryInner::default()),
            history_cap: history_cap.max(1),
        }
    }

    pub(crate) fn insert(&self, job: FlashJob) {
        let mut inner = self.inner.lock().expect("job registry mutex poisoned");
        inner.active.insert(job.id.clone(), job);
    }

    /// Runs `f` against the active job, if present.
    pub(crate) fn with_job<R>(&self, id: &JobId, f: impl FnOnce(&mut FlashJob) -> R) -> Option<R> {
        let mut inner = self.inner.lock().expect("job registry mutex poisoned");
        inner.active.get_mut(id).map(f)
    }

    /// Appends a log line to the active job.
    pub(crate) fn append_log(&self, id: &JobId, line: &str) {
        self.with_job(id, |job| job.logs.push(line.to_string()));
    }

    /// Moves a terminal job out of the active map into history.
    pub(crate) fn retire(&self, id: &JobId) {
        let mut inner = self.inner.lock().expect("job registry mutex poisoned");
        if let Some(job) = inner.active.remove(id) {
            inner.history.push_back(job.snapshot());
            while inner.history.len() > self.history_cap {
                inner.history.pop_front();
            }
        }
    }

    /// Snapshot of a job, whether active or already retired.
    pub fn snapshot(&self, id: &JobId) -> Option<JobSnapshot> {
        let inner = self.inner.lock().expect("job registry mutex poisoned");
        if let Some(job) = inner.active.get(id) {
            return Some(job.snapshot());
        }
        inner
            .history
            .iter()
            .rev()
            .find(|s| s.id == id.as_str())
            .cloned()
    }

    /// Snapshots of all active jobs.
    pub fn active(&self) -> Vec<JobSnapshot> {
        let inner = self.inner.lock().expect("job registry mutex poisoned");
        inner.active.values().map(|job| job.snapshot()).collect()
    }

    /// The most recent `limit` retired jobs, newest first.
    pub fn history(&self, limit: usize) -> Vec<JobSnapshot> {
        let inner = self.inner.lock().expect("job registry mutex poisoned");
        inner.history.iter().rev().take(limit).cloned().collect()
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAP)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flash::{FlashJobConfig, FlashMethod, JobStatus, PartitionImage};

    fn job(id: &str) -> FlashJob {
        let config = FlashJobConfig {
            device_serial: "R58M123".to_string(),
            method: FlashMethod::Fastboot,
            partitions: vec![PartitionImage::new("boot", "/tmp/boot.img")],
            wipe_data: false,
            reboot_after: false,
        };
        FlashJob::new(JobId::new(id), &config)
    }

    #[test]
    fn test_retire_moves_job_to_history() {
        let registry = JobRegistry::new(10);
        registry.insert(job("flash-a"));

        registry.with_job(&JobId::new("flash-a"), |job| {
            job.status = JobStatus::Completed;
        });
        registry.retire(&JobId::new("flash-a"));

        assert!(registry.active().is_empty());
        let history = registry.history(10);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, JobStatus::Completed);
    }

    #[test]
    fn test_snapshot_finds_retired_jobs() {
        let registry = JobRegistry::new(10);
        registry.insert(job("flash-a"));
        registry.retire(&JobId::new("flash-a"));

        assert!(registry.snapshot(&JobId::new("flash-a")).is_some());
        assert!(registry.snapshot(&JobId::new("flash-b")).is_none());
    }

    #[test]
    fn test_history_is_bounded() {
        let registry = JobRegistry::new(3);
        for n in 0..5 {
            let id = format!("flash-{}", n);
            registry.insert(job(&id));
            registry.retire(&JobId::new(&id));
        }

        let history = registry.history(10);
        assert_eq!(history.len(), 3);
        // Newest first; the two oldest entries were dropped.
        assert_eq!(history[0].id, "flash-4");
        assert_eq!(history[2].id, "flash-2");
    }

    #[test]
    fn test_history_limit_is_honored() {
        let registry = JobRegistry::new(10);
        for n in 0..5 {
            let id = format!("flash-{}", n);
            registry.insert(job(&id));
            registry.retire(&JobId::new(&id));
        }
        assert_eq!(registry.history(2).len(), 2);
    }

    #[test]
    fn test_append_log() {
        let registry = JobRegistry::new(10);
        registry.insert(job("flash-a"));
        registry.append_log(&JobId::new("flash-a"), "Sending 'boot'");

        let snapshot = registry.snapshot(&JobId::new("flash-a")).unwrap();
        assert_eq!(snapshot.logs, vec!["Sending 'boot'".to_string()]);
    }
}
