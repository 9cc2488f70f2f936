//! Flash job types and lifecycle states.

use crate::command::ActiveChild;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_util::sync::CancellationToken;

static JOB_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique identifier for a flash job.
#[derive(Clone, Hash, Eq, PartialEq)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Creates a unique auto-generated job id (`flash-{counter}`).
    pub fn auto() -> Self {
        let counter = JOB_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("flash-{}", counter))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JobId({})", self.0)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Supported flash methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlashMethod {
    Fastboot,
}

/// One partition to flash: the on-device partition name and the image
/// file to write into it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionImage {
    pub name: String,
    pub image_path: PathBuf,
}

impl PartitionImage {
    pub fn new(name: impl Into<String>, image_path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            image_path: image_path.into(),
        }
    }
}

/// Caller-supplied configuration for a flash job.
///
/// Partition order is authoritative: partitions are written exactly in
/// this order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlashJobConfig {
    pub device_serial: String,
    pub method: FlashMethod,
    pub partitions: Vec<PartitionImage>,
    /// Wipe all user data after flashing.
    #[serde(default)]
    pub wipe_data: bool,
    /// Reboot to system after flashing (and wiping, if requested).
    #[serde(default)]
    pub reboot_after: bool,
}

/// Lifecycle states of a flash job.
///
/// `Completed`, `Failed` and `Cancelled` are terminal and final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Preparing,
    Flashing,
    Wiping,
    Rebooting,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            JobStatus::Preparing => "preparing",
            JobStatus::Flashing => "flashing",
            JobStatus::Wiping => "wiping",
            JobStatus::Rebooting => "rebooting",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// Mutable job record owned by the [`JobRegistry`](super::JobRegistry).
#[derive(Debug)]
pub(crate) struct FlashJob {
    pub id: JobId,
    pub device_serial: String,
    pub partitions: Vec<PartitionImage>,
    pub status: JobStatus,
    /// Discrete percentage: completed partitions / total partitions.
    pub overall_progress: u8,
    pub current_partition: Option<String>,
    pub logs: Vec<String>,
    pub error: Option<String>,
    pub cancel: CancellationToken,
    pub active_child: ActiveChild,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl FlashJob {
    pub fn new(id: JobId, config: &FlashJobConfig) -> Self {
        Self {
            id,
            device_serial: config.device_serial.clone(),
            partitions: config.partitions.clone(),
            status: JobStatus::Preparing,
            overall_progress: 0,
            current_partition: None,
            logs: Vec::new(),
            error: None,
            cancel: CancellationToken::new(),
            active_child: ActiveChild::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id.to_string(),
            device_serial: self.device_serial.clone(),
            status: self.status,
            overall_progress: self.overall_progress,
            current_partition: self.current_partition.clone(),
            logs: self.logs.clone(),
            error: self.error.clone(),
            cancel_requested: self.cancel.is_cancelled(),
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
        }
    }
}

/// Read-only view of a job for status queries and history.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub id: String,
    pub device_serial: String,
    pub status: JobStatus,
    pub overall_progress: u8,
    pub current_partition: Option<String>,
    pub logs: Vec<String>,
    pub error: Option<String>,
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}
