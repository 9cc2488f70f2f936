//! Flash job run loop.
//!
//! `start` validates everything up front (fail fast, zero side effects on
//! invalid input), takes the device lock synchronously, registers the job
//! and returns. The run loop executes on a spawned task; observers follow
//! it through the broadcast hub or the synchronous status query.
//!
//! Every exit path releases the device lock: the release lives in a drop
//! guard, so a tool failure, a cancellation or a panic inside the loop all
//! unwind through it.

use super::detect;
use super::job::{FlashJob, FlashJobConfig, JobId, JobStatus, PartitionImage};
use super::registry::JobRegistry;
use super::validate::{validate_config, ValidationError};
use crate::command::{circuit_for, ActiveChild, CommandOutcome, CommandRunner, OutputLine, RunOptions};
use crate::config::FlashSettings;
use crate::lock::{AcquireOutcome, DeviceLockManager};
use crate::progress::{JobEvent, ProgressHub};
use crate::reliability::{Reliability, ReliabilityError};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Lock operation name used for flash jobs; doubles as the resource slot
/// category.
pub const FLASH_OPERATION: &str = "flash";

/// Rejections from [`FlashOrchestrator::start`].
#[derive(Debug, Error)]
pub enum StartError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error(
        "device {serial} is locked by operation {operation:?} \
         (lock {lock_id}, expires in {expires_in:?})"
    )]
    DeviceLocked {
        serial: String,
        operation: String,
        lock_id: String,
        expires_in: Duration,
    },

    #[error("resource limit exceeded for category {category:?}")]
    ResourceLimitExceeded { category: String },
}

/// How the run loop ended, before terminal-status resolution.
enum RunEnd {
    Completed,
    Failed(String),
    Cancelled,
}

/// Releases the job's device lock on drop, unconditionally.
struct LockReleaser {
    locks: Arc<DeviceLockManager>,
    serial: String,
    lock_id: String,
}

impl Drop for LockReleaser {
    fn drop(&mut self) {
        self.locks.release(&self.serial, Some(&self.lock_id));
    }
}

/// Owns the flash job state machine.
#[derive(Clone)]
pub struct FlashOrchestrator {
    runner: CommandRunner,
    reliability: Arc<Reliability>,
    locks: Arc<DeviceLockManager>,
    registry: Arc<JobRegistry>,
    hub: Arc<ProgressHub>,
    settings: FlashSettings,
}

impl FlashOrchestrator {
    pub fn new(
        runner: CommandRunner,
        reliability: Arc<Reliability>,
        locks: Arc<DeviceLockManager>,
        registry: Arc<JobRegistry>,
        hub: Arc<ProgressHub>,
        settings: FlashSettings,
    ) -> Self {
        Self {
            runner,
            reliability,
            locks,
            registry,
            hub,
            settings,
        }
    }

    /// Validates the config, takes the device lock and starts the job.
    ///
    /// Returns immediately with the job id; execution continues on a
    /// spawned task. Must be called from within a tokio runtime.
    pub fn start(&self, config: FlashJobConfig) -> Result<JobId, StartError> {
        validate_config(&config)?;

        let lock_id = match self.locks.acquire(&config.device_serial, FLASH_OPERATION) {
            AcquireOutcome::Acquired { lock_id, .. } => lock_id,
            AcquireOutcome::DeviceLocked {
                locked_by,
                lock_id,
                expires_in,
            } => {
                return Err(StartError::DeviceLocked {
                    serial: config.device_serial.clone(),
                    operation: locked_by,
                    lock_id,
                    expires_in,
                })
            }
            AcquireOutcome::ResourceLimitExceeded { category } => {
                return Err(StartError::ResourceLimitExceeded { category })
            }
        };

        let id = JobId::auto();
        self.registry.insert(FlashJob::new(id.clone(), &config));
        info!(
            job_id = %id,
            serial = %config.device_serial,
            partitions = config.partitions.len(),
            "Flash job started"
        );

        let this = self.clone();
        let run_id = id.clone();
        tokio::spawn(async move {
            this.run(run_id, config, lock_id).await;
        });

        Ok(id)
    }

    /// Requests cancellation of an active job.
    ///
    /// Sets the job's cancellation token, best-effort signals the active
    /// child process, and reports `cancelled` to observers immediately.
    /// The background task unwinds at its next safe boundary; "requested"
    /// is not a synchronous guarantee that it already has.
    ///
    /// Returns false when the job is unknown or already terminal.
    pub fn cancel(&self, id: &JobId) -> bool {
        let requested = self
            .registry
            .with_job(id, |job| {
                if job.status.is_terminal() {
                    return false;
                }
                job.cancel.cancel();
                job.status = JobStatus::Cancelled;
                job.active_child.signal_term();
                true
            })
            .unwrap_or(false);

        if requested {
            info!(job_id = %id, "Flash job cancellation requested");
            self.hub
                .publish(&JobEvent::status(id, JobStatus::Cancelled, None));
        }
        requested
    }

    async fn run(self, id: JobId, config: FlashJobConfig, lock_id: String) {
        let _lock = LockReleaser {
            locks: Arc::clone(&self.locks),
            serial: config.device_serial.clone(),
            lock_id,
        };

        self.registry
            .with_job(&id, |job| job.started_at = Some(Utc::now()));
        self.hub
            .publish(&JobEvent::status(&id, JobStatus::Preparing, None));

        let end = self.execute(&id, &config).await;
        self.finalize(&id, end);
        self.registry.retire(&id);
    }

    /// The state machine body. Cancellation is observed only at safe
    /// boundaries: before each partition, before the wipe, before the
    /// reboot.
    async fn execute(&self, id: &JobId, config: &FlashJobConfig) -> RunEnd {
        let serial = config.device_serial.as_str();
        let tool = self.settings.flash_tool.clone();

        self.log_line(
            id,
            &format!("Verifying device {} is visible to {}", serial, tool),
        );
        match detect::list_flash_devices(&self.runner, &self.reliability, &tool).await {
            Ok(serials) if serials.iter().any(|s| s == serial) => {}
            Ok(_) => {
                return RunEnd::Failed(format!("device {} not detected by {}", serial, tool));
            }
            Err(e) => return RunEnd::Failed(e.to_string()),
        }

        let total = config.partitions.len();
        let mut completed = 0usize;
        let flash_timeout = Duration::from_secs(self.settings.flash_timeout_secs);
        let step_timeout = Duration::from_secs(self.settings.command_timeout_secs);

        self.transition(id, JobStatus::Flashing);

        // Partitions flash strictly in caller-supplied order; the first
        // nonzero exit aborts the job with no retry of the sequence.
        for (index, partition) in config.partitions.iter().enumerate() {
            if self.cancel_requested(id) {
                return RunEnd::Cancelled;
            }

            self.registry
                .with_job(id, |job| job.current_partition = Some(partition.name.clone()));
            self.log_line(
                id,
                &format!(
                    "Flashing partition {} ({}/{})",
                    partition.name,
                    index + 1,
                    total
                ),
            );

            match self.flash_partition(id, serial, partition, flash_timeout).await {
                Ok(outcome) if outcome.success => {
                    completed += 1;
                    let percent = (completed * 100 / total) as u8;
                    self.registry
                        .with_job(id, |job| job.overall_progress = percent);
                    self.hub
                        .publish(&JobEvent::progress(id, percent, Some(&partition.name)));
                    debug!(job_id = %id, partition = %partition.name, percent, "Partition flashed");
                }
                Ok(outcome) => {
                    return RunEnd::Failed(format!(
                        "flash of partition {:?} failed: {}",
                        partition.name,
                        outcome.failure_message()
                    ));
                }
                Err(e) => return RunEnd::Failed(e.to_string()),
            }
        }

        if config.wipe_data {
            if self.cancel_requested(id) {
                return RunEnd::Cancelled;
            }
            self.transition(id, JobStatus::Wiping);
            self.log_line(id, "Wiping user data");
            let args = ["-s", serial, "-w"];
            match self.run_tool_step(id, &args, step_timeout).await {
                Ok(outcome) if outcome.success => {}
                Ok(outcome) => {
                    return RunEnd::Failed(format!("wipe failed: {}", outcome.failure_message()));
                }
                Err(e) => return RunEnd::Failed(e.to_string()),
            }
        }

        if config.reboot_after {
            if self.cancel_requested(id) {
                return RunEnd::Cancelled;
            }
            self.transition(id, JobStatus::Rebooting);
            self.log_line(id, "Rebooting to system");
            let args = ["-s", serial, "reboot"];
            match self.run_tool_step(id, &args, step_timeout).await {
                Ok(outcome) if outcome.success => {}
                Ok(outcome) => {
                    return RunEnd::Failed(format!("reboot failed: {}", outcome.failure_message()));
                }
                Err(e) => return RunEnd::Failed(e.to_string()),
            }
        }

        RunEnd::Completed
    }

    async fn flash_partition(
        &self,
        id: &JobId,
        serial: &str,
        partition: &PartitionImage,
        timeout: Duration,
    ) -> Result<CommandOutcome, ReliabilityError> {
        let image = partition.image_path.to_string_lossy().into_owned();
        let args = ["-s", serial, "flash", partition.name.as_str(), image.as_str()];
        self.run_tool_step(id, &args, timeout).await
    }

    /// Runs one flashing-tool invocation under the reliability wrapper,
    /// streaming its output into the job log and the broadcast hub.
    ///
    /// The job's cancellation token is handed to the wrapper: a run the
    /// job itself terminated is not held against the tool's circuit.
    async fn run_tool_step(
        &self,
        id: &JobId,
        args: &[&str],
        timeout: Duration,
    ) -> Result<CommandOutcome, ReliabilityError> {
        let tool = self.settings.flash_tool.as_str();
        let opts = RunOptions::with_timeout(timeout);
        let (tracker, cancel) = self
            .registry
            .with_job(id, |job| (job.active_child.clone(), job.cancel.clone()))
            .unwrap_or_default();

        self.reliability
            .call_cancellable(circuit_for(tool), &cancel, || {
                let (tx, rx) = mpsc::channel::<OutputLine>(64);
                let forwarder = self.spawn_log_forwarder(id.clone(), rx);
                let tracker = tracker.clone();
                let opts = opts.clone();
                async move {
                    let outcome = self
                        .runner
                        .run_streaming(tool, args, &opts, tx, Some(&tracker))
                        .await;
                    let _ = forwarder.await;
                    outcome
                }
            })
            .await
    }

    /// Forwards streamed tool output into the job log and to subscribers
    /// until the channel closes.
    fn spawn_log_forwarder(
        &self,
        id: JobId,
        mut rx: mpsc::Receiver<OutputLine>,
    ) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(&self.registry);
        let hub = Arc::clone(&self.hub);
        tokio::spawn(async move {
            while let Some(output) = rx.recv().await {
                registry.append_log(&id, &output.line);
                hub.publish(&JobEvent::log(&id, &output.line));
            }
        })
    }

    /// Resolves the terminal status. A requested cancellation wins over
    /// any other outcome: cancellation is never reclassified as failure.
    fn finalize(&self, id: &JobId, end: RunEnd) {
        let cancelled = self
            .registry
            .with_job(id, |job| job.cancel.is_cancelled())
            .unwrap_or(false);

        let (status, error) = if cancelled {
            (JobStatus::Cancelled, None)
        } else {
            match end {
                RunEnd::Completed => (JobStatus::Completed, None),
                RunEnd::Cancelled => (JobStatus::Cancelled, None),
                RunEnd::Failed(message) => (JobStatus::Failed, Some(message)),
            }
        };

        if let Some(message) = &error {
            warn!(job_id = %id, error = %message, "Flash job failed");
            self.log_line(id, message);
        } else {
            info!(job_id = %id, %status, "Flash job finished");
        }

        self.registry.with_job(id, |job| {
            job.status = status;
            job.error = error.clone();
            job.current_partition = None;
            job.completed_at = Some(Utc::now());
        });
        self.hub
            .publish(&JobEvent::status(id, status, error.as_deref()));
    }

    fn transition(&self, id: &JobId, status: JobStatus) {
        self.registry.with_job(id, |job| job.status = status);
        self.hub.publish(&JobEvent::status(id, status, None));
    }

    fn cancel_requested(&self, id: &JobId) -> bool {
        self.registry
            .with_job(id, |job| job.cancel.is_cancelled())
            .unwrap_or(true)
    }

    fn log_line(&self, id: &JobId, line: &str) {
        self.registry.append_log(id, line);
        self.hub.publish(&JobEvent::log(id, line));
    }
}
