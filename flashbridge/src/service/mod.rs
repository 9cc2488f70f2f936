//! Coordinator facade.
//!
//! [`Coordinator`] owns every shared component (lock table, limiters, job
//! registry, broadcast hub) and is the single entry point embedders and
//! the CLI use. Components are constructed here and injected; nothing in
//! the crate reaches for ambient globals.

mod error;

pub use error::CoordinatorError;

use crate::command::CommandRunner;
use crate::config::Settings;
use crate::flash::{
    self, FlashJobConfig, FlashOrchestrator, JobId, JobRegistry, JobSnapshot,
};
use crate::limiter::{RateDecision, RateLimitClass, RateLimiter, ResourceLimiter};
use crate::lock::{
    AcquireOutcome, DeviceLock, DeviceLockManager, ExtendOutcome, ReleaseOutcome, WaitOutcome,
};
use crate::progress::{MonitorId, ProgressHub};
use crate::reliability::{CircuitBreaker, Reliability, RetryPolicy};
use crate::tooling::{probe_tools, ToolVersion};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Rate limit class charged by [`Coordinator::start_flash`].
pub const FLASH_RATE_CLASS: &str = "flash";

/// Owns all coordinator state and wires the components together.
pub struct Coordinator {
    settings: Settings,
    runner: CommandRunner,
    reliability: Arc<Reliability>,
    limiter: Arc<ResourceLimiter>,
    locks: Arc<DeviceLockManager>,
    rate: Arc<RateLimiter>,
    registry: Arc<JobRegistry>,
    hub: Arc<ProgressHub>,
    orchestrator: FlashOrchestrator,
    shutdown: CancellationToken,
}

impl Coordinator {
    pub fn new(settings: Settings) -> Self {
        let runner = CommandRunner::new();

        let mut ceilings = HashMap::new();
        ceilings.insert(flash::FLASH_OPERATION.to_string(), settings.limits.flash_ceiling);
        ceilings.insert("download".to_string(), settings.limits.download_ceiling);
        let limiter = Arc::new(ResourceLimiter::new(ceilings, settings.limits.default_ceiling));

        let locks = Arc::new(DeviceLockManager::with_timeouts(
            Arc::clone(&limiter),
            Duration::from_secs(settings.locks.hold_timeout_secs),
            Duration::from_secs(settings.locks.acquire_wait_secs),
            Duration::from_millis(settings.locks.poll_interval_ms),
        ));

        let reliability = Reliability::new(
            CircuitBreaker::new(
                settings.breaker.failure_threshold,
                Duration::from_secs(settings.breaker.cooldown_secs),
            ),
            RetryPolicy {
                max_attempts: settings.retry.max_attempts,
                initial_backoff: Duration::from_millis(settings.retry.initial_backoff_ms),
                backoff_multiplier: settings.retry.backoff_multiplier,
            },
        );

        let mut classes = HashMap::new();
        classes.insert(
            FLASH_RATE_CLASS.to_string(),
            RateLimitClass {
                max_requests: settings.rate.flash_max,
                window: Duration::from_secs(settings.rate.flash_window_secs),
            },
        );
        classes.insert(
            "trigger".to_string(),
            RateLimitClass {
                max_requests: settings.rate.trigger_max,
                window: Duration::from_secs(settings.rate.trigger_window_secs),
            },
        );
        let rate = Arc::new(RateLimiter::new(
            classes,
            RateLimitClass {
                max_requests: settings.rate.default_max,
                window: Duration::from_secs(settings.rate.default_window_secs),
            },
        ));

        let registry = Arc::new(JobRegistry::new(settings.flash.history_cap));
        let hub = Arc::new(ProgressHub::new());

        let orchestrator = FlashOrchestrator::new(
            runner.clone(),
            Arc::clone(&reliability),
            Arc::clone(&locks),
            Arc::clone(&registry),
            Arc::clone(&hub),
            settings.flash.clone(),
        );

        Self {
            settings,
            runner,
            reliability,
            limiter,
            locks,
            rate,
            registry,
            hub,
            orchestrator,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Spawns the background maintenance tasks (rate-limiter sweep).
    ///
    /// Runs until [`Coordinator::shutdown`] is called.
    pub fn spawn_maintenance(&self) {
        let rate = Arc::clone(&self.rate);
        let token = self.shutdown.child_token();
        tokio::spawn(rate.run_sweeper(token));
    }

    /// Signals every background task to stop.
    pub fn shutdown(&self) {
        info!("Coordinator shutting down");
        self.shutdown.cancel();
    }

    // --- flash jobs ---

    /// Starts a flash job on behalf of `client`.
    ///
    /// Charges the `flash` rate class first; a limited client is rejected
    /// before any validation or locking happens.
    pub fn start_flash(
        &self,
        client: &str,
        config: FlashJobConfig,
    ) -> Result<JobId, CoordinatorError> {
        match self.rate.check(FLASH_RATE_CLASS, client) {
            RateDecision::Allowed { .. } => {}
            RateDecision::Limited { retry_after } => {
                warn!(client, retry_after = ?retry_after, "Flash request rate limited");
                return Err(CoordinatorError::RateLimited {
                    class: FLASH_RATE_CLASS.to_string(),
                    retry_after,
                });
            }
        }
        Ok(self.orchestrator.start(config)?)
    }

    /// Requests cancellation of a job.
    ///
    /// Cancelling a job that already reached a terminal state is a no-op;
    /// an id the coordinator has never seen is an error.
    pub fn cancel_flash(&self, id: &JobId) -> Result<(), CoordinatorError> {
        if self.orchestrator.cancel(id) {
            return Ok(());
        }
        if self.registry.snapshot(id).is_some() {
            return Ok(());
        }
        Err(CoordinatorError::JobNotFound(id.to_string()))
    }

    pub fn job_status(&self, id: &JobId) -> Result<JobSnapshot, CoordinatorError> {
        self.registry
            .snapshot(id)
            .ok_or_else(|| CoordinatorError::JobNotFound(id.to_string()))
    }

    pub fn active_jobs(&self) -> Vec<JobSnapshot> {
        self.registry.active()
    }

    /// The most recent retired jobs, newest first.
    pub fn job_history(&self, limit: usize) -> Vec<JobSnapshot> {
        self.registry.history(limit)
    }

    // --- device detection and tooling ---

    /// Serials currently visible to the flashing tool.
    pub async fn flash_devices(&self) -> Result<Vec<String>, CoordinatorError> {
        Ok(flash::list_flash_devices(
            &self.runner,
            &self.reliability,
            &self.settings.flash.flash_tool,
        )
        .await?)
    }

    /// Serials currently visible to the device bridge.
    pub async fn bridge_devices(&self) -> Result<Vec<String>, CoordinatorError> {
        Ok(flash::list_bridge_devices(
            &self.runner,
            &self.reliability,
            &self.settings.flash.bridge_tool,
        )
        .await?)
    }

    /// Probes the configured external tools for presence and version.
    pub async fn tool_versions(&self) -> Vec<ToolVersion> {
        probe_tools(&self.runner, &self.settings.flash).await
    }

    // --- lock primitives ---

    pub fn lock_device(&self, serial: &str, operation: &str) -> AcquireOutcome {
        self.locks.acquire(serial, operation)
    }

    pub async fn lock_device_wait(&self, serial: &str, operation: &str) -> WaitOutcome {
        self.locks.acquire_with_wait(serial, operation).await
    }

    pub fn unlock_device(&self, serial: &str, lock_id: Option<&str>) -> ReleaseOutcome {
        self.locks.release(serial, lock_id)
    }

    /// Administrative unlock regardless of holder. The displaced lock is
    /// returned for audit; the lock manager logs it at warn level.
    pub fn force_unlock_device(&self, serial: &str) -> Option<DeviceLock> {
        self.locks.force_release(serial)
    }

    pub fn extend_lock(&self, serial: &str, lock_id: &str, extension: Duration) -> ExtendOutcome {
        self.locks.extend(serial, lock_id, extension)
    }

    pub fn lock_status(&self, serial: &str) -> Option<DeviceLock> {
        self.locks.status(serial)
    }

    pub fn locks(&self) -> Vec<DeviceLock> {
        self.locks.locks()
    }

    /// Active resource slots held for `category`.
    pub fn active_slots(&self, category: &str) -> usize {
        self.limiter.active_count(category)
    }

    // --- rate limiting ---

    pub fn check_rate(&self, class: &str, client: &str) -> RateDecision {
        self.rate.check(class, client)
    }

    // --- event fan-out ---

    /// Stream of serialized events for one job. Replaces any previous
    /// subscriber for the same id.
    pub fn subscribe_job(&self, id: &JobId) -> mpsc::Receiver<String> {
        self.hub.subscribe_job(id.as_str())
    }

    pub fn unsubscribe_job(&self, id: &JobId) {
        self.hub.unsubscribe_job(id.as_str());
    }

    /// Stream of serialized events for every job.
    pub fn subscribe_monitor(&self) -> (MonitorId, mpsc::Receiver<String>) {
        self.hub.subscribe_monitor()
    }

    pub fn unsubscribe_monitor(&self, id: MonitorId) {
        self.hub.unsubscribe_monitor(id);
    }

    /// Handles an inbound client message (ping), returning the reply.
    pub fn handle_client_message(&self, raw: &str) -> Option<String> {
        self.hub.handle_message(raw)
    }
}
