//! Device lock table and manager.

use crate::limiter::ResourceLimiter;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Default lock hold timeout: a lock older than this is stale and may be
/// displaced by the next acquirer.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(300);

/// Default total wait budget for [`DeviceLockManager::acquire_with_wait`].
pub const DEFAULT_ACQUIRE_WAIT: Duration = Duration::from_secs(10);

/// Poll interval while waiting for a lock.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

static LOCK_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_lock_id() -> String {
    format!("lock-{}", LOCK_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
}

/// One held device lock.
#[derive(Debug, Clone)]
pub struct DeviceLock {
    pub device_serial: String,
    /// Operation the holder is performing ("flash", "wipe", ...).
    pub operation: String,
    pub lock_id: String,
    pub locked_at: DateTime<Utc>,
    /// Monotonic expiry deadline.
    deadline: Instant,
    /// Resource slot reserved for this lock.
    slot_key: String,
}

impl DeviceLock {
    /// Remaining hold time; zero when expired.
    pub fn expires_in(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }
}

/// Result of a single acquisition attempt.
#[derive(Debug, Clone)]
pub enum AcquireOutcome {
    Acquired {
        lock_id: String,
        expires_in: Duration,
    },
    /// Another non-expired lock holds the device.
    DeviceLocked {
        locked_by: String,
        lock_id: String,
        expires_in: Duration,
    },
    /// No resource slot available for the operation's category.
    ResourceLimitExceeded { category: String },
}

impl AcquireOutcome {
    pub fn is_acquired(&self) -> bool {
        matches!(self, AcquireOutcome::Acquired { .. })
    }
}

/// Result of [`DeviceLockManager::acquire_with_wait`].
#[derive(Debug, Clone)]
pub enum WaitOutcome {
    Acquired {
        lock_id: String,
        expires_in: Duration,
    },
    /// The wait budget elapsed without acquiring.
    TimedOut { waited: Duration },
}

/// Result of a release call.
///
/// "No lock" is a success case: release is idempotent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Released,
    NotLocked,
    /// A lock exists but under a different id; nothing was released.
    IdMismatch { held_lock_id: String },
}

/// Result of an extension call.
#[derive(Debug, Clone)]
pub enum ExtendOutcome {
    Extended { expires_in: Duration },
    NotLocked,
    IdMismatch { held_lock_id: String },
}

/// Per-device mutual exclusion built on the resource limiter.
#[derive(Debug)]
pub struct DeviceLockManager {
    limiter: Arc<ResourceLimiter>,
    table: Mutex<HashMap<String, DeviceLock>>,
    hold_timeout: Duration,
    acquire_wait: Duration,
    poll_interval: Duration,
}

impl DeviceLockManager {
    pub fn new(limiter: Arc<ResourceLimiter>) -> Self {
        Self::with_timeouts(
            limiter,
            DEFAULT_LOCK_TIMEOUT,
            DEFAULT_ACQUIRE_WAIT,
            DEFAULT_POLL_INTERVAL,
        )
    }

    pub fn with_timeouts(
        limiter: Arc<ResourceLimiter>,
        hold_timeout: Duration,
        acquire_wait: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            limiter,
            table: Mutex::new(HashMap::new()),
            hold_timeout,
            acquire_wait,
            poll_interval,
        }
    }

    /// Attempts to lock `serial` for `operation`.
    ///
    /// A non-expired holder is reported as `DeviceLocked` before any slot
    /// is touched; only an unheld device reserves a resource slot. Check,
    /// reservation and insert all run under the table mutex so two
    /// concurrent acquirers cannot both pass the holder check.
    pub fn acquire(&self, serial: &str, operation: &str) -> AcquireOutcome {
        let mut table = self.table.lock().expect("lock table mutex poisoned");

        if let Some(existing) = table.get(serial) {
            if existing.is_expired() {
                // Stale holder: evict it and free its slot.
                warn!(
                    serial,
                    lock_id = %existing.lock_id,
                    operation = %existing.operation,
                    "Displacing expired device lock"
                );
                if let Some(stale) = table.remove(serial) {
                    self.limiter.release_slot(&stale.slot_key);
                }
            } else {
                return AcquireOutcome::DeviceLocked {
                    locked_by: existing.operation.clone(),
                    lock_id: existing.lock_id.clone(),
                    expires_in: existing.expires_in(),
                };
            }
        }

        let slot_key = format!("{}-{}", serial, operation);
        if !self.limiter.acquire_slot(&slot_key, operation) {
            debug!(serial, operation, "Lock denied: resource limit exceeded");
            return AcquireOutcome::ResourceLimitExceeded {
                category: operation.to_string(),
            };
        }

        let lock = DeviceLock {
            device_serial: serial.to_string(),
            operation: operation.to_string(),
            lock_id: next_lock_id(),
            locked_at: Utc::now(),
            deadline: Instant::now() + self.hold_timeout,
            slot_key,
        };
        let lock_id = lock.lock_id.clone();
        let expires_in = lock.expires_in();
        info!(serial, operation, %lock_id, "Device lock acquired");
        table.insert(serial.to_string(), lock);

        AcquireOutcome::Acquired {
            lock_id,
            expires_in,
        }
    }

    /// Polls [`acquire`](Self::acquire) until success or the wait budget
    /// elapses.
    pub async fn acquire_with_wait(&self, serial: &str, operation: &str) -> WaitOutcome {
        let started = Instant::now();
        loop {
            if let AcquireOutcome::Acquired {
                lock_id,
                expires_in,
            } = self.acquire(serial, operation)
            {
                return WaitOutcome::Acquired {
                    lock_id,
                    expires_in,
                };
            }
            if started.elapsed() >= self.acquire_wait {
                return WaitOutcome::TimedOut {
                    waited: started.elapsed(),
                };
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Releases the lock on `serial`.
    ///
    /// With a `lock_id` the id must match the holder; without one any lock
    /// on the serial is released. Always frees the associated resource
    /// slot.
    pub fn release(&self, serial: &str, lock_id: Option<&str>) -> ReleaseOutcome {
        let mut table = self.table.lock().expect("lock table mutex poisoned");
        let Some(lock) = table.remove(serial) else {
            return ReleaseOutcome::NotLocked;
        };
        if let Some(id) = lock_id {
            if lock.lock_id != id {
                let held_lock_id = lock.lock_id.clone();
                // Wrong id: put the holder back untouched.
                table.insert(serial.to_string(), lock);
                return ReleaseOutcome::IdMismatch { held_lock_id };
            }
        }
        drop(table);
        self.limiter.release_slot(&lock.slot_key);
        debug!(serial, lock_id = %lock.lock_id, "Device lock released");
        ReleaseOutcome::Released
    }

    /// Admin bypass: releases any lock on `serial`, ignoring the id, and
    /// returns the displaced lock for audit.
    pub fn force_release(&self, serial: &str) -> Option<DeviceLock> {
        let mut table = self.table.lock().expect("lock table mutex poisoned");
        let lock = table.remove(serial)?;
        drop(table);
        self.limiter.release_slot(&lock.slot_key);
        warn!(
            serial,
            lock_id = %lock.lock_id,
            operation = %lock.operation,
            "Device lock force-released"
        );
        Some(lock)
    }

    /// Extends the lock's expiry to `extension` from now.
    pub fn extend(&self, serial: &str, lock_id: &str, extension: Duration) -> ExtendOutcome {
        let mut table = self.table.lock().expect("lock table mutex poisoned");
        let Some(existing) = table.get_mut(serial) else {
            return ExtendOutcome::NotLocked;
        };
        if existing.lock_id != lock_id {
            return ExtendOutcome::IdMismatch {
                held_lock_id: existing.lock_id.clone(),
            };
        }
        existing.deadline = Instant::now() + extension;
        ExtendOutcome::Extended {
            expires_in: existing.expires_in(),
        }
    }

    /// Current lock on `serial`, lazily evicting an expired entry.
    pub fn status(&self, serial: &str) -> Option<DeviceLock> {
        let mut table = self.table.lock().expect("lock table mutex poisoned");
        if table.get(serial).is_some_and(|l| l.is_expired()) {
            if let Some(stale) = table.remove(serial) {
                self.limiter.release_slot(&stale.slot_key);
            }
            return None;
        }
        table.get(serial).cloned()
    }

    /// All live locks, lazily evicting expired entries.
    pub fn locks(&self) -> Vec<DeviceLock> {
        let mut table = self.table.lock().expect("lock table mutex poisoned");
        let expired: Vec<String> = table
            .iter()
            .filter(|(_, l)| l.is_expired())
            .map(|(serial, _)| serial.clone())
            .collect();
        let mut stale_slots = Vec::new();
        for serial in expired {
            if let Some(lock) = table.remove(&serial) {
                stale_slots.push(lock.slot_key);
            }
        }
        let live: Vec<DeviceLock> = table.values().cloned().collect();
        drop(table);
        for slot_key in stale_slots {
            self.limiter.release_slot(&slot_key);
        }
        live
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;

    fn manager() -> DeviceLockManager {
        manager_with_hold(DEFAULT_LOCK_TIMEOUT)
    }

    fn manager_with_hold(hold: Duration) -> DeviceLockManager {
        let limiter = Arc::new(ResourceLimiter::new(Map::new(), 8));
        DeviceLockManager::with_timeouts(
            limiter,
            hold,
            Duration::from_millis(300),
            Duration::from_millis(20),
        )
    }

    #[test]
    fn test_second_acquire_reports_device_locked() {
        let locks = manager();

        let first = locks.acquire("R58M123", "flash");
        assert!(first.is_acquired());

        match locks.acquire("R58M123", "flash") {
            AcquireOutcome::DeviceLocked {
                locked_by,
                expires_in,
                ..
            } => {
                assert_eq!(locked_by, "flash");
                assert!(expires_in > Duration::ZERO);
            }
            other => panic!("expected DeviceLocked, got {:?}", other),
        }
    }

    #[test]
    fn test_same_operation_contention_does_not_touch_the_limiter() {
        let limiter = Arc::new(ResourceLimiter::new(Map::new(), 8));
        let locks = DeviceLockManager::new(Arc::clone(&limiter));

        assert!(locks.acquire("R58M123", "flash").is_acquired());

        // The holder check runs before any slot reservation, so the denial
        // is DeviceLocked rather than a limiter rejection.
        match locks.acquire("R58M123", "flash") {
            AcquireOutcome::DeviceLocked { locked_by, .. } => {
                assert_eq!(locked_by, "flash");
            }
            other => panic!("expected DeviceLocked, got {:?}", other),
        }
        assert_eq!(limiter.active_count("flash"), 1);
    }

    #[test]
    fn test_expired_lock_is_displaced_by_next_acquirer() {
        let locks = manager_with_hold(Duration::from_millis(20));

        assert!(locks.acquire("R58M123", "flash").is_acquired());
        std::thread::sleep(Duration::from_millis(40));

        // A different operation can now take the device; the stale entry
        // is cleared implicitly.
        assert!(locks.acquire("R58M123", "wipe").is_acquired());
        let status = locks.status("R58M123").expect("lock present");
        assert_eq!(status.operation, "wipe");
    }

    #[test]
    fn test_release_with_wrong_id_leaves_lock_in_place() {
        let locks = manager();

        let lock_id = match locks.acquire("R58M123", "flash") {
            AcquireOutcome::Acquired { lock_id, .. } => lock_id,
            other => panic!("expected Acquired, got {:?}", other),
        };

        match locks.release("R58M123", Some("lock-999999")) {
            ReleaseOutcome::IdMismatch { held_lock_id } => {
                assert_eq!(held_lock_id, lock_id);
            }
            other => panic!("expected IdMismatch, got {:?}", other),
        }
        assert!(locks.status("R58M123").is_some());

        assert_eq!(
            locks.release("R58M123", Some(&lock_id)),
            ReleaseOutcome::Released
        );
    }

    #[test]
    fn test_release_without_id_always_succeeds() {
        let locks = manager();

        assert_eq!(locks.release("R58M123", None), ReleaseOutcome::NotLocked);

        assert!(locks.acquire("R58M123", "flash").is_acquired());
        assert_eq!(locks.release("R58M123", None), ReleaseOutcome::Released);
        assert_eq!(locks.release("R58M123", None), ReleaseOutcome::NotLocked);
    }

    #[test]
    fn test_release_frees_the_resource_slot() {
        let mut ceilings = Map::new();
        ceilings.insert("flash".to_string(), 1);
        let limiter = Arc::new(ResourceLimiter::new(ceilings, 8));
        let locks = DeviceLockManager::new(Arc::clone(&limiter));

        assert!(locks.acquire("A", "flash").is_acquired());
        // Category at ceiling: a second device is refused at the limiter.
        match locks.acquire("B", "flash") {
            AcquireOutcome::ResourceLimitExceeded { category } => {
                assert_eq!(category, "flash");
            }
            other => panic!("expected ResourceLimitExceeded, got {:?}", other),
        }

        locks.release("A", None);
        assert!(locks.acquire("B", "flash").is_acquired());
    }

    #[test]
    fn test_locked_device_does_not_leak_slots() {
        let limiter = Arc::new(ResourceLimiter::new(Map::new(), 8));
        let locks = DeviceLockManager::new(Arc::clone(&limiter));

        assert!(locks.acquire("R58M123", "flash").is_acquired());
        // Each denied attempt reserves and then releases its slot.
        for _ in 0..10 {
            assert!(!locks.acquire("R58M123", "flash").is_acquired());
        }
        assert_eq!(limiter.active_count("flash"), 1);
    }

    #[test]
    fn test_force_release_returns_prior_lock_for_audit() {
        let locks = manager();

        assert!(locks.acquire("R58M123", "flash").is_acquired());
        let prior = locks.force_release("R58M123").expect("displaced lock");
        assert_eq!(prior.device_serial, "R58M123");
        assert_eq!(prior.operation, "flash");
        assert!(locks.status("R58M123").is_none());
        assert!(locks.force_release("R58M123").is_none());
    }

    #[test]
    fn test_extend_validates_ownership() {
        let locks = manager_with_hold(Duration::from_secs(1));

        let lock_id = match locks.acquire("R58M123", "flash") {
            AcquireOutcome::Acquired { lock_id, .. } => lock_id,
            other => panic!("expected Acquired, got {:?}", other),
        };

        assert!(matches!(
            locks.extend("R58M123", "lock-999999", Duration::from_secs(60)),
            ExtendOutcome::IdMismatch { .. }
        ));
        match locks.extend("R58M123", &lock_id, Duration::from_secs(60)) {
            ExtendOutcome::Extended { expires_in } => {
                assert!(expires_in > Duration::from_secs(30));
            }
            other => panic!("expected Extended, got {:?}", other),
        }
    }

    #[test]
    fn test_status_lazily_evicts_expired_lock() {
        let locks = manager_with_hold(Duration::from_millis(20));

        assert!(locks.acquire("R58M123", "flash").is_acquired());
        std::thread::sleep(Duration::from_millis(40));
        assert!(locks.status("R58M123").is_none());
        assert!(locks.locks().is_empty());
    }

    #[tokio::test]
    async fn test_acquire_with_wait_succeeds_after_release() {
        let locks = Arc::new(manager());

        assert!(locks.acquire("R58M123", "flash").is_acquired());

        let waiter = Arc::clone(&locks);
        let wait_task =
            tokio::spawn(async move { waiter.acquire_with_wait("R58M123", "wipe").await });

        tokio::time::sleep(Duration::from_millis(60)).await;
        locks.release("R58M123", None);

        match wait_task.await.unwrap() {
            WaitOutcome::Acquired { .. } => {}
            other => panic!("expected Acquired, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_acquire_with_wait_times_out_with_elapsed_wait() {
        let locks = manager();

        assert!(locks.acquire("R58M123", "flash").is_acquired());

        match locks.acquire_with_wait("R58M123", "wipe").await {
            WaitOutcome::TimedOut { waited } => {
                assert!(waited >= Duration::from_millis(300));
            }
            other => panic!("expected TimedOut, got {:?}", other),
        }
    }
}
