//! Per-device mutual exclusion.
//!
//! The lock table guarantees at most one non-expired lock per device
//! serial. Every mutating call is a single atomic check-then-act over the
//! whole table - one mutex guards the full map, because the race to
//! prevent is two concurrent callers both observing "no lock" and both
//! inserting. Per-entry locking cannot close that window.
//!
//! Acquisition first reserves a resource slot (keyed `{serial}-{operation}`)
//! from the shared [`ResourceLimiter`], so device locks also count against
//! the system-wide concurrency ceilings.

mod manager;

pub use manager::{
    AcquireOutcome, DeviceLock, DeviceLockManager, ExtendOutcome, ReleaseOutcome, WaitOutcome,
    DEFAULT_ACQUIRE_WAIT, DEFAULT_LOCK_TIMEOUT, DEFAULT_POLL_INTERVAL,
};
