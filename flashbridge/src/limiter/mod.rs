//! Admission control: resource slots and request rate limiting.
//!
//! [`ResourceLimiter`] bounds how many operations of each category may be
//! in flight at once, protecting host process and file-descriptor limits
//! regardless of which device an operation targets.
//!
//! [`RateLimiter`] throttles requests per `(class, client)` pair with
//! fixed windows; it is request-scoped and independent of the resource
//! slots.

mod rate;
mod resource;

pub use rate::{RateDecision, RateLimitClass, RateLimiter, RATE_SWEEP_INTERVAL};
pub use resource::{ResourceLimiter, ResourceSlot};
