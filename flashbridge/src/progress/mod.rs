//! Live progress fan-out to observers.
//!
//! The hub is emit-don't-present: the orchestrator publishes
//! [`JobEvent`]s and never knows who is listening.
//! Delivery is best-effort with no queuing or replay - a late subscriber
//! misses prior events but can always fetch the job's full accumulated
//! log via the synchronous status query.

mod events;
mod hub;

pub use events::{EventKind, JobEvent};
pub use hub::{MonitorId, ProgressHub, SUBSCRIBER_CHANNEL_CAPACITY};
