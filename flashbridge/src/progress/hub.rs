//! Subscriber registry and best-effort delivery.

use super::events::JobEvent;
use chrono::Utc;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Capacity of each subscriber channel. A subscriber that falls this far
/// behind starts losing events; the synchronous status query remains the
/// source of truth.
pub const SUBSCRIBER_CHANNEL_CAPACITY: usize = 256;

/// Identifier for a monitor subscription.
pub type MonitorId = u64;

/// Messages a subscriber may send to the hub.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum InboundMessage {
    Ping,
}

/// Fans job events out to per-job and monitor subscribers.
///
/// Holds only non-owning subscriber sets keyed by job id; job state lives
/// exclusively in the registry. Each event is serialized once and the same
/// string is delivered to every open connection.
#[derive(Debug, Default)]
pub struct ProgressHub {
    job_subs: Mutex<HashMap<String, mpsc::Sender<String>>>,
    monitors: Mutex<HashMap<MonitorId, mpsc::Sender<String>>>,
    next_monitor_id: AtomicU64,
}

impl ProgressHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to one job's events. At most one connection per job is
    /// assumed; a new subscription replaces any prior one.
    pub fn subscribe_job(&self, job_id: &str) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        let mut subs = self.job_subs.lock().expect("job subscriber mutex poisoned");
        subs.insert(job_id.to_string(), tx);
        rx
    }

    pub fn unsubscribe_job(&self, job_id: &str) {
        let mut subs = self.job_subs.lock().expect("job subscriber mutex poisoned");
        subs.remove(job_id);
    }

    /// Subscribes to every job's events.
    pub fn subscribe_monitor(&self) -> (MonitorId, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        let id = self.next_monitor_id.fetch_add(1, Ordering::Relaxed);
        let mut monitors = self.monitors.lock().expect("monitor mutex poisoned");
        monitors.insert(id, tx);
        (id, rx)
    }

    pub fn unsubscribe_monitor(&self, id: MonitorId) {
        let mut monitors = self.monitors.lock().expect("monitor mutex poisoned");
        monitors.remove(&id);
    }

    /// Publishes an event to the matching job subscriber and all monitors.
    ///
    /// Serializes once, then delivers best-effort: a full channel drops
    /// the event for that subscriber, a closed channel removes the
    /// subscriber entirely.
    pub fn publish(&self, event: &JobEvent) {
        let payload = match serde_json::to_string(event) {
            Ok(payload) => payload,
            Err(e) => {
                debug!(error = %e, "Failed to serialize job event");
                return;
            }
        };
        trace!(job_id = %event.job_id, kind = ?event.kind, "Publishing job event");

        {
            let mut subs = self.job_subs.lock().expect("job subscriber mutex poisoned");
            if let Some(tx) = subs.get(&event.job_id) {
                if let Err(mpsc::error::TrySendError::Closed(_)) = tx.try_send(payload.clone()) {
                    subs.remove(&event.job_id);
                }
            }
        }

        let mut monitors = self.monitors.lock().expect("monitor mutex poisoned");
        monitors.retain(|_, tx| {
            !matches!(
                tx.try_send(payload.clone()),
                Err(mpsc::error::TrySendError::Closed(_))
            )
        });
    }

    /// Handles an inbound subscriber message, returning the reply to send
    /// back, if any. Unrecognized messages are ignored.
    pub fn handle_message(&self, raw: &str) -> Option<String> {
        match serde_json::from_str::<InboundMessage>(raw) {
            Ok(InboundMessage::Ping) => Some(
                serde_json::json!({
                    "type": "pong",
                    "timestamp": Utc::now(),
                })
                .to_string(),
            ),
            Err(_) => None,
        }
    }

    /// Number of live monitor subscriptions, for diagnostics.
    pub fn monitor_count(&self) -> usize {
        self.monitors.lock().expect("monitor mutex poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flash::{JobId, JobStatus};

    #[test]
    fn test_job_subscriber_receives_matching_events_only() {
        let hub = ProgressHub::new();
        let mut rx = hub.subscribe_job("flash-1");

        hub.publish(&JobEvent::log(&JobId::new("flash-1"), "hello"));
        hub.publish(&JobEvent::log(&JobId::new("flash-2"), "other job"));

        let payload = rx.try_recv().expect("event for flash-1");
        assert!(payload.contains("\"jobId\":\"flash-1\""));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_monitor_receives_every_jobs_events() {
        let hub = ProgressHub::new();
        let (_id, mut rx) = hub.subscribe_monitor();

        hub.publish(&JobEvent::log(&JobId::new("flash-1"), "one"));
        hub.publish(&JobEvent::log(&JobId::new("flash-2"), "two"));

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_closed_subscriber_is_pruned_on_publish() {
        let hub = ProgressHub::new();
        let (_id, rx) = hub.subscribe_monitor();
        drop(rx);

        hub.publish(&JobEvent::status(
            &JobId::new("flash-1"),
            JobStatus::Flashing,
            None,
        ));
        assert_eq!(hub.monitor_count(), 0);
    }

    #[test]
    fn test_new_job_subscription_replaces_prior_one() {
        let hub = ProgressHub::new();
        let mut old_rx = hub.subscribe_job("flash-1");
        let mut new_rx = hub.subscribe_job("flash-1");

        hub.publish(&JobEvent::log(&JobId::new("flash-1"), "after replace"));

        assert!(old_rx.try_recv().is_err());
        assert!(new_rx.try_recv().is_ok());
    }

    #[test]
    fn test_ping_gets_a_pong_with_timestamp() {
        let hub = ProgressHub::new();
        let reply = hub
            .handle_message(r#"{"type":"ping"}"#)
            .expect("pong reply");
        let value: serde_json::Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(value["type"], "pong");
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn test_unrecognized_messages_are_ignored() {
        let hub = ProgressHub::new();
        assert!(hub.handle_message("not json").is_none());
        assert!(hub.handle_message(r#"{"type":"subscribe"}"#).is_none());
    }

    #[test]
    fn test_unsubscribe_job_stops_delivery() {
        let hub = ProgressHub::new();
        let mut rx = hub.subscribe_job("flash-1");
        hub.unsubscribe_job("flash-1");

        hub.publish(&JobEvent::log(&JobId::new("flash-1"), "dropped"));
        assert!(rx.try_recv().is_err());
    }
}
