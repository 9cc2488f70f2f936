//! Job event wire format.
//!
//! Every event serializes to `{type, jobId, timestamp, data}` with a
//! kind-specific `data` payload.

use crate::flash::{JobId, JobStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};

/// Event kinds, as they appear in the wire `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Log,
    Status,
    Progress,
}

/// One job event as delivered to subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub job_id: String,
    pub timestamp: DateTime<Utc>,
    pub data: Value,
}

impl JobEvent {
    fn new(kind: EventKind, job_id: &JobId, data: Value) -> Self {
        Self {
            kind,
            job_id: job_id.to_string(),
            timestamp: Utc::now(),
            data,
        }
    }

    /// A log line from the running tool or the orchestrator itself.
    pub fn log(job_id: &JobId, line: &str) -> Self {
        Self::new(EventKind::Log, job_id, json!({ "line": line }))
    }

    /// A status transition, optionally carrying a failure reason.
    pub fn status(job_id: &JobId, status: JobStatus, error: Option<&str>) -> Self {
        let mut data = json!({ "status": status });
        if let Some(error) = error {
            data["error"] = Value::String(error.to_string());
        }
        Self::new(EventKind::Status, job_id, data)
    }

    /// A discrete progress update after a partition finishes.
    pub fn progress(job_id: &JobId, percent: u8, current_partition: Option<&str>) -> Self {
        Self::new(
            EventKind::Progress,
            job_id,
            json!({
                "progress": percent,
                "currentPartition": current_partition,
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_event_wire_shape() {
        let event = JobEvent::log(&JobId::new("flash-1"), "Sending 'boot'");
        let value: Value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["type"], "log");
        assert_eq!(value["jobId"], "flash-1");
        assert_eq!(value["data"]["line"], "Sending 'boot'");
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn test_status_event_carries_error_when_present() {
        let event = JobEvent::status(
            &JobId::new("flash-1"),
            JobStatus::Failed,
            Some("device R58M123 not detected"),
        );
        let value: Value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["type"], "status");
        assert_eq!(value["data"]["status"], "failed");
        assert_eq!(value["data"]["error"], "device R58M123 not detected");
    }

    #[test]
    fn test_status_event_omits_error_when_absent() {
        let event = JobEvent::status(&JobId::new("flash-1"), JobStatus::Flashing, None);
        let value: Value = serde_json::to_value(&event).unwrap();
        assert!(value["data"].get("error").is_none());
    }

    #[test]
    fn test_progress_event_wire_shape() {
        let event = JobEvent::progress(&JobId::new("flash-1"), 33, Some("system"));
        let value: Value = serde_json::to_value(&event).unwrap();

        assert_eq!(value["type"], "progress");
        assert_eq!(value["data"]["progress"], 33);
        assert_eq!(value["data"]["currentPartition"], "system");
    }
}
