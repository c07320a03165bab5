//! Message types and codec for the job-status protocol
//!
//! Frames are JSON text. Outbound frames are `JobCommand`s, inbound frames
//! are `ServerFrame`s. Unknown inbound fields are kept, not rejected.

use crate::error::{ChannelError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

/// Kind of an outbound job command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobCommandKind {
    /// Submit a new job
    NewJob,
    /// Report a status change for a job
    StatusUpdate,
    /// Acknowledge that a job was queued
    JobQueued,
}

impl JobCommandKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobCommandKind::NewJob => "new_job",
            JobCommandKind::StatusUpdate => "status_update",
            JobCommandKind::JobQueued => "job_queued",
        }
    }
}

/// Command sent from the client to the job processor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobCommand {
    pub kind: JobCommandKind,
    pub job_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_position: Option<u64>,
}

impl JobCommand {
    fn bare(kind: JobCommandKind, job_id: impl Into<String>) -> Self {
        Self {
            kind,
            job_id: job_id.into(),
            source_url: None,
            file_name: None,
            file_size: None,
            status: None,
            message: None,
            queue_position: None,
        }
    }

    /// Submit a job for the uploaded file at `source_url`
    pub fn new_job(job_id: impl Into<String>, source_url: impl Into<String>) -> Self {
        Self::bare(JobCommandKind::NewJob, job_id).with_source_url(source_url)
    }

    /// Report `status` for an existing job
    pub fn status_update(job_id: impl Into<String>, status: impl Into<String>) -> Self {
        let mut cmd = Self::bare(JobCommandKind::StatusUpdate, job_id);
        cmd.status = Some(status.into());
        cmd
    }

    /// Acknowledge that a job sits at `queue_position`
    pub fn job_queued(job_id: impl Into<String>, queue_position: u64) -> Self {
        let mut cmd = Self::bare(JobCommandKind::JobQueued, job_id);
        cmd.queue_position = Some(queue_position);
        cmd
    }

    pub fn with_source_url(mut self, source_url: impl Into<String>) -> Self {
        self.source_url = Some(source_url.into());
        self
    }

    pub fn with_file(mut self, file_name: impl Into<String>, file_size: u64) -> Self {
        self.file_name = Some(file_name.into());
        self.file_size = Some(file_size);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Status carried by every inbound frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameStatus {
    Success,
    Error,
    JobQueued,
}

/// Queue counters the processor attaches to some frames
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSummary {
    pub total_jobs: u64,
    pub queue_length: u64,
    pub queue_processor_running: bool,
}

/// Frame received from the job processor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerFrame {
    pub status: FrameStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_position: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<QueueSummary>,
    /// Job snapshots, passed through untouched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub all_jobs: Option<Vec<Value>>,
    /// Fields this client does not know about
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ServerFrame {
    pub fn is_error(&self) -> bool {
        self.status == FrameStatus::Error
    }

    /// Whether this frame concerns `job_id`
    pub fn is_for(&self, job_id: &str) -> bool {
        self.job_id.as_deref() == Some(job_id)
    }
}

/// Serialize a command into a text frame
pub fn encode(command: &JobCommand) -> Result<String> {
    if command.job_id.trim().is_empty() {
        return Err(ChannelError::InvalidCommand("job_id is empty".to_string()));
    }
    Ok(serde_json::to_string(command)?)
}

/// Parse a text frame into a `ServerFrame`
pub fn decode(payload: &str) -> Result<ServerFrame> {
    let frame: ServerFrame =
        serde_json::from_str(payload).map_err(|e| ChannelError::Protocol(e.to_string()))?;

    // Lenient: the frame is still delivered
    if frame.status == FrameStatus::Error && frame.error.is_none() {
        warn!(job_id = ?frame.job_id, "Error frame without an error message");
    }

    Ok(frame)
}

/// Parse a binary frame; the processor may send JSON as UTF-8 bytes
pub fn decode_bytes(payload: &[u8]) -> Result<ServerFrame> {
    let text = std::str::from_utf8(payload)
        .map_err(|e| ChannelError::Protocol(format!("binary frame is not UTF-8: {}", e)))?;
    decode(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_job_serialization() {
        let cmd = JobCommand::new_job("job-1", "https://cdn.example.com/v.mp4")
            .with_file("v.mp4", 1024);
        let json = encode(&cmd).unwrap();
        assert_eq!(
            json,
            r#"{"kind":"new_job","job_id":"job-1","source_url":"https://cdn.example.com/v.mp4","file_name":"v.mp4","file_size":1024}"#
        );
    }

    #[test]
    fn test_minimal_command_omits_optional_fields() {
        let cmd = JobCommand::bare(JobCommandKind::NewJob, "x");
        assert_eq!(encode(&cmd).unwrap(), r#"{"kind":"new_job","job_id":"x"}"#);
    }

    #[test]
    fn test_status_update_serialization() {
        let cmd = JobCommand::status_update("job-2", "processing").with_message("50%");
        let json = encode(&cmd).unwrap();
        assert_eq!(
            json,
            r#"{"kind":"status_update","job_id":"job-2","status":"processing","message":"50%"}"#
        );
    }

    #[test]
    fn test_job_queued_serialization() {
        let cmd = JobCommand::job_queued("job-3", 4);
        let json = encode(&cmd).unwrap();
        assert_eq!(json, r#"{"kind":"job_queued","job_id":"job-3","queue_position":4}"#);
    }

    #[test]
    fn test_encode_rejects_empty_job_id() {
        let cmd = JobCommand::status_update("  ", "done");
        assert!(matches!(encode(&cmd), Err(ChannelError::InvalidCommand(_))));
    }

    #[test]
    fn test_kind_as_str_matches_wire() {
        for kind in [
            JobCommandKind::NewJob,
            JobCommandKind::StatusUpdate,
            JobCommandKind::JobQueued,
        ] {
            let wire = serde_json::to_value(kind).unwrap();
            assert_eq!(wire, json!(kind.as_str()));
        }
    }

    #[test]
    fn test_decode_job_queued() {
        let frame = decode(r#"{"status":"job_queued","job_id":"abc","queue_position":3}"#).unwrap();
        assert_eq!(frame.status, FrameStatus::JobQueued);
        assert_eq!(frame.job_id.as_deref(), Some("abc"));
        assert_eq!(frame.queue_position, Some(3));
        assert!(frame.error.is_none());
        assert!(frame.extra.is_empty());
        assert!(frame.is_for("abc"));
    }

    #[test]
    fn test_decode_summary_and_jobs() {
        let payload = json!({
            "status": "success",
            "summary": {"total_jobs": 12, "queue_length": 2, "queue_processor_running": true},
            "all_jobs": [{"id": "a", "progress": 40}, {"id": "b"}]
        })
        .to_string();

        let frame = decode(&payload).unwrap();
        assert_eq!(
            frame.summary,
            Some(QueueSummary {
                total_jobs: 12,
                queue_length: 2,
                queue_processor_running: true,
            })
        );
        let jobs = frame.all_jobs.unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0]["progress"], json!(40));
    }

    #[test]
    fn test_decode_error_frame() {
        let frame = decode(r#"{"status":"error","job_id":"j","error":"source unreachable"}"#).unwrap();
        assert!(frame.is_error());
        assert_eq!(frame.error.as_deref(), Some("source unreachable"));
    }

    #[test]
    fn test_decode_error_frame_without_message_is_kept() {
        let frame = decode(r#"{"status":"error","job_id":"j"}"#).unwrap();
        assert!(frame.is_error());
        assert!(frame.is_for("j"));
        assert!(frame.error.is_none());
    }

    #[test]
    fn test_decode_keeps_unknown_fields() {
        let frame = decode(r#"{"status":"success","job_id":"j","progress":75,"stage":"render"}"#)
            .unwrap();
        assert_eq!(frame.extra.get("progress"), Some(&json!(75)));
        assert_eq!(frame.extra.get("stage"), Some(&json!("render")));

        let reencoded: Value = serde_json::to_value(&frame).unwrap();
        assert_eq!(reencoded["progress"], json!(75));
    }

    #[test]
    fn test_decode_rejects_malformed_payloads() {
        for payload in [
            "not json",
            "{}",
            r#"{"status":"finished"}"#,
            r#"{"status":"success","queue_position":-1}"#,
            r#"["status","success"]"#,
        ] {
            let err = decode(payload).unwrap_err();
            assert!(
                matches!(err, ChannelError::Protocol(_)),
                "expected protocol error for {}",
                payload
            );
        }
    }

    #[test]
    fn test_decode_bytes() {
        let frame = decode_bytes(br#"{"status":"success"}"#).unwrap();
        assert_eq!(frame.status, FrameStatus::Success);

        let err = decode_bytes(&[0xff, 0xfe, 0x00]).unwrap_err();
        assert!(matches!(err, ChannelError::Protocol(_)));
    }
}
