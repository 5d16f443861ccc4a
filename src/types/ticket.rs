//! Ticket types exchanged with the helpdesk service.
//!
//! These mirror the service's JSON contract. Unknown status strings never fail
//! deserialization; they land in an `Unknown` variant so the workflow tracker can
//! treat them as inert.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use crate::api::ApiError;

/// Workflow status reported by the service once the agent swarm succeeded
pub const WORKFLOW_STATUS_SUCCESS: &str = "success";

/// Ticket lifecycle status as stored by the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    /// Created, not yet picked up by the agent swarm
    #[default]
    Pending,
    /// Agent swarm is working on it
    Processing,
    /// Swarm finished and recorded a resolution
    Resolved,
    /// Swarm crashed; `resolution` carries the failure text
    Error,
    /// Anything the service reports that we do not know about
    #[serde(other)]
    Unknown,
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TicketStatus::Pending => write!(f, "pending"),
            TicketStatus::Processing => write!(f, "processing"),
            TicketStatus::Resolved => write!(f, "resolved"),
            TicketStatus::Error => write!(f, "error"),
            TicketStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// A support ticket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub ticket_id: String,
    pub title: String,
    pub description: String,
    /// low, medium, high, critical
    pub severity: String,
    /// network, cloud, other
    pub category: String,
    pub status: TicketStatus,
    /// ISO 8601, kept as the service sent it
    pub created_at: String,
    pub updated_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_log: Option<Vec<String>>,
}

/// Request body for `POST /api/tickets`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketCreate {
    pub title: String,
    pub description: String,
    pub severity: String,
    pub category: String,
}

/// One message from the swarm's conversation history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    #[serde(default)]
    pub agent_name: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub role: String,
}

/// Nested workflow section of a process response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct WorkflowResult {
    #[serde(default)]
    pub final_response: String,
    /// Agents in execution order; grows between polls, never shrinks
    #[serde(default)]
    pub handoff_sequence: Vec<String>,
    /// Seconds spent in the swarm
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminated_by: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conversation_history: Vec<ConversationMessage>,
}

/// Response of `POST /api/process-ticket/{id}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessResult {
    pub ticket_id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_result: Option<WorkflowResult>,
}

impl ProcessResult {
    /// Handoff sequence, empty when the service sent no workflow section
    pub fn handoff_sequence(&self) -> &[String] {
        self.workflow_result
            .as_ref()
            .map(|w| w.handoff_sequence.as_slice())
            .unwrap_or(&[])
    }

    /// Either channel may report completion: the nested workflow status or the
    /// ticket status.
    pub fn is_terminal(&self) -> bool {
        let workflow_done = self
            .workflow_result
            .as_ref()
            .is_some_and(|w| w.status == WORKFLOW_STATUS_SUCCESS);
        workflow_done || self.status == TicketStatus::Resolved.to_string()
    }

    /// Best human-readable outcome: the summary if present, else the final response
    pub fn outcome_text(&self) -> Option<&str> {
        let workflow = self.workflow_result.as_ref()?;
        workflow
            .summary
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .or_else(|| Some(workflow.final_response.as_str()).filter(|s| !s.trim().is_empty()))
    }
}

/// A file attached to a multipart submission
#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl Attachment {
    /// Read an attachment from disk, guessing the MIME type from the extension
    pub async fn from_path(path: &Path) -> Result<Self, ApiError> {
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            ApiError::invalid_request(format!("cannot read {}: {}", path.display(), e))
        })?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| ApiError::invalid_request(format!("{} has no file name", path.display())))?;

        Ok(Self {
            content_type: content_type_for(&file_name).to_string(),
            file_name,
            bytes,
        })
    }
}

/// MIME type for the image formats the service accepts
pub fn content_type_for(file_name: &str) -> &'static str {
    let ext = Path::new(file_name)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

/// Multipart submission for `POST /api/submit-ticket`
#[derive(Debug, Clone, PartialEq)]
pub struct TicketSubmission {
    pub title: String,
    pub description: String,
    pub severity: String,
    pub category: String,
    pub attachments: Vec<Attachment>,
}

/// Response of `POST /api/submit-ticket`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub ticket_id: String,
    pub status: TicketStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files_processed: Option<u32>,
}

/// Response of `GET /health`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    /// healthy or degraded
    pub status: String,
    #[serde(default)]
    pub services: HashMap<String, serde_json::Value>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

/// Current time, the way tickets created client-side stamp themselves
pub(crate) fn now_iso8601() -> String {
    let now: DateTime<Utc> = Utc::now();
    now.to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result_with(status: &str, workflow_status: &str, handoffs: &[&str]) -> ProcessResult {
        ProcessResult {
            ticket_id: "t-1".to_string(),
            status: status.to_string(),
            workflow_result: Some(WorkflowResult {
                handoff_sequence: handoffs.iter().map(|s| s.to_string()).collect(),
                status: workflow_status.to_string(),
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_ticket_status_unknown_value() {
        let status: TicketStatus = serde_json::from_str("\"archived\"").unwrap();
        assert_eq!(status, TicketStatus::Unknown);

        let status: TicketStatus = serde_json::from_str("\"processing\"").unwrap();
        assert_eq!(status, TicketStatus::Processing);
    }

    #[test]
    fn test_ticket_deserialization() {
        let json = r#"{
            "ticket_id": "550e8400-e29b-41d4-a716-446655440000",
            "title": "S3 Bucket Access Denied",
            "description": "Unable to access my-app-bucket in us-west-2 region",
            "severity": "high",
            "category": "cloud",
            "status": "resolved",
            "created_at": "2024-12-03T10:30:00Z",
            "updated_at": "2024-12-03T10:35:00Z",
            "resolution": "Bucket permissions were updated to allow access."
        }"#;

        let ticket: Ticket = serde_json::from_str(json).unwrap();
        assert_eq!(ticket.status, TicketStatus::Resolved);
        assert_eq!(ticket.category, "cloud");
        assert!(ticket.workflow_log.is_none());
    }

    #[test]
    fn test_terminal_on_workflow_success() {
        assert!(result_with("processing", "success", &["orchestrator_agent"]).is_terminal());
    }

    #[test]
    fn test_terminal_on_ticket_resolved() {
        assert!(result_with("resolved", "completed", &[]).is_terminal());
    }

    #[test]
    fn test_not_terminal_otherwise() {
        assert!(!result_with("processing", "completed", &["orchestrator_agent"]).is_terminal());

        let bare = ProcessResult {
            ticket_id: "t-1".to_string(),
            status: "processing".to_string(),
            workflow_result: None,
        };
        assert!(!bare.is_terminal());
        assert!(bare.handoff_sequence().is_empty());
    }

    #[test]
    fn test_outcome_text_prefers_summary() {
        let mut result = result_with("resolved", "success", &[]);
        if let Some(w) = result.workflow_result.as_mut() {
            w.final_response = "long answer".to_string();
            w.summary = Some("short answer".to_string());
        }
        assert_eq!(result.outcome_text(), Some("short answer"));

        if let Some(w) = result.workflow_result.as_mut() {
            w.summary = Some("   ".to_string());
        }
        assert_eq!(result.outcome_text(), Some("long answer"));
    }

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for("screen.PNG"), "image/png");
        assert_eq!(content_type_for("a.jpeg"), "image/jpeg");
        assert_eq!(content_type_for("notes.txt"), "application/octet-stream");
        assert_eq!(content_type_for("noext"), "application/octet-stream");
    }

    #[tokio::test]
    async fn test_attachment_from_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("error.png");
        std::fs::write(&path, b"\x89PNG").unwrap();

        let attachment = Attachment::from_path(&path).await.unwrap();
        assert_eq!(attachment.file_name, "error.png");
        assert_eq!(attachment.content_type, "image/png");
        assert_eq!(attachment.bytes, b"\x89PNG");
    }

    #[tokio::test]
    async fn test_attachment_missing_file() {
        let err = Attachment::from_path(Path::new("/definitely/not/here.png"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidRequest { .. }));
    }
}
