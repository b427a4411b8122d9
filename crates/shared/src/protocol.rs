//! Job-events protocol definitions.
//!
//! Inbound frames are [`JobUpdateMessage`]s pushed by the backend whenever a
//! job changes. Outbound frames are [`ControlFrame`]s that manage which jobs
//! the client is subscribed to.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::FrameError;

/// Path of the job-events endpoint relative to the socket base URL.
pub const JOBS_WS_PATH: &str = "/ws/jobs";

/// Known lifecycle event types carried in the `type` field of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobEventKind {
    JobUpdate,
    JobCreated,
    JobCompleted,
    JobFailed,
}

impl JobEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobEventKind::JobUpdate => "job_update",
            JobEventKind::JobCreated => "job_created",
            JobEventKind::JobCompleted => "job_completed",
            JobEventKind::JobFailed => "job_failed",
        }
    }

    /// Map a wire `type` string to a known kind.
    pub fn from_wire(value: &str) -> Option<Self> {
        match value {
            "job_update" => Some(JobEventKind::JobUpdate),
            "job_created" => Some(JobEventKind::JobCreated),
            "job_completed" => Some(JobEventKind::JobCompleted),
            "job_failed" => Some(JobEventKind::JobFailed),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A job lifecycle notification received from the backend.
///
/// The `type` field is kept as a raw string so frames with event types this
/// client does not know about still decode; use [`JobUpdateMessage::kind`]
/// for the typed view. The job record is opaque and passed through as-is, and
/// so is the timestamp: a string is kept verbatim, `null` becomes empty, and
/// any other JSON value is kept as its JSON text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobUpdateMessage {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub job: serde_json::Value,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub timestamp: String,
}

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(ts) => ts,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    })
}

impl JobUpdateMessage {
    /// Decode a text frame.
    pub fn from_json(text: &str) -> Result<Self, FrameError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn kind(&self) -> Option<JobEventKind> {
        JobEventKind::from_wire(&self.event_type)
    }

    /// The `id` of the embedded job record, when it has a string or numeric one.
    pub fn job_id(&self) -> Option<String> {
        match self.job.get("id")? {
            serde_json::Value::String(id) => Some(id.clone()),
            serde_json::Value::Number(id) => Some(id.to_string()),
            _ => None,
        }
    }

    /// The `status` of the embedded job record, if present.
    pub fn job_status(&self) -> Option<&str> {
        self.job.get("status")?.as_str()
    }

    /// Parse `timestamp` as RFC 3339. Backends are not required to send one.
    pub fn parsed_timestamp(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.timestamp)
            .ok()
            .map(|ts| ts.with_timezone(&Utc))
    }
}

/// Subscription management frames sent from the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlFrame {
    Subscribe { job_id: String },
    Unsubscribe { job_id: String },
}

impl ControlFrame {
    pub fn subscribe(job_id: impl Into<String>) -> Self {
        ControlFrame::Subscribe {
            job_id: job_id.into(),
        }
    }

    pub fn unsubscribe(job_id: impl Into<String>) -> Self {
        ControlFrame::Unsubscribe {
            job_id: job_id.into(),
        }
    }

    pub fn job_id(&self) -> &str {
        match self {
            ControlFrame::Subscribe { job_id } | ControlFrame::Unsubscribe { job_id } => job_id,
        }
    }
}

/// Derive the job-events socket URL from the HTTP base URL of the REST API.
///
/// `http` becomes `ws`, `https` becomes `wss`, and any path on the base is
/// replaced by [`JOBS_WS_PATH`]. Bases that already use a socket scheme keep
/// it. Returns `None` for anything else.
pub fn ws_url_from_api_base(api_base: &str) -> Option<String> {
    let (scheme, rest) = api_base.trim().split_once("://")?;
    let ws_scheme = match scheme.to_ascii_lowercase().as_str() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        _ => return None,
    };
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    if authority.is_empty() {
        return None;
    }
    Some(format!("{}://{}{}", ws_scheme, authority, JOBS_WS_PATH))
}
