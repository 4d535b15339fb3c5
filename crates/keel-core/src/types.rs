use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{KeelError, Result};

/// Reference to the project a signal, hold, or escalation belongs to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(String);

impl ProjectId {
    /// Project ids become part of storage keys, so they must be non-empty and free of
    /// the `#` key separator.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.is_empty() {
            return Err(KeelError::validation("project_id", "must not be empty"));
        }
        if trimmed.contains('#') {
            return Err(KeelError::validation(
                "project_id",
                format!("'{trimmed}' must not contain '#'"),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// External tracker a signal was ingested from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalSource {
    Jira,
    Outlook,
    Calendar,
    Teams,
    Github,
    Manual,
}

impl SignalSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Jira => "jira",
            Self::Outlook => "outlook",
            Self::Calendar => "calendar",
            Self::Teams => "teams",
            Self::Github => "github",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for SignalSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    TicketCreated,
    TicketUpdated,
    TicketStatusChanged,
    TicketCommented,
    EmailReceived,
    MeetingScheduled,
    DeadlineApproaching,
    Unknown,
}

/// A normalized event from an external tracker, before sanitization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: String,
    pub source: SignalSource,
    pub timestamp: DateTime<Utc>,
    pub signal_type: SignalType,
    pub project_id: ProjectId,
    /// Free text of arbitrary origin (ticket comment, email body, ...). Untrusted.
    pub summary: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// A signal whose summary has been through the sanitizer. Immutable once built;
/// re-sanitizing the original signal produces a new one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SanitizedSignal {
    pub id: String,
    pub source: SignalSource,
    pub timestamp: DateTime<Utc>,
    pub signal_type: SignalType,
    pub project_id: ProjectId,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub cleaned_summary: String,
    /// One note per sanitization step that changed the content; `None` when nothing did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sanitization_notes: Option<Vec<String>>,
}

impl SanitizedSignal {
    pub fn from_signal(
        signal: &Signal,
        cleaned_summary: String,
        notes: Vec<String>,
    ) -> Self {
        Self {
            id: signal.id.clone(),
            source: signal.source,
            timestamp: signal.timestamp,
            signal_type: signal.signal_type,
            project_id: signal.project_id.clone(),
            metadata: signal.metadata.clone(),
            cleaned_summary,
            sanitization_notes: if notes.is_empty() { None } else { Some(notes) },
        }
    }

    pub fn was_modified(&self) -> bool {
        self.sanitization_notes.is_some()
    }
}
