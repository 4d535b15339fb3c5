use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{KeelError, Result};

/// The fixed policy bucket an action type falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Boundary {
    /// Never executed, never queued.
    Forbidden,
    /// May run unsupervised once the confidence gate passes.
    AutoExecute,
    /// Parked for a cooling-off window, then executed unless cancelled.
    HoldQueue,
    /// Handed to a human as an escalation.
    RequiresApproval,
}

impl Boundary {
    /// Score contributed to the boundary-compliance dimension.
    pub fn compliance_score(&self) -> f64 {
        match self {
            Self::Forbidden => 0.0,
            Self::AutoExecute => 1.0,
            Self::HoldQueue => 0.7,
            Self::RequiresApproval => 0.5,
        }
    }

    pub fn is_compliant(&self) -> bool {
        !matches!(self, Self::Forbidden)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Forbidden => "forbidden",
            Self::AutoExecute => "auto_execute",
            Self::HoldQueue => "hold_queue",
            Self::RequiresApproval => "requires_approval",
        }
    }
}

impl fmt::Display for Boundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every action the agent can propose. Adding a variant forces a decision in
/// [`ActionType::boundary`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    ArtefactUpdate,
    HeartbeatLog,
    NotificationInternal,
    TicketComment,
    EmailStakeholder,
    TicketStatusChange,
    EmailExternal,
    TicketCreate,
    ScopeChange,
    MilestoneChange,
    DeleteData,
    ShareConfidential,
    ModifyIntegrationConfig,
    CommitBudget,
}

impl ActionType {
    pub const ALL: [ActionType; 14] = [
        Self::ArtefactUpdate,
        Self::HeartbeatLog,
        Self::NotificationInternal,
        Self::TicketComment,
        Self::EmailStakeholder,
        Self::TicketStatusChange,
        Self::EmailExternal,
        Self::TicketCreate,
        Self::ScopeChange,
        Self::MilestoneChange,
        Self::DeleteData,
        Self::ShareConfidential,
        Self::ModifyIntegrationConfig,
        Self::CommitBudget,
    ];

    /// The static policy table.
    pub fn boundary(&self) -> Boundary {
        match self {
            Self::DeleteData
            | Self::ShareConfidential
            | Self::ModifyIntegrationConfig
            | Self::CommitBudget => Boundary::Forbidden,
            Self::ArtefactUpdate
            | Self::HeartbeatLog
            | Self::NotificationInternal
            | Self::TicketComment => Boundary::AutoExecute,
            Self::EmailStakeholder | Self::TicketStatusChange => Boundary::HoldQueue,
            Self::EmailExternal
            | Self::TicketCreate
            | Self::ScopeChange
            | Self::MilestoneChange => Boundary::RequiresApproval,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ArtefactUpdate => "artefact_update",
            Self::HeartbeatLog => "heartbeat_log",
            Self::NotificationInternal => "notification_internal",
            Self::TicketComment => "ticket_comment",
            Self::EmailStakeholder => "email_stakeholder",
            Self::TicketStatusChange => "ticket_status_change",
            Self::EmailExternal => "email_external",
            Self::TicketCreate => "ticket_create",
            Self::ScopeChange => "scope_change",
            Self::MilestoneChange => "milestone_change",
            Self::DeleteData => "delete_data",
            Self::ShareConfidential => "share_confidential",
            Self::ModifyIntegrationConfig => "modify_integration_config",
            Self::CommitBudget => "commit_budget",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = KeelError;

    fn from_str(s: &str) -> Result<Self> {
        let needle = s.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == needle)
            .ok_or_else(|| KeelError::validation("action_type", format!("unknown action type '{s}'")))
    }
}

/// Typed payload, one case per action type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action_type", rename_all = "snake_case")]
pub enum ActionPayload {
    ArtefactUpdate {
        artefact_id: String,
        section: String,
        content: String,
    },
    HeartbeatLog {
        note: String,
    },
    NotificationInternal {
        message: String,
    },
    TicketComment {
        ticket_key: String,
        body: String,
    },
    EmailStakeholder {
        to: Vec<String>,
        subject: String,
        body: String,
    },
    TicketStatusChange {
        ticket_key: String,
        #[serde(default)]
        from_status: Option<String>,
        to_status: String,
    },
    EmailExternal {
        to: Vec<String>,
        subject: String,
        body: String,
    },
    TicketCreate {
        summary: String,
        description: String,
        issue_type: String,
    },
    ScopeChange {
        description: String,
        impact: String,
    },
    MilestoneChange {
        milestone: String,
        new_date: NaiveDate,
        reason: String,
    },
    DeleteData {
        target: String,
    },
    ShareConfidential {
        recipient: String,
        document: String,
    },
    ModifyIntegrationConfig {
        integration: String,
        change: serde_json::Value,
    },
    CommitBudget {
        amount_usd: f64,
        purpose: String,
    },
}

impl ActionPayload {
    pub fn action_type(&self) -> ActionType {
        match self {
            Self::ArtefactUpdate { .. } => ActionType::ArtefactUpdate,
            Self::HeartbeatLog { .. } => ActionType::HeartbeatLog,
            Self::NotificationInternal { .. } => ActionType::NotificationInternal,
            Self::TicketComment { .. } => ActionType::TicketComment,
            Self::EmailStakeholder { .. } => ActionType::EmailStakeholder,
            Self::TicketStatusChange { .. } => ActionType::TicketStatusChange,
            Self::EmailExternal { .. } => ActionType::EmailExternal,
            Self::TicketCreate { .. } => ActionType::TicketCreate,
            Self::ScopeChange { .. } => ActionType::ScopeChange,
            Self::MilestoneChange { .. } => ActionType::MilestoneChange,
            Self::DeleteData { .. } => ActionType::DeleteData,
            Self::ShareConfidential { .. } => ActionType::ShareConfidential,
            Self::ModifyIntegrationConfig { .. } => ActionType::ModifyIntegrationConfig,
            Self::CommitBudget { .. } => ActionType::CommitBudget,
        }
    }

    /// Reject payloads with empty required fields. Never coerces.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::ArtefactUpdate {
                artefact_id,
                section,
                ..
            } => {
                required("artefact_id", artefact_id)?;
                required("section", section)
            }
            Self::HeartbeatLog { note } => required("note", note),
            Self::NotificationInternal { message } => required("message", message),
            Self::TicketComment { ticket_key, body } => {
                required("ticket_key", ticket_key)?;
                required("body", body)
            }
            Self::EmailStakeholder { to, subject, .. } | Self::EmailExternal { to, subject, .. } => {
                if to.is_empty() || to.iter().any(|addr| !addr.contains('@')) {
                    return Err(KeelError::validation(
                        "to",
                        "at least one recipient address is required",
                    ));
                }
                required("subject", subject)
            }
            Self::TicketStatusChange {
                ticket_key,
                to_status,
                ..
            } => {
                required("ticket_key", ticket_key)?;
                required("to_status", to_status)
            }
            Self::TicketCreate { summary, issue_type, .. } => {
                required("summary", summary)?;
                required("issue_type", issue_type)
            }
            Self::ScopeChange { description, .. } => required("description", description),
            Self::MilestoneChange { milestone, .. } => required("milestone", milestone),
            Self::DeleteData { target } => required("target", target),
            Self::ShareConfidential {
                recipient,
                document,
            } => {
                required("recipient", recipient)?;
                required("document", document)
            }
            Self::ModifyIntegrationConfig { integration, .. } => {
                required("integration", integration)
            }
            Self::CommitBudget { amount_usd, purpose } => {
                if !amount_usd.is_finite() || *amount_usd < 0.0 {
                    return Err(KeelError::validation(
                        "amount_usd",
                        "must be a finite, non-negative amount",
                    ));
                }
                required("purpose", purpose)
            }
        }
    }
}

fn required(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        Err(KeelError::validation(field, "must not be empty"))
    } else {
        Ok(())
    }
}
