use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use std::sync::Arc;
use tokio::sync::broadcast;

use crate::action::{ActionType, Boundary};
use crate::types::ProjectId;

/// Events emitted by the governance core for audit trails and UI badges.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GovernanceEvent {
    // ── Sanitizer ──────────────────────────────────────────────
    ThreatDetected {
        signal_id: String,
        categories: Vec<String>,
        requires_review: bool,
    },

    // ── Routing ────────────────────────────────────────────────
    ActionRouted {
        decision_id: Uuid,
        project_id: ProjectId,
        action_type: ActionType,
        boundary: Boundary,
        outcome: String,
        confidence_pass: bool,
    },

    // ── Hold queue ─────────────────────────────────────────────
    HoldCreated {
        hold_id: Uuid,
        project_id: ProjectId,
        action_type: ActionType,
        held_until: DateTime<Utc>,
    },
    HoldExecuted {
        hold_id: Uuid,
        automatic: bool,
    },
    HoldCancelled {
        hold_id: Uuid,
    },

    // ── Escalations ────────────────────────────────────────────
    EscalationCreated {
        escalation_id: Uuid,
        project_id: ProjectId,
        superseded: Option<Uuid>,
    },
    EscalationDecided {
        escalation_id: Uuid,
        option: String,
    },
    EscalationExpired {
        escalation_id: Uuid,
    },

    // ── Budget ─────────────────────────────────────────────────
    BudgetTierChanged {
        from: u8,
        to: u8,
        daily_spend_usd: f64,
    },
    BudgetRejected {
        reason: String,
        attempted_usd: f64,
    },

    // ── Graduation ─────────────────────────────────────────────
    TrustTierChanged {
        action_type: ActionType,
        from: u8,
        to: u8,
    },
}

/// A broadcast-based event bus for governance pub/sub.
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<GovernanceEvent>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn publish(&self, event: GovernanceEvent) {
        // Ignore send errors (no subscribers).
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GovernanceEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
