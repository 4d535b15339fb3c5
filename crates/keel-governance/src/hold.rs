//! The hold queue: actions whose side effect waits out a cooling-off window.
//!
//! `pending --approve--> executed`, `pending --cancel--> cancelled`, and the sweep
//! may take `pending --> executed` once the window has passed. Every transition is
//! a conditional write on `status == "pending"`, so a human decision and a sweep
//! can never both win.

use chrono::{DateTime, Utc};
use keel_core::{
    ActionPayload, ActionType, Boundary, Clock, EventBus, GovernanceEvent, KeelError, ProjectId,
    Result, new_id,
};
use keel_store::{Condition, Item, Query, Repository, WriteOp, decode, encode, keys};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::graduation::{GraduationTracker, StagedGraduation};
use crate::precedent::{PrecedentLog, PrecedentOutcome};

/// Recorded as `decided_by` when the sweep auto-executes a hold.
pub const SWEEP_ACTOR: &str = "sweep";

const MAX_TRANSITION_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldStatus {
    Pending,
    Executed,
    Cancelled,
}

impl HoldStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Executed => "executed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for HoldStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoldDecision {
    pub decided_by: String,
    pub decided_at: DateTime<Utc>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeldAction {
    pub id: Uuid,
    pub project_id: ProjectId,
    pub action_type: ActionType,
    pub payload: ActionPayload,
    pub held_until: DateTime<Utc>,
    pub status: HoldStatus,
    pub created_at: DateTime<Utc>,
    /// Trust tier of the action type when the hold was created.
    pub trust_tier: u8,
    #[serde(default)]
    pub decision: Option<HoldDecision>,
}

impl HeldAction {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == HoldStatus::Pending && self.held_until <= now
    }
}

/// One entry of the agent-wide due-time index.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DueEntry {
    project_id: ProjectId,
    hold_id: Uuid,
    held_until: DateTime<Utc>,
}

#[derive(Clone)]
pub struct HoldQueue {
    repo: Arc<dyn Repository>,
    clock: Arc<dyn Clock>,
    graduation: GraduationTracker,
    precedents: PrecedentLog,
    events: EventBus,
}

impl HoldQueue {
    pub fn new(
        repo: Arc<dyn Repository>,
        clock: Arc<dyn Clock>,
        graduation: GraduationTracker,
        precedents: PrecedentLog,
        events: EventBus,
    ) -> Self {
        Self {
            repo,
            clock,
            graduation,
            precedents,
            events,
        }
    }

    /// Park an action for its cooling-off window.
    pub async fn hold(&self, project_id: &ProjectId, payload: ActionPayload) -> Result<HeldAction> {
        payload.validate()?;
        let action_type = payload.action_type();
        if action_type.boundary() != Boundary::HoldQueue {
            return Err(KeelError::validation(
                "action_type",
                format!("{action_type} is {} and cannot be held", action_type.boundary()),
            ));
        }

        let (trust_tier, window) = self.graduation.hold_window(action_type).await?;
        let now = self.clock.now();
        let held = HeldAction {
            id: new_id(now),
            project_id: project_id.clone(),
            action_type,
            payload,
            held_until: now + window,
            status: HoldStatus::Pending,
            created_at: now,
            trust_tier,
            decision: None,
        };
        let due = DueEntry {
            project_id: project_id.clone(),
            hold_id: held.id,
            held_until: held.held_until,
        };

        self.repo
            .transact(vec![
                WriteOp::Put {
                    item: encode(keys::hold(project_id, held.id), &held)?,
                    condition: Condition::NotExists,
                },
                WriteOp::Put {
                    item: encode(keys::hold_due(held.held_until, project_id, held.id), &due)?,
                    condition: Condition::NotExists,
                },
            ])
            .await?;

        info!(
            hold_id = %held.id,
            project = %project_id,
            %action_type,
            held_until = %held.held_until,
            trust_tier,
            "action held"
        );
        self.events.publish(GovernanceEvent::HoldCreated {
            hold_id: held.id,
            project_id: project_id.clone(),
            action_type,
            held_until: held.held_until,
        });
        Ok(held)
    }

    pub async fn get(&self, project_id: &ProjectId, id: Uuid) -> Result<HeldAction> {
        Ok(self.load(project_id, id).await?.1)
    }

    async fn load(&self, project_id: &ProjectId, id: Uuid) -> Result<(Item, HeldAction)> {
        let key = keys::hold(project_id, id);
        let item = self
            .repo
            .get(&key)
            .await?
            .ok_or_else(|| KeelError::not_found("held_action", key.to_string()))?;
        let held = decode(&item)?;
        Ok((item, held))
    }

    /// Human approval: the action executes now.
    pub async fn approve(
        &self,
        project_id: &ProjectId,
        id: Uuid,
        decided_by: &str,
    ) -> Result<HeldAction> {
        self.transition(project_id, id, HoldStatus::Executed, decided_by, None, false)
            .await
    }

    pub async fn cancel(
        &self,
        project_id: &ProjectId,
        id: Uuid,
        decided_by: &str,
        reason: Option<String>,
    ) -> Result<HeldAction> {
        self.transition(project_id, id, HoldStatus::Cancelled, decided_by, reason, false)
            .await
    }

    pub async fn list_for_project(
        &self,
        project_id: &ProjectId,
        status: Option<HoldStatus>,
    ) -> Result<Vec<HeldAction>> {
        let items = self
            .repo
            .query(Query::prefix(keys::project_pk(project_id), keys::HOLD_PREFIX))
            .await?;
        let mut holds = Vec::with_capacity(items.len());
        for item in &items {
            let held: HeldAction = decode(item)?;
            if status.is_none_or(|s| s == held.status) {
                holds.push(held);
            }
        }
        Ok(holds)
    }

    /// Pending holds whose window has passed, earliest first.
    pub async fn due(&self) -> Result<Vec<HeldAction>> {
        let now = self.clock.now();
        let entries = self
            .repo
            .query(Query::prefix(keys::AGENT_PK, keys::HOLD_DUE_PREFIX))
            .await?;
        let mut due = Vec::new();
        for item in &entries {
            let entry: DueEntry = decode(item)?;
            if entry.held_until > now {
                break;
            }
            match self.get(&entry.project_id, entry.hold_id).await {
                Ok(held) if held.is_due(now) => due.push(held),
                Ok(_) => {}
                Err(KeelError::NotFound { .. }) => {
                    warn!(hold_id = %entry.hold_id, "due index points at a missing hold");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(due)
    }

    /// Execute every due hold. Holds decided concurrently are skipped, so running
    /// the sweep twice executes nothing the second time.
    pub async fn sweep_due(&self) -> Result<usize> {
        let mut executed = 0;
        for held in self.due().await? {
            match self
                .transition(
                    &held.project_id,
                    held.id,
                    HoldStatus::Executed,
                    SWEEP_ACTOR,
                    None,
                    true,
                )
                .await
            {
                Ok(_) => executed += 1,
                Err(
                    e @ (KeelError::ConcurrentModification { .. }
                    | KeelError::InvalidTransition { .. }),
                ) => {
                    debug!(hold_id = %held.id, error = %e, "hold decided elsewhere, skipping");
                }
                Err(e) => return Err(e),
            }
        }
        if executed > 0 {
            info!(executed, "held actions auto-executed");
        }
        Ok(executed)
    }

    /// Apply a status change. The hold, its due-index entry, the precedent and any
    /// graduation update commit in one transaction. A conflict is retried from fresh
    /// state; once another writer has decided the hold, the retry reports
    /// `InvalidTransition`.
    async fn transition(
        &self,
        project_id: &ProjectId,
        id: Uuid,
        to: HoldStatus,
        decided_by: &str,
        reason: Option<String>,
        automatic: bool,
    ) -> Result<HeldAction> {
        let mut attempt = 1;
        loop {
            match self
                .try_transition(project_id, id, to, decided_by, reason.clone(), automatic)
                .await
            {
                Err(e @ KeelError::ConcurrentModification { .. })
                    if attempt < MAX_TRANSITION_ATTEMPTS =>
                {
                    debug!(hold_id = %id, attempt, error = %e, "hold transition conflicted, retrying");
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    async fn try_transition(
        &self,
        project_id: &ProjectId,
        id: Uuid,
        to: HoldStatus,
        decided_by: &str,
        reason: Option<String>,
        automatic: bool,
    ) -> Result<HeldAction> {
        let (_, mut held) = self.load(project_id, id).await?;
        if held.status.is_terminal() {
            return Err(KeelError::InvalidTransition {
                entity: "held_action".into(),
                from: held.status.to_string(),
                to: to.to_string(),
            });
        }

        let now = self.clock.now();
        if automatic && held.held_until > now {
            return Err(KeelError::InvalidTransition {
                entity: "held_action".into(),
                from: "pending (window open)".into(),
                to: to.to_string(),
            });
        }
        held.status = to;
        held.decision = Some(HoldDecision {
            decided_by: decided_by.to_string(),
            decided_at: now,
            reason,
        });

        let outcome = match to {
            HoldStatus::Cancelled => PrecedentOutcome::Cancelled,
            _ => PrecedentOutcome::Executed,
        };
        // Only human decisions move graduation.
        let graduation = match (to, automatic) {
            (HoldStatus::Cancelled, _) => {
                Some(self.graduation.stage_cancellation(held.action_type).await?)
            }
            (_, false) => Some(self.graduation.stage_approval(held.action_type).await?),
            (_, true) => None,
        };
        let (_, precedent) = self.precedents.stage(
            project_id,
            held.action_type,
            outcome,
            Some(format!("hold {id}")),
        )?;

        let mut ops = vec![
            WriteOp::Put {
                item: encode(keys::hold(project_id, id), &held)?,
                condition: Condition::field_equals("status", HoldStatus::Pending.as_str()),
            },
            WriteOp::Delete {
                key: keys::hold_due(held.held_until, project_id, id),
                condition: Condition::Always,
            },
            precedent,
        ];
        let graduation = graduation.map(|StagedGraduation { op, record, before }| {
            ops.push(op);
            (record, before)
        });
        self.repo.transact(ops).await?;

        info!(hold_id = %id, project = %project_id, status = %to, decided_by, "hold decided");
        match to {
            HoldStatus::Cancelled => {
                self.events.publish(GovernanceEvent::HoldCancelled { hold_id: id });
            }
            _ => {
                self.events.publish(GovernanceEvent::HoldExecuted {
                    hold_id: id,
                    automatic,
                });
            }
        }
        if let Some((record, before)) = graduation {
            self.graduation.committed(record, before);
        }
        Ok(held)
    }
}
