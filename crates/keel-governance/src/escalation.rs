//! Escalations: decisions handed to a human.
//!
//! `pending --record_decision--> decided`, `pending --expire--> expired`, and
//! `pending --supersede--> superseded` when a newer escalation is raised for the
//! same concern. All three end states are terminal.
//!
//! Alongside the escalation items, an agent-wide pending index and counter are
//! kept in the same transaction as every transition, so listing pending work
//! across projects and counting it for a badge never scan project partitions.

use chrono::{DateTime, Duration, Utc};
use keel_config::EscalationConfig;
use keel_core::{
    ActionPayload, ActionType, Clock, EventBus, GovernanceEvent, KeelError, ProjectId, Result,
    new_id,
};
use keel_store::{Condition, Item, Query, Repository, UpdateExpr, WriteOp, decode, encode, keys};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::precedent::{PrecedentLog, PrecedentOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// What choosing an option means for the action the escalation proposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Approve,
    Reject,
}

/// One of the mutually exclusive choices offered to the human.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationOption {
    pub label: String,
    pub description: String,
    #[serde(default)]
    pub pros: Vec<String>,
    #[serde(default)]
    pub cons: Vec<String>,
    pub risk: RiskLevel,
    /// Set on options that settle the proposed action. Choosing one records a
    /// precedent for the action type; other options (e.g. defer) record nothing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolves: Option<Resolution>,
}

impl EscalationOption {
    pub fn new(label: impl Into<String>, description: impl Into<String>, risk: RiskLevel) -> Self {
        Self {
            label: label.into(),
            description: description.into(),
            pros: Vec::new(),
            cons: Vec::new(),
            risk,
            resolves: None,
        }
    }

    /// Choosing this option carries out the proposed action.
    pub fn approving(mut self) -> Self {
        self.resolves = Some(Resolution::Approve);
        self
    }

    /// Choosing this option drops the proposed action.
    pub fn rejecting(mut self) -> Self {
        self.resolves = Some(Resolution::Reject);
        self
    }

    /// Approve / reject / defer, offered when the caller supplies no options.
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new("approve", "Carry out the proposed action", RiskLevel::Medium).approving(),
            Self::new("reject", "Drop the proposed action", RiskLevel::Low).rejecting(),
            Self::new("defer", "Revisit once more information is available", RiskLevel::Low),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationStatus {
    Pending,
    Decided,
    Expired,
    Superseded,
}

impl EscalationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Decided => "decided",
            Self::Expired => "expired",
            Self::Superseded => "superseded",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for EscalationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the escalation was raised. Confidence failures on actions that would
/// otherwise have auto-executed are kept apart from actions that always need
/// approval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EscalationTrigger {
    /// The action type always needs a human. Any failing confidence dimensions are
    /// carried along for context.
    ApprovalRequired {
        #[serde(default)]
        blocking_reasons: Vec<String>,
    },
    ConfidenceFailed { blocking_reasons: Vec<String> },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EscalationContext {
    #[serde(default)]
    pub signals: Vec<String>,
    #[serde(default)]
    pub excerpts: Vec<String>,
    #[serde(default)]
    pub precedent_notes: Vec<String>,
}

/// Everything needed to raise an escalation.
#[derive(Debug, Clone)]
pub struct EscalationDraft {
    pub project_id: ProjectId,
    pub title: String,
    /// Escalations sharing a concern replace each other while unresolved.
    pub concern: Option<String>,
    pub action_type: Option<ActionType>,
    pub payload: Option<ActionPayload>,
    pub context: EscalationContext,
    pub options: Vec<EscalationOption>,
    pub recommended_option: Option<String>,
    pub rationale: Option<String>,
    pub trigger: EscalationTrigger,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationDecision {
    pub option: String,
    #[serde(default)]
    pub notes: Option<String>,
    pub decided_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Escalation {
    pub id: Uuid,
    pub project_id: ProjectId,
    pub title: String,
    #[serde(default)]
    pub concern: Option<String>,
    #[serde(default)]
    pub action_type: Option<ActionType>,
    #[serde(default)]
    pub payload: Option<ActionPayload>,
    pub context: EscalationContext,
    pub options: Vec<EscalationOption>,
    #[serde(default)]
    pub recommended_option: Option<String>,
    #[serde(default)]
    pub rationale: Option<String>,
    pub trigger: EscalationTrigger,
    pub status: EscalationStatus,
    #[serde(default)]
    pub decision: Option<EscalationDecision>,
    #[serde(default)]
    pub superseded_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Escalation {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == EscalationStatus::Pending && now >= self.expires_at
    }

    fn option(&self, label: &str) -> Option<&EscalationOption> {
        let label = label.trim();
        self.options
            .iter()
            .find(|o| o.label.trim().eq_ignore_ascii_case(label))
    }
}

/// Entry in the agent-wide pending and decided indexes.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexEntry {
    project_id: ProjectId,
    escalation_id: Uuid,
    at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConcernPointer {
    escalation_id: Uuid,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Counter {
    count: i64,
}

fn validate(draft: &EscalationDraft) -> Result<()> {
    if draft.title.trim().is_empty() {
        return Err(KeelError::validation("title", "must not be empty"));
    }
    if draft.options.is_empty() {
        return Err(KeelError::validation("options", "at least one option is required"));
    }
    let mut seen = HashSet::new();
    for option in &draft.options {
        let label = option.label.trim().to_ascii_lowercase();
        if label.is_empty() {
            return Err(KeelError::validation("options", "option labels must not be empty"));
        }
        if !seen.insert(label) {
            return Err(KeelError::validation(
                "options",
                format!("duplicate option label '{}'", option.label.trim()),
            ));
        }
    }
    if let Some(recommended) = &draft.recommended_option {
        if !seen.contains(&recommended.trim().to_ascii_lowercase()) {
            return Err(KeelError::validation(
                "recommended_option",
                format!("'{recommended}' is not one of the options"),
            ));
        }
    }
    if let Some(payload) = &draft.payload {
        payload.validate()?;
    }
    if draft.concern.as_ref().is_some_and(|c| c.trim().is_empty()) {
        return Err(KeelError::validation("concern", "must not be empty when given"));
    }
    Ok(())
}

#[derive(Clone)]
pub struct EscalationQueue {
    repo: Arc<dyn Repository>,
    clock: Arc<dyn Clock>,
    config: EscalationConfig,
    precedents: PrecedentLog,
    events: EventBus,
}

impl EscalationQueue {
    pub fn new(
        repo: Arc<dyn Repository>,
        clock: Arc<dyn Clock>,
        config: EscalationConfig,
        precedents: PrecedentLog,
        events: EventBus,
    ) -> Self {
        Self {
            repo,
            clock,
            config,
            precedents,
            events,
        }
    }

    /// Raise an escalation. An unresolved escalation for the same concern is
    /// superseded in the same transaction.
    pub async fn create(&self, draft: EscalationDraft) -> Result<Escalation> {
        validate(&draft)?;
        self.ensure_counter().await?;

        let now = self.clock.now();
        let project_id = draft.project_id.clone();
        let escalation = Escalation {
            id: new_id(now),
            project_id: project_id.clone(),
            title: draft.title.trim().to_string(),
            concern: draft.concern.map(|c| c.trim().to_string()),
            action_type: draft.action_type,
            payload: draft.payload,
            context: draft.context,
            options: draft.options,
            recommended_option: draft.recommended_option,
            rationale: draft.rationale,
            trigger: draft.trigger,
            status: EscalationStatus::Pending,
            decision: None,
            superseded_by: None,
            created_at: now,
            expires_at: now + Duration::hours(i64::from(self.config.ttl_hours)),
            resolved_at: None,
        };

        let mut ops = vec![
            WriteOp::Put {
                item: encode(keys::escalation(&project_id, escalation.id), &escalation)?,
                condition: Condition::NotExists,
            },
            WriteOp::Put {
                item: encode(
                    keys::escalation_pending(escalation.id),
                    &IndexEntry {
                        project_id: project_id.clone(),
                        escalation_id: escalation.id,
                        at: now,
                    },
                )?,
                condition: Condition::NotExists,
            },
        ];

        let mut superseded = None;
        if let Some(concern) = &escalation.concern {
            let pointer_key = keys::concern(&project_id, concern);
            let pointer = self.repo.get(&pointer_key).await?;
            let pointer_condition = match &pointer {
                Some(item) => Condition::VersionIs(item.version),
                None => Condition::NotExists,
            };
            if let Some(item) = &pointer {
                let pointer: ConcernPointer = decode(item)?;
                if let Some((_, mut previous)) =
                    self.try_load(&project_id, pointer.escalation_id).await?
                {
                    if previous.status == EscalationStatus::Pending {
                        previous.status = EscalationStatus::Superseded;
                        previous.superseded_by = Some(escalation.id);
                        previous.resolved_at = Some(now);
                        ops.push(WriteOp::Put {
                            item: encode(keys::escalation(&project_id, previous.id), &previous)?,
                            condition: Condition::field_equals(
                                "status",
                                EscalationStatus::Pending.as_str(),
                            ),
                        });
                        ops.push(WriteOp::Delete {
                            key: keys::escalation_pending(previous.id),
                            condition: Condition::Always,
                        });
                        superseded = Some(previous.id);
                    }
                }
            }
            ops.push(WriteOp::Put {
                item: encode(
                    pointer_key,
                    &ConcernPointer {
                        escalation_id: escalation.id,
                    },
                )?,
                condition: pointer_condition,
            });
        }
        // One in, one out when superseding: the pending count is unchanged.
        if superseded.is_none() {
            ops.push(counter_delta(1));
        }

        self.repo.transact(ops).await?;

        info!(
            escalation_id = %escalation.id,
            project = %project_id,
            superseded = ?superseded,
            expires_at = %escalation.expires_at,
            "escalation created"
        );
        self.events.publish(GovernanceEvent::EscalationCreated {
            escalation_id: escalation.id,
            project_id,
            superseded,
        });
        Ok(escalation)
    }

    pub async fn get(&self, project_id: &ProjectId, id: Uuid) -> Result<Escalation> {
        self.try_load(project_id, id)
            .await?
            .map(|(_, escalation)| escalation)
            .ok_or_else(|| {
                KeelError::not_found("escalation", keys::escalation(project_id, id).to_string())
            })
    }

    async fn try_load(&self, project_id: &ProjectId, id: Uuid) -> Result<Option<(Item, Escalation)>> {
        match self.repo.get(&keys::escalation(project_id, id)).await? {
            Some(item) => {
                let escalation = decode(&item)?;
                Ok(Some((item, escalation)))
            }
            None => Ok(None),
        }
    }

    /// Record the human's choice. The option must be one of the offered labels. When
    /// the option approves or rejects the proposed action, an executed or cancelled
    /// precedent for its action type commits with the decision.
    pub async fn record_decision(
        &self,
        project_id: &ProjectId,
        id: Uuid,
        option: &str,
        notes: Option<String>,
    ) -> Result<Escalation> {
        let mut escalation = self.get(project_id, id).await?;
        if escalation.status.is_terminal() {
            return Err(KeelError::InvalidTransition {
                entity: "escalation".into(),
                from: escalation.status.to_string(),
                to: EscalationStatus::Decided.to_string(),
            });
        }

        let now = self.clock.now();
        if escalation.is_expired(now) {
            match self.mark_expired(escalation).await {
                Ok(_) | Err(KeelError::ConcurrentModification { .. }) => {}
                Err(e) => return Err(e),
            }
            return Err(KeelError::InvalidTransition {
                entity: "escalation".into(),
                from: EscalationStatus::Expired.to_string(),
                to: EscalationStatus::Decided.to_string(),
            });
        }

        let (chosen, resolves) = match escalation.option(option) {
            Some(o) => (o.label.clone(), o.resolves),
            None => {
                let labels: Vec<&str> = escalation.options.iter().map(|o| o.label.as_str()).collect();
                return Err(KeelError::validation(
                    "option",
                    format!("'{option}' is not one of: {}", labels.join(", ")),
                ));
            }
        };

        escalation.status = EscalationStatus::Decided;
        escalation.decision = Some(EscalationDecision {
            option: chosen.clone(),
            notes,
            decided_at: now,
        });
        escalation.resolved_at = Some(now);

        let mut ops = vec![
            WriteOp::Put {
                item: encode(keys::escalation(project_id, id), &escalation)?,
                condition: Condition::field_equals("status", EscalationStatus::Pending.as_str()),
            },
            WriteOp::Delete {
                key: keys::escalation_pending(id),
                condition: Condition::Always,
            },
            WriteOp::Put {
                item: encode(
                    keys::escalation_decided(now, project_id, id),
                    &IndexEntry {
                        project_id: project_id.clone(),
                        escalation_id: id,
                        at: now,
                    },
                )?,
                condition: Condition::NotExists,
            },
            counter_delta(-1),
        ];
        if let (Some(action_type), Some(resolution)) = (escalation.action_type, resolves) {
            let outcome = match resolution {
                Resolution::Approve => PrecedentOutcome::Executed,
                Resolution::Reject => PrecedentOutcome::Cancelled,
            };
            let (_, precedent) = self.precedents.stage(
                project_id,
                action_type,
                outcome,
                Some(format!("escalation {id}: {chosen}")),
            )?;
            ops.push(precedent);
        }
        self.repo.transact(ops).await?;

        info!(escalation_id = %id, project = %project_id, option = %chosen, "escalation decided");
        self.events.publish(GovernanceEvent::EscalationDecided {
            escalation_id: id,
            option: chosen,
        });
        Ok(escalation)
    }

    /// Expire every pending escalation whose deadline has passed. Returns how many
    /// were transitioned by this call.
    pub async fn expire_due(&self) -> Result<usize> {
        let now = self.clock.now();
        let mut expired = 0;
        for entry in self.pending_entries(None).await? {
            let Some((_, escalation)) = self.try_load(&entry.project_id, entry.escalation_id).await?
            else {
                warn!(escalation_id = %entry.escalation_id, "pending index points at a missing escalation");
                continue;
            };
            if !escalation.is_expired(now) {
                continue;
            }
            match self.mark_expired(escalation).await {
                Ok(_) => expired += 1,
                Err(e @ KeelError::ConcurrentModification { .. }) => {
                    debug!(escalation_id = %entry.escalation_id, error = %e, "escalation resolved elsewhere, skipping");
                }
                Err(e) => return Err(e),
            }
        }
        if expired > 0 {
            info!(expired, "escalations expired");
        }
        Ok(expired)
    }

    async fn mark_expired(&self, mut escalation: Escalation) -> Result<Escalation> {
        let now = self.clock.now();
        escalation.status = EscalationStatus::Expired;
        escalation.resolved_at = Some(now);
        self.repo
            .transact(vec![
                WriteOp::Put {
                    item: encode(
                        keys::escalation(&escalation.project_id, escalation.id),
                        &escalation,
                    )?,
                    condition: Condition::field_equals("status", EscalationStatus::Pending.as_str()),
                },
                WriteOp::Delete {
                    key: keys::escalation_pending(escalation.id),
                    condition: Condition::Always,
                },
                counter_delta(-1),
            ])
            .await?;
        self.events.publish(GovernanceEvent::EscalationExpired {
            escalation_id: escalation.id,
        });
        Ok(escalation)
    }

    /// Pending escalations across all projects, newest first. `limit` defaults to the
    /// configured page size and is capped at the maximum page size.
    pub async fn list_pending(&self, limit: Option<usize>) -> Result<Vec<Escalation>> {
        let page = limit
            .unwrap_or(self.config.page_size)
            .clamp(1, self.config.max_page_size.max(1));
        let mut pending = Vec::new();
        for entry in self.pending_entries(Some(page)).await? {
            if let Some((_, escalation)) = self.try_load(&entry.project_id, entry.escalation_id).await? {
                if escalation.status == EscalationStatus::Pending {
                    pending.push(escalation);
                }
            }
        }
        Ok(pending)
    }

    async fn pending_entries(&self, limit: Option<usize>) -> Result<Vec<IndexEntry>> {
        let mut query = Query::prefix(keys::AGENT_PK, keys::ESCALATION_PENDING_PREFIX).descending();
        if let Some(limit) = limit {
            query = query.limit(limit);
        }
        self.repo.query(query).await?.iter().map(decode).collect()
    }

    /// Escalations of one project, newest first, optionally filtered by status.
    pub async fn list_for_project(
        &self,
        project_id: &ProjectId,
        status: Option<EscalationStatus>,
    ) -> Result<Vec<Escalation>> {
        let items = self
            .repo
            .query(Query::prefix(keys::project_pk(project_id), keys::ESCALATION_PREFIX).descending())
            .await?;
        let mut escalations = Vec::with_capacity(items.len());
        for item in &items {
            let escalation: Escalation = decode(item)?;
            if status.is_none_or(|s| s == escalation.status) {
                escalations.push(escalation);
            }
        }
        Ok(escalations)
    }

    /// Escalations decided in the last `days` days, most recent decision first.
    pub async fn list_decided_within(&self, days: u32) -> Result<Vec<Escalation>> {
        let cutoff = self.clock.now() - Duration::days(i64::from(days));
        let items = self
            .repo
            .query(Query::prefix(keys::AGENT_PK, keys::ESCALATION_DECIDED_PREFIX).descending())
            .await?;
        let mut decided = Vec::new();
        for item in &items {
            let entry: IndexEntry = decode(item)?;
            if entry.at < cutoff {
                break;
            }
            if let Some((_, escalation)) = self.try_load(&entry.project_id, entry.escalation_id).await? {
                decided.push(escalation);
            }
        }
        Ok(decided)
    }

    /// Number of pending escalations, read from a single counter item.
    pub async fn pending_count(&self) -> Result<u64> {
        match self.repo.get(&keys::escalation_pending_counter()).await? {
            Some(item) => {
                let counter: Counter = decode(&item)?;
                Ok(counter.count.max(0) as u64)
            }
            None => Ok(0),
        }
    }

    /// Create the counter item if it does not exist yet. Losing that race is fine.
    async fn ensure_counter(&self) -> Result<()> {
        let key = keys::escalation_pending_counter();
        if self.repo.get(&key).await?.is_some() {
            return Ok(());
        }
        match self
            .repo
            .put(encode(key, &Counter::default())?, Condition::NotExists)
            .await
        {
            Ok(_) | Err(KeelError::ConcurrentModification { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

fn counter_delta(delta: i64) -> WriteOp {
    WriteOp::Update {
        key: keys::escalation_pending_counter(),
        condition: Condition::Exists,
        update: UpdateExpr::new().add("count", delta as f64),
    }
}
