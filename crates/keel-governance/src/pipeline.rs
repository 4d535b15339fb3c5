//! The routing decision: score, classify, then execute, hold, escalate or reject.
//! A refusal is a normal outcome, never an error.

use chrono::{DateTime, Utc};
use keel_core::{
    ActionPayload, ActionType, Boundary, Clock, EventBus, GovernanceEvent, KeelError, ProjectId,
    Result, SanitizedSignal, new_id,
};
use keel_store::{Condition, Repository, decode, encode, keys};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::boundary::BoundaryClassifier;
use crate::confidence::{ConfidenceScore, ConfidenceScorer};
use crate::escalation::{
    Escalation, EscalationContext, EscalationDraft, EscalationOption, EscalationQueue,
    EscalationTrigger,
};
use crate::hold::{HeldAction, HoldQueue};
use crate::precedent::{Precedent, PrecedentLog, PrecedentOutcome};

/// How many recent precedents of the action type feed the score.
const PRECEDENT_LOOKBACK: usize = 20;

/// An action proposed by the generation step, with the evidence behind it.
#[derive(Debug, Clone)]
pub struct ProposedAction {
    pub project_id: ProjectId,
    pub payload: ActionPayload,
    /// Sanitized signals the proposal is based on.
    pub signals: Vec<SanitizedSignal>,
    /// Whether the generated output conformed to its expected shape.
    pub schema_valid: bool,
    pub title: Option<String>,
    pub concern: Option<String>,
    pub options: Vec<EscalationOption>,
    pub recommended_option: Option<String>,
    pub rationale: Option<String>,
}

impl ProposedAction {
    pub fn new(
        project_id: ProjectId,
        payload: ActionPayload,
        signals: Vec<SanitizedSignal>,
        schema_valid: bool,
    ) -> Self {
        Self {
            project_id,
            payload,
            signals,
            schema_valid,
            title: None,
            concern: None,
            options: Vec::new(),
            recommended_option: None,
            rationale: None,
        }
    }

    pub fn action_type(&self) -> ActionType {
        self.payload.action_type()
    }
}

#[derive(Debug, Clone)]
pub enum Routing {
    /// Authorized for immediate, unsupervised execution.
    Execute,
    Held(HeldAction),
    Escalated(Escalation),
    Rejected { reason: String },
}

impl Routing {
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::Execute => "execute",
            Self::Held(_) => "held",
            Self::Escalated(_) => "escalated",
            Self::Rejected { .. } => "rejected",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Decision {
    pub id: Uuid,
    pub boundary: Boundary,
    pub score: ConfidenceScore,
    pub routing: Routing,
}

/// Audit record persisted for every decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub id: Uuid,
    pub project_id: ProjectId,
    pub action_type: ActionType,
    pub boundary: Boundary,
    pub outcome: String,
    pub confidence: ConfidenceScore,
    #[serde(default)]
    pub hold_id: Option<Uuid>,
    #[serde(default)]
    pub escalation_id: Option<Uuid>,
    #[serde(default)]
    pub reason: Option<String>,
    pub decided_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct GovernancePipeline {
    repo: Arc<dyn Repository>,
    clock: Arc<dyn Clock>,
    classifier: BoundaryClassifier,
    scorer: ConfidenceScorer,
    holds: HoldQueue,
    escalations: EscalationQueue,
    precedents: PrecedentLog,
    events: EventBus,
}

impl GovernancePipeline {
    pub fn new(
        repo: Arc<dyn Repository>,
        clock: Arc<dyn Clock>,
        holds: HoldQueue,
        escalations: EscalationQueue,
        precedents: PrecedentLog,
        events: EventBus,
    ) -> Self {
        Self {
            scorer: ConfidenceScorer::new(Arc::clone(&clock)),
            classifier: BoundaryClassifier,
            repo,
            clock,
            holds,
            escalations,
            precedents,
            events,
        }
    }

    /// Score and classify a proposal, then route it. Only a malformed payload or a
    /// storage failure is an error.
    pub async fn evaluate(&self, proposal: ProposedAction) -> Result<Decision> {
        proposal.payload.validate()?;
        let project_id = proposal.project_id.clone();
        let action_type = proposal.action_type();
        let boundary = self.classifier.classify(action_type);

        let precedents = self
            .precedents
            .recent(&project_id, action_type, PRECEDENT_LOOKBACK)
            .await?;
        let score = self.scorer.score(
            action_type.as_str(),
            &proposal.signals,
            &precedents,
            proposal.schema_valid,
        );

        let routing = match boundary {
            Boundary::Forbidden => Routing::Rejected {
                reason: format!("{action_type} is forbidden"),
            },
            Boundary::HoldQueue => {
                Routing::Held(self.holds.hold(&project_id, proposal.payload).await?)
            }
            Boundary::AutoExecute if score.pass => {
                self.precedents
                    .record(
                        &project_id,
                        action_type,
                        PrecedentOutcome::Executed,
                        Some("auto-executed".to_string()),
                    )
                    .await?;
                Routing::Execute
            }
            Boundary::AutoExecute | Boundary::RequiresApproval => {
                let blocking_reasons = score.blocking_reasons();
                let trigger = if boundary == Boundary::RequiresApproval {
                    EscalationTrigger::ApprovalRequired { blocking_reasons }
                } else {
                    EscalationTrigger::ConfidenceFailed { blocking_reasons }
                };
                let draft = escalation_draft(proposal, precedent_notes(&precedents), trigger);
                Routing::Escalated(self.escalations.create(draft).await?)
            }
        };

        let decision = Decision {
            id: new_id(self.clock.now()),
            boundary,
            score,
            routing,
        };
        self.audit(&project_id, action_type, &decision).await?;
        Ok(decision)
    }

    async fn audit(
        &self,
        project_id: &ProjectId,
        action_type: ActionType,
        decision: &Decision,
    ) -> Result<()> {
        let (hold_id, escalation_id, reason) = match &decision.routing {
            Routing::Execute => (None, None, None),
            Routing::Held(held) => (Some(held.id), None, None),
            Routing::Escalated(escalation) => (None, Some(escalation.id), None),
            Routing::Rejected { reason } => (None, None, Some(reason.clone())),
        };
        let record = DecisionRecord {
            id: decision.id,
            project_id: project_id.clone(),
            action_type,
            boundary: decision.boundary,
            outcome: decision.routing.outcome().to_string(),
            confidence: decision.score.clone(),
            hold_id,
            escalation_id,
            reason,
            decided_at: self.clock.now(),
        };
        self.repo
            .put(
                encode(keys::decision(project_id, decision.id), &record)?,
                Condition::NotExists,
            )
            .await?;

        info!(
            decision_id = %decision.id,
            project = %project_id,
            %action_type,
            boundary = %decision.boundary,
            outcome = %record.outcome,
            confidence_pass = decision.score.pass,
            "action routed"
        );
        self.events.publish(GovernanceEvent::ActionRouted {
            decision_id: decision.id,
            project_id: project_id.clone(),
            action_type,
            boundary: decision.boundary,
            outcome: record.outcome,
            confidence_pass: decision.score.pass,
        });
        Ok(())
    }

    /// Load the audit record of a past decision.
    pub async fn decision_record(&self, project_id: &ProjectId, id: Uuid) -> Result<DecisionRecord> {
        let key = keys::decision(project_id, id);
        match self.repo.get(&key).await? {
            Some(item) => decode(&item),
            None => Err(KeelError::not_found("decision", key.to_string())),
        }
    }
}

fn precedent_notes(precedents: &[Precedent]) -> Vec<String> {
    precedents
        .iter()
        .map(|p| {
            format!(
                "{} {} at {}",
                p.action_type,
                p.outcome.as_str(),
                p.recorded_at.format("%Y-%m-%d %H:%M")
            )
        })
        .collect()
}

fn escalation_draft(
    proposal: ProposedAction,
    precedent_notes: Vec<String>,
    trigger: EscalationTrigger,
) -> EscalationDraft {
    let action_type = proposal.action_type();
    let title = proposal.title.unwrap_or_else(|| match &trigger {
        EscalationTrigger::ApprovalRequired { .. } => format!("Approval needed: {action_type}"),
        EscalationTrigger::ConfidenceFailed { .. } => format!("Low confidence: {action_type}"),
    });
    let options = if proposal.options.is_empty() {
        EscalationOption::defaults()
    } else {
        proposal.options
    };
    let context = EscalationContext {
        signals: proposal
            .signals
            .iter()
            .map(|s| format!("[{}] {}", s.source, s.cleaned_summary))
            .collect(),
        excerpts: Vec::new(),
        precedent_notes,
    };
    EscalationDraft {
        project_id: proposal.project_id,
        title,
        concern: proposal.concern,
        action_type: Some(action_type),
        payload: Some(proposal.payload),
        context,
        options,
        recommended_option: proposal.recommended_option,
        rationale: proposal.rationale,
        trigger,
    }
}
