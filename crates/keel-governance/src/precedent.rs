use chrono::{DateTime, Utc};
use keel_core::{ActionType, Clock, ProjectId, Result, new_id};
use keel_store::{Condition, Query, Repository, WriteOp, decode, encode, keys};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrecedentOutcome {
    Executed,
    Cancelled,
}

impl PrecedentOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Executed => "executed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// A past action of some type and how it ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Precedent {
    pub id: Uuid,
    pub project_id: ProjectId,
    pub action_type: ActionType,
    pub outcome: PrecedentOutcome,
    pub recorded_at: DateTime<Utc>,
    #[serde(default)]
    pub note: Option<String>,
}

impl Precedent {
    pub fn is_executed(&self) -> bool {
        self.outcome == PrecedentOutcome::Executed
    }
}

/// Append-only history of action outcomes, per project and action type.
#[derive(Clone)]
pub struct PrecedentLog {
    repo: Arc<dyn Repository>,
    clock: Arc<dyn Clock>,
}

impl PrecedentLog {
    pub fn new(repo: Arc<dyn Repository>, clock: Arc<dyn Clock>) -> Self {
        Self { repo, clock }
    }

    pub async fn record(
        &self,
        project_id: &ProjectId,
        action_type: ActionType,
        outcome: PrecedentOutcome,
        note: Option<String>,
    ) -> Result<Precedent> {
        let (precedent, op) = self.stage(project_id, action_type, outcome, note)?;
        self.repo.transact(vec![op]).await?;
        debug!(project = %project_id, %action_type, ?outcome, "precedent recorded");
        Ok(precedent)
    }

    /// Build the write for a precedent without applying it, so it can commit in the
    /// same transaction as the transition that produced it.
    pub(crate) fn stage(
        &self,
        project_id: &ProjectId,
        action_type: ActionType,
        outcome: PrecedentOutcome,
        note: Option<String>,
    ) -> Result<(Precedent, WriteOp)> {
        let now = self.clock.now();
        let precedent = Precedent {
            id: new_id(now),
            project_id: project_id.clone(),
            action_type,
            outcome,
            recorded_at: now,
            note,
        };
        let key = keys::precedent(project_id, action_type, now, precedent.id);
        let op = WriteOp::Put {
            item: encode(key, &precedent)?,
            condition: Condition::NotExists,
        };
        Ok((precedent, op))
    }

    /// Most recent precedents of one action type in a project, newest first.
    pub async fn recent(
        &self,
        project_id: &ProjectId,
        action_type: ActionType,
        limit: usize,
    ) -> Result<Vec<Precedent>> {
        let query = Query::prefix(
            keys::project_pk(project_id),
            keys::precedent_prefix(action_type),
        )
        .descending()
        .limit(limit);
        self.repo.query(query).await?.iter().map(decode).collect()
    }
}
