//! Graduation: consecutive human approvals of an action type earn it a higher
//! trust tier, which shortens its hold window. One cancellation starts over.

use chrono::{DateTime, Duration, Utc};
use keel_config::HoldConfig;
use keel_core::{ActionType, Clock, EventBus, GovernanceEvent, Result};
use keel_store::{Condition, Repository, WriteOp, decode, encode, keys};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

const MAX_CAS_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraduationRecord {
    pub action_type: ActionType,
    pub consecutive_approvals: u32,
    /// 0..=3.
    pub trust_tier: u8,
    pub total_approvals: u64,
    pub total_cancellations: u64,
    pub updated_at: Option<DateTime<Utc>>,
}

impl GraduationRecord {
    pub fn new(action_type: ActionType) -> Self {
        Self {
            action_type,
            consecutive_approvals: 0,
            trust_tier: 0,
            total_approvals: 0,
            total_cancellations: 0,
            updated_at: None,
        }
    }
}

/// Trust tier reached after `consecutive` approvals.
pub fn tier_for(thresholds: &[u32; 3], consecutive: u32) -> u8 {
    thresholds.iter().filter(|t| consecutive >= **t).count() as u8
}

/// Hold window for an action type at a trust tier.
pub fn window_for(config: &HoldConfig, action_type: ActionType, tier: u8) -> Duration {
    let base_secs = f64::from(config.base_window_minutes(action_type)) * 60.0;
    let factor = config
        .tier_window_factors
        .get(usize::from(tier))
        .copied()
        .unwrap_or(1.0);
    let floor = i64::from(config.min_window_minutes) * 60;
    Duration::seconds(((base_secs * factor).round() as i64).max(floor))
}

fn approval(record: &mut GraduationRecord) {
    record.consecutive_approvals += 1;
    record.total_approvals += 1;
}

fn cancellation(record: &mut GraduationRecord) {
    record.consecutive_approvals = 0;
    record.total_cancellations += 1;
}

/// A graduation update computed from fresh state, not yet written.
pub(crate) struct StagedGraduation {
    pub(crate) op: WriteOp,
    pub(crate) record: GraduationRecord,
    pub(crate) before: u8,
}

#[derive(Clone)]
pub struct GraduationTracker {
    repo: Arc<dyn Repository>,
    clock: Arc<dyn Clock>,
    config: HoldConfig,
    events: EventBus,
}

impl GraduationTracker {
    pub fn new(
        repo: Arc<dyn Repository>,
        clock: Arc<dyn Clock>,
        config: HoldConfig,
        events: EventBus,
    ) -> Self {
        Self {
            repo,
            clock,
            config,
            events,
        }
    }

    pub async fn get(&self, action_type: ActionType) -> Result<GraduationRecord> {
        Ok(self.load(action_type).await?.1)
    }

    async fn load(&self, action_type: ActionType) -> Result<(Option<u64>, GraduationRecord)> {
        match self.repo.get(&keys::graduation(action_type)).await? {
            Some(item) => Ok((Some(item.version), decode(&item)?)),
            None => Ok((None, GraduationRecord::new(action_type))),
        }
    }

    pub async fn record_approval(&self, action_type: ActionType) -> Result<GraduationRecord> {
        self.modify(action_type, approval).await
    }

    pub async fn record_cancellation(&self, action_type: ActionType) -> Result<GraduationRecord> {
        self.modify(action_type, cancellation).await
    }

    /// Stage an approval for a caller that commits it alongside its own writes.
    pub(crate) async fn stage_approval(&self, action_type: ActionType) -> Result<StagedGraduation> {
        self.stage(action_type, approval).await
    }

    pub(crate) async fn stage_cancellation(
        &self,
        action_type: ActionType,
    ) -> Result<StagedGraduation> {
        self.stage(action_type, cancellation).await
    }

    /// The cooling-off window a new hold of this type gets right now.
    pub async fn hold_window(&self, action_type: ActionType) -> Result<(u8, Duration)> {
        let record = self.get(action_type).await?;
        Ok((
            record.trust_tier,
            window_for(&self.config, action_type, record.trust_tier),
        ))
    }

    /// Read the current record and apply `change` under a version check on it.
    async fn stage(
        &self,
        action_type: ActionType,
        change: fn(&mut GraduationRecord),
    ) -> Result<StagedGraduation> {
        let (version, mut record) = self.load(action_type).await?;
        let before = record.trust_tier;
        change(&mut record);
        record.trust_tier = tier_for(&self.config.graduation_thresholds, record.consecutive_approvals);
        record.updated_at = Some(self.clock.now());

        let condition = match version {
            Some(v) => Condition::VersionIs(v),
            None => Condition::NotExists,
        };
        Ok(StagedGraduation {
            op: WriteOp::Put {
                item: encode(keys::graduation(action_type), &record)?,
                condition,
            },
            record,
            before,
        })
    }

    /// Announce a committed update.
    pub(crate) fn committed(&self, record: GraduationRecord, before: u8) -> GraduationRecord {
        if record.trust_tier != before {
            info!(action_type = %record.action_type, from = before, to = record.trust_tier, "trust tier changed");
            self.events.publish(GovernanceEvent::TrustTierChanged {
                action_type: record.action_type,
                from: before,
                to: record.trust_tier,
            });
        }
        record
    }

    /// Read-modify-write under a version check. The change is recomputed from fresh
    /// state on every attempt, so a retry never replays stale counts.
    async fn modify(
        &self,
        action_type: ActionType,
        change: fn(&mut GraduationRecord),
    ) -> Result<GraduationRecord> {
        let mut attempt = 1;
        loop {
            let StagedGraduation { op, record, before } = self.stage(action_type, change).await?;
            match self.repo.transact(vec![op]).await {
                Ok(()) => return Ok(self.committed(record, before)),
                Err(e) if e.is_retryable() && attempt < MAX_CAS_ATTEMPTS => {
                    debug!(%action_type, attempt, "graduation update lost a race, retrying");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
