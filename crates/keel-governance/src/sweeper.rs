use chrono::{DateTime, Utc};
use keel_core::{Clock, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::escalation::EscalationQueue;
use crate::hold::HoldQueue;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepReport {
    pub holds_executed: usize,
    pub escalations_expired: usize,
    pub swept_at: DateTime<Utc>,
}

/// One pass of the periodic maintenance the external scheduler drives:
/// expire overdue escalations and auto-execute holds whose window has passed.
#[derive(Clone)]
pub struct Sweeper {
    holds: HoldQueue,
    escalations: EscalationQueue,
    clock: Arc<dyn Clock>,
}

impl Sweeper {
    pub fn new(holds: HoldQueue, escalations: EscalationQueue, clock: Arc<dyn Clock>) -> Self {
        Self {
            holds,
            escalations,
            clock,
        }
    }

    pub async fn run_once(&self) -> Result<SweepReport> {
        let escalations_expired = self.escalations.expire_due().await?;
        let holds_executed = self.holds.sweep_due().await?;
        let report = SweepReport {
            holds_executed,
            escalations_expired,
            swept_at: self.clock.now(),
        };
        info!(holds_executed, escalations_expired, "sweep complete");
        Ok(report)
    }
}
