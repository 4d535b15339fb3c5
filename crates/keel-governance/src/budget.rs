//! The budget governor: a persisted spend ledger with calendar rollover,
//! graduated degradation, and hard ceilings enforced atomically.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use keel_config::BudgetConfig;
use keel_core::{BudgetLimit, Clock, EventBus, GovernanceEvent, KeelError, Result};
use keel_store::{Condition, Repository, decode, encode, keys};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Tolerance for accumulated floating-point error when comparing against ceilings.
pub const SPEND_EPSILON: f64 = 1e-9;

/// Throttling level derived from today's spend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum DegradationTier {
    /// Below the first threshold.
    Normal,
    /// Optional work should be skipped.
    Conserve,
    /// Only essential work should run.
    Essential,
    /// Daily ceiling reached. Still not blocking; the hard ceiling is.
    Exhausted,
}

impl DegradationTier {
    pub fn as_u8(&self) -> u8 {
        match self {
            Self::Normal => 0,
            Self::Conserve => 1,
            Self::Essential => 2,
            Self::Exhausted => 3,
        }
    }

    /// Whether work of the given priority should still be requested at this tier.
    pub fn permits(&self, priority: GenerationPriority) -> bool {
        let floor = match self {
            Self::Normal => GenerationPriority::Background,
            Self::Conserve => GenerationPriority::Routine,
            Self::Essential | Self::Exhausted => GenerationPriority::Essential,
        };
        priority >= floor
    }
}

impl From<DegradationTier> for u8 {
    fn from(tier: DegradationTier) -> u8 {
        tier.as_u8()
    }
}

impl TryFrom<u8> for DegradationTier {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Normal),
            1 => Ok(Self::Conserve),
            2 => Ok(Self::Essential),
            3 => Ok(Self::Exhausted),
            other => Err(format!("degradation tier {other} is out of range 0..=3")),
        }
    }
}

impl fmt::Display for DegradationTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

/// How much a generation request matters to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationPriority {
    Background,
    Routine,
    Essential,
}

/// The agent-wide spend ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetLedger {
    pub daily_spend_usd: f64,
    pub daily_date: NaiveDate,
    pub monthly_spend_usd: f64,
    /// `YYYY-MM`.
    pub monthly_month: String,
    pub daily_ceiling_usd: f64,
    pub daily_hard_ceiling_usd: f64,
    pub monthly_ceiling_usd: f64,
    pub degradation_tier: DegradationTier,
    pub updated_at: DateTime<Utc>,
}

impl BudgetLedger {
    fn fresh(now: DateTime<Utc>, config: &BudgetConfig) -> Self {
        Self {
            daily_spend_usd: 0.0,
            daily_date: now.date_naive(),
            monthly_spend_usd: 0.0,
            monthly_month: month_of(now),
            daily_ceiling_usd: config.daily_ceiling_usd,
            daily_hard_ceiling_usd: config.daily_hard_ceiling_usd,
            monthly_ceiling_usd: config.monthly_ceiling_usd,
            degradation_tier: DegradationTier::Normal,
            updated_at: now,
        }
    }

    /// Reset the counters whose calendar period has passed. Returns true if anything changed.
    fn roll_over(&mut self, now: DateTime<Utc>) -> bool {
        let mut changed = false;
        if self.daily_date != now.date_naive() {
            self.daily_date = now.date_naive();
            self.daily_spend_usd = 0.0;
            self.degradation_tier = DegradationTier::Normal;
            changed = true;
        }
        let month = month_of(now);
        if self.monthly_month != month {
            self.monthly_month = month;
            self.monthly_spend_usd = 0.0;
            changed = true;
        }
        changed
    }

    fn apply_ceilings(&mut self, config: &BudgetConfig) {
        self.daily_ceiling_usd = config.daily_ceiling_usd;
        self.daily_hard_ceiling_usd = config.daily_hard_ceiling_usd;
        self.monthly_ceiling_usd = config.monthly_ceiling_usd;
    }

    pub fn daily_remaining_usd(&self) -> f64 {
        (self.daily_hard_ceiling_usd - self.daily_spend_usd).max(0.0)
    }

    pub fn monthly_remaining_usd(&self) -> f64 {
        (self.monthly_ceiling_usd - self.monthly_spend_usd).max(0.0)
    }
}

fn month_of(at: DateTime<Utc>) -> String {
    format!("{:04}-{:02}", at.year(), at.month())
}

/// Answer to "may I request a generation now?".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallPermit {
    pub allowed: bool,
    pub reason: Option<String>,
}

/// Reads and charges the ledger through the repository. Every charge is one
/// compare-and-swap over the whole ledger item.
#[derive(Clone)]
pub struct BudgetGovernor {
    repo: Arc<dyn Repository>,
    clock: Arc<dyn Clock>,
    config: BudgetConfig,
    events: EventBus,
}

impl BudgetGovernor {
    pub fn new(
        repo: Arc<dyn Repository>,
        clock: Arc<dyn Clock>,
        config: BudgetConfig,
        events: EventBus,
    ) -> Self {
        Self {
            repo,
            clock,
            config,
            events,
        }
    }

    pub fn tier_for(&self, daily_spend_usd: f64) -> DegradationTier {
        let at = |threshold: f64| daily_spend_usd + SPEND_EPSILON >= threshold;
        if at(self.config.daily_ceiling_usd) {
            DegradationTier::Exhausted
        } else if at(self.config.tier2_at_usd) {
            DegradationTier::Essential
        } else if at(self.config.tier1_at_usd) {
            DegradationTier::Conserve
        } else {
            DegradationTier::Normal
        }
    }

    /// The stored ledger and its version, or a fresh ledger with no version.
    async fn load(&self, now: DateTime<Utc>) -> Result<(Option<u64>, BudgetLedger)> {
        match self.repo.get(&keys::budget_ledger()).await? {
            Some(item) => Ok((Some(item.version), decode(&item)?)),
            None => Ok((None, BudgetLedger::fresh(now, &self.config))),
        }
    }

    /// Current ledger with rollover applied. Does not write.
    pub async fn get_status(&self) -> Result<BudgetLedger> {
        let now = self.clock.now();
        let (_, mut ledger) = self.load(now).await?;
        if ledger.roll_over(now) {
            debug!(date = %ledger.daily_date, "budget ledger rolled over on read");
        }
        ledger.apply_ceilings(&self.config);
        Ok(ledger)
    }

    /// Charge `amount_usd` to the ledger.
    ///
    /// Fails with `BudgetExceeded` if the charge would cross the daily hard ceiling
    /// or the monthly ceiling, leaving the ledger untouched. Fails with
    /// `ConcurrentModification` if another writer committed first; nothing is
    /// retried here.
    pub async fn record_spend(&self, amount_usd: f64) -> Result<BudgetLedger> {
        if !amount_usd.is_finite() || amount_usd < 0.0 {
            return Err(KeelError::validation(
                "amount_usd",
                "must be a finite, non-negative amount",
            ));
        }

        let now = self.clock.now();
        let (version, mut ledger) = self.load(now).await?;
        ledger.roll_over(now);
        ledger.apply_ceilings(&self.config);
        let previous_tier = ledger.degradation_tier;

        let daily = ledger.daily_spend_usd + amount_usd;
        if daily > ledger.daily_hard_ceiling_usd + SPEND_EPSILON {
            return Err(self.reject(
                BudgetLimit::DailyHardCeiling,
                daily,
                ledger.daily_hard_ceiling_usd,
            ));
        }
        let monthly = ledger.monthly_spend_usd + amount_usd;
        if monthly > ledger.monthly_ceiling_usd + SPEND_EPSILON {
            return Err(self.reject(
                BudgetLimit::MonthlyCeiling,
                monthly,
                ledger.monthly_ceiling_usd,
            ));
        }

        ledger.daily_spend_usd = daily;
        ledger.monthly_spend_usd = monthly;
        ledger.degradation_tier = self.tier_for(daily);
        ledger.updated_at = now;

        let condition = match version {
            Some(v) => Condition::VersionIs(v),
            None => Condition::NotExists,
        };
        self.repo
            .put(encode(keys::budget_ledger(), &ledger)?, condition)
            .await?;

        debug!(amount_usd, daily_spend_usd = daily, monthly_spend_usd = monthly, "spend recorded");
        if ledger.degradation_tier != previous_tier {
            if ledger.degradation_tier > previous_tier {
                warn!(
                    from = previous_tier.as_u8(),
                    to = ledger.degradation_tier.as_u8(),
                    daily_spend_usd = daily,
                    "budget degradation tier raised"
                );
            } else {
                info!(
                    from = previous_tier.as_u8(),
                    to = ledger.degradation_tier.as_u8(),
                    "budget degradation tier lowered"
                );
            }
            self.events.publish(GovernanceEvent::BudgetTierChanged {
                from: previous_tier.as_u8(),
                to: ledger.degradation_tier.as_u8(),
                daily_spend_usd: daily,
            });
        }
        Ok(ledger)
    }

    /// [`record_spend`](Self::record_spend), re-reading the ledger after each lost
    /// race. A rejection is never retried.
    pub async fn record_spend_retrying(
        &self,
        amount_usd: f64,
        max_attempts: u32,
    ) -> Result<BudgetLedger> {
        let mut attempt = 1;
        loop {
            match self.record_spend(amount_usd).await {
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    debug!(attempt, error = %e, "ledger write lost a race, retrying");
                    attempt += 1;
                    tokio::task::yield_now().await;
                }
                other => return other,
            }
        }
    }

    pub async fn can_make_call(&self) -> Result<CallPermit> {
        let ledger = self.get_status().await?;
        let reason = if ledger.monthly_spend_usd + SPEND_EPSILON >= ledger.monthly_ceiling_usd {
            Some(format!(
                "monthly ceiling reached: ${:.4} of ${:.2}",
                ledger.monthly_spend_usd, ledger.monthly_ceiling_usd
            ))
        } else if ledger.daily_spend_usd + SPEND_EPSILON >= ledger.daily_hard_ceiling_usd {
            Some(format!(
                "daily hard ceiling reached: ${:.4} of ${:.2}",
                ledger.daily_spend_usd, ledger.daily_hard_ceiling_usd
            ))
        } else {
            None
        };
        Ok(CallPermit {
            allowed: reason.is_none(),
            reason,
        })
    }

    fn reject(&self, limit: BudgetLimit, attempted_usd: f64, limit_usd: f64) -> KeelError {
        warn!(%limit, attempted_usd, limit_usd, "spend rejected");
        self.events.publish(GovernanceEvent::BudgetRejected {
            reason: limit.to_string(),
            attempted_usd,
        });
        KeelError::BudgetExceeded {
            limit,
            attempted_usd,
            limit_usd,
        }
    }
}
