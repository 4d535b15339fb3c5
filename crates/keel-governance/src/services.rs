use keel_config::KeelConfig;
use keel_core::{Clock, EventBus};
use keel_store::Repository;
use std::sync::Arc;

use crate::budget::BudgetGovernor;
use crate::escalation::EscalationQueue;
use crate::graduation::GraduationTracker;
use crate::hold::HoldQueue;
use crate::pipeline::GovernancePipeline;
use crate::precedent::PrecedentLog;
use crate::sanitizer::Sanitizer;
use crate::sweeper::Sweeper;

/// Every governance component wired to one repository, clock and event bus.
#[derive(Clone)]
pub struct Governance {
    pub events: EventBus,
    pub sanitizer: Sanitizer,
    pub budget: BudgetGovernor,
    pub graduation: GraduationTracker,
    pub precedents: PrecedentLog,
    pub holds: HoldQueue,
    pub escalations: EscalationQueue,
    pub pipeline: GovernancePipeline,
    pub sweeper: Sweeper,
}

impl Governance {
    pub fn new(repo: Arc<dyn Repository>, clock: Arc<dyn Clock>, config: &KeelConfig) -> Self {
        Self::with_events(repo, clock, config, EventBus::default())
    }

    pub fn with_events(
        repo: Arc<dyn Repository>,
        clock: Arc<dyn Clock>,
        config: &KeelConfig,
        events: EventBus,
    ) -> Self {
        let budget = BudgetGovernor::new(
            Arc::clone(&repo),
            Arc::clone(&clock),
            config.budget.clone(),
            events.clone(),
        );
        let graduation = GraduationTracker::new(
            Arc::clone(&repo),
            Arc::clone(&clock),
            config.holds.clone(),
            events.clone(),
        );
        let precedents = PrecedentLog::new(Arc::clone(&repo), Arc::clone(&clock));
        let holds = HoldQueue::new(
            Arc::clone(&repo),
            Arc::clone(&clock),
            graduation.clone(),
            precedents.clone(),
            events.clone(),
        );
        let escalations = EscalationQueue::new(
            Arc::clone(&repo),
            Arc::clone(&clock),
            config.escalations.clone(),
            precedents.clone(),
            events.clone(),
        );
        let pipeline = GovernancePipeline::new(
            Arc::clone(&repo),
            Arc::clone(&clock),
            holds.clone(),
            escalations.clone(),
            precedents.clone(),
            events.clone(),
        );
        let sweeper = Sweeper::new(holds.clone(), escalations.clone(), clock);

        Self {
            sanitizer: Sanitizer::new(events.clone()),
            events,
            budget,
            graduation,
            precedents,
            holds,
            escalations,
            pipeline,
            sweeper,
        }
    }
}
