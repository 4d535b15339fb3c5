//! # keel-governance
//!
//! The decision-safety core. Untrusted signal text is sanitized, every proposed
//! action is scored and classified against the policy table, and the result is
//! routed to immediate execution, the hold queue, an escalation, or rejection.
//! Spend is governed separately by the budget ledger.
//!
//! All persisted state goes through the [`keel_store::Repository`] contract and all
//! time comes from the injected [`keel_core::Clock`].

pub mod boundary;
pub mod budget;
pub mod confidence;
pub mod escalation;
pub mod graduation;
pub mod hold;
pub mod pipeline;
pub mod precedent;
pub mod sanitizer;
pub mod services;
pub mod sweeper;
pub mod threats;

pub use boundary::BoundaryClassifier;
pub use budget::{BudgetGovernor, BudgetLedger, CallPermit, DegradationTier, GenerationPriority};
pub use confidence::{ConfidenceScore, ConfidenceScorer, Dimension, DimensionScore};
pub use escalation::{
    Escalation, EscalationContext, EscalationDraft, EscalationOption, EscalationQueue,
    EscalationStatus, EscalationTrigger, Resolution, RiskLevel,
};
pub use graduation::{GraduationRecord, GraduationTracker};
pub use hold::{HeldAction, HoldQueue, HoldStatus};
pub use pipeline::{Decision, DecisionRecord, GovernancePipeline, ProposedAction, Routing};
pub use precedent::{Precedent, PrecedentLog, PrecedentOutcome};
pub use sanitizer::{BatchReport, Sanitized, Sanitizer, ThreatReport, sanitize_text};
pub use services::Governance;
pub use sweeper::{SweepReport, Sweeper};
pub use threats::ThreatCategory;
