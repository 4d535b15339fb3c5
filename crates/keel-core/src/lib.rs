//! # keel-core
//!
//! Core types, traits, and primitives for the Keel decision-safety core.
//! This crate defines the shared vocabulary used by every other crate in the workspace:
//! signals, action types and payloads, the policy boundary, the clock, and the error type.

pub mod action;
pub mod clock;
pub mod error;
pub mod event;
pub mod types;

pub use action::{ActionPayload, ActionType, Boundary};
pub use clock::{Clock, ManualClock, SystemClock, new_id};
pub use error::{BudgetLimit, KeelError, Result};
pub use event::{EventBus, GovernanceEvent};
pub use types::*;
