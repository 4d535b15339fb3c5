use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Which hard stop a rejected spend would have crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetLimit {
    DailyHardCeiling,
    MonthlyCeiling,
}

impl fmt::Display for BudgetLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DailyHardCeiling => write!(f, "would exceed daily hard ceiling"),
            Self::MonthlyCeiling => write!(f, "would exceed monthly limit"),
        }
    }
}

/// Unified error type for the Keel governance core.
#[derive(Error, Debug)]
pub enum KeelError {
    // ── Input errors ───────────────────────────────────────────
    #[error("validation failed: {field}: {reason}")]
    ValidationFailure { field: String, reason: String },

    // ── Budget errors ──────────────────────────────────────────
    #[error("budget exceeded: {limit}: projected ${attempted_usd:.4}, limit ${limit_usd:.4}")]
    BudgetExceeded {
        limit: BudgetLimit,
        attempted_usd: f64,
        limit_usd: f64,
    },

    // ── State errors ───────────────────────────────────────────
    #[error("concurrent modification on {key}: {reason}")]
    ConcurrentModification { key: String, reason: String },

    #[error("{entity} not found: {key}")]
    NotFound { entity: String, key: String },

    #[error("invalid {entity} transition: {from} -> {to}")]
    InvalidTransition {
        entity: String,
        from: String,
        to: String,
    },

    // ── Collaborator errors ────────────────────────────────────
    #[error("storage error: {0}")]
    Storage(String),

    #[error("config error: {0}")]
    Config(String),

    // ── Generic wrappers ───────────────────────────────────────
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl KeelError {
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ValidationFailure {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn not_found(entity: impl Into<String>, key: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
            key: key.into(),
        }
    }

    pub fn conflict(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConcurrentModification {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Only a lost optimistic-lock race is safe to retry; a rejected spend is final.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrentModification { .. })
    }
}

pub type Result<T> = std::result::Result<T, KeelError>;
