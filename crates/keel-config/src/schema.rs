use keel_core::ActionType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Root configuration, mapped from `keel.toml`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KeelConfig {
    pub budget: BudgetConfig,
    pub holds: HoldConfig,
    pub escalations: EscalationConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

// ── Budget ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// Soft daily ceiling in USD. Reaching it puts the ledger in tier 3 but does not block.
    pub daily_ceiling_usd: f64,
    /// Hard daily ceiling in USD. A spend that would cross it is rejected outright.
    pub daily_hard_ceiling_usd: f64,
    /// Monthly ceiling in USD. Hard stop.
    pub monthly_ceiling_usd: f64,
    /// Daily spend at which degradation tier 1 starts.
    pub tier1_at_usd: f64,
    /// Daily spend at which degradation tier 2 starts.
    pub tier2_at_usd: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            daily_ceiling_usd: 0.23,
            daily_hard_ceiling_usd: 0.25,
            monthly_ceiling_usd: 5.00,
            tier1_at_usd: 0.15,
            tier2_at_usd: 0.20,
        }
    }
}

// ── Hold queue ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HoldConfig {
    /// Cooling-off window for action types without an override.
    pub default_window_minutes: u32,
    /// Per-action-type base windows, e.g. `email_stakeholder = 60`.
    pub window_minutes: BTreeMap<ActionType, u32>,
    /// Consecutive approvals needed to reach trust tiers 1, 2 and 3.
    pub graduation_thresholds: [u32; 3],
    /// Multiplier applied to the base window at trust tiers 0..=3.
    pub tier_window_factors: [f64; 4],
    /// Graduation never shortens a window below this.
    pub min_window_minutes: u32,
}

impl Default for HoldConfig {
    fn default() -> Self {
        let mut window_minutes = BTreeMap::new();
        window_minutes.insert(ActionType::EmailStakeholder, 60);
        Self {
            default_window_minutes: 30,
            window_minutes,
            graduation_thresholds: [3, 7, 15],
            tier_window_factors: [1.0, 0.5, 0.25, 0.1],
            min_window_minutes: 1,
        }
    }
}

impl HoldConfig {
    pub fn base_window_minutes(&self, action_type: ActionType) -> u32 {
        self.window_minutes
            .get(&action_type)
            .copied()
            .unwrap_or(self.default_window_minutes)
    }
}

// ── Escalations ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationConfig {
    /// How long an escalation waits for a human before it expires.
    pub ttl_hours: u32,
    /// Default page size for pending listings.
    pub page_size: usize,
    /// Upper bound on any requested page size.
    pub max_page_size: usize,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            ttl_hours: 72,
            page_size: 50,
            max_page_size: 200,
        }
    }
}

// ── Storage ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Path to the SQLite database (ignored by the memory backend).
    pub db_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Sqlite,
            db_path: PathBuf::from("keel.db"),
        }
    }
}

// ── Logging ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Output format: "pretty", "json", "compact".
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

// ── Validation ─────────────────────────────────────────────────

/// A single config validation issue.
#[derive(Debug)]
pub struct ConfigWarning {
    pub field: String,
    pub message: String,
    pub severity: WarningSeverity,
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningSeverity {
    Error,
    Warning,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self.severity {
            WarningSeverity::Error => "error",
            WarningSeverity::Warning => "warning",
        };
        write!(f, "{}: {}: {}", label, self.field, self.message)?;
        if let Some(ref h) = self.hint {
            write!(f, " ({})", h)?;
        }
        Ok(())
    }
}

impl KeelConfig {
    /// Validate the config and return a list of warnings.
    /// Returns `Err` with all messages joined if any severity is Error.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, String> {
        let mut warnings = Vec::new();
        let b = &self.budget;

        // ── Budget ───
        let amounts = [
            ("budget.daily_ceiling_usd", b.daily_ceiling_usd),
            ("budget.daily_hard_ceiling_usd", b.daily_hard_ceiling_usd),
            ("budget.monthly_ceiling_usd", b.monthly_ceiling_usd),
            ("budget.tier1_at_usd", b.tier1_at_usd),
            ("budget.tier2_at_usd", b.tier2_at_usd),
        ];
        for (field, value) in amounts {
            if !value.is_finite() || value < 0.0 {
                warnings.push(ConfigWarning {
                    field: field.into(),
                    message: format!("{value} is not a valid amount"),
                    severity: WarningSeverity::Error,
                    hint: Some("Amounts are non-negative USD values".into()),
                });
            }
        }
        if !(b.tier1_at_usd < b.tier2_at_usd && b.tier2_at_usd < b.daily_ceiling_usd) {
            warnings.push(ConfigWarning {
                field: "budget.tier1_at_usd".into(),
                message: format!(
                    "tier thresholds {} / {} must increase strictly below the daily ceiling {}",
                    b.tier1_at_usd, b.tier2_at_usd, b.daily_ceiling_usd
                ),
                severity: WarningSeverity::Error,
                hint: Some("e.g. tier1 = 0.15, tier2 = 0.20, daily = 0.23".into()),
            });
        }
        if b.daily_hard_ceiling_usd < b.daily_ceiling_usd {
            warnings.push(ConfigWarning {
                field: "budget.daily_hard_ceiling_usd".into(),
                message: "hard ceiling is below the soft daily ceiling".into(),
                severity: WarningSeverity::Error,
                hint: Some("The hard ceiling sits slightly above the daily ceiling".into()),
            });
        }
        if b.monthly_ceiling_usd < b.daily_hard_ceiling_usd {
            warnings.push(ConfigWarning {
                field: "budget.monthly_ceiling_usd".into(),
                message: "monthly ceiling is below a single day's hard ceiling".into(),
                severity: WarningSeverity::Warning,
                hint: None,
            });
        }

        // ── Holds ───
        let t = self.holds.graduation_thresholds;
        if !(t[0] > 0 && t[0] < t[1] && t[1] < t[2]) {
            warnings.push(ConfigWarning {
                field: "holds.graduation_thresholds".into(),
                message: format!("{t:?} must be positive and strictly increasing"),
                severity: WarningSeverity::Error,
                hint: Some("e.g. [3, 7, 15]".into()),
            });
        }
        if self
            .holds
            .tier_window_factors
            .iter()
            .any(|f| !f.is_finite() || *f <= 0.0 || *f > 1.0)
        {
            warnings.push(ConfigWarning {
                field: "holds.tier_window_factors".into(),
                message: "factors must lie in (0, 1]".into(),
                severity: WarningSeverity::Error,
                hint: Some("e.g. [1.0, 0.5, 0.25, 0.1]".into()),
            });
        }
        if self.holds.default_window_minutes == 0 {
            warnings.push(ConfigWarning {
                field: "holds.default_window_minutes".into(),
                message: "a zero window executes held actions immediately".into(),
                severity: WarningSeverity::Warning,
                hint: None,
            });
        }

        // ── Escalations ───
        if self.escalations.ttl_hours == 0 {
            warnings.push(ConfigWarning {
                field: "escalations.ttl_hours".into(),
                message: "escalations would expire as soon as they are created".into(),
                severity: WarningSeverity::Error,
                hint: Some("e.g. 72".into()),
            });
        }
        if self.escalations.page_size == 0
            || self.escalations.page_size > self.escalations.max_page_size
        {
            warnings.push(ConfigWarning {
                field: "escalations.page_size".into(),
                message: format!(
                    "page size {} must be between 1 and max_page_size {}",
                    self.escalations.page_size, self.escalations.max_page_size
                ),
                severity: WarningSeverity::Error,
                hint: None,
            });
        }

        // ── Logging ───
        let valid_formats = ["pretty", "json", "compact"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.format".into(),
                message: format!("unknown log format '{}'", self.logging.format),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Valid values: {}", valid_formats.join(", "))),
            });
        }
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.level".into(),
                message: format!("unknown log level '{}'", self.logging.level),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Valid values: {}", valid_levels.join(", "))),
            });
        }

        let errors: Vec<String> = warnings
            .iter()
            .filter(|w| w.severity == WarningSeverity::Error)
            .map(|w| w.to_string())
            .collect();
        if errors.is_empty() {
            Ok(warnings)
        } else {
            Err(errors.join("\n"))
        }
    }
}
