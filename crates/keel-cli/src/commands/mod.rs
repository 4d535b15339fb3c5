use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use keel_config::{ConfigLoader, KeelConfig, StorageBackend};
use keel_core::{KeelError, ProjectId, SystemClock};
use keel_governance::Governance;
use keel_store::{MemoryRepository, Repository, SqliteRepository};
use uuid::Uuid;

mod budget;
mod inspect;
mod queues;
mod sweep;

/// Keel: decision-safety core for an autonomous project-management agent
#[derive(Parser)]
#[command(name = "keel", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to keel.toml config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level override (e.g. debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress all log output (errors only)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Expire overdue escalations and execute held actions whose window has passed
    Sweep {
        /// Keep sweeping every N seconds instead of running once
        #[arg(short, long, value_name = "SECONDS")]
        watch: Option<u64>,
    },
    /// Inspect or charge the spend ledger
    Budget {
        #[command(subcommand)]
        action: BudgetAction,
    },
    /// Sanitize text (argument or stdin) and report detected threats
    Sanitize {
        /// Text to sanitize; read from stdin when omitted
        text: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Manage held actions
    Holds {
        #[command(subcommand)]
        action: HoldAction,
    },
    /// Manage escalations
    Escalations {
        #[command(subcommand)]
        action: EscalationAction,
    },
    /// Print the action boundary table
    Policy,
    /// Show or validate configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum BudgetAction {
    /// Show today's and this month's spend
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Record a charge against the ledger
    Spend {
        /// Amount in USD
        amount: f64,
        /// Attempts before giving up on a contended ledger
        #[arg(long, default_value = "3")]
        attempts: u32,
    },
}

#[derive(Subcommand)]
enum HoldAction {
    /// List held actions of a project
    List {
        project: String,
        /// Filter by status: pending, executed, cancelled
        #[arg(short, long)]
        status: Option<String>,
    },
    /// Approve a held action so it executes now
    Approve {
        project: String,
        id: String,
        /// Who made the decision
        #[arg(long, default_value = "cli")]
        by: String,
    },
    /// Cancel a held action
    Cancel {
        project: String,
        id: String,
        #[arg(long, default_value = "cli")]
        by: String,
        #[arg(short, long)]
        reason: Option<String>,
    },
}

#[derive(Subcommand)]
enum EscalationAction {
    /// List pending escalations across projects, newest first
    List {
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Number of pending escalations
    Count,
    /// Show one escalation
    Show { project: String, id: String },
    /// Record a decision on a pending escalation
    Decide {
        project: String,
        id: String,
        /// Label of the chosen option
        option: String,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Escalations decided in the last N days
    Decided {
        #[arg(short, long, default_value = "7")]
        days: u32,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Validate the configuration and list warnings
    Validate,
}

impl Cli {
    pub async fn run(self) -> keel_core::Result<()> {
        // Load config first so we can use it for log format
        let config_loader = ConfigLoader::load(self.config.as_deref())?;
        let config = config_loader.get();

        // Resolve log level: --verbose > --quiet > --log-level > config
        let log_level = if self.verbose {
            "debug"
        } else if self.quiet {
            "error"
        } else {
            self.log_level
                .as_deref()
                .unwrap_or(config.logging.level.as_str())
        };
        init_tracing(&config.logging.format, log_level);

        match self.command {
            Commands::Sweep { watch } => sweep::cmd_sweep(&config_loader, watch).await,
            Commands::Budget { action } => {
                budget::cmd_budget(&open(&config, config_loader.path())?, action).await
            }
            Commands::Sanitize { text, json } => inspect::cmd_sanitize(text, json),
            Commands::Holds { action } => {
                queues::cmd_holds(&open(&config, config_loader.path())?, action).await
            }
            Commands::Escalations { action } => {
                queues::cmd_escalations(&open(&config, config_loader.path())?, action).await
            }
            Commands::Policy => inspect::cmd_policy(),
            Commands::Config { action } => inspect::cmd_config(&config, action),
        }
    }
}

fn init_tracing(format: &str, level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    match format {
        "json" => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_target(true)
            .init(),
        "compact" => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .compact()
            .with_target(false)
            .init(),
        _ => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init(),
    }
}

/// Build the repository named by the storage config. A relative database path is
/// resolved against the config file's directory.
fn repository(config: &KeelConfig, config_path: &Path) -> keel_core::Result<Arc<dyn Repository>> {
    match config.storage.backend {
        StorageBackend::Memory => Ok(Arc::new(MemoryRepository::new())),
        StorageBackend::Sqlite => {
            let db_path = if config.storage.db_path.is_absolute() {
                config.storage.db_path.clone()
            } else {
                config_path
                    .parent()
                    .unwrap_or(Path::new("."))
                    .join(&config.storage.db_path)
            };
            if let Some(dir) = db_path.parent().filter(|d| !d.as_os_str().is_empty()) {
                std::fs::create_dir_all(dir)?;
            }
            Ok(Arc::new(SqliteRepository::open(&db_path)?))
        }
    }
}

fn open(config: &KeelConfig, config_path: &Path) -> keel_core::Result<Governance> {
    Ok(governance(repository(config, config_path)?, config))
}

fn governance(repo: Arc<dyn Repository>, config: &KeelConfig) -> Governance {
    Governance::new(repo, Arc::new(SystemClock), config)
}

fn parse_project(raw: &str) -> keel_core::Result<ProjectId> {
    ProjectId::new(raw)
}

fn parse_id(raw: &str) -> keel_core::Result<Uuid> {
    Uuid::parse_str(raw.trim())
        .map_err(|e| KeelError::validation("id", format!("'{raw}' is not a valid id: {e}")))
}

/// Truncate a string to `max` characters, appending "..." if truncated.
fn truncate_output(s: &str, max: usize) -> String {
    let flat = s.replace('\n', " ");
    if flat.chars().count() <= max {
        flat
    } else {
        format!("{}...", flat.chars().take(max).collect::<String>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_output("héllo\nworld", 20), "héllo world");
        assert_eq!(truncate_output("ééééé", 3), "ééé...");
    }

    #[test]
    fn ids_must_parse() {
        assert!(parse_id("not-a-uuid").is_err());
        let id = Uuid::nil();
        assert_eq!(parse_id(&format!(" {id} ")).unwrap(), id);
    }

    #[test]
    fn relative_db_path_resolves_next_to_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = KeelConfig::default();
        config.storage.db_path = PathBuf::from("state/keel.db");
        let config_path = dir.path().join("keel.toml");
        repository(&config, &config_path).unwrap();
        assert!(dir.path().join("state").join("keel.db").exists());
    }

    #[test]
    fn cli_parses_nested_subcommands() {
        let cli = Cli::try_parse_from(["keel", "escalations", "decide", "apollo", "id", "approve"]);
        assert!(cli.is_ok());
        let cli = Cli::try_parse_from(["keel", "-v", "-q", "policy"]);
        assert!(cli.is_err());
    }
}
