use console::style;
use keel_config::{ConfigLoader, KeelConfig};
use keel_governance::{Governance, SweepReport};
use keel_store::Repository;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::{governance, repository};

/// The repository and services a watching sweeper keeps between passes.
struct SweepSession {
    config: KeelConfig,
    config_path: PathBuf,
    repo: Arc<dyn Repository>,
    gov: Governance,
}

impl SweepSession {
    fn open(config: KeelConfig, config_path: &Path) -> keel_core::Result<Self> {
        let repo = repository(&config, config_path)?;
        let gov = governance(Arc::clone(&repo), &config);
        Ok(Self {
            config,
            config_path: config_path.to_path_buf(),
            repo,
            gov,
        })
    }

    /// Rebuild the services if `latest` differs from the config in use. The
    /// repository is reopened only when the storage section changed. Returns
    /// whether anything was rebuilt.
    fn refresh(&mut self, latest: KeelConfig) -> keel_core::Result<bool> {
        if latest == self.config {
            return Ok(false);
        }
        if latest.storage != self.config.storage {
            self.repo = repository(&latest, &self.config_path)?;
            info!(backend = ?latest.storage.backend, "sweeper reopened storage");
        }
        self.gov = governance(Arc::clone(&self.repo), &latest);
        self.config = latest;
        info!("sweeper picked up new configuration");
        Ok(true)
    }

    async fn run(&self) -> keel_core::Result<SweepReport> {
        self.gov.sweeper.run_once().await
    }
}

/// Run the sweeper once, or on a fixed interval until interrupted. In watch mode
/// the config file is watched and a changed config takes effect on the next pass.
pub(super) async fn cmd_sweep(loader: &ConfigLoader, watch: Option<u64>) -> keel_core::Result<()> {
    let mut session = SweepSession::open(loader.get(), loader.path())?;

    let Some(seconds) = watch else {
        let report = session.run().await?;
        println!(
            "{} {} hold(s) executed, {} escalation(s) expired",
            style("swept").green().bold(),
            report.holds_executed,
            report.escalations_expired
        );
        return Ok(());
    };

    let _watcher = match loader.watch() {
        Ok(w) => Some(w),
        Err(e) => {
            warn!(error = %e, "config hot-reload unavailable");
            None
        }
    };

    let mut interval = tokio::time::interval(Duration::from_secs(seconds.max(1)));
    info!(interval_secs = seconds.max(1), "sweeper started");
    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = session.refresh(loader.get()) {
                    warn!(error = %e, "could not apply new configuration, keeping the previous one");
                }
                match session.run().await {
                    Ok(report) if report.holds_executed + report.escalations_expired > 0 => {
                        println!(
                            "{} {} hold(s) executed, {} escalation(s) expired",
                            style(report.swept_at.format("%H:%M:%S")).dim(),
                            report.holds_executed,
                            report.escalations_expired
                        );
                    }
                    Ok(_) => {}
                    Err(e) if e.is_retryable() => warn!(error = %e, "sweep lost a race, will retry"),
                    Err(e) => return Err(e),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("sweeper stopped");
                return Ok(());
            }
        }
    }
}
