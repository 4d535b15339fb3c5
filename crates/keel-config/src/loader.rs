use keel_core::KeelError;
use notify::{Event as NotifyEvent, EventKind, RecursiveMode, Watcher};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::schema::KeelConfig;

/// Loads and optionally hot-reloads the Keel configuration.
pub struct ConfigLoader {
    config: Arc<RwLock<KeelConfig>>,
    config_path: PathBuf,
}

impl ConfigLoader {
    /// Resolve the config path: explicit path > KEEL_CONFIG env > ~/.keel/keel.toml
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var("KEEL_CONFIG") {
            return PathBuf::from(p);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".keel")
            .join("keel.toml")
    }

    /// Load the config from disk, falling back to defaults.
    pub fn load(path: Option<&Path>) -> keel_core::Result<Self> {
        let config_path = Self::resolve_path(path);
        let config = if config_path.exists() {
            info!(?config_path, "loading configuration");
            Self::read(&config_path)?
        } else {
            warn!(?config_path, "config file not found, using defaults");
            KeelConfig::default()
        };

        let config = Self::apply_env_overrides(config);

        match config.validate() {
            Ok(warnings) => {
                for w in &warnings {
                    warn!("{}", w);
                }
            }
            Err(e) => return Err(KeelError::Config(e)),
        }

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_path,
        })
    }

    /// Get a read snapshot of the current config.
    pub fn get(&self) -> KeelConfig {
        self.config.read().clone()
    }

    /// Get a shared reference for subscription.
    pub fn shared(&self) -> Arc<RwLock<KeelConfig>> {
        Arc::clone(&self.config)
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    fn read(path: &Path) -> keel_core::Result<KeelConfig> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str::<KeelConfig>(&raw).map_err(|e| {
            KeelError::Config(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    /// Apply env var overrides (KEEL_LOG_LEVEL, KEEL_DAILY_CEILING, etc.)
    fn apply_env_overrides(mut config: KeelConfig) -> KeelConfig {
        if let Ok(v) = std::env::var("KEEL_LOG_LEVEL") {
            config.logging.level = v;
        }
        if let Ok(v) = std::env::var("KEEL_DAILY_CEILING") {
            if let Ok(ceiling) = v.parse::<f64>() {
                config.budget.daily_ceiling_usd = ceiling;
            }
        }
        if let Ok(v) = std::env::var("KEEL_MONTHLY_CEILING") {
            if let Ok(ceiling) = v.parse::<f64>() {
                config.budget.monthly_ceiling_usd = ceiling;
            }
        }
        if let Ok(v) = std::env::var("KEEL_DB_PATH") {
            config.storage.db_path = PathBuf::from(v);
        }
        config
    }

    /// Reload the config from disk. An invalid file leaves the current config in place.
    pub fn reload(&self) -> keel_core::Result<()> {
        if !self.config_path.exists() {
            return Err(KeelError::Config(format!(
                "config file not found: {}",
                self.config_path.display()
            )));
        }
        let new_config = Self::apply_env_overrides(Self::read(&self.config_path)?);
        new_config.validate().map_err(KeelError::Config)?;
        *self.config.write() = new_config;
        info!("configuration reloaded");
        Ok(())
    }

    /// Start a background file watcher that reloads when the config file changes.
    /// Returns the watcher, which must be kept alive for watching to continue.
    pub fn watch(&self) -> keel_core::Result<notify::RecommendedWatcher> {
        let config = Arc::clone(&self.config);
        let path_for_event = self.config_path.clone();

        info!(config_path = ?self.config_path, "starting config file watcher");

        let mut watcher = notify::recommended_watcher(
            move |res: Result<NotifyEvent, notify::Error>| match res {
                Ok(event) => {
                    if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                        return;
                    }
                    let is_our_file = event
                        .paths
                        .iter()
                        .any(|p| p.file_name() == path_for_event.file_name());
                    if !is_our_file {
                        return;
                    }
                    info!("config file changed, reloading");
                    match Self::read(&path_for_event) {
                        Ok(new_config) => {
                            let new_config = Self::apply_env_overrides(new_config);
                            if let Err(e) = new_config.validate() {
                                warn!(error = %e, "config file is invalid, keeping current config");
                                return;
                            }
                            *config.write() = new_config;
                            info!("configuration hot-reloaded successfully");
                        }
                        Err(e) => {
                            warn!(error = %e, "config file has errors, keeping current config");
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "file watcher error");
                }
            },
        )
        .map_err(|e| KeelError::Config(format!("failed to create file watcher: {}", e)))?;

        // Watch the parent directory (some editors create temp files + rename)
        let watch_path = self
            .config_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        watcher
            .watch(watch_path, RecursiveMode::NonRecursive)
            .map_err(|e| KeelError::Config(format!("failed to watch config directory: {}", e)))?;

        Ok(watcher)
    }
}
