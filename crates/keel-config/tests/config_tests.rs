#[cfg(test)]
mod tests {
    use keel_config::ConfigLoader;
    use keel_config::schema::*;
    use keel_core::ActionType;
    use std::io::Write;

    // ── Default tests ──────────────────────────────────────────

    #[test]
    fn test_budget_config_defaults() {
        let config = BudgetConfig::default();
        assert_eq!(config.daily_ceiling_usd, 0.23);
        assert_eq!(config.daily_hard_ceiling_usd, 0.25);
        assert_eq!(config.monthly_ceiling_usd, 5.0);
        assert!(config.tier1_at_usd < config.tier2_at_usd);
    }

    #[test]
    fn test_hold_config_defaults() {
        let config = HoldConfig::default();
        assert_eq!(config.default_window_minutes, 30);
        assert_eq!(config.graduation_thresholds, [3, 7, 15]);
        assert_eq!(config.base_window_minutes(ActionType::EmailStakeholder), 60);
        assert_eq!(config.base_window_minutes(ActionType::TicketStatusChange), 30);
    }

    #[test]
    fn test_escalation_and_logging_defaults() {
        let esc = EscalationConfig::default();
        assert_eq!(esc.ttl_hours, 72);
        assert_eq!(esc.page_size, 50);
        let log = LoggingConfig::default();
        assert_eq!(log.level, "info");
        assert_eq!(log.format, "pretty");
        assert_eq!(StorageConfig::default().backend, StorageBackend::Sqlite);
    }

    #[test]
    fn test_defaults_validate_cleanly() {
        let warnings = KeelConfig::default().validate().unwrap();
        assert!(warnings.is_empty(), "unexpected warnings: {warnings:?}");
    }

    // ── TOML tests ─────────────────────────────────────────────

    #[test]
    fn test_config_toml_roundtrip() {
        let config = KeelConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let restored: KeelConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(restored.budget.daily_ceiling_usd, config.budget.daily_ceiling_usd);
        assert_eq!(restored.holds.window_minutes, config.holds.window_minutes);
    }

    #[test]
    fn test_partial_toml_applies_defaults() {
        let toml_str = r#"
[budget]
daily_ceiling_usd = 1.0
daily_hard_ceiling_usd = 1.2
tier1_at_usd = 0.5
tier2_at_usd = 0.8

[holds.window_minutes]
ticket_status_change = 10

[storage]
backend = "memory"
"#;
        let config: KeelConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.budget.daily_ceiling_usd, 1.0);
        assert_eq!(config.budget.monthly_ceiling_usd, 5.0);
        assert_eq!(config.holds.base_window_minutes(ActionType::TicketStatusChange), 10);
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.escalations.ttl_hours, 72);
        assert!(config.validate().is_ok());
    }

    // ── Validation tests ───────────────────────────────────────

    #[test]
    fn test_tier_thresholds_must_increase() {
        let mut config = KeelConfig::default();
        config.budget.tier2_at_usd = 0.10;
        let err = config.validate().unwrap_err();
        assert!(err.contains("budget.tier1_at_usd"));
    }

    #[test]
    fn test_hard_ceiling_below_daily_is_error() {
        let mut config = KeelConfig::default();
        config.budget.daily_hard_ceiling_usd = 0.2;
        assert!(config.validate().unwrap_err().contains("daily_hard_ceiling_usd"));
    }

    #[test]
    fn test_zero_ttl_is_error() {
        let mut config = KeelConfig::default();
        config.escalations.ttl_hours = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_window_factor_is_error() {
        let mut config = KeelConfig::default();
        config.holds.tier_window_factors = [1.0, 0.5, 0.0, 0.1];
        assert!(config.validate().unwrap_err().contains("tier_window_factors"));
    }

    #[test]
    fn test_unknown_log_format_is_warning_only() {
        let mut config = KeelConfig::default();
        config.logging.format = "yaml".into();
        let warnings = config.validate().unwrap();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].severity, WarningSeverity::Warning);
    }

    // ── Loader tests ───────────────────────────────────────────

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keel.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[escalations]\nttl_hours = 24").unwrap();

        let loader = ConfigLoader::load(Some(&path)).unwrap();
        assert_eq!(loader.get().escalations.ttl_hours, 24);
        assert_eq!(loader.path(), path.as_path());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let loader = ConfigLoader::load(Some(&path)).unwrap();
        assert_eq!(loader.get().holds.default_window_minutes, 30);
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keel.toml");
        std::fs::write(&path, "[escalations]\nttl_hours = 0\n").unwrap();
        match ConfigLoader::load(Some(&path)) {
            Err(keel_core::KeelError::Config(msg)) => assert!(msg.contains("ttl_hours")),
            Err(other) => panic!("expected Config error, got {other:?}"),
            Ok(_) => panic!("expected Config error"),
        }
    }

    #[test]
    fn test_reload_picks_up_changes_and_rejects_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keel.toml");
        std::fs::write(&path, "[escalations]\nttl_hours = 24\n").unwrap();
        let loader = ConfigLoader::load(Some(&path)).unwrap();

        std::fs::write(&path, "[escalations]\nttl_hours = 48\n").unwrap();
        loader.reload().unwrap();
        assert_eq!(loader.get().escalations.ttl_hours, 48);

        std::fs::write(&path, "[escalations]\nttl_hours = 0\n").unwrap();
        assert!(loader.reload().is_err());
        assert_eq!(loader.get().escalations.ttl_hours, 48);
    }
}
