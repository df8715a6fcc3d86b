//! Integration tests for TOML configuration loading.
//!
//! Uses figment::Jail for safe, sandboxed file and env var manipulation.

use figment::{
    Figment, Jail,
    providers::{Format, Serialized, Toml},
};
use wm_core::enums::ConflictResolutionStrategy;
use wm_config::WaymarkConfig;

#[test]
fn loads_sync_config_from_toml() {
    Jail::expect_with(|jail| {
        jail.create_file(
            "config.toml",
            r#"
[sync]
checkpoint_max_age_secs = 900
history_limit = 25
allow_missing_dependencies = true
"#,
        )?;

        let config: WaymarkConfig = Figment::from(Serialized::defaults(WaymarkConfig::default()))
            .merge(Toml::file("config.toml"))
            .extract()?;

        assert_eq!(config.sync.checkpoint_max_age_secs, 900);
        assert_eq!(config.sync.history_limit, 25);
        assert!(config.sync.allow_missing_dependencies);
        Ok(())
    });
}

#[test]
fn loads_strategy_overrides_from_toml() {
    Jail::expect_with(|jail| {
        jail.create_file(
            "config.toml",
            r#"
[conflicts.strategies]
title = "local_wins"
estimate = "remote_wins"
"#,
        )?;

        let config: WaymarkConfig = Figment::from(Serialized::defaults(WaymarkConfig::default()))
            .merge(Toml::file("config.toml"))
            .extract()?;

        assert_eq!(
            config.conflicts.strategies.get("title"),
            Some(&ConflictResolutionStrategy::LocalWins)
        );
        assert_eq!(
            config.conflicts.strategies.get("estimate"),
            Some(&ConflictResolutionStrategy::RemoteWins)
        );
        Ok(())
    });
}

#[test]
fn project_local_file_is_picked_up() {
    Jail::expect_with(|jail| {
        jail.create_dir(".waymark")?;
        jail.create_file(
            ".waymark/config.toml",
            r#"
[database]
path = "custom.db"
"#,
        )?;

        let config = WaymarkConfig::load().expect("config loads");
        assert_eq!(config.database.path, "custom.db");
        Ok(())
    });
}

#[test]
fn unknown_strategy_is_an_error() {
    Jail::expect_with(|jail| {
        jail.create_dir(".waymark")?;
        jail.create_file(
            ".waymark/config.toml",
            r#"
[conflicts.strategies]
title = "coin_flip"
"#,
        )?;

        assert!(WaymarkConfig::load().is_err());
        Ok(())
    });
}
