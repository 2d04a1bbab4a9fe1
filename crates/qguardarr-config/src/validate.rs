//! Validation rules applied to a parsed [`crate::model::QguardarrConfig`].

use std::collections::HashSet;

use regex::Regex;

use crate::error::ConfigError;
use crate::model::QguardarrConfig;

/// Validate a fully parsed configuration document.
///
/// # Errors
///
/// Returns the first [`ConfigError::InvalidField`] encountered. Rules
/// checked, in order: at least one tracker is configured, tracker ids are
/// unique, every tracker pattern compiles as a regex, exactly one catch-all
/// (`.*`) tracker exists and it is last, global numeric ranges are sane.
pub fn validate(config: &QguardarrConfig) -> Result<(), ConfigError> {
    validate_trackers(config)?;
    validate_global(config)
}

fn validate_trackers(config: &QguardarrConfig) -> Result<(), ConfigError> {
    if config.trackers.is_empty() {
        return Err(ConfigError::invalid_field(
            "trackers",
            "at least one tracker must be configured",
        ));
    }

    let mut seen_ids = HashSet::with_capacity(config.trackers.len());
    let last_index = config.trackers.len() - 1;
    let mut catch_all_found = false;

    for (index, tracker) in config.trackers.iter().enumerate() {
        if !seen_ids.insert(tracker.id.as_str()) {
            return Err(ConfigError::invalid_field(
                format!("trackers[{index}].id"),
                format!("duplicate tracker id '{}'", tracker.id),
            ));
        }

        if Regex::new(&tracker.pattern).is_err() {
            return Err(ConfigError::invalid_field(
                format!("trackers[{index}].pattern"),
                format!("'{}' is not a valid regular expression", tracker.pattern),
            ));
        }

        if tracker.pattern == ".*" {
            if index != last_index {
                return Err(ConfigError::invalid_field(
                    format!("trackers[{index}].pattern"),
                    "catch-all pattern '.*' must be the last tracker",
                ));
            }
            catch_all_found = true;
        }

        if !(1..=10).contains(&tracker.priority) {
            return Err(ConfigError::invalid_field(
                format!("trackers[{index}].priority"),
                "priority must be between 1 and 10",
            ));
        }
    }

    if !catch_all_found {
        return Err(ConfigError::invalid_field(
            "trackers",
            "a catch-all tracker with pattern '.*' must be configured as the last tracker",
        ));
    }

    Ok(())
}

fn validate_global(config: &QguardarrConfig) -> Result<(), ConfigError> {
    let global = &config.global;

    if global.update_interval < 60 {
        return Err(ConfigError::invalid_field(
            "global.update_interval",
            "update_interval must be at least 60 seconds",
        ));
    }
    if global.max_api_calls_per_cycle < 100 {
        return Err(ConfigError::invalid_field(
            "global.max_api_calls_per_cycle",
            "max_api_calls_per_cycle must be at least 100",
        ));
    }
    if !(0.05..=1.0).contains(&global.differential_threshold) {
        return Err(ConfigError::invalid_field(
            "global.differential_threshold",
            "differential_threshold must be between 0.05 and 1.0",
        ));
    }
    if !(1..=100).contains(&global.rollout_percentage) {
        return Err(ConfigError::invalid_field(
            "global.rollout_percentage",
            "rollout_percentage must be between 1 and 100",
        ));
    }
    if !(1024..=65535).contains(&global.port) {
        return Err(ConfigError::invalid_field(
            "global.port",
            "port must be between 1024 and 65535",
        ));
    }
    if !(0.5..=1.0).contains(&global.borrow_threshold_ratio) {
        return Err(ConfigError::invalid_field(
            "global.borrow_threshold_ratio",
            "borrow_threshold_ratio must be between 0.5 and 1.0",
        ));
    }
    if !(0.0..=1.0).contains(&global.max_borrow_fraction) {
        return Err(ConfigError::invalid_field(
            "global.max_borrow_fraction",
            "max_borrow_fraction must be between 0.0 and 1.0",
        ));
    }
    if !(0.0..=1.0).contains(&global.smoothing_alpha) {
        return Err(ConfigError::invalid_field(
            "global.smoothing_alpha",
            "smoothing_alpha must be between 0.0 and 1.0",
        ));
    }
    if !(0.0..=1.0).contains(&global.min_effective_delta) {
        return Err(ConfigError::invalid_field(
            "global.min_effective_delta",
            "min_effective_delta must be between 0.0 and 1.0",
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{GlobalSettings, QbittorrentSettings, TrackerConfig};

    fn base_config() -> QguardarrConfig {
        QguardarrConfig {
            global: GlobalSettings {
                update_interval: 300,
                active_torrent_threshold_kb: 10,
                max_api_calls_per_cycle: 500,
                differential_threshold: 0.2,
                rollout_percentage: 10,
                cache_ttl_seconds: 1_800,
                max_managed_torrents: 1_000,
                allocation_strategy: crate::model::AllocationStrategy::Equal,
                borrow_threshold_ratio: 0.8,
                max_borrow_fraction: 0.5,
                smoothing_alpha: 0.3,
                min_effective_delta: 0.05,
                host: "0.0.0.0".into(),
                port: 8089,
                dry_run: false,
                dry_run_store_path: "./data/dry_run_limits.json".into(),
                auto_unlimit_on_inactive: false,
            },
            qbittorrent: QbittorrentSettings {
                host: "localhost".into(),
                port: 8080,
                username: "admin".into(),
                password: "secret".into(),
                timeout_secs: 30,
            },
            cross_seed: Default::default(),
            trackers: vec![
                TrackerConfig {
                    id: "tracker-a".into(),
                    name: "Tracker A".into(),
                    pattern: r"tracker-a\.example".into(),
                    max_upload_speed: 10_485_760,
                    priority: 1,
                },
                TrackerConfig {
                    id: "catch-all".into(),
                    name: "Catch All".into(),
                    pattern: ".*".into(),
                    max_upload_speed: 5_242_880,
                    priority: 1,
                },
            ],
            rollback: Default::default(),
            logging: Default::default(),
        }
    }

    #[test]
    fn accepts_well_formed_config() {
        assert!(validate(&base_config()).is_ok());
    }

    #[test]
    fn rejects_missing_catch_all() {
        let mut config = base_config();
        config.trackers.pop();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn rejects_catch_all_not_last() {
        let mut config = base_config();
        config.trackers.reverse();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn rejects_duplicate_ids() {
        let mut config = base_config();
        config.trackers[0].id = "catch-all".into();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn rejects_invalid_pattern() {
        let mut config = base_config();
        config.trackers[0].pattern = "(unterminated".into();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn rejects_out_of_range_rollout_percentage() {
        let mut config = base_config();
        config.global.rollout_percentage = 0;
        assert!(validate(&config).is_err());
    }
}
