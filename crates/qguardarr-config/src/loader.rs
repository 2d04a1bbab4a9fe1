//! File-based configuration loading, environment-variable substitution, and
//! mtime-polling hot reload.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use once_cell::sync::Lazy;
use regex::Regex;
use toml::Value;
use tracing::{info, warn};

use crate::error::{ConfigError, ConfigResult};
use crate::model::QguardarrConfig;
use crate::validate;

static ENV_PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([^}]+)\}").expect("static env placeholder regex is valid"));

/// Recursively substitute `${VAR_NAME}` references against the process
/// environment. Unset variables are left untouched (the literal
/// `${VAR_NAME}` survives into the parsed document, which then typically
/// fails validation with a clear field error rather than silently blanking
/// out).
fn substitute_env_vars(value: Value) -> Value {
    match value {
        Value::Table(table) => Value::Table(
            table
                .into_iter()
                .map(|(key, value)| (key, substitute_env_vars(value)))
                .collect(),
        ),
        Value::Array(items) => {
            Value::Array(items.into_iter().map(substitute_env_vars).collect())
        }
        Value::String(raw) => {
            let substituted = ENV_PLACEHOLDER.replace_all(&raw, |captures: &regex::Captures| {
                let var_name = &captures[1];
                std::env::var(var_name).unwrap_or_else(|_| captures[0].to_string())
            });
            Value::String(substituted.into_owned())
        }
        other => other,
    }
}

/// Loads, validates, and hot-reloads a [`QguardarrConfig`] document from disk.
pub struct ConfigLoader {
    path: PathBuf,
    last_mtime: Option<SystemTime>,
}

impl ConfigLoader {
    /// Construct a loader pointed at `path`. The file is not read until
    /// [`ConfigLoader::load`] is called.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last_mtime: None,
        }
    }

    /// Path to the configuration file this loader reads.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read, substitute, parse, and validate the configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotFound`] if the file is missing,
    /// [`ConfigError::Io`] if it cannot be read, [`ConfigError::Parse`] if
    /// it is not valid TOML, or [`ConfigError::InvalidField`] if validation
    /// rejects the parsed document.
    pub fn load(&mut self) -> ConfigResult<QguardarrConfig> {
        if !self.path.exists() {
            return Err(ConfigError::NotFound {
                path: self.path.clone(),
            });
        }

        let raw = std::fs::read_to_string(&self.path).map_err(|source| ConfigError::Io {
            path: self.path.clone(),
            source,
        })?;

        let document: Value = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: self.path.clone(),
            source,
        })?;
        let substituted = substitute_env_vars(document);
        let config: QguardarrConfig =
            substituted
                .try_into()
                .map_err(|source: toml::de::Error| ConfigError::Parse {
                    path: self.path.clone(),
                    source,
                })?;

        validate::validate(&config)?;

        self.last_mtime = self.current_mtime();
        info!(path = %self.path.display(), "configuration loaded");
        Ok(config)
    }

    /// Returns `true` if the file's modification time has advanced since the
    /// last successful [`ConfigLoader::load`] call.
    #[must_use]
    pub fn changed_on_disk(&self) -> bool {
        match (self.current_mtime(), self.last_mtime) {
            (Some(current), Some(last)) => current > last,
            (Some(_), None) => true,
            _ => false,
        }
    }

    fn current_mtime(&self) -> Option<SystemTime> {
        std::fs::metadata(&self.path)
            .and_then(|metadata| metadata.modified())
            .ok()
    }
}

/// Poll `loader` on `interval` and invoke `on_reload` with each newly
/// validated snapshot. Invalid reloads are logged and skipped; the loader
/// keeps polling rather than tearing down the watch loop, matching the
/// config watcher's "previous snapshot stays live" contract.
pub async fn watch<F>(mut loader: ConfigLoader, interval: std::time::Duration, mut on_reload: F)
where
    F: FnMut(QguardarrConfig) + Send,
{
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        if !loader.changed_on_disk() {
            continue;
        }
        match loader.load() {
            Ok(config) => on_reload(config),
            Err(err) => warn!(error = %err, "configuration reload rejected, keeping previous snapshot"),
        }
    }
}
