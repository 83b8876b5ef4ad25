//! The one configuration surface for building a [`Manager`](crate::Manager).
//!
//! Any serde format can produce a [`TrashConfig`]; environment overrides are
//! layered on top with [`TrashConfig::apply_environ`].

use crate::errors::{CoreError, Result};
use crate::filter::FilterConfig;
use crate::journal::{JournalOptions, DEFAULT_STALE_AFTER};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Directory name of the legacy store under `$HOME`.
pub const LEGACY_DIR_NAME: &str = ".trashcan";

/// Which backends a manager is built with.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// FreeDesktop trash, plus the legacy store when it already exists.
    #[default]
    Auto,
    Xdg,
    Legacy,
}

impl FromStr for Strategy {
    type Err = CoreError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "auto" | "" => Ok(Self::Auto),
            "xdg" | "spec" => Ok(Self::Xdg),
            "legacy" => Ok(Self::Legacy),
            other => Err(CoreError::invalid_input(format!("unknown trash strategy '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Deserialize)]
#[serde(default)]
pub struct JournalConfig {
    /// Age after which an unfinished transaction is rolled back on open.
    pub stale_after_secs: u64,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: DEFAULT_STALE_AFTER.as_secs(),
        }
    }
}

impl JournalConfig {
    pub fn options(&self) -> JournalOptions {
        JournalOptions {
            stale_after: Duration::from_secs(self.stale_after_secs),
        }
    }
}

#[derive(Debug, Clone, Default, Eq, PartialEq, Deserialize)]
#[serde(default)]
pub struct TrashConfig {
    pub strategy: Strategy,
    /// Home trash root, usually `$XDG_DATA_HOME/Trash`.
    pub home_trash: Option<PathBuf>,
    /// Legacy store root, usually `$HOME/.trashcan`.
    pub legacy_root: Option<PathBuf>,
    /// Never use per-mount trash directories.
    pub force_home_only: bool,
    /// Store paths from other devices in the home trash instead of failing.
    pub enable_home_fallback: bool,
    /// Explicit mount points; empty means read the live mount table.
    pub volumes: Vec<PathBuf>,
    pub journal: JournalConfig,
    pub filter: FilterConfig,
}

impl TrashConfig {
    /// Defaults with environment overrides applied.
    pub fn from_environ(environ: &HashMap<String, String>) -> Result<Self> {
        let mut config = Self::default();
        config.apply_environ(environ)?;
        Ok(config)
    }

    /// Applies `TRASH_*` overrides and fills unset roots from `XDG_DATA_HOME`/`HOME`.
    pub fn apply_environ(&mut self, environ: &HashMap<String, String>) -> Result<()> {
        if let Some(dir) = non_empty(environ, "TRASH_HOME_DIR") {
            self.home_trash = Some(PathBuf::from(dir));
        }
        if self.home_trash.is_none() {
            self.home_trash = home_trash_from_environ(environ);
        }

        if let Some(dir) = non_empty(environ, "TRASH_LEGACY_DIR") {
            self.legacy_root = Some(PathBuf::from(dir));
        }
        if self.legacy_root.is_none() {
            self.legacy_root = non_empty(environ, "HOME").map(|home| PathBuf::from(home).join(LEGACY_DIR_NAME));
        }

        if let Some(value) = non_empty(environ, "TRASH_FORCE_HOME") {
            self.force_home_only = parse_flag("TRASH_FORCE_HOME", value)?;
        }
        if let Some(value) = non_empty(environ, "TRASH_HOME_FALLBACK") {
            self.enable_home_fallback = parse_flag("TRASH_HOME_FALLBACK", value)?;
        }
        if let Some(volumes) = non_empty(environ, "TRASH_VOLUMES") {
            self.volumes = volumes
                .split(':')
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
                .collect();
        }
        if let Some(strategy) = non_empty(environ, "TRASH_STRATEGY") {
            self.strategy = strategy.parse()?;
        }
        Ok(())
    }
}

/// `$XDG_DATA_HOME/Trash`, else `$HOME/.local/share/Trash`.
pub fn home_trash_from_environ(environ: &HashMap<String, String>) -> Option<PathBuf> {
    if let Some(xdg_data_home) = non_empty(environ, "XDG_DATA_HOME") {
        return Some(PathBuf::from(xdg_data_home).join("Trash"));
    }
    non_empty(environ, "HOME").map(|home| PathBuf::from(home).join(".local/share/Trash"))
}

fn non_empty<'a>(environ: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    environ
        .get(key)
        .map(String::as_str)
        .filter(|value| !value.is_empty())
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(CoreError::invalid_input(format!("{key}: expected a boolean, got '{other}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn environ(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn home_trash_prefers_xdg_data_home() {
        let env = environ(&[("HOME", "/home/ann"), ("XDG_DATA_HOME", "/data")]);
        assert_eq!(home_trash_from_environ(&env), Some(PathBuf::from("/data/Trash")));

        let env = environ(&[("HOME", "/home/ann")]);
        assert_eq!(
            home_trash_from_environ(&env),
            Some(PathBuf::from("/home/ann/.local/share/Trash"))
        );
        assert_eq!(home_trash_from_environ(&HashMap::new()), None);
    }

    #[test]
    fn environment_overrides_defaults() {
        let env = environ(&[
            ("HOME", "/home/ann"),
            ("TRASH_HOME_DIR", "/srv/trash"),
            ("TRASH_FORCE_HOME", "yes"),
            ("TRASH_HOME_FALLBACK", "1"),
            ("TRASH_VOLUMES", "/:/mnt/usb::"),
            ("TRASH_STRATEGY", "Legacy"),
        ]);
        let config = TrashConfig::from_environ(&env).unwrap();

        assert_eq!(config.home_trash, Some(PathBuf::from("/srv/trash")));
        assert_eq!(config.legacy_root, Some(PathBuf::from("/home/ann/.trashcan")));
        assert!(config.force_home_only);
        assert!(config.enable_home_fallback);
        assert_eq!(config.volumes, vec![PathBuf::from("/"), PathBuf::from("/mnt/usb")]);
        assert_eq!(config.strategy, Strategy::Legacy);
        assert_eq!(config.journal.options().stale_after, DEFAULT_STALE_AFTER);
    }

    #[test]
    fn malformed_values_are_rejected() {
        let env = environ(&[("TRASH_HOME_FALLBACK", "maybe")]);
        assert!(TrashConfig::from_environ(&env).is_err());
        let env = environ(&[("TRASH_STRATEGY", "cloud")]);
        assert!(TrashConfig::from_environ(&env).is_err());
    }

    #[test]
    fn deserializes_partial_documents() {
        let config: TrashConfig = serde_json::from_str(
            r#"{
                "strategy": "xdg",
                "enable_home_fallback": true,
                "journal": { "stale_after_secs": 60 },
                "filter": { "exclude_names": ["b.log"], "max_size": "10KB", "max_age_days": 30 }
            }"#,
        )
        .unwrap();

        assert_eq!(config.strategy, Strategy::Xdg);
        assert!(config.enable_home_fallback);
        assert!(!config.force_home_only);
        assert_eq!(config.journal.options().stale_after, Duration::from_secs(60));
        assert_eq!(config.filter.exclude_names, vec!["b.log".to_string()]);
        assert_eq!(config.filter.max_age_days, Some(30));
    }
}
