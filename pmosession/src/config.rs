//! Session configuration.
//!
//! The embedded `pmosession.yaml` gives every default. An optional
//! `config.yaml` in the configuration directory is merged on top of it, then
//! `PMOSESSION_CONFIG__<SECTION>__<KEY>` environment variables override single
//! values (e.g. `PMOSESSION_CONFIG__SESSION__LEGACY_AGGREGATION_WINDOW_MS=250`).

use std::{env, fs, path::Path};

use anyhow::{Result, anyhow};
use dirs::home_dir;
use serde_yaml::{Mapping, Value};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::errors::SessionError;
use crate::snapshot::{
    DEFAULT_MAX_SEEK_TO_PREVIOUS_POSITION_MS, DEFAULT_SEEK_BACK_INCREMENT_MS,
    DEFAULT_SEEK_FORWARD_INCREMENT_MS,
};

// Configuration par défaut intégrée
const DEFAULT_CONFIG: &str = include_str!("pmosession.yaml");

const ENV_CONFIG_DIR: &str = "PMOSESSION_CONFIG";
const ENV_PREFIX: &str = "PMOSESSION_CONFIG__";

pub const DEFAULT_POSITION_DIFF_TOLERANCE_MS: u64 = 100;
pub const DEFAULT_LEGACY_AGGREGATION_WINDOW_MS: u64 = 500;
const DEFAULT_LOG_MIN_LEVEL: &str = "INFO";

/// Typed values the controller runs with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionSettings {
    pub position_diff_tolerance_ms: u64,
    pub legacy_aggregation_window_ms: u64,
    pub seek_back_increment_ms: u64,
    pub seek_forward_increment_ms: u64,
    pub max_seek_to_previous_position_ms: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        SessionSettings {
            position_diff_tolerance_ms: DEFAULT_POSITION_DIFF_TOLERANCE_MS,
            legacy_aggregation_window_ms: DEFAULT_LEGACY_AGGREGATION_WINDOW_MS,
            seek_back_increment_ms: DEFAULT_SEEK_BACK_INCREMENT_MS,
            seek_forward_increment_ms: DEFAULT_SEEK_FORWARD_INCREMENT_MS,
            max_seek_to_previous_position_ms: DEFAULT_MAX_SEEK_TO_PREVIOUS_POSITION_MS,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    data: Value,
}

impl SessionConfig {
    /// Directory holding `config.yaml`: `directory` when given, else the
    /// `PMOSESSION_CONFIG` variable, else `~/.pmosession`.
    pub fn config_dir(directory: &str) -> String {
        if !directory.is_empty() {
            return directory.to_string();
        }
        if let Ok(dir) = env::var(ENV_CONFIG_DIR) {
            return dir;
        }
        home_dir()
            .map(|home| home.join(".pmosession").to_string_lossy().to_string())
            .unwrap_or_else(|| ".pmosession".to_string())
    }

    /// Loads the embedded defaults, the optional file and the environment.
    pub fn load(directory: &str) -> Result<Self> {
        let config_dir = Self::config_dir(directory);
        let path = Path::new(&config_dir).join("config.yaml");

        let mut data: Value = serde_yaml::from_str(DEFAULT_CONFIG)?;
        match fs::read(&path) {
            Ok(bytes) => {
                info!(config_file = %path.display(), "Loaded session config file");
                let external: Value = serde_yaml::from_slice(&bytes)?;
                merge_yaml(&mut data, &lower_keys_value(external));
            }
            Err(_) => {
                info!(config_file = %path.display(), "No session config file, using defaults");
            }
        }

        let mut data = lower_keys_value(data);
        apply_overrides(&mut data, env::vars());
        Self::from_value(data)
    }

    /// Defaults overlaid with `yaml`, without reading files or environment.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let mut data: Value = serde_yaml::from_str(DEFAULT_CONFIG)?;
        let external: Value = serde_yaml::from_str(yaml)?;
        merge_yaml(&mut data, &lower_keys_value(external));
        Self::from_value(lower_keys_value(data))
    }

    fn from_value(data: Value) -> Result<Self> {
        let config = SessionConfig { data };
        config.settings()?;
        Ok(config)
    }

    /// Applies `KEY=value` overrides using the environment naming scheme.
    pub fn with_overrides<I>(mut self, vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        apply_overrides(&mut self.data, vars);
        self.settings()?;
        Ok(self)
    }

    pub fn get_value(&self, path: &[&str]) -> Result<Value> {
        let mut current = &self.data;
        for (i, key) in path.iter().enumerate() {
            match current {
                Value::Mapping(map) => match map.get(Value::String(key.to_lowercase())) {
                    Some(next) => current = next,
                    None => return Err(anyhow!("Path {} does not exist", path[..=i].join("."))),
                },
                _ => return Err(anyhow!("Path {} is not a mapping", path[..i].join("."))),
            }
        }
        Ok(current.clone())
    }

    fn get_u64(&self, path: &[&str], default: u64) -> Result<u64> {
        match self.get_value(path) {
            Ok(Value::Number(n)) => n
                .as_u64()
                .ok_or_else(|| SessionError::bad_config_value(&path.join("."), &n.to_string()).into()),
            Ok(Value::Null) | Err(_) => Ok(default),
            Ok(other) => Err(SessionError::bad_config_value(
                &path.join("."),
                &format!("{:?}", other),
            )
            .into()),
        }
    }

    /// Typed, validated session values.
    pub fn settings(&self) -> Result<SessionSettings> {
        let settings = SessionSettings {
            position_diff_tolerance_ms: self.get_u64(
                &["session", "position_diff_tolerance_ms"],
                DEFAULT_POSITION_DIFF_TOLERANCE_MS,
            )?,
            legacy_aggregation_window_ms: self.get_u64(
                &["session", "legacy_aggregation_window_ms"],
                DEFAULT_LEGACY_AGGREGATION_WINDOW_MS,
            )?,
            seek_back_increment_ms: self.get_u64(
                &["session", "seek_back_increment_ms"],
                DEFAULT_SEEK_BACK_INCREMENT_MS,
            )?,
            seek_forward_increment_ms: self.get_u64(
                &["session", "seek_forward_increment_ms"],
                DEFAULT_SEEK_FORWARD_INCREMENT_MS,
            )?,
            max_seek_to_previous_position_ms: self.get_u64(
                &["session", "max_seek_to_previous_position_ms"],
                DEFAULT_MAX_SEEK_TO_PREVIOUS_POSITION_MS,
            )?,
        };

        if settings.legacy_aggregation_window_ms == 0 {
            return Err(SessionError::bad_config_value(
                "session.legacy_aggregation_window_ms",
                "0",
            )
            .into());
        }
        Ok(settings)
    }

    pub fn log_min_level(&self) -> String {
        match self.get_value(&["log", "min_level"]) {
            Ok(Value::String(level)) => level,
            _ => DEFAULT_LOG_MIN_LEVEL.to_string(),
        }
    }

    /// Filter for `tracing-subscriber` built from `log.min_level`.
    pub fn log_filter(&self) -> EnvFilter {
        EnvFilter::try_new(self.log_min_level().to_lowercase())
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_MIN_LEVEL.to_lowercase()))
    }
}

fn apply_overrides<I>(config: &mut Value, vars: I)
where
    I: IntoIterator<Item = (String, String)>,
{
    for (key, value) in vars {
        if let Some(rest) = key.strip_prefix(ENV_PREFIX) {
            let path: Vec<String> = rest.split("__").map(|k| k.to_lowercase()).collect();
            let parsed = serde_yaml::from_str::<Value>(&value)
                .unwrap_or_else(|_| Value::String(value.clone()));
            set_value_internal(config, &path, parsed);
        }
    }
}

fn set_value_internal(data: &mut Value, path: &[String], value: Value) {
    let Some((first, rest)) = path.split_first() else {
        *data = value;
        return;
    };
    if let Value::Mapping(map) = data {
        let key = Value::String(first.clone());
        if rest.is_empty() {
            map.insert(key, value);
        } else {
            let entry = map.entry(key).or_insert(Value::Mapping(Mapping::new()));
            set_value_internal(entry, rest, value);
        }
    }
}

fn lower_keys_value(value: Value) -> Value {
    match value {
        Value::Mapping(map) => {
            let mut new_map = Mapping::new();
            for (k, v) in map {
                let k = match k {
                    Value::String(s) => Value::String(s.to_lowercase()),
                    other => other,
                };
                new_map.insert(k, lower_keys_value(v));
            }
            Value::Mapping(new_map)
        }
        Value::Sequence(seq) => Value::Sequence(seq.into_iter().map(lower_keys_value).collect()),
        _ => value,
    }
}

/// Mappings are merged key by key; anything else is replaced.
fn merge_yaml(default: &mut Value, external: &Value) {
    match (default, external) {
        (Value::Mapping(dmap), Value::Mapping(emap)) => {
            for (k, v) in emap {
                match dmap.get_mut(k) {
                    Some(dv) => merge_yaml(dv, v),
                    None => {
                        dmap.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (d, e) => *d = e.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_defaults() {
        let config = SessionConfig::from_yaml_str("{}").unwrap();
        assert_eq!(config.settings().unwrap(), SessionSettings::default());
        assert_eq!(config.log_min_level(), "INFO");
    }

    #[test]
    fn test_file_overlay_keeps_other_defaults() {
        let config = SessionConfig::from_yaml_str(
            "Session:\n  Legacy_Aggregation_Window_Ms: 250\n",
        )
        .unwrap();
        let settings = config.settings().unwrap();
        assert_eq!(settings.legacy_aggregation_window_ms, 250);
        assert_eq!(settings.position_diff_tolerance_ms, 100);
    }

    #[test]
    fn test_overrides() {
        let config = SessionConfig::from_yaml_str("{}")
            .unwrap()
            .with_overrides(vec![
                (
                    "PMOSESSION_CONFIG__SESSION__SEEK_BACK_INCREMENT_MS".to_string(),
                    "10000".to_string(),
                ),
                ("PMOSESSION_CONFIG__LOG__MIN_LEVEL".to_string(), "debug".to_string()),
                ("UNRELATED".to_string(), "1".to_string()),
            ])
            .unwrap();
        assert_eq!(config.settings().unwrap().seek_back_increment_ms, 10_000);
        assert_eq!(config.log_min_level(), "debug");
    }

    #[test]
    fn test_zero_window_rejected() {
        assert!(SessionConfig::from_yaml_str("session:\n  legacy_aggregation_window_ms: 0\n").is_err());
        assert!(SessionConfig::from_yaml_str("session:\n  seek_back_increment_ms: fast\n").is_err());
    }
}
