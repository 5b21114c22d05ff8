//! Service configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
    #[error("parsing {path}: {source}")]
    Parse { path: PathBuf, source: toml::de::Error },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub intervals: IntervalConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub reference: ReferenceConfig,
}

/// Telemetry transport
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Where telemetry datagrams are received
    pub bind_addr: String,
    /// Where responses are sent
    pub publish_addr: String,
    pub topic_prefix: String,
    pub response_prefix: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:20780".into(),
            publish_addr: "127.0.0.1:20781".into(),
            topic_prefix: "telemetry".into(),
            response_prefix: "coach".into(),
            username: None,
            password: None,
        }
    }
}

/// Background duty periods, in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntervalConfig {
    pub coach_poll_secs: u64,
    pub lap_flush_secs: u64,
    /// Sessions silent for this long are torn down
    pub session_timeout_secs: u64,
    pub reap_secs: u64,
}

impl Default for IntervalConfig {
    fn default() -> Self {
        Self { coach_poll_secs: 5, lap_flush_secs: 10, session_timeout_secs: 600, reap_secs: 30 }
    }
}

impl IntervalConfig {
    pub fn coach_poll(&self) -> Duration {
        Duration::from_secs(self.coach_poll_secs)
    }

    pub fn lap_flush(&self) -> Duration {
        Duration::from_secs(self.lap_flush_secs)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    pub fn reap(&self) -> Duration {
        Duration::from_secs(self.reap_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub bind_addr: String,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self { bind_addr: "0.0.0.0:8080".into() }
    }
}

/// Data the in-memory store is seeded with
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferenceConfig {
    /// Directory of reference laps (`.csv`, `.ndjson`)
    pub laps_dir: Option<PathBuf>,
    pub drivers: Vec<DriverConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    pub name: String,
    /// Coaching app tag: `brake`, `trackguide` or `debug`
    pub app: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let i = &self.intervals;
        for (name, v) in [
            ("coach_poll_secs", i.coach_poll_secs),
            ("lap_flush_secs", i.lap_flush_secs),
            ("session_timeout_secs", i.session_timeout_secs),
            ("reap_secs", i.reap_secs),
        ] {
            if v == 0 {
                return Err(ConfigError::Invalid(format!("{} must be > 0", name)));
            }
        }
        if self.stream.topic_prefix.trim_matches('/').is_empty() {
            return Err(ConfigError::Invalid("topic_prefix must not be empty".into()));
        }
        if self.stream.username.is_some() != self.stream.password.is_some() {
            return Err(ConfigError::Invalid("username and password must be set together".into()));
        }
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })?;
        config.validate()?;
        Ok(config)
    }

    /// `path` when given, else the default location if it exists, else
    /// built-in defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(p) = path {
            return Self::load(p);
        }
        match Self::default_path() {
            Some(p) if p.exists() => Self::load(&p),
            _ => Ok(Self::default()),
        }
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs_next::config_dir().map(|d| d.join("racing-coach").join("config.toml"))
    }

    pub fn credentials(&self) -> Option<coach_ingest_core::Credentials> {
        match (&self.stream.username, &self.stream.password) {
            (Some(u), Some(p)) => Some(coach_ingest_core::Credentials { username: u.clone(), password: p.clone() }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let c = Config::default();
        c.validate().unwrap();
        assert_eq!(c.intervals.session_timeout(), Duration::from_secs(600));
        assert_eq!(c.stream.topic_prefix, "telemetry");
        assert!(c.credentials().is_none());
    }

    #[test]
    fn test_load_partial_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[stream]
topic_prefix = "crewchief"
username = "coach"
password = "secret"

[intervals]
coach_poll_secs = 2

[[reference.drivers]]
name = "jim"
app = "brake"
"#,
        )
        .unwrap();
        let c = Config::load(&path).unwrap();
        assert_eq!(c.stream.topic_prefix, "crewchief");
        assert_eq!(c.stream.response_prefix, "coach");
        assert_eq!(c.intervals.coach_poll_secs, 2);
        assert_eq!(c.intervals.lap_flush_secs, 10);
        assert!(c.reference.drivers[0].enabled);
        assert_eq!(c.credentials().unwrap().username, "coach");
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut c = Config::default();
        c.intervals.reap_secs = 0;
        assert!(matches!(c.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_bad_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[stream\n").unwrap();
        assert!(matches!(Config::load(&path), Err(ConfigError::Parse { .. })));
        assert!(matches!(Config::load(&dir.path().join("missing.toml")), Err(ConfigError::Io { .. })));
    }
}
