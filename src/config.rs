use nix::sys::signal::Signal;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Top-level configuration loaded from devkeeper.toml.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct KeeperConfig {
    pub watchdog: WatchdogConfig,
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WatchdogConfig {
    pub poll_interval_secs: u64,
    pub heartbeat_interval_secs: u64,
    pub cache_clear_percent: u8,
    pub emergency_percent: u8,
    /// Regex matched against each process's full command line.
    pub process_pattern: String,
    pub kill_signal: String,
    /// Program and arguments that ask the kernel to drop its page cache.
    pub drop_caches_command: Vec<String>,
    pub remediation_timeout_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SyncConfig {
    pub default_remote: String,
}

// --- Default implementations ---

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 10,
            heartbeat_interval_secs: 60,
            cache_clear_percent: 80,
            emergency_percent: 90,
            process_pattern: "claude".to_string(),
            kill_signal: "SIGTERM".to_string(),
            drop_caches_command: vec![
                "sudo".to_string(),
                "-n".to_string(),
                "sh".to_string(),
                "-c".to_string(),
                "sync; echo 3 > /proc/sys/vm/drop_caches".to_string(),
            ],
            remediation_timeout_secs: 30,
            status_file: None,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            default_remote: "origin".to_string(),
        }
    }
}

impl WatchdogConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn remediation_timeout(&self) -> Duration {
        Duration::from_secs(self.remediation_timeout_secs)
    }

    /// Parse `kill_signal`. Accepts `SIGTERM` or the short form `TERM`.
    pub fn signal(&self) -> Result<Signal, ConfigError> {
        let name = self.kill_signal.trim().to_ascii_uppercase();
        let full = if name.starts_with("SIG") {
            name
        } else {
            format!("SIG{name}")
        };
        Signal::from_str(&full).map_err(|_| ConfigError::Invalid {
            field: "watchdog.kill_signal",
            reason: format!("unknown signal '{}'", self.kill_signal),
        })
    }

    pub fn pattern(&self) -> Result<Regex, ConfigError> {
        if self.process_pattern.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "watchdog.process_pattern",
                reason: "must not be empty".to_string(),
            });
        }
        Regex::new(&self.process_pattern).map_err(|e| ConfigError::Invalid {
            field: "watchdog.process_pattern",
            reason: e.to_string(),
        })
    }
}

impl KeeperConfig {
    /// Check cross-field constraints that serde can't express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let w = &self.watchdog;
        if w.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "watchdog.poll_interval_secs",
                reason: "must be greater than 0".to_string(),
            });
        }
        if w.cache_clear_percent == 0 || w.cache_clear_percent > w.emergency_percent {
            return Err(ConfigError::Invalid {
                field: "watchdog.cache_clear_percent",
                reason: format!(
                    "must be in 1..={} (emergency_percent), got {}",
                    w.emergency_percent, w.cache_clear_percent
                ),
            });
        }
        if w.emergency_percent > 100 {
            return Err(ConfigError::Invalid {
                field: "watchdog.emergency_percent",
                reason: format!("must be at most 100, got {}", w.emergency_percent),
            });
        }
        if w.drop_caches_command.is_empty() {
            return Err(ConfigError::Invalid {
                field: "watchdog.drop_caches_command",
                reason: "must name a program".to_string(),
            });
        }
        if self.sync.default_remote.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "sync.default_remote",
                reason: "must not be empty".to_string(),
            });
        }
        w.pattern()?;
        w.signal()?;
        Ok(())
    }
}

/// Load config from `path`. A missing file yields defaults; a malformed one is an error.
pub fn load_config(path: &Path) -> Result<KeeperConfig, ConfigError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(KeeperConfig::default());
        }
        Err(e) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };
    toml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Errors from loading or validating configuration.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    Invalid {
        field: &'static str,
        reason: String,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {source}", path.display())
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config {}: {source}", path.display())
            }
            ConfigError::Invalid { field, reason } => write!(f, "invalid {field}: {reason}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::Invalid { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_thresholds_and_intervals() {
        let cfg = KeeperConfig::default();
        assert_eq!(cfg.watchdog.poll_interval_secs, 10);
        assert_eq!(cfg.watchdog.heartbeat_interval_secs, 60);
        assert_eq!(cfg.watchdog.cache_clear_percent, 80);
        assert_eq!(cfg.watchdog.emergency_percent, 90);
        assert_eq!(cfg.sync.default_remote, "origin");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let cfg = load_config(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(cfg.watchdog.process_pattern, "claude");
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("devkeeper.toml");
        std::fs::write(
            &path,
            "[watchdog]\nemergency_percent = 95\nprocess_pattern = \"node .*tsserver\"\n",
        )
        .unwrap();
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.watchdog.emergency_percent, 95);
        assert_eq!(cfg.watchdog.cache_clear_percent, 80);
        assert_eq!(cfg.watchdog.process_pattern, "node .*tsserver");
        assert_eq!(cfg.sync.default_remote, "origin");
    }

    #[test]
    fn test_malformed_file_is_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("devkeeper.toml");
        std::fs::write(&path, "[watchdog\npoll_interval_secs = ").unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("failed to parse config"));
    }

    #[test]
    fn test_validate_rejects_inverted_thresholds() {
        let mut cfg = KeeperConfig::default();
        cfg.watchdog.cache_clear_percent = 95;
        cfg.watchdog.emergency_percent = 90;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("watchdog.cache_clear_percent"));
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let mut cfg = KeeperConfig::default();
        cfg.watchdog.poll_interval_secs = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_pattern() {
        let mut cfg = KeeperConfig::default();
        cfg.watchdog.process_pattern = "claude(".to_string();
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("watchdog.process_pattern"));
    }

    #[test]
    fn test_validate_rejects_empty_drop_command() {
        let mut cfg = KeeperConfig::default();
        cfg.watchdog.drop_caches_command.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_signal_accepts_short_and_long_names() {
        let mut w = WatchdogConfig::default();
        assert_eq!(w.signal().unwrap(), Signal::SIGTERM);
        w.kill_signal = "kill".to_string();
        assert_eq!(w.signal().unwrap(), Signal::SIGKILL);
        w.kill_signal = "SIGBOGUS".to_string();
        assert!(w.signal().is_err());
    }
}
