/// Status file: the watchdog writes a JSON snapshot after every cycle so other
/// tools can see what it last observed.
///
/// Uses atomic write pattern: write to temp file then rename.
use crate::tier::RemediationTier;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Watchdog states written to the status file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchdogState {
    Starting,
    Monitoring,
    CacheClear,
    Emergency,
    SampleFailed,
}

impl From<RemediationTier> for WatchdogState {
    fn from(tier: RemediationTier) -> Self {
        match tier {
            RemediationTier::None => WatchdogState::Monitoring,
            RemediationTier::CacheClear => WatchdogState::CacheClear,
            RemediationTier::Emergency => WatchdogState::Emergency,
        }
    }
}

/// The JSON payload written to the status file.
#[derive(Debug, Clone, Serialize)]
pub struct StatusData {
    pub pid: u32,
    pub state: WatchdogState,
    pub cycles: u64,
    pub used_percent: Option<u8>,
    pub tier: Option<RemediationTier>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub last_update: DateTime<Utc>,
}

/// Manages the status file lifecycle.
pub struct StatusFile {
    path: PathBuf,
}

impl StatusFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Atomically write status data to the status file.
    ///
    /// Writes to a temporary file in the same directory, then renames
    /// to ensure readers never see a partial write.
    pub fn write(&self, data: &StatusData) -> Result<(), StatusError> {
        let json =
            serde_json::to_string_pretty(data).map_err(|e| StatusError::Serialize { source: e })?;

        let dir = self.path.parent().unwrap_or(Path::new("."));
        let tmp_path = dir.join(format!(".devkeeper.status.tmp.{}", std::process::id()));

        std::fs::write(&tmp_path, json.as_bytes()).map_err(|e| StatusError::Write {
            path: tmp_path.clone(),
            source: e,
        })?;

        std::fs::rename(&tmp_path, &self.path).map_err(|e| StatusError::Rename {
            from: tmp_path,
            to: self.path.clone(),
            source: e,
        })?;

        Ok(())
    }

    /// Remove the status file (on clean shutdown).
    pub fn remove(&self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Mutable state tracker that builds StatusData for each update.
///
/// With no path configured every call is a no-op.
pub struct StatusTracker {
    file: Option<StatusFile>,
    pid: u32,
    cycles: u64,
    used_percent: Option<u8>,
    tier: Option<RemediationTier>,
    last_heartbeat: Option<DateTime<Utc>>,
}

impl StatusTracker {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            file: path.map(StatusFile::new),
            pid: std::process::id(),
            cycles: 0,
            used_percent: None,
            tier: None,
            last_heartbeat: None,
        }
    }

    /// Update and write the status file with the given state.
    pub fn update(&self, state: WatchdogState) {
        let Some(file) = &self.file else {
            return;
        };
        let data = StatusData {
            pid: self.pid,
            state,
            cycles: self.cycles,
            used_percent: self.used_percent,
            tier: self.tier,
            last_heartbeat: self.last_heartbeat,
            last_update: Utc::now(),
        };

        if let Err(e) = file.write(&data) {
            tracing::warn!(error = %e, "failed to write status file");
        }
    }

    /// Record a completed sample and its tier.
    pub fn record_sample(&mut self, used_percent: u8, tier: RemediationTier) {
        self.cycles += 1;
        self.used_percent = Some(used_percent);
        self.tier = Some(tier);
    }

    /// Record a cycle whose sample could not be read.
    pub fn record_failed_sample(&mut self) {
        self.cycles += 1;
    }

    pub fn set_last_heartbeat(&mut self) {
        self.last_heartbeat = Some(Utc::now());
    }

    pub fn remove(&self) {
        if let Some(file) = &self.file {
            file.remove();
        }
    }
}

/// Errors from status file operations.
#[derive(Debug)]
pub enum StatusError {
    Serialize {
        source: serde_json::Error,
    },
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    Rename {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

impl std::fmt::Display for StatusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatusError::Serialize { source } => write!(f, "failed to serialize status: {source}"),
            StatusError::Write { path, source } => {
                write!(
                    f,
                    "failed to write temp status file {}: {source}",
                    path.display()
                )
            }
            StatusError::Rename { from, to, source } => {
                write!(
                    f,
                    "failed to rename {} -> {}: {source}",
                    from.display(),
                    to.display()
                )
            }
        }
    }
}

impl std::error::Error for StatusError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StatusError::Serialize { source } => Some(source),
            StatusError::Write { source, .. } => Some(source),
            StatusError::Rename { source, .. } => Some(source),
        }
    }
}
