/// Memory watchdog: poll memory usage, print a heartbeat, and escalate through
/// the remediation tiers when thresholds are crossed.
///
/// Each cycle runs to completion (sample, heartbeat, remediation) before the
/// next sleep starts. Cycles never overlap.
use crate::heartbeat::Heartbeat;
use crate::memory::{MemorySample, MemorySource};
use crate::remediation::{KillReport, Remediator};
use crate::status::{StatusTracker, WatchdogState};
use crate::tier::{classify, RemediationTier, Thresholds};
use std::future::Future;
use std::io::Write;
use std::time::{Duration, Instant};

/// Settings the loop needs beyond its collaborators.
#[derive(Debug, Clone)]
pub struct WatchdogSettings {
    pub thresholds: Thresholds,
    pub poll_interval: Duration,
    pub heartbeat_interval: Duration,
    /// Shown in log lines; matching itself lives in the remediator.
    pub process_pattern: String,
}

/// A remediation step and how it went, in the order it ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    DropCaches { ok: bool },
    Kill { report: Option<KillReport> },
}

/// What one cycle observed and did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub sample: Option<MemorySample>,
    pub tier: RemediationTier,
    pub heartbeat: bool,
    pub actions: Vec<Action>,
}

pub struct Watchdog<M, R, W> {
    source: M,
    remediator: R,
    out: W,
    settings: WatchdogSettings,
    heartbeat: Heartbeat,
    status: StatusTracker,
}

impl<M, R, W> Watchdog<M, R, W>
where
    M: MemorySource,
    R: Remediator,
    W: Write,
{
    pub fn new(
        source: M,
        remediator: R,
        out: W,
        settings: WatchdogSettings,
        status: StatusTracker,
    ) -> Self {
        let heartbeat = Heartbeat::new(settings.heartbeat_interval);
        Self {
            source,
            remediator,
            out,
            settings,
            heartbeat,
            status,
        }
    }

    /// Write one timestamped, user-facing line. Output errors never stop the watchdog.
    fn say(&mut self, message: &str) {
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        let _ = writeln!(self.out, "{timestamp}: {message}");
        let _ = self.out.flush();
    }

    /// Run a single poll cycle. `now` drives the heartbeat gate.
    pub async fn run_cycle(&mut self, now: Instant) -> CycleReport {
        let sample = match self.source.sample() {
            Ok(sample) => sample,
            Err(e) => {
                tracing::warn!(error = %e, "memory sample failed, skipping cycle");
                self.say(&format!("Failed to read memory usage: {e}"));
                self.status.record_failed_sample();
                self.status.update(WatchdogState::SampleFailed);
                return CycleReport {
                    sample: None,
                    tier: RemediationTier::None,
                    heartbeat: false,
                    actions: Vec::new(),
                };
            }
        };

        let pct = sample.used_percent;
        let tier = classify(&sample, self.settings.thresholds);
        tracing::debug!(used_percent = pct, ?tier, "memory sampled");

        let heartbeat = self.heartbeat.due(now);
        if heartbeat {
            self.say(&format!("Memory usage: {pct}%"));
            self.status.set_last_heartbeat();
        }

        let mut actions = Vec::new();

        // Cumulative tiers: above the emergency threshold this block runs too,
        // so the cache is dropped twice in that cycle.
        if tier.clears_cache() {
            let threshold = self.settings.thresholds.cache_clear;
            self.say(&format!(
                "WARNING: Memory usage above {threshold}% ({pct}%), clearing caches"
            ));
            actions.push(self.drop_caches().await);
        }

        if tier.kills_processes() {
            let threshold = self.settings.thresholds.emergency;
            let pattern = self.settings.process_pattern.clone();
            self.say(&format!(
                "CRITICAL: Memory usage above {threshold}% ({pct}%), killing processes matching '{pattern}' and clearing caches"
            ));
            actions.push(self.kill_matching().await);
            actions.push(self.drop_caches().await);
        }

        self.status.record_sample(pct, tier);
        self.status.update(tier.into());

        CycleReport {
            sample: Some(sample),
            tier,
            heartbeat,
            actions,
        }
    }

    async fn drop_caches(&mut self) -> Action {
        match self.remediator.drop_caches().await {
            Ok(()) => {
                self.say("Page cache dropped");
                Action::DropCaches { ok: true }
            }
            Err(e) => {
                tracing::warn!(error = %e, "page cache drop failed");
                self.say(&format!("Page cache drop failed: {e}"));
                Action::DropCaches { ok: false }
            }
        }
    }

    async fn kill_matching(&mut self) -> Action {
        match self.remediator.kill_matching().await {
            Ok(report) => {
                if report.matched == 0 {
                    let pattern = self.settings.process_pattern.clone();
                    self.say(&format!("No processes matched '{pattern}'"));
                } else if report.failed == 0 {
                    self.say(&format!(
                        "Signalled {} of {} matching processes",
                        report.signalled, report.matched
                    ));
                } else {
                    self.say(&format!(
                        "Signalled {} of {} matching processes ({} failed)",
                        report.signalled, report.matched, report.failed
                    ));
                }
                Action::Kill {
                    report: Some(report),
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "process kill failed");
                self.say(&format!("Process kill failed: {e}"));
                Action::Kill { report: None }
            }
        }
    }

    /// Poll until `shutdown` resolves. Returns the number of cycles run.
    ///
    /// Shutdown is only noticed while sleeping between cycles.
    pub async fn run<F>(mut self, shutdown: F) -> u64
    where
        F: Future<Output = &'static str>,
    {
        let t = self.settings.thresholds;
        let message = format!(
            "Starting memory monitor (pattern '{}', cache clear >{}%, emergency >{}%, every {}s)",
            self.settings.process_pattern,
            t.cache_clear,
            t.emergency,
            self.settings.poll_interval.as_secs()
        );
        self.say(&message);
        tracing::info!(
            poll_interval_secs = self.settings.poll_interval.as_secs(),
            heartbeat_interval_secs = self.settings.heartbeat_interval.as_secs(),
            "watchdog started"
        );
        self.status.update(WatchdogState::Starting);

        tokio::pin!(shutdown);
        let mut cycles = 0u64;
        loop {
            self.run_cycle(Instant::now()).await;
            cycles += 1;

            tokio::select! {
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
                signal = &mut shutdown => {
                    self.say(&format!("Received {signal}, stopping memory monitor"));
                    tracing::info!(cycles, "watchdog stopped");
                    break;
                }
            }
        }

        self.status.remove();
        cycles
    }
}
