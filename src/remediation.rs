/// Remediation actions the watchdog can take: page-cache reclaim and
/// terminating runaway processes by command-line pattern.
///
/// Both are best-effort. They report what happened through typed results; the
/// watchdog logs failures and moves on, and the next cycle acts as the retry.
use crate::config::WatchdogConfig;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use regex::Regex;
use std::collections::HashSet;
use std::process::Stdio;
use std::time::Duration;
use sysinfo::{Pid as SysPid, System};
use tokio::process::Command;

/// Outcome of a pattern kill. Zero matches is a success.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KillReport {
    pub matched: usize,
    pub signalled: usize,
    pub failed: usize,
}

/// Side effects the watchdog performs when a tier trips.
pub trait Remediator {
    /// Ask the kernel to reclaim its page cache.
    async fn drop_caches(&mut self) -> Result<(), RemediationError>;

    /// Signal every process whose command line matches the configured pattern.
    async fn kill_matching(&mut self) -> Result<KillReport, RemediationError>;
}

/// Remediator backed by the real system: a privileged shell command for the
/// cache drop and `kill(2)` for processes enumerated by `sysinfo`.
pub struct SystemRemediator {
    drop_caches_command: Vec<String>,
    pattern: Regex,
    signal: Signal,
    timeout: Duration,
}

impl SystemRemediator {
    pub fn new(
        drop_caches_command: Vec<String>,
        pattern: Regex,
        signal: Signal,
        timeout: Duration,
    ) -> Self {
        Self {
            drop_caches_command,
            pattern,
            signal,
            timeout,
        }
    }

    /// Build from validated config. Fails only if the config was never validated.
    pub fn from_config(config: &WatchdogConfig) -> Result<Self, crate::config::ConfigError> {
        Ok(Self::new(
            config.drop_caches_command.clone(),
            config.pattern()?,
            config.signal()?,
            config.remediation_timeout(),
        ))
    }
}

impl Remediator for SystemRemediator {
    async fn drop_caches(&mut self) -> Result<(), RemediationError> {
        let (program, args) = self
            .drop_caches_command
            .split_first()
            .ok_or(RemediationError::EmptyCommand)?;

        tracing::debug!(command = %program, args = ?args, "dropping page cache");

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RemediationError::Spawn {
                command: program.clone(),
                source: e,
            })?;

        let status = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                return Err(RemediationError::Spawn {
                    command: program.clone(),
                    source: e,
                })
            }
            Err(_) => {
                // kill_on_drop reaps it, but be explicit so the slot is freed now.
                let _ = child.start_kill();
                return Err(RemediationError::TimedOut {
                    command: program.clone(),
                    after: self.timeout,
                });
            }
        };

        if status.success() {
            Ok(())
        } else {
            Err(RemediationError::Failed {
                command: program.clone(),
                exit_code: status.code(),
            })
        }
    }

    async fn kill_matching(&mut self) -> Result<KillReport, RemediationError> {
        let own_pid = std::process::id() as i32;
        let pids = matching_pids(scan_processes(), &self.pattern, own_pid);

        let mut report = KillReport {
            matched: pids.len(),
            ..Default::default()
        };
        for pid in pids {
            match kill(Pid::from_raw(pid), self.signal) {
                Ok(()) => {
                    tracing::debug!(pid, signal = ?self.signal, "signalled process");
                    report.signalled += 1;
                }
                Err(errno) => {
                    // ESRCH here just means it exited between the scan and the signal.
                    tracing::warn!(pid, error = %errno, "failed to signal process");
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }
}

/// A process as seen by the kill scan: its pid and its command line with
/// arguments joined by spaces, the same view `pkill -f` uses.
#[derive(Debug, Clone)]
struct Candidate {
    pid: i32,
    cmdline: String,
}

/// Enumerate live processes through `sysinfo`.
///
/// On Linux `sysinfo` lists every thread as well. A thread shares its
/// process's command line, so thread ids are dropped here and only the
/// owning process is offered.
fn scan_processes() -> Vec<Candidate> {
    let mut system = System::new();
    system.refresh_processes();

    let mut threads: HashSet<SysPid> = HashSet::new();
    for (pid, process) in system.processes() {
        if let Some(tasks) = process.tasks() {
            threads.extend(tasks.iter().filter(|tid| *tid != pid).copied());
        }
    }

    system
        .processes()
        .iter()
        .filter(|(pid, _)| !threads.contains(*pid))
        .map(|(pid, process)| Candidate {
            pid: pid.as_u32() as i32,
            cmdline: process.cmd().join(" "),
        })
        .collect()
}

/// Pick the processes whose command line matches `pattern`.
///
/// Kernel threads (empty command line) and `own_pid` are skipped. The result
/// is sorted.
fn matching_pids(
    candidates: impl IntoIterator<Item = Candidate>,
    pattern: &Regex,
    own_pid: i32,
) -> Vec<i32> {
    let mut pids: Vec<i32> = candidates
        .into_iter()
        .filter(|c| c.pid != own_pid && !c.cmdline.is_empty())
        .filter(|c| pattern.is_match(&c.cmdline))
        .inspect(|c| {
            tracing::debug!(pid = c.pid, cmdline = %c.cmdline, "process matches kill pattern")
        })
        .map(|c| c.pid)
        .collect();
    pids.sort_unstable();
    pids.dedup();
    pids
}

/// Errors from remediation actions.
#[derive(Debug)]
pub enum RemediationError {
    EmptyCommand,
    Spawn {
        command: String,
        source: std::io::Error,
    },
    Failed {
        command: String,
        exit_code: Option<i32>,
    },
    TimedOut {
        command: String,
        after: Duration,
    },
}

impl std::fmt::Display for RemediationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RemediationError::EmptyCommand => write!(f, "remediation command is empty"),
            RemediationError::Spawn { command, source } => {
                write!(f, "failed to run {command}: {source}")
            }
            RemediationError::Failed { command, exit_code } => match exit_code {
                Some(code) => write!(f, "{command} exited with status {code}"),
                None => write!(f, "{command} was killed by a signal"),
            },
            RemediationError::TimedOut { command, after } => {
                write!(f, "{command} timed out after {}s", after.as_secs())
            }
        }
    }
}

impl std::error::Error for RemediationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RemediationError::Spawn { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn remediator(command: &[&str], pattern: &str, timeout: Duration) -> SystemRemediator {
        SystemRemediator::new(
            command.iter().map(|s| s.to_string()).collect(),
            Regex::new(pattern).unwrap(),
            Signal::SIGTERM,
            timeout,
        )
    }

    fn candidates(entries: &[(i32, &str)]) -> Vec<Candidate> {
        entries
            .iter()
            .map(|(pid, cmdline)| Candidate {
                pid: *pid,
                cmdline: cmdline.to_string(),
            })
            .collect()
    }

    /// Kills and reaps the child when dropped, so a failed assertion does not
    /// leave it running.
    struct ChildGuard(std::process::Child);

    impl Drop for ChildGuard {
        fn drop(&mut self) {
            let _ = self.0.kill();
            let _ = self.0.wait();
        }
    }

    /// Block until the child has exec'd, i.e. its cmdline is no longer the
    /// forked test binary's.
    fn wait_for_exec(pid: u32, program: &str) {
        let path = format!("/proc/{pid}/cmdline");
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if let Ok(raw) = std::fs::read(&path) {
                if raw.split(|b| *b == 0).next() == Some(program.as_bytes()) {
                    return;
                }
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("pid {pid} never exec'd {program}");
    }

    #[test]
    fn test_matching_pids_uses_full_command_line() {
        let found = matching_pids(
            candidates(&[
                (101, "node /usr/lib/claude/cli.js --verbose"),
                (102, "bash -l"),
                (103, "/usr/bin/claude"),
            ]),
            &Regex::new("claude").unwrap(),
            1,
        );
        assert_eq!(found, vec![101, 103]);
    }

    #[test]
    fn test_matching_pids_skips_self() {
        let found = matching_pids(
            candidates(&[(201, "claude"), (200, "claude")]),
            &Regex::new("claude").unwrap(),
            200,
        );
        assert_eq!(found, vec![201]);
    }

    #[test]
    fn test_matching_pids_skips_kernel_threads() {
        let found = matching_pids(candidates(&[(2, "")]), &Regex::new(".*").unwrap(), 1);
        assert!(found.is_empty());
    }

    #[test]
    fn test_scan_excludes_own_threads() {
        // The test harness runs on several threads; none of them may show up
        // as a separate process under our own command line.
        let own = std::process::id() as i32;
        let own_cmdline = std::env::args().collect::<Vec<_>>().join(" ");
        let clones = scan_processes()
            .into_iter()
            .filter(|c| c.pid != own && c.cmdline == own_cmdline)
            .count();
        assert_eq!(clones, 0);
    }

    #[tokio::test]
    async fn test_kill_matching_no_matches_is_success() {
        let mut r = remediator(&["true"], "^definitely-not-running-xyz$", Duration::from_secs(5));
        let report = r.kill_matching().await.unwrap();
        assert_eq!(report, KillReport::default());
    }

    #[tokio::test]
    async fn test_kill_matching_terminates_real_process() {
        let mut child = ChildGuard(
            std::process::Command::new("sleep")
                .arg("31.4159")
                .spawn()
                .unwrap(),
        );
        wait_for_exec(child.0.id(), "sleep");

        let mut r = remediator(&["true"], r"^sleep 31\.4159$", Duration::from_secs(5));
        let report = r.kill_matching().await.unwrap();
        assert_eq!(report.matched, 1);
        assert_eq!(report.signalled, 1);

        let status = child.0.wait().unwrap();
        assert!(!status.success());
    }

    #[tokio::test]
    async fn test_drop_caches_success() {
        let mut r = remediator(&["true"], "x", Duration::from_secs(5));
        assert!(r.drop_caches().await.is_ok());
    }

    #[tokio::test]
    async fn test_drop_caches_nonzero_exit() {
        let mut r = remediator(&["sh", "-c", "exit 3"], "x", Duration::from_secs(5));
        let err = r.drop_caches().await.unwrap_err();
        assert!(matches!(
            err,
            RemediationError::Failed {
                exit_code: Some(3),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_drop_caches_missing_binary() {
        let mut r = remediator(&["nonexistent-binary-xyz"], "x", Duration::from_secs(5));
        let err = r.drop_caches().await.unwrap_err();
        assert!(matches!(err, RemediationError::Spawn { .. }));
        assert!(err.to_string().contains("nonexistent-binary-xyz"));
    }

    #[tokio::test]
    async fn test_drop_caches_times_out() {
        let mut r = remediator(&["sleep", "5"], "x", Duration::from_millis(100));
        let err = r.drop_caches().await.unwrap_err();
        assert!(matches!(err, RemediationError::TimedOut { .. }));
    }

    #[tokio::test]
    async fn test_drop_caches_empty_command() {
        let mut r = remediator(&[], "x", Duration::from_secs(5));
        assert!(matches!(
            r.drop_caches().await,
            Err(RemediationError::EmptyCommand)
        ));
    }
}
