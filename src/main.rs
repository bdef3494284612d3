mod config;
mod git;
mod heartbeat;
mod memory;
mod output;
mod remediation;
mod signals;
mod status;
mod sync;
mod tier;
mod watchdog;

use clap::{Parser, Subcommand};
use config::KeeperConfig;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

/// Workstation keeper for a WSL2 dev box: a memory watchdog that escalates from
/// cache drops to killing a runaway process, and a check that pushes commits
/// left sitting on the current branch.
#[derive(Parser, Debug)]
#[command(name = "devkeeper", version, about)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "devkeeper.toml", global = true)]
    config: PathBuf,

    /// Extra logging (samples, git invocations, matched pids)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only warnings and errors from the diagnostic log
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll memory usage and remediate above the thresholds
    Watch {
        /// Run a single cycle and exit
        #[arg(long)]
        once: bool,

        /// Poll interval in seconds (overrides config)
        #[arg(long)]
        interval: Option<u64>,

        /// Process command-line regex to kill in an emergency (overrides config)
        #[arg(long)]
        pattern: Option<String>,
    },
    /// Push unpushed commits on the current branch, if any
    SyncCheck {
        /// Repository directory (default: current directory)
        #[arg(long)]
        repo: Option<PathBuf>,

        /// Report what would be pushed without pushing
        #[arg(long)]
        dry_run: bool,

        /// Disable colored output
        #[arg(long)]
        no_color: bool,
    },
    /// Validate config and print resolved settings, don't run
    Config,
}

fn init_tracing(verbose: bool, quiet: bool) {
    let default = if verbose {
        "devkeeper=debug"
    } else if quiet {
        "warn"
    } else {
        "devkeeper=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));

    // User-facing lines go to stdout; diagnostics stay on stderr.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Load the config file and fold CLI overrides into it.
fn resolve_config(cli: &Cli) -> Result<KeeperConfig, config::ConfigError> {
    let mut cfg = config::load_config(&cli.config)?;
    if let Command::Watch {
        interval, pattern, ..
    } = &cli.command
    {
        if let Some(secs) = interval {
            cfg.watchdog.poll_interval_secs = *secs;
        }
        if let Some(p) = pattern {
            cfg.watchdog.process_pattern = p.clone();
        }
    }
    cfg.validate()?;
    Ok(cfg)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);
    tracing::debug!(?cli, "parsed CLI arguments");

    let cfg = match resolve_config(&cli) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("devkeeper: {e}");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Command::Watch { once, .. } => run_watch(&cfg, once).await,
        Command::SyncCheck {
            repo,
            dry_run,
            no_color,
        } => run_sync_check(&cfg, repo, dry_run, no_color),
        Command::Config => print_config(&cli.config, &cfg),
    }
}

fn print_config(path: &std::path::Path, cfg: &KeeperConfig) -> ExitCode {
    match toml::to_string_pretty(cfg) {
        Ok(text) => {
            println!("# resolved from {}", path.display());
            print!("{text}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("devkeeper: failed to render config: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run_watch(cfg: &KeeperConfig, once: bool) -> ExitCode {
    let w = &cfg.watchdog;
    let remediator = match remediation::SystemRemediator::from_config(w) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("devkeeper: {e}");
            return ExitCode::FAILURE;
        }
    };
    let source = memory::SysinfoSource::new();

    let settings = watchdog::WatchdogSettings {
        thresholds: tier::Thresholds {
            cache_clear: w.cache_clear_percent,
            emergency: w.emergency_percent,
        },
        poll_interval: w.poll_interval(),
        heartbeat_interval: w.heartbeat_interval(),
        process_pattern: w.process_pattern.clone(),
    };
    let status = status::StatusTracker::new(w.status_file.clone());
    let mut wd = watchdog::Watchdog::new(source, remediator, std::io::stdout(), settings, status);

    if once {
        let report = wd.run_cycle(Instant::now()).await;
        let failed = report
            .actions
            .iter()
            .filter(|a| {
                matches!(
                    a,
                    watchdog::Action::DropCaches { ok: false } | watchdog::Action::Kill { report: None }
                )
            })
            .count();
        tracing::info!(
            tier = ?report.tier,
            heartbeat = report.heartbeat,
            actions = report.actions.len(),
            failed,
            "single cycle complete"
        );
        return ExitCode::from(once_exit_status(&report));
    }

    let mut signals = match signals::SignalHandler::install() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("devkeeper: failed to install signal handlers: {e}");
            return ExitCode::FAILURE;
        }
    };
    wd.run(signals.recv()).await;
    ExitCode::SUCCESS
}

/// Exit status of `watch --once`. Only an unreadable sample fails a one-shot
/// run; remediation stays best-effort.
fn once_exit_status(report: &watchdog::CycleReport) -> u8 {
    if report.sample.is_some() {
        0
    } else {
        1
    }
}

fn run_sync_check(
    cfg: &KeeperConfig,
    repo: Option<PathBuf>,
    dry_run: bool,
    no_color: bool,
) -> ExitCode {
    let dir = repo.unwrap_or_else(|| PathBuf::from("."));
    let vcs = git::GitCli::new(dir);
    let options = sync::SyncOptions {
        default_remote: cfg.sync.default_remote.clone(),
        dry_run,
    };
    let stdout = std::io::stdout();
    let color = !no_color && stdout.is_terminal();
    let mut reporter = output::Reporter::new(stdout.lock(), color);

    match sync::reconcile(&vcs, &options, &mut reporter) {
        Ok(outcome) => {
            tracing::debug!(?outcome, "sync check finished");
            ExitCode::from(outcome.exit_code() as u8)
        }
        Err(e) => {
            tracing::error!(error = %e, "sync check failed");
            ExitCode::FAILURE
        }
    }
}
