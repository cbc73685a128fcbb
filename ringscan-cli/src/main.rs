use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use colored::Colorize;
use ringscan::{
    CancelReason, ConfigOverrides, EventSink, RunSummary, ScanConfig, ScanEvent, WorkerRole,
};
use std::io::{self, IsTerminal, Write};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use tracing_subscriber::{fmt, prelude::*, reload, EnvFilter, Registry};

type FilterHandle = reload::Handle<EnvFilter, Registry>;

/// How long workers get to stop after the deadline before the process exits
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (YAML, any extension)
    config: PathBuf,

    /// Number of producer threads
    #[arg(short = 'p', long)]
    producers: Option<NonZeroUsize>,

    /// Number of consumer threads
    #[arg(short = 'c', long)]
    consumers: Option<NonZeroUsize>,

    /// Ring buffer slots, one of which is always kept free
    #[arg(short = 's', long)]
    capacity: Option<usize>,

    /// Cancel the run after this long (e.g. 30s, 2m)
    #[arg(short = 't', long, value_parser = humantime::parse_duration)]
    deadline: Option<Duration>,

    /// Report slot activity and worker lifecycle, not only matches
    #[arg(short, long)]
    verbose: bool,

    /// Log filter (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Summary printed after the run
    #[arg(long, value_enum, default_value_t = SummaryFormat::None)]
    summary: SummaryFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SummaryFormat {
    None,
    Text,
    Json,
}

/// Prints scan events to stdout
struct ConsoleSink;

impl EventSink for ConsoleSink {
    fn emit(&self, event: ScanEvent) {
        let mut out = io::stdout().lock();
        // A closed stdout must not take the workers down with it
        let _ = write_event(&mut out, &event);
    }
}

fn write_event(out: &mut impl Write, event: &ScanEvent) -> io::Result<()> {
    match event {
        ScanEvent::WorkerStarted { role, id } => {
            writeln!(out, "{} {}: I have been created", role_label(*role), id)
        }
        ScanEvent::WorkerFinished { role, id } => {
            writeln!(out, "{} {}: I am done", role_label(*role), id)
        }
        ScanEvent::Produced { slot, .. } => {
            writeln!(out, "{}: producing at index {}", "PRODUCER".blue(), slot)
        }
        ScanEvent::Consuming { slot, .. } => {
            writeln!(out, "{}: consuming at index {}", "CONSUMER".magenta(), slot)
        }
        ScanEvent::Matched(report) => {
            writeln!(
                out,
                "{}: Found at index: {}",
                "CONSUMER".green().bold(),
                report.slot
            )?;
            writeln!(out, "{}", report.line)
        }
        ScanEvent::Cancelled(reason) => {
            let message = match reason {
                CancelReason::Interrupt => "received an interrupt - cancelling all workers",
                CancelReason::Deadline => "deadline reached - cancelling all workers",
                CancelReason::Requested => "cancelling all workers",
            };
            writeln!(out, "{}", message.yellow())
        }
    }
}

fn role_label(role: WorkerRole) -> colored::ColoredString {
    match role {
        WorkerRole::Producer => "PRODUCER".blue(),
        WorkerRole::Consumer => "CONSUMER".magenta(),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if !io::stdout().is_terminal() {
        colored::control::set_override(false);
    }

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let filter = init_logging(cli.log_level.as_deref())?;

    let overrides = ConfigOverrides {
        producer_count: cli.producers,
        consumer_count: cli.consumers,
        capacity: cli.capacity,
        deadline: cli.deadline,
        verbose: cli.verbose,
        log_level: cli.log_level.clone(),
    };
    let config = ScanConfig::load_from(Some(&cli.config))
        .with_context(|| format!("Failed to load {}", cli.config.display()))?
        .merge_with_cli(&overrides);

    // The file's level applies unless the environment or the CLI chose one
    if cli.log_level.is_none() && std::env::var_os(EnvFilter::DEFAULT_ENV).is_none() {
        let level = EnvFilter::try_new(&config.log_level)
            .with_context(|| format!("Invalid log_level '{}'", config.log_level))?;
        filter.reload(level)?;
    }
    debug!("Effective configuration: {:?}", config);

    if cli.print_config {
        print!("{}", config.to_yaml()?);
        return Ok(());
    }

    if let Some(deadline) = config.deadline() {
        spawn_watchdog(watchdog_limit(deadline));
    }
    let summary = ringscan::run(&config, Arc::new(ConsoleSink))
        .with_context(|| format!("Scan of {} failed", config.source_path.display()))?;
    print_summary(&summary, cli.summary)
}

/// Saturates, since `nk` may be any `u64`
fn watchdog_limit(deadline: Duration) -> Duration {
    deadline.saturating_add(SHUTDOWN_GRACE)
}

/// Exits the process if the run outlives `limit`, which only happens when a
/// source read blocks while holding the buffer lock. The thread dies with
/// the process on a normal exit.
fn spawn_watchdog(limit: Duration) {
    let spawned = std::thread::Builder::new()
        .name("ringscan-watchdog".to_string())
        .spawn(move || {
            std::thread::sleep(limit);
            eprintln!(
                "{} workers did not stop within {} of the deadline, exiting",
                "Error:".red().bold(),
                humantime::format_duration(SHUTDOWN_GRACE)
            );
            std::process::exit(1);
        });
    if let Err(e) = spawned {
        warn!("Could not start the shutdown watchdog: {}", e);
    }
}

/// Installs the stderr subscriber. Returns a handle for swapping in the
/// config file's level once it is known.
fn init_logging(cli_level: Option<&str>) -> Result<FilterHandle> {
    let filter = match cli_level {
        Some(level) => EnvFilter::try_new(level)
            .with_context(|| format!("Invalid log level '{}'", level))?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };
    let (filter, handle) = reload::Layer::new(filter);

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr).with_target(false))
        .try_init();
    Ok(handle)
}

fn print_summary(summary: &RunSummary, format: SummaryFormat) -> Result<()> {
    match format {
        SummaryFormat::None => {}
        SummaryFormat::Text => {
            let line = summary.to_string();
            if summary.is_complete() {
                println!("{}", line.bold());
            } else {
                println!("{}", line.yellow());
            }
        }
        SummaryFormat::Json => println!("{}", summary.to_json()?),
    }
    Ok(())
}
