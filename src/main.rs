use std::path::PathBuf;

use appwatch::config::{Config, ConfigError, load_config};
use appwatch::format::{format_bytes, format_percent};
use appwatch::logging;
use appwatch::monitor::Monitor;
use appwatch::system::snapshot::Snapshot;
use clap::{Parser, Subcommand};
use color_eyre::Result;
use color_eyre::eyre::{WrapErr, eyre};

#[derive(Parser)]
#[command(
    name = "appwatch",
    about = "Headless monitor for running processes and installed applications"
)]
struct Cli {
    /// Path to config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Refresh rate in milliseconds
    #[arg(long)]
    refresh_rate: Option<u64>,

    /// Emit logs as JSON lines on stderr.
    #[arg(long, default_value_t = false)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one refresh and print the snapshot as JSON.
    Snapshot,
    /// Print a summary of every published snapshot.
    Watch {
        /// Stop after this many snapshots (0 runs until interrupted).
        #[arg(long, default_value_t = 0)]
        ticks: u64,

        /// Processes listed per snapshot, busiest first.
        #[arg(long, default_value_t = 5)]
        top: usize,
    },
    /// Ask a process to exit (SIGTERM).
    Terminate { pid: u32 },
    /// Kill a process immediately (SIGKILL).
    ForceKill { pid: u32 },
    /// Move an application bundle to the trash.
    Uninstall { path: PathBuf },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();
    let (config, config_error) = load_config_for_cli(&cli);
    logging::init_tracing(&config.general.log_level, cli.json_logs)?;
    if let Some(err) = config_error {
        tracing::warn!(%err, "invalid config, using defaults");
    }

    let monitor = Monitor::new(&config);
    match cli.command {
        Command::Snapshot => {
            monitor.refresh().await;
            println!("{}", serde_json::to_string_pretty(&monitor.snapshot())?);
        }
        Command::Watch { ticks, top } => watch(&monitor, ticks, top).await?,
        Command::Terminate { pid } => {
            monitor.refresh().await;
            let snapshot = monitor.snapshot();
            let process = snapshot
                .process(pid)
                .ok_or_else(|| eyre!("PID {pid} is not a listed process"))?;
            monitor.terminate(process)?;
            println!("Sent SIGTERM to {} ({pid})", process.name);
        }
        Command::ForceKill { pid } => {
            monitor.refresh().await;
            let snapshot = monitor.snapshot();
            let process = snapshot
                .process(pid)
                .ok_or_else(|| eyre!("PID {pid} is not a listed process"))?;
            monitor.force_kill(process)?;
            println!("Sent SIGKILL to {} ({pid})", process.name);
        }
        Command::Uninstall { path } => {
            let path = std::fs::canonicalize(&path)
                .wrap_err_with(|| format!("cannot resolve {}", path.display()))?;
            monitor.refresh().await;
            let snapshot = monitor.snapshot();
            let app = snapshot
                .application_at(&path)
                .ok_or_else(|| eyre!("{} is not a listed application", path.display()))?;
            let destination = monitor.uninstall(app).await?;
            println!("Moved {} to {}", app.name, destination.display());
        }
    }

    Ok(())
}

async fn watch(monitor: &Monitor, ticks: u64, top: usize) -> Result<()> {
    let mut updates = monitor.subscribe();
    monitor.start();

    let mut seen = 0u64;
    let mut last_generation = 0u64;
    while updates.changed().await.is_ok() {
        let snapshot = updates.borrow_and_update().clone();
        if snapshot.loading || snapshot.generation == last_generation {
            continue;
        }
        last_generation = snapshot.generation;
        print_summary(&snapshot, top);

        seen += 1;
        if ticks != 0 && seen >= ticks {
            break;
        }
    }

    monitor.shutdown().await;
    Ok(())
}

fn print_summary(snapshot: &Snapshot, top: usize) {
    let running = snapshot.applications.iter().filter(|a| a.is_running).count();
    let installed: u64 = snapshot.applications.iter().map(|a| a.size_bytes).sum();
    println!(
        "#{} {} processes, {} applications ({} running, {} on disk)",
        snapshot.generation,
        snapshot.processes.len(),
        snapshot.applications.len(),
        running,
        format_bytes(installed)
    );

    let mut busiest: Vec<_> = snapshot.processes.iter().collect();
    busiest.sort_by(|a, b| b.cpu_percent.total_cmp(&a.cpu_percent));
    for p in busiest.into_iter().take(top) {
        println!(
            "  {:>7} {:>6} {:>9}  {}",
            p.pid,
            format_percent(p.cpu_percent),
            format_bytes(p.memory_bytes),
            p.name
        );
    }
}

fn load_config_for_cli(cli: &Cli) -> (Config, Option<ConfigError>) {
    let (mut config, error) = load_config(cli.config.as_deref());

    if let Some(rate) = cli.refresh_rate {
        config.general.refresh_interval_ms = rate;
    }

    (config, error)
}
