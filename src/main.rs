use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use color_eyre::eyre::WrapErr;
use procfeed::aggregate::Aggregator;
use procfeed::config::{self, Config, load_config, load_config_from_path};
use procfeed::hub::SubscriptionHub;
use procfeed::probe::ProbeAdapter;
use procfeed::server;
use procfeed::system::collector::Collector;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "procfeed",
    about = "Streams per-application process telemetry to WebSocket viewers"
)]
struct Cli {
    /// Path to config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Address to listen on, e.g. 127.0.0.1:8080
    #[arg(long, global = true)]
    bind: Option<String>,

    /// Publish interval in milliseconds
    #[arg(long, global = true)]
    interval_ms: Option<u64>,

    /// Polling mode: shared, per_session
    #[arg(long, global = true)]
    poll_mode: Option<String>,

    /// Logging filter (trace, debug, info, warn, error or an EnvFilter directive)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the live feed (default).
    Serve,
    /// Sample the process table once and print it as JSON.
    Probe,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    // stdout belongs to the probe document, so logs always go to stderr.
    let filter = EnvFilter::try_new(&cli.log_level)
        .wrap_err_with(|| format!("invalid log level: {}", cli.log_level))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Some(Command::Probe) => run_probe(),
        Some(Command::Serve) | None => run(load_config_for_cli(&cli)).await,
    }
}

fn run_probe() -> Result<()> {
    let snapshot = Collector::new().sample();
    let mut out = std::io::stdout().lock();
    serde_json::to_writer(&mut out, &snapshot)?;
    writeln!(out)?;
    out.flush()?;
    Ok(())
}

async fn run(config: Config) -> Result<()> {
    let command = config
        .probe_command()
        .wrap_err("resolving probe command")?;
    let adapter = ProbeAdapter::new(command, config.probe_timeout());
    let stats = adapter.stats();
    let aggregator = Aggregator::new(&config.apps.allow_list);
    let settings = config.hub_settings();

    let listener = TcpListener::bind(&config.server.bind)
        .await
        .wrap_err_with(|| format!("binding {}", config.server.bind))?;

    tracing::info!(
        addr = %listener.local_addr()?,
        interval_ms = settings.interval.as_millis() as u64,
        mode = settings.mode.label(),
        probe_timeout_ms = adapter.timeout().as_millis() as u64,
        tracked_apps = aggregator.allow_list_len(),
        "procfeed listening"
    );

    let hub = Arc::new(SubscriptionHub::new(adapter, aggregator, settings));
    server::serve(
        listener,
        hub,
        config.server.channel_capacity,
        shutdown_signal(),
    )
    .await;

    let counters = stats.counters();
    tracing::info!(
        successes = counters.successes,
        timeouts = counters.timeouts,
        non_zero_exits = counters.non_zero_exits,
        malformed_outputs = counters.malformed_outputs,
        launch_failures = counters.launch_failures,
        io_failures = counters.io_failures,
        failures = counters.failures(),
        "procfeed stopped"
    );
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("received Ctrl-C, shutting down"),
        Err(err) => {
            tracing::error!("cannot listen for Ctrl-C: {err}");
            std::future::pending::<()>().await;
        }
    }
}

fn load_config_for_cli(cli: &Cli) -> Config {
    let mut config = match &cli.config {
        Some(path) => load_config_from_path(path),
        None => load_config(),
    };

    if let Some(ref bind) = cli.bind {
        config.server.bind = bind.clone();
    }
    if let Some(interval) = cli.interval_ms {
        config.general.publish_interval_ms = interval;
    }
    if let Some(ref mode) = cli.poll_mode {
        config.general.poll_mode = mode.clone();
    }
    if cli.config.is_none() && config::config_path().is_none() {
        tracing::debug!("no config directory on this platform, using defaults");
    }

    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_flags_parse_after_subcommand() {
        let cli = Cli::try_parse_from([
            "procfeed",
            "serve",
            "--bind",
            "0.0.0.0:9000",
            "--interval-ms",
            "1000",
            "--poll-mode",
            "per_session",
        ])
        .unwrap();
        assert!(matches!(cli.command, Some(Command::Serve)));
        assert_eq!(cli.bind.as_deref(), Some("0.0.0.0:9000"));
        assert_eq!(cli.interval_ms, Some(1000));
        assert_eq!(cli.poll_mode.as_deref(), Some("per_session"));
    }

    #[test]
    fn serve_flags_parse_without_subcommand() {
        let cli = Cli::try_parse_from(["procfeed", "--bind", "127.0.0.1:9001"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.bind.as_deref(), Some("127.0.0.1:9001"));
    }

    #[test]
    fn cli_flags_override_config() {
        let cli = Cli::try_parse_from([
            "procfeed",
            "--config",
            "/nonexistent/procfeed.toml",
            "serve",
            "--bind",
            "0.0.0.0:9000",
            "--interval-ms",
            "500",
        ])
        .unwrap();
        let config = load_config_for_cli(&cli);
        assert_eq!(config.server.bind, "0.0.0.0:9000");
        assert_eq!(config.general.publish_interval_ms, 500);
    }
}
