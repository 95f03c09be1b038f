use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::io::AsyncWriteExt;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use napguard::config::{LogFormat, ServiceConfig};
use napguard::error::NapguardError;
use napguard::ratelimit::{spawn_sweeper, LimiterRegistry, RateLimitRules, SystemClock};

/// Per-identity request quotas for the sleep-plan service.
#[derive(Debug, Parser)]
#[command(name = "napguard", version, about)]
struct Cli {
    /// Service configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Limiter rules file (overrides rate_limiting.rules_path)
    #[arg(short, long)]
    rules: Option<PathBuf>,

    /// Log line format (overrides logging.format)
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print every configured limiter
    List,
    /// Read identities from stdin, one per line, and print a decision for each
    Check {
        /// Limiter to check against
        #[arg(short, long)]
        limiter: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = ServiceConfig::load(cli.config.as_deref()).context("loading configuration")?;
    init_tracing(&config, cli.log_format);

    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let rules_path = cli
        .rules
        .clone()
        .or_else(|| config.rate_limiting.rules_path.as_ref().map(PathBuf::from));
    let rules = match rules_path {
        Some(path) => RateLimitRules::from_file(&path)
            .with_context(|| format!("loading rules from {}", path.display()))?,
        None => {
            warn!("No rules file configured; no limiters registered");
            RateLimitRules::new()
        }
    };

    let registry = Arc::new(LimiterRegistry::from_rules(&rules, Arc::new(SystemClock))?);
    info!(limiters = registry.len(), "Rate limiter registry initialized");

    match cli.command {
        Command::List => list(&registry),
        Command::Check { limiter } => {
            let sweeper = config
                .rate_limiting
                .sweep_interval()
                .map(|every| spawn_sweeper(registry.clone(), every));

            let result = tokio::select! {
                result = check_stdin(&registry, &limiter) => result,
                _ = shutdown_signal() => Ok(()),
            };

            if let Some(sweeper) = sweeper {
                sweeper.abort();
            }
            result
        }
    }
}

fn init_tracing(config: &ServiceConfig, format: Option<LogFormat>) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format.unwrap_or(config.logging.format) {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

fn list(registry: &LimiterRegistry) -> anyhow::Result<()> {
    for name in registry.names() {
        if let Some(limiter) = registry.limiter(&name) {
            let config = limiter.config();
            println!("{}\tmax={}\twindow_ms={}", name, config.max, config.window_ms);
        }
    }
    Ok(())
}

async fn check_stdin(registry: &LimiterRegistry, name: &str) -> anyhow::Result<()> {
    let limiter = registry
        .limiter(name)
        .ok_or_else(|| NapguardError::UnknownLimiter(name.to_string()))?;

    let mut lines = spawn_stdin_reader()?;
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.recv().await {
        let line = line?;
        let identity = line.trim_end_matches('\r');
        let mut output = limiter.check(identity).to_json().to_string();
        output.push('\n');
        stdout.write_all(output.as_bytes()).await?;
        stdout.flush().await?;
    }

    Ok(())
}

/// Read stdin lines on a detached thread.
///
/// A blocking stdin read can't be cancelled, and one parked on a runtime
/// thread keeps the runtime from shutting down after a signal.
fn spawn_stdin_reader() -> std::io::Result<mpsc::Receiver<std::io::Result<String>>> {
    let (tx, rx) = mpsc::channel(64);
    std::thread::Builder::new()
        .name("stdin-reader".to_string())
        .spawn(move || {
            for line in std::io::stdin().lines() {
                if tx.blocking_send(line).is_err() {
                    break;
                }
            }
        })?;
    Ok(rx)
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down");
        }
    }
}
