mod api;
mod cli;
mod commands;
mod config;
mod daemon;
mod error;
mod executor;
mod models;
mod paths;
mod repository;
mod server;
mod services;

use crate::cli::{Cli, Command};
use crate::config::Config;
use crate::daemon::{Daemon, DaemonOptions, FileInstanceStore, LaunchMode, PortAllocator};
use crate::paths::Paths;
use anyhow::Context;
use clap::Parser;
use std::fs::OpenOptions;
use std::net::Ipv4Addr;
use std::sync::Mutex;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_FILTER: &str = "action_web=info,tower_http=info";

/// Background instances log to `<instance>/out.log`; everything else to stderr
/// so command output on stdout stays clean.
fn init_tracing(mode: LaunchMode, paths: &Paths) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let registry = tracing_subscriber::registry().with(filter);

    match mode {
        LaunchMode::BackgroundInstance => {
            let dir = paths.instance_dir();
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(FileInstanceStore::new(&dir).log_path())?;
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(Mutex::new(file)),
                )
                .init();
        }
        LaunchMode::Interactive => {
            registry
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
    Ok(())
}

fn build_daemon(config: &Config, paths: &Paths, mode: LaunchMode) -> Daemon {
    let host = config.host.parse().unwrap_or(Ipv4Addr::LOCALHOST);
    Daemon::new(
        FileInstanceStore::new(paths.instance_dir()),
        PortAllocator::new(host, daemon::port::DYNAMIC_PORTS),
        DaemonOptions {
            mode,
            ..DaemonOptions::default()
        },
    )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mode = LaunchMode::from_env();

    let paths = match cli.home {
        Some(home) => Paths::new(home),
        None => Paths::resolve()?,
    };
    init_tracing(mode, &paths)?;

    let config = Config::load(&paths)?;
    let daemon = build_daemon(&config, &paths, mode);

    match cli.command {
        Command::Start { foreground, port } => {
            commands::daemon::start(paths, config, daemon, foreground, port).await
        }
        Command::Stop => commands::daemon::stop(daemon).await,
        Command::Status => commands::daemon::status(daemon).await,
        Command::Token(command) => commands::token::run(command, &config, &paths),
    }
}
