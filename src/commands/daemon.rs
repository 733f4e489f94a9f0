//! Server lifecycle commands (start, stop, status).

use crate::config::Config;
use crate::daemon::{
    BACKGROUND_ENV, Daemon, FileInstanceStore, Launcher, ServerStatus, StopOutcome,
};
use crate::paths::Paths;
use crate::server;
use anyhow::{Context, Result};

pub async fn start(
    paths: Paths,
    mut config: Config,
    daemon: Daemon,
    foreground: bool,
    port: Option<u16>,
) -> Result<()> {
    if let Some(port) = port {
        config.pin_port(port);
    }

    if !daemon.should_detach(foreground) {
        return server::run_server(config, paths, daemon).await;
    }

    let program = std::env::current_exe().context("Failed to locate own executable")?;
    let mut args = vec![
        "--home".to_string(),
        paths.root().display().to_string(),
        "start".to_string(),
    ];
    if let Some(port) = port {
        args.push("--port".to_string());
        args.push(port.to_string());
    }

    let launcher = Launcher {
        program,
        args,
        env: vec![(BACKGROUND_ENV.to_string(), "1".to_string())],
        log_path: FileInstanceStore::new(paths.instance_dir()).log_path(),
    };

    let started = daemon.start_background(&launcher).await?;
    println!(
        "Web server started in the background (pid {}) at {}",
        started.pid, started.url
    );
    Ok(())
}

pub async fn stop(daemon: Daemon) -> Result<()> {
    match daemon.stop().await? {
        StopOutcome::Signalled(pid) => {
            println!("Web server (pid {}) successfully shut down", pid)
        }
        StopOutcome::NothingToStop => println!("No active web server that can be stopped"),
    }
    Ok(())
}

pub async fn status(daemon: Daemon) -> Result<()> {
    match daemon.status().await? {
        ServerStatus::Background { pid, url } => match url {
            Some(url) => println!("Web server is running in the background (pid {}) at {}", pid, url),
            None => println!("Web server is starting in the background (pid {})", pid),
        },
        ServerStatus::Foreground { url } => {
            println!("Web server is running in the foreground at {}", url)
        }
        ServerStatus::Stopped => println!("Web server is not running"),
    }
    Ok(())
}
