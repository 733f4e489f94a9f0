pub mod health;
pub mod instance;
pub mod port;
pub mod process;

pub use instance::{FileInstanceStore, InstanceStateStore, ServerInfo};
pub use port::{PortAllocator, PortRequest};
pub use process::Launcher;

use std::path::PathBuf;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Environment marker telling a re-executed child it is the background instance.
pub const BACKGROUND_ENV: &str = "ACTION_WEB_BACKGROUND";

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("no free port left in {}-{}", port::DYNAMIC_PORTS.start(), port::DYNAMIC_PORTS.end())]
    PortsExhausted,

    #[error("port {0} is not available")]
    PortUnavailable(u16),

    #[error("server did not become ready within {0:?}")]
    StartupTimeout(Duration),

    #[error("background instance exited with {status} before becoming ready; see {}", log.display())]
    ExitedEarly { status: String, log: PathBuf },

    #[error("server is already running ({0})")]
    AlreadyRunning(String),

    #[error("a foreground server is running at {0}; stop it from the terminal that started it")]
    ForegroundRunning(String),

    #[error("failed to signal process {pid}: {source}")]
    Signal {
        pid: i32,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("instance state error: {0}")]
    InstanceState(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    /// Invoked by a user or script.
    Interactive,
    /// The detached child started by `start`.
    BackgroundInstance,
}

impl LaunchMode {
    pub fn from_env() -> Self {
        match std::env::var(BACKGROUND_ENV) {
            Ok(value) if value == "1" => Self::BackgroundInstance,
            _ => Self::Interactive,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DaemonOptions {
    pub mode: LaunchMode,
    pub ready_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for DaemonOptions {
    fn default() -> Self {
        Self {
            mode: LaunchMode::Interactive,
            ready_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerStatus {
    Background { pid: i32, url: Option<String> },
    Foreground { url: String },
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The background instance was asked to shut down. It may still be exiting.
    Signalled(i32),
    NothingToStop,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Started {
    pub pid: u32,
    pub url: String,
}

/// Coordinates the single server instance of one install root.
pub struct Daemon<S: InstanceStateStore = FileInstanceStore> {
    store: S,
    allocator: PortAllocator,
    options: DaemonOptions,
}

impl<S: InstanceStateStore> Daemon<S> {
    pub fn new(store: S, allocator: PortAllocator, options: DaemonOptions) -> Self {
        Self {
            store,
            allocator,
            options,
        }
    }

    /// Whether `start` should re-exec into the background.
    pub fn should_detach(&self, foreground: bool) -> bool {
        !foreground && self.options.mode == LaunchMode::Interactive
    }

    /// Checks the PID record first, then a published URL. Clears stale state.
    pub async fn status(&self) -> Result<ServerStatus, DaemonError> {
        let own_pid = std::process::id();
        let pid = self.store.read_pid()?;
        let info = self.store.read_info()?;

        if let Some(pid) = pid {
            if !is_own(pid, own_pid) && process::is_running(pid) {
                return Ok(ServerStatus::Background {
                    pid,
                    url: info.map(|info| info.url),
                });
            }
        }

        if let Some(info) = &info {
            if health::probe(&info.url).await {
                return Ok(ServerStatus::Foreground {
                    url: info.url.clone(),
                });
            }
        }

        match pid {
            Some(stale) if !is_own(stale, own_pid) => {
                tracing::info!(pid = stale, "Clearing stale instance state");
                self.store.release(u32::try_from(stale).ok())?;
            }
            _ if info.is_some() => self.store.withdraw_info()?,
            _ => {}
        }
        Ok(ServerStatus::Stopped)
    }

    async fn ensure_not_running(&self) -> Result<(), DaemonError> {
        match self.status().await? {
            ServerStatus::Stopped => Ok(()),
            ServerStatus::Background { pid, url } => Err(DaemonError::AlreadyRunning(
                url.unwrap_or_else(|| format!("pid {}", pid)),
            )),
            ServerStatus::Foreground { url } => Err(DaemonError::AlreadyRunning(url)),
        }
    }

    /// Re-executes via `launcher` and waits for the child to publish its URL.
    pub async fn start_background(&self, launcher: &Launcher) -> Result<Started, DaemonError> {
        self.ensure_not_running().await?;

        let mut child = process::spawn_detached(launcher)?;
        let pid = child.id();
        if !self.store.try_acquire_pid(pid)? {
            let _ = process::kill(pid as i32);
            let _ = child.wait();
            let url = self
                .store
                .read_info()?
                .map(|info| info.url)
                .unwrap_or_else(|| "another instance is starting".to_string());
            return Err(DaemonError::AlreadyRunning(url));
        }
        tracing::info!(pid, "Background instance spawned, waiting for readiness");

        let deadline = Instant::now() + self.options.ready_timeout;
        while Instant::now() < deadline {
            tokio::time::sleep(self.options.poll_interval).await;

            if let Some(info) = self.store.read_info()? {
                return Ok(Started { pid, url: info.url });
            }
            if let Some(status) = child.try_wait()? {
                tracing::warn!(pid, %status, "Background instance exited before becoming ready");
                self.store.release(Some(pid))?;
                return Err(DaemonError::ExitedEarly {
                    status: status.to_string(),
                    log: launcher.log_path.clone(),
                });
            }
        }

        if let Err(err) = process::kill(pid as i32) {
            tracing::debug!(pid, "Kill after startup timeout failed: {}", err);
        }
        let _ = child.wait();
        self.store.release(Some(pid))?;
        Err(DaemonError::StartupTimeout(self.options.ready_timeout))
    }

    /// Binds the listening socket for a foreground (or background instance) server
    /// and publishes its URL.
    pub async fn bind(
        &self,
        host: &str,
        request: PortRequest,
    ) -> Result<(tokio::net::TcpListener, ServerInfo), DaemonError> {
        self.ensure_not_running().await?;

        let port = self.allocator.resolve(request)?;
        let listener = tokio::net::TcpListener::bind((host, port)).await?;
        let info = ServerInfo::for_port(listener.local_addr()?.port());

        if !self.store.publish(&info)? {
            let existing = self.store.read_info()?.map(|info| info.url);
            return Err(DaemonError::AlreadyRunning(
                existing.unwrap_or_else(|| info.url.clone()),
            ));
        }
        tracing::info!(url = %info.url, "Published server info");
        Ok((listener, info))
    }

    /// Interrupts a live background instance. Never signals a foreground server.
    pub async fn stop(&self) -> Result<StopOutcome, DaemonError> {
        if let Some(pid) = self.store.read_pid()? {
            if process::is_running(pid) {
                process::interrupt(pid)?;
                tracing::info!(pid, "Sent interrupt to background instance");
                return Ok(StopOutcome::Signalled(pid));
            }
            self.store.release(u32::try_from(pid).ok())?;
        }

        if let Some(info) = self.store.read_info()? {
            if health::probe(&info.url).await {
                return Err(DaemonError::ForegroundRunning(info.url));
            }
            self.store.withdraw_info()?;
        }

        Ok(StopOutcome::NothingToStop)
    }

    /// Removes this process's instance state.
    pub fn release(&self) -> Result<(), DaemonError> {
        self.store.release(Some(std::process::id()))
    }
}

fn is_own(pid: i32, own_pid: u32) -> bool {
    u32::try_from(pid).is_ok_and(|pid| pid == own_pid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn daemon(temp: &TempDir, options: DaemonOptions) -> Daemon {
        Daemon::new(
            FileInstanceStore::new(temp.path()),
            PortAllocator::default(),
            options,
        )
    }

    #[tokio::test]
    async fn stop_is_idempotent_when_nothing_runs() {
        let temp = TempDir::new().unwrap();
        let daemon = daemon(&temp, DaemonOptions::default());

        assert_eq!(daemon.stop().await.unwrap(), StopOutcome::NothingToStop);
        assert_eq!(daemon.stop().await.unwrap(), StopOutcome::NothingToStop);
        assert_eq!(daemon.status().await.unwrap(), ServerStatus::Stopped);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stale_state_is_cleared() {
        let temp = TempDir::new().unwrap();
        let store = FileInstanceStore::new(temp.path());

        let mut exited = std::process::Command::new("true").spawn().unwrap();
        let dead_pid = exited.id();
        exited.wait().unwrap();

        assert!(store.try_acquire_pid(dead_pid).unwrap());
        let closed = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = closed.local_addr().unwrap().port();
        drop(closed);
        assert!(store.publish(&ServerInfo::for_port(port)).unwrap());

        let daemon = daemon(&temp, DaemonOptions::default());
        assert_eq!(daemon.stop().await.unwrap(), StopOutcome::NothingToStop);
        assert!(!store.pid_path().exists());
        assert!(!store.info_path().exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn live_background_pid_is_interrupted() {
        let temp = TempDir::new().unwrap();
        let store = FileInstanceStore::new(temp.path());
        let launcher = Launcher {
            program: PathBuf::from("sleep"),
            args: vec!["30".to_string()],
            env: Vec::new(),
            log_path: store.log_path(),
        };
        let mut child = process::spawn_detached(&launcher).unwrap();
        assert!(store.try_acquire_pid(child.id()).unwrap());

        let daemon = daemon(&temp, DaemonOptions::default());
        assert!(matches!(
            daemon.status().await.unwrap(),
            ServerStatus::Background { .. }
        ));
        assert!(matches!(
            daemon.bind("127.0.0.1", PortRequest::Any(0)).await,
            Err(DaemonError::AlreadyRunning(_))
        ));

        let outcome = daemon.stop().await.unwrap();
        assert_eq!(outcome, StopOutcome::Signalled(child.id() as i32));
        child.wait().unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn startup_timeout_kills_the_child_and_cleans_up() {
        let temp = TempDir::new().unwrap();
        let store = FileInstanceStore::new(temp.path());
        let daemon = daemon(
            &temp,
            DaemonOptions {
                mode: LaunchMode::Interactive,
                ready_timeout: Duration::from_millis(300),
                poll_interval: Duration::from_millis(50),
            },
        );
        let launcher = Launcher {
            program: PathBuf::from("sleep"),
            args: vec!["30".to_string()],
            env: Vec::new(),
            log_path: store.log_path(),
        };

        let err = daemon.start_background(&launcher).await.unwrap_err();
        assert!(matches!(err, DaemonError::StartupTimeout(_)));
        assert!(!store.pid_path().exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn early_exit_is_reported_with_the_log_path() {
        let temp = TempDir::new().unwrap();
        let store = FileInstanceStore::new(temp.path());
        let daemon = daemon(
            &temp,
            DaemonOptions {
                mode: LaunchMode::Interactive,
                ready_timeout: Duration::from_secs(10),
                poll_interval: Duration::from_millis(50),
            },
        );
        let launcher = Launcher {
            program: PathBuf::from("sh"),
            args: vec!["-c".to_string(), "echo port taken >&2; exit 3".to_string()],
            env: Vec::new(),
            log_path: store.log_path(),
        };

        let started = Instant::now();
        let err = daemon.start_background(&launcher).await.unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(5));
        match err {
            DaemonError::ExitedEarly { status, log } => {
                assert!(status.contains('3'), "{}", status);
                assert_eq!(log, store.log_path());
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(!store.pid_path().exists());
        let logged = std::fs::read_to_string(store.log_path()).unwrap();
        assert!(logged.contains("port taken"));
    }

    #[tokio::test]
    async fn foreground_server_refuses_stop() {
        let temp = TempDir::new().unwrap();
        let daemon = daemon(&temp, DaemonOptions::default());

        let (listener, info) = daemon.bind("127.0.0.1", PortRequest::Any(0)).await.unwrap();
        let app = axum::Router::new().route("/", axum::routing::get(|| async { "ok" }));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        assert_eq!(
            daemon.status().await.unwrap(),
            ServerStatus::Foreground { url: info.url.clone() }
        );
        assert!(matches!(
            daemon.stop().await,
            Err(DaemonError::ForegroundRunning(url)) if url == info.url
        ));

        daemon.release().unwrap();
        assert!(!FileInstanceStore::new(temp.path()).info_path().exists());
    }

    #[test]
    fn detaches_only_interactive_background_starts() {
        let temp = TempDir::new().unwrap();
        let interactive = daemon(&temp, DaemonOptions::default());
        assert!(interactive.should_detach(false));
        assert!(!interactive.should_detach(true));

        let child = daemon(
            &temp,
            DaemonOptions {
                mode: LaunchMode::BackgroundInstance,
                ..DaemonOptions::default()
            },
        );
        assert!(!child.should_detach(false));
    }
}
