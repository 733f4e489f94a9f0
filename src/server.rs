use crate::api::{AppState, create_router};
use crate::config::{Config, TokenBackend};
use crate::daemon::{Daemon, PortRequest};
use crate::executor::ActionRegistry;
use crate::paths::Paths;
use crate::repository::{
    ActionRepository, EncryptedFileRepository, KeyringRepository, SecretRepository,
};
use crate::services::token_store::SystemClock;
use crate::services::{ActionService, RunManager, RunService, StreamCapture, TokenStore};
use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

const KEYRING_SERVICE: &str = "action_web";
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

pub fn open_token_store(config: &Config, paths: &Paths) -> anyhow::Result<TokenStore> {
    let repo: Arc<dyn SecretRepository> = match config.token_backend {
        TokenBackend::Keyring => Arc::new(KeyringRepository::new(KEYRING_SERVICE)),
        TokenBackend::File => {
            let passphrase = config.token_passphrase.as_ref().context(
                "ACTION_WEB_TOKEN_PASSPHRASE must be set to use the encrypted token file",
            )?;
            Arc::new(EncryptedFileRepository::new(
                paths.data_dir(),
                passphrase.expose(),
            ))
        }
    };

    TokenStore::open(repo, Arc::new(SystemClock)).context("Failed to open token store")
}

/// Serves the HTTP/WebSocket API until Ctrl-C, SIGTERM or `POST /api/shutdown`.
pub async fn run_server(config: Config, paths: Paths, daemon: Daemon) -> anyhow::Result<()> {
    tracing::info!("Starting action_web with config: {:?}", config);

    let shutdown = CancellationToken::new();

    let tokens = if config.auth_enabled {
        Some(Arc::new(open_token_store(&config, &paths)?))
    } else {
        tracing::warn!("Authentication is disabled; the API is open to local clients");
        None
    };
    let _token_watcher = match &tokens {
        Some(store) => store.watch()?,
        None => None,
    };

    let actions = ActionRepository::new(&config.actions_dir);
    tracing::info!("Loading actions from {}", actions.dir().display());
    let registry: Arc<dyn ActionRegistry> = Arc::new(ActionService::new(
        actions,
        config.excluded_actions.clone(),
    ));
    let run_service = RunService::new(
        registry,
        Arc::new(RunManager::new(shutdown.clone())),
        StreamCapture::new(paths.logs_dir()),
    );

    let state = AppState {
        runs: run_service,
        tokens,
        shutdown: shutdown.clone(),
        ws_interval: config.ws_interval,
    };
    let app = create_router(state).layer(TraceLayer::new_for_http());

    let request = if config.port_pinned {
        PortRequest::Pinned(config.port)
    } else {
        PortRequest::Any(config.port)
    };
    let (listener, info) = daemon.bind(&config.host, request).await?;
    tracing::info!(url = %info.url, "Server listening on {}", listener.local_addr()?);

    let signals = tokio::spawn(watch_signals(shutdown.clone()));
    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown.clone().cancelled_owned());
    let mut server = tokio::spawn(async move { server.await });

    let result = tokio::select! {
        joined = &mut server => joined.map_err(anyhow::Error::from).and_then(|r| r.map_err(Into::into)),
        _ = shutdown.cancelled() => {
            match tokio::time::timeout(SHUTDOWN_GRACE, &mut server).await {
                Ok(joined) => joined.map_err(anyhow::Error::from).and_then(|r| r.map_err(Into::into)),
                Err(_) => {
                    tracing::warn!("Connections still open after {:?}, forcing shutdown", SHUTDOWN_GRACE);
                    server.abort();
                    Ok(())
                }
            }
        }
    };

    shutdown.cancel();
    signals.abort();
    if let Err(err) = daemon.release() {
        tracing::warn!("Failed to clean up instance state: {}", err);
    }
    tracing::info!("Server stopped");
    result
}

async fn watch_signals(shutdown: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(windows)]
    let terminate = async {
        match tokio::signal::windows::ctrl_break() {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::warn!("Failed to install Ctrl-Break handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(err) = result {
                tracing::warn!("Failed to listen for Ctrl-C: {}", err);
                return;
            }
            tracing::info!("Received interrupt");
        }
        _ = terminate => tracing::info!("Received termination signal"),
        _ = shutdown.cancelled() => return,
    }
    shutdown.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::{DaemonOptions, FileInstanceStore, InstanceStateStore, PortAllocator};
    use tempfile::TempDir;

    #[tokio::test]
    async fn foreground_server_shuts_down_over_http_and_cleans_up() {
        let temp = TempDir::new().unwrap();
        let paths = Paths::new(temp.path());
        let mut config = Config::defaults(&paths);
        config.host = "127.0.0.1".to_string();

        let store = FileInstanceStore::new(paths.instance_dir());
        let daemon = Daemon::new(
            store.clone(),
            PortAllocator::default(),
            DaemonOptions::default(),
        );
        let server = tokio::spawn(run_server(config, paths.clone(), daemon));

        let mut url = None;
        for _ in 0..100 {
            if let Some(info) = store.read_info().unwrap() {
                url = Some(info.url);
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        let url = url.expect("server never published its URL");

        let client = reqwest::Client::new();
        let health = client.head(&url).send().await.unwrap();
        assert!(health.status().is_success());

        let response = client
            .post(format!("{}/api/shutdown", url))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::ACCEPTED);

        tokio::time::timeout(Duration::from_secs(15), server)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(!store.info_path().exists());
        assert!(!store.pid_path().exists());
    }

    #[test]
    fn file_backend_requires_a_passphrase() {
        let temp = TempDir::new().unwrap();
        let paths = Paths::new(temp.path());
        let config = Config::defaults(&paths);
        assert!(open_token_store(&config, &paths).is_err());
    }
}
