use crate::paths::Paths;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 8080;
const DEFAULT_WS_INTERVAL_MS: u64 = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenBackend {
    /// AES-GCM encrypted file under the data directory.
    File,
    /// OS keyring entry.
    Keyring,
}

impl std::str::FromStr for TokenBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(Self::File),
            "keyring" => Ok(Self::Keyring),
            other => anyhow::bail!("unknown token backend '{}' (expected file or keyring)", other),
        }
    }
}

/// Passphrase for the encrypted token file. Never printed.
#[derive(Clone, Default)]
pub struct Passphrase(String);

impl Passphrase {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Passphrase(***)")
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Set when the port was given explicitly; such a port is never substituted.
    pub port_pinned: bool,
    pub auth_enabled: bool,
    pub token_backend: TokenBackend,
    pub token_passphrase: Option<Passphrase>,
    pub actions_dir: PathBuf,
    pub excluded_actions: Vec<String>,
    pub ws_interval: Duration,
}

impl Config {
    pub fn defaults(paths: &Paths) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            port_pinned: false,
            auth_enabled: false,
            token_backend: TokenBackend::File,
            token_passphrase: None,
            actions_dir: paths.actions_dir(),
            excluded_actions: Vec::new(),
            ws_interval: Duration::from_millis(DEFAULT_WS_INTERVAL_MS),
        }
    }

    /// Defaults, then `conf/config.json`, then environment overrides.
    pub fn load(paths: &Paths) -> Result<Self> {
        let mut config = Self::defaults(paths);

        if let Some(file_config) = Self::from_conf_file(paths)? {
            config.apply_file(file_config, paths);
        }

        config.apply_env()?;
        Ok(config)
    }

    /// Pins the listening port, as requested on the command line.
    pub fn pin_port(&mut self, port: u16) {
        self.port = port;
        self.port_pinned = true;
    }

    fn from_conf_file(paths: &Paths) -> Result<Option<FileConfig>> {
        let path = paths.conf_dir().join("config.json");
        if !path.is_file() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let file_config = serde_json::from_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        Ok(Some(file_config))
    }

    fn apply_file(&mut self, file_config: FileConfig, paths: &Paths) {
        if let Some(host) = file_config.host {
            self.host = host;
        }
        if let Some(port) = file_config.port {
            self.port = port;
        }
        if let Some(auth) = file_config.auth_enabled {
            self.auth_enabled = auth;
        }
        if let Some(backend) = file_config.token_backend {
            self.token_backend = backend;
        }
        if let Some(actions_dir) = file_config.actions_dir {
            let dir = PathBuf::from(actions_dir);
            self.actions_dir = if dir.is_absolute() {
                dir
            } else {
                paths.root().join(dir)
            };
        }
        if let Some(excluded) = file_config.excluded_actions {
            self.excluded_actions = excluded;
        }
        if let Some(interval) = file_config.ws_interval_ms {
            self.ws_interval = Duration::from_millis(interval.max(1));
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(host) = std::env::var("ACTION_WEB_HOST") {
            self.host = host;
        }

        if let Ok(port) = std::env::var("ACTION_WEB_PORT") {
            self.port = port
                .parse()
                .with_context(|| format!("Invalid ACTION_WEB_PORT '{}'", port))?;
        }

        if let Ok(auth) = std::env::var("ACTION_WEB_AUTH") {
            self.auth_enabled = parse_bool(&auth)
                .with_context(|| format!("Invalid ACTION_WEB_AUTH '{}'", auth))?;
        }

        if let Ok(backend) = std::env::var("ACTION_WEB_TOKEN_BACKEND") {
            self.token_backend = backend.parse()?;
        }

        if let Ok(passphrase) = std::env::var("ACTION_WEB_TOKEN_PASSPHRASE") {
            if !passphrase.is_empty() {
                self.token_passphrase = Some(Passphrase::new(passphrase));
            }
        }

        if let Ok(dir) = std::env::var("ACTION_WEB_ACTIONS_DIR") {
            self.actions_dir = PathBuf::from(dir);
        }

        if let Ok(interval) = std::env::var("ACTION_WEB_WS_INTERVAL_MS") {
            let millis: u64 = interval
                .parse()
                .with_context(|| format!("Invalid ACTION_WEB_WS_INTERVAL_MS '{}'", interval))?;
            self.ws_interval = Duration::from_millis(millis.max(1));
        }

        Ok(())
    }
}

fn parse_bool(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => anyhow::bail!("expected a boolean"),
    }
}

#[derive(Debug, Deserialize)]
struct FileConfig {
    host: Option<String>,
    port: Option<u16>,
    auth_enabled: Option<bool>,
    token_backend: Option<TokenBackend>,
    actions_dir: Option<String>,
    excluded_actions: Option<Vec<String>>,
    ws_interval_ms: Option<u64>,
}
