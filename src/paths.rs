use crate::error::{AppError, Result};
use std::path::{Path, PathBuf};

const BIN_DIR: &str = "bin";
const ACTIONS_DIR: &str = "actions";
const INSTANCE_DIR: &str = "instance";
const LOGS_DIR: &str = "logs";
const CONF_DIR: &str = "conf";
const DATA_DIR: &str = "data";
const HOME_ENV: &str = "ACTION_WEB_HOME";

/// Directory layout under one install root.
#[derive(Debug, Clone)]
pub struct Paths {
    root: PathBuf,
}

impl Paths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolves the root from `ACTION_WEB_HOME`, falling back to the directory
    /// that holds the executable (or its parent when installed under `bin/`).
    pub fn resolve() -> Result<Self> {
        install_root().map(Self::new)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn actions_dir(&self) -> PathBuf {
        self.root.join(ACTIONS_DIR)
    }

    /// Per-instance state: PID file, server info, background logs.
    pub fn instance_dir(&self) -> PathBuf {
        self.root.join(INSTANCE_DIR)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join(LOGS_DIR)
    }

    pub fn conf_dir(&self) -> PathBuf {
        self.root.join(CONF_DIR)
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.join(DATA_DIR)
    }
}

pub fn install_root() -> Result<PathBuf> {
    if let Ok(home) = std::env::var(HOME_ENV) {
        if home.trim().is_empty() {
            return Err(AppError::Config(
                "ACTION_WEB_HOME is set but empty".to_string(),
            ));
        }
        return Ok(PathBuf::from(home));
    }

    let exe_path = std::env::current_exe()?;
    let exe_dir = exe_path
        .parent()
        .ok_or_else(|| AppError::Config("Failed to resolve executable directory".to_string()))?;

    if exe_dir.file_name().and_then(|name| name.to_str()) == Some(BIN_DIR) {
        let root = exe_dir.parent().ok_or_else(|| {
            AppError::Config("Failed to resolve install root from bin".to_string())
        })?;
        return Ok(root.to_path_buf());
    }

    Ok(exe_dir.to_path_buf())
}
