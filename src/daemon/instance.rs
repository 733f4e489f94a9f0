use super::DaemonError;
use super::process::{read_pid_file, write_pid_file};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

const PID_FILE: &str = "web.pid";
const SERVER_INFO_FILE: &str = "server-info.json";
const LOG_FILE: &str = "out.log";

/// Published by a running server so other invocations can find it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub url: String,
}

impl ServerInfo {
    pub fn for_port(port: u16) -> Self {
        Self {
            url: format!("http://localhost:{}", port),
        }
    }
}

/// Instance coordination state. Acquire operations are atomic
/// create-if-absent: of two concurrent callers exactly one wins.
pub trait InstanceStateStore: Send + Sync {
    /// Records `pid` as the background instance. `false` if a PID is already recorded.
    fn try_acquire_pid(&self, pid: u32) -> Result<bool, DaemonError>;

    /// Publishes the server URL. `false` if server info already exists.
    fn publish(&self, info: &ServerInfo) -> Result<bool, DaemonError>;

    fn read_pid(&self) -> Result<Option<i32>, DaemonError>;

    fn read_info(&self) -> Result<Option<ServerInfo>, DaemonError>;

    /// Removes server info, and the PID record when it is unowned or
    /// records `owner`.
    fn release(&self, owner: Option<u32>) -> Result<(), DaemonError>;

    /// Removes server info only.
    fn withdraw_info(&self) -> Result<(), DaemonError>;
}

/// `web.pid` and `server-info.json` inside the instance directory.
#[derive(Debug, Clone)]
pub struct FileInstanceStore {
    dir: PathBuf,
}

impl FileInstanceStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn pid_path(&self) -> PathBuf {
        self.dir.join(PID_FILE)
    }

    pub fn info_path(&self) -> PathBuf {
        self.dir.join(SERVER_INFO_FILE)
    }

    pub fn log_path(&self) -> PathBuf {
        self.dir.join(LOG_FILE)
    }

    fn ensure_dir(&self) -> Result<(), DaemonError> {
        std::fs::create_dir_all(&self.dir)?;
        Ok(())
    }
}

impl InstanceStateStore for FileInstanceStore {
    fn try_acquire_pid(&self, pid: u32) -> Result<bool, DaemonError> {
        self.ensure_dir()?;
        write_pid_file(&self.pid_path(), pid)
    }

    fn publish(&self, info: &ServerInfo) -> Result<bool, DaemonError> {
        self.ensure_dir()?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        serde_json::to_writer(&mut tmp, info)
            .map_err(|e| DaemonError::InstanceState(e.to_string()))?;
        tmp.as_file().sync_all()?;

        match tmp.persist_noclobber(self.info_path()) {
            Ok(_) => Ok(true),
            Err(err) if err.error.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(err) => Err(err.error.into()),
        }
    }

    fn read_pid(&self) -> Result<Option<i32>, DaemonError> {
        read_pid_file(&self.pid_path())
    }

    fn read_info(&self) -> Result<Option<ServerInfo>, DaemonError> {
        let content = match std::fs::read_to_string(self.info_path()) {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        match serde_json::from_str(&content) {
            Ok(info) => Ok(Some(info)),
            Err(err) => {
                tracing::warn!("Ignoring malformed server info: {}", err);
                Ok(None)
            }
        }
    }

    fn release(&self, owner: Option<u32>) -> Result<(), DaemonError> {
        remove_if_exists(&self.info_path())?;

        let recorded = self.read_pid()?;
        let owned = match (owner, recorded) {
            (None, _) | (_, None) => true,
            (Some(owner), Some(recorded)) => i64::from(owner) == i64::from(recorded),
        };
        if owned {
            remove_if_exists(&self.pid_path())?;
        }
        Ok(())
    }

    fn withdraw_info(&self) -> Result<(), DaemonError> {
        remove_if_exists(&self.info_path())
    }
}

fn remove_if_exists(path: &Path) -> Result<(), DaemonError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use tempfile::TempDir;

    #[test]
    fn exactly_one_concurrent_acquirer_wins() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(FileInstanceStore::new(temp.path()));
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = [1001u32, 1002]
            .into_iter()
            .map(|pid| {
                let store = store.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    let pid_won = store.try_acquire_pid(pid).unwrap();
                    let info_won = store.publish(&ServerInfo::for_port(pid as u16)).unwrap();
                    (pid_won, info_won)
                })
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(results.iter().filter(|(pid, _)| *pid).count(), 1);
        assert_eq!(results.iter().filter(|(_, info)| *info).count(), 1);
        assert!(store.read_pid().unwrap().is_some());
        assert!(store.read_info().unwrap().is_some());
    }

    #[test]
    fn release_keeps_a_foreign_pid_record() {
        let temp = TempDir::new().unwrap();
        let store = FileInstanceStore::new(temp.path());
        assert!(store.try_acquire_pid(10).unwrap());
        assert!(store.publish(&ServerInfo::for_port(8080)).unwrap());

        store.release(Some(11)).unwrap();
        assert_eq!(store.read_pid().unwrap(), Some(10));
        assert!(store.read_info().unwrap().is_none());

        store.release(Some(10)).unwrap();
        assert_eq!(store.read_pid().unwrap(), None);
        store.release(None).unwrap();
    }

    #[test]
    fn server_info_uses_localhost_url() {
        let temp = TempDir::new().unwrap();
        let store = FileInstanceStore::new(temp.path());
        store.publish(&ServerInfo::for_port(9001)).unwrap();

        let raw = std::fs::read_to_string(store.info_path()).unwrap();
        assert_eq!(raw, r#"{"url":"http://localhost:9001"}"#);
        assert!(!store.publish(&ServerInfo::for_port(9002)).unwrap());
        assert_eq!(store.read_info().unwrap().unwrap().url, "http://localhost:9001");
    }
}
