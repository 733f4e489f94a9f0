use crate::models::{RunInfo, RunStatus};
use crate::services::streams::RunStreams;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

/// Finished runs kept for status and stream lookups.
const ARCHIVE_LIMIT: usize = 256;

/// One run of an action.
#[derive(Debug)]
pub struct RunHandle {
    id: String,
    action_id: String,
    seq: u64,
    status: Mutex<RunStatus>,
    cancel: CancellationToken,
    streams: Arc<RunStreams>,
}

impl RunHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn action_id(&self) -> &str {
        &self.action_id
    }

    pub fn status(&self) -> RunStatus {
        *self.status.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn set_status(&self, status: RunStatus) {
        *self.status.lock().unwrap_or_else(|p| p.into_inner()) = status;
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn streams(&self) -> &Arc<RunStreams> {
        &self.streams
    }

    pub fn info(&self) -> RunInfo {
        RunInfo {
            id: self.id.clone(),
            status: self.status(),
        }
    }
}

#[derive(Default)]
struct Registry {
    live: HashMap<String, Arc<RunHandle>>,
    archive: VecDeque<Arc<RunHandle>>,
}

/// Tracks live runs and a bounded archive of finished ones.
///
/// Every run's cancellation token is a child of the server's root token, so
/// cancelling the root stops all jobs. The lock is never held across I/O.
pub struct RunManager {
    root: CancellationToken,
    seq: AtomicU64,
    inner: Mutex<Registry>,
}

impl RunManager {
    pub fn new(root: CancellationToken) -> Self {
        Self {
            root,
            seq: AtomicU64::new(0),
            inner: Mutex::new(Registry::default()),
        }
    }

    /// `<unix-seconds>-<seq>___<action-id>`; unique within this process.
    pub fn next_run_id(&self, action_id: &str) -> String {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}-{}___{}", chrono::Utc::now().timestamp(), seq, action_id)
    }

    pub fn register(
        &self,
        run_id: &str,
        action_id: &str,
        streams: Arc<RunStreams>,
    ) -> Arc<RunHandle> {
        let handle = Arc::new(RunHandle {
            id: run_id.to_string(),
            action_id: action_id.to_string(),
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            status: Mutex::new(RunStatus::Created),
            cancel: self.root.child_token(),
            streams,
        });

        self.lock()
            .live
            .insert(run_id.to_string(), handle.clone());
        tracing::debug!(run_id, action_id, "Registered run");
        handle
    }

    /// Live runs only.
    pub fn lookup(&self, run_id: &str) -> Option<Arc<RunHandle>> {
        self.lock().live.get(run_id).cloned()
    }

    /// Live or archived runs.
    pub fn get(&self, run_id: &str) -> Option<Arc<RunHandle>> {
        let registry = self.lock();
        registry.live.get(run_id).cloned().or_else(|| {
            registry
                .archive
                .iter()
                .find(|handle| handle.id == run_id)
                .cloned()
        })
    }

    /// Moves a run out of the live registry. Idempotent.
    pub fn remove(&self, run_id: &str) {
        let mut registry = self.lock();
        if let Some(handle) = registry.live.remove(run_id) {
            registry.archive.push_back(handle);
            while registry.archive.len() > ARCHIVE_LIMIT {
                registry.archive.pop_front();
            }
        }
    }

    /// Requests cancellation of a live run.
    pub fn cancel(&self, run_id: &str) -> bool {
        match self.lookup(run_id) {
            Some(handle) => {
                handle.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// All known runs of an action, oldest first.
    pub fn list_by_action(&self, action_id: &str) -> Vec<RunInfo> {
        let registry = self.lock();
        let mut handles: Vec<&Arc<RunHandle>> = registry
            .live
            .values()
            .chain(registry.archive.iter())
            .filter(|handle| handle.action_id == action_id)
            .collect();
        handles.sort_by_key(|handle| handle.seq);
        handles.into_iter().map(|handle| handle.info()).collect()
    }

    pub fn running(&self, action_id: &str) -> Vec<RunInfo> {
        self.list_by_action(action_id)
            .into_iter()
            .filter(|info| info.status == RunStatus::Running)
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }
}
