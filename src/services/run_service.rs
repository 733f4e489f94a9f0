use crate::error::{AppError, Result};
use crate::executor::{ActionRegistry, JobContext};
use crate::models::{RunInfo, RunInput, RunStatus};
use crate::services::run_state::{RunHandle, RunManager};
use crate::services::streams::{StreamCapture, StreamChunk};
use std::sync::Arc;

/// Starts actions and tracks their runs.
#[derive(Clone)]
pub struct RunService {
    registry: Arc<dyn ActionRegistry>,
    runs: Arc<RunManager>,
    capture: StreamCapture,
}

impl RunService {
    pub fn new(
        registry: Arc<dyn ActionRegistry>,
        runs: Arc<RunManager>,
        capture: StreamCapture,
    ) -> Self {
        Self {
            registry,
            runs,
            capture,
        }
    }

    pub fn registry(&self) -> &Arc<dyn ActionRegistry> {
        &self.registry
    }

    pub fn runs(&self) -> &Arc<RunManager> {
        &self.runs
    }

    /// Validates the input, registers a run and hands it to the registry.
    ///
    /// Returns as soon as the job is started. Job failures are recorded in the
    /// run's error stream and status, never returned from here.
    pub fn start(&self, action_id: &str, input: RunInput) -> Result<RunInfo> {
        let action = self.registry.get(action_id)?;
        let resolved = self.registry.validate_input(&action, &input)?;

        let run_id = self.runs.next_run_id(&action.id);
        let streams = Arc::new(self.capture.create(&run_id, input.quiet)?);
        // Everything fallible happens before the run becomes visible.
        let io = streams.job_io()?;
        let handle = self.runs.register(&run_id, &action.id, streams.clone());
        tracing::debug!(
            run_id = %run_id,
            stdout = %streams.out_path().display(),
            stderr = %streams.err_path().display(),
            "Capturing run output"
        );

        let ctx = JobContext {
            run_id: run_id.clone(),
            cancel: handle.cancel_token(),
            io,
        };

        handle.set_status(RunStatus::Running);
        let job = self.registry.execute(action, resolved, ctx);
        tracing::info!(run_id = %run_id, action_id, "Run started");

        let runs = self.runs.clone();
        let waiter_handle = handle.clone();
        tokio::spawn(async move {
            let outcome = match job.await {
                Ok(result) => result,
                Err(join_err) => Err(AppError::Execution(format!("job aborted: {}", join_err))),
            };
            finish_run(&runs, &waiter_handle, outcome);
        });

        Ok(handle.info())
    }

    pub fn get(&self, action_id: &str, run_id: &str) -> Result<Arc<RunHandle>> {
        self.runs
            .get(run_id)
            .filter(|handle| handle.action_id() == action_id)
            .ok_or_else(|| AppError::RunNotFound(run_id.to_string()))
    }

    pub fn list(&self, action_id: &str) -> Result<Vec<RunInfo>> {
        self.registry.get(action_id)?;
        Ok(self.runs.list_by_action(action_id))
    }

    pub fn cancel(&self, action_id: &str, run_id: &str) -> Result<()> {
        let handle = self.get(action_id, run_id)?;
        if !self.runs.cancel(handle.id()) {
            return Err(AppError::RunNotRunning(run_id.to_string()));
        }
        tracing::info!(run_id, action_id, "Run cancellation requested");
        Ok(())
    }

    pub fn streams(
        &self,
        action_id: &str,
        run_id: &str,
        offset: u64,
        limit: Option<u64>,
    ) -> Result<Vec<StreamChunk>> {
        let handle = self.get(action_id, run_id)?;
        handle.streams().read(offset, limit)
    }
}

fn finish_run(runs: &RunManager, handle: &RunHandle, outcome: Result<()>) {
    match outcome {
        Ok(()) => {
            handle.set_status(RunStatus::Finished);
            tracing::info!(run_id = %handle.id(), "Run finished");
        }
        Err(err) => {
            if let Err(write_err) = handle.streams().append_error(&err.to_string()) {
                tracing::warn!(run_id = %handle.id(), "Failed to record run error: {}", write_err);
            }
            handle.set_status(RunStatus::Error);
            tracing::warn!(run_id = %handle.id(), "Run failed: {}", err);
        }
    }
    runs.remove(handle.id());
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::executor::ResolvedInput;
    use crate::models::Action;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::task::JoinHandle;
    use tokio_util::sync::CancellationToken;

    /// Registry whose jobs either fail immediately or wait for cancellation.
    pub(crate) struct FakeRegistry;

    impl ActionRegistry for FakeRegistry {
        fn list(&self) -> Result<Vec<Action>> {
            Ok(vec![self.get("wait")?, self.get("fail")?])
        }

        fn get(&self, id: &str) -> Result<Action> {
            if id != "wait" && id != "fail" {
                return Err(AppError::ActionNotFound(id.to_string()));
            }
            Ok(Action {
                id: id.to_string(),
                title: id.to_string(),
                description: String::new(),
                command: "unused".to_string(),
                args: Vec::new(),
                arguments: Vec::new(),
                options: Vec::new(),
                dir: Default::default(),
            })
        }

        fn validate_input(&self, _action: &Action, _input: &RunInput) -> Result<ResolvedInput> {
            Ok(ResolvedInput::default())
        }

        fn execute(
            &self,
            action: Action,
            _input: ResolvedInput,
            ctx: JobContext,
        ) -> JoinHandle<Result<()>> {
            tokio::spawn(async move {
                if action.id == "fail" {
                    return Err(AppError::Execution("exit status 3".to_string()));
                }
                ctx.cancel.cancelled().await;
                Err(AppError::Execution("run cancelled".to_string()))
            })
        }
    }

    pub(crate) fn fake_service(dir: &std::path::Path) -> RunService {
        RunService::new(
            Arc::new(FakeRegistry),
            Arc::new(RunManager::new(CancellationToken::new())),
            StreamCapture::new(dir),
        )
    }

    pub(crate) async fn wait_for_status(service: &RunService, action: &str, run: &str, status: RunStatus) {
        for _ in 0..100 {
            if service.get(action, run).unwrap().status() == status {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("run {} never reached {}", run, status);
    }

    #[tokio::test]
    async fn failed_job_is_recorded_in_error_stream() {
        let temp = TempDir::new().unwrap();
        let service = fake_service(temp.path());

        let info = service.start("fail", RunInput::default()).unwrap();
        wait_for_status(&service, "fail", &info.id, RunStatus::Error).await;

        assert!(service.runs().lookup(&info.id).is_none());
        let chunks = service.streams("fail", &info.id, 0, None).unwrap();
        assert!(chunks[1].content.contains("exit status 3"));
    }

    #[tokio::test]
    async fn failed_start_leaves_no_run_behind() {
        let temp = TempDir::new().unwrap();
        let logs = temp.path().join("logs");
        std::fs::write(&logs, "not a directory").unwrap();
        let service = fake_service(&logs);

        assert!(service.start("wait", RunInput::default()).is_err());
        assert!(service.runs().running("wait").is_empty());
        assert!(service.list("wait").unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancelled_run_ends_in_error() {
        let temp = TempDir::new().unwrap();
        let service = fake_service(temp.path());

        let info = service.start("wait", RunInput::default()).unwrap();
        assert_eq!(info.status, RunStatus::Running);

        service.cancel("wait", &info.id).unwrap();
        wait_for_status(&service, "wait", &info.id, RunStatus::Error).await;

        assert!(service.runs().lookup(&info.id).is_none());
        assert!(matches!(
            service.cancel("wait", &info.id),
            Err(AppError::RunNotRunning(_))
        ));
    }

    #[tokio::test]
    async fn unknown_action_and_run_are_not_found() {
        let temp = TempDir::new().unwrap();
        let service = fake_service(temp.path());

        assert!(matches!(
            service.start("nope", RunInput::default()),
            Err(AppError::ActionNotFound(_))
        ));
        assert!(matches!(
            service.get("wait", "missing"),
            Err(AppError::RunNotFound(_))
        ));
    }

    #[tokio::test]
    async fn concurrent_runs_are_isolated() {
        let temp = TempDir::new().unwrap();
        let service = fake_service(temp.path());

        let a = service.start("wait", RunInput::default()).unwrap();
        let b = service.start("wait", RunInput::default()).unwrap();
        assert_ne!(a.id, b.id);

        service.cancel("wait", &a.id).unwrap();
        wait_for_status(&service, "wait", &a.id, RunStatus::Error).await;
        assert_eq!(service.get("wait", &b.id).unwrap().status(), RunStatus::Running);

        let running: Vec<_> = service.runs().running("wait").into_iter().map(|r| r.id).collect();
        assert_eq!(running, vec![b.id.clone()]);
        service.cancel("wait", &b.id).unwrap();
    }
}
