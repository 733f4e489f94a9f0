pub mod script_executor;

pub use script_executor::ScriptExecutor;

use crate::error::Result;
use crate::models::{Action, RunInput};
use serde_json::Value;
use std::fs::File;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Catalog of runnable actions and the engine that executes them.
pub trait ActionRegistry: Send + Sync {
    fn list(&self) -> Result<Vec<Action>>;

    fn get(&self, id: &str) -> Result<Action>;

    /// Checks the input against the action's declared parameters and fills defaults.
    fn validate_input(&self, action: &Action, input: &RunInput) -> Result<ResolvedInput>;

    /// Starts the action in the background. The job must stop once
    /// `ctx.cancel` fires.
    fn execute(&self, action: Action, input: ResolvedInput, ctx: JobContext)
    -> JoinHandle<Result<()>>;
}

/// Validated parameters in declaration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedInput {
    pub arguments: Vec<(String, Value)>,
    pub options: Vec<(String, Value)>,
}

/// Output sinks for one job. `None` discards the stream.
#[derive(Debug, Default)]
pub struct JobIo {
    pub stdout: Option<File>,
    pub stderr: Option<File>,
}

#[derive(Debug)]
pub struct JobContext {
    pub run_id: String,
    pub cancel: CancellationToken,
    pub io: JobIo,
}
