use super::{JobContext, ResolvedInput};
use crate::error::{AppError, Result};
use crate::models::Action;
use serde_json::{Map, Value};
use std::process::Stdio;

const INPUT_ENV: &str = "ACTION_INPUT";
const RUN_ID_ENV: &str = "ACTION_RUN_ID";

/// Runs an action's command as a child process.
///
/// Positional arguments follow the manifest's static `args`; options are
/// appended as `--name value` (booleans become a bare flag when true). The
/// full input is also exported as JSON in `ACTION_INPUT`.
#[derive(Clone, Default)]
pub struct ScriptExecutor;

impl ScriptExecutor {
    pub fn new() -> Self {
        Self
    }

    pub async fn execute(&self, action: &Action, input: ResolvedInput, ctx: JobContext) -> Result<()> {
        let mut cmd = tokio::process::Command::new(&action.command);
        cmd.args(&action.args);
        cmd.args(Self::command_line(&input));
        if action.dir.is_dir() {
            cmd.current_dir(&action.dir);
        }

        cmd.env(INPUT_ENV, Self::input_json(&input)?);
        cmd.env(RUN_ID_ENV, &ctx.run_id);

        cmd.stdin(Stdio::null());
        cmd.stdout(ctx.io.stdout.map(Stdio::from).unwrap_or_else(Stdio::null));
        cmd.stderr(ctx.io.stderr.map(Stdio::from).unwrap_or_else(Stdio::null));
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            AppError::Execution(format!("Failed to start '{}': {}", action.command, e))
        })?;
        tracing::info!(run_id = %ctx.run_id, pid = ?child.id(), "Action process started");

        tokio::select! {
            status = child.wait() => {
                let status = status?;
                if status.success() {
                    Ok(())
                } else {
                    Err(AppError::Execution(format!("Action exited with {}", status)))
                }
            }
            _ = ctx.cancel.cancelled() => {
                tracing::info!(run_id = %ctx.run_id, "Cancelling action process");
                if let Err(e) = child.start_kill() {
                    tracing::warn!(run_id = %ctx.run_id, "Failed to kill action process: {}", e);
                }
                let _ = child.wait().await;
                Err(AppError::Execution("run cancelled".to_string()))
            }
        }
    }

    fn command_line(input: &ResolvedInput) -> Vec<String> {
        let mut args: Vec<String> = input
            .arguments
            .iter()
            .map(|(_, value)| Self::value_to_arg(value))
            .collect();

        for (name, value) in &input.options {
            match value {
                Value::Bool(true) => args.push(format!("--{}", name)),
                Value::Bool(false) | Value::Null => {}
                other => {
                    args.push(format!("--{}", name));
                    args.push(Self::value_to_arg(other));
                }
            }
        }
        args
    }

    fn value_to_arg(value: &Value) -> String {
        match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    fn input_json(input: &ResolvedInput) -> Result<String> {
        let to_map = |pairs: &[(String, Value)]| {
            pairs
                .iter()
                .cloned()
                .collect::<Map<String, Value>>()
        };
        let payload = serde_json::json!({
            "arguments": to_map(&input.arguments),
            "options": to_map(&input.options),
        });
        serde_json::to_string(&payload)
            .map_err(|e| AppError::Execution(format!("Failed to serialize input: {}", e)))
    }
}
