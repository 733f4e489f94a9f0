use crate::error::{AppError, Result};
use crate::executor::{ActionRegistry, JobContext, ResolvedInput, ScriptExecutor};
use crate::models::{Action, ActionParameter, RunInput};
use crate::repository::ActionRepository;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use tokio::task::JoinHandle;

/// Action catalog backed by manifests on disk, executed as child processes.
#[derive(Clone)]
pub struct ActionService {
    repo: ActionRepository,
    executor: ScriptExecutor,
    excluded: HashSet<String>,
}

impl ActionService {
    pub fn new(repo: ActionRepository, excluded: impl IntoIterator<Item = String>) -> Self {
        Self {
            repo,
            executor: ScriptExecutor::new(),
            excluded: excluded.into_iter().collect(),
        }
    }

    fn resolve_parameters(
        kind: &str,
        schema: &[ActionParameter],
        provided: &Map<String, Value>,
    ) -> Result<Vec<(String, Value)>> {
        let mut schema_map = HashMap::new();
        for param in schema {
            let name = param.name.trim();
            if name.is_empty() {
                return Err(AppError::InvalidInput(format!(
                    "{} name cannot be empty",
                    kind
                )));
            }
            if schema_map.insert(name, param).is_some() {
                return Err(AppError::InvalidInput(format!(
                    "Duplicate {} name: {}",
                    kind, name
                )));
            }
        }

        for (name, value) in provided {
            let Some(schema_param) = schema_map.get(name.as_str()) else {
                return Err(AppError::InvalidInput(format!("Unknown {}: {}", kind, name)));
            };
            if !schema_param.param_type.matches(value) {
                return Err(AppError::InvalidInput(format!(
                    "{} '{}' does not match type {:?}",
                    kind, name, schema_param.param_type
                )));
            }
        }

        let mut resolved = Vec::with_capacity(schema.len());
        for param in schema {
            if let Some(value) = provided.get(param.name.trim()) {
                resolved.push((param.name.trim().to_string(), value.clone()));
            } else if let Some(default) = &param.default {
                resolved.push((param.name.trim().to_string(), default.clone()));
            } else {
                return Err(AppError::InvalidInput(format!(
                    "Missing required {}: {}",
                    kind, param.name
                )));
            }
        }

        Ok(resolved)
    }
}

impl ActionRegistry for ActionService {
    fn list(&self) -> Result<Vec<Action>> {
        Ok(self
            .repo
            .list()?
            .into_iter()
            .filter(|action| !self.excluded.contains(&action.id))
            .collect())
    }

    fn get(&self, id: &str) -> Result<Action> {
        if self.excluded.contains(id) {
            return Err(AppError::ActionNotFound(id.to_string()));
        }
        self.repo.get(id)
    }

    fn validate_input(&self, action: &Action, input: &RunInput) -> Result<ResolvedInput> {
        Ok(ResolvedInput {
            arguments: Self::resolve_parameters("argument", &action.arguments, &input.arguments)?,
            options: Self::resolve_parameters("option", &action.options, &input.options)?,
        })
    }

    fn execute(
        &self,
        action: Action,
        input: ResolvedInput,
        ctx: JobContext,
    ) -> JoinHandle<Result<()>> {
        let executor = self.executor.clone();
        tokio::spawn(async move { executor.execute(&action, input, ctx).await })
    }
}
