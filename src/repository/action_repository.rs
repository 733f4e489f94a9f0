use crate::error::{AppError, Result};
use crate::models::Action;
use std::path::{Path, PathBuf};

const MANIFEST_FILE: &str = "action.json";

/// Reads action manifests from `<actions_dir>/<name>/action.json`.
#[derive(Clone)]
pub struct ActionRepository {
    dir: PathBuf,
}

impl ActionRepository {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Lists every readable manifest, sorted by id. Broken manifests are
    /// logged and skipped so one bad action does not hide the others.
    pub fn list(&self) -> Result<Vec<Action>> {
        if !self.dir.is_dir() {
            tracing::warn!("Actions directory {} does not exist", self.dir.display());
            return Ok(Vec::new());
        }

        let mut actions = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let manifest = entry.path().join(MANIFEST_FILE);
            if !manifest.is_file() {
                continue;
            }

            match Self::load(&manifest) {
                Ok(action) => actions.push(action),
                Err(err) => {
                    tracing::warn!("Skipping action manifest {}: {}", manifest.display(), err)
                }
            }
        }

        actions.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(actions)
    }

    pub fn get(&self, id: &str) -> Result<Action> {
        self.list()?
            .into_iter()
            .find(|action| action.id == id)
            .ok_or_else(|| AppError::ActionNotFound(id.to_string()))
    }

    fn load(manifest: &Path) -> Result<Action> {
        let content = std::fs::read_to_string(manifest)?;
        let mut action: Action = serde_json::from_str(&content)
            .map_err(|e| AppError::InvalidInput(format!("invalid manifest: {}", e)))?;

        validate_id(&action.id)?;

        action.dir = manifest
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Ok(action)
    }
}

/// Action ids end up in run ids, which name the run's log files, so they
/// must be plain file-name components without the `___` separator.
fn validate_id(id: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(AppError::InvalidInput("manifest has an empty id".to_string()));
    }
    if id.contains("___") {
        return Err(AppError::InvalidInput(format!(
            "action id '{}' must not contain '___'",
            id
        )));
    }
    let plain = id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if !plain || id.starts_with('.') {
        return Err(AppError::InvalidInput(format!(
            "action id '{}' may only use letters, digits, '-', '_' and '.', and must not start with '.'",
            id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_manifest(root: &Path, dir: &str, body: &str) {
        let action_dir = root.join(dir);
        std::fs::create_dir_all(&action_dir).unwrap();
        std::fs::write(action_dir.join(MANIFEST_FILE), body).unwrap();
    }

    #[test]
    fn lists_valid_manifests_sorted_by_id() {
        let temp = TempDir::new().unwrap();
        write_manifest(temp.path(), "b", r#"{"id": "zeta", "command": "true"}"#);
        write_manifest(temp.path(), "a", r#"{"id": "alpha", "command": "echo", "args": ["hi"]}"#);
        write_manifest(temp.path(), "broken", "{not json");

        let repo = ActionRepository::new(temp.path());
        let ids: Vec<_> = repo.list().unwrap().into_iter().map(|a| a.id).collect();
        assert_eq!(ids, vec!["alpha", "zeta"]);

        let alpha = repo.get("alpha").unwrap();
        assert_eq!(alpha.args, vec!["hi"]);
        assert_eq!(alpha.dir, temp.path().join("a"));
    }

    #[test]
    fn ids_that_cannot_name_a_log_file_are_skipped() {
        let temp = TempDir::new().unwrap();
        write_manifest(temp.path(), "up", r#"{"id": "../../escaped", "command": "true"}"#);
        write_manifest(temp.path(), "nested", r#"{"id": "group/deploy", "command": "true"}"#);
        write_manifest(temp.path(), "hidden", r#"{"id": ".env", "command": "true"}"#);
        write_manifest(temp.path(), "sep", r#"{"id": "a___b", "command": "true"}"#);
        write_manifest(temp.path(), "ok", r#"{"id": "deploy-v1.2_prod", "command": "true"}"#);

        let repo = ActionRepository::new(temp.path());
        let ids: Vec<_> = repo.list().unwrap().into_iter().map(|a| a.id).collect();
        assert_eq!(ids, vec!["deploy-v1.2_prod"]);
    }

    #[test]
    fn listed_ids_can_start_a_run() {
        let temp = TempDir::new().unwrap();
        write_manifest(temp.path(), "ok", r#"{"id": "deploy-v1.2_prod", "command": "true"}"#);
        let repo = ActionRepository::new(temp.path());
        let logs = temp.path().join("logs");
        let runs = crate::services::RunManager::new(tokio_util::sync::CancellationToken::new());
        let capture = crate::services::StreamCapture::new(&logs);
        for action in repo.list().unwrap() {
            let run_id = runs.next_run_id(&action.id);
            capture.create(&run_id, false).unwrap();
        }
    }

    #[test]
    fn missing_action_is_not_found() {
        let temp = TempDir::new().unwrap();
        let repo = ActionRepository::new(temp.path());
        assert!(matches!(repo.get("nope"), Err(AppError::ActionNotFound(_))));
    }

    #[test]
    fn missing_directory_yields_empty_catalog() {
        let temp = TempDir::new().unwrap();
        let repo = ActionRepository::new(temp.path().join("absent"));
        assert!(repo.list().unwrap().is_empty());
    }
}
