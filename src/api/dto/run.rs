use crate::models::{RunInfo, RunStatus};
use crate::services::RunHandle;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct RunResponse {
    pub id: String,
    pub action: String,
    pub status: RunStatus,
}

impl From<&RunHandle> for RunResponse {
    fn from(handle: &RunHandle) -> Self {
        Self {
            id: handle.id().to_string(),
            action: handle.action_id().to_string(),
            status: handle.status(),
        }
    }
}

impl RunResponse {
    pub fn from_info(action: &str, info: RunInfo) -> Self {
        Self {
            id: info.id,
            action: action.to_string(),
            status: info.status,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct StreamsQuery {
    pub offset: Option<u64>,
    pub limit: Option<u64>,
}
