use crate::api::dto::action::{ActionDetailResponse, ActionResponse};
use crate::api::dto::run::RunResponse;
use crate::api::routes::AppState;
use crate::error::{AppError, Result};
use crate::models::RunInput;
use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
};

pub async fn list_actions(State(state): State<AppState>) -> Result<Json<Vec<ActionResponse>>> {
    let actions = state.runs.registry().list()?;
    Ok(Json(actions.into_iter().map(ActionResponse::from).collect()))
}

pub async fn get_action(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ActionDetailResponse>> {
    let action = state.runs.registry().get(&id)?;
    Ok(Json(ActionDetailResponse::from(action)))
}

/// Starts a run and returns before the job completes.
pub async fn run_action(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<RunResponse>)> {
    let input = if body.is_empty() {
        RunInput::default()
    } else {
        serde_json::from_slice::<RunInput>(&body)
            .map_err(|e| AppError::InvalidInput(format!("Invalid run parameters: {}", e)))?
    };

    let info = state.runs.start(&id, input)?;
    Ok((StatusCode::CREATED, Json(RunResponse::from_info(&id, info))))
}
