use crate::api::dto::run::{RunResponse, StreamsQuery};
use crate::api::routes::AppState;
use crate::error::Result;
use crate::services::StreamChunk;
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};

pub async fn list_runs(
    State(state): State<AppState>,
    Path(action_id): Path<String>,
) -> Result<Json<Vec<RunResponse>>> {
    let runs = state.runs.list(&action_id)?;
    Ok(Json(
        runs.into_iter()
            .map(|info| RunResponse::from_info(&action_id, info))
            .collect(),
    ))
}

pub async fn get_run(
    State(state): State<AppState>,
    Path((action_id, run_id)): Path<(String, String)>,
) -> Result<Json<RunResponse>> {
    let handle = state.runs.get(&action_id, &run_id)?;
    Ok(Json(RunResponse::from(handle.as_ref())))
}

pub async fn cancel_run(
    State(state): State<AppState>,
    Path((action_id, run_id)): Path<(String, String)>,
) -> Result<StatusCode> {
    state.runs.cancel(&action_id, &run_id)?;
    Ok(StatusCode::ACCEPTED)
}

pub async fn get_streams(
    State(state): State<AppState>,
    Path((action_id, run_id)): Path<(String, String)>,
    Query(query): Query<StreamsQuery>,
) -> Result<Json<Vec<StreamChunk>>> {
    let chunks = state.runs.streams(
        &action_id,
        &run_id,
        query.offset.unwrap_or(0),
        query.limit,
    )?;
    Ok(Json(chunks))
}
