use crate::api::routes::AppState;
use axum::{Json, extract::State, http::StatusCode};
use serde_json::{Value, json};

/// Liveness endpoint for health probes; never authenticated.
pub async fn root() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn shutdown(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    tracing::info!("Shutdown requested over HTTP");
    state.shutdown.cancel();
    (
        StatusCode::ACCEPTED,
        Json(json!({ "message": "Server is shutting down" })),
    )
}
