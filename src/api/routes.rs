use super::handlers::{action, run, system};
use super::middleware::{auth::require_token, cors::add_cors};
use super::ws;
use crate::services::{RunService, TokenStore};
use axum::{
    Router, middleware,
    routing::{get, post},
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct AppState {
    pub runs: RunService,
    /// `None` disables authentication.
    pub tokens: Option<Arc<TokenStore>>,
    /// Cancelled to stop the server; parent of every run's token.
    pub shutdown: CancellationToken,
    pub ws_interval: Duration,
}

pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/actions", get(action::list_actions))
        .route(
            "/actions/{id}",
            get(action::get_action).post(action::run_action),
        )
        .route("/actions/{id}/running", get(run::list_runs))
        .route(
            "/actions/{id}/running/{run_id}",
            get(run::get_run).delete(run::cancel_run),
        )
        .route(
            "/actions/{id}/running/{run_id}/streams",
            get(run::get_streams),
        )
        .route("/shutdown", post(system::shutdown))
        .route("/ws", get(ws::ws_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_token));

    let app = Router::new()
        .route("/", get(system::root))
        .nest("/api", api_routes)
        .with_state(state);

    add_cors(app)
}
