use crate::api::routes::AppState;
use crate::error::AppError;
use axum::{
    extract::{Query, Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Rejects requests without a valid bearer token when a token store is configured.
///
/// Browsers cannot set headers on a WebSocket upgrade, so `?token=` is accepted too.
pub async fn require_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(tokens) = &state.tokens else {
        return Ok(next.run(request).await);
    };

    let from_header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string());
    let token = from_header.or_else(|| {
        Query::<TokenQuery>::try_from_uri(request.uri())
            .ok()
            .and_then(|Query(query)| query.token)
    });

    match token {
        Some(token) if tokens.validate(&token) => Ok(next.run(request).await),
        _ => {
            tracing::debug!(path = %request.uri().path(), "Rejected unauthenticated request");
            Err(AppError::Unauthorized)
        }
    }
}
