use reqwest::StatusCode;
use std::time::Duration;

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// `HEAD <url>`; healthy on 200 or 401 (auth-protected but up).
pub async fn probe(url: &str) -> bool {
    let client = match reqwest::Client::builder().timeout(PROBE_TIMEOUT).build() {
        Ok(client) => client,
        Err(err) => {
            tracing::warn!("Failed to build health probe client: {}", err);
            return false;
        }
    };

    match client.head(url).send().await {
        Ok(response) => matches!(response.status(), StatusCode::OK | StatusCode::UNAUTHORIZED),
        Err(err) => {
            tracing::debug!(url, "Health probe failed: {}", err);
            false
        }
    }
}
