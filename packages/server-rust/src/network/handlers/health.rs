//! Health check with supervised restart.
//!
//! The platform polls this route to keep the function warm. The caller
//! proves itself with the org id header (constant-time compare, no
//! caller token involved); the probe then pings the function backend.
//! A dead backend gets one restart-and-retry before the proxy reports
//! it unavailable.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Response;
use fxproxy_core::headers::{HEADER_HEALTH_CHECK, HEADER_ORG_ID_18};
use fxproxy_core::ProxyError;
use subtle::ConstantTimeEq as _;
use tracing::{info, warn};
use uuid::Uuid;

use super::sync::relay_response;
use super::AppState;
use crate::error::RequestError;

fn constant_time_eq(left: &str, right: &str) -> bool {
    left.as_bytes().ct_eq(right.as_bytes()).into()
}

/// Probes the function backend, restarting it once when unreachable.
pub async fn health_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, RequestError> {
    // Health checks originate from the platform, not a caller, so the
    // correlating id is generated here.
    let request_id = format!("healthcheck-{}", Uuid::new_v4());

    let presented = headers
        .get(HEADER_ORG_ID_18)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if !constant_time_eq(presented, &state.config.org_id_18) {
        warn!(request_id, "health check presented a mismatched org id");
        return Err(RequestError::new(
            request_id,
            ProxyError::Unauthorized("Unauthorized request".to_string()),
        ));
    }

    match probe(&state).await {
        Ok(response) => relay_response(&request_id, response).await,
        Err(err) if err.is_connect() => {
            warn!(request_id, error = %err, "function backend down; restarting it");
            if let Err(restart_err) = state.supervisor.restart().await {
                warn!(request_id, error = %restart_err, "function restart failed");
            }
            tokio::time::sleep(state.config.health_retry_delay).await;

            match probe(&state).await {
                Ok(response) => {
                    info!(request_id, "function backend recovered after restart");
                    relay_response(&request_id, response).await
                }
                Err(err) => Err(unavailable(request_id, &err)),
            }
        }
        Err(err) => Err(unavailable(request_id, &err)),
    }
}

async fn probe(state: &AppState) -> Result<reqwest::Response, reqwest::Error> {
    let url = format!("{}/", state.config.function_base_url);
    state.http.post(&url).header(HEADER_HEALTH_CHECK, "true").send().await
}

fn unavailable(request_id: String, err: &reqwest::Error) -> RequestError {
    RequestError::new(
        request_id,
        ProxyError::ServiceUnavailable(format!("Function health check failed: {err}")),
    )
}
