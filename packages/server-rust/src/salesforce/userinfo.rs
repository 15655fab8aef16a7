//! Caller validation via the org's OpenID Connect userinfo endpoint.
//!
//! The caller's bearer token is introspected against the org named in
//! the request context; the organization id it resolves to must match
//! the org id the proxy was configured to trust. Any failure along the
//! way collapses to a uniform `Unauthorized request` response -- the
//! detail is logged server-side only.

use fxproxy_core::ProxyError;
use serde::Deserialize;
use tracing::warn;

#[derive(Debug, Deserialize)]
struct UserInfo {
    organization_id: String,
}

/// Introspects the caller's token and anchors it to the expected org.
///
/// # Errors
///
/// Returns [`ProxyError::Unauthorized`] when the userinfo request
/// fails, the response is not parseable, or the organization id does
/// not match `expected_org_id`.
pub async fn validate_caller(
    http: &reqwest::Client,
    org_base_url: &str,
    caller_token: &str,
    expected_org_id: &str,
    request_id: &str,
) -> Result<(), ProxyError> {
    let url = format!("{}/services/oauth2/userinfo", org_base_url.trim_end_matches('/'));
    let unauthorized = || ProxyError::Unauthorized("Unauthorized request".to_string());

    let response = http
        .get(&url)
        .bearer_auth(caller_token)
        .send()
        .await
        .map_err(|err| {
            warn!(request_id, error = %err, "userinfo request failed");
            unauthorized()
        })?;

    let status = response.status();
    if !status.is_success() {
        warn!(request_id, %status, "userinfo introspection rejected caller token");
        return Err(unauthorized());
    }

    let info: UserInfo = response.json().await.map_err(|err| {
        warn!(request_id, error = %err, "userinfo response was not parseable");
        unauthorized()
    })?;

    if info.organization_id != expected_org_id {
        warn!(
            request_id,
            caller_org = %info.organization_id,
            "caller org does not match the org this proxy serves"
        );
        return Err(unauthorized());
    }

    Ok(())
}
