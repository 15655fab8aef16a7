//! Session-based permission-set activation.
//!
//! Before a function runs, every permission set named in its context is
//! activated for the minted session in one batched invocable-action
//! call. Activation is all-or-nothing from the proxy's point of view:
//! any failed item blocks the invocation.

use fxproxy_core::ProxyError;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use super::api_url;

/// One activation input, split into namespace and bare name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivatePermSetRequest {
    #[serde(rename = "PermSetName")]
    pub name: String,
    #[serde(rename = "PermSetNamespace", skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl ActivatePermSetRequest {
    /// Splits a possibly namespace-qualified name (`ns__Name`) on the
    /// first `__` separator.
    #[must_use]
    pub fn from_qualified(qualified: &str) -> Self {
        match qualified.split_once("__") {
            Some((namespace, name)) if !namespace.is_empty() && !name.is_empty() => Self {
                name: name.to_string(),
                namespace: Some(namespace.to_string()),
            },
            _ => Self { name: qualified.to_string(), namespace: None },
        }
    }
}

#[derive(Debug, Deserialize)]
struct ActionResult {
    #[serde(rename = "isSuccess")]
    is_success: bool,
    #[serde(default)]
    errors: Vec<ActionError>,
}

#[derive(Debug, Deserialize)]
struct ActionError {
    #[serde(rename = "statusCode")]
    status_code: Option<String>,
    message: Option<String>,
}

/// Activates `permission_sets` for the minted session token.
///
/// An empty list is a no-op.
///
/// # Errors
///
/// Returns [`ProxyError::Unauthorized`] or [`ProxyError::Forbidden`]
/// when the org rejects the session, and
/// [`ProxyError::ServiceUnavailable`] when the call fails or any set
/// in the batch fails to activate.
pub async fn activate(
    http: &reqwest::Client,
    org_base_url: &str,
    api_version: &str,
    function_token: &str,
    permission_sets: &[String],
    request_id: &str,
) -> Result<(), ProxyError> {
    if permission_sets.is_empty() {
        debug!(request_id, "no permission sets to activate");
        return Ok(());
    }

    let inputs: Vec<ActivatePermSetRequest> = permission_sets
        .iter()
        .map(|qualified| ActivatePermSetRequest::from_qualified(qualified))
        .collect();
    let url = api_url(org_base_url, api_version, "/actions/standard/activateSessionPermSet");

    let response = http
        .post(&url)
        .bearer_auth(function_token)
        .json(&json!({ "inputs": inputs }))
        .send()
        .await
        .map_err(|err| {
            warn!(request_id, error = %err, "permission set activation request failed");
            activation_failure(permission_sets, &err.to_string())
        })?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let detail = flatten_error_body(&body);
        warn!(request_id, %status, %detail, "permission set activation rejected");
        return Err(match status.as_u16() {
            401 => ProxyError::Unauthorized(activation_message(permission_sets, &detail)),
            403 => ProxyError::Forbidden(activation_message(permission_sets, &detail)),
            _ => activation_failure(permission_sets, &detail),
        });
    }

    let results: Vec<ActionResult> = response.json().await.map_err(|err| {
        warn!(request_id, error = %err, "activation response was not parseable");
        activation_failure(permission_sets, &err.to_string())
    })?;

    let failures: Vec<String> = results
        .iter()
        .filter(|result| !result.is_success)
        .flat_map(|result| result.errors.iter().map(flatten_action_error))
        .collect();
    if failures.is_empty() {
        debug!(request_id, count = permission_sets.len(), "permission sets activated");
        Ok(())
    } else {
        warn!(request_id, ?failures, "permission set activation reported failures");
        Err(activation_failure(permission_sets, &failures.join("; ")))
    }
}

fn activation_message(permission_sets: &[String], detail: &str) -> String {
    format!(
        "Unable to activate session-based permission set(s) {}: {detail}",
        permission_sets.join(", ")
    )
}

fn activation_failure(permission_sets: &[String], detail: &str) -> ProxyError {
    ProxyError::ServiceUnavailable(activation_message(permission_sets, detail))
}

/// Flattens a REST error body (an array of `{message, errorCode}`
/// objects) into a single line, falling back to the raw body.
fn flatten_error_body(body: &str) -> String {
    #[derive(Deserialize)]
    struct RestError {
        message: Option<String>,
        #[serde(rename = "errorCode")]
        error_code: Option<String>,
    }

    match serde_json::from_str::<Vec<RestError>>(body) {
        Ok(errors) if !errors.is_empty() => errors
            .iter()
            .map(|err| match (&err.message, &err.error_code) {
                (Some(message), Some(code)) => format!("{message} [{code}]"),
                (Some(message), None) => message.clone(),
                (None, Some(code)) => format!("[{code}]"),
                (None, None) => "unknown error".to_string(),
            })
            .collect::<Vec<_>>()
            .join("; "),
        _ => body.to_string(),
    }
}

fn flatten_action_error(err: &ActionError) -> String {
    match (&err.message, &err.status_code) {
        (Some(message), Some(code)) => format!("{message} [{code}]"),
        (Some(message), None) => message.clone(),
        (None, Some(code)) => format!("[{code}]"),
        (None, None) => "unknown error".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qualified_name_splits_on_first_separator() {
        let request = ActivatePermSetRequest::from_qualified("myns__ViewDashboards");
        assert_eq!(request.namespace.as_deref(), Some("myns"));
        assert_eq!(request.name, "ViewDashboards");
    }

    #[test]
    fn unqualified_name_has_no_namespace() {
        let request = ActivatePermSetRequest::from_qualified("ViewDashboards");
        assert_eq!(request.namespace, None);
        assert_eq!(request.name, "ViewDashboards");
    }

    #[test]
    fn double_separator_inside_name_stays_with_name() {
        let request = ActivatePermSetRequest::from_qualified("ns__View__Extra");
        assert_eq!(request.namespace.as_deref(), Some("ns"));
        assert_eq!(request.name, "View__Extra");
    }

    #[test]
    fn serializes_with_salesforce_field_names() {
        let request = ActivatePermSetRequest::from_qualified("ns__View");
        let value = serde_json::to_value(&request).expect("serialize");
        assert_eq!(value["PermSetName"], "View");
        assert_eq!(value["PermSetNamespace"], "ns");
    }

    #[test]
    fn unqualified_serialization_omits_namespace() {
        let request = ActivatePermSetRequest::from_qualified("View");
        let value = serde_json::to_value(&request).expect("serialize");
        assert!(value.get("PermSetNamespace").is_none());
    }

    #[test]
    fn flatten_error_body_joins_rest_errors() {
        let body = r#"[{"message":"Session expired","errorCode":"INVALID_SESSION_ID"}]"#;
        assert_eq!(flatten_error_body(body), "Session expired [INVALID_SESSION_ID]");
    }

    #[test]
    fn flatten_error_body_falls_back_to_raw_text() {
        assert_eq!(flatten_error_body("<html>gateway error</html>"), "<html>gateway error</html>");
    }
}
