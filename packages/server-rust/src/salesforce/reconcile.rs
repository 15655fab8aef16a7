//! Async invocation reconciliation.
//!
//! After an async invocation completes, the function's outcome is
//! written back to the org's `AsyncFunctionInvocationRequest__c`
//! tracking record via a REST PATCH. Field and object names are
//! prefixed with the org's package namespace when one is present.

use fxproxy_core::ProxyError;
use serde_json::{Map, Value};
use tracing::{info, warn};

use super::api_url;

const TRACKING_OBJECT: &str = "AsyncFunctionInvocationRequest__c";

pub const STATUS_SUCCESS: &str = "SUCCESS";
pub const STATUS_ERROR: &str = "ERROR";

/// Outcome of an async function invocation, ready to be written back.
#[derive(Debug, Clone)]
pub struct FunctionOutcome {
    /// HTTP status the function responded with.
    pub status_code: u16,
    /// Function response body, stored verbatim.
    pub body: String,
    /// URL-encoded `x-extra-info` header value, when present.
    pub extra_info: Option<String>,
}

impl FunctionOutcome {
    fn status(&self) -> &'static str {
        if (200..300).contains(&u32::from(self.status_code)) {
            STATUS_SUCCESS
        } else {
            STATUS_ERROR
        }
    }
}

/// Prefixes `name` with `ns__` when a namespace is present.
#[must_use]
pub fn qualified_name(namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(ns) => format!("{ns}__{name}"),
        None => name.to_string(),
    }
}

fn update_fields(namespace: Option<&str>, outcome: &FunctionOutcome) -> Map<String, Value> {
    let mut fields = Map::new();
    if let Some(extra_info) = &outcome.extra_info {
        let decoded = urlencoding::decode(extra_info)
            .map_or_else(|_| extra_info.clone(), |decoded| decoded.into_owned());
        fields.insert(qualified_name(namespace, "ExtraInfo__c"), Value::String(decoded));
    }
    fields.insert(qualified_name(namespace, "Response__c"), Value::String(outcome.body.clone()));
    fields.insert(
        qualified_name(namespace, "Status__c"),
        Value::String(outcome.status().to_string()),
    );
    fields.insert(
        qualified_name(namespace, "StatusCode__c"),
        Value::Number(outcome.status_code.into()),
    );
    fields
}

/// Writes the invocation outcome to the tracking record.
///
/// # Errors
///
/// Returns [`ProxyError::ServiceUnavailable`] when the PATCH fails or
/// the org responds with anything but 204. A 404 appends a hint about
/// object access for the invoking user, the most common cause.
#[allow(clippy::too_many_arguments)]
pub async fn update(
    http: &reqwest::Client,
    org_base_url: &str,
    api_version: &str,
    function_token: &str,
    namespace: Option<&str>,
    record_id: &str,
    username: &str,
    outcome: &FunctionOutcome,
) -> Result<(), ProxyError> {
    let object = qualified_name(namespace, TRACKING_OBJECT);
    let url = api_url(org_base_url, api_version, &format!("/sobjects/{object}/{record_id}"));
    let fields = update_fields(namespace, outcome);

    let response = http
        .patch(&url)
        .bearer_auth(function_token)
        .json(&Value::Object(fields))
        .send()
        .await
        .map_err(|err| {
            ProxyError::ServiceUnavailable(format!(
                "Unable to save function response to {object} [{record_id}]: {err}"
            ))
        })?;

    let status = response.status();
    if status.as_u16() == 204 {
        info!(record_id, status = outcome.status(), "async invocation outcome saved");
        return Ok(());
    }

    let body = response.text().await.unwrap_or_default();
    warn!(record_id, %status, %body, "tracking record update rejected");
    let mut message =
        format!("Unable to save function response to {object} [{record_id}]: {status} {body}");
    if status.as_u16() == 404 {
        message.push_str(&format!(" Ensure that user {username} has access to {object}."));
    }
    Err(ProxyError::ServiceUnavailable(message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qualified_name_applies_namespace_prefix() {
        assert_eq!(qualified_name(Some("myns"), "Status__c"), "myns__Status__c");
        assert_eq!(qualified_name(None, "Status__c"), "Status__c");
    }

    #[test]
    fn success_outcome_maps_to_success_status() {
        let outcome = FunctionOutcome { status_code: 201, body: String::new(), extra_info: None };
        assert_eq!(outcome.status(), STATUS_SUCCESS);
    }

    #[test]
    fn failure_outcome_maps_to_error_status() {
        let outcome = FunctionOutcome { status_code: 500, body: String::new(), extra_info: None };
        assert_eq!(outcome.status(), STATUS_ERROR);
    }

    #[test]
    fn update_fields_carry_outcome() {
        let outcome = FunctionOutcome {
            status_code: 200,
            body: r#"{"done":true}"#.to_string(),
            extra_info: Some("%7B%22stack%22%3A%22%22%7D".to_string()),
        };
        let fields = update_fields(None, &outcome);
        assert_eq!(fields["Response__c"], r#"{"done":true}"#);
        assert_eq!(fields["Status__c"], "SUCCESS");
        assert_eq!(fields["StatusCode__c"], 200);
        assert_eq!(fields["ExtraInfo__c"], r#"{"stack":""}"#);
    }

    #[test]
    fn update_fields_respect_namespace() {
        let outcome = FunctionOutcome { status_code: 500, body: "boom".to_string(), extra_info: None };
        let fields = update_fields(Some("myns"), &outcome);
        assert!(fields.contains_key("myns__Status__c"));
        assert!(fields.contains_key("myns__StatusCode__c"));
        assert!(!fields.contains_key("Status__c"));
        assert!(!fields.contains_key("myns__ExtraInfo__c"));
    }
}
