//! Request handlers and the shared validation/enrichment pipeline.
//!
//! Every invocation route runs the same front half: parse the context
//! headers, anchor the caller to the configured org, mint a delegated
//! token, activate permission sets, and attach the token to the
//! function context. Handlers differ only in what happens after.

pub mod async_invoke;
pub mod health;
pub mod sync;

use std::sync::Arc;

use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use fxproxy_core::headers::{
    AUTHORIZATION_BEARER_PREFIX, HEADER_FUNCTION_REQUEST_CONTEXT, HEADER_REQUEST_ID,
    HEADER_SALESFORCE_CONTEXT,
};
use fxproxy_core::{FunctionContext, ProxyError, SalesforceContext};
use tracing::info;

use crate::config::Config;
use crate::error::RequestError;
use crate::salesforce::{permsets, TokenMinter};
use crate::salesforce::userinfo::validate_caller;
use crate::supervisor::Supervisor;

pub use async_invoke::{async_handler, completion_hook};
pub use health::health_handler;
pub use sync::sync_handler;

/// Shared per-process state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub http: reqwest::Client,
    pub minter: Arc<TokenMinter>,
    pub supervisor: Arc<Supervisor>,
}

/// A request that passed header parsing and caller validation.
#[derive(Debug, Clone)]
pub struct ValidatedRequest {
    pub request_id: String,
    pub caller_token: String,
    pub fn_context: FunctionContext,
    pub sf_context: SalesforceContext,
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok()).filter(|value| !value.is_empty())
}

/// Parses and shape-validates the invocation headers.
fn parse_headers(headers: &HeaderMap) -> Result<ValidatedRequest, RequestError> {
    let request_id = header_value(headers, HEADER_REQUEST_ID)
        .ok_or_else(|| {
            RequestError::bare(ProxyError::BadRequest(format!("{HEADER_REQUEST_ID} not found")))
        })?
        .to_string();

    let caller_token = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix(AUTHORIZATION_BEARER_PREFIX))
        .filter(|token| !token.is_empty())
        .ok_or_else(|| {
            RequestError::new(
                request_id.clone(),
                ProxyError::BadRequest("Authorization not found".to_string()),
            )
        })?
        .to_string();

    let encoded_fn_context =
        header_value(headers, HEADER_FUNCTION_REQUEST_CONTEXT).ok_or_else(|| {
            RequestError::new(
                request_id.clone(),
                ProxyError::BadRequest("Context not provided".to_string()),
            )
        })?;
    let fn_context = FunctionContext::decode(encoded_fn_context).map_err(|err| {
        RequestError::decode_failure(request_id.clone(), HEADER_FUNCTION_REQUEST_CONTEXT, &err)
    })?;
    fn_context.validate().map_err(|err| RequestError::new(request_id.clone(), err))?;

    let encoded_sf_context = header_value(headers, HEADER_SALESFORCE_CONTEXT).ok_or_else(|| {
        RequestError::new(
            request_id.clone(),
            ProxyError::BadRequest("Salesforce context not provided".to_string()),
        )
    })?;
    let sf_context = SalesforceContext::decode(encoded_sf_context).map_err(|err| {
        RequestError::decode_failure(request_id.clone(), HEADER_SALESFORCE_CONTEXT, &err)
    })?;
    sf_context.validate().map_err(|err| RequestError::new(request_id.clone(), err))?;

    Ok(ValidatedRequest { request_id, caller_token, fn_context, sf_context })
}

/// Runs the full validation front half: header parsing plus caller
/// introspection against the configured org.
pub async fn validate(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<ValidatedRequest, RequestError> {
    let validated = parse_headers(headers)?;

    // parse_headers shape-validated the context, so the user part is
    // present; the fallback only guards against future refactors.
    let user = validated
        .sf_context
        .user_context
        .as_ref()
        .ok_or_else(|| {
            RequestError::new(
                validated.request_id.clone(),
                ProxyError::BadRequest("UserContext not provided".to_string()),
            )
        })?;
    let base_url = user.salesforce_base_url.as_deref().unwrap_or_default();

    validate_caller(
        &state.http,
        base_url,
        &validated.caller_token,
        &state.config.org_id_18,
        &validated.request_id,
    )
    .await
    .map_err(|err| RequestError::new(validated.request_id.clone(), err))?;

    info!(request_id = %validated.request_id, "caller validated");
    Ok(validated)
}

/// Enriches a validated request: mints the delegated token, activates
/// permission sets, and attaches the token to the function context.
pub async fn enrich(state: &AppState, validated: &mut ValidatedRequest) -> Result<(), RequestError> {
    let request_id = validated.request_id.clone();
    let wrap = |err: ProxyError| RequestError::new(request_id.clone(), err);

    let user = validated
        .sf_context
        .user_context
        .as_ref()
        .ok_or_else(|| wrap(ProxyError::BadRequest("UserContext not provided".to_string())))?;
    let base_url = user.salesforce_base_url.clone().unwrap_or_default();
    let username = user.username.clone().unwrap_or_default();
    let api_version = validated.sf_context.api_version.clone().unwrap_or_default();

    let token = state
        .minter
        .mint(&state.http, &base_url, &username, &validated.request_id)
        .await
        .map_err(wrap)?;

    let permission_sets = validated.fn_context.permission_sets.clone().unwrap_or_default();
    permsets::activate(
        &state.http,
        &base_url,
        &api_version,
        &token,
        &permission_sets,
        &validated.request_id,
    )
    .await
    .map_err(|err| RequestError::new(request_id.clone(), err))?;

    validated.fn_context.set_access_token(token);
    info!(request_id = %validated.request_id, "request enriched with minted token");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;

    fn encode(json: &str) -> String {
        BASE64.encode(json)
    }

    fn valid_headers() -> HeaderMap {
        let fn_context = encode(
            r#"{"type":"com.salesforce.function.invoke.sync","functionName":"myfn"}"#,
        );
        let sf_context = encode(
            r#"{"apiVersion":"57.0","userContext":{"orgId":"00Dxx0000006IYJ","username":"admin@example.com","salesforceBaseUrl":"https://na1.salesforce.com"}}"#,
        );

        let mut headers = HeaderMap::new();
        headers.insert(HEADER_REQUEST_ID, HeaderValue::from_static("req-1"));
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer caller-token"));
        headers.insert(
            HEADER_FUNCTION_REQUEST_CONTEXT,
            HeaderValue::from_str(&fn_context).expect("header"),
        );
        headers.insert(
            HEADER_SALESFORCE_CONTEXT,
            HeaderValue::from_str(&sf_context).expect("header"),
        );
        headers
    }

    #[test]
    fn parse_headers_accepts_valid_request() {
        let validated = parse_headers(&valid_headers()).expect("valid");
        assert_eq!(validated.request_id, "req-1");
        assert_eq!(validated.caller_token, "caller-token");
        assert!(!validated.fn_context.is_async());
    }

    #[test]
    fn parse_headers_requires_request_id() {
        let mut headers = valid_headers();
        headers.remove(HEADER_REQUEST_ID);
        let err = parse_headers(&headers).expect_err("missing request id");
        assert_eq!(err.error().status(), 400);
        assert_eq!(err.to_string(), "x-request-id not found");
    }

    #[test]
    fn parse_headers_requires_bearer_authorization() {
        let mut headers = valid_headers();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        let err = parse_headers(&headers).expect_err("missing bearer");
        assert_eq!(err.to_string(), "[req-1] Authorization not found");
    }

    #[test]
    fn parse_headers_requires_function_context() {
        let mut headers = valid_headers();
        headers.remove(HEADER_FUNCTION_REQUEST_CONTEXT);
        let err = parse_headers(&headers).expect_err("missing context");
        assert_eq!(err.to_string(), "[req-1] Context not provided");
    }

    #[test]
    fn parse_headers_rejects_undecodable_context() {
        let mut headers = valid_headers();
        headers.insert(
            HEADER_FUNCTION_REQUEST_CONTEXT,
            HeaderValue::from_static("not-base64!"),
        );
        let err = parse_headers(&headers).expect_err("bad context");
        assert!(err.to_string().contains("Invalid ce-sffncontext format"));
    }

    #[test]
    fn parse_headers_rejects_invalid_invocation_type() {
        let mut headers = valid_headers();
        let fn_context = encode(r#"{"type":"com.salesforce.function.invoke.nope"}"#);
        headers.insert(
            HEADER_FUNCTION_REQUEST_CONTEXT,
            HeaderValue::from_str(&fn_context).expect("header"),
        );
        let err = parse_headers(&headers).expect_err("bad type");
        assert!(err.to_string().contains("Invalid function invocation type"));
    }
}
