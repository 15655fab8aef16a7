//! Synchronous invocation proxying.
//!
//! The whole request is forwarded to the function backend after
//! enrichment; the function's response streams back to the caller
//! verbatim. Only the `ce-sffncontext` header differs from what the
//! caller sent -- it carries the minted token.

use axum::body::{to_bytes, Body};
use axum::extract::State;
use axum::http::header::{AUTHORIZATION, CONTENT_LENGTH, HOST, TRANSFER_ENCODING};
use axum::http::{HeaderMap, HeaderValue, Request, StatusCode};
use axum::response::Response;
use fxproxy_core::headers::{AUTHORIZATION_BEARER_PREFIX, HEADER_FUNCTION_REQUEST_CONTEXT};
use fxproxy_core::ProxyError;
use tracing::{info, warn};

use super::{enrich, validate, AppState};
use crate::error::RequestError;

/// Builds the backend URL for a `/sync`-prefixed request path.
fn backend_url(function_base_url: &str, path: &str, query: Option<&str>) -> String {
    let rest = path.strip_prefix("/sync").unwrap_or(path);
    let rest = if rest.is_empty() { "/" } else { rest };
    match query {
        Some(query) => format!("{function_base_url}{rest}?{query}"),
        None => format!("{function_base_url}{rest}"),
    }
}

/// Strips hop-specific headers the backend request must not inherit.
pub(super) fn strip_hop_headers(headers: &mut HeaderMap) {
    headers.remove(HOST);
    headers.remove(CONTENT_LENGTH);
    headers.remove(TRANSFER_ENCODING);
}

/// Swaps the caller's `authorization` for the minted delegated token.
///
/// The caller's own token never reaches the function; a context with
/// no minted token forwards without any `authorization` at all.
pub(super) fn set_delegated_authorization(headers: &mut HeaderMap, token: Option<&str>) {
    headers.remove(AUTHORIZATION);
    if let Some(token) = token {
        if let Ok(value) = HeaderValue::from_str(&format!("{AUTHORIZATION_BEARER_PREFIX}{token}"))
        {
            headers.insert(AUTHORIZATION, value);
        }
    }
}

/// Forwards a validated, enriched request to the function backend.
pub async fn sync_handler(
    State(state): State<AppState>,
    request: Request<Body>,
) -> Result<Response, RequestError> {
    let (parts, body) = request.into_parts();

    let mut validated = validate(&state, &parts.headers).await?;
    enrich(&state, &mut validated).await?;
    let request_id = validated.request_id.clone();

    let url = backend_url(
        &state.config.function_base_url,
        parts.uri.path(),
        parts.uri.query(),
    );

    let mut headers = parts.headers;
    strip_hop_headers(&mut headers);
    set_delegated_authorization(&mut headers, validated.fn_context.access_token.as_deref());
    let enriched = validated.fn_context.encode();
    headers.insert(
        HEADER_FUNCTION_REQUEST_CONTEXT,
        HeaderValue::from_str(&enriched).map_err(|err| {
            RequestError::new(
                request_id.clone(),
                ProxyError::BadRequest(format!("Invalid enriched context: {err}")),
            )
        })?,
    );

    let body = to_bytes(body, usize::MAX).await.map_err(|err| {
        RequestError::new(
            request_id.clone(),
            ProxyError::BadRequest(format!("Unable to read request body: {err}")),
        )
    })?;

    info!(request_id, %url, "forwarding sync invocation");
    let response = state
        .http
        .request(parts.method, &url)
        .headers(headers)
        .body(body)
        .send()
        .await
        .map_err(|err| {
            warn!(
                request_id,
                error = %err,
                "function backend unreachable; the health check will restart it if it stays down"
            );
            RequestError::new(
                request_id.clone(),
                ProxyError::ServiceUnavailable(format!("Function unavailable: {err}")),
            )
        })?;

    relay_response(&request_id, response).await
}

/// Mirrors the backend response back to the caller.
pub(super) async fn relay_response(
    request_id: &str,
    response: reqwest::Response,
) -> Result<Response, RequestError> {
    let status = response.status();
    let mut headers = response.headers().clone();
    headers.remove(CONTENT_LENGTH);
    headers.remove(TRANSFER_ENCODING);

    let body = response.bytes().await.map_err(|err| {
        RequestError::new(
            request_id.to_string(),
            ProxyError::ServiceUnavailable(format!("Function response unreadable: {err}")),
        )
    })?;

    let mut reply = Response::builder()
        .status(StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY))
        .body(Body::from(body))
        .map_err(|err| {
            RequestError::new(
                request_id.to_string(),
                ProxyError::ServiceUnavailable(format!("Unable to relay response: {err}")),
            )
        })?;
    *reply.headers_mut() = headers;
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_url_strips_sync_prefix() {
        assert_eq!(
            backend_url("http://localhost:8080", "/sync", None),
            "http://localhost:8080/"
        );
        assert_eq!(
            backend_url("http://localhost:8080", "/sync/api/echo", None),
            "http://localhost:8080/api/echo"
        );
    }

    #[test]
    fn backend_url_preserves_query() {
        assert_eq!(
            backend_url("http://localhost:8080", "/sync/api", Some("a=1&b=2")),
            "http://localhost:8080/api?a=1&b=2"
        );
    }

    #[test]
    fn strip_hop_headers_removes_host_and_lengths() {
        let mut headers = HeaderMap::new();
        headers.insert(HOST, HeaderValue::from_static("proxy.local"));
        headers.insert(CONTENT_LENGTH, HeaderValue::from_static("12"));
        headers.insert("x-custom", HeaderValue::from_static("kept"));
        strip_hop_headers(&mut headers);
        assert!(headers.get(HOST).is_none());
        assert!(headers.get(CONTENT_LENGTH).is_none());
        assert_eq!(
            headers.get("x-custom").map(|v| v.to_str().map_err(drop)),
            Some(Ok("kept"))
        );
    }

    #[test]
    fn delegated_authorization_replaces_callers_token() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer caller-token"));
        set_delegated_authorization(&mut headers, Some("minted-token"));
        assert_eq!(
            headers.get(AUTHORIZATION).map(|v| v.to_str().map_err(drop)),
            Some(Ok("Bearer minted-token"))
        );
    }

    #[test]
    fn missing_delegated_token_strips_authorization() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer caller-token"));
        set_delegated_authorization(&mut headers, None);
        assert!(headers.get(AUTHORIZATION).is_none());
    }
}
