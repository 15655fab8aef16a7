//! Asynchronous invocation handling.
//!
//! The caller gets a `201 Accepted`-style reply as soon as the request
//! is validated and enriched; the actual function call happens after
//! the response is written, driven by a route-scoped middleware hook.
//! Whatever the function answers is written back to the org's tracking
//! record.

use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use bytes::Bytes;
use fxproxy_core::headers::{HEADER_EXTRA_INFO, HEADER_FUNCTION_REQUEST_CONTEXT};
use fxproxy_core::{FunctionContext, ProxyError, SalesforceContext};
use tracing::{error, info};

use super::{enrich, validate, AppState};
use crate::error::RequestError;
use crate::salesforce::reconcile::{self, FunctionOutcome};

/// Everything the post-response hook needs to run the invocation.
#[derive(Debug, Clone)]
pub struct AsyncJob {
    pub request_id: String,
    pub fn_context: FunctionContext,
    pub sf_context: SalesforceContext,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Accepts an async invocation: validates, enriches, and replies 201.
///
/// The enriched job rides out in the response extensions for
/// [`completion_hook`] to pick up once the response has been written.
pub async fn async_handler(
    State(state): State<AppState>,
    request: Request<Body>,
) -> Result<Response, RequestError> {
    let (parts, body) = request.into_parts();

    let mut validated = validate(&state, &parts.headers).await?;
    if !validated.fn_context.is_async() {
        return Err(RequestError::new(
            validated.request_id,
            ProxyError::BadRequest("Invalid request type for async invocation".to_string()),
        ));
    }
    enrich(&state, &mut validated).await?;

    let body = to_bytes(body, usize::MAX).await.map_err(|err| {
        RequestError::new(
            validated.request_id.clone(),
            ProxyError::BadRequest(format!("Unable to read request body: {err}")),
        )
    })?;

    let job = AsyncJob {
        request_id: validated.request_id.clone(),
        fn_context: validated.fn_context,
        sf_context: validated.sf_context,
        headers: parts.headers,
        body,
    };

    info!(request_id = %job.request_id, "async invocation accepted");
    let mut response = Response::builder()
        .status(StatusCode::CREATED)
        .body(Body::empty())
        .map_err(|err| {
            RequestError::new(
                job.request_id.clone(),
                ProxyError::ServiceUnavailable(format!("Unable to build response: {err}")),
            )
        })?;
    response.extensions_mut().insert(job);
    Ok(response)
}

/// Route middleware that fires the function call after the 201 reply.
///
/// Runs for every `/async` response; only a 201 carrying an
/// [`AsyncJob`] extension triggers the background invocation.
pub async fn completion_hook(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let mut response = next.run(request).await;
    if response.status() == StatusCode::CREATED {
        if let Some(job) = response.extensions_mut().remove::<AsyncJob>() {
            tokio::spawn(invoke_function(state, job));
        }
    }
    response
}

/// Calls the function backend and reconciles the outcome.
///
/// Runs detached from any request; every failure is logged and
/// swallowed -- the caller already has its 201.
async fn invoke_function(state: AppState, job: AsyncJob) {
    let request_id = job.request_id.clone();
    let outcome = call_backend(&state, &job).await;

    let Some(token) = job.fn_context.access_token.as_deref() else {
        error!(request_id, "function's token not provided; skipping reconciliation");
        return;
    };
    let Some(record_id) = job.fn_context.function_invocation_id.as_deref() else {
        error!(request_id, "tracking record id missing; skipping reconciliation");
        return;
    };
    let Some(user) = job.sf_context.user_context.as_ref() else {
        error!(request_id, "user context missing; skipping reconciliation");
        return;
    };

    let result = reconcile::update(
        &state.http,
        user.salesforce_base_url.as_deref().unwrap_or_default(),
        job.sf_context.api_version.as_deref().unwrap_or_default(),
        token,
        user.namespace(),
        record_id,
        user.username.as_deref().unwrap_or_default(),
        &outcome,
    )
    .await;
    if let Err(err) = result {
        error!(request_id, error = %err, "async invocation reconciliation failed");
    }
}

/// Performs the backend call, folding transport failure into an ERROR
/// outcome so the tracking record always hears back.
async fn call_backend(state: &AppState, job: &AsyncJob) -> FunctionOutcome {
    let url = format!("{}/", state.config.function_base_url);
    let mut headers = job.headers.clone();
    super::sync::strip_hop_headers(&mut headers);
    super::sync::set_delegated_authorization(&mut headers, job.fn_context.access_token.as_deref());
    let enriched = job.fn_context.encode();
    if let Ok(value) = HeaderValue::from_str(&enriched) {
        headers.insert(HEADER_FUNCTION_REQUEST_CONTEXT, value);
    }

    let sent = state
        .http
        .post(&url)
        .headers(headers)
        .body(job.body.clone())
        .send()
        .await;
    match sent {
        Ok(response) => {
            let status_code = response.status().as_u16();
            let extra_info = response
                .headers()
                .get(HEADER_EXTRA_INFO)
                .and_then(|value| value.to_str().ok())
                .map(ToString::to_string);
            let body = response.text().await.unwrap_or_default();
            FunctionOutcome { status_code, body, extra_info }
        }
        Err(err) => {
            error!(request_id = %job.request_id, error = %err, "async function call failed");
            FunctionOutcome { status_code: 503, body: err.to_string(), extra_info: None }
        }
    }
}
