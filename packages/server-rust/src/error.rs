//! Request-scoped error responses.
//!
//! Pipeline components return the classified [`ProxyError`] taxonomy;
//! handlers wrap it with the correlating request id (when one was
//! parsed) so every error body reads `[<request id>] <message>`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use fxproxy_core::{DecodeError, ProxyError};

/// A classified failure plus the request id it belongs to.
#[derive(Debug)]
pub struct RequestError {
    request_id: Option<String>,
    error: ProxyError,
}

impl RequestError {
    /// Wraps a pipeline failure with its correlating request id.
    #[must_use]
    pub fn new(request_id: impl Into<String>, error: ProxyError) -> Self {
        Self { request_id: Some(request_id.into()), error }
    }

    /// Wraps a failure that occurred before a request id was available.
    #[must_use]
    pub fn bare(error: ProxyError) -> Self {
        Self { request_id: None, error }
    }

    /// Wraps a context-header decode failure, naming the offending header.
    #[must_use]
    pub fn decode_failure(request_id: impl Into<String>, header: &str, err: &DecodeError) -> Self {
        Self::new(
            request_id,
            ProxyError::BadRequest(format!("Invalid {header} format - {err}")),
        )
    }

    /// The underlying classified error.
    #[must_use]
    pub fn error(&self) -> &ProxyError {
        &self.error
    }

    fn body_text(&self) -> String {
        match &self.request_id {
            Some(request_id) => format!("[{request_id}] {}", self.error),
            None => self.error.to_string(),
        }
    }
}

impl std::fmt::Display for RequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.body_text())
    }
}

impl IntoResponse for RequestError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.error.status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, self.body_text()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_prefixes_request_id() {
        let err = RequestError::new("req-1", ProxyError::BadRequest("Context not found".into()));
        assert_eq!(err.to_string(), "[req-1] Context not found");
    }

    #[test]
    fn body_without_request_id_is_bare_message() {
        let err = RequestError::bare(ProxyError::BadRequest("x-request-id not found".into()));
        assert_eq!(err.to_string(), "x-request-id not found");
    }

    #[test]
    fn into_response_maps_taxonomy_status() {
        let response =
            RequestError::new("req-1", ProxyError::Unauthorized("Unauthorized request".into()))
                .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn decode_failure_names_header() {
        let decode_err = fxproxy_core::FunctionContext::decode("%%%").expect_err("bad base64");
        let err = RequestError::decode_failure("req-1", "ce-sffncontext", &decode_err);
        assert!(err.to_string().contains("Invalid ce-sffncontext format"));
        assert_eq!(err.error().status(), 400);
    }
}
