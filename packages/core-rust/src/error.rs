//! Error taxonomy for the proxy request pipeline.
//!
//! Every failure surfaced to a caller is classified into one of four
//! HTTP-mapped categories. Transport-level detail (connect errors,
//! upstream bodies) is logged at the failure site and never carried
//! verbatim inside these variants.

/// Classified request-pipeline failure, mapped to an HTTP status.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProxyError {
    /// Malformed or missing headers, invalid context shape (400).
    #[error("{0}")]
    BadRequest(String),
    /// Caller identity could not be anchored to the expected org (401).
    #[error("{0}")]
    Unauthorized(String),
    /// Token minting denied for the configured Connected App (403).
    #[error("{0}")]
    Forbidden(String),
    /// Function backend unreachable or permission activation failed (503).
    #[error("{0}")]
    ServiceUnavailable(String),
}

impl ProxyError {
    /// The HTTP status code this failure maps to.
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            Self::BadRequest(_) => 400,
            Self::Unauthorized(_) => 401,
            Self::Forbidden(_) => 403,
            Self::ServiceUnavailable(_) => 503,
        }
    }

    /// The classified message, without any request-id prefix.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::BadRequest(m)
            | Self::Unauthorized(m)
            | Self::Forbidden(m)
            | Self::ServiceUnavailable(m) => m,
        }
    }
}

/// Failure decoding a base64 JSON context header.
///
/// Always surfaced to the caller as [`ProxyError::BadRequest`]; the
/// conversion site prepends the offending header name.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("expected base64 encoded header: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("header is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("header is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_taxonomy() {
        assert_eq!(ProxyError::BadRequest(String::new()).status(), 400);
        assert_eq!(ProxyError::Unauthorized(String::new()).status(), 401);
        assert_eq!(ProxyError::Forbidden(String::new()).status(), 403);
        assert_eq!(ProxyError::ServiceUnavailable(String::new()).status(), 503);
    }

    #[test]
    fn message_returns_inner_text() {
        let err = ProxyError::Forbidden("no app access".to_string());
        assert_eq!(err.message(), "no app access");
        assert_eq!(err.to_string(), "no app access");
    }
}
