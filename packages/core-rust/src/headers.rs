//! Request and response header names shared by the proxy and the
//! function runtime.

/// Caller-generated correlation id; tracks the entire request/response.
pub const HEADER_REQUEST_ID: &str = "x-request-id";

/// Base64-encoded JSON function request context ([`crate::FunctionContext`]).
pub const HEADER_FUNCTION_REQUEST_CONTEXT: &str = "ce-sffncontext";

/// Base64-encoded JSON org/user context ([`crate::SalesforceContext`]).
pub const HEADER_SALESFORCE_CONTEXT: &str = "ce-sfcontext";

/// Opaque execution metadata set by the function runtime on its response.
pub const HEADER_EXTRA_INFO: &str = "x-extra-info";

/// Health-check trust header; must match the configured 18-character org id.
pub const HEADER_ORG_ID_18: &str = "x-org-id-18";

/// Marks a request forwarded to the function as a health probe.
pub const HEADER_HEALTH_CHECK: &str = "x-health-check";

/// Prefix of a bearer `authorization` header value.
pub const AUTHORIZATION_BEARER_PREFIX: &str = "Bearer ";
