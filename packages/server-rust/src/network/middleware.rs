//! HTTP middleware stack for the proxy.
//!
//! Middleware ordering follows the outer-to-inner convention: the first
//! layer listed is the outermost (processes the request first on the
//! way in, and the response last on the way out).

use axum::http::header::HeaderName;
use tower::ServiceBuilder;
use tower_http::request_id::PropagateRequestIdLayer;
use tower_http::trace::TraceLayer;

/// The composed Tower layer type produced by [`build_http_layers`].
///
/// This type alias keeps the function signature readable. Each layer
/// wraps the next in a `Stack`, from outermost (first applied) to
/// innermost (last applied).
type HttpLayers = tower::layer::util::Stack<
    PropagateRequestIdLayer,
    tower::layer::util::Stack<
        TraceLayer<
            tower_http::classify::SharedClassifier<tower_http::classify::ServerErrorsAsFailures>,
        >,
        tower::layer::util::Identity,
    >,
>;

/// Builds the HTTP-level Tower middleware stack.
///
/// **Middleware ordering (outermost to innermost):**
/// 1. `Tracing` -- logs request/response with structured trace spans
/// 2. `PropagateRequestId` -- echoes the caller's `x-request-id` onto
///    the response
///
/// The request id is never generated here: invocation routes require
/// the caller to supply one, and the health check mints its own.
#[must_use]
pub fn build_http_layers() -> HttpLayers {
    let x_request_id = HeaderName::from_static("x-request-id");

    ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::new(x_request_id))
        .into_inner()
}
