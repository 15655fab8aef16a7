//! Network module with deferred startup lifecycle.
//!
//! Implements the deferred startup pattern: `new()` creates resources,
//! `start()` binds the TCP listener, and `serve()` starts accepting
//! connections. This separation lets the supervisor bring the function
//! backend up between `start()` and `serve()`.

use std::future::Future;
use std::sync::Arc;

use axum::middleware;
use axum::routing::{any, get, post};
use axum::Router;
use tokio::net::TcpListener;
use tracing::info;

use super::handlers::{
    async_handler, completion_hook, health_handler, sync_handler, AppState,
};
use super::middleware::build_http_layers;
use crate::config::Config;
use crate::salesforce::TokenMinter;
use crate::supervisor::Supervisor;

/// Manages the proxy's HTTP server lifecycle.
///
/// Follows the deferred startup pattern:
/// 1. `new()` -- allocates shared state (HTTP client, app state)
/// 2. `start()` -- binds the TCP listener to the configured port
/// 3. `serve()` -- accepts connections until shutdown is signalled
pub struct ProxyModule {
    state: AppState,
    listener: Option<TcpListener>,
}

impl ProxyModule {
    /// Creates the module without binding any port.
    #[must_use]
    pub fn new(
        config: Arc<Config>,
        minter: Arc<TokenMinter>,
        supervisor: Arc<Supervisor>,
    ) -> Self {
        let state = AppState { config, http: reqwest::Client::new(), minter, supervisor };
        Self { state, listener: None }
    }

    /// Assembles the axum router with all routes and middleware.
    ///
    /// Routes:
    /// - `GET`/`POST /healthcheck` -- backend probe with restart-once
    /// - `POST /async` -- accept-then-invoke, reconciled to the org
    /// - `ANY /sync`, `ANY /sync/{*path}` -- enriched passthrough
    #[must_use]
    pub fn build_router(&self) -> Router {
        let state = self.state.clone();

        Router::new()
            .route("/healthcheck", get(health_handler).post(health_handler))
            .route(
                "/async",
                post(async_handler)
                    .layer(middleware::from_fn_with_state(state.clone(), completion_hook)),
            )
            .route("/sync", any(sync_handler))
            .route("/sync/{*path}", any(sync_handler))
            .layer(build_http_layers())
            .with_state(state)
    }

    /// Binds the TCP listener to the configured port.
    ///
    /// Returns the actual bound port, which may differ from the
    /// configured port when port 0 is used (OS-assigned ephemeral port).
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound (e.g., port in use).
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = format!("0.0.0.0:{}", self.state.config.proxy_port);
        let listener = TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();

        info!(port, "proxy listener bound");

        self.listener = Some(listener);
        Ok(port)
    }

    /// Starts serving connections until the shutdown signal fires.
    ///
    /// # Errors
    ///
    /// Returns an error if the server encounters a fatal I/O error.
    ///
    /// # Panics
    ///
    /// Panics if `start()` was not called before `serve()`.
    pub async fn serve(
        mut self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let listener = self.listener.take().expect("start() must be called before serve()");
        let router = self.build_router();

        axum::serve(listener, router).with_graceful_shutdown(shutdown).await?;
        Ok(())
    }
}
