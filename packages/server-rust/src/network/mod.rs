//! HTTP server: routes, middleware, and the request pipeline.

pub mod handlers;
pub mod middleware;
pub mod module;

pub use module::ProxyModule;
