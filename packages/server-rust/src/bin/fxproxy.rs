//! Proxy entrypoint: assemble config, start the function runtime,
//! serve until interrupted.

use std::sync::Arc;

use clap::Parser as _;
use fxproxy_server::network::ProxyModule;
use fxproxy_server::salesforce::TokenMinter;
use fxproxy_server::{Config, ProxyArgs, Supervisor};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = ProxyArgs::parse();
    let config = match Config::assemble(args) {
        Ok(config) => Arc::new(config),
        Err(err) => {
            error!(error = %err, "invalid configuration");
            std::process::exit(1);
        }
    };

    let minter = match TokenMinter::from_config(&config) {
        Ok(minter) => Arc::new(minter),
        Err(err) => {
            error!(error = %err, "invalid signing key");
            std::process::exit(1);
        }
    };

    let supervisor = Arc::new(Supervisor::new(Arc::clone(&config)));
    if let Err(err) = supervisor.start().await {
        error!(error = %err, "unable to start the function runtime");
        std::process::exit(1);
    }

    let mut module = ProxyModule::new(Arc::clone(&config), minter, Arc::clone(&supervisor));
    let port = match module.start().await {
        Ok(port) => port,
        Err(err) => {
            error!(error = %err, "unable to bind proxy port");
            std::process::exit(1);
        }
    };
    info!(port, function = %config.function_base_url, "proxy serving");

    let shutdown_supervisor = Arc::clone(&supervisor);
    let shutdown = async move {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "unable to listen for shutdown signal");
        }
        info!("shutdown signal received");
        shutdown_supervisor.shutdown().await;
    };

    if let Err(err) = module.serve(shutdown).await {
        error!(error = %err, "server error");
        std::process::exit(1);
    }
}
