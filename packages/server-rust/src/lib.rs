//! `fxproxy` Server — validating, token-minting reverse proxy in front of a
//! Salesforce Function runtime process.

pub mod config;
pub mod error;
pub mod network;
pub mod salesforce;
pub mod supervisor;

pub use config::{Config, ConfigError, ProxyArgs};
pub use error::RequestError;
pub use network::ProxyModule;
pub use salesforce::TokenMinter;
pub use supervisor::Supervisor;

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {
        // Empty body: if this test runs, the crate compiles and loads.
    }
}
