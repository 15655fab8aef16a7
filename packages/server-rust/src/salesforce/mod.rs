//! Salesforce org API clients: caller introspection, token minting,
//! permission-set activation, and async invocation reconciliation.

pub mod permsets;
pub mod reconcile;
pub mod token;
pub mod userinfo;

pub use token::TokenMinter;

/// Builds a versioned REST API URL under the org base URL.
///
/// `part` carries its own leading slash, e.g. `/actions/standard/...`.
#[must_use]
pub fn api_url(base_url: &str, api_version: &str, part: &str) -> String {
    format!("{}/services/data/v{api_version}{part}", base_url.trim_end_matches('/'))
}
