//! Token minting via the OAuth 2.0 JWT-bearer flow.
//!
//! The proxy holds the Connected App's private key and mints a
//! short-lived org access token per invocation, addressed to the
//! caller's username. The minted token replaces the caller's token in
//! the context forwarded to the function.

use std::time::{SystemTime, UNIX_EPOCH};

use fxproxy_core::ProxyError;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::{Config, ConfigError};

const GRANT_TYPE_JWT_BEARER: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const AUDIENCE_PRODUCTION: &str = "https://login.salesforce.com";
const AUDIENCE_SANDBOX: &str = "https://test.salesforce.com";

/// Assertion lifetime. Salesforce rejects anything over 5 minutes, so
/// the 6-minute value is clamped server-side; it matters only that the
/// token outlives the grant exchange.
const ASSERTION_LIFETIME_SECS: u64 = 360;

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    sub: &'a str,
    aud: &'a str,
    exp: u64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Mints org access tokens for function invocations.
pub struct TokenMinter {
    signing_key: EncodingKey,
    consumer_key: String,
    audience_override: Option<String>,
}

impl TokenMinter {
    /// Builds a minter from the assembled configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::PrivateKey`] when the PEM key cannot be
    /// parsed as an RSA private key.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let signing_key = EncodingKey::from_rsa_pem(config.private_key.as_bytes())
            .map_err(|err| ConfigError::PrivateKey { reason: err.to_string() })?;
        Ok(Self {
            signing_key,
            consumer_key: config.consumer_key.clone(),
            audience_override: config.audience.clone(),
        })
    }

    /// Mints an access token for `username` against the caller's org.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Forbidden`] when the org rejects the
    /// grant, and [`ProxyError::ServiceUnavailable`] when the token
    /// endpoint is unreachable or the exchange cannot be performed.
    pub async fn mint(
        &self,
        http: &reqwest::Client,
        org_base_url: &str,
        username: &str,
        request_id: &str,
    ) -> Result<String, ProxyError> {
        let audience = self.select_audience(org_base_url);
        let exp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|err| {
                warn!(request_id, error = %err, "system clock is before the epoch");
                ProxyError::ServiceUnavailable("Unable to mint function token".to_string())
            })?
            .as_secs()
            + ASSERTION_LIFETIME_SECS;

        let claims =
            AssertionClaims { iss: &self.consumer_key, sub: username, aud: audience, exp };
        let assertion =
            jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.signing_key)
                .map_err(|err| {
                    warn!(request_id, error = %err, "signing the token assertion failed");
                    ProxyError::ServiceUnavailable("Unable to mint function token".to_string())
                })?;

        let url = format!("{}/services/oauth2/token", org_base_url.trim_end_matches('/'));
        let response = http
            .post(&url)
            .form(&[("grant_type", GRANT_TYPE_JWT_BEARER), ("assertion", &assertion)])
            .send()
            .await
            .map_err(|err| {
                warn!(request_id, error = %err, "token endpoint unreachable");
                ProxyError::ServiceUnavailable("Unable to mint function token".to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(request_id, %status, %body, "token mint rejected");
            return Err(classify_mint_failure(&body));
        }

        let token: TokenResponse = response.json().await.map_err(|err| {
            warn!(request_id, error = %err, "token response was not parseable");
            ProxyError::ServiceUnavailable("Unable to mint function token".to_string())
        })?;
        Ok(token.access_token)
    }

    /// Picks the JWT audience: the configured override when present,
    /// otherwise sandbox/production detection from the org's base URL.
    fn select_audience<'a>(&'a self, org_base_url: &str) -> &'a str {
        if let Some(audience) = &self.audience_override {
            return audience;
        }
        if is_test_org(org_base_url) {
            AUDIENCE_SANDBOX
        } else {
            AUDIENCE_PRODUCTION
        }
    }
}

#[cfg(test)]
impl TokenMinter {
    /// Minter with a throwaway symmetric key, for router-level tests
    /// that never reach the signing path.
    pub(crate) fn for_tests(consumer_key: &str) -> Self {
        Self {
            signing_key: EncodingKey::from_secret(b"unit-test-only"),
            consumer_key: consumer_key.to_string(),
            audience_override: None,
        }
    }
}

fn is_test_org(org_base_url: &str) -> bool {
    org_base_url.contains(".sandbox.") || org_base_url.contains(".scratch.")
}

/// Maps a token-endpoint error body to the caller-facing error.
///
/// A missing pre-authorization of the Connected App is the one case an
/// admin can fix directly, so it gets remediation text appended.
fn classify_mint_failure(body: &str) -> ProxyError {
    let mut message = format!("Unable to mint function token: {body}");
    if body.contains("invalid_app_access")
        || body.contains("user hasn't approved this consumer")
    {
        message.push_str(
            ". Ensure that the target Connected App is set to \"Admin approved users are pre-authorized\" and the user's Profile is assigned to the App.",
        );
    }
    ProxyError::Forbidden(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minter(audience_override: Option<String>) -> TokenMinter {
        TokenMinter {
            signing_key: EncodingKey::from_secret(b"unit-test-only"),
            consumer_key: "3MVG9consumer".to_string(),
            audience_override,
        }
    }

    #[test]
    fn audience_defaults_to_production() {
        let minter = minter(None);
        assert_eq!(
            minter.select_audience("https://org.my.salesforce.com"),
            AUDIENCE_PRODUCTION
        );
    }

    #[test]
    fn audience_detects_sandbox_and_scratch_orgs() {
        let minter = minter(None);
        assert_eq!(
            minter.select_audience("https://org.sandbox.my.salesforce.com"),
            AUDIENCE_SANDBOX
        );
        assert_eq!(
            minter.select_audience("https://org.scratch.my.salesforce.com"),
            AUDIENCE_SANDBOX
        );
    }

    #[test]
    fn audience_override_wins() {
        let minter = minter(Some("https://custom.example".to_string()));
        assert_eq!(
            minter.select_audience("https://org.sandbox.my.salesforce.com"),
            "https://custom.example"
        );
    }

    #[test]
    fn app_access_denial_is_forbidden_with_remediation() {
        let err = classify_mint_failure(r#"{"error":"invalid_app_access"}"#);
        assert_eq!(err.status(), 403);
        assert!(err.message().contains("Admin approved users are pre-authorized"));
    }

    #[test]
    fn unapproved_consumer_is_forbidden_with_remediation() {
        let err = classify_mint_failure("user hasn't approved this consumer");
        assert_eq!(err.status(), 403);
    }

    #[test]
    fn other_denials_are_forbidden_without_remediation() {
        let err = classify_mint_failure(r#"{"error":"invalid_grant"}"#);
        assert_eq!(err.status(), 403);
        assert!(err.message().contains("invalid_grant"));
        assert!(!err.message().contains("pre-authorized"));
    }
}
