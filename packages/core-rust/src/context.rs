//! Invocation context types carried in the `ce-sffncontext` and
//! `ce-sfcontext` request headers.
//!
//! Both headers are base64-encoded JSON documents produced by the
//! invoking org. They are plain application data -- nothing about them
//! is authenticated until the caller-validation step anchors the
//! claimed org id to a token the platform vouches for. All structs use
//! `#[serde(rename_all = "camelCase")]` to match the wire format, and
//! every modeled field survives a decode/encode round trip.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{DecodeError, ProxyError};

/// Wire value of a synchronous invocation's `type` field.
pub const INVOCATION_TYPE_SYNC: &str = "com.salesforce.function.invoke.sync";

/// Wire value of an asynchronous invocation's `type` field.
pub const INVOCATION_TYPE_ASYNC: &str = "com.salesforce.function.invoke.async";

fn decode_json<T: DeserializeOwned>(encoded: &str) -> Result<T, DecodeError> {
    let bytes = BASE64.decode(encoded.trim())?;
    let text = String::from_utf8(bytes)?;
    Ok(serde_json::from_str(&text)?)
}

fn encode_json<T: Serialize>(value: &T) -> String {
    let json = serde_json::to_string(value).expect("context types serialize to JSON");
    BASE64.encode(json)
}

fn is_blank(value: Option<&String>) -> bool {
    value.is_none_or(|v| v.is_empty())
}

// ---------------------------------------------------------------------------
// InvocationType
// ---------------------------------------------------------------------------

/// The two recognized invocation kinds, parsed from the context's
/// `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationType {
    /// Reply streams back to the caller on the same connection.
    Sync,
    /// Caller receives 201 immediately; the response is reconciled to
    /// an `AsyncFunctionInvocationRequest__c` record afterwards.
    Async,
}

impl InvocationType {
    /// Parses a wire `type` string; `None` for anything unrecognized.
    #[must_use]
    pub fn from_wire(value: &str) -> Option<Self> {
        match value {
            INVOCATION_TYPE_SYNC => Some(Self::Sync),
            INVOCATION_TYPE_ASYNC => Some(Self::Async),
            _ => None,
        }
    }

    /// The wire representation of this invocation type.
    #[must_use]
    pub fn as_wire(self) -> &'static str {
        match self {
            Self::Sync => INVOCATION_TYPE_SYNC,
            Self::Async => INVOCATION_TYPE_ASYNC,
        }
    }
}

// ---------------------------------------------------------------------------
// FunctionContext (ce-sffncontext)
// ---------------------------------------------------------------------------

/// Function request context, header `ce-sffncontext`.
///
/// ```json
/// {
///   "id": "00Dxx0000006IYJEA2-...-MyFunction-2023-03-23T15:18:53.429-0700",
///   "functionName": "MyFunction",
///   "resource": "https://...",
///   "source": "urn:event:from:salesforce/<instance>/<orgId>/apex",
///   "type": "com.salesforce.function.invoke.sync",
///   "requestTime": "2023-03-23T15:18:53.429-0700",
///   "functionInvocationId": "<AsyncFunctionInvocationRequest__c id>",
///   "permissionSets": ["MyPermissionSet"]
/// }
/// ```
///
/// `accessToken` is absent on arrival and attached exactly once during
/// enrichment, before the context is re-encoded onto the outbound
/// function request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FunctionContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Raw invocation type string; see [`InvocationType::from_wire`].
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub invocation_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_time: Option<String>,
    /// Tracking-record id; required iff the invocation is async.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_invocation_id: Option<String>,
    /// Session-based permission sets to activate on the minted token.
    /// A non-sequence value here fails the typed decode, which the
    /// server surfaces as a 400.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission_sets: Option<Vec<String>>,
    /// Delegated token minted for this invocation; never the caller's own.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

impl FunctionContext {
    /// Decodes the base64 JSON header value.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] if the value is not base64, not UTF-8,
    /// or not JSON of the expected shape.
    pub fn decode(encoded: &str) -> Result<Self, DecodeError> {
        decode_json(encoded)
    }

    /// Encodes back to the base64 JSON header value.
    ///
    /// `encode(decode(x))` preserves every modeled field.
    #[must_use]
    pub fn encode(&self) -> String {
        encode_json(self)
    }

    /// The parsed invocation type, `None` if missing or unrecognized.
    #[must_use]
    pub fn invocation_type(&self) -> Option<InvocationType> {
        self.invocation_type.as_deref().and_then(InvocationType::from_wire)
    }

    /// True when this context describes an async invocation.
    #[must_use]
    pub fn is_async(&self) -> bool {
        self.invocation_type() == Some(InvocationType::Async)
    }

    /// Attaches the minted delegated token. Called exactly once, after
    /// permission-set activation succeeds.
    pub fn set_access_token(&mut self, token: String) {
        self.access_token = Some(token);
    }

    /// Validates the decoded context shape.
    ///
    /// # Errors
    ///
    /// [`ProxyError::BadRequest`] when the type is unrecognized or an
    /// async invocation lacks its tracking-record id.
    pub fn validate(&self) -> Result<(), ProxyError> {
        let Some(invocation_type) = self.invocation_type() else {
            return Err(ProxyError::BadRequest(format!(
                "Invalid function invocation type '{}'",
                self.invocation_type.as_deref().unwrap_or("")
            )));
        };

        if invocation_type == InvocationType::Async && is_blank(self.function_invocation_id.as_ref())
        {
            return Err(ProxyError::BadRequest(
                "AsyncFunctionInvocationRequest__c ID not provided for async invocation"
                    .to_string(),
            ));
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SalesforceContext / UserContext (ce-sfcontext)
// ---------------------------------------------------------------------------

/// `userContext` part of header `ce-sfcontext`.
///
/// ```json
/// {
///   "orgId": "00Dxx0000006IYJ",
///   "userId": "005xx000001X8Uz",
///   "username": "admin@example.com",
///   "onBehalfOfUserId": "",
///   "salesforceBaseUrl": "https://na1.salesforce.com",
///   "orgDomainUrl": "https://mycompany.my.salesforce.com",
///   "namespace": ""
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub org_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_behalf_of_user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub salesforce_base_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub org_domain_url: Option<String>,
    /// Org namespace prefix qualifying custom object and field names.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl UserContext {
    /// Validates identity fields the enrichment pipeline depends on.
    ///
    /// # Errors
    ///
    /// [`ProxyError::BadRequest`] when `orgId`, `username`, or
    /// `salesforceBaseUrl` is missing or empty.
    pub fn validate(&self) -> Result<(), ProxyError> {
        if is_blank(self.org_id.as_ref()) {
            return Err(ProxyError::BadRequest("Org ID not provided".to_string()));
        }
        if is_blank(self.username.as_ref()) {
            return Err(ProxyError::BadRequest("Username not provided".to_string()));
        }
        if is_blank(self.salesforce_base_url.as_ref()) {
            return Err(ProxyError::BadRequest(
                "SalesforceBaseUrl not provided".to_string(),
            ));
        }
        Ok(())
    }

    /// The org namespace, `None` when absent or empty.
    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref().filter(|ns| !ns.is_empty())
    }
}

/// Header `ce-sfcontext`: the context of the requesting org and user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SalesforceContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_context: Option<UserContext>,
}

impl SalesforceContext {
    /// Decodes the base64 JSON header value.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] if the value is not base64, not UTF-8,
    /// or not JSON of the expected shape.
    pub fn decode(encoded: &str) -> Result<Self, DecodeError> {
        decode_json(encoded)
    }

    /// Encodes back to the base64 JSON header value.
    #[must_use]
    pub fn encode(&self) -> String {
        encode_json(self)
    }

    /// Validates the org context and returns the contained user context.
    ///
    /// # Errors
    ///
    /// [`ProxyError::BadRequest`] when `apiVersion` or `userContext`
    /// is missing, or the user context itself fails validation.
    pub fn validate(&self) -> Result<&UserContext, ProxyError> {
        if is_blank(self.api_version.as_ref()) {
            return Err(ProxyError::BadRequest(
                "API Version not provided".to_string(),
            ));
        }
        let user_context = self
            .user_context
            .as_ref()
            .ok_or_else(|| ProxyError::BadRequest("UserContext not provided".to_string()))?;
        user_context.validate()?;
        Ok(user_context)
    }
}
