//! Credential parsing and per-call bearer credentials.
//!
//! A Stratus auth token is a self-describing string: base64 over a JSON
//! claim document carrying the service endpoint, the bearer key, and
//! optionally an expiry and a restriction scope. Parsing is pure data
//! transformation with a fixed, versioned schema; any missing or malformed
//! required claim fails closed with [`ClientError::InvalidToken`] and is
//! never retried.
//!
//! Expiry is not checked at parse time. Each call asks the provider for a
//! [`BearerCredential`] at the moment of use, passing its own clock, and
//! gets [`ClientError::Expired`] if the embedded expiry has passed.

use std::time::{Duration, SystemTime};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use http::HeaderValue;
use serde::Deserialize;

use crate::channel::TokenGrant;
use crate::error::ClientError;

/// The claim schema version this client understands.
const SUPPORTED_TOKEN_VERSION: u32 = 1;

fn default_token_version() -> u32 {
    SUPPORTED_TOKEN_VERSION
}

/// Claim document embedded in a token. Unknown fields are rejected so a
/// malformed or future-format token fails here rather than at first use.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TokenClaims {
    #[serde(default = "default_token_version")]
    version: u32,
    endpoint: String,
    api_key: String,
    /// Expiry as seconds since the Unix epoch. Absent for long-lived keys.
    valid_until: Option<u64>,
    scope: Option<String>,
}

/// Parses and holds a validated auth token: the bearer key plus the
/// endpoints and expiry decoded from its claims.
///
/// Immutable once constructed; shared read-only across concurrent calls.
///
/// # Example
///
/// ```no_run
/// use stratus_client::CredentialProvider;
///
/// let provider = CredentialProvider::from_string(std::env::var("STRATUS_TOKEN").unwrap())?;
/// println!("data plane: {}", provider.cache_endpoint());
/// # Ok::<(), stratus_client::ClientError>(())
/// ```
#[derive(Clone)]
pub struct CredentialProvider {
    api_key: String,
    authorization: HeaderValue,
    control_endpoint: String,
    cache_endpoint: String,
    token_endpoint: String,
    valid_until: Option<SystemTime>,
    scope: Option<String>,
}

impl std::fmt::Debug for CredentialProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialProvider")
            .field("api_key", &"[REDACTED]")
            .field("control_endpoint", &self.control_endpoint)
            .field("cache_endpoint", &self.cache_endpoint)
            .field("token_endpoint", &self.token_endpoint)
            .field("valid_until", &self.valid_until)
            .field("scope", &self.scope)
            .finish()
    }
}

impl CredentialProvider {
    /// Parse a raw token string.
    ///
    /// Fails with [`ClientError::InvalidToken`] on bad base64, malformed
    /// JSON, an unsupported schema version, or missing required claims.
    pub fn from_string(raw: impl AsRef<str>) -> Result<Self, ClientError> {
        let raw = raw.as_ref().trim();
        if raw.is_empty() {
            return Err(ClientError::InvalidToken("token is empty".into()));
        }

        let decoded = STANDARD
            .decode(raw)
            .map_err(|e| ClientError::InvalidToken(format!("invalid base64 encoding: {e}")))?;
        let claims: TokenClaims = serde_json::from_slice(&decoded)
            .map_err(|e| ClientError::InvalidToken(format!("invalid claim document: {e}")))?;

        if claims.version != SUPPORTED_TOKEN_VERSION {
            return Err(ClientError::InvalidToken(format!(
                "unsupported token version {}",
                claims.version
            )));
        }
        if claims.endpoint.is_empty() {
            return Err(ClientError::InvalidToken("missing endpoint claim".into()));
        }
        if claims.api_key.is_empty() {
            return Err(ClientError::InvalidToken("missing api_key claim".into()));
        }

        let valid_until = claims
            .valid_until
            .map(|secs| SystemTime::UNIX_EPOCH + Duration::from_secs(secs));

        Self::from_parts(
            claims.api_key,
            &claims.endpoint,
            valid_until,
            claims.scope,
        )
    }

    /// Read and parse a token from the named environment variable.
    pub fn from_env_var(name: &str) -> Result<Self, ClientError> {
        let raw = std::env::var(name).map_err(|_| {
            ClientError::InvalidToken(format!("environment variable {name} is not set"))
        })?;
        Self::from_string(raw)
    }

    /// Build a provider from a disposable-token grant returned by the token
    /// service.
    pub fn from_disposable(grant: &TokenGrant) -> Result<Self, ClientError> {
        Self::from_parts(
            grant.api_key.clone(),
            &grant.endpoint,
            Some(grant.valid_until),
            None,
        )
    }

    fn from_parts(
        api_key: String,
        endpoint: &str,
        valid_until: Option<SystemTime>,
        scope: Option<String>,
    ) -> Result<Self, ClientError> {
        let authorization = HeaderValue::from_str(&api_key)
            .map_err(|_| ClientError::InvalidToken("api_key is not a valid header value".into()))
            .map(|mut value| {
                value.set_sensitive(true);
                value
            })?;

        Ok(Self {
            api_key,
            authorization,
            control_endpoint: format!("control.{endpoint}"),
            cache_endpoint: format!("cache.{endpoint}"),
            token_endpoint: format!("token.{endpoint}"),
            valid_until,
            scope,
        })
    }

    /// The per-call bearer credential, checked against `now`.
    ///
    /// Returns [`ClientError::Expired`] if the token's embedded expiry has
    /// passed. Checked at the moment of use, never eagerly.
    pub fn bearer(&self, now: SystemTime) -> Result<BearerCredential, ClientError> {
        if let Some(valid_until) = self.valid_until {
            if now >= valid_until {
                return Err(ClientError::Expired);
            }
        }
        Ok(BearerCredential {
            value: self.authorization.clone(),
        })
    }

    /// Control-plane endpoint decoded from the token.
    pub fn control_endpoint(&self) -> &str {
        &self.control_endpoint
    }

    /// Data-plane (cache and pub/sub) endpoint decoded from the token.
    pub fn cache_endpoint(&self) -> &str {
        &self.cache_endpoint
    }

    /// Token-service endpoint decoded from the token.
    pub fn token_endpoint(&self) -> &str {
        &self.token_endpoint
    }

    /// The token's expiry, if it has one.
    pub fn valid_until(&self) -> Option<SystemTime> {
        self.valid_until
    }

    /// The token's restriction scope, if it has one.
    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    pub(crate) fn api_key(&self) -> &str {
        &self.api_key
    }
}

/// A bearer credential attached to one outbound call.
#[derive(Clone)]
pub struct BearerCredential {
    value: HeaderValue,
}

impl BearerCredential {
    /// The `authorization` header value carrying the credential.
    pub fn header_value(&self) -> &HeaderValue {
        &self.value
    }
}

impl std::fmt::Debug for BearerCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BearerCredential([REDACTED])")
    }
}

/// A short-lived, scope-restricted credential minted by the token service.
///
/// Same shape as a regular token, plus the explicit expiry the caller
/// requested. There is no active destruction: the token simply stops being
/// usable once expired, which is checked lazily at use.
#[derive(Clone)]
pub struct DisposableToken {
    provider: CredentialProvider,
    valid_until: SystemTime,
}

impl std::fmt::Debug for DisposableToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisposableToken")
            .field("api_key", &"[REDACTED]")
            .field("valid_until", &self.valid_until)
            .field("scope", &self.provider.scope)
            .finish()
    }
}

impl DisposableToken {
    pub(crate) fn from_grant(grant: TokenGrant, scope: Option<String>) -> Result<Self, ClientError> {
        let valid_until = grant.valid_until;
        let mut provider = CredentialProvider::from_disposable(&grant)?;
        provider.scope = scope;
        Ok(Self {
            provider,
            valid_until,
        })
    }

    /// The minted bearer key.
    pub fn api_key(&self) -> &str {
        self.provider.api_key()
    }

    /// Absolute expiry of this token.
    pub fn valid_until(&self) -> SystemTime {
        self.valid_until
    }

    /// The restriction scope this token was minted with, if any.
    pub fn scope(&self) -> Option<&str> {
        self.provider.scope()
    }

    /// Whether the token has expired as of `now`.
    pub fn is_expired(&self, now: SystemTime) -> bool {
        now >= self.valid_until
    }

    /// A credential provider backed by this token, for building a restricted
    /// client. Fails with [`ClientError::Expired`] if already expired.
    pub fn credential_provider(&self, now: SystemTime) -> Result<CredentialProvider, ClientError> {
        if self.is_expired(now) {
            return Err(ClientError::Expired);
        }
        Ok(self.provider.clone())
    }
}
