//! Identity tokens for keyless signing.
//!
//! A token is minted for a service account, scoped to the sigstore audience,
//! and carries the account's email claim. Tokens are handed to the caller and
//! never cached here: their validity window belongs to the issuing service.

use std::fmt;

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::info;

use crate::error::{SignError, SignResult};
use crate::options::PromoterOptions;

pub mod credentials;
pub mod iam;

pub use credentials::CredentialSource;
pub use iam::{IamCredentialsConfig, IamCredentialsIssuer};

/// Audience identifying the signing backend's trust domain.
pub const SIGSTORE_AUDIENCE: &str = "sigstore";

/// Short-lived bearer credential.
#[derive(Clone, PartialEq, Eq)]
pub struct IdentityToken(String);

impl IdentityToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// Decode the JWT payload without verifying the signature.
    pub fn claims(&self) -> SignResult<TokenClaims> {
        let malformed = |reason: String| SignError::MalformedToken { reason };

        let mut parts = self.0.split('.');
        let payload = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(_), Some(payload), Some(_), None) => payload,
            _ => return Err(malformed("expected three dot-separated segments".into())),
        };

        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|e| malformed(format!("payload is not base64url: {}", e)))?;
        let raw: RawClaims = serde_json::from_slice(&bytes)
            .map_err(|e| malformed(format!("payload is not a JSON object: {}", e)))?;

        Ok(TokenClaims {
            email: raw.email,
            email_verified: raw.email_verified,
            subject: raw.sub,
            audience: match raw.aud {
                Some(serde_json::Value::String(aud)) => vec![aud],
                Some(serde_json::Value::Array(values)) => values
                    .into_iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect(),
                _ => Vec::new(),
            },
            issued_at: raw.iat.and_then(|t| DateTime::<Utc>::from_timestamp(t, 0)),
            expires_at: raw.exp.and_then(|t| DateTime::<Utc>::from_timestamp(t, 0)),
        })
    }
}

impl fmt::Debug for IdentityToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("IdentityToken(<redacted>)")
    }
}

#[derive(Debug, Deserialize)]
struct RawClaims {
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    email_verified: Option<bool>,
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    aud: Option<serde_json::Value>,
    #[serde(default)]
    iat: Option<i64>,
    #[serde(default)]
    exp: Option<i64>,
}

/// Unverified claims of an identity token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenClaims {
    pub email: Option<String>,
    pub email_verified: Option<bool>,
    pub subject: Option<String>,
    pub audience: Vec<String>,
    pub issued_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl TokenClaims {
    /// Whether the token is past its expiry at `now`. Tokens without `exp`
    /// are treated as expired.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|exp| exp <= now).unwrap_or(true)
    }
}

/// Capability that exchanges a service account for an identity token.
#[async_trait]
pub trait IdentityTokenIssuer: Send + Sync {
    async fn issue_identity_token(
        &self,
        service_account: &str,
        audience: &str,
        include_email: bool,
    ) -> SignResult<IdentityToken>;
}

/// Get a sigstore-scoped identity token for `service_account`.
///
/// The caller's environment must already hold credentials able to act as the
/// account. `_options` is accepted so the pipeline can pass its run options
/// through unchanged.
pub async fn get_identity_token<I>(
    issuer: &I,
    _options: &PromoterOptions,
    service_account: &str,
) -> SignResult<IdentityToken>
where
    I: IdentityTokenIssuer + ?Sized,
{
    if service_account.trim().is_empty() {
        return Err(SignError::Config {
            message: "service account must not be empty".into(),
        });
    }

    let token = issuer
        .issue_identity_token(service_account, SIGSTORE_AUDIENCE, true)
        .await?;

    if token.as_str().is_empty() {
        return Err(SignError::TokenIssuance {
            service_account: service_account.to_string(),
            message: "issuer returned an empty token".into(),
        });
    }

    info!(service_account = %service_account, "obtained identity token");
    Ok(token)
}
