//! IAM credentials `generateIdToken` client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, USER_AGENT};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use super::credentials::CredentialSource;
use super::{IdentityToken, IdentityTokenIssuer};
use crate::error::{SignError, SignResult};

const USER_AGENT_VALUE: &str = concat!("promo-sign/", env!("CARGO_PKG_VERSION"));

/// IAM credentials service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IamCredentialsConfig {
    /// Service base URL.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_endpoint() -> String {
    "https://iamcredentials.googleapis.com".to_string()
}

fn default_timeout() -> u64 {
    30
}

impl Default for IamCredentialsConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            timeout_secs: default_timeout(),
        }
    }
}

impl IamCredentialsConfig {
    /// Create config from environment variables.
    ///
    /// | Variable | Description |
    /// |----------|-------------|
    /// | `PROMO_IAM_CREDENTIALS_URL` | Service base URL |
    /// | `PROMO_IAM_TIMEOUT` | Request timeout in seconds (default: 30) |
    pub fn from_env() -> Self {
        Self {
            endpoint: std::env::var("PROMO_IAM_CREDENTIALS_URL")
                .ok()
                .filter(|v| !v.is_empty())
                .unwrap_or_else(default_endpoint),
            timeout_secs: std::env::var("PROMO_IAM_TIMEOUT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_timeout),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateIdTokenRequest<'a> {
    audience: &'a str,
    include_email: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateIdTokenResponse {
    token: String,
}

/// Identity token issuer backed by the IAM credentials service.
#[derive(Debug, Clone)]
pub struct IamCredentialsIssuer {
    config: IamCredentialsConfig,
    credentials: CredentialSource,
}

impl IamCredentialsIssuer {
    pub fn new(config: IamCredentialsConfig, credentials: CredentialSource) -> Self {
        Self {
            config,
            credentials,
        }
    }

    pub fn from_env() -> Self {
        Self::new(IamCredentialsConfig::from_env(), CredentialSource::from_env())
    }
}

#[async_trait]
impl IdentityTokenIssuer for IamCredentialsIssuer {
    async fn issue_identity_token(
        &self,
        service_account: &str,
        audience: &str,
        include_email: bool,
    ) -> SignResult<IdentityToken> {
        let wrap = |message: String| SignError::TokenIssuance {
            service_account: service_account.to_string(),
            message,
        };

        // Dropped on every return below, which tears down its connections.
        let connection = IamConnection::open(&self.config)
            .map_err(|e| wrap(format!("creating credentials client: {}", e)))?;

        let access_token = self
            .credentials
            .access_token(&connection.client)
            .await
            .map_err(|e| wrap(e.to_string()))?;

        let token = connection
            .generate_id_token(&access_token, service_account, audience, include_email)
            .await
            .map_err(|e| wrap(format!("generating identity token: {}", e)))?;

        Ok(IdentityToken::new(token))
    }
}

/// Client for a single issuance.
struct IamConnection {
    client: reqwest::Client,
    endpoint: Url,
}

impl IamConnection {
    fn open(config: &IamCredentialsConfig) -> Result<Self, String> {
        let endpoint = Url::parse(&config.endpoint)
            .map_err(|e| format!("invalid endpoint {:?}: {}", config.endpoint, e))?;
        if endpoint.cannot_be_a_base() {
            return Err(format!("invalid endpoint {:?}", config.endpoint));
        }

        let mut default_headers = HeaderMap::new();
        default_headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(default_headers)
            .build()
            .map_err(|e| e.to_string())?;

        Ok(Self { client, endpoint })
    }

    /// The account is one percent-encoded path segment, so `/`, `?` or `#`
    /// in it cannot reach another endpoint.
    fn id_token_url(&self, service_account: &str) -> Url {
        let mut url = self.endpoint.clone();
        url.set_query(None);
        url.set_fragment(None);
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend([
                "v1",
                "projects",
                "-",
                "serviceAccounts",
                &format!("{}:generateIdToken", service_account),
            ]);
        }
        url
    }

    async fn generate_id_token(
        &self,
        access_token: &str,
        service_account: &str,
        audience: &str,
        include_email: bool,
    ) -> Result<String, String> {
        let url = self.id_token_url(service_account);
        debug!(url = %url, audience, "requesting identity token");

        let response = self
            .client
            .post(url)
            .header(AUTHORIZATION, format!("Bearer {}", access_token))
            .json(&GenerateIdTokenRequest {
                audience,
                include_email,
            })
            .send()
            .await
            .map_err(|e| format!("request failed: {}", e))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let body = response.text().await.unwrap_or_default();
            return Err(format!("permission denied: HTTP {} - {}", status, body));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(format!("HTTP {} - {}", status, body));
        }

        let parsed: GenerateIdTokenResponse = response
            .json()
            .await
            .map_err(|e| format!("failed to parse response: {}", e))?;

        if parsed.token.is_empty() {
            return Err("response contained an empty token".to_string());
        }
        Ok(parsed.token)
    }
}

impl Drop for IamConnection {
    fn drop(&mut self) {
        debug!(endpoint = %self.endpoint, "closing IAM credentials client");
    }
}
