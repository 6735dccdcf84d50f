//! Ambient credentials used to call the IAM credentials service.
//!
//! Checked in order by [`CredentialSource::from_env`]:
//! 1. `GOOGLE_OAUTH_ACCESS_TOKEN` - static access token
//! 2. `GOOGLE_APPLICATION_CREDENTIALS` - service account key or
//!    `authorized_user` file
//! 3. gcloud's `application_default_credentials.json` (under
//!    `CLOUDSDK_CONFIG` when set)
//! 4. The GCE/GKE metadata server of the workload's default service account

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{SignError, SignResult};

/// Metadata server endpoint for the default service account's access token.
pub const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// OAuth token endpoint used when a credentials file names none.
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Scope requested for access tokens minted from a credentials file.
const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Lifetime of a service account assertion, in seconds.
const ASSERTION_LIFETIME_SECS: i64 = 3600;

const WELL_KNOWN_FILE: &str = "application_default_credentials.json";

/// Where the caller's access token comes from.
#[derive(Clone)]
pub enum CredentialSource {
    /// Pre-minted access token.
    Static(String),

    /// Application default credentials file, read on every issuance.
    CredentialsFile { path: PathBuf },

    /// Metadata server token endpoint.
    MetadataServer { url: String },
}

#[derive(Debug, Deserialize)]
struct AccessTokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Contents of an application default credentials file.
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum CredentialsFile {
    ServiceAccount {
        client_email: String,
        private_key: String,
        #[serde(default)]
        private_key_id: Option<String>,
        #[serde(default)]
        token_uri: Option<String>,
    },
    AuthorizedUser {
        client_id: String,
        client_secret: String,
        refresh_token: String,
        #[serde(default)]
        token_uri: Option<String>,
    },
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

impl CredentialSource {
    pub fn static_token(token: impl Into<String>) -> Self {
        Self::Static(token.into())
    }

    pub fn credentials_file(path: impl Into<PathBuf>) -> Self {
        Self::CredentialsFile { path: path.into() }
    }

    pub fn metadata_server() -> Self {
        Self::metadata_server_at(METADATA_TOKEN_URL)
    }

    /// Metadata server at a custom URL (for testing).
    pub fn metadata_server_at(url: impl Into<String>) -> Self {
        Self::MetadataServer { url: url.into() }
    }

    pub fn from_env() -> Self {
        let non_empty = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());

        if let Some(token) = non_empty("GOOGLE_OAUTH_ACCESS_TOKEN") {
            return Self::Static(token);
        }
        // An explicit path is used even if missing, so the error names it.
        if let Some(path) = non_empty("GOOGLE_APPLICATION_CREDENTIALS") {
            return Self::credentials_file(path);
        }
        if let Some(path) = well_known_file().filter(|p| p.is_file()) {
            return Self::credentials_file(path);
        }
        Self::metadata_server()
    }

    /// Fetch an access token using `client`.
    pub(crate) async fn access_token(&self, client: &reqwest::Client) -> SignResult<String> {
        match self {
            Self::Static(token) => Ok(token.clone()),
            Self::CredentialsFile { path } => {
                debug!(path = %path.display(), "reading application default credentials");
                match read_credentials_file(path)? {
                    CredentialsFile::ServiceAccount {
                        client_email,
                        private_key,
                        private_key_id,
                        token_uri,
                    } => {
                        let token_uri = token_uri.as_deref().unwrap_or(DEFAULT_TOKEN_URI);
                        let assertion = sign_assertion(
                            &client_email,
                            &private_key,
                            private_key_id,
                            token_uri,
                        )?;
                        request_access_token(
                            client.post(token_uri).form(&[
                                ("grant_type", JWT_BEARER_GRANT),
                                ("assertion", assertion.as_str()),
                            ]),
                            "service account token exchange",
                        )
                        .await
                    }
                    CredentialsFile::AuthorizedUser {
                        client_id,
                        client_secret,
                        refresh_token,
                        token_uri,
                    } => {
                        let token_uri = token_uri.as_deref().unwrap_or(DEFAULT_TOKEN_URI);
                        request_access_token(
                            client.post(token_uri).form(&[
                                ("grant_type", "refresh_token"),
                                ("client_id", client_id.as_str()),
                                ("client_secret", client_secret.as_str()),
                                ("refresh_token", refresh_token.as_str()),
                            ]),
                            "refresh token exchange",
                        )
                        .await
                    }
                }
            }
            Self::MetadataServer { url } => {
                debug!(url = %url, "requesting access token from metadata server");
                request_access_token(
                    client.get(url).header("Metadata-Flavor", "Google"),
                    "metadata server",
                )
                .await
            }
        }
    }
}

/// gcloud's ADC file: `$CLOUDSDK_CONFIG`, else `~/.config/gcloud`
/// (`%APPDATA%\gcloud` on Windows).
fn well_known_file() -> Option<PathBuf> {
    let config_dir = match std::env::var_os("CLOUDSDK_CONFIG").filter(|v| !v.is_empty()) {
        Some(dir) => PathBuf::from(dir),
        None if cfg!(windows) => dirs::config_dir()?.join("gcloud"),
        None => dirs::home_dir()?.join(".config").join("gcloud"),
    };
    Some(config_dir.join(WELL_KNOWN_FILE))
}

fn read_credentials_file(path: &Path) -> SignResult<CredentialsFile> {
    let raw = std::fs::read(path).map_err(|e| SignError::Credentials {
        message: format!("reading {}: {}", path.display(), e),
    })?;
    serde_json::from_slice(&raw).map_err(|e| SignError::Credentials {
        message: format!("parsing {}: {}", path.display(), e),
    })
}

fn sign_assertion(
    client_email: &str,
    private_key: &str,
    private_key_id: Option<String>,
    token_uri: &str,
) -> SignResult<String> {
    let key = EncodingKey::from_rsa_pem(private_key.as_bytes()).map_err(|e| {
        SignError::Credentials {
            message: format!("invalid service account private key: {}", e),
        }
    })?;

    let mut header = Header::new(Algorithm::RS256);
    header.kid = private_key_id;

    let now = Utc::now().timestamp();
    let claims = AssertionClaims {
        iss: client_email,
        scope: CLOUD_PLATFORM_SCOPE,
        aud: token_uri,
        iat: now,
        exp: now + ASSERTION_LIFETIME_SECS,
    };

    jsonwebtoken::encode(&header, &claims, &key).map_err(|e| SignError::Credentials {
        message: format!("signing service account assertion: {}", e),
    })
}

async fn request_access_token(
    request: reqwest::RequestBuilder,
    what: &str,
) -> SignResult<String> {
    let response = request.send().await.map_err(|e| SignError::Credentials {
        message: format!("{} unreachable: {}", what, e),
    })?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(SignError::Credentials {
            message: format!("{}: HTTP {} - {}", what, status, body),
        });
    }

    let token: AccessTokenResponse = response.json().await.map_err(|e| SignError::Credentials {
        message: format!("failed to parse {} response: {}", what, e),
    })?;

    debug!(source = what, expires_in = ?token.expires_in, "obtained access token");
    Ok(token.access_token)
}

impl Default for CredentialSource {
    fn default() -> Self {
        Self::from_env()
    }
}

impl fmt::Debug for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(_) => f.write_str("Static(<redacted>)"),
            Self::CredentialsFile { path } => f
                .debug_struct("CredentialsFile")
                .field("path", path)
                .finish(),
            Self::MetadataServer { url } => f
                .debug_struct("MetadataServer")
                .field("url", url)
                .finish(),
        }
    }
}
