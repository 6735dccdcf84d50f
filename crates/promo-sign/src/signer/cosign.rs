//! Cosign-backed signer gateway.
//!
//! - Presence check: `HEAD /v2/<repository>/manifests/<alg>-<hex>.sig` on the
//!   image's registry (the tag cosign stores signatures under). A `401` with a
//!   `WWW-Authenticate: Bearer` challenge is answered with a token from the
//!   challenge realm and the request is retried once.
//! - Verification and signing: the `cosign` binary.
//!
//! Keyless signing reads the identity token from `SIGSTORE_ID_TOKEN`, which is
//! set on the child process when [`CosignOptions::identity_token`] is present.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::header::{
    HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT, WWW_AUTHENTICATE,
};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use super::{SignOutcome, SignerGateway, VerifyOutcome};
use crate::error::{GatewayError, SignError, SignResult};
use crate::reference::ImageReference;
use crate::types::Digest;

const USER_AGENT_VALUE: &str = concat!("promo-sign/", env!("CARGO_PKG_VERSION"));

const MANIFEST_MEDIA_TYPES: &str = "application/vnd.oci.image.manifest.v1+json, \
     application/vnd.docker.distribution.manifest.v2+json";

/// Longest chunk of cosign stderr carried into an error message.
const MAX_STDERR_CHARS: usize = 500;

/// Registry user name that pairs with an OAuth access token as password.
const OAUTH_TOKEN_USER: &str = "oauth2accesstoken";

/// `cosign verify` stderr fragments that mean the signatures themselves were
/// rejected. Any other failure is a backend problem.
const SIGNATURE_REJECTED_MARKERS: &[&str] = &[
    "no matching signatures",
    "no signatures found",
    "invalid signature",
    "signature mismatch",
    "failed to verify signature",
    "verification error",
    "none of the expected identities matched",
];

/// Cosign gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CosignOptions {
    /// Path to the cosign binary.
    #[serde(default = "default_cosign_path")]
    pub cosign_path: String,

    /// Timeout for a single cosign invocation in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// OIDC identity token for keyless signing.
    #[serde(default)]
    pub identity_token: Option<String>,

    /// Expected certificate identity when verifying.
    #[serde(default)]
    pub certificate_identity: Option<String>,

    /// Expected OIDC issuer when verifying.
    #[serde(default)]
    pub certificate_oidc_issuer: Option<String>,

    /// Talk plain HTTP to registries and pass `--allow-insecure-registry`.
    #[serde(default)]
    pub allow_insecure: bool,

    /// Access token for the registry presence check. Sent as a bearer token,
    /// and as the `oauth2accesstoken` password when the registry challenges
    /// for a token of its own.
    #[serde(default)]
    pub registry_token: Option<String>,

    /// Registry request timeout in seconds.
    #[serde(default = "default_registry_timeout")]
    pub registry_timeout_secs: u64,
}

fn default_cosign_path() -> String {
    "cosign".to_string()
}

fn default_timeout() -> u64 {
    180
}

fn default_registry_timeout() -> u64 {
    30
}

impl Default for CosignOptions {
    fn default() -> Self {
        Self {
            cosign_path: default_cosign_path(),
            timeout_secs: default_timeout(),
            identity_token: None,
            certificate_identity: None,
            certificate_oidc_issuer: None,
            allow_insecure: false,
            registry_token: None,
            registry_timeout_secs: default_registry_timeout(),
        }
    }
}

impl CosignOptions {
    /// Create options from environment variables.
    ///
    /// | Variable | Description |
    /// |----------|-------------|
    /// | `PROMO_COSIGN_PATH` | cosign binary (default: `cosign`) |
    /// | `PROMO_COSIGN_TIMEOUT` | Per-invocation timeout in seconds (default: 180) |
    /// | `PROMO_COSIGN_IDENTITY_TOKEN` | Keyless signing identity token |
    /// | `PROMO_COSIGN_CERTIFICATE_IDENTITY` | Expected signer identity |
    /// | `PROMO_COSIGN_CERTIFICATE_OIDC_ISSUER` | Expected signer OIDC issuer |
    /// | `PROMO_COSIGN_ALLOW_INSECURE` | Plain HTTP registries (dev only) |
    /// | `PROMO_COSIGN_REGISTRY_TOKEN` | Registry bearer token |
    /// | `PROMO_COSIGN_REGISTRY_TIMEOUT` | Registry request timeout (default: 30) |
    pub fn from_env() -> Self {
        let non_empty = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());

        Self {
            cosign_path: non_empty("PROMO_COSIGN_PATH").unwrap_or_else(default_cosign_path),
            timeout_secs: non_empty("PROMO_COSIGN_TIMEOUT")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_timeout),
            identity_token: non_empty("PROMO_COSIGN_IDENTITY_TOKEN"),
            certificate_identity: non_empty("PROMO_COSIGN_CERTIFICATE_IDENTITY"),
            certificate_oidc_issuer: non_empty("PROMO_COSIGN_CERTIFICATE_OIDC_ISSUER"),
            allow_insecure: std::env::var("PROMO_COSIGN_ALLOW_INSECURE")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            registry_token: non_empty("PROMO_COSIGN_REGISTRY_TOKEN"),
            registry_timeout_secs: non_empty("PROMO_COSIGN_REGISTRY_TIMEOUT")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_registry_timeout),
        }
    }

    pub fn with_cosign_path(mut self, path: impl Into<String>) -> Self {
        self.cosign_path = path.into();
        self
    }

    pub fn with_identity_token(mut self, token: impl Into<String>) -> Self {
        self.identity_token = Some(token.into());
        self
    }

    pub fn with_certificate_identity(
        mut self,
        identity: impl Into<String>,
        issuer: impl Into<String>,
    ) -> Self {
        self.certificate_identity = Some(identity.into());
        self.certificate_oidc_issuer = Some(issuer.into());
        self
    }

    pub fn with_allow_insecure(mut self, allow: bool) -> Self {
        self.allow_insecure = allow;
        self
    }

    pub fn with_registry_token(mut self, token: impl Into<String>) -> Self {
        self.registry_token = Some(token.into());
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

/// Parameters of a `WWW-Authenticate: Bearer` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BearerChallenge {
    pub realm: String,
    pub service: Option<String>,
    pub scope: Option<String>,
}

impl BearerChallenge {
    /// Parse `Bearer realm="...",service="...",scope="..."`. Quoted values
    /// may contain commas (`repository:foo:pull,push`).
    pub(crate) fn parse(header: &str) -> Option<Self> {
        let (scheme, params) = header.trim().split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("bearer") {
            return None;
        }

        let mut realm = None;
        let mut service = None;
        let mut scope = None;

        let mut rest = params.trim();
        while !rest.is_empty() {
            let (key, after) = rest.split_once('=')?;
            let after = after.trim_start();
            let (value, remainder) = match after.strip_prefix('"') {
                Some(quoted) => {
                    let end = quoted.find('"')?;
                    (&quoted[..end], &quoted[end + 1..])
                }
                None => match after.find(',') {
                    Some(i) => (&after[..i], &after[i..]),
                    None => (after, ""),
                },
            };

            match key.trim().to_ascii_lowercase().as_str() {
                "realm" => realm = Some(value.to_string()),
                "service" => service = Some(value.to_string()),
                "scope" => scope = Some(value.to_string()),
                _ => {}
            }
            rest = remainder.trim_start().trim_start_matches(',').trim_start();
        }

        Some(Self {
            realm: realm.filter(|r| !r.is_empty())?,
            service,
            scope,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RegistryTokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

/// Signer gateway backed by an OCI registry lookup and the cosign CLI.
#[derive(Debug, Clone)]
pub struct CosignSigner {
    options: CosignOptions,
    http: reqwest::Client,
}

impl CosignSigner {
    pub fn new(options: CosignOptions) -> SignResult<Self> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(options.registry_timeout_secs))
            .default_headers(default_headers)
            .build()
            .map_err(|e| SignError::Config {
                message: format!("failed to create registry HTTP client: {}", e),
            })?;

        Ok(Self { options, http })
    }

    pub fn from_env() -> SignResult<Self> {
        Self::new(CosignOptions::from_env())
    }

    pub fn options(&self) -> &CosignOptions {
        &self.options
    }

    fn manifest_url(&self, reference: &ImageReference) -> String {
        let scheme = if self.options.allow_insecure {
            "http"
        } else {
            "https"
        };
        format!(
            "{}://{}/v2/{}/manifests/{}",
            scheme,
            reference.host(),
            reference.repository(),
            signature_tag(reference.digest())
        )
    }

    pub(crate) fn verify_args(&self, reference: &ImageReference) -> Vec<String> {
        let mut args = vec!["verify".to_string(), "--output".to_string(), "json".to_string()];

        match &self.options.certificate_identity {
            Some(identity) => args.extend(["--certificate-identity".to_string(), identity.clone()]),
            None => args.extend([
                "--certificate-identity-regexp".to_string(),
                ".*".to_string(),
            ]),
        }
        match &self.options.certificate_oidc_issuer {
            Some(issuer) => args.extend(["--certificate-oidc-issuer".to_string(), issuer.clone()]),
            None => args.extend([
                "--certificate-oidc-issuer-regexp".to_string(),
                ".*".to_string(),
            ]),
        }

        if self.options.allow_insecure {
            args.push("--allow-insecure-registry".to_string());
        }
        args.push(reference.to_string());
        args
    }

    pub(crate) fn sign_args(&self, reference: &ImageReference) -> Vec<String> {
        let mut args = vec!["sign".to_string(), "--yes".to_string()];
        if self.options.allow_insecure {
            args.push("--allow-insecure-registry".to_string());
        }
        args.push(reference.to_string());
        args
    }

    async fn head_manifest(
        &self,
        url: &str,
        bearer: Option<&str>,
    ) -> Result<reqwest::Response, GatewayError> {
        let mut request = self.http.head(url).header(ACCEPT, MANIFEST_MEDIA_TYPES);
        if let Some(token) = bearer {
            request = request.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        Ok(request.send().await?)
    }

    /// Answer a bearer challenge with a pull token from its realm.
    async fn registry_token(
        &self,
        challenge: &BearerChallenge,
        reference: &ImageReference,
    ) -> Result<String, GatewayError> {
        let mut url = Url::parse(&challenge.realm).map_err(|e| {
            GatewayError::transport(format!(
                "invalid token realm {:?}: {}",
                challenge.realm, e
            ))
        })?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(service) = &challenge.service {
                query.append_pair("service", service);
            }
            let scope = challenge
                .scope
                .clone()
                .unwrap_or_else(|| format!("repository:{}:pull", reference.repository()));
            query.append_pair("scope", &scope);
        }
        debug!(realm = %challenge.realm, service = ?challenge.service, "requesting registry token");

        let mut request = self.http.get(url);
        if let Some(token) = &self.options.registry_token {
            let basic = STANDARD.encode(format!("{}:{}", OAUTH_TOKEN_USER, token));
            request = request.header(AUTHORIZATION, format!("Basic {}", basic));
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            warn!(realm = %challenge.realm, status = status.as_u16(), "registry token request failed");
            return Err(GatewayError::transport(format!(
                "registry token request to {} failed: HTTP {}",
                challenge.realm,
                status.as_u16()
            )));
        }

        let body: RegistryTokenResponse = response.json().await.map_err(|e| {
            GatewayError::transport(format!("failed to parse registry token response: {}", e))
        })?;
        body.token
            .or(body.access_token)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| GatewayError::transport("registry token response carried no token"))
    }

    async fn run_cosign(&self, args: &[String]) -> Result<std::process::Output, GatewayError> {
        let subcommand = args.first().map(String::as_str).unwrap_or_default();
        debug!(cosign = %self.options.cosign_path, subcommand, "running cosign");

        let mut command = tokio::process::Command::new(&self.options.cosign_path);
        command.args(args).stdin(Stdio::null()).kill_on_drop(true);
        if let Some(token) = &self.options.identity_token {
            command.env("SIGSTORE_ID_TOKEN", token);
        }

        let timeout = Duration::from_secs(self.options.timeout_secs);
        tokio::time::timeout(timeout, command.output())
            .await
            .map_err(|_| {
                GatewayError::transport(format!(
                    "cosign {} timed out after {}s",
                    subcommand,
                    timeout.as_secs()
                ))
            })?
            .map_err(|e| {
                GatewayError::transport(format!(
                    "failed to run {}: {}",
                    self.options.cosign_path, e
                ))
            })
    }
}

#[async_trait]
impl SignerGateway for CosignSigner {
    async fn is_image_signed(&self, reference: &ImageReference) -> Result<bool, GatewayError> {
        let url = self.manifest_url(reference);
        debug!(url = %url, "checking for signature manifest");

        let mut response = self
            .head_manifest(&url, self.options.registry_token.as_deref())
            .await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            let challenge = response
                .headers()
                .get(WWW_AUTHENTICATE)
                .and_then(|v| v.to_str().ok())
                .and_then(BearerChallenge::parse);
            if let Some(challenge) = challenge {
                let token = self.registry_token(&challenge, reference).await?;
                response = self.head_manifest(&url, Some(&token)).await?;
            }
        }

        let status = response.status();
        if status.is_success() {
            return Ok(true);
        }
        if status == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(GatewayError::transport(format!(
                "registry denied access to {}: HTTP {}",
                url,
                status.as_u16()
            )));
        }
        Err(GatewayError::transport(format!(
            "registry returned HTTP {} for {}",
            status.as_u16(),
            url
        )))
    }

    async fn verify_image(
        &self,
        reference: &ImageReference,
    ) -> Result<VerifyOutcome, GatewayError> {
        let output = self.run_cosign(&self.verify_args(reference)).await?;
        if !output.status.success() {
            return Err(classify_verify_failure(&output.stderr));
        }
        Ok(parse_verify_output(&output.stdout))
    }

    async fn sign_image(&self, reference: &ImageReference) -> Result<SignOutcome, GatewayError> {
        let output = self.run_cosign(&self.sign_args(reference)).await?;
        if !output.status.success() {
            return Err(GatewayError::rejected(stderr_tail(&output.stderr)));
        }
        Ok(SignOutcome {
            signature_reference: parse_pushed_signature(&output.stderr),
        })
    }

    fn gateway_type(&self) -> &'static str {
        "cosign"
    }
}

/// Tag cosign stores the signature of `digest` under (`sha256-<hex>.sig`).
pub fn signature_tag(digest: &Digest) -> String {
    format!("{}-{}.sig", digest.algorithm(), digest.hex())
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    if text.is_empty() {
        return "cosign exited with an error and no output".to_string();
    }
    let skip = text.chars().count().saturating_sub(MAX_STDERR_CHARS);
    text.chars().skip(skip).collect()
}

fn classify_verify_failure(stderr: &[u8]) -> GatewayError {
    let message = stderr_tail(stderr);
    let lowered = String::from_utf8_lossy(stderr).to_ascii_lowercase();
    if SIGNATURE_REJECTED_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
    {
        GatewayError::invalid(message)
    } else {
        GatewayError::transport(message)
    }
}

/// `cosign verify --output json` prints one JSON array of verified payloads.
fn parse_verify_output(stdout: &[u8]) -> VerifyOutcome {
    match serde_json::from_slice::<serde_json::Value>(stdout) {
        Ok(serde_json::Value::Array(entries)) => VerifyOutcome {
            verified_signatures: entries.len(),
            certificate_identity: entries.iter().find_map(|entry| {
                entry
                    .get("optional")
                    .and_then(|o| o.get("Subject"))
                    .and_then(|s| s.as_str())
                    .map(String::from)
            }),
        },
        // Exit status 0 means at least one signature verified.
        _ => VerifyOutcome {
            verified_signatures: 1,
            certificate_identity: None,
        },
    }
}

fn parse_pushed_signature(stderr: &[u8]) -> Option<String> {
    String::from_utf8_lossy(stderr)
        .lines()
        .find_map(|line| line.split_once("Pushing signature to:"))
        .map(|(_, target)| target.trim().to_string())
        .filter(|target| !target.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn digest() -> Digest {
        Digest::parse(&format!("sha256:{}", "c".repeat(64))).unwrap()
    }

    fn reference() -> ImageReference {
        ImageReference::parse(&format!("gcr.io/k8s-staging-foo/pause@{}", digest())).unwrap()
    }

    fn local_reference(server: &MockServer) -> ImageReference {
        ImageReference::parse(&format!("{}/staging/app@{}", server.address(), digest())).unwrap()
    }

    fn insecure_signer() -> CosignSigner {
        CosignSigner::new(CosignOptions::default().with_allow_insecure(true)).unwrap()
    }

    fn manifest_path() -> String {
        format!("/v2/staging/app/manifests/sha256-{}.sig", "c".repeat(64))
    }

    #[test]
    fn test_signature_tag() {
        assert_eq!(
            signature_tag(&digest()),
            format!("sha256-{}.sig", "c".repeat(64))
        );
    }

    #[test]
    fn test_manifest_url_uses_https_by_default() {
        let signer = CosignSigner::new(CosignOptions::default()).unwrap();
        assert_eq!(
            signer.manifest_url(&reference()),
            format!(
                "https://gcr.io/v2/k8s-staging-foo/pause/manifests/sha256-{}.sig",
                "c".repeat(64)
            )
        );
    }

    #[test]
    fn test_verify_args_keyless_any_identity() {
        let signer = CosignSigner::new(CosignOptions::default()).unwrap();
        let args = signer.verify_args(&reference());
        assert_eq!(args[0], "verify");
        assert!(args.contains(&"--certificate-identity-regexp".to_string()));
        assert!(args.contains(&"--certificate-oidc-issuer-regexp".to_string()));
        assert_eq!(args.last().unwrap(), &reference().to_string());
    }

    #[test]
    fn test_verify_args_pinned_identity() {
        let options = CosignOptions::default().with_certificate_identity(
            "krel-trust@k8s-releng-prod.iam.gserviceaccount.com",
            "https://accounts.google.com",
        );
        let args = CosignSigner::new(options).unwrap().verify_args(&reference());
        let pos = args
            .iter()
            .position(|a| a == "--certificate-identity")
            .unwrap();
        assert_eq!(
            args[pos + 1],
            "krel-trust@k8s-releng-prod.iam.gserviceaccount.com"
        );
        assert!(!args.contains(&"--certificate-identity-regexp".to_string()));
    }

    #[test]
    fn test_sign_args_never_carry_token() {
        let options = CosignOptions::default()
            .with_identity_token("secret-jwt")
            .with_allow_insecure(true);
        let args = CosignSigner::new(options).unwrap().sign_args(&reference());
        assert_eq!(args[..2], ["sign".to_string(), "--yes".to_string()]);
        assert!(args.contains(&"--allow-insecure-registry".to_string()));
        assert!(args.iter().all(|a| !a.contains("secret-jwt")));
    }

    #[test]
    fn test_parse_verify_output() {
        let stdout = br#"[{"critical":{},"optional":{"Subject":"signer@example.com"}},{"critical":{}}]"#;
        let outcome = parse_verify_output(stdout);
        assert_eq!(outcome.verified_signatures, 2);
        assert_eq!(
            outcome.certificate_identity.as_deref(),
            Some("signer@example.com")
        );
    }

    #[test]
    fn test_parse_verify_output_not_json() {
        let outcome = parse_verify_output(b"Verification for ... --");
        assert_eq!(outcome.verified_signatures, 1);
        assert!(outcome.certificate_identity.is_none());
    }

    #[test]
    fn test_parse_pushed_signature() {
        let stderr = b"tlog entry created with index: 42\nPushing signature to: registry.k8s.io/pause\n";
        assert_eq!(
            parse_pushed_signature(stderr).as_deref(),
            Some("registry.k8s.io/pause")
        );
        assert!(parse_pushed_signature(b"nothing here").is_none());
    }

    #[test]
    fn test_stderr_tail_truncates() {
        let long = "x".repeat(MAX_STDERR_CHARS + 50);
        assert_eq!(stderr_tail(long.as_bytes()).len(), MAX_STDERR_CHARS);
        assert!(stderr_tail(b"  ").contains("no output"));
    }

    #[test]
    #[serial]
    fn test_options_from_env() {
        std::env::set_var("PROMO_COSIGN_PATH", "/usr/local/bin/cosign");
        std::env::set_var("PROMO_COSIGN_TIMEOUT", "60");
        std::env::set_var("PROMO_COSIGN_ALLOW_INSECURE", "1");
        let options = CosignOptions::from_env();
        std::env::remove_var("PROMO_COSIGN_PATH");
        std::env::remove_var("PROMO_COSIGN_TIMEOUT");
        std::env::remove_var("PROMO_COSIGN_ALLOW_INSECURE");

        assert_eq!(options.cosign_path, "/usr/local/bin/cosign");
        assert_eq!(options.timeout_secs, 60);
        assert!(options.allow_insecure);
        assert_eq!(options.registry_timeout_secs, 30);
    }

    #[tokio::test]
    async fn test_is_image_signed_present() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path(manifest_path()))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let signed = insecure_signer()
            .is_image_signed(&local_reference(&server))
            .await
            .unwrap();
        assert!(signed);
    }

    #[tokio::test]
    async fn test_is_image_signed_missing() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path(manifest_path()))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let signed = insecure_signer()
            .is_image_signed(&local_reference(&server))
            .await
            .unwrap();
        assert!(!signed);
    }

    #[tokio::test]
    async fn test_is_image_signed_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let result = insecure_signer()
            .is_image_signed(&local_reference(&server))
            .await;
        assert!(matches!(result, Err(GatewayError::Transport { .. })));
    }

    #[tokio::test]
    async fn test_is_image_signed_sends_registry_token() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(header("authorization", "Bearer registry-token"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let options = CosignOptions::default()
            .with_allow_insecure(true)
            .with_registry_token("registry-token");
        let signer = CosignSigner::new(options).unwrap();

        assert!(signer
            .is_image_signed(&local_reference(&server))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_missing_cosign_binary_is_transport_error() {
        let options =
            CosignOptions::default().with_cosign_path("/nonexistent/path/to/cosign-binary");
        let signer = CosignSigner::new(options).unwrap();

        let verify = signer.verify_image(&reference()).await;
        assert!(matches!(verify, Err(GatewayError::Transport { .. })));

        let sign = signer.sign_image(&reference()).await;
        assert!(matches!(sign, Err(GatewayError::Transport { .. })));
    }

    #[test]
    fn test_parse_bearer_challenge() {
        let challenge = BearerChallenge::parse(
            r#"Bearer realm="https://gcr.io/v2/token",service="gcr.io",scope="repository:k8s-staging-foo/pause:pull,push""#,
        )
        .unwrap();
        assert_eq!(challenge.realm, "https://gcr.io/v2/token");
        assert_eq!(challenge.service.as_deref(), Some("gcr.io"));
        assert_eq!(
            challenge.scope.as_deref(),
            Some("repository:k8s-staging-foo/pause:pull,push")
        );

        let bare = BearerChallenge::parse(r#"bearer realm="https://auth.example/token""#).unwrap();
        assert!(bare.service.is_none());
        assert!(bare.scope.is_none());

        assert!(BearerChallenge::parse(r#"Basic realm="registry""#).is_none());
        assert!(BearerChallenge::parse(r#"Bearer service="gcr.io""#).is_none());
    }

    fn bearer_challenge(server: &MockServer) -> String {
        format!(
            r#"Bearer realm="{}/token",service="registry.test",scope="repository:staging/app:pull""#,
            server.uri()
        )
    }

    async fn mount_token_endpoint(server: &MockServer, token: &str) {
        Mock::given(method("GET"))
            .and(path("/token"))
            .and(query_param("service", "registry.test"))
            .and(query_param("scope", "repository:staging/app:pull"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "token": token,
                "expires_in": 300
            })))
            .expect(1)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_is_image_signed_answers_bearer_challenge() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path(manifest_path()))
            .and(header("authorization", "Bearer anon"))
            .respond_with(ResponseTemplate::new(200))
            .with_priority(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("HEAD"))
            .and(path(manifest_path()))
            .respond_with(
                ResponseTemplate::new(401)
                    .insert_header("WWW-Authenticate", bearer_challenge(&server).as_str()),
            )
            .mount(&server)
            .await;
        mount_token_endpoint(&server, "anon").await;

        let signed = insecure_signer()
            .is_image_signed(&local_reference(&server))
            .await
            .unwrap();
        assert!(signed);
    }

    #[tokio::test]
    async fn test_is_image_signed_challenge_then_missing() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path(manifest_path()))
            .and(header("authorization", "Bearer anon"))
            .respond_with(ResponseTemplate::new(404))
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("HEAD"))
            .and(path(manifest_path()))
            .respond_with(
                ResponseTemplate::new(401)
                    .insert_header("WWW-Authenticate", bearer_challenge(&server).as_str()),
            )
            .mount(&server)
            .await;
        mount_token_endpoint(&server, "anon").await;

        let signed = insecure_signer()
            .is_image_signed(&local_reference(&server))
            .await
            .unwrap();
        assert!(!signed);
    }

    #[tokio::test]
    async fn test_challenge_token_request_uses_registry_token() {
        let server = MockServer::start().await;
        let basic = STANDARD.encode("oauth2accesstoken:ya29.registry");
        Mock::given(method("HEAD"))
            .and(path(manifest_path()))
            .and(header("authorization", "Bearer pull-token"))
            .respond_with(ResponseTemplate::new(200))
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("HEAD"))
            .and(path(manifest_path()))
            .respond_with(
                ResponseTemplate::new(401)
                    .insert_header("WWW-Authenticate", bearer_challenge(&server).as_str()),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/token"))
            .and(header("authorization", format!("Basic {}", basic).as_str()))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"access_token": "pull-token"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let options = CosignOptions::default()
            .with_allow_insecure(true)
            .with_registry_token("ya29.registry");
        let signed = CosignSigner::new(options)
            .unwrap()
            .is_image_signed(&local_reference(&server))
            .await
            .unwrap();
        assert!(signed);
    }

    #[tokio::test]
    async fn test_unauthorized_without_challenge_is_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let result = insecure_signer()
            .is_image_signed(&local_reference(&server))
            .await;
        match result {
            Err(GatewayError::Transport { message }) => {
                assert!(message.contains("denied access"), "got: {message}");
            }
            other => panic!("expected Transport error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_token_endpoint_failure_is_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(
                ResponseTemplate::new(401)
                    .insert_header("WWW-Authenticate", bearer_challenge(&server).as_str()),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let result = insecure_signer()
            .is_image_signed(&local_reference(&server))
            .await;
        match result {
            Err(GatewayError::Transport { message }) => {
                assert!(message.contains("token request"), "got: {message}");
            }
            other => panic!("expected Transport error, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_verify_failure() {
        let rejected = classify_verify_failure(
            b"Error: no matching signatures:\nnone of the expected identities matched what was in the certificate",
        );
        assert!(matches!(rejected, GatewayError::Invalid { .. }));

        let backend = classify_verify_failure(
            b"Error: GET https://gcr.io/v2/k8s-staging-foo/pause/manifests/sha256-abc.sig: dial tcp: connection refused",
        );
        assert!(matches!(backend, GatewayError::Transport { .. }));
    }

    #[cfg(unix)]
    mod fake_cosign {
        use super::*;
        use std::os::unix::fs::PermissionsExt;
        use tempfile::TempDir;

        /// Write an executable shell script standing in for cosign.
        fn script(dir: &TempDir, body: &str) -> String {
            let path = dir.path().join("cosign");
            std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path.to_string_lossy().into_owned()
        }

        fn signer(cosign: String) -> CosignSigner {
            CosignSigner::new(CosignOptions::default().with_cosign_path(cosign)).unwrap()
        }

        #[tokio::test]
        #[serial]
        async fn test_verify_success_parses_output() {
            let dir = TempDir::new().unwrap();
            let cosign = script(
                &dir,
                r#"[ "$1" = "verify" ] || exit 9
echo '[{"critical":{},"optional":{"Subject":"krel-trust@k8s-releng-prod.iam.gserviceaccount.com"}}]'"#,
            );

            let outcome = signer(cosign).verify_image(&reference()).await.unwrap();
            assert_eq!(outcome.verified_signatures, 1);
            assert_eq!(
                outcome.certificate_identity.as_deref(),
                Some("krel-trust@k8s-releng-prod.iam.gserviceaccount.com")
            );
        }

        #[tokio::test]
        #[serial]
        async fn test_verify_rejected_signature_is_invalid() {
            let dir = TempDir::new().unwrap();
            let cosign = script(&dir, "echo 'Error: no matching signatures' >&2\nexit 1");

            let result = signer(cosign).verify_image(&reference()).await;
            match result {
                Err(GatewayError::Invalid { reason }) => {
                    assert!(reason.contains("no matching signatures"), "got: {reason}");
                }
                other => panic!("expected Invalid, got {other:?}"),
            }
        }

        #[tokio::test]
        #[serial]
        async fn test_verify_backend_failure_is_transport() {
            let dir = TempDir::new().unwrap();
            let cosign = script(
                &dir,
                "echo 'Error: GET https://gcr.io/v2/: 503 Service Unavailable' >&2\nexit 1",
            );

            let result = signer(cosign).verify_image(&reference()).await;
            assert!(matches!(result, Err(GatewayError::Transport { .. })));
        }

        #[tokio::test]
        #[serial]
        async fn test_sign_passes_identity_token_through_env() {
            let dir = TempDir::new().unwrap();
            let cosign = script(
                &dir,
                r#"[ "$1" = "sign" ] || exit 9
[ "$SIGSTORE_ID_TOKEN" = "secret-jwt" ] || { echo "missing identity token" >&2; exit 3; }
echo "Pushing signature to: gcr.io/k8s-staging-foo/pause" >&2"#,
            );
            let options = CosignOptions::default()
                .with_cosign_path(cosign)
                .with_identity_token("secret-jwt");

            let outcome = CosignSigner::new(options)
                .unwrap()
                .sign_image(&reference())
                .await
                .unwrap();
            assert_eq!(
                outcome.signature_reference.as_deref(),
                Some("gcr.io/k8s-staging-foo/pause")
            );
        }

        #[tokio::test]
        #[serial]
        async fn test_sign_failure_is_rejected() {
            let dir = TempDir::new().unwrap();
            let cosign = script(&dir, "echo 'Error: signing: fulcio refused' >&2\nexit 1");

            let result = signer(cosign).sign_image(&reference()).await;
            match result {
                Err(GatewayError::Rejected { message }) => {
                    assert!(message.contains("fulcio refused"), "got: {message}");
                }
                other => panic!("expected Rejected, got {other:?}"),
            }
        }

        #[tokio::test]
        #[serial]
        async fn test_cosign_timeout_is_transport() {
            let dir = TempDir::new().unwrap();
            let cosign = script(&dir, "sleep 10");
            let options = CosignOptions::default()
                .with_cosign_path(cosign)
                .with_timeout_secs(1);

            let result = CosignSigner::new(options)
                .unwrap()
                .verify_image(&reference())
                .await;
            match result {
                Err(GatewayError::Transport { message }) => {
                    assert!(message.contains("timed out"), "got: {message}");
                }
                other => panic!("expected Transport, got {other:?}"),
            }
        }
    }
}
