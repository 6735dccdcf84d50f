//! Error types for signature validation, signing and token issuance.

/// Error reported by a signer gateway.
///
/// Gateways know nothing about edges or batches, so these carry no image
/// context. The orchestration layer wraps them into [`SignError`] together
/// with the reference that was being processed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// The signing backend or registry could not be reached, or answered
    /// with something we could not interpret.
    #[error("backend communication failed: {message}")]
    Transport { message: String },

    /// A signature exists but did not verify.
    #[error("invalid signature: {reason}")]
    Invalid { reason: String },

    /// The signer refused or failed to produce a signature.
    #[error("signer rejected request: {message}")]
    Rejected { message: String },
}

impl GatewayError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid {
            reason: reason.into(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport {
            message: err.to_string(),
        }
    }
}

/// Coarse classification of a [`SignError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Registry, signer or credential service could not be talked to.
    BackendCommunication,
    /// A signature was present and failed verification.
    SignatureInvalid,
    /// An identity token could not be minted.
    TokenIssuance,
    /// Malformed input or configuration.
    InvalidInput,
}

/// Errors surfaced by the promotion signing operations.
#[derive(Debug, thiserror::Error)]
pub enum SignError {
    /// The "is this reference signed" check failed.
    #[error("checking if {reference} is signed: {source}")]
    SignatureCheck {
        reference: String,
        #[source]
        source: GatewayError,
    },

    /// Verification of a signed reference failed.
    #[error("verifying signatures of image {reference}: {source}")]
    Verification {
        reference: String,
        #[source]
        source: GatewayError,
    },

    /// Signing a promoted reference failed.
    #[error("signing image {reference}: {source}")]
    Signing {
        reference: String,
        #[source]
        source: GatewayError,
    },

    /// Identity token issuance failed.
    #[error("getting identity token for {service_account}: {message}")]
    TokenIssuance {
        service_account: String,
        message: String,
    },

    /// Ambient credentials could not be obtained.
    #[error("credentials unavailable: {message}")]
    Credentials { message: String },

    /// Token could not be decoded as a JWT.
    #[error("malformed identity token: {reason}")]
    MalformedToken { reason: String },

    /// Invalid image reference.
    #[error("invalid image reference: {reference} - {reason}")]
    InvalidReference { reference: String, reason: String },

    /// Invalid content digest.
    #[error("invalid digest: {digest} - {reason}")]
    InvalidDigest { digest: String, reason: String },

    /// Configuration error.
    #[error("configuration error: {message}")]
    Config { message: String },
}

impl SignError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::SignatureCheck { .. } => ErrorClass::BackendCommunication,
            Self::Verification { source, .. } | Self::Signing { source, .. } => match source {
                GatewayError::Invalid { .. } => ErrorClass::SignatureInvalid,
                GatewayError::Transport { .. } | GatewayError::Rejected { .. } => {
                    ErrorClass::BackendCommunication
                }
            },
            Self::TokenIssuance { .. } | Self::Credentials { .. } => ErrorClass::TokenIssuance,
            Self::MalformedToken { .. }
            | Self::InvalidReference { .. }
            | Self::InvalidDigest { .. }
            | Self::Config { .. } => ErrorClass::InvalidInput,
        }
    }

    /// Image reference the error is about, if any.
    pub fn reference(&self) -> Option<&str> {
        match self {
            Self::SignatureCheck { reference, .. }
            | Self::Verification { reference, .. }
            | Self::Signing { reference, .. }
            | Self::InvalidReference { reference, .. } => Some(reference),
            _ => None,
        }
    }

    /// Exit code for CLI.
    pub fn exit_code(&self) -> i32 {
        match self.class() {
            ErrorClass::InvalidInput => 1,
            ErrorClass::TokenIssuance => 2,
            ErrorClass::SignatureInvalid => 4,
            ErrorClass::BackendCommunication => 5,
        }
    }
}

/// Result type for promotion signing operations.
pub type SignResult<T> = Result<T, SignError>;
