//! Signer gateway: the capability that checks, verifies and creates image
//! signatures.
//!
//! The cryptography lives behind this trait. Operations in this crate only
//! orchestrate calls to it and enforce batch pass/fail semantics.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::GatewayError;
use crate::reference::ImageReference;

pub mod cosign;

pub use cosign::{CosignOptions, CosignSigner};

/// Result of a successful verification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyOutcome {
    /// Number of signatures that verified.
    pub verified_signatures: usize,

    /// Certificate identity of the signer, when the backend reports one.
    pub certificate_identity: Option<String>,
}

/// Result of a successful signing call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignOutcome {
    /// Where the signature was stored, when the backend reports it.
    pub signature_reference: Option<String>,
}

/// Signature capability injected into validation and signing.
///
/// Implementations must be stateless across calls: each call is
/// self-contained, so one instance may be shared freely.
#[async_trait]
pub trait SignerGateway: Send + Sync {
    /// Whether any signature is attached to the reference.
    async fn is_image_signed(&self, reference: &ImageReference) -> Result<bool, GatewayError>;

    /// Verify the signatures attached to the reference.
    async fn verify_image(&self, reference: &ImageReference)
        -> Result<VerifyOutcome, GatewayError>;

    /// Sign the reference and store the signature in its registry.
    async fn sign_image(&self, reference: &ImageReference) -> Result<SignOutcome, GatewayError>;

    /// Gateway name for logging.
    fn gateway_type(&self) -> &'static str;
}

#[async_trait]
impl<T: SignerGateway + ?Sized> SignerGateway for Arc<T> {
    async fn is_image_signed(&self, reference: &ImageReference) -> Result<bool, GatewayError> {
        (**self).is_image_signed(reference).await
    }

    async fn verify_image(
        &self,
        reference: &ImageReference,
    ) -> Result<VerifyOutcome, GatewayError> {
        (**self).verify_image(reference).await
    }

    async fn sign_image(&self, reference: &ImageReference) -> Result<SignOutcome, GatewayError> {
        (**self).sign_image(reference).await
    }

    fn gateway_type(&self) -> &'static str {
        (**self).gateway_type()
    }
}
