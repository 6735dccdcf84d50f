//! Staging signature validation.

use tracing::{debug, info, warn};

use crate::error::{SignError, SignResult};
use crate::reference::ImageReference;
use crate::signer::SignerGateway;
use crate::types::EdgeSet;

/// Check the staging images of a batch for signatures and verify any found.
///
/// Edges are processed in order. An unsigned staging image is skipped: only a
/// present-but-invalid signature fails validation. The first failure aborts
/// the whole batch and no later edge is touched.
pub async fn validate_staging_signatures<G, A>(gateway: &G, edges: &EdgeSet<A>) -> SignResult<()>
where
    G: SignerGateway + ?Sized,
{
    let mut verified = 0usize;
    let mut unsigned = 0usize;

    for edge in edges.keys() {
        let reference = ImageReference::source(edge);
        info!(reference = %reference, "verifying signatures of image");

        let signed = gateway.is_image_signed(&reference).await.map_err(|source| {
            warn!(reference = %reference, error = %source, "signature check failed");
            SignError::SignatureCheck {
                reference: reference.to_string(),
                source,
            }
        })?;

        if !signed {
            info!(reference = %reference, "no signatures found, not checking");
            unsigned += 1;
            continue;
        }

        let outcome = gateway.verify_image(&reference).await.map_err(|source| {
            warn!(reference = %reference, error = %source, "signature verification failed");
            SignError::Verification {
                reference: reference.to_string(),
                source,
            }
        })?;

        info!(
            reference = %reference,
            signatures = outcome.verified_signatures,
            "signatures verified"
        );
        verified += 1;
    }

    debug!(
        gateway = gateway.gateway_type(),
        edges = edges.len(),
        verified,
        unsigned,
        "staging signature validation complete"
    );
    Ok(())
}
