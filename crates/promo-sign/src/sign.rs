//! Signing of promoted images.

use tracing::{info, warn};

use crate::error::{SignError, SignResult};
use crate::options::{PromoterOptions, SyncContext};
use crate::reference::ImageReference;
use crate::signer::SignerGateway;
use crate::types::EdgeSet;

/// Sign the destination image of every edge and store the signatures in the
/// destination registry.
///
/// The first failure aborts the batch. Images signed before it keep their
/// signatures: the registry side treats signing as append-only.
pub async fn sign_images<G, A>(
    gateway: &G,
    _options: &PromoterOptions,
    sync_context: &SyncContext,
    edges: &EdgeSet<A>,
) -> SignResult<()>
where
    G: SignerGateway + ?Sized,
{
    for edge in edges.keys() {
        let reference = ImageReference::destination(edge);

        let outcome = gateway.sign_image(&reference).await.map_err(|source| {
            warn!(
                run_id = %sync_context.run_id,
                reference = %reference,
                error = %source,
                "signing failed"
            );
            SignError::Signing {
                reference: reference.to_string(),
                source,
            }
        })?;

        info!(
            run_id = %sync_context.run_id,
            reference = %reference,
            signature = ?outcome.signature_reference,
            "signed image"
        );
    }
    Ok(())
}
